// ── Host manager ──
//
// Owns one `UpsHost` per configured host, keyed by name, and runs each in
// its own task: init (retrying forever), then poll on a fixed interval.
// Hosts share nothing but the update channel, so a dead host never holds
// up the others.

use std::collections::BTreeMap;
use std::time::Duration;

use tokio::sync::{Mutex, broadcast};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::ManagerConfig;
use crate::host::UpsHost;
use crate::model::UpsSnapshot;

const UPDATE_CHANNEL_SIZE: usize = 256;

/// Connection manager for every monitored upsd host.
pub struct HostManager {
    hosts: BTreeMap<String, UpsHost>,
    poll_interval: Duration,
    updates: broadcast::Sender<UpsSnapshot>,
    cancel: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl HostManager {
    /// Build hosts from `config`. A host whose name is already taken is
    /// skipped with a warning.
    pub fn new(config: ManagerConfig) -> Self {
        let (updates, _) = broadcast::channel(UPDATE_CHANNEL_SIZE);
        let mut hosts = BTreeMap::new();
        for host in config.hosts {
            if hosts.contains_key(&host.name) {
                warn!(name = %host.name, "duplicate host name, skipping");
                continue;
            }
            let name = host.name.clone();
            let host = UpsHost::with_updates(host, config.retry_delay, updates.clone());
            hosts.insert(name, host);
        }

        Self {
            hosts,
            poll_interval: config.poll_interval,
            updates,
            cancel: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
        }
    }

    pub fn hosts(&self) -> impl Iterator<Item = &UpsHost> {
        self.hosts.values()
    }

    pub fn host(&self, name: &str) -> Option<&UpsHost> {
        self.hosts.get(name)
    }

    /// Snapshots from every host as they are published.
    pub fn subscribe(&self) -> broadcast::Receiver<UpsSnapshot> {
        self.updates.subscribe()
    }

    /// Current snapshot of every unit on every host, keyed by unit id.
    pub fn snapshots(&self) -> BTreeMap<String, UpsSnapshot> {
        self.hosts
            .values()
            .flat_map(|host| {
                let current = host.snapshots().borrow().clone();
                current
                    .iter()
                    .map(|(id, s)| (id.clone(), s.clone()))
                    .collect::<Vec<_>>()
            })
            .collect()
    }

    /// Spawn the supervision tasks. Calling it again is a no-op.
    pub async fn start(&self) {
        let mut tasks = self.tasks.lock().await;
        if !tasks.is_empty() {
            return;
        }
        for host in self.hosts.values() {
            info!(host = %host.name(), "starting host");
            tasks.push(tokio::spawn(
                host.clone().watch_events(self.cancel.child_token()),
            ));
            tasks.push(tokio::spawn(supervise(
                host.clone(),
                self.poll_interval,
                self.cancel.child_token(),
            )));
        }
    }

    /// Stop every task and disconnect every host.
    ///
    /// Hosts are disconnected before the tasks are awaited, so a command
    /// in flight is released with `Closed` instead of running out its
    /// response window.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        for host in self.hosts.values() {
            host.shutdown().await;
        }
        let mut tasks = self.tasks.lock().await;
        for handle in tasks.drain(..) {
            let _ = handle.await;
        }
        // A task may have reconnected before it saw the cancellation.
        for host in self.hosts.values() {
            host.shutdown().await;
        }
        debug!("host manager stopped");
    }
}

/// Init `host`, then poll it every `period` until cancelled.
async fn supervise(host: UpsHost, period: Duration, cancel: CancellationToken) {
    if host.init(&cancel).await.is_err() {
        return;
    }

    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval.tick().await; // init already published fresh snapshots

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            _ = interval.tick() => {
                let result = tokio::select! {
                    biased;
                    () = cancel.cancelled() => break,
                    result = host.poll() => result,
                };
                if let Err(e) = result {
                    warn!(host = %host.name(), error = %e, "poll failed");
                }
            }
        }
    }
}
