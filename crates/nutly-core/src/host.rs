// ── Per-host supervision ──
//
// `UpsHost` owns the client for one upsd host and the UPS units found on
// it. `init()` keeps trying until the host answers, `poll()` refreshes
// every unit, and snapshots are published on a `watch` channel (current
// state) and a shared `broadcast` channel (change stream).

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::Utc;
use nutly_api::{Client, ClientEvent, Device};
use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::config::HostConfig;
use crate::error::CoreError;
use crate::model::{UpsSnapshot, UpsUnit};

/// Protocol version this crate is tested against.
pub const RECOMMENDED_API_VERSION: &str = "1.3";

const UPDATE_CHANNEL_SIZE: usize = 64;

type Snapshots = BTreeMap<String, UpsSnapshot>;

#[derive(Clone)]
struct Tracked {
    unit: UpsUnit,
    device: Device,
}

/// Supervisor for one upsd host.
#[derive(Clone)]
pub struct UpsHost {
    inner: Arc<HostInner>,
}

struct HostInner {
    name: String,
    client: Client,
    retry_delay: Duration,
    units: Mutex<BTreeMap<String, Tracked>>,
    snapshots: watch::Sender<Arc<Snapshots>>,
    updates: broadcast::Sender<UpsSnapshot>,
}

impl std::fmt::Debug for UpsHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpsHost")
            .field("name", &self.inner.name)
            .finish_non_exhaustive()
    }
}

impl UpsHost {
    pub fn new(config: HostConfig, retry_delay: Duration) -> Self {
        let (updates, _) = broadcast::channel(UPDATE_CHANNEL_SIZE);
        Self::with_updates(config, retry_delay, updates)
    }

    /// Like [`new()`](Self::new), publishing changes on a shared channel.
    pub fn with_updates(
        config: HostConfig,
        retry_delay: Duration,
        updates: broadcast::Sender<UpsSnapshot>,
    ) -> Self {
        let (snapshots, _) = watch::channel(Arc::new(Snapshots::new()));
        Self {
            inner: Arc::new(HostInner {
                name: config.name,
                client: Client::new(config.client),
                retry_delay,
                units: Mutex::new(BTreeMap::new()),
                snapshots,
                updates,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn client(&self) -> &Client {
        &self.inner.client
    }

    /// Units found by the last successful `init()`, ordered by id.
    pub fn units(&self) -> Vec<UpsUnit> {
        self.tracked().into_iter().map(|t| t.unit).collect()
    }

    /// Current snapshot of every unit, keyed by unit id.
    pub fn snapshots(&self) -> watch::Receiver<Arc<BTreeMap<String, UpsSnapshot>>> {
        self.inner.snapshots.subscribe()
    }

    /// Stream of snapshots as they are published.
    pub fn subscribe(&self) -> broadcast::Receiver<UpsSnapshot> {
        self.inner.updates.subscribe()
    }

    fn tracked(&self) -> Vec<Tracked> {
        self.inner
            .units
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    fn find(&self, id: &str) -> Result<Tracked, CoreError> {
        self.inner
            .units
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
            .ok_or_else(|| CoreError::UnitNotFound {
                identifier: id.to_owned(),
            })
    }

    fn publish(&self, snapshot: UpsSnapshot) {
        let id = snapshot.id.clone();
        self.inner.snapshots.send_modify(|all| {
            Arc::make_mut(all).insert(id, snapshot.clone());
        });
        let _ = self.inner.updates.send(snapshot);
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    /// Connect and discover units, retrying after `retry_delay` until it
    /// succeeds. Returns [`CoreError::Cancelled`] if `cancel` fires first.
    pub async fn init(&self, cancel: &CancellationToken) -> Result<usize, CoreError> {
        loop {
            let attempt = tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(CoreError::Cancelled),
                attempt = self.try_init() => attempt,
            };
            match attempt {
                Ok(count) => return Ok(count),
                Err(e) => {
                    warn!(host = %self.inner.name, error = %e, "initialisation failed, retrying");
                    self.inner.client.disconnect().await;
                }
            }
            tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(CoreError::Cancelled),
                () = tokio::time::sleep(self.inner.retry_delay) => {}
            }
        }
    }

    async fn try_init(&self) -> Result<usize, CoreError> {
        let client = &self.inner.client;
        client.connect().await?;

        let version = client.version().await?;
        let api_version = client.api_version().await?;
        info!(host = %self.inner.name, %version, %api_version, "connected to upsd");
        if api_version != RECOMMENDED_API_VERSION {
            warn!(
                host = %self.inner.name,
                %api_version,
                "recommended version: API v{RECOMMENDED_API_VERSION}"
            );
        }

        let devices = client.devices().await?;
        debug!(host = %self.inner.name, devices = ?devices.keys().collect::<Vec<_>>(), "devices");

        let now = Utc::now();
        let mut found = 0;
        for (name, device) in devices {
            let constants = device.constants().await?;
            let description = device.description(None).await?;
            let Some(unit) =
                UpsUnit::identify(&self.inner.name, &name, description.as_deref(), &constants)
            else {
                debug!(host = %self.inner.name, device = %name, "not a UPS, skipping");
                continue;
            };

            info!(
                id = %unit.id,
                manufacturer = unit.manufacturer.as_deref().unwrap_or_default(),
                model = unit.model.as_deref().unwrap_or_default(),
                "found UPS"
            );
            let snapshot = UpsSnapshot::from_variables(&unit, &constants, None, now);
            self.inner
                .units
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .entry(unit.id.clone())
                .or_insert(Tracked { unit, device });
            self.publish(snapshot);
            found += 1;
        }

        debug!(host = %self.inner.name, units = found, "initialised");
        Ok(found)
    }

    /// Refresh every unit. A unit that fails is marked faulted; the first
    /// failure is returned once all units were tried.
    pub async fn poll(&self) -> Result<(), CoreError> {
        let mut first_error = None;
        for tracked in self.tracked() {
            match self.refresh(&tracked).await {
                Ok(snapshot) => self.publish(snapshot),
                Err(e) => {
                    debug!(id = %tracked.unit.id, error = %e, "poll failed");
                    self.publish(UpsSnapshot::faulted(&tracked.unit, Utc::now()));
                    first_error.get_or_insert(e);
                }
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    async fn refresh(&self, tracked: &Tracked) -> Result<UpsSnapshot, CoreError> {
        let constants = tracked.device.constants().await?;
        let clients = tracked.device.n_clients().await?;
        Ok(UpsSnapshot::from_variables(
            &tracked.unit,
            &constants,
            clients,
            Utc::now(),
        ))
    }

    /// Flag every unit as faulted without touching the wire.
    pub fn mark_faulted(&self) {
        let faulted: Vec<UpsSnapshot> = self
            .inner
            .snapshots
            .borrow()
            .values()
            .filter(|s| !s.fault)
            .cloned()
            .map(|mut s| {
                s.fault = true;
                s
            })
            .collect();
        for snapshot in faulted {
            self.publish(snapshot);
        }
    }

    pub async fn shutdown(&self) {
        self.inner.client.disconnect().await;
    }

    // ── Unit controls ────────────────────────────────────────────────

    /// `SET VAR <dev> battery.charge.low "<percent>"`
    pub async fn set_low_battery_threshold(&self, id: &str, percent: u8) -> Result<(), CoreError> {
        if percent > 100 {
            return Err(CoreError::ValidationFailed {
                message: format!("low battery threshold {percent}% is above 100%"),
            });
        }
        let tracked = self.find(id)?;
        tracked
            .device
            .set("battery.charge.low", &percent.to_string())
            .await?;
        Ok(())
    }

    /// `INSTCMD <dev> beeper.disable` or `beeper.enable`.
    pub async fn set_mute(&self, id: &str, mute: bool) -> Result<(), CoreError> {
        let tracked = self.find(id)?;
        let command = if mute { "beeper.disable" } else { "beeper.enable" };
        tracked.device.command(command).await?;
        Ok(())
    }

    // ── Event log ────────────────────────────────────────────────────

    /// Log client traffic and fault every unit on disconnect, until
    /// `cancel` fires.
    pub async fn watch_events(self, cancel: CancellationToken) {
        let mut events = self.inner.client.subscribe();
        loop {
            let event = tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                event = events.recv() => event,
            };
            match event {
                Ok(ClientEvent::Connected { host, port }) => {
                    debug!(%host, port, "connected");
                }
                Ok(ClientEvent::Disconnected { host, port }) => {
                    debug!(%host, port, "disconnected");
                    self.mark_faulted();
                }
                Ok(ClientEvent::Request(request)) => debug!("{request}"),
                Ok(ClientEvent::Response(response)) => {
                    let request = &response.request;
                    trace!("{}: request {}: response: {}", request.name, request.id, response.body);
                    debug!("{}: request {}: OK", request.name, request.id);
                }
                Ok(ClientEvent::Error { request, message }) => match request {
                    Some(request) => {
                        warn!("{}: request {}: {message}", request.name, request.id);
                    }
                    None => warn!(host = %self.inner.name, "{message}"),
                },
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!(skipped, "event log lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    }
}
