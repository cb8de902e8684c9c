// upsd connection: session lifecycle and request correlation.
//
// One `Client` owns one TCP session. The wire protocol has no request ids
// and no multiplexing, so every exchange goes through a single pending
// slot: claim it, write the command, let the reader task append incoming
// lines to the slot's body until the expected terminator shows up, then
// hand the body back through a oneshot. A second caller that finds the
// slot occupied backs off and retries a bounded number of times instead of
// queueing behind the first.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use secrecy::{ExposeSecret, SecretString};
use tokio::io::AsyncWriteExt;
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::error::Error;
use crate::request::{ClientEvent, Request, Response};
use crate::transport::{self, LineReader, LineWriter};

/// Well-known upsd port.
pub const DEFAULT_PORT: u16 = 3493;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);
const EVENT_CHANNEL_CAPACITY: usize = 256;

// ── Configuration ────────────────────────────────────────────────────

/// What to do when a command arrives while another is in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusyPolicy {
    /// Retries after the first attempt. Default: 5.
    pub max_retries: u32,
    /// Pause between attempts. Default: 500ms.
    pub delay: Duration,
}

impl Default for BusyPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            delay: Duration::from_millis(500),
        }
    }
}

/// Connection settings for a single upsd endpoint.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Name used to tag requests. Defaults to `hostname:port`.
    pub name: Option<String>,
    pub hostname: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<SecretString>,
    /// Response window per command, also used as the connect timeout.
    pub timeout: Duration,
    pub busy: BusyPolicy,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            name: None,
            hostname: "localhost".into(),
            port: DEFAULT_PORT,
            username: None,
            password: None,
            timeout: DEFAULT_TIMEOUT,
            busy: BusyPolicy::default(),
        }
    }
}

impl ClientConfig {
    pub fn new(hostname: impl Into<String>, port: u16) -> Self {
        Self {
            hostname: hostname.into(),
            port,
            ..Self::default()
        }
    }

    pub fn with_credentials(mut self, username: impl Into<String>, password: SecretString) -> Self {
        self.username = Some(username.into());
        self.password = Some(password);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// The name requests are tagged with.
    pub fn display_name(&self) -> String {
        self.name
            .clone()
            .unwrap_or_else(|| format!("{}:{}", self.hostname, self.port))
    }
}

// ── Pending slot ─────────────────────────────────────────────────────

/// How the reader task resolved a pending request.
#[derive(Debug)]
enum Outcome {
    Terminated(String),
    Refused(String),
    Closed,
}

struct Pending {
    request: Arc<Request>,
    expect: String,
    body: String,
    reply: oneshot::Sender<Outcome>,
}

#[derive(Default)]
struct Slot {
    pending: Option<Pending>,
}

type SharedSlot = Arc<Mutex<Slot>>;

fn lock(slot: &Mutex<Slot>) -> MutexGuard<'_, Slot> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

/// `true` when `line` finishes a request waiting for `expect`.
///
/// An empty expectation accepts the first non-empty line. Otherwise the
/// line must equal `expect` or continue it after a space.
fn terminates(expect: &str, line: &str) -> bool {
    if expect.is_empty() {
        return !line.is_empty();
    }
    line.strip_prefix(expect)
        .is_some_and(|rest| rest.is_empty() || rest.starts_with(' '))
}

/// Feed one received line into the pending slot.
fn dispatch_line(slot: &Mutex<Slot>, line: String) {
    let mut guard = lock(slot);
    let Some(pending) = guard.pending.as_mut() else {
        debug!(%line, "dropping line with no request pending");
        return;
    };

    trace!(request_id = pending.request.id, %line, "received");
    if !pending.body.is_empty() {
        pending.body.push('\n');
    }
    pending.body.push_str(&line);

    let refused = line
        .strip_prefix("ERR ")
        .map(|code| code.split_whitespace().next().unwrap_or_default().to_owned());
    let done = refused.is_some() || terminates(&pending.expect, &line);
    if !done {
        return;
    }

    if let Some(pending) = guard.pending.take() {
        let outcome = match refused {
            Some(code) => Outcome::Refused(code),
            None => Outcome::Terminated(pending.body),
        };
        // Receiver gone means the caller timed out or was dropped.
        let _ = pending.reply.send(outcome);
    }
}

/// Release whatever is pending with `Outcome::Closed`.
fn fail_pending(slot: &Mutex<Slot>) {
    if let Some(pending) = lock(slot).pending.take() {
        debug!(request_id = pending.request.id, "releasing pending request");
        let _ = pending.reply.send(Outcome::Closed);
    }
}

/// Clears the slot on every exit path of an exchange, including when the
/// caller's future is dropped mid-wait.
struct SlotGuard {
    slot: SharedSlot,
    id: u64,
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        let mut guard = lock(&self.slot);
        if guard
            .pending
            .as_ref()
            .is_some_and(|p| p.request.id == self.id)
        {
            guard.pending = None;
        }
    }
}

// ── Session ──────────────────────────────────────────────────────────

/// Reader task handle that aborts the task when dropped, so the read half
/// of the socket is released on every path that drops a session.
struct ReaderTask(JoinHandle<()>);

impl Drop for ReaderTask {
    fn drop(&mut self) {
        self.0.abort();
    }
}

struct Session {
    writer: LineWriter,
    reader: ReaderTask,
    /// Cleared by the reader before it releases the pending caller, so a
    /// caller that just saw `Closed` never reuses this session.
    alive: Arc<AtomicBool>,
    authenticated: bool,
}

impl Session {
    fn is_open(&self) -> bool {
        self.alive.load(Ordering::Acquire) && !self.reader.0.is_finished()
    }

    /// Stop reading and shut the write half down.
    async fn close(self) {
        let Self { writer, reader, .. } = self;
        drop(reader);
        let mut half = writer.into_inner();
        if let Err(e) = half.shutdown().await {
            debug!(error = %e, "socket shutdown failed");
        }
    }
}

/// Pump lines from the socket into the pending slot until the stream ends.
async fn read_loop(
    mut reader: LineReader,
    alive: Arc<AtomicBool>,
    slot: SharedSlot,
    events: broadcast::Sender<ClientEvent>,
    host: String,
    port: u16,
) {
    while let Some(frame) = reader.next().await {
        match frame {
            Ok(line) => dispatch_line(&slot, line),
            Err(e) => {
                warn!(%host, port, error = %e, "upsd read failed");
                let _ = events.send(ClientEvent::Error {
                    request: None,
                    message: format!("transport error: {e}"),
                });
                break;
            }
        }
    }

    debug!(%host, port, "upsd connection closed");
    alive.store(false, Ordering::Release);
    fail_pending(&slot);
    let _ = events.send(ClientEvent::Disconnected { host, port });
}

// ── Client ───────────────────────────────────────────────────────────

/// Async client for one upsd endpoint.
///
/// Cheaply cloneable; clones share the session, the pending slot and the
/// request counter. Independent `Client`s share nothing and run fully in
/// parallel.
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    config: ClientConfig,
    name: String,
    session: tokio::sync::Mutex<Option<Session>>,
    /// Held for the whole of `connect()`, authentication included, so a
    /// concurrent caller never sees a half-authenticated session.
    connecting: tokio::sync::Mutex<()>,
    slot: SharedSlot,
    next_id: AtomicU64,
    events: broadcast::Sender<ClientEvent>,
    /// Device names seen by the last `devices()` call.
    directory: Mutex<BTreeSet<String>>,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("name", &self.inner.name)
            .finish_non_exhaustive()
    }
}

impl Client {
    /// Create a client. Does NOT connect; the first query (or an explicit
    /// [`connect()`](Self::connect)) opens the session.
    pub fn new(config: ClientConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let name = config.display_name();
        Self {
            inner: Arc::new(ClientInner {
                config,
                name,
                session: tokio::sync::Mutex::new(None),
                connecting: tokio::sync::Mutex::new(()),
                slot: SharedSlot::default(),
                next_id: AtomicU64::new(0),
                events,
                directory: Mutex::new(BTreeSet::new()),
            }),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    /// Name requests are tagged with.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Subscribe to connection and request events.
    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.inner.events.subscribe()
    }

    /// Whether an authenticated session is currently open.
    pub async fn is_connected(&self) -> bool {
        self.inner
            .session
            .lock()
            .await
            .as_ref()
            .is_some_and(|s| s.is_open() && s.authenticated)
    }

    /// Whether a command is currently awaiting its terminator.
    pub fn is_busy(&self) -> bool {
        lock(&self.inner.slot).pending.is_some()
    }

    // ── Session lifecycle ────────────────────────────────────────

    /// Open the session and log in if credentials are configured.
    ///
    /// Returns immediately when already connected. A failure at any step
    /// leaves no socket behind.
    pub async fn connect(&self) -> Result<(), Error> {
        let _gate = self.inner.connecting.lock().await;

        {
            let mut session = self.inner.session.lock().await;
            if session
                .as_ref()
                .is_some_and(|s| s.is_open() && s.authenticated)
            {
                return Ok(());
            }
            if let Some(stale) = session.take() {
                debug!(name = %self.inner.name, "discarding closed session");
                stale.close().await;
            }
        }

        if let Err(e) = self.open().await {
            warn!(name = %self.inner.name, error = %e, "connect failed");
            self.report(&e);
            return Err(e);
        }

        if let Some(username) = self.inner.config.username.clone() {
            if let Err(source) = self.authenticate(&username).await {
                warn!(name = %self.inner.name, %username, error = %source, "login failed");
                self.disconnect().await;
                return Err(Error::Authentication {
                    username,
                    source: Box::new(source),
                });
            }
        }

        if let Some(session) = self.inner.session.lock().await.as_mut() {
            session.authenticated = true;
        }
        Ok(())
    }

    async fn open(&self) -> Result<(), Error> {
        let config = &self.inner.config;
        let (reader, writer) =
            transport::open(&config.hostname, config.port, config.timeout).await?;

        debug!(host = %config.hostname, port = config.port, "connected");
        self.emit(ClientEvent::Connected {
            host: config.hostname.clone(),
            port: config.port,
        });

        let alive = Arc::new(AtomicBool::new(true));
        let task = tokio::spawn(read_loop(
            reader,
            Arc::clone(&alive),
            Arc::clone(&self.inner.slot),
            self.inner.events.clone(),
            config.hostname.clone(),
            config.port,
        ));

        *self.inner.session.lock().await = Some(Session {
            writer,
            reader: ReaderTask(task),
            alive,
            authenticated: false,
        });
        Ok(())
    }

    async fn authenticate(&self, username: &str) -> Result<(), Error> {
        let command = format!("USERNAME {username}");
        self.exchange(&command, &command, "OK").await?;

        if let Some(password) = &self.inner.config.password {
            let wire = format!("PASSWORD {}", password.expose_secret());
            self.exchange(&wire, "PASSWORD ********", "OK").await?;
        }
        debug!(name = %self.inner.name, username, "logged in");
        Ok(())
    }

    /// Close the session, releasing any pending caller and forgetting
    /// enumerated devices. Safe to call when not connected.
    pub async fn disconnect(&self) {
        let session = self.inner.session.lock().await.take();
        self.forget_devices();
        fail_pending(&self.inner.slot);

        let Some(session) = session else {
            return;
        };
        let was_open = session.is_open();
        session.close().await;

        if was_open {
            debug!(name = %self.inner.name, "disconnected");
            self.emit(ClientEvent::Disconnected {
                host: self.inner.config.hostname.clone(),
                port: self.inner.config.port,
            });
        }
    }

    // ── Correlation ──────────────────────────────────────────────

    /// Send `command` and wait for a line starting with `expect`.
    ///
    /// An empty `expect` completes on the first non-empty line. Connects
    /// first if needed.
    pub async fn send(&self, command: &str, expect: &str) -> Result<Arc<Response>, Error> {
        self.connect().await?;
        self.exchange(command, command, expect).await
    }

    /// One wire exchange. `shown` is what gets recorded in the `Request`.
    pub(crate) async fn exchange(
        &self,
        wire: &str,
        shown: &str,
        expect: &str,
    ) -> Result<Arc<Response>, Error> {
        if wire.contains(['\n', '\r']) {
            return Err(Error::InvalidCommand(shown.to_owned()));
        }

        let (request, reply) = self.claim(shown, expect).await?;
        let guard = SlotGuard {
            slot: Arc::clone(&self.inner.slot),
            id: request.id,
        };

        debug!(
            name = %request.name,
            request_id = request.id,
            command = %request.command,
            "request"
        );
        self.emit(ClientEvent::Request(Arc::clone(&request)));

        if let Err(e) = self.write(&request, wire).await {
            self.report(&e);
            return Err(e);
        }

        let timeout = self.inner.config.timeout;
        let err = match tokio::time::timeout(timeout, reply).await {
            Ok(Ok(Outcome::Terminated(body))) => {
                let response = Arc::new(Response {
                    request: Arc::clone(&request),
                    body,
                });
                trace!(request_id = request.id, body = %response.body, "response");
                debug!(name = %request.name, request_id = request.id, "OK");
                self.emit(ClientEvent::Response(Arc::clone(&response)));
                return Ok(response);
            }
            Ok(Ok(Outcome::Refused(code))) => Error::Server { request, code },
            Ok(Ok(Outcome::Closed) | Err(_)) => Error::Closed {
                request: Some(request),
            },
            Err(_) => Error::Timeout { request, timeout },
        };

        self.report(&err);
        if matches!(err, Error::Timeout { .. }) {
            // The late reply would land in the next exchange.
            warn!(name = %self.inner.name, "response timed out, dropping session");
            drop(guard);
            self.disconnect().await;
        }
        Err(err)
    }

    /// Take the pending slot, backing off while another command holds it.
    async fn claim(
        &self,
        shown: &str,
        expect: &str,
    ) -> Result<(Arc<Request>, oneshot::Receiver<Outcome>), Error> {
        let policy = self.inner.config.busy;
        let mut retries = 0;
        loop {
            if let Some(claimed) = self.try_claim(shown, expect) {
                return Ok(claimed);
            }
            if retries >= policy.max_retries {
                let err = Error::Busy {
                    command: shown.to_owned(),
                    attempts: retries + 1,
                };
                warn!(name = %self.inner.name, command = shown, "connection busy, giving up");
                self.report(&err);
                return Err(err);
            }
            retries += 1;
            debug!(command = shown, retry = retries, "request in progress, retrying");
            tokio::time::sleep(policy.delay).await;
        }
    }

    fn try_claim(&self, shown: &str, expect: &str) -> Option<(Arc<Request>, oneshot::Receiver<Outcome>)> {
        let mut slot = lock(&self.inner.slot);
        if slot.pending.is_some() {
            return None;
        }

        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let request = Arc::new(Request {
            name: self.inner.name.clone(),
            id,
            command: shown.to_owned(),
        });
        let (reply, rx) = oneshot::channel();
        slot.pending = Some(Pending {
            request: Arc::clone(&request),
            expect: expect.to_owned(),
            body: String::new(),
            reply,
        });
        Some((request, rx))
    }

    async fn write(&self, request: &Arc<Request>, wire: &str) -> Result<(), Error> {
        let mut session = self.inner.session.lock().await;
        let Some(session) = session.as_mut() else {
            return Err(Error::Closed {
                request: Some(Arc::clone(request)),
            });
        };
        session
            .writer
            .send(wire)
            .await
            .map_err(|source| Error::Transport {
                request: Some(Arc::clone(request)),
                source,
            })
    }

    // ── Events ───────────────────────────────────────────────────

    fn emit(&self, event: ClientEvent) {
        // No subscribers is fine.
        let _ = self.inner.events.send(event);
    }

    fn report(&self, err: &Error) {
        self.emit(ClientEvent::Error {
            request: err.request().cloned(),
            message: err.to_string(),
        });
    }

    // ── Device directory bookkeeping ─────────────────────────────

    pub(crate) fn remember_devices<'a>(&self, names: impl IntoIterator<Item = &'a String>) {
        let mut directory = self
            .inner
            .directory
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        directory.clear();
        directory.extend(names.into_iter().cloned());
    }

    pub(crate) fn known_device_names(&self) -> Vec<String> {
        self.inner
            .directory
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    fn forget_devices(&self) {
        self.inner
            .directory
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

// ── Tests ────────────────────────────────────────────────────────────
