//! Scripted in-process upsd for tests.
//!
//! [`MockUpsd`] listens on `127.0.0.1:0` and answers each command line from
//! a table of canned replies keyed by the exact command text. Replies can be
//! delayed, withheld, or replaced by a hang-up, which is enough to drive the
//! client through busy, timeout and disconnect paths.
//!
//! Unscripted commands get `ERR UNKNOWN-COMMAND`, except `USERNAME` and
//! `PASSWORD` which get `ERR ACCESS-DENIED`.

use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::client::ClientConfig;
use crate::transport::LineCodec;

/// Canned answer to one command.
#[derive(Debug, Clone)]
enum Reply {
    Lines(Vec<String>),
    Delayed(Duration, Vec<String>),
    Silent,
    HangUp,
}

fn owned(lines: &[&str]) -> Vec<String> {
    lines.iter().map(|l| (*l).to_owned()).collect()
}

// ── Builder ──────────────────────────────────────────────────────────

/// Reply table for a [`MockUpsd`].
#[derive(Debug, Default, Clone)]
pub struct MockUpsdBuilder {
    replies: HashMap<String, Reply>,
}

impl MockUpsdBuilder {
    /// Answer `command` with `lines`.
    #[must_use]
    pub fn respond(mut self, command: &str, lines: &[&str]) -> Self {
        self.replies
            .insert(command.to_owned(), Reply::Lines(owned(lines)));
        self
    }

    /// Answer `command` with `lines` after `delay`.
    #[must_use]
    pub fn respond_after(mut self, command: &str, delay: Duration, lines: &[&str]) -> Self {
        self.replies
            .insert(command.to_owned(), Reply::Delayed(delay, owned(lines)));
        self
    }

    /// Never answer `command`.
    #[must_use]
    pub fn silent(mut self, command: &str) -> Self {
        self.replies.insert(command.to_owned(), Reply::Silent);
        self
    }

    /// Close the connection on receipt of `command`.
    #[must_use]
    pub fn hang_up(mut self, command: &str) -> Self {
        self.replies.insert(command.to_owned(), Reply::HangUp);
        self
    }

    /// Accept `USERNAME user` and `PASSWORD password`.
    #[must_use]
    pub fn credentials(self, user: &str, password: &str) -> Self {
        self.respond(&format!("USERNAME {user}"), &["OK"])
            .respond(&format!("PASSWORD {password}"), &["OK"])
    }

    /// Bind to an ephemeral loopback port and start serving.
    pub async fn start(self) -> io::Result<MockUpsd> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let shared = Arc::new(Shared {
            replies: Mutex::new(self.replies),
            received: Mutex::new(Vec::new()),
            connections: AtomicUsize::new(0),
            kick: Mutex::new(CancellationToken::new()),
        });
        let task = tokio::spawn(accept_loop(listener, Arc::clone(&shared)));
        debug!(%addr, "mock upsd listening");
        Ok(MockUpsd { addr, shared, task })
    }
}

// ── Server ───────────────────────────────────────────────────────────

struct Shared {
    replies: Mutex<HashMap<String, Reply>>,
    received: Mutex<Vec<String>>,
    connections: AtomicUsize,
    /// Cancelled to drop every open connection; replaced afterwards so new
    /// connections are unaffected.
    kick: Mutex<CancellationToken>,
}

impl Shared {
    fn reply_for(&self, command: &str) -> Reply {
        let replies = self.replies.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(reply) = replies.get(command) {
            return reply.clone();
        }
        let code = if command.starts_with("USERNAME ") || command.starts_with("PASSWORD ") {
            "ERR ACCESS-DENIED"
        } else {
            "ERR UNKNOWN-COMMAND"
        };
        Reply::Lines(vec![code.to_owned()])
    }

    fn kick_token(&self) -> CancellationToken {
        self.kick
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// A running scripted server. Stops when dropped.
pub struct MockUpsd {
    addr: SocketAddr,
    shared: Arc<Shared>,
    task: JoinHandle<()>,
}

impl MockUpsd {
    pub fn builder() -> MockUpsdBuilder {
        MockUpsdBuilder::default()
    }

    /// A server with one device, `ups`, and a full set of replies for it.
    pub fn standard() -> MockUpsdBuilder {
        standard_replies(MockUpsdBuilder::default())
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn host(&self) -> String {
        self.addr.ip().to_string()
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Client settings pointing at this server.
    pub fn client_config(&self) -> ClientConfig {
        ClientConfig::new(self.host(), self.port())
    }

    /// Every command line received so far, across all connections.
    pub fn received(&self) -> Vec<String> {
        self.shared
            .received
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Connections accepted so far.
    pub fn connections(&self) -> usize {
        self.shared.connections.load(Ordering::SeqCst)
    }

    /// Replace the reply for `command` on the running server.
    pub fn set_reply(&self, command: &str, lines: &[&str]) {
        self.shared
            .replies
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(command.to_owned(), Reply::Lines(owned(lines)));
    }

    /// Close every open connection. The listener keeps accepting.
    pub fn drop_connections(&self) {
        let mut kick = self
            .shared
            .kick
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        kick.cancel();
        *kick = CancellationToken::new();
    }
}

impl Drop for MockUpsd {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn accept_loop(listener: TcpListener, shared: Arc<Shared>) {
    let mut connections = JoinSet::new();
    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    debug!(%peer, "mock upsd accepted connection");
                    shared.connections.fetch_add(1, Ordering::SeqCst);
                    let kick = shared.kick_token();
                    connections.spawn(serve(stream, Arc::clone(&shared), kick));
                }
                Err(e) => {
                    debug!(error = %e, "mock upsd accept failed");
                    break;
                }
            },
            Some(_) = connections.join_next(), if !connections.is_empty() => {}
        }
    }
}

async fn serve(stream: TcpStream, shared: Arc<Shared>, kick: CancellationToken) {
    let (read, write) = stream.into_split();
    let mut lines = FramedRead::new(read, LineCodec::default());
    let writer = Arc::new(tokio::sync::Mutex::new(FramedWrite::new(
        write,
        LineCodec::default(),
    )));
    let mut delayed = JoinSet::new();

    loop {
        let line = tokio::select! {
            () = kick.cancelled() => break,
            line = lines.next() => match line {
                Some(Ok(line)) => line,
                _ => break,
            },
        };

        shared
            .received
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(line.clone());

        match shared.reply_for(&line) {
            Reply::Lines(reply) => write_lines(&writer, &reply).await,
            Reply::Delayed(delay, reply) => {
                let writer = Arc::clone(&writer);
                delayed.spawn(async move {
                    tokio::time::sleep(delay).await;
                    write_lines(&writer, &reply).await;
                });
            }
            Reply::Silent => {}
            Reply::HangUp => break,
        }
    }
}

type SharedWriter = tokio::sync::Mutex<FramedWrite<tokio::net::tcp::OwnedWriteHalf, LineCodec>>;

async fn write_lines(writer: &SharedWriter, lines: &[String]) {
    let mut writer = writer.lock().await;
    for line in lines {
        if writer.send(line.as_str()).await.is_err() {
            return;
        }
    }
}

// ── Standard device ──────────────────────────────────────────────────

/// Variables of the `ups` device in [`MockUpsd::standard`].
pub const STANDARD_VARS: &[(&str, &str)] = &[
    ("battery.charge", "87"),
    ("battery.charge.low", "20"),
    ("battery.runtime", "1800"),
    ("battery.voltage", "13.5"),
    ("device.mfr", "EATON"),
    ("device.model", "5E 650i"),
    ("device.serial", "g123x45678"),
    ("device.type", "ups"),
    ("input.voltage", "230.0"),
    ("output.voltage", "229.0"),
    ("ups.beeper.status", "enabled"),
    ("ups.firmware", "02.08.0010"),
    ("ups.load", "23"),
    ("ups.realpower.nominal", "360"),
    ("ups.status", "OL CHRG"),
];

/// Instant commands of the `ups` device in [`MockUpsd::standard`].
pub const STANDARD_COMMANDS: &[&str] = &["beeper.disable", "beeper.enable", "test.battery.start"];

fn standard_replies(builder: MockUpsdBuilder) -> MockUpsdBuilder {
    let mut builder = builder
        .respond("VER", &["Network UPS Tools upsd 2.8.1 - https://www.networkupstools.org/"])
        .respond("NETVER", &["1.3"])
        .respond(
            "LIST UPS",
            &["BEGIN LIST UPS", "UPS ups \"Eaton 5E\"", "END LIST UPS"],
        )
        .respond("GET UPSDESC ups", &["UPSDESC ups \"Eaton 5E\""])
        .respond("GET NUMLOGINS ups", &["NUMLOGINS ups 1"])
        .respond(
            "LIST CLIENT ups",
            &["BEGIN LIST CLIENT ups", "CLIENT ups 127.0.0.1", "END LIST CLIENT ups"],
        )
        .respond(
            "LIST RW ups",
            &[
                "BEGIN LIST RW ups",
                "RW ups battery.charge.low \"20\"",
                "END LIST RW ups",
            ],
        )
        .respond("SET VAR ups battery.charge.low \"30\"", &["OK"]);

    let mut var_list = vec!["BEGIN LIST VAR ups".to_owned()];
    for (key, value) in STANDARD_VARS {
        let line = format!("VAR ups {key} \"{value}\"");
        builder = builder
            .respond(&format!("GET VAR ups {key}"), &[line.as_str()])
            .respond(
                &format!("GET DESC ups {key}"),
                &[format!("DESC ups {key} \"Description unavailable\"").as_str()],
            )
            .respond(
                &format!("GET TYPE ups {key}"),
                &[format!("TYPE ups {key} NUMBER").as_str()],
            );
        var_list.push(line);
    }
    var_list.push("END LIST VAR ups".to_owned());
    let var_list: Vec<&str> = var_list.iter().map(String::as_str).collect();
    builder = builder.respond("LIST VAR ups", &var_list);

    let mut cmd_list = vec!["BEGIN LIST CMD ups".to_owned()];
    for cmd in STANDARD_COMMANDS {
        builder = builder
            .respond(&format!("INSTCMD ups {cmd}"), &["OK"])
            .respond(
                &format!("GET CMDDESC ups {cmd}"),
                &[format!("CMDDESC ups {cmd} \"Run {cmd}\"").as_str()],
            );
        cmd_list.push(format!("CMD ups {cmd}"));
    }
    cmd_list.push("END LIST CMD ups".to_owned());
    let cmd_list: Vec<&str> = cmd_list.iter().map(String::as_str).collect();
    builder.respond("LIST CMD ups", &cmd_list)
}
