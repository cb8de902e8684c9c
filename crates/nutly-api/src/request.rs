// Request / response records and the client event stream.
//
// Every command written to upsd gets an immutable `Request` tagged with the
// connection name and a per-connection monotonic id. Responses and errors
// keep an `Arc` back to the request that produced them so callers and
// listeners can log which in-flight command completed or failed.

use std::fmt;
use std::sync::Arc;

/// An outbound command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    /// Name of the owning connection (defaults to `host:port`).
    pub name: String,
    /// Per-connection id, strictly increasing, starting at 1.
    pub id: u64,
    /// Command text as logged. Secrets (`PASSWORD`) are masked here;
    /// the wire line is never stored.
    pub command: String,
}

impl fmt::Display for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: request {}: {}", self.name, self.id, self.command)
    }
}

/// A completed exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub request: Arc<Request>,
    /// Every line received for the request, newline-joined, up to and
    /// including the terminating line.
    pub body: String,
}

/// Lifecycle and traffic notifications, fanned out over a broadcast channel.
///
/// `Request` is sent before the command is written. Each request is then
/// resolved by exactly one `Response` or `Error`.
#[derive(Debug, Clone)]
pub enum ClientEvent {
    Connected {
        host: String,
        port: u16,
    },
    Disconnected {
        host: String,
        port: u16,
    },
    Request(Arc<Request>),
    Response(Arc<Response>),
    Error {
        request: Option<Arc<Request>>,
        message: String,
    },
}
