// Line transport over a single TCP stream.
//
// upsd speaks newline-terminated UTF-8 text. `LineCodec` turns the raw
// byte stream into lines (lossy decoding, `\r` stripped) and refuses to
// encode commands containing a newline so one call can never inject two
// commands onto the wire.

use std::io;
use std::time::Duration;

use bytes::{BufMut, BytesMut};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio_util::codec::{Decoder, Encoder, FramedRead, FramedWrite};
use tracing::debug;

use crate::error::Error;

/// Upper bound on a single line. upsd values are short; anything longer
/// means we are not talking to upsd.
pub const MAX_LINE_LENGTH: usize = 64 * 1024;

pub(crate) type LineReader = FramedRead<OwnedReadHalf, LineCodec>;
pub(crate) type LineWriter = FramedWrite<OwnedWriteHalf, LineCodec>;

// ── Codec ────────────────────────────────────────────────────────────

/// Newline-delimited text codec.
#[derive(Debug, Default, Clone)]
pub struct LineCodec {
    /// Index already scanned for `\n`, so partial reads are not rescanned.
    next_index: usize,
}

impl LineCodec {
    fn take_line(buf: &mut BytesMut, len: usize) -> String {
        let raw = buf.split_to(len);
        let mut line = raw.as_ref();
        if let Some(stripped) = line.strip_suffix(b"\n") {
            line = stripped;
        }
        if let Some(stripped) = line.strip_suffix(b"\r") {
            line = stripped;
        }
        String::from_utf8_lossy(line).into_owned()
    }
}

impl Decoder for LineCodec {
    type Item = String;
    type Error = io::Error;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<String>, io::Error> {
        let scan_from = self.next_index.min(buf.len());
        if let Some(offset) = buf[scan_from..].iter().position(|b| *b == b'\n') {
            self.next_index = 0;
            return Ok(Some(Self::take_line(buf, scan_from + offset + 1)));
        }

        if buf.len() > MAX_LINE_LENGTH {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("line exceeds {MAX_LINE_LENGTH} bytes"),
            ));
        }

        self.next_index = buf.len();
        Ok(None)
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<String>, io::Error> {
        if let Some(line) = self.decode(buf)? {
            return Ok(Some(line));
        }
        if buf.is_empty() {
            return Ok(None);
        }
        // Unterminated trailing text: hand it up as a final line.
        self.next_index = 0;
        let len = buf.len();
        Ok(Some(Self::take_line(buf, len)))
    }
}

impl Encoder<&str> for LineCodec {
    type Error = io::Error;

    fn encode(&mut self, line: &str, dst: &mut BytesMut) -> Result<(), io::Error> {
        if line.contains(['\n', '\r']) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "command contains a line break",
            ));
        }
        dst.reserve(line.len() + 1);
        dst.put_slice(line.as_bytes());
        dst.put_u8(b'\n');
        Ok(())
    }
}

// ── Connect ──────────────────────────────────────────────────────────

/// Open a TCP stream to `host:port` and split it into framed halves.
///
/// Both halves own their part of the socket; the descriptor is released
/// once both are dropped.
pub(crate) async fn open(
    host: &str,
    port: u16,
    timeout: Duration,
) -> Result<(LineReader, LineWriter), Error> {
    debug!(host, port, "opening upsd connection");

    let stream = tokio::time::timeout(timeout, TcpStream::connect((host, port)))
        .await
        .map_err(|_| Error::ConnectTimeout {
            host: host.to_owned(),
            port,
            timeout_secs: timeout.as_secs(),
        })?
        .map_err(|source| Error::Connect {
            host: host.to_owned(),
            port,
            source,
        })?;

    if let Err(e) = stream.set_nodelay(true) {
        debug!(error = %e, "could not disable Nagle");
    }

    let (read, write) = stream.into_split();
    Ok((
        FramedRead::new(read, LineCodec::default()),
        FramedWrite::new(write, LineCodec::default()),
    ))
}

// ── Tests ────────────────────────────────────────────────────────────
