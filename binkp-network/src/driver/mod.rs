/*!
the drivers run a [`Session`](crate::Session) on a TCP connection

* [`blocking`]: a blocking socket, the frames are read on the calling
  thread while a writer thread flushes the queued frames and wakes the
  session up at the poll interval;
* [`mux`]: a single task reacting to the readiness of a non-blocking
  socket. Queued frames are always written before the next frame is read.

both produce the same exchange on the wire and return the
[`ConnectionEvent`](crate::ConnectionEvent) of the session once the
connection is closed.
*/

pub mod blocking;
pub mod mux;

use crate::{codec::FrameCodec, Outcome, Session};
use bytes::BytesMut;
use serde::{Deserialize, Serialize};
use std::{fmt, io, str::FromStr, time::Instant};
use thiserror::Error;
use tokio_util::codec::Decoder as _;

/// the driver to run the sessions with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Driver {
    Blocking,
    Mux,
}

#[derive(Debug, Error)]
#[error("Unknown driver {0:?}, expected `blocking' or `mux'")]
pub struct DriverError(String);

impl Default for Driver {
    fn default() -> Self {
        Self::Mux
    }
}

impl fmt::Display for Driver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Blocking => f.write_str("blocking"),
            Self::Mux => f.write_str("mux"),
        }
    }
}

impl FromStr for Driver {
    type Err = DriverError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "blocking" => Ok(Self::Blocking),
            "mux" => Ok(Self::Mux),
            _ => Err(DriverError(s.to_owned())),
        }
    }
}

/// writing failed: either the remote went away or a local failure
fn write_failed(session: &mut Session, error: io::Error) {
    match error.kind() {
        io::ErrorKind::BrokenPipe
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionAborted
        | io::ErrorKind::UnexpectedEof => session.connection_lost(),
        _ => session.abort(Outcome::Io(error.to_string())),
    }
}

/// the remote closed the connection
///
/// a frame left incomplete in the buffer is a protocol error
fn end_of_stream(session: &mut Session, codec: &mut FrameCodec, buffer: &mut BytesMut) {
    match codec.decode_eof(buffer) {
        Ok(Some(frame)) => {
            session.receive(frame, Instant::now());
            session.connection_lost();
        }
        Ok(None) => session.connection_lost(),
        Err(error) => session.abort(Outcome::Protocol(error.to_string())),
    }
}
