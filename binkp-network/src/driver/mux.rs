/*!
the multiplexed driver

one task runs the session on a non-blocking socket. Every round:

1. the session looks for work ([`Session::poll`]) and all the queued
   frames are written to the connection;
2. only then, with nothing left to write, at most one frame is taken from
   the read buffer and fed to the session;
3. if there was nothing to write nor to read we wait for the socket to be
   readable, at most the poll interval.

while a write is pending the bytes the remote sends are still read into the
read buffer (up to [`READ_BUFFER_LIMIT`]) but they are not decoded before
the write completed.
*/

use crate::{
    codec::{FrameCodec, HEAD_LENGTH, MAX_PAYLOAD_LENGTH},
    ConnectionEvent, Flow, Outcome, Session,
};
use bytes::{Buf as _, BytesMut};
use std::{
    io,
    time::{Duration, Instant},
};
use tokio::{io::Interest, net::TcpStream, time::timeout};
use tokio_util::codec::{Decoder as _, Encoder as _};

/// bytes read ahead while we are writing
pub const READ_BUFFER_LIMIT: usize = 16 * (HEAD_LENGTH + MAX_PAYLOAD_LENGTH);

/// run the session on the `stream` until the connection is closed
#[tracing::instrument(
    skip(session, stream),
    fields(remote = %session.remote(), direction = %session.direction()),
    level = "debug",
)]
pub async fn run(mut session: Session, stream: TcpStream) -> ConnectionEvent {
    let interval = session.config().poll_interval;

    let mut codec = FrameCodec::new();
    let mut read_buffer = BytesMut::with_capacity(HEAD_LENGTH + MAX_PAYLOAD_LENGTH);
    let mut write_buffer = BytesMut::new();

    let mut flow = session.start(Instant::now());
    // the remote closed its side of the connection
    let mut eof = false;

    loop {
        let now = Instant::now();
        if flow == Flow::Continue {
            flow = session.poll(now);
        }

        while let Some(frame) = session.next_frame(now) {
            if let Err(error) = codec.encode(frame, &mut write_buffer) {
                session.abort(Outcome::Io(error.to_string()));
                flow = Flow::Close;
            }
        }

        let wrote = !write_buffer.is_empty();
        if let Err(error) = write_all(&stream, &mut write_buffer, &mut read_buffer, &mut eof).await {
            tracing::debug!(reason = %error, "cannot write to the connection");
            super::write_failed(&mut session, error);
            break;
        }

        if flow == Flow::Close {
            break;
        }

        match codec.decode(&mut read_buffer) {
            Ok(Some(frame)) => {
                flow = session.receive(frame, Instant::now());
                continue;
            }
            Ok(None) => (),
            Err(error) => {
                session.abort(Outcome::Protocol(error.to_string()));
                flow = Flow::Close;
                continue;
            }
        }

        if eof {
            // every complete frame was processed, nothing more is coming
            super::end_of_stream(&mut session, &mut codec, &mut read_buffer);
            break;
        }

        if wrote {
            // keep the transfer going, the next round may have more to send
            continue;
        }

        if let Err(error) = read_some(&stream, &mut read_buffer, &mut eof, interval).await {
            tracing::debug!(reason = %error, "cannot read from the connection");
            session.connection_lost();
            break;
        }
    }

    // the remaining bytes are dropped with the connection
    drop(stream);
    session.finish(Instant::now())
}

/// write the whole `write_buffer`, reading ahead while the socket is not
/// writable
async fn write_all(
    stream: &TcpStream,
    write_buffer: &mut BytesMut,
    read_buffer: &mut BytesMut,
    eof: &mut bool,
) -> io::Result<()> {
    while !write_buffer.is_empty() {
        let read_ahead = !*eof && read_buffer.len() < READ_BUFFER_LIMIT;
        let interest = if read_ahead {
            Interest::WRITABLE | Interest::READABLE
        } else {
            Interest::WRITABLE
        };
        let ready = stream.ready(interest).await?;

        if ready.is_writable() {
            match stream.try_write(write_buffer) {
                Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
                Ok(written) => write_buffer.advance(written),
                Err(error) if error.kind() == io::ErrorKind::WouldBlock => (),
                Err(error) => return Err(error),
            }
        }

        if read_ahead && ready.is_readable() {
            *eof = read_available(stream, read_buffer)?;
        }
    }

    Ok(())
}

/// wait up to `interval` for the remote to send us something
async fn read_some(
    stream: &TcpStream,
    read_buffer: &mut BytesMut,
    eof: &mut bool,
    interval: Duration,
) -> io::Result<()> {
    let ready = match timeout(interval, stream.ready(Interest::READABLE)).await {
        Ok(ready) => ready?,
        Err(_elapsed) => return Ok(()),
    };

    if ready.is_readable() {
        *eof = read_available(stream, read_buffer)?;
    }
    Ok(())
}

/// read what is available, returns `true` once the remote closed its side
fn read_available(stream: &TcpStream, read_buffer: &mut BytesMut) -> io::Result<bool> {
    read_buffer.reserve(HEAD_LENGTH + MAX_PAYLOAD_LENGTH);
    match stream.try_read_buf(read_buffer) {
        Ok(0) => Ok(true),
        Ok(_) => Ok(false),
        Err(error) if error.kind() == io::ErrorKind::WouldBlock => Ok(false),
        Err(error) => Err(error),
    }
}
