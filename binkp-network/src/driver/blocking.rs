/*!
the blocking driver

the frames are read on the calling thread and fed to the session as soon as
they are complete. A writer thread writes the frames the session queued, in
order, and wakes the session up (timeouts, new items to send) when it has
been idle for the poll interval.

both threads share the session behind a mutex, the condition variable
wakes the writer up as soon as the reader queued new frames.
*/

use crate::{
    codec::{FrameCodec, HEAD_LENGTH, MAX_PAYLOAD_LENGTH},
    ConnectionEvent, Flow, Outcome, Session,
};
use anyhow::{anyhow, Context as _, Result};
use bytes::BytesMut;
use std::{
    io::{self, Read as _, Write as _},
    net::{Shutdown, TcpStream},
    sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError},
    thread,
    time::{Duration, Instant},
};
use tokio_util::codec::{Decoder as _, Encoder as _};

struct Shared {
    state: Mutex<State>,
    wake: Condvar,
}

struct State {
    session: Option<Session>,
    /// set by either side once the connection is to be closed
    closed: bool,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn close(&self) {
        self.lock().closed = true;
        self.wake.notify_all();
    }
}

impl State {
    fn session(&mut self) -> Result<&mut Session> {
        self.session
            .as_mut()
            .ok_or_else(|| anyhow!("the session is gone"))
    }
}

/// run the session on the blocking `stream` until the connection is closed
///
/// blocks the calling thread for the whole session.
#[tracing::instrument(
    skip(session, stream),
    fields(remote = %session.remote(), direction = %session.direction()),
    level = "debug",
)]
pub fn run(mut session: Session, stream: TcpStream) -> Result<ConnectionEvent> {
    let interval = session.config().poll_interval;

    let writer = stream
        .set_nonblocking(false)
        .and_then(|()| stream.try_clone())
        .context("Cannot prepare the connection");
    let writer = match writer {
        Ok(writer) => writer,
        Err(error) => {
            session.abort(Outcome::Io(format!("{:#}", error)));
            return Ok(session.finish(Instant::now()));
        }
    };

    let flow = session.start(Instant::now());
    let shared = Arc::new(Shared {
        state: Mutex::new(State {
            session: Some(session),
            closed: false,
        }),
        wake: Condvar::new(),
    });

    let writer_thread = {
        let shared = Arc::clone(&shared);
        thread::Builder::new()
            .name("binkp-writer".to_owned())
            .spawn(move || write_loop(&shared, writer, interval))
    };

    match writer_thread {
        Ok(writer_thread) => {
            if flow == Flow::Continue {
                read_loop(&shared, &stream);
            }
            shared.close();

            if writer_thread.join().is_err() {
                tracing::error!("the writer thread panicked");
            }
        }
        Err(error) => {
            if let Some(session) = shared.lock().session.as_mut() {
                session.abort(Outcome::Io(format!("Cannot start the writer: {}", error)));
            }
        }
    }

    if let Err(error) = stream.shutdown(Shutdown::Both) {
        tracing::trace!(reason = %error, "connection already closed");
    }

    let session = shared
        .lock()
        .session
        .take()
        .ok_or_else(|| anyhow!("the session is gone"))?;
    Ok(session.finish(Instant::now()))
}

fn read_loop(shared: &Shared, mut stream: &TcpStream) {
    let mut codec = FrameCodec::new();
    let mut buffer = BytesMut::with_capacity(HEAD_LENGTH + MAX_PAYLOAD_LENGTH);
    let mut chunk = vec![0; HEAD_LENGTH + MAX_PAYLOAD_LENGTH];

    loop {
        let read = stream.read(&mut chunk);

        let mut state = shared.lock();
        if state.closed {
            return;
        }
        let session = match state.session() {
            Ok(session) => session,
            Err(error) => {
                tracing::error!(reason = %error, "stop reading");
                return;
            }
        };

        match read {
            Ok(0) => {
                super::end_of_stream(session, &mut codec, &mut buffer);
                break;
            }
            Ok(read) => buffer.extend_from_slice(&chunk[..read]),
            Err(error) if error.kind() == io::ErrorKind::Interrupted => continue,
            Err(error) => {
                tracing::debug!(reason = %error, "cannot read from the connection");
                session.connection_lost();
                break;
            }
        }

        let mut flow = Flow::Continue;
        while flow == Flow::Continue {
            match codec.decode(&mut buffer) {
                Ok(Some(frame)) => flow = session.receive(frame, Instant::now()),
                Ok(None) => break,
                Err(error) => {
                    session.abort(Outcome::Protocol(error.to_string()));
                    flow = Flow::Close;
                }
            }
        }

        shared.wake.notify_all();
        if flow == Flow::Close {
            break;
        }
    }
}

fn write_loop(shared: &Shared, mut stream: TcpStream, interval: Duration) {
    let mut codec = FrameCodec::new();
    let mut bytes = BytesMut::new();

    let mut state = shared.lock();
    loop {
        let closed = state.closed;
        let session = match state.session() {
            Ok(session) => session,
            Err(error) => {
                tracing::error!(reason = %error, "stop writing");
                break;
            }
        };

        let now = Instant::now();
        let flow = if closed {
            Flow::Close
        } else {
            session.poll(now)
        };

        while let Some(frame) = session.next_frame(now) {
            if let Err(error) = codec.encode(frame, &mut bytes) {
                session.abort(Outcome::Io(error.to_string()));
                break;
            }
        }

        if bytes.is_empty() {
            if flow == Flow::Close || session.flow() == Flow::Close {
                break;
            }

            state = shared
                .wake
                .wait_timeout(state, interval)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
            continue;
        }

        // write without holding the session so the reader keeps going
        drop(state);
        let written = stream.write_all(&bytes).and_then(|()| stream.flush());
        bytes.clear();
        state = shared.lock();

        if let Err(error) = written {
            tracing::debug!(reason = %error, "cannot write to the connection");
            if let Some(session) = state.session.as_mut() {
                super::write_failed(session, error);
            }
            break;
        }
    }

    state.closed = true;
    drop(state);

    // unblock the reader
    if let Err(error) = stream.shutdown(Shutdown::Both) {
        tracing::trace!(reason = %error, "connection already closed");
    }
}
