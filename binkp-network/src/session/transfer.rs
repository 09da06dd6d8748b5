use super::{Phase, Session};
use crate::{
    codec::{Command, Frame},
    disk,
    item::{Content, Pending, Received},
    registry::{Registry, Reservation},
};
use binkp_lib::ItemInfo;
use bytes::Bytes;
use rand_core::{OsRng, RngCore as _};
use std::{
    convert::TryFrom as _,
    fs::{self, File, OpenOptions},
    io::{self, Read, Write as _},
    path::{Path, PathBuf},
    sync::Arc,
};

/// an item of the current batch
pub(super) struct Outgoing {
    item: Box<dyn Pending>,
    info: ItemInfo,
    state: State,
}

enum State {
    /// not announced yet
    Queued,
    /// announced, the content is being sent
    Sending(Box<dyn Read + Send>),
    /// fully sent, waiting for the `M_GOT` (or `M_SKIP`)
    Sent,
}

/// the item being received
pub(super) struct Incoming {
    info: ItemInfo,
    remaining: u64,
    sink: Sink,
}

enum Sink {
    File(TempFile),
    Memory(Vec<u8>),
}

/// a file of the temporary directory, removed when dropped
struct TempFile {
    path: PathBuf,
    file: Option<File>,
    _reservation: Reservation,
}

impl Outgoing {
    fn is_queued(&self) -> bool {
        matches!(self.state, State::Queued)
    }

    fn is_sending(&self) -> bool {
        matches!(self.state, State::Sending(_))
    }
}

impl Session {
    /// send the next chunk of data, start the next item or end the batch
    pub(super) fn check_for_work(&mut self) {
        if self.phase != Phase::Transfer || self.local_eob {
            return;
        }

        if let Some(index) = self.outgoing.iter().position(Outgoing::is_sending) {
            return self.send_chunk(index);
        }

        if self.outgoing.iter().any(Outgoing::is_queued) {
            return self.start_next();
        }

        if !self.outgoing.is_empty() {
            // waiting for the acknowledgements
            return;
        }

        self.fetch();
        if self.outgoing.is_empty() {
            tracing::debug!(phase = %self.phase, "nothing more to send, end of batch");
            self.push(Frame::bare(Command::Eob));
            self.local_eob = true;
            self.check_eob();
        } else {
            self.start_next();
        }
    }

    fn fetch(&mut self) {
        let outbound = Arc::clone(&self.context.outbound);

        for address in self.addresses.clone() {
            let items = match outbound.pending(&address) {
                Ok(items) => items,
                Err(error) => {
                    tracing::warn!(%address, reason = ?error, "cannot list the items to send");
                    continue;
                }
            };

            for item in items {
                let info = item.info().clone();
                if self.skipped.contains(&info) || self.outgoing.iter().any(|o| o.info == info) {
                    continue;
                }

                self.outgoing.push(Outgoing {
                    item,
                    info,
                    state: State::Queued,
                });
            }
        }

        if !self.outgoing.is_empty() {
            tracing::debug!(items = self.outgoing.len(), "new batch of items to send");
        }
    }

    fn start_next(&mut self) {
        while let Some(index) = self.outgoing.iter().position(Outgoing::is_queued) {
            if self.start_sending(index, 0) {
                return;
            }
        }
    }

    /// announce the item and queue its first chunk right after the
    /// `M_FILE`
    ///
    /// returns `false` if the item could not be opened, it is then
    /// removed from the batch.
    fn start_sending(&mut self, index: usize, offset: u64) -> bool {
        let outgoing = &mut self.outgoing[index];

        match outgoing.item.open(offset) {
            Ok(reader) => {
                outgoing.state = State::Sending(reader);
                let announcement = outgoing.info.with_offset(offset);
                tracing::info!(
                    item = %outgoing.info.name(),
                    length = outgoing.info.length(),
                    offset,
                    "sending item"
                );

                self.push(Frame::command(Command::File, announcement));
                self.send_chunk(index);
                true
            }
            Err(error) => {
                let outgoing = self.outgoing.remove(index);
                tracing::warn!(
                    item = %outgoing.info.name(),
                    %error,
                    "cannot open the item, skipping it for this session"
                );
                self.skipped.insert(outgoing.info);
                false
            }
        }
    }

    fn send_chunk(&mut self, index: usize) {
        let frame_size = self.context.config.frame_size();
        let outgoing = &mut self.outgoing[index];
        let reader = match &mut outgoing.state {
            State::Sending(reader) => reader,
            _ => return,
        };

        // reuses the allocation once the previous chunk was written
        let buffer = &mut self.chunk;
        buffer.clear();
        buffer.resize(frame_size, 0);
        match read_chunk(reader, &mut buffer[..]) {
            Ok(0) => {
                outgoing.state = State::Sent;
                tracing::debug!(item = %outgoing.info.name(), "item sent, waiting for acknowledgement");
                self.start_next();
            }
            Ok(read) => {
                buffer.truncate(read);
                let chunk = buffer.split().freeze();
                self.batch_bytes += read as u64;
                self.totals.bytes_sent += read as u64;
                self.push(Frame::Data(chunk));
            }
            Err(error) => {
                let text = format!("Cannot read {}: {}", outgoing.info.name(), error);
                self.local_error(text);
            }
        }
    }

    fn take_outgoing(&mut self, info: &ItemInfo) -> Option<Outgoing> {
        let index = self.outgoing.iter().position(|o| &o.info == info)?;
        Some(self.outgoing.remove(index))
    }

    pub(super) fn m_got(&mut self, argument: &str) {
        let info = match ItemInfo::parse(argument) {
            Ok(info) => info,
            Err(error) => return self.protocol_error(format!("Invalid M_GOT: {}", error)),
        };

        match self.take_outgoing(&info) {
            Some(outgoing) => {
                self.totals.files_sent += 1;
                tracing::info!(item = %info.name(), length = info.length(), "item sent");
                if let Err(error) = outgoing.item.acknowledge() {
                    tracing::warn!(item = %info.name(), reason = ?error, "cannot release the sent item");
                }
            }
            None => tracing::debug!(%info, "M_GOT for an item we did not send"),
        }
    }

    pub(super) fn m_skip(&mut self, argument: &str) {
        let info = match ItemInfo::parse(argument) {
            Ok(info) => info,
            Err(error) => return self.protocol_error(format!("Invalid M_SKIP: {}", error)),
        };

        match self.take_outgoing(&info) {
            Some(outgoing) => {
                tracing::info!(item = %info.name(), length = info.length(), "item skipped by the remote");
                self.skipped.insert(outgoing.info);
            }
            None => tracing::debug!(%info, "M_SKIP for an item we did not send"),
        }
    }

    pub(super) fn m_get(&mut self, argument: &str) {
        let (info, offset) = match ItemInfo::parse_with_offset(argument) {
            Ok(parsed) => parsed,
            Err(error) => return self.protocol_error(format!("Invalid M_GET: {}", error)),
        };

        let index = match self.outgoing.iter().position(|o| o.info == info) {
            Some(index) => index,
            None => {
                tracing::debug!(%info, "M_GET for an item we do not have");
                return;
            }
        };

        if offset > info.length() {
            return self.protocol_error(format!("Invalid offset {} for {}", offset, info.name()));
        }

        // one item in flight at a time, the interrupted one is announced
        // again later
        if let Some(current) = self.outgoing.iter().position(Outgoing::is_sending) {
            if current != index {
                self.outgoing[current].state = State::Queued;
            }
        }

        tracing::debug!(item = %info.name(), offset, "remote requested the item from offset");
        self.start_sending(index, offset);
    }

    pub(super) fn m_file(&mut self, argument: &str) {
        let (info, offset) = match ItemInfo::parse_with_offset(argument) {
            Ok(parsed) => parsed,
            Err(error) => return self.protocol_error(format!("Invalid M_FILE: {}", error)),
        };

        if let Some(previous) = self.incoming.take() {
            tracing::warn!(
                item = %previous.info.name(),
                remaining = previous.remaining,
                "new item announced before the end of the previous one, discarding it"
            );
        }

        let free_space = match self.context.inbound.free_space() {
            Ok(free_space) => free_space,
            Err(error) => {
                tracing::warn!(%error, "cannot check the free space of the inbound");
                0
            }
        };
        if info.length() > free_space {
            tracing::warn!(
                item = %info.name(),
                length = info.length(),
                free_space,
                "not enough free space in the inbound, skipping"
            );
            return self.push(Frame::command(Command::Skip, info.to_string()));
        }

        if offset != 0 {
            tracing::debug!(item = %info.name(), offset, "requesting the item from the start");
            return self.push(Frame::command(Command::Get, info.with_offset(0)));
        }

        let sink = match self.open_sink(&info) {
            Some(sink) => sink,
            None => {
                tracing::warn!(
                    item = %info.name(),
                    length = info.length(),
                    "cannot store the item, skipping"
                );
                return self.push(Frame::command(Command::Skip, info.to_string()));
            }
        };

        tracing::info!(item = %info.name(), length = info.length(), "receiving item");
        let incoming = Incoming {
            remaining: info.length(),
            info,
            sink,
        };

        if incoming.remaining == 0 {
            self.complete(incoming);
        } else {
            self.incoming = Some(incoming);
        }
    }

    /// a temporary file if the temporary directory has room for the item,
    /// otherwise a memory buffer if the item is small enough
    fn open_sink(&self, info: &ItemInfo) -> Option<Sink> {
        let config = &self.context.config;

        match TempFile::create(&config.temp_directory, &self.context.registry, info.length()) {
            Ok(file) => return Some(Sink::File(file)),
            Err(error) => {
                tracing::debug!(item = %info.name(), %error, "cannot receive in a temporary file")
            }
        }

        if info.length() < config.max_memory_size {
            let capacity = usize::try_from(info.length()).unwrap_or_default();
            Some(Sink::Memory(Vec::with_capacity(capacity)))
        } else {
            None
        }
    }

    pub(super) fn data(&mut self, bytes: Bytes) {
        let mut incoming = match self.incoming.take() {
            Some(incoming) => incoming,
            None => {
                tracing::debug!(
                    phase = %self.phase,
                    length = bytes.len(),
                    "ignoring data frame outside of an item"
                );
                return;
            }
        };

        // the last frame may be longer than what is left to receive
        let length = bytes.len().min(usize::try_from(incoming.remaining).unwrap_or(usize::MAX));

        if let Err(error) = incoming.sink.write(&bytes[..length]) {
            tracing::warn!(item = %incoming.info.name(), %error, "cannot write the item, skipping");
            return self.push(Frame::command(Command::Skip, incoming.info.to_string()));
        }

        incoming.remaining -= length as u64;
        self.batch_bytes += length as u64;
        self.totals.bytes_received += length as u64;

        if incoming.remaining == 0 {
            self.complete(incoming);
        } else {
            self.incoming = Some(incoming);
        }
    }

    /// hand the received item to the forwarder and acknowledge it
    fn complete(&mut self, incoming: Incoming) {
        let Incoming { info, sink, .. } = incoming;

        let (content, temp_file) = match sink.close() {
            Ok(closed) => closed,
            Err(error) => {
                tracing::warn!(item = %info.name(), %error, "cannot close the item, skipping");
                return self.push(Frame::command(Command::Skip, info.to_string()));
            }
        };

        let received = Received {
            info: info.clone(),
            from: self.addresses.clone(),
            secure: self.is_secure(),
            content,
        };
        let forwarded = self.context.inbound.forward(received);
        std::mem::drop(temp_file);

        match forwarded {
            Ok(()) => {
                self.totals.files_received += 1;
                tracing::info!(item = %info.name(), length = info.length(), "item received");
                self.push(Frame::command(Command::Got, info.to_string()));
            }
            Err(error) => {
                tracing::warn!(item = %info.name(), reason = ?error, "item refused, skipping");
                self.push(Frame::command(Command::Skip, info.to_string()));
            }
        }
    }
}

fn read_chunk<R: Read + ?Sized>(reader: &mut R, buffer: &mut [u8]) -> io::Result<usize> {
    loop {
        match reader.read(buffer) {
            Err(error) if error.kind() == io::ErrorKind::Interrupted => continue,
            result => return result,
        }
    }
}

impl Sink {
    fn write(&mut self, bytes: &[u8]) -> io::Result<()> {
        match self {
            Self::File(file) => file.write(bytes),
            Self::Memory(buffer) => {
                buffer.extend_from_slice(bytes);
                Ok(())
            }
        }
    }

    /// the content to forward, and the temporary file to remove once it
    /// has been forwarded
    fn close(self) -> io::Result<(Content, Option<TempFile>)> {
        match self {
            Self::File(mut file) => {
                file.close()?;
                Ok((Content::File(file.path.clone()), Some(file)))
            }
            Self::Memory(buffer) => Ok((Content::Memory(buffer), None)),
        }
    }
}

impl TempFile {
    const ATTEMPTS: usize = 8;

    fn create(directory: &Path, registry: &Registry, length: u64) -> io::Result<Self> {
        let available = disk::free_space(directory)?;
        let reservation = registry.reserve(length, available).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::Other,
                "not enough free space in the temporary directory",
            )
        })?;

        let mut attempt = 0;
        loop {
            let path = directory.join(format!("binkp-{:016x}.tmp", OsRng.next_u64()));
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(file) => {
                    return Ok(Self {
                        path,
                        file: Some(file),
                        _reservation: reservation,
                    })
                }
                Err(error)
                    if error.kind() == io::ErrorKind::AlreadyExists && attempt < Self::ATTEMPTS =>
                {
                    attempt += 1;
                }
                Err(error) => return Err(error),
            }
        }
    }

    fn write(&mut self, bytes: &[u8]) -> io::Result<()> {
        match self.file.as_mut() {
            Some(file) => file.write_all(bytes),
            None => Err(io::Error::new(io::ErrorKind::Other, "temporary file closed")),
        }
    }

    fn close(&mut self) -> io::Result<()> {
        match self.file.take() {
            Some(file) => file.sync_all(),
            None => Ok(()),
        }
    }
}

impl Drop for TempFile {
    fn drop(&mut self) {
        self.file = None;
        if let Err(error) = fs::remove_file(&self.path) {
            if error.kind() != io::ErrorKind::NotFound {
                tracing::warn!(path = %self.path.display(), %error, "cannot remove temporary file");
            }
        }
    }
}
