/*!
# BinkP session

the [`Session`] is the state machine of one connection. It does not do any
I/O: the drivers (see [`crate::driver`]) feed it the frames they read with
[`Session::receive`], wake it up regularly with [`Session::poll`] and write
the frames it queued, in order, as returned by [`Session::next_frame`].

```text
GREET -> ADDR -> AUTH -> TRANSFER -> END
   \        \       \         \
    +--------+-------+---------+---> ERROR
```

every step returns a [`Flow`]: once it is [`Flow::Close`] the driver writes
the frames still queued (the `M_ERR` or `M_BSY` explaining why we close,
the last `M_GOT`...), closes the connection and tears down the session with
[`Session::finish`].
*/

mod transfer;

use self::transfer::{Incoming, Outgoing};
use crate::{
    auth::Challenge,
    codec::{Command, Frame},
    config::Config,
    event::{ConnectionEvent, Events},
    item::{Inbound, Outbound},
    peer::{Link, Nodes},
    registry::{Active, Permit, Registry},
    version::Version,
    SOFTWARE,
};
use binkp_lib::{FtnAddress, ItemInfo};
use bytes::BytesMut;
use rand_core::OsRng;
use std::{
    collections::{HashSet, VecDeque},
    fmt::{self, Formatter},
    net::SocketAddr,
    sync::Arc,
    time::Instant,
};

/// everything a session needs from the outside world
///
/// cloned (cheaply) for every session
#[derive(Clone)]
pub struct Context {
    pub config: Arc<Config>,
    pub registry: Registry,
    pub nodes: Arc<dyn Nodes>,
    pub outbound: Arc<dyn Outbound>,
    pub inbound: Arc<dyn Inbound>,
    pub events: Arc<dyn Events>,
}

/// who initiated the connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// we called the remote
    Outbound,
    /// the remote called us
    Inbound,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Phase {
    Greet,
    Addr,
    Auth,
    Transfer,
    End,
    Error,
}

/// what the driver should do after a step of the session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    /// flush the queued frames and close the connection
    Close,
}

/// how a session ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// both sides are done with their batches
    Completed,
    /// we refused the session: too many connections or already in
    /// session with one of the remote's addresses
    LocalBusy(String),
    RemoteBusy(String),
    RemoteError(String),
    /// the remote broke the protocol (or failed the authentication)
    Protocol(String),
    Timeout,
    ConnectionLost,
    /// local I/O failure
    Io(String),
}

/// the number of files and bytes exchanged in a session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Totals {
    pub files_sent: u64,
    pub files_received: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
}

pub struct Session {
    context: Context,
    direction: Direction,
    remote: SocketAddr,

    phase: Phase,
    outcome: Option<Outcome>,
    version: Option<Version>,
    challenge: Option<Challenge>,

    our_addresses: Vec<FtnAddress>,
    addresses: Vec<FtnAddress>,
    link: Option<Link>,

    permit: Option<Permit>,
    active: Vec<Active>,

    outgoing: Vec<Outgoing>,
    skipped: HashSet<ItemInfo>,
    incoming: Option<Incoming>,
    /// the buffer the data frames are read into
    chunk: BytesMut,

    local_eob: bool,
    remote_eob: bool,
    /// bytes sent and received since the beginning of the batch
    batch_bytes: u64,
    totals: Totals,

    started: Instant,
    last_activity: Instant,
    timeout_warned: bool,

    frames: VecDeque<Frame>,
}

impl Session {
    /// a session we initiated
    pub fn originate(context: Context, remote: SocketAddr, now: Instant) -> Self {
        Self::new(context, Direction::Outbound, remote, None, now)
    }

    /// a session the remote initiated, we will offer CRAM authentication
    pub fn answer(context: Context, remote: SocketAddr, now: Instant) -> Self {
        let challenge = Challenge::generate(&mut OsRng);
        Self::new(context, Direction::Inbound, remote, Some(challenge), now)
    }

    fn new(
        context: Context,
        direction: Direction,
        remote: SocketAddr,
        challenge: Option<Challenge>,
        now: Instant,
    ) -> Self {
        let our_addresses = context.config.station.addresses.clone();

        Self {
            context,
            direction,
            remote,
            phase: Phase::Greet,
            outcome: None,
            version: None,
            challenge,
            our_addresses,
            addresses: Vec::new(),
            link: None,
            permit: None,
            active: Vec::new(),
            outgoing: Vec::new(),
            skipped: HashSet::new(),
            incoming: None,
            chunk: BytesMut::new(),
            local_eob: false,
            remote_eob: false,
            batch_bytes: 0,
            totals: Totals::default(),
            started: now,
            last_activity: now,
            timeout_warned: false,
            frames: VecDeque::new(),
        }
    }

    pub fn config(&self) -> &Config {
        &self.context.config
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn remote(&self) -> SocketAddr {
        self.remote
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn outcome(&self) -> Option<&Outcome> {
        self.outcome.as_ref()
    }

    /// the negotiated version, [`Version::V1_0`] until the remote
    /// announced its own
    pub fn version(&self) -> Version {
        self.version.unwrap_or(Version::V1_0)
    }

    /// the valid addresses the remote presented
    pub fn addresses(&self) -> &[FtnAddress] {
        &self.addresses
    }

    pub fn is_secure(&self) -> bool {
        self.link.is_some()
    }

    pub fn totals(&self) -> Totals {
        self.totals
    }

    pub fn flow(&self) -> Flow {
        if self.phase.is_terminal() {
            Flow::Close
        } else {
            Flow::Continue
        }
    }

    /// the next frame to write on the connection
    pub fn next_frame(&mut self, now: Instant) -> Option<Frame> {
        let frame = self.frames.pop_front()?;
        self.touch(now);
        tracing::trace!(phase = %self.phase, %frame, "sending");
        Some(frame)
    }

    pub fn has_frames(&self) -> bool {
        !self.frames.is_empty()
    }

    /// send the greeting, moving to the `ADDR` phase
    pub fn start(&mut self, now: Instant) -> Flow {
        self.touch(now);

        match self.context.registry.acquire() {
            Some(permit) => self.permit = Some(permit),
            None => {
                self.busy("Too many connections".to_owned());
                return self.flow();
            }
        }

        let config = Arc::clone(&self.context.config);
        let station = &config.station;
        self.nul(format!("SYS {}", station.name));
        self.nul(format!("ZYZ {}", station.sysop));
        self.nul(format!("LOC {}", station.location));
        self.nul(format!("NDL {}", station.nodelist));
        self.nul(format!("VER {} {}", SOFTWARE, Version::CURRENT));
        self.nul(format!("TIME {}", chrono::Local::now().to_rfc2822()));

        self.phase = Phase::Addr;
        match (self.direction, &self.challenge) {
            (Direction::Outbound, _) => self.send_addresses(),
            (Direction::Inbound, Some(challenge)) => {
                let option = challenge.option();
                self.nul(option);
            }
            (Direction::Inbound, None) => {}
        }

        self.flow()
    }

    /// process a frame received from the remote
    pub fn receive(&mut self, frame: Frame, now: Instant) -> Flow {
        if self.phase.is_terminal() {
            tracing::trace!(phase = %self.phase, %frame, "ignoring frame, session is over");
            return Flow::Close;
        }

        self.touch(now);
        tracing::trace!(phase = %self.phase, %frame, "received");

        match frame {
            Frame::Command { command, argument } => self.command(command, &argument),
            Frame::Data(bytes) => self.data(bytes),
        }

        self.step(now)
    }

    /// check the timeouts and look for new work (items to send)
    pub fn poll(&mut self, now: Instant) -> Flow {
        if self.phase.is_terminal() {
            return Flow::Close;
        }

        self.step(now)
    }

    fn step(&mut self, now: Instant) -> Flow {
        self.check_timeout(now);
        self.check_for_work();
        self.flow()
    }

    /// the connection was closed by the remote (or failed)
    ///
    /// this is not an error if both sides were done with their batch
    pub fn connection_lost(&mut self) {
        if self.phase.is_terminal() {
            return;
        }

        if self.local_eob && self.remote_eob {
            self.terminate(Phase::End, Outcome::Completed);
        } else {
            tracing::warn!(phase = %self.phase, peer = %self.peer(), "connection lost");
            self.terminate(Phase::Error, Outcome::ConnectionLost);
        }
    }

    /// end the session because of a failure detected by the driver
    /// (undecodable frame, writing to the connection failed...)
    pub fn abort(&mut self, outcome: Outcome) {
        if self.phase.is_terminal() {
            return;
        }

        tracing::warn!(phase = %self.phase, peer = %self.peer(), %outcome, "session aborted");
        self.terminate(Phase::Error, outcome);
    }

    /// tear the session down
    ///
    /// releases the addresses registered as in session, the connection
    /// permit, the item being received and the items to send, logs the
    /// summary of the session and emits the [`ConnectionEvent`].
    pub fn finish(mut self, now: Instant) -> ConnectionEvent {
        self.connection_lost();

        self.incoming = None;
        self.outgoing.clear();
        self.frames.clear();
        self.active.clear();
        self.permit = None;

        let outcome = self.outcome.take().unwrap_or(Outcome::ConnectionLost);
        let elapsed = now.saturating_duration_since(self.started);
        let totals = self.totals;

        tracing::info!(
            %outcome,
            elapsed = elapsed.as_secs_f64(),
            secure = self.is_secure(),
            "Done: {} {}, {}, S/R: {}/{} ({}/{} bytes)",
            self.direction.preposition(),
            self.peer(),
            if outcome.is_success() { "OK" } else { "ERROR" },
            totals.files_sent,
            totals.files_received,
            totals.bytes_sent,
            totals.bytes_received,
        );

        let event = ConnectionEvent {
            address: self.main_address(),
            remote: self.remote,
            direction: self.direction,
            secure: self.is_secure(),
            outcome,
            totals,
        };
        self.context.events.connection_end(&event);
        event
    }

    fn main_address(&self) -> Option<FtnAddress> {
        self.link
            .as_ref()
            .map(|link| link.address)
            .or_else(|| self.addresses.first().copied())
    }

    /// the remote's main address, or its network address if it did not
    /// present itself yet
    fn peer(&self) -> String {
        match self.main_address() {
            Some(address) => address.to_string(),
            None => self.remote.to_string(),
        }
    }

    fn touch(&mut self, now: Instant) {
        self.last_activity = now;
        self.timeout_warned = false;
    }

    fn push(&mut self, frame: Frame) {
        self.frames.push_back(frame);
    }

    fn nul(&mut self, text: String) {
        self.push(Frame::command(Command::Nul, text));
    }

    fn terminate(&mut self, phase: Phase, outcome: Outcome) {
        if self.phase.is_terminal() {
            return;
        }
        self.phase = phase;
        self.outcome = Some(outcome);
    }

    /// a fatal error: the queued frames are dropped and replaced by the
    /// `M_ERR` telling the remote why we stop
    fn error(&mut self, text: String, outcome: Outcome) {
        tracing::warn!(
            phase = %self.phase,
            peer = %self.peer(),
            elapsed = self.last_activity.saturating_duration_since(self.started).as_secs_f64(),
            reason = %text,
            "local error",
        );
        self.frames.clear();
        self.push(Frame::command(Command::Err, text));
        self.terminate(Phase::Error, outcome);
    }

    fn protocol_error(&mut self, text: impl Into<String>) {
        let text = text.into();
        self.error(text.clone(), Outcome::Protocol(text));
    }

    fn local_error(&mut self, text: impl Into<String>) {
        let text = text.into();
        self.error(text.clone(), Outcome::Io(text));
    }

    fn busy(&mut self, text: String) {
        tracing::info!(phase = %self.phase, peer = %self.peer(), reason = %text, "local busy");
        self.frames.clear();
        self.push(Frame::command(Command::Bsy, text.clone()));
        self.terminate(Phase::End, Outcome::LocalBusy(text));
    }

    fn check_timeout(&mut self, now: Instant) {
        let config = Arc::clone(&self.context.config);

        if self.phase.is_handshake() {
            let elapsed = now.saturating_duration_since(self.started);
            if elapsed > config.connect_timeout {
                tracing::warn!(
                    phase = %self.phase,
                    peer = %self.peer(),
                    elapsed = elapsed.as_secs_f64(),
                    "handshake timeout"
                );
                self.terminate(Phase::Error, Outcome::Timeout);
                return;
            }
        }

        let idle = now.saturating_duration_since(self.last_activity);
        if idle > config.timeout {
            tracing::warn!(
                phase = %self.phase,
                peer = %self.peer(),
                idle = idle.as_secs_f64(),
                limit = config.timeout.as_secs_f64(),
                "connection timeout"
            );
            self.terminate(Phase::Error, Outcome::Timeout);
        } else if !self.timeout_warned && idle > config.timeout * 4 / 5 {
            self.timeout_warned = true;
            tracing::debug!(
                phase = %self.phase,
                idle = idle.as_secs_f64(),
                limit = config.timeout.as_secs_f64(),
                "connection approaching timeout"
            );
        }
    }

    fn command(&mut self, command: Command, argument: &str) {
        match command {
            Command::Nul => self.m_nul(argument),
            Command::Adr => self.m_adr(argument),
            Command::Pwd => self.m_pwd(argument),
            Command::Ok => self.m_ok(),
            Command::Err => {
                tracing::warn!(phase = %self.phase, peer = %self.peer(), reason = %argument, "remote error");
                self.terminate(Phase::Error, Outcome::RemoteError(argument.to_owned()));
            }
            Command::Bsy => {
                tracing::info!(phase = %self.phase, peer = %self.peer(), reason = %argument, "remote busy");
                self.terminate(Phase::End, Outcome::RemoteBusy(argument.to_owned()));
            }
            Command::Eob | Command::File | Command::Got | Command::Get | Command::Skip
                if self.phase != Phase::Transfer =>
            {
                self.protocol_error(format!("Unexpected {}", command));
            }
            Command::Eob => {
                tracing::debug!(phase = %self.phase, "remote end of batch");
                self.remote_eob = true;
                self.check_eob();
            }
            Command::File => self.m_file(argument),
            Command::Got => self.m_got(argument),
            Command::Get => self.m_get(argument),
            Command::Skip => self.m_skip(argument),
        }
    }

    fn m_nul(&mut self, argument: &str) {
        let (keyword, value) = argument.split_once(' ').unwrap_or((argument, ""));

        match keyword {
            "OPT" if self.direction == Direction::Outbound && self.challenge.is_none() => {
                self.challenge = Challenge::from_options(value);
                if self.challenge.is_some() {
                    tracing::debug!(phase = %self.phase, "remote requires CRAM-MD5");
                }
            }
            "VER" => self.negotiate(value),
            _ => tracing::debug!(phase = %self.phase, "remote: {}", argument),
        }
    }

    fn negotiate(&mut self, announcement: &str) {
        if self.version.is_some() {
            return;
        }

        let remote = Version::from_announcement(announcement);
        let version = Version::negotiate(remote);
        self.version = Some(version);
        tracing::debug!(
            remote = %announcement,
            negotiated = %version,
            "protocol version negotiated"
        );

        if self.direction == Direction::Inbound {
            self.nul(format!("VER {} {}", SOFTWARE, version));
        }
    }

    fn m_adr(&mut self, argument: &str) {
        if self.phase != Phase::Addr {
            return self.protocol_error("Unexpected M_ADR");
        }

        for token in argument.split_whitespace() {
            match token.parse::<FtnAddress>() {
                Ok(address) if !self.addresses.contains(&address) => {
                    self.addresses.push(address)
                }
                Ok(_) => {}
                Err(error) => {
                    tracing::warn!(%token, %error, "ignoring invalid address");
                }
            }
        }

        if self.addresses.is_empty() {
            return self.protocol_error("No valid address specified");
        }

        let nodes = Arc::clone(&self.context.nodes);
        self.link = self.addresses.iter().find_map(|address| nodes.lookup(address));

        if let Some(aka) = self.link.as_ref().and_then(|link| link.our_aka) {
            if self.our_addresses.contains(&aka) {
                self.our_addresses = vec![aka];
            }
        }

        if self.link.is_none() && !self.addresses.iter().any(|a| nodes.is_listed(a)) {
            tracing::info!(
                peer = %self.peer(),
                "unlisted node, accepting an unsecure session"
            );
        }

        for address in self.addresses.clone() {
            match self.context.registry.register(address) {
                Some(active) => self.active.push(active),
                None => return self.busy(format!("Already connected with {}", address)),
            }
        }

        match self.direction {
            Direction::Outbound => {
                let password = self.password();
                self.push(Frame::command(Command::Pwd, password));
            }
            Direction::Inbound => self.send_addresses(),
        }

        self.phase = Phase::Auth;
    }

    fn send_addresses(&mut self) {
        let network = &self.context.config.network;
        let addresses = self
            .our_addresses
            .iter()
            .map(|address| format!("{}@{}", address, network))
            .collect::<Vec<_>>()
            .join(" ");

        self.push(Frame::command(Command::Adr, addresses));
    }

    /// the `M_PWD` argument: `-` if we have no password for the remote,
    /// the CRAM response if the remote offered it
    fn password(&self) -> String {
        match (&self.link, &self.challenge) {
            (None, _) => "-".to_owned(),
            (Some(link), Some(challenge)) => match challenge.response(&link.password) {
                Ok(response) => response,
                Err(error) => {
                    tracing::warn!(%error, "cannot compute the CRAM response");
                    link.password.clone()
                }
            },
            (Some(link), None) => link.password.clone(),
        }
    }

    fn check_password(&self, received: &str) -> bool {
        let link = match &self.link {
            Some(link) => link,
            None => return true,
        };

        received == link.password
            || self
                .challenge
                .as_ref()
                .map_or(false, |challenge| challenge.verify(&link.password, received))
    }

    fn connection_text(&self) -> String {
        match (&self.link, self.addresses.first()) {
            (Some(link), _) => format!("(S) Secure connection with {}", link.address),
            (None, Some(address)) => format!("(U) Unsecure connection with {}", address),
            (None, None) => format!("(U) Unsecure connection with {}", self.remote),
        }
    }

    fn m_pwd(&mut self, argument: &str) {
        if self.phase != Phase::Auth || self.direction != Direction::Inbound {
            return self.protocol_error("Unexpected M_PWD");
        }

        if !self.check_password(argument) {
            return self.protocol_error("Invalid password");
        }

        let text = self.connection_text();
        tracing::info!(phase = %self.phase, "{}", text);
        self.push(Frame::command(Command::Ok, text));
        self.phase = Phase::Transfer;
    }

    fn m_ok(&mut self) {
        if self.phase != Phase::Auth || self.direction != Direction::Outbound {
            return self.protocol_error("Unexpected M_OK");
        }

        tracing::info!(phase = %self.phase, "{}", self.connection_text());
        self.phase = Phase::Transfer;
    }

    /// both sides sent their `M_EOB`: end the session or start a new batch
    fn check_eob(&mut self) {
        if !(self.local_eob && self.remote_eob) {
            return;
        }

        if !self.version().multiple_batches() || self.batch_bytes == 0 {
            tracing::debug!(version = %self.version(), "end of the last batch");
            self.terminate(Phase::End, Outcome::Completed);
        } else {
            tracing::debug!(bytes = self.batch_bytes, "end of batch, starting a new one");
            self.local_eob = false;
            self.remote_eob = false;
            self.batch_bytes = 0;
        }
    }
}

impl Direction {
    fn preposition(self) -> &'static str {
        match self {
            Self::Outbound => "to",
            Self::Inbound => "from",
        }
    }
}

impl Phase {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::End | Self::Error)
    }

    /// the handshake phases, bound by the connect timeout
    pub fn is_handshake(self) -> bool {
        self < Self::Transfer
    }
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Completed)
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Outbound => f.write_str("outbound"),
            Self::Inbound => f.write_str("inbound"),
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Greet => f.write_str("GREET"),
            Self::Addr => f.write_str("ADDR"),
            Self::Auth => f.write_str("AUTH"),
            Self::Transfer => f.write_str("TRANSFER"),
            Self::End => f.write_str("END"),
            Self::Error => f.write_str("ERROR"),
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Completed => f.write_str("completed"),
            Self::LocalBusy(reason) => write!(f, "local busy: {}", reason),
            Self::RemoteBusy(reason) => write!(f, "remote busy: {}", reason),
            Self::RemoteError(reason) => write!(f, "remote error: {}", reason),
            Self::Protocol(reason) => write!(f, "protocol error: {}", reason),
            Self::Timeout => f.write_str("timeout"),
            Self::ConnectionLost => f.write_str("connection lost"),
            Self::Io(reason) => write!(f, "I/O error: {}", reason),
        }
    }
}

#[cfg(test)]
mod tests;
