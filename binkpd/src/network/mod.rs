pub mod config;

pub use self::config::{Config, Overrides};
use crate::{links::Links, report::Report, storage::Storage};
use anyhow::{anyhow, bail, Context as _, Result};
use binkp_lib::FtnAddress;
use binkp_network::{
    driver::{blocking, mux, Driver},
    net::{self, Listener},
    ConnectionEvent, Context, Direction, Session,
};
use std::{collections::HashMap, net::SocketAddr, sync::Arc, time::Instant};
use tokio::{net::TcpStream, sync::mpsc, task::JoinHandle};

pub struct Network {
    command: mpsc::Sender<Command>,
    handle: JoinHandle<Result<()>>,
    local_address: SocketAddr,
}

struct Runner {
    context: Context,
    listener: Listener,
    links: Arc<Links>,
    storage: Storage,
    report: Arc<Report>,
    command: mpsc::Receiver<Command>,
    config: Config,
    /// the calls in progress
    calls: HashMap<FtnAddress, JoinHandle<()>>,
}

enum Command {
    Shutdown,
    Poll(FtnAddress),
}

impl Network {
    pub async fn new(
        context: Context,
        links: Arc<Links>,
        storage: Storage,
        report: Arc<Report>,
        config: Config,
    ) -> Result<Self> {
        let (command_sender, command_receiver) = mpsc::channel(8);

        let listen_address = config.listen_address;
        tracing::info!(
            listen_address = %listen_address,
            driver = %config.driver,
            "listening for inbound connections"
        );
        let listener = Listener::new(listen_address).await?;
        let local_address = listener.local_addr()?;

        let runner = Runner {
            context,
            listener,
            links,
            storage,
            report,
            command: command_receiver,
            config,
            calls: HashMap::new(),
        };

        let handle = tokio::spawn(async move {
            let mut runner = runner;
            runner.run().await
        });

        Ok(Self {
            command: command_sender,
            handle,
            local_address,
        })
    }

    /// the address we are listening to
    pub fn local_address(&self) -> SocketAddr {
        self.local_address
    }

    /// call the given link now, even if we have nothing to send
    pub async fn poll(&self, address: FtnAddress) -> Result<()> {
        self.command
            .send(Command::Poll(address))
            .await
            .map_err(|_| anyhow!("Cannot send poll command to the network"))
    }

    pub async fn shutdown(self) -> Result<()> {
        self.command
            .send(Command::Shutdown)
            .await
            .map_err(|_| anyhow!("Cannot send shutdown command to the network"))?;

        let mut handle = self.handle;

        tokio::select! {
            result = &mut handle => {
                match result {
                    Ok(result) => result,
                    Err(error) => bail!("error while waiting for network to shutdown: {}", error)
                }
            }
            _ = tokio::time::sleep(std::time::Duration::from_millis(200)) => {
                handle.abort();
                bail!("shutdown timedout, aborting instead...")
            }
        }
    }
}

impl Runner {
    #[tracing::instrument(
        skip(self),
        fields(
            listen_address = %self.config.listen_address,
            driver = %self.config.driver,
        ),
        level = "info"
    )]
    async fn run(&mut self) -> Result<()> {
        // the first tick is immediate: call the links we have mail for
        // as soon as we start
        let mut heart_beat = tokio::time::interval(self.config.heart_beat);

        loop {
            tokio::select! {
                _ = heart_beat.tick() => {
                    self.beat()
                }
                command = self.command.recv() => {
                    let stop = self.handle_command(command)?;
                    if stop { break; }
                }
                // every session runs in its own task, we keep accepting
                // new connections while they are running
                accepting = self.listener.accept() => {
                    let (stream, remote) = accepting.context("failed to accept a new connection")?;
                    tracing::info!(%remote, "incoming connection");
                    let context = self.context.clone();
                    let driver = self.config.driver;
                    tokio::spawn(run_session(context, driver, Direction::Inbound, stream, remote));
                }
            }
        }

        Ok(())
    }

    fn beat(&mut self) {
        self.calls.retain(|_, call| !call.is_finished());

        let mut pending = Vec::new();
        for (address, _) in self.links.callable() {
            if self.storage.has_pending(&address) {
                pending.push(address);
            }
        }
        for address in pending {
            self.call(address);
        }

        let statistics = self.report.statistics();
        tracing::info!(
            connections = self.context.registry.connections(),
            calls = self.calls.len(),
            succeeded = statistics.succeeded,
            failed = statistics.failed,
            files_sent = statistics.files_sent,
            files_received = statistics.files_received,
            "beat"
        );
    }

    fn handle_command(&mut self, command: Option<Command>) -> Result<bool> {
        match command {
            None => bail!("failed to receive anymore commands"),
            Some(Command::Shutdown) => Ok(true),
            Some(Command::Poll(address)) => {
                self.calls.retain(|_, call| !call.is_finished());
                self.call(address);
                Ok(false)
            }
        }
    }

    /// call the link unless we are already in session with it
    fn call(&mut self, address: FtnAddress) {
        if self.calls.contains_key(&address) || self.context.registry.is_active(&address) {
            tracing::debug!(%address, "already in session");
            return;
        }

        let host = match self
            .links
            .callable()
            .find(|(link, _)| link == &address)
            .map(|(_, host)| host.to_owned())
        {
            Some(host) => host,
            None => {
                tracing::warn!(%address, "no known host to call");
                return;
            }
        };

        let context = self.context.clone();
        let driver = self.config.driver;
        let call = tokio::spawn(async move {
            let timeout = context.config.connect_timeout;
            match net::connect(&host, timeout).await {
                Ok(stream) => match stream.peer_addr() {
                    Ok(remote) => {
                        run_session(context, driver, Direction::Outbound, stream, remote).await;
                    }
                    Err(error) => {
                        tracing::warn!(reason = %error, %address, "connection lost")
                    }
                },
                Err(error) => tracing::warn!(reason = ?error, %address, "cannot call the link"),
            }
        });

        self.calls.insert(address, call);
    }
}

/// run the session to completion with the configured driver
///
/// the end of the session is reported through the context's events
async fn run_session(
    context: Context,
    driver: Driver,
    direction: Direction,
    stream: TcpStream,
    remote: SocketAddr,
) {
    let now = Instant::now();
    let session = match direction {
        Direction::Outbound => Session::originate(context, remote, now),
        Direction::Inbound => Session::answer(context, remote, now),
    };

    let event = match driver {
        Driver::Mux => Ok(mux::run(session, stream).await),
        Driver::Blocking => run_blocking(session, stream).await,
    };

    match event {
        Ok(event) => log_event(&event),
        Err(error) => tracing::error!(reason = ?error, %remote, "session failed"),
    }
}

async fn run_blocking(session: Session, stream: TcpStream) -> Result<ConnectionEvent> {
    let stream = stream
        .into_std()
        .context("Cannot hand the connection over to the blocking driver")?;

    tokio::task::spawn_blocking(move || blocking::run(session, stream))
        .await
        .context("the blocking driver panicked")?
}

fn log_event(event: &ConnectionEvent) {
    tracing::debug!(
        remote = %event.remote,
        direction = %event.direction,
        success = event.is_success(),
        "session finished"
    );
}
