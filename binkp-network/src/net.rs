/*!
TCP helpers: the [`Listener`] of the inbound connections and [`connect`]
for the outbound ones.

BinkP nodes are reached at a _protocol address_: a host name or an IP
address, with an optional port (default [`DEFAULT_PORT`]).
*/

use anyhow::{bail, Context as _, Result};
use std::{
    fmt::Display,
    net::{IpAddr, SocketAddr},
    time::Duration,
};
use tokio::net::{lookup_host, TcpListener, TcpStream, ToSocketAddrs};

/// the BinkP port assigned by the IANA
pub const DEFAULT_PORT: u16 = 24554;

/// listen to the inbound connections
pub struct Listener {
    listener: TcpListener,
}

impl Listener {
    /// listen for incoming connections at the given address
    pub async fn new<A>(addr: A) -> Result<Self>
    where
        A: ToSocketAddrs + Display,
    {
        let listener = TcpListener::bind(&addr)
            .await
            .with_context(|| format!("Cannot listen to {}", addr))?;

        Ok(Self { listener })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener
            .local_addr()
            .context("Cannot get the listener's local address")
    }

    /// wait for the next inbound connection
    ///
    /// nothing is exchanged with the remote yet, the session is to be
    /// started in its own task so we can keep accepting new connections
    pub async fn accept(&self) -> Result<(TcpStream, SocketAddr)> {
        self.listener
            .accept()
            .await
            .context("Cannot accept new peer from the listener")
    }
}

/// append the [`DEFAULT_PORT`] to the protocol address if it has no port
///
/// ```
/// # use binkp_network::net::with_default_port;
/// assert_eq!(with_default_port("binkp.example.net"), "binkp.example.net:24554");
/// assert_eq!(with_default_port("binkp.example.net:24555"), "binkp.example.net:24555");
/// assert_eq!(with_default_port("::1"), "[::1]:24554");
/// ```
pub fn with_default_port(host: &str) -> String {
    let host = host.trim();

    if host.parse::<SocketAddr>().is_ok() {
        return host.to_owned();
    }
    if let Ok(ip) = host.parse::<IpAddr>() {
        return SocketAddr::new(ip, DEFAULT_PORT).to_string();
    }
    if host.starts_with('[') && host.ends_with(']') {
        return format!("{}:{}", host, DEFAULT_PORT);
    }

    match host.rsplit_once(':') {
        Some((_, port)) if port.parse::<u16>().is_ok() => host.to_owned(),
        _ => format!("{}:{}", host, DEFAULT_PORT),
    }
}

/// attempt to connect to every resolved address of the protocol address
///
/// returns at the first successful attempt or once all the resolved
/// addresses have been tried and failed. Every attempt is bound by the
/// `timeout`.
#[tracing::instrument(level = "info")]
pub async fn connect(host: &str, timeout: Duration) -> Result<TcpStream> {
    let peer_addr = with_default_port(host);

    let peer_addrs = lookup_host(&peer_addr)
        .await
        .with_context(|| format!("Cannot resolve {}", peer_addr))?;

    for socket_addr in peer_addrs {
        match tokio::time::timeout(timeout, TcpStream::connect(socket_addr)).await {
            Ok(Ok(stream)) => return Ok(stream),
            Ok(Err(error)) => {
                tracing::info!(reason = ?error, "Failed to connect to {} with {}", peer_addr, socket_addr);
            }
            Err(_elapsed) => {
                tracing::info!(
                    timeout = timeout.as_secs(),
                    "Failed to connect to {} with {}: timed out",
                    peer_addr,
                    socket_addr
                );
            }
        }
    }

    bail!("Cannot connect to {}", peer_addr)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_port() {
        assert_eq!(with_default_port("localhost"), "localhost:24554");
        assert_eq!(with_default_port("localhost:1234"), "localhost:1234");
        assert_eq!(with_default_port("127.0.0.1"), "127.0.0.1:24554");
        assert_eq!(with_default_port("127.0.0.1:24555"), "127.0.0.1:24555");
        assert_eq!(with_default_port("[::1]"), "[::1]:24554");
        assert_eq!(with_default_port("[::1]:24555"), "[::1]:24555");
        assert_eq!(with_default_port("fe80::1"), "[fe80::1]:24554");
        assert_eq!(with_default_port(" f1.n2.z3.binkp.net "), "f1.n2.z3.binkp.net:24554");
    }

    #[tokio::test]
    async fn connect_to_listener() {
        let listener = Listener::new("127.0.0.1:0").await.unwrap();
        let host = listener.local_addr().unwrap().to_string();

        let (connected, accepted) = tokio::join!(
            connect(&host, Duration::from_secs(5)),
            listener.accept(),
        );

        let stream = connected.unwrap();
        let (_, remote) = accepted.unwrap();
        assert_eq!(stream.local_addr().unwrap(), remote);
    }

    #[tokio::test]
    async fn connect_refused() {
        // bind then drop to get a port nobody listens to
        let host = {
            let listener = Listener::new("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().to_string()
        };

        assert!(connect(&host, Duration::from_secs(5)).await.is_err());
    }
}
