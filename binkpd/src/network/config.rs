use anyhow::{Context as _, Result};
use binkp_network::{driver::Driver, net::DEFAULT_PORT};
use serde::{Deserialize, Serialize};
use std::{
    net::{Ipv6Addr, SocketAddr},
    time::Duration,
};
use structopt::StructOpt;

/// network configuration of the node
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// the address the network will listen for incoming connections
    #[serde(default = "default_listen_address")]
    pub listen_address: SocketAddr,

    /// the maximal number of sessions running at the same time
    ///
    /// above it the inbound connections are told we are busy
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,

    /// how the sessions are run on the connections
    #[serde(default)]
    pub driver: Driver,

    /// the heart beat of the network (in seconds)
    ///
    /// every `heart_beat` we call the links we have mail for
    #[serde(default = "default_heart_beat", with = "seconds")]
    pub heart_beat: Duration,
}

/// the command line overrides of the network configuration
#[derive(StructOpt, Debug, Clone, Default)]
pub struct Overrides {
    /// the address to listen for incoming connections
    #[structopt(long = "listen-address")]
    pub listen_address: Option<SocketAddr>,

    /// the maximal number of sessions running at the same time
    #[structopt(long = "max-connections")]
    pub max_connections: Option<usize>,

    /// the driver of the sessions: `blocking` or `mux`
    #[structopt(long = "driver")]
    pub driver: Option<Driver>,

    /// the heart beat of the network (in seconds)
    #[structopt(long = "heart-beat", parse(try_from_str = duration))]
    pub heart_beat: Option<Duration>,
}

impl Overrides {
    pub fn apply(self, config: &mut Config) {
        if let Some(listen_address) = self.listen_address {
            config.listen_address = listen_address;
        }
        if let Some(max_connections) = self.max_connections {
            config.max_connections = max_connections;
        }
        if let Some(driver) = self.driver {
            config.driver = driver;
        }
        if let Some(heart_beat) = self.heart_beat {
            config.heart_beat = heart_beat;
        }
    }
}

fn default_listen_address() -> SocketAddr {
    SocketAddr::new(Ipv6Addr::UNSPECIFIED.into(), DEFAULT_PORT)
}

fn default_max_connections() -> usize {
    16
}

fn default_heart_beat() -> Duration {
    Duration::from_secs(300)
}

fn duration(s: &str) -> Result<Duration> {
    let i = s
        .parse()
        .context("expecting to parse a duration in seconds")?;
    Ok(Duration::from_secs(i))
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_address: default_listen_address(),
            max_connections: default_max_connections(),
            driver: Driver::default(),
            heart_beat: default_heart_beat(),
        }
    }
}

mod seconds {
    use serde::{Deserialize as _, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}
