use crate::codec::MAX_PAYLOAD_LENGTH;
use binkp_lib::FtnAddress;
use serde::{Deserialize, Serialize};
use std::{path::PathBuf, time::Duration};

/// configuration of the session engine
///
/// built once and shared (read only) by all the sessions
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// how we describe ourselves in the greeting
    #[serde(default)]
    pub station: Station,

    /// where the items being received are written before being forwarded
    #[serde(default = "default_temp_directory")]
    pub temp_directory: PathBuf,

    /// items smaller than this (in bytes) may be received in memory when
    /// no temporary file can be created
    #[serde(default = "default_max_memory_size")]
    pub max_memory_size: u64,

    /// the maximum number of bytes in a data frame
    ///
    /// values above the wire maximum (32767) are capped
    #[serde(default = "default_frame_size")]
    pub frame_size: usize,

    /// inactivity timeout (in seconds)
    #[serde(default = "default_timeout", with = "seconds")]
    pub timeout: Duration,

    /// how long the handshake may take before the session is dropped
    /// (in seconds)
    #[serde(default = "default_connect_timeout", with = "seconds")]
    pub connect_timeout: Duration,

    /// the network name appended to our addresses: `2:5020/1042@fidonet`
    #[serde(default = "default_network")]
    pub network: String,

    /// how often the drivers wake up to look for new work when the
    /// connection is idle (in milliseconds)
    #[serde(default = "default_poll_interval", with = "milliseconds")]
    pub poll_interval: Duration,
}

/// the description of the local station, sent in the greeting
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Station {
    pub name: String,
    pub sysop: String,
    pub location: String,
    /// the nodelist flags, `115200,TCP,BINKP`
    #[serde(default = "default_nodelist_flags")]
    pub nodelist: String,
    /// our addresses, the first one is the main address
    #[serde(default)]
    pub addresses: Vec<FtnAddress>,
}

impl Config {
    /// the effective data frame size
    pub fn frame_size(&self) -> usize {
        self.frame_size.clamp(1, MAX_PAYLOAD_LENGTH)
    }
}

fn default_temp_directory() -> PathBuf {
    std::env::temp_dir()
}

fn default_max_memory_size() -> u64 {
    10_485_760
}

fn default_frame_size() -> usize {
    MAX_PAYLOAD_LENGTH
}

fn default_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_connect_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_network() -> String {
    "fidonet".to_owned()
}

fn default_poll_interval() -> Duration {
    Duration::from_millis(100)
}

fn default_nodelist_flags() -> String {
    "115200,TCP,BINKP".to_owned()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            station: Station::default(),
            temp_directory: default_temp_directory(),
            max_memory_size: default_max_memory_size(),
            frame_size: default_frame_size(),
            timeout: default_timeout(),
            connect_timeout: default_connect_timeout(),
            network: default_network(),
            poll_interval: default_poll_interval(),
        }
    }
}

impl Default for Station {
    fn default() -> Self {
        Self {
            name: "binkpd".to_owned(),
            sysop: "sysop".to_owned(),
            location: "Nowhere".to_owned(),
            nodelist: default_nodelist_flags(),
            addresses: Vec::new(),
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

mod milliseconds {
    use serde::{Deserialize as _, Deserializer, Serializer};
    use std::{convert::TryFrom as _, time::Duration};

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(duration.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
