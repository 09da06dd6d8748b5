use crate::{links, network, storage};
use anyhow::{Context as _, Result};
use binkp_lib::FtnAddress;
use binkp_network::Station;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    pub station: Station,

    /// the session engine settings (timeouts, temporary directory...)
    #[serde(default)]
    pub binkp: binkp_network::Config,

    #[serde(default)]
    pub network: network::Config,

    pub storage: storage::Config,

    #[serde(default)]
    pub links: Vec<links::Config>,

    /// the addresses known to exist
    #[serde(default)]
    pub nodelist: Vec<FtnAddress>,
}

impl Config {
    pub const EXAMPLE: &'static str = include_str!("config.yaml");

    pub fn from_file<P>(path: P) -> Result<Self>
    where
        P: AsRef<Path>,
    {
        let path = path.as_ref();
        let file = std::fs::File::open(path)
            .with_context(|| format!("Cannot open file: {}", path.display()))?;
        serde_yaml::from_reader(file)
            .with_context(|| format!("Invalid config file: {}", path.display()))
    }

    /// the configuration of the session engine, with our station
    pub fn engine(&self) -> binkp_network::Config {
        binkp_network::Config {
            station: self.station.clone(),
            ..self.binkp.clone()
        }
    }
}
