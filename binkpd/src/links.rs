/*!
the nodes we know of: the links (with whom we share a password and whose
host we may call) and the nodelist
*/

use binkp_lib::FtnAddress;
use binkp_network::{Link, Nodes};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// a link as configured
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    pub address: FtnAddress,

    /// the session password, the sessions are not secure without one
    #[serde(default)]
    pub password: Option<String>,

    /// the protocol address to call the link at, `host[:port]`
    #[serde(default)]
    pub host: Option<String>,

    /// the address we present to this link instead of all of ours
    #[serde(default)]
    pub our_aka: Option<FtnAddress>,
}

pub struct Links {
    links: HashMap<FtnAddress, Config>,
    nodelist: HashSet<FtnAddress>,
}

impl Config {
    fn password(&self) -> Option<&str> {
        self.password
            .as_deref()
            .filter(|password| !password.is_empty() && *password != "-")
    }
}

impl Links {
    pub fn new(links: Vec<Config>, nodelist: Vec<FtnAddress>) -> Self {
        let mut by_address = HashMap::with_capacity(links.len());
        for link in links {
            if let Some(previous) = by_address.insert(link.address, link) {
                tracing::warn!(address = %previous.address, "link configured twice, keeping the last one");
            }
        }

        Self {
            links: by_address,
            nodelist: nodelist.into_iter().collect(),
        }
    }

    /// the links we can call: their address and protocol address
    pub fn callable(&self) -> impl Iterator<Item = (FtnAddress, &str)> {
        self.links
            .values()
            .filter_map(|link| link.host.as_deref().map(|host| (link.address, host)))
    }
}

impl Nodes for Links {
    fn lookup(&self, address: &FtnAddress) -> Option<Link> {
        let link = self.links.get(address)?;
        let password = link.password()?;

        Some(Link {
            address: link.address,
            password: password.to_owned(),
            our_aka: link.our_aka,
        })
    }

    fn is_listed(&self, address: &FtnAddress) -> bool {
        self.links.contains_key(address) || self.nodelist.contains(address)
    }
}
