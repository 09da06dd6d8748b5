use binkp_lib::FtnAddress;
use serde::{Deserialize, Serialize};

/// a known peer we share a session password with
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Link {
    pub address: FtnAddress,
    pub password: String,
    /// the address we present to this peer, if not all of ours
    #[serde(default)]
    pub our_aka: Option<FtnAddress>,
}

/// the directory of the nodes we know of
pub trait Nodes: Send + Sync {
    /// the password-bearing record of the given address, if any
    fn lookup(&self, address: &FtnAddress) -> Option<Link>;

    /// check the address exists in the nodelist
    fn is_listed(&self, address: &FtnAddress) -> bool;
}
