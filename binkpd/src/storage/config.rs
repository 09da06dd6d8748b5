use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, PartialEq, Eq, Hash, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// where the received items are delivered
    pub inbound: PathBuf,

    /// where the items to send are waiting, one directory per
    /// destination: `<zone>.<net>.<node>.<point>`
    pub outbound: PathBuf,
}
