use crate::session::{Direction, Outcome, Totals};
use binkp_lib::FtnAddress;
use std::net::SocketAddr;

/// emitted once per connection, when the session is torn down
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionEvent {
    /// the main address of the peer, `None` if the peer never told us
    /// who they were
    pub address: Option<FtnAddress>,
    pub remote: SocketAddr,
    pub direction: Direction,
    pub secure: bool,
    pub outcome: Outcome,
    pub totals: Totals,
}

impl ConnectionEvent {
    pub fn is_success(&self) -> bool {
        self.outcome.is_success()
    }
}

/// the consumers of the connection lifecycle events
pub trait Events: Send + Sync {
    fn connection_end(&self, event: &ConnectionEvent);
}
