/*!
# BinkP session engine

the protocol core of the mailer:

* the [frame codec](codec): the 2 bytes header frames, commands and data;
* the [`Session`] state machine: greeting, address exchange, authentication
  (plain or [CRAM](Challenge)), the transfer of the items in both directions
  and the end of batch handshake. It does no I/O on its own;
* the [drivers](driver) running a [`Session`] on a TCP connection, either
  with a blocking socket and a writer thread or in a single task with
  non-blocking I/O;
* the [`Registry`] of the state shared between the sessions.

The rest of the mailer plugs in through the [`Nodes`], [`Outbound`],
[`Inbound`] and [`Events`] traits.
*/

#[cfg(test)]
#[macro_use(quickcheck)]
extern crate quickcheck_macros;

mod auth;
pub mod codec;
mod config;
pub mod disk;
pub mod driver;
mod event;
mod item;
pub mod net;
mod peer;
mod registry;
mod session;
mod version;

#[cfg(test)]
mod testing;

pub use self::{
    auth::Challenge,
    codec::{Command, Frame, FrameCodec, FrameError},
    config::{Config, Station},
    event::{ConnectionEvent, Events},
    item::{Content, Inbound, Outbound, Pending, Received},
    peer::{Link, Nodes},
    registry::{Active, Permit, Registry, Reservation},
    session::{Context, Direction, Flow, Outcome, Phase, Session, Totals},
    version::{Version, VersionError},
};

/// the software identifier announced in the `VER` frame
pub const SOFTWARE: &str = concat!("binkp-rs/", env!("CARGO_PKG_VERSION"));
