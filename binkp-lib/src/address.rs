use serde::{Deserialize, Serialize};
use std::{
    convert::TryFrom,
    fmt::{self, Formatter},
    num::ParseIntError,
    str::FromStr,
};
use thiserror::Error;

/// address of a node (or point) in a FidoNet technology network
///
/// the textual form is `zone:net/node[.point][@domain]`. The domain is
/// accepted when parsing but not kept: two addresses in different domains
/// with the same numbers are the same node for the session engine.
///
/// ```
/// # use binkp_lib::FtnAddress;
/// let address: FtnAddress = "2:5020/1042.3@fidonet".parse().unwrap();
/// assert_eq!(address.to_string(), "2:5020/1042.3");
/// ```
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct FtnAddress {
    zone: u16,
    net: u16,
    node: u16,
    point: u16,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AddressError {
    #[error("missing zone separator ':'")]
    MissingZone,
    #[error("missing net separator '/'")]
    MissingNet,
    #[error("invalid number in address")]
    InvalidNumber(#[from] ParseIntError),
}

impl FtnAddress {
    pub const fn new(zone: u16, net: u16, node: u16, point: u16) -> Self {
        Self {
            zone,
            net,
            node,
            point,
        }
    }

    pub fn zone(&self) -> u16 {
        self.zone
    }

    pub fn net(&self) -> u16 {
        self.net
    }

    pub fn node(&self) -> u16 {
        self.node
    }

    pub fn point(&self) -> u16 {
        self.point
    }

    /// the address with the point number removed (the boss node)
    pub fn boss(&self) -> Self {
        Self {
            point: 0,
            ..*self
        }
    }
}

impl fmt::Display for FtnAddress {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}/{}", self.zone, self.net, self.node)?;
        if self.point != 0 {
            write!(f, ".{}", self.point)?;
        }
        Ok(())
    }
}

impl fmt::Debug for FtnAddress {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_tuple("FtnAddress").field(&self.to_string()).finish()
    }
}

impl FromStr for FtnAddress {
    type Err = AddressError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let s = match s.split_once('@') {
            Some((address, _domain)) => address,
            None => s,
        };

        let (zone, rest) = s.split_once(':').ok_or(AddressError::MissingZone)?;
        let (net, rest) = rest.split_once('/').ok_or(AddressError::MissingNet)?;
        let (node, point) = match rest.split_once('.') {
            Some((node, point)) => (node, point.parse()?),
            None => (rest, 0),
        };

        Ok(Self {
            zone: zone.parse()?,
            net: net.parse()?,
            node: node.parse()?,
            point,
        })
    }
}

impl From<FtnAddress> for String {
    fn from(address: FtnAddress) -> Self {
        address.to_string()
    }
}

impl<'a> TryFrom<&'a str> for FtnAddress {
    type Error = AddressError;
    fn try_from(value: &'a str) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl TryFrom<String> for FtnAddress {
    type Error = AddressError;
    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}
