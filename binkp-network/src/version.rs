use std::{
    fmt::{self, Formatter},
    num::ParseIntError,
    str::FromStr,
};
use thiserror::Error;

/// BinkP protocol version, as announced in the `VER` informational frame
///
/// ```text
/// VER <software-id> binkp/<major>.<minor>
/// ```
///
/// the only behavioral difference between the versions we know of is the
/// end of batch rule: with [`Version::V1_1`] the session may carry on with
/// a new batch after both sides sent `M_EOB`.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct Version {
    major: u8,
    minor: u8,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum VersionError {
    #[error("missing the 'binkp/' prefix")]
    MissingPrefix,
    #[error("missing the minor version number")]
    MissingMinor,
    #[error("invalid version number")]
    InvalidNumber(#[from] ParseIntError),
}

impl Version {
    /// the baseline: one batch per session
    pub const V1_0: Self = Self::new(1, 0);

    /// multiple batches per session
    pub const V1_1: Self = Self::new(1, 1);

    /// get the minimal supported version supported by this implementation
    pub const MIN: Self = Self::V1_0;

    /// get the current version implemented by this implementation, this
    /// is the version we announce in our greeting
    pub const CURRENT: Self = Self::V1_1;

    /// get the maximal supported version supported by this implementation
    pub const MAX: Self = Self::CURRENT;

    const PREFIX: &'static str = "binkp/";

    pub const fn new(major: u8, minor: u8) -> Self {
        Self { major, minor }
    }

    /// returns if the version is currently supported or not
    ///
    /// ```
    /// # use binkp_network::Version;
    /// assert!(Version::V1_0.is_supported());
    /// assert!(!Version::new(2, 0).is_supported());
    /// ```
    #[inline]
    pub fn is_supported(self) -> bool {
        Self::MIN <= self && self <= Self::MAX
    }

    /// find the version announced in the argument of a `VER` frame
    ///
    /// the version is the last word of the argument. Returns `None` if
    /// there is no such word or if it is not a valid version.
    pub fn from_announcement(argument: &str) -> Option<Self> {
        argument.split_whitespace().last()?.parse().ok()
    }

    /// the version both sides can speak, given the remote's announcement
    ///
    /// an absent or unsupported announcement falls back to [`Version::V1_0`]
    pub fn negotiate(remote: Option<Self>) -> Self {
        match remote {
            Some(remote) if remote >= Self::MIN => remote.min(Self::CURRENT),
            _ => Self::V1_0,
        }
    }

    /// the session may continue after a joint end of batch
    pub fn multiple_batches(self) -> bool {
        self >= Self::V1_1
    }
}

impl Default for Version {
    fn default() -> Self {
        Self::CURRENT
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}.{}", Self::PREFIX, self.major, self.minor)
    }
}

impl FromStr for Version {
    type Err = VersionError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s
            .strip_prefix(Self::PREFIX)
            .ok_or(VersionError::MissingPrefix)?;
        let (major, minor) = s.split_once('.').ok_or(VersionError::MissingMinor)?;

        Ok(Self::new(major.parse()?, minor.parse()?))
    }
}
