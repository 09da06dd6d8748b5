use crate::{escape, unescape};
use std::{
    fmt::{self, Formatter},
    num::ParseIntError,
};
use thiserror::Error;

/// description of an item (file or mail packet) exchanged in a session
///
/// this is what the `M_FILE` command announces and what the `M_GOT`,
/// `M_SKIP` and `M_GET` commands refer to. Two [`ItemInfo`] are the same
/// item if they have the same escaped name, length and modification time.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ItemInfo {
    name: String,
    /// the name as it is written in the command arguments
    escaped: String,
    length: u64,
    unixtime: i64,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ItemInfoError {
    #[error("missing the {0} field")]
    MissingField(&'static str),
    #[error("invalid {field} field")]
    InvalidNumber {
        field: &'static str,
        #[source]
        source: ParseIntError,
    },
}

impl ItemInfo {
    pub fn new(name: impl Into<String>, length: u64, unixtime: i64) -> Self {
        let name = name.into();
        Self {
            escaped: escape(&name),
            name,
            length,
            unixtime,
        }
    }

    /// an item announced by the remote, the escaped name is kept as it
    /// was received so the acknowledgements refer to the exact same name
    fn received(escaped: &str, length: u64, unixtime: i64) -> Self {
        Self {
            name: unescape(escaped),
            escaped: escaped.to_owned(),
            length,
            unixtime,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn escaped_name(&self) -> &str {
        &self.escaped
    }

    pub fn length(&self) -> u64 {
        self.length
    }

    pub fn unixtime(&self) -> i64 {
        self.unixtime
    }

    /// parse the `name length unixtime` part of a command argument
    ///
    /// any extra field (the offset of `M_FILE` and `M_GET`) is ignored
    pub fn parse(argument: &str) -> Result<Self, ItemInfoError> {
        Self::parse_with_offset(argument).map(|(info, _)| info)
    }

    /// parse the `name length unixtime offset` argument of `M_FILE` or `M_GET`
    ///
    /// the offset defaults to `0` when absent
    pub fn parse_with_offset(argument: &str) -> Result<(Self, u64), ItemInfoError> {
        let mut fields = argument.split_whitespace();

        let name = fields.next().ok_or(ItemInfoError::MissingField("name"))?;
        let length = number(fields.next(), "length")?;
        let unixtime = number(fields.next(), "unixtime")?;
        let offset = match fields.next() {
            None => 0,
            Some(offset) => number(Some(offset), "offset")?,
        };

        Ok((Self::received(name, length, unixtime), offset))
    }

    /// the argument form with the offset, as used by `M_FILE` and `M_GET`
    pub fn with_offset(&self, offset: u64) -> String {
        format!("{} {}", self, offset)
    }
}

fn number<T>(field: Option<&str>, name: &'static str) -> Result<T, ItemInfoError>
where
    T: std::str::FromStr<Err = ParseIntError>,
{
    field
        .ok_or(ItemInfoError::MissingField(name))?
        .parse()
        .map_err(|source| ItemInfoError::InvalidNumber {
            field: name,
            source,
        })
}

/// the `name length unixtime` form used by `M_GOT` and `M_SKIP`
impl fmt::Display for ItemInfo {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.escaped, self.length, self.unixtime)
    }
}
