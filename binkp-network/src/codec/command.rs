use std::fmt::{self, Formatter};

/// the commands of the BinkP protocol
///
/// the value is the first byte of a command frame payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Command {
    /// informational text (`SYS`, `ZYZ`, `VER`, `OPT`...)
    Nul = 0,
    /// the addresses of the sender
    Adr = 1,
    /// session password
    Pwd = 2,
    /// announce an item: `name length unixtime offset`
    File = 3,
    /// password accepted
    Ok = 4,
    /// end of batch, nothing more to send
    Eob = 5,
    /// item fully received: `name length unixtime`
    Got = 6,
    /// fatal error, the session ends
    Err = 7,
    /// busy, try again later
    Bsy = 8,
    /// request an item (again) from an offset: `name length unixtime offset`
    Get = 9,
    /// refuse an item for now: `name length unixtime`
    Skip = 10,
}

impl Command {
    /// size of the command byte in the frame payload
    pub const SIZE: usize = std::mem::size_of::<u8>();

    pub const ALL: &'static [Self] = &[
        Self::Nul,
        Self::Adr,
        Self::Pwd,
        Self::File,
        Self::Ok,
        Self::Eob,
        Self::Got,
        Self::Err,
        Self::Bsy,
        Self::Get,
        Self::Skip,
    ];

    pub const fn to_u8(self) -> u8 {
        self as u8
    }

    pub fn try_from_u8(code: u8) -> Option<Self> {
        Self::ALL.get(code as usize).copied()
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Nul => "M_NUL",
            Self::Adr => "M_ADR",
            Self::Pwd => "M_PWD",
            Self::File => "M_FILE",
            Self::Ok => "M_OK",
            Self::Eob => "M_EOB",
            Self::Got => "M_GOT",
            Self::Err => "M_ERR",
            Self::Bsy => "M_BSY",
            Self::Get => "M_GET",
            Self::Skip => "M_SKIP",
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
