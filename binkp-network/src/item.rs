use binkp_lib::{FtnAddress, ItemInfo};
use std::{
    io::{self, Read},
    path::PathBuf,
};

/// an item waiting to be sent to a peer
pub trait Pending: Send {
    fn info(&self) -> &ItemInfo;

    /// open the content of the item, positioned at `offset`
    fn open(&mut self, offset: u64) -> io::Result<Box<dyn Read + Send>>;

    /// the peer confirmed the reception, the item can be released
    fn acknowledge(self: Box<Self>) -> anyhow::Result<()>;
}

/// the provider of the items to send
pub trait Outbound: Send + Sync {
    /// the items waiting for the given address, in sending order
    fn pending(&self, address: &FtnAddress) -> anyhow::Result<Vec<Box<dyn Pending>>>;
}

/// a fully received item
#[derive(Debug)]
pub struct Received {
    pub info: ItemInfo,
    /// the addresses of the peer it was received from
    pub from: Vec<FtnAddress>,
    pub secure: bool,
    pub content: Content,
}

#[derive(Debug)]
pub enum Content {
    /// a temporary file, the forwarder may move it away. It is removed
    /// once the forwarder returns if it is still there
    File(PathBuf),
    Memory(Vec<u8>),
}

/// the destination of the received items
pub trait Inbound: Send + Sync {
    /// how many bytes can still be received
    fn free_space(&self) -> io::Result<u64>;

    /// hand the item over for delivery
    ///
    /// an error means the item is refused and the peer is told to
    /// keep it for later
    fn forward(&self, received: Received) -> anyhow::Result<()>;
}

impl Content {
    pub fn len(&self) -> io::Result<u64> {
        match self {
            Self::File(path) => std::fs::metadata(path).map(|metadata| metadata.len()),
            Self::Memory(bytes) => Ok(bytes.len() as u64),
        }
    }

    pub fn is_empty(&self) -> io::Result<bool> {
        self.len().map(|len| len == 0)
    }
}
