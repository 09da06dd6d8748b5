//! in memory collaborators for the tests of the sessions and drivers

use crate::{
    Config, ConnectionEvent, Content, Context, Events, Inbound, Link, Nodes, Outbound, Pending,
    Received, Registry, Station,
};
use binkp_lib::{FtnAddress, ItemInfo};
use std::{
    collections::HashMap,
    io::{self, Cursor, Read},
    sync::{Arc, Mutex},
};

#[derive(Default)]
pub struct MemoryNodes {
    pub links: Vec<Link>,
    pub listed: Vec<FtnAddress>,
}

/// items to send, removed once acknowledged
#[derive(Default, Clone)]
pub struct MemoryOutbound {
    items: Arc<Mutex<HashMap<FtnAddress, Vec<(ItemInfo, Vec<u8>)>>>>,
}

pub struct MemoryItem {
    outbound: MemoryOutbound,
    address: FtnAddress,
    info: ItemInfo,
    content: Vec<u8>,
}

#[derive(Clone)]
pub struct MemoryInbound {
    pub free_space: u64,
    pub refuse: bool,
    received: Arc<Mutex<Vec<(ItemInfo, Vec<u8>)>>>,
}

#[derive(Default, Clone)]
pub struct RecordingEvents {
    events: Arc<Mutex<Vec<ConnectionEvent>>>,
}

impl Nodes for MemoryNodes {
    fn lookup(&self, address: &FtnAddress) -> Option<Link> {
        self.links.iter().find(|link| &link.address == address).cloned()
    }

    fn is_listed(&self, address: &FtnAddress) -> bool {
        self.listed.contains(address) || self.lookup(address).is_some()
    }
}

impl MemoryOutbound {
    pub fn add(&self, address: FtnAddress, name: &str, content: &[u8]) -> ItemInfo {
        let info = ItemInfo::new(name, content.len() as u64, 1_600_000_000);
        self.items
            .lock()
            .unwrap()
            .entry(address)
            .or_default()
            .push((info.clone(), content.to_vec()));
        info
    }

    pub fn remaining(&self) -> usize {
        self.items.lock().unwrap().values().map(Vec::len).sum()
    }
}

impl Outbound for MemoryOutbound {
    fn pending(&self, address: &FtnAddress) -> anyhow::Result<Vec<Box<dyn Pending>>> {
        let items = self.items.lock().unwrap();
        Ok(items
            .get(address)
            .into_iter()
            .flatten()
            .map(|(info, content)| {
                Box::new(MemoryItem {
                    outbound: self.clone(),
                    address: *address,
                    info: info.clone(),
                    content: content.clone(),
                }) as Box<dyn Pending>
            })
            .collect())
    }
}

impl Pending for MemoryItem {
    fn info(&self) -> &ItemInfo {
        &self.info
    }

    fn open(&mut self, offset: u64) -> io::Result<Box<dyn Read + Send>> {
        let mut cursor = Cursor::new(self.content.clone());
        cursor.set_position(offset);
        Ok(Box::new(cursor))
    }

    fn acknowledge(self: Box<Self>) -> anyhow::Result<()> {
        let mut items = self.outbound.items.lock().unwrap();
        if let Some(items) = items.get_mut(&self.address) {
            items.retain(|(info, _)| info != &self.info);
        }
        Ok(())
    }
}

impl MemoryInbound {
    pub fn received(&self) -> Vec<(ItemInfo, Vec<u8>)> {
        self.received.lock().unwrap().clone()
    }
}

impl Default for MemoryInbound {
    fn default() -> Self {
        Self {
            free_space: u64::MAX,
            refuse: false,
            received: Arc::default(),
        }
    }
}

impl Inbound for MemoryInbound {
    fn free_space(&self) -> io::Result<u64> {
        Ok(self.free_space)
    }

    fn forward(&self, received: Received) -> anyhow::Result<()> {
        if self.refuse {
            anyhow::bail!("refusing {}", received.info.name());
        }

        let content = match received.content {
            Content::File(path) => std::fs::read(path)?,
            Content::Memory(bytes) => bytes,
        };
        self.received.lock().unwrap().push((received.info, content));
        Ok(())
    }
}

impl RecordingEvents {
    pub fn events(&self) -> Vec<ConnectionEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl Events for RecordingEvents {
    fn connection_end(&self, event: &ConnectionEvent) {
        self.events.lock().unwrap().push(event.clone());
    }
}

/// a node: its configuration and collaborators
pub struct Node {
    pub config: Config,
    pub registry: Registry,
    pub nodes: MemoryNodes,
    pub outbound: MemoryOutbound,
    pub inbound: MemoryInbound,
    pub events: RecordingEvents,
}

impl Node {
    pub fn new(address: FtnAddress) -> Self {
        Self {
            config: Config {
                station: Station {
                    name: format!("node {}", address),
                    addresses: vec![address],
                    ..Station::default()
                },
                ..Config::default()
            },
            registry: Registry::new(8),
            nodes: MemoryNodes::default(),
            outbound: MemoryOutbound::default(),
            inbound: MemoryInbound::default(),
            events: RecordingEvents::default(),
        }
    }

    /// share a password with the given node
    pub fn link(mut self, address: FtnAddress, password: &str) -> Self {
        self.nodes.links.push(Link {
            address,
            password: password.to_owned(),
            our_aka: None,
        });
        self
    }

    pub fn context(&self) -> Context {
        let nodes = MemoryNodes {
            links: self.nodes.links.clone(),
            listed: self.nodes.listed.clone(),
        };

        Context {
            config: Arc::new(self.config.clone()),
            registry: self.registry.clone(),
            nodes: Arc::new(nodes),
            outbound: Arc::new(self.outbound.clone()),
            inbound: Arc::new(self.inbound.clone()),
            events: Arc::new(self.events.clone()),
        }
    }
}
