use binkp_lib::FtnAddress;
use std::{
    collections::HashSet,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

/// the only state shared between the sessions
///
/// * the addresses of the peers we are currently in session with, so we
///   never run two sessions with the same node;
/// * the number of opened connections, against a ceiling;
/// * the number of bytes reserved in the temporary directory by the
///   items being received.
///
/// every entry is held by a guard ([`Active`], [`Permit`] and
/// [`Reservation`]) and released when the guard is dropped.
#[derive(Clone, Debug)]
pub struct Registry {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    max_connections: usize,
    active: Mutex<HashSet<FtnAddress>>,
    connections: Mutex<usize>,
    reserved: Mutex<u64>,
}

/// an address registered as in session, see [`Registry::register`]
#[derive(Debug)]
pub struct Active {
    registry: Registry,
    address: FtnAddress,
}

/// an opened connection, see [`Registry::acquire`]
#[derive(Debug)]
pub struct Permit {
    registry: Registry,
}

/// bytes reserved in the temporary directory, see [`Registry::reserve`]
#[derive(Debug)]
pub struct Reservation {
    registry: Registry,
    bytes: u64,
}

/// the guarded values are plain counters and sets, they stay consistent
/// even if a thread panicked while holding the lock
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Registry {
    pub fn new(max_connections: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                max_connections,
                active: Mutex::new(HashSet::new()),
                connections: Mutex::new(0),
                reserved: Mutex::new(0),
            }),
        }
    }

    /// register the address as in session
    ///
    /// returns `None` if there is already a session with this address
    pub fn register(&self, address: FtnAddress) -> Option<Active> {
        if lock(&self.inner.active).insert(address) {
            Some(Active {
                registry: self.clone(),
                address,
            })
        } else {
            None
        }
    }

    pub fn is_active(&self, address: &FtnAddress) -> bool {
        lock(&self.inner.active).contains(address)
    }

    /// count a new connection
    ///
    /// returns `None` if the maximum number of connections is reached
    pub fn acquire(&self) -> Option<Permit> {
        let mut connections = lock(&self.inner.connections);
        if *connections >= self.inner.max_connections {
            return None;
        }
        *connections += 1;

        Some(Permit {
            registry: self.clone(),
        })
    }

    pub fn connections(&self) -> usize {
        *lock(&self.inner.connections)
    }

    /// reserve `bytes` of the temporary directory
    ///
    /// `available` is the free space currently reported for the directory;
    /// the reservation fails if it does not cover what is already reserved
    /// by the other sessions plus `bytes`.
    pub fn reserve(&self, bytes: u64, available: u64) -> Option<Reservation> {
        let mut reserved = lock(&self.inner.reserved);
        let required = reserved.checked_add(bytes)?;
        if required > available {
            return None;
        }
        *reserved = required;

        Some(Reservation {
            registry: self.clone(),
            bytes,
        })
    }

    pub fn reserved(&self) -> u64 {
        *lock(&self.inner.reserved)
    }
}

impl Active {
    pub fn address(&self) -> &FtnAddress {
        &self.address
    }
}

impl Reservation {
    pub fn bytes(&self) -> u64 {
        self.bytes
    }
}

impl Drop for Active {
    fn drop(&mut self) {
        lock(&self.registry.inner.active).remove(&self.address);
    }
}

impl Drop for Permit {
    fn drop(&mut self) {
        let mut connections = lock(&self.registry.inner.connections);
        *connections = connections.saturating_sub(1);
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        let mut reserved = lock(&self.registry.inner.reserved);
        *reserved = reserved.saturating_sub(self.bytes);
    }
}
