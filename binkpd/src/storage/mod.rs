mod config;
mod inbound;
mod outbound;

pub use self::{
    config::Config,
    inbound::{ForwardError, InboundDirectory},
    outbound::{FileItem, OutboundDirectory},
};
use anyhow::{Context as _, Result};
use binkp_lib::FtnAddress;
use std::sync::Arc;

/// the file system side of the mailer: what we have to send and where
/// we deliver what we receive
#[derive(Clone)]
pub struct Storage {
    inbound: Arc<InboundDirectory>,
    outbound: Arc<OutboundDirectory>,
}

impl Storage {
    pub fn new(config: Config) -> Result<Self> {
        std::fs::create_dir_all(&config.inbound).with_context(|| {
            format!(
                "Cannot create the inbound directory {}",
                config.inbound.display()
            )
        })?;
        std::fs::create_dir_all(&config.outbound).with_context(|| {
            format!(
                "Cannot create the outbound directory {}",
                config.outbound.display()
            )
        })?;

        Ok(Self {
            inbound: Arc::new(InboundDirectory::new(config.inbound)),
            outbound: Arc::new(OutboundDirectory::new(config.outbound)),
        })
    }

    pub fn inbound(&self) -> Arc<InboundDirectory> {
        Arc::clone(&self.inbound)
    }

    pub fn outbound(&self) -> Arc<OutboundDirectory> {
        Arc::clone(&self.outbound)
    }

    /// check if there is mail waiting for the given address, errors are
    /// logged and treated as nothing to send
    pub fn has_pending(&self, address: &FtnAddress) -> bool {
        match self.outbound.has_pending(address) {
            Ok(pending) => pending,
            Err(error) => {
                tracing::warn!(reason = ?error, %address, "cannot check the outbound");
                false
            }
        }
    }
}
