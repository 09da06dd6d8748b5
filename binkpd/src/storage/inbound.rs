use anyhow::{Context as _, Result};
use binkp_network::{disk, Content, Inbound, Received};
use std::{
    fs::{self, OpenOptions},
    io::{self, Write as _},
    path::{Path, PathBuf},
};
use thiserror::Error;

/// delivers the received items into the inbound directory
///
/// an existing file is never overwritten: the item is refused and the
/// peer will send it again in a later session
pub struct InboundDirectory {
    root: PathBuf,
}

#[derive(Debug, Error)]
pub enum ForwardError {
    #[error("invalid file name {0:?}")]
    InvalidName(String),
    #[error("{} already exists", .0.display())]
    AlreadyExists(PathBuf),
}

impl InboundDirectory {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    /// the path of the received item, the remote does not get to
    /// choose the directory
    fn target(&self, name: &str) -> Result<PathBuf, ForwardError> {
        let valid = !name.is_empty()
            && name != "."
            && name != ".."
            && !name.contains(|c| matches!(c, '/' | '\\' | '\0'));

        if valid {
            Ok(self.root.join(name))
        } else {
            Err(ForwardError::InvalidName(name.to_owned()))
        }
    }
}

/// write `bytes` in a new file at `target`
fn create(target: &Path, bytes: &[u8]) -> io::Result<()> {
    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(target)?;
    file.write_all(bytes)?;
    file.sync_all()
}

/// link the temporary file at its final place, copy it if they are not on
/// the same file system
fn deliver(temporary: &Path, target: &Path) -> io::Result<()> {
    match fs::hard_link(temporary, target) {
        Ok(()) => Ok(()),
        Err(error) if error.kind() == io::ErrorKind::AlreadyExists => Err(error),
        Err(error) => {
            tracing::debug!(reason = %error, "cannot link the temporary file, copying it");
            let mut source = fs::File::open(temporary)?;
            let mut file = OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(target)?;
            io::copy(&mut source, &mut file)?;
            file.sync_all()
        }
    }
}

impl Inbound for InboundDirectory {
    fn free_space(&self) -> io::Result<u64> {
        disk::free_space(&self.root)
    }

    fn forward(&self, received: Received) -> Result<()> {
        let target = self.target(received.info.name())?;

        let result = match &received.content {
            Content::File(temporary) => deliver(temporary, &target),
            Content::Memory(bytes) => create(&target, bytes),
        };

        match result {
            Ok(()) => (),
            Err(error) if error.kind() == io::ErrorKind::AlreadyExists => {
                return Err(ForwardError::AlreadyExists(target).into());
            }
            Err(error) => {
                return Err(error)
                    .with_context(|| format!("Cannot deliver {}", target.display()));
            }
        }

        tracing::info!(
            path = %target.display(),
            bytes = received.info.length(),
            secure = received.secure,
            from = ?received.from,
            "received file delivered"
        );
        Ok(())
    }
}
