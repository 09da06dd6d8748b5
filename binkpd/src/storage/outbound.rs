use anyhow::{Context as _, Result};
use binkp_lib::{FtnAddress, ItemInfo};
use binkp_network::{Outbound, Pending};
use std::{
    fs::{self, File},
    io::{self, Read, Seek as _, SeekFrom},
    path::PathBuf,
    time::UNIX_EPOCH,
};

/// the items to send, as files in one directory per destination
pub struct OutboundDirectory {
    root: PathBuf,
}

/// a file waiting in the outbound directory, deleted once acknowledged
pub struct FileItem {
    path: PathBuf,
    info: ItemInfo,
}

impl OutboundDirectory {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    /// the directory of the items for the given address
    pub fn directory(&self, address: &FtnAddress) -> PathBuf {
        self.root.join(format!(
            "{}.{}.{}.{}",
            address.zone(),
            address.net(),
            address.node(),
            address.point()
        ))
    }

    /// check if there is something to send to the given address
    pub fn has_pending(&self, address: &FtnAddress) -> Result<bool> {
        Ok(!self.files(address)?.is_empty())
    }

    /// the regular files of the address' directory, sorted by name
    fn files(&self, address: &FtnAddress) -> Result<Vec<PathBuf>> {
        let directory = self.directory(address);

        let entries = match fs::read_dir(&directory) {
            Ok(entries) => entries,
            Err(error) if error.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(error) => {
                return Err(error)
                    .with_context(|| format!("Cannot list {}", directory.display()))
            }
        };

        let mut files = Vec::new();
        for entry in entries {
            let entry =
                entry.with_context(|| format!("Cannot list {}", directory.display()))?;
            let file_type = entry
                .file_type()
                .with_context(|| format!("Cannot stat {}", entry.path().display()))?;
            if file_type.is_file() {
                files.push(entry.path());
            }
        }
        files.sort();

        Ok(files)
    }
}

impl FileItem {
    fn open(path: PathBuf) -> Result<Option<Self>> {
        let name = match path.file_name().and_then(|name| name.to_str()) {
            Some(name) => name.to_owned(),
            None => {
                tracing::warn!(path = %path.display(), "skipping file with a non UTF-8 name");
                return Ok(None);
            }
        };

        let metadata =
            fs::metadata(&path).with_context(|| format!("Cannot stat {}", path.display()))?;
        let unixtime = metadata
            .modified()
            .ok()
            .and_then(|modified| modified.duration_since(UNIX_EPOCH).ok())
            .map_or(0, |elapsed| elapsed.as_secs() as i64);

        let info = ItemInfo::new(name, metadata.len(), unixtime);
        Ok(Some(Self { path, info }))
    }
}

impl Outbound for OutboundDirectory {
    fn pending(&self, address: &FtnAddress) -> Result<Vec<Box<dyn Pending>>> {
        let mut items: Vec<Box<dyn Pending>> = Vec::new();
        for path in self.files(address)? {
            if let Some(item) = FileItem::open(path)? {
                items.push(Box::new(item));
            }
        }

        Ok(items)
    }
}

impl Pending for FileItem {
    fn info(&self) -> &ItemInfo {
        &self.info
    }

    fn open(&mut self, offset: u64) -> io::Result<Box<dyn Read + Send>> {
        let mut file = File::open(&self.path)?;
        if offset > 0 {
            file.seek(SeekFrom::Start(offset))?;
        }
        Ok(Box::new(file))
    }

    fn acknowledge(self: Box<Self>) -> Result<()> {
        fs::remove_file(&self.path)
            .with_context(|| format!("Cannot remove sent file {}", self.path.display()))?;
        tracing::debug!(path = %self.path.display(), "sent file removed");
        Ok(())
    }
}
