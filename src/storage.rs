//! Index files on disk.
//!
//! Each index group lives in one file named after its signature:
//! `<root>/.<db>_design/spatial/<hex signature>.spatial`, with a compaction
//! sibling `<hex signature>.compact.spatial`. The file holds a single header
//! record. Checkpoints replace it atomically through a temp file and rename;
//! only a reset truncates the live file.

use crate::design::Signature;
use crate::error::{Result, SpatialError};
use crate::header::PersistedHeader;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};

const HEADER_MAGIC: &[u8] = b"GEOVIEW_HEADER";
const HEADER_VERSION: u8 = 1;

/// What an index file stores: the signature it was written for and, once the
/// group has been checkpointed, its header.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeaderRecord {
    pub signature: Signature,
    pub header: Option<PersistedHeader>,
}

/// Shared handle on an index file.
#[derive(Debug)]
pub struct IndexFile {
    path: PathBuf,
    io: Mutex<()>,
}

impl IndexFile {
    /// Opens `path`, creating it and its parent directories if needed.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;

        Ok(Self {
            path,
            io: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current file size in bytes.
    pub fn size(&self) -> Result<u64> {
        let _io = self.io.lock();
        Ok(std::fs::metadata(&self.path)?.len())
    }

    /// Reads the header record, `None` if the file is empty.
    pub fn read_header(&self) -> Result<Option<HeaderRecord>> {
        let _io = self.io.lock();

        let file = File::open(&self.path)?;
        if file.metadata()?.len() == 0 {
            return Ok(None);
        }

        let mut reader = BufReader::new(file);

        let mut magic = vec![0u8; HEADER_MAGIC.len()];
        reader.read_exact(&mut magic)?;
        if magic != HEADER_MAGIC {
            return Err(SpatialError::InvalidFormat(format!(
                "{}: not an index file",
                self.path.display()
            )));
        }

        let mut version = [0u8; 1];
        reader.read_exact(&mut version)?;
        if version[0] != HEADER_VERSION {
            return Err(SpatialError::InvalidFormat(format!(
                "{}: unsupported header version {}",
                self.path.display(),
                version[0]
            )));
        }

        let record: HeaderRecord = bincode::deserialize_from(&mut reader)?;
        Ok(Some(record))
    }

    /// Replaces the header record without ever exposing a partial write.
    pub fn write_header(&self, record: &HeaderRecord) -> Result<()> {
        let _io = self.io.lock();
        let temp_path = self.temp_path();

        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&temp_path)?;

        let mut writer = BufWriter::new(file);
        writer.write_all(HEADER_MAGIC)?;
        writer.write_all(&[HEADER_VERSION])?;
        bincode::serialize_into(&mut writer, record)?;

        writer.flush()?;
        let file = writer.into_inner().map_err(|e| e.into_error())?;
        file.sync_all()?;
        drop(file);

        std::fs::rename(&temp_path, &self.path)?;
        self.sync_parent_dir()?;

        log::debug!(
            "wrote header for {} to {}",
            record.signature,
            self.path.display()
        );
        Ok(())
    }

    /// Cuts the file to zero length, discarding all content.
    pub fn truncate(&self) -> Result<()> {
        let _io = self.io.lock();
        let file = OpenOptions::new().write(true).open(&self.path)?;
        file.set_len(0)?;
        file.sync_all()?;
        Ok(())
    }

    fn temp_path(&self) -> PathBuf {
        let mut temp = self.path.clone();
        if let Some(name) = temp.file_name() {
            let mut new_name = name.to_string_lossy().into_owned();
            new_name.push_str(".tmp");
            temp.set_file_name(new_name);
        }
        temp
    }

    fn sync_parent_dir(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            let dir = File::open(parent)?;
            dir.sync_all()?;
        }
        Ok(())
    }
}

/// Directory holding the spatial index files of `db_name`.
pub fn design_root(root_dir: &Path, db_name: &str) -> PathBuf {
    root_dir.join(format!(".{}_design", db_name)).join("spatial")
}

pub fn index_file_path(root_dir: &Path, db_name: &str, signature: &Signature) -> PathBuf {
    design_root(root_dir, db_name).join(format!("{}.spatial", signature.to_hex()))
}

pub fn compaction_file_path(root_dir: &Path, db_name: &str, signature: &Signature) -> PathBuf {
    design_root(root_dir, db_name).join(format!("{}.compact.spatial", signature.to_hex()))
}

/// Removes the index file and its compaction file. Missing files are fine.
pub fn delete_files(root_dir: &Path, db_name: &str, signature: &Signature) -> Result<()> {
    remove_if_exists(&index_file_path(root_dir, db_name, signature))?;
    remove_if_exists(&compaction_file_path(root_dir, db_name, signature))
}

fn remove_if_exists(path: &Path) -> Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}
