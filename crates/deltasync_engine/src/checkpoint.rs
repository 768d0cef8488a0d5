//! Durable storage for the pull checkpoint ("latest UST").

use crate::error::SyncResult;
use deltasync_codec::{from_cbor, to_cbor};
use deltasync_core::RecordType;
use deltasync_protocol::Checkpoint;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Persistence for the sync checkpoint.
///
/// A store that has never been written reports [`Checkpoint::ZERO`], which
/// makes the next pull a full resync.
///
/// Alongside the checkpoint the store keeps the record types it covers.
/// Deltas of a type registered after the checkpoint moved were skipped by
/// earlier pulls, so the engine rewinds to zero until every registered type
/// is covered.
pub trait CheckpointStore: Send + Sync {
    /// Loads the stored checkpoint.
    ///
    /// # Errors
    ///
    /// Returns an error if the checkpoint exists but cannot be read.
    fn load(&self) -> SyncResult<Checkpoint>;

    /// Durably replaces the stored checkpoint.
    ///
    /// # Errors
    ///
    /// Returns an error if the checkpoint cannot be persisted.
    fn save(&self, checkpoint: Checkpoint) -> SyncResult<()>;

    /// Loads the record types the stored checkpoint covers.
    ///
    /// # Errors
    ///
    /// Returns an error if the store exists but cannot be read.
    fn load_covered(&self) -> SyncResult<Vec<RecordType>>;

    /// Durably replaces the covered record types.
    ///
    /// # Errors
    ///
    /// Returns an error if the types cannot be persisted.
    fn save_covered(&self, types: &[RecordType]) -> SyncResult<()>;
}

/// In-memory checkpoint, lost on restart.
#[derive(Debug, Default)]
pub struct MemoryCheckpointStore {
    value: Mutex<Checkpoint>,
    covered: Mutex<Vec<RecordType>>,
}

impl MemoryCheckpointStore {
    /// Creates a store at checkpoint zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store at `checkpoint`.
    pub fn starting_at(checkpoint: Checkpoint) -> Self {
        Self {
            value: Mutex::new(checkpoint),
            covered: Mutex::new(Vec::new()),
        }
    }

    /// Creates a store at `checkpoint` that already covers `types`.
    pub fn covering(checkpoint: Checkpoint, types: impl IntoIterator<Item = RecordType>) -> Self {
        Self {
            value: Mutex::new(checkpoint),
            covered: Mutex::new(types.into_iter().collect()),
        }
    }
}

impl CheckpointStore for MemoryCheckpointStore {
    fn load(&self) -> SyncResult<Checkpoint> {
        Ok(*self.value.lock())
    }

    fn save(&self, checkpoint: Checkpoint) -> SyncResult<()> {
        *self.value.lock() = checkpoint;
        Ok(())
    }

    fn load_covered(&self) -> SyncResult<Vec<RecordType>> {
        Ok(self.covered.lock().clone())
    }

    fn save_covered(&self, types: &[RecordType]) -> SyncResult<()> {
        *self.covered.lock() = types.to_vec();
        Ok(())
    }
}

const FORMAT_VERSION: u8 = 1;

#[derive(Serialize, Deserialize)]
struct CheckpointFile {
    version: u8,
    checkpoint: Checkpoint,
    #[serde(default)]
    covered: Vec<RecordType>,
}

impl CheckpointFile {
    fn empty() -> Self {
        Self {
            version: FORMAT_VERSION,
            checkpoint: Checkpoint::ZERO,
            covered: Vec::new(),
        }
    }
}

/// Checkpoint stored in a single file.
///
/// Writes go to a temporary sibling, are fsynced, renamed over the target
/// and the directory is fsynced, so a crash leaves either the old or the new
/// value.
#[derive(Debug)]
pub struct FileCheckpointStore {
    path: PathBuf,
    temp_path: PathBuf,
    lock: Mutex<()>,
}

impl FileCheckpointStore {
    /// Creates a store backed by `path`. The file need not exist.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let mut temp = path.clone().into_os_string();
        temp.push(".tmp");
        Self {
            path,
            temp_path: PathBuf::from(temp),
            lock: Mutex::new(()),
        }
    }

    /// Returns the checkpoint file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_file(&self) -> SyncResult<CheckpointFile> {
        let data = match fs::read(&self.path) {
            Ok(data) => data,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(CheckpointFile::empty()),
            Err(e) => return Err(e.into()),
        };
        if data.is_empty() {
            return Ok(CheckpointFile::empty());
        }

        let file: CheckpointFile = from_cbor(&data)?;
        if file.version != FORMAT_VERSION {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("unsupported checkpoint format version {}", file.version),
            )
            .into());
        }
        Ok(file)
    }

    fn write_file(&self, contents: &CheckpointFile) -> SyncResult<()> {
        let data = to_cbor(contents)?;

        let mut file = File::create(&self.temp_path)?;
        file.write_all(&data)?;
        file.sync_all()?;
        drop(file);

        fs::rename(&self.temp_path, &self.path)?;
        self.sync_directory()?;
        Ok(())
    }

    #[cfg(unix)]
    fn sync_directory(&self) -> io::Result<()> {
        match self.path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => File::open(dir)?.sync_all(),
            _ => File::open(".")?.sync_all(),
        }
    }

    #[cfg(not(unix))]
    fn sync_directory(&self) -> io::Result<()> {
        Ok(())
    }
}

impl CheckpointStore for FileCheckpointStore {
    fn load(&self) -> SyncResult<Checkpoint> {
        let _guard = self.lock.lock();
        Ok(self.read_file()?.checkpoint)
    }

    fn save(&self, checkpoint: Checkpoint) -> SyncResult<()> {
        let _guard = self.lock.lock();
        let mut file = self.read_file()?;
        file.checkpoint = checkpoint;
        self.write_file(&file)
    }

    fn load_covered(&self) -> SyncResult<Vec<RecordType>> {
        let _guard = self.lock.lock();
        Ok(self.read_file()?.covered)
    }

    fn save_covered(&self, types: &[RecordType]) -> SyncResult<()> {
        let _guard = self.lock.lock();
        let mut file = self.read_file()?;
        file.covered = types.to_vec();
        self.write_file(&file)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SyncError;

    #[test]
    fn memory_store() {
        let store = MemoryCheckpointStore::new();
        assert_eq!(store.load().unwrap(), Checkpoint::ZERO);
        store.save(Checkpoint::new(9)).unwrap();
        assert_eq!(store.load().unwrap(), Checkpoint::new(9));

        assert!(store.load_covered().unwrap().is_empty());
        store.save_covered(&[RecordType::new("Book")]).unwrap();
        assert_eq!(store.load_covered().unwrap(), vec![RecordType::new("Book")]);
    }

    #[test]
    fn missing_file_means_full_resync() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCheckpointStore::new(dir.path().join("checkpoint"));
        assert_eq!(store.load().unwrap(), Checkpoint::ZERO);
    }

    #[test]
    fn file_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("checkpoint");

        FileCheckpointStore::new(&path)
            .save(Checkpoint::new(42))
            .unwrap();
        let reopened = FileCheckpointStore::new(&path);
        assert_eq!(reopened.load().unwrap(), Checkpoint::new(42));
        assert!(!dir.path().join("checkpoint.tmp").exists());

        reopened.save(Checkpoint::new(43)).unwrap();
        assert_eq!(reopened.load().unwrap(), Checkpoint::new(43));
    }

    #[test]
    fn covered_types_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("checkpoint");

        let store = FileCheckpointStore::new(&path);
        assert!(store.load_covered().unwrap().is_empty());
        store.save(Checkpoint::new(7)).unwrap();
        store
            .save_covered(&[RecordType::new("Book"), RecordType::new("Author")])
            .unwrap();

        let reopened = FileCheckpointStore::new(&path);
        assert_eq!(reopened.load().unwrap(), Checkpoint::new(7));
        assert_eq!(
            reopened.load_covered().unwrap(),
            vec![RecordType::new("Book"), RecordType::new("Author")]
        );

        // Saving the checkpoint keeps the covered types.
        reopened.save(Checkpoint::new(8)).unwrap();
        assert_eq!(reopened.load_covered().unwrap().len(), 2);
    }

    #[test]
    fn corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("checkpoint");
        fs::write(&path, b"\xff\x00garbage").unwrap();

        let result = FileCheckpointStore::new(&path).load();
        assert!(matches!(result, Err(SyncError::Codec(_))));
    }
}
