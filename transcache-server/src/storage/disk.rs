//! Disk Storage
//!
//! Append-only data file plus an index mapping each key to the location of
//! its latest value. The index is kept in memory and persisted every few
//! writes and on drop.

use super::BackendStorage;
use crate::core::error::Result;
use crate::core::CacheKey;
use parking_lot::{Mutex, RwLock};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{debug, info, warn};

const DATA_FILE: &str = "cache.dat";
const INDEX_FILE: &str = "index.bin";

/// Location of a value inside the data file
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct Slot {
    offset: u64,
    size: u64,
}

/// Disk storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiskStorageConfig {
    pub directory: PathBuf,
    /// Number of writes between index saves
    #[serde(default = "default_index_save_interval")]
    pub index_save_interval: usize,
}

fn default_index_save_interval() -> usize {
    100
}

impl Default for DiskStorageConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("./data/cache"),
            index_save_interval: default_index_save_interval(),
        }
    }
}

struct DataFile {
    file: File,
    offset: u64,
}

/// Disk-backed store; keys and values are encoded with bincode
pub struct DiskStorage<K, V>
where
    K: CacheKey + Serialize + DeserializeOwned,
    V: Serialize + DeserializeOwned,
{
    config: DiskStorageConfig,
    index: RwLock<HashMap<K, Slot>>,
    data: Mutex<DataFile>,
    writes_since_save: AtomicUsize,
    _value: PhantomData<fn() -> V>,
}

impl<K, V> DiskStorage<K, V>
where
    K: CacheKey + Serialize + DeserializeOwned,
    V: Serialize + DeserializeOwned,
{
    /// Create or open the store in the configured directory
    pub fn open(config: DiskStorageConfig) -> Result<Self> {
        fs::create_dir_all(&config.directory)?;

        let data_path = config.directory.join(DATA_FILE);
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&data_path)?;
        let offset = file.metadata()?.len();

        let index = Self::load_index(&config.directory)?;
        info!(
            "Disk storage opened at {:?} ({} entries, {} bytes)",
            config.directory,
            index.len(),
            offset
        );

        Ok(Self {
            config,
            index: RwLock::new(index),
            data: Mutex::new(DataFile { file, offset }),
            writes_since_save: AtomicUsize::new(0),
            _value: PhantomData,
        })
    }

    /// Load index from disk
    fn load_index(directory: &Path) -> Result<HashMap<K, Slot>> {
        let index_path = directory.join(INDEX_FILE);
        if !index_path.exists() {
            return Ok(HashMap::new());
        }

        let bytes = fs::read(&index_path)?;
        let (entries, _): (Vec<(K, Slot)>, usize) =
            bincode::serde::decode_from_slice(&bytes, bincode::config::standard())?;
        Ok(entries.into_iter().collect())
    }

    /// Save index and sync the data file
    pub fn persist(&self) -> Result<()> {
        let entries: Vec<(K, Slot)> = self
            .index
            .read()
            .iter()
            .map(|(key, slot)| (key.clone(), *slot))
            .collect();
        let bytes = bincode::serde::encode_to_vec(&entries, bincode::config::standard())?;

        // Write-then-rename so a crash never leaves a torn index
        let index_path = self.config.directory.join(INDEX_FILE);
        let tmp_path = index_path.with_extension("tmp");
        fs::write(&tmp_path, bytes)?;
        fs::rename(&tmp_path, &index_path)?;

        self.data.lock().file.sync_all()?;
        self.writes_since_save.store(0, Ordering::Relaxed);
        debug!("Disk storage index saved ({} entries)", entries.len());
        Ok(())
    }

    fn read_value(&self, slot: Slot) -> Result<V> {
        let mut buffer = vec![0u8; slot.size as usize];
        {
            let mut data = self.data.lock();
            data.file.seek(SeekFrom::Start(slot.offset))?;
            data.file.read_exact(&mut buffer)?;
        }
        let (value, _) =
            bincode::serde::decode_from_slice(&buffer, bincode::config::standard())?;
        Ok(value)
    }

    fn append_value(&self, value: &V) -> Result<Slot> {
        let bytes = bincode::serde::encode_to_vec(value, bincode::config::standard())?;

        let mut data = self.data.lock();
        let offset = data.offset;
        data.file.seek(SeekFrom::Start(offset))?;
        data.file.write_all(&bytes)?;
        data.file.flush()?;
        data.offset += bytes.len() as u64;

        Ok(Slot {
            offset,
            size: bytes.len() as u64,
        })
    }

    /// Save the index every `index_save_interval` writes
    fn note_write(&self) {
        let writes = self.writes_since_save.fetch_add(1, Ordering::Relaxed) + 1;
        if writes >= self.config.index_save_interval.max(1) {
            if let Err(e) = self.persist() {
                warn!("Disk storage index save failed: {}", e);
            }
        }
    }

    pub fn stats(&self) -> DiskStorageStats {
        let index = self.index.read();
        let file_bytes = self.data.lock().offset;
        let live_bytes = index.values().map(|slot| slot.size).sum();

        DiskStorageStats {
            entries: index.len(),
            file_bytes,
            live_bytes,
        }
    }
}

impl<K, V> BackendStorage<K, V> for DiskStorage<K, V>
where
    K: CacheKey + Serialize + DeserializeOwned,
    V: Serialize + DeserializeOwned,
{
    fn get(&self, key: &K) -> Option<V> {
        let slot = self.index.read().get(key).copied()?;

        match self.read_value(slot) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!("Disk storage read failed for key {:?}: {}", key, e);
                None
            }
        }
    }

    fn add(&self, key: K, value: V) {
        match self.append_value(&value) {
            Ok(slot) => {
                self.index.write().insert(key, slot);
                self.note_write();
            }
            // A lost write degrades to a miss, which the chain recovers from
            Err(e) => {
                warn!("Disk storage write failed for key {:?}: {}", key, e);
                self.index.write().remove(&key);
            }
        }
    }

    fn remove(&self, key: &K) {
        if self.index.write().remove(key).is_some() {
            self.note_write();
        }
    }

    fn len(&self) -> usize {
        self.index.read().len()
    }
}

impl<K, V> Drop for DiskStorage<K, V>
where
    K: CacheKey + Serialize + DeserializeOwned,
    V: Serialize + DeserializeOwned,
{
    fn drop(&mut self) {
        if let Err(e) = self.persist() {
            warn!("Disk storage index save on drop failed: {}", e);
        }
    }
}

/// Disk storage statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiskStorageStats {
    pub entries: usize,
    /// Size of the data file, including superseded values
    pub file_bytes: u64,
    /// Bytes referenced by the index
    pub live_bytes: u64,
}
