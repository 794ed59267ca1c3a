//! A transactional, bucket-organized key-value store.
//!
//! Grounded on `labs/31-key-value-store`'s log-structured `KvStore`: every
//! mutation is appended to a log file and an in-memory `HashMap` indexes
//! keys to byte offsets so reads don't scan the file. This crate generalizes
//! that single-log design to the seven named buckets the node needs
//! (`blocks`, `chain`, `txindex`, `txspent`, `mempool`, `utxo`, `peers`), and
//! adds a batched `transact` entry point so multi-bucket updates (adding a
//! block touches at least four buckets) commit atomically under one writer
//! lock.
//!
//! Concurrency model: one `tokio::sync::RwLock` per bucket lets readers
//! proceed concurrently; `transact` takes every bucket's write lock for the
//! duration of the batch, realizing the single-writer/multi-reader
//! discipline the node's design calls for. An advisory file lock
//! (`<data_dir>/.lock`) additionally guards against a second process opening
//! the same data directory.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("encoding error: {0}")]
    Encoding(#[from] bincode::Error),
    #[error("data directory is already locked by another process")]
    LockTimeout,
    #[error("corrupted log record in bucket {0}")]
    CorruptedRecord(&'static str),
}

/// The named buckets the node keeps, one log file each.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Bucket {
    Blocks,
    Chain,
    TxIndex,
    TxSpent,
    Mempool,
    Utxo,
    Peers,
}

impl Bucket {
    const ALL: [Bucket; 7] = [
        Bucket::Blocks,
        Bucket::Chain,
        Bucket::TxIndex,
        Bucket::TxSpent,
        Bucket::Mempool,
        Bucket::Utxo,
        Bucket::Peers,
    ];

    fn filename(self) -> &'static str {
        match self {
            Bucket::Blocks => "blocks.log",
            Bucket::Chain => "chain.log",
            Bucket::TxIndex => "txindex.log",
            Bucket::TxSpent => "txspent.log",
            Bucket::Mempool => "mempool.log",
            Bucket::Utxo => "utxo.log",
            Bucket::Peers => "peers.log",
        }
    }

    fn name(self) -> &'static str {
        match self {
            Bucket::Blocks => "blocks",
            Bucket::Chain => "chain",
            Bucket::TxIndex => "txindex",
            Bucket::TxSpent => "txspent",
            Bucket::Mempool => "mempool",
            Bucket::Utxo => "utxo",
            Bucket::Peers => "peers",
        }
    }
}

#[derive(Serialize, Deserialize)]
enum Record {
    Put { key: Vec<u8>, value: Vec<u8> },
    Delete { key: Vec<u8> },
}

/// A single bucket's log file plus its in-memory offset index.
struct BucketLog {
    path: PathBuf,
    writer: BufWriter<File>,
    index: HashMap<Vec<u8>, u64>,
}

impl BucketLog {
    fn open(path: PathBuf) -> Result<Self, StoreError> {
        let write_file = OpenOptions::new()
            .write(true)
            .append(true)
            .create(true)
            .open(&path)?;
        let mut log = BucketLog {
            path,
            writer: BufWriter::new(write_file),
            index: HashMap::new(),
        };
        log.rebuild_index()?;
        tracing::trace!(path = ?log.path, entries = log.index.len(), "bucket log opened");
        Ok(log)
    }

    fn rebuild_index(&mut self) -> Result<(), StoreError> {
        let mut reader = File::open(&self.path)?;
        let mut pos = 0u64;
        loop {
            let mut len_bytes = [0u8; 4];
            match reader.read_exact(&mut len_bytes) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(e.into()),
            }
            let len = u32::from_le_bytes(len_bytes) as usize;
            let mut buf = vec![0u8; len];
            reader.read_exact(&mut buf)?;
            let record: Record = bincode::deserialize(&buf)?;
            let record_start = pos;
            pos += 4 + len as u64;
            match record {
                Record::Put { key, .. } => {
                    self.index.insert(key, record_start);
                }
                Record::Delete { key } => {
                    self.index.remove(&key);
                }
            }
        }
        Ok(())
    }

    fn append(&mut self, record: &Record) -> Result<u64, StoreError> {
        let pos = self.writer.seek(SeekFrom::End(0))?;
        let encoded = bincode::serialize(record)?;
        self.writer.write_all(&(encoded.len() as u32).to_le_bytes())?;
        self.writer.write_all(&encoded)?;
        self.writer.flush()?;
        Ok(pos)
    }

    fn put(&mut self, key: Vec<u8>, value: Vec<u8>) -> Result<(), StoreError> {
        let pos = self.append(&Record::Put {
            key: key.clone(),
            value,
        })?;
        self.index.insert(key, pos);
        Ok(())
    }

    fn delete(&mut self, key: &[u8]) -> Result<(), StoreError> {
        self.append(&Record::Delete {
            key: key.to_vec(),
        })?;
        self.index.remove(key);
        Ok(())
    }

    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        let Some(&pos) = self.index.get(key) else {
            return Ok(None);
        };
        let mut reader = File::open(&self.path)?;
        reader.seek(SeekFrom::Start(pos))?;
        let mut len_bytes = [0u8; 4];
        reader.read_exact(&mut len_bytes)?;
        let len = u32::from_le_bytes(len_bytes) as usize;
        let mut buf = vec![0u8; len];
        reader.read_exact(&mut buf)?;
        match bincode::deserialize(&buf)? {
            Record::Put { value, .. } => Ok(Some(value)),
            Record::Delete { .. } => Err(StoreError::CorruptedRecord("index pointed at tombstone")),
        }
    }

    fn iterate(&self) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StoreError> {
        let mut out = Vec::with_capacity(self.index.len());
        for key in self.index.keys() {
            if let Some(value) = self.get(key)? {
                out.push((key.clone(), value));
            }
        }
        Ok(out)
    }
}

/// A pending batch of writes accumulated inside a `Store::transact` closure;
/// applied atomically (under the single writer lock) once the closure
/// returns `Ok`.
#[derive(Default)]
pub struct Batch {
    ops: Vec<(Bucket, BatchOp)>,
}

enum BatchOp {
    Put(Vec<u8>, Vec<u8>),
    Delete(Vec<u8>),
}

impl Batch {
    pub fn put(&mut self, bucket: Bucket, key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) {
        self.ops.push((bucket, BatchOp::Put(key.into(), value.into())));
    }

    pub fn put_encoded<T: Serialize>(
        &mut self,
        bucket: Bucket,
        key: impl Into<Vec<u8>>,
        value: &T,
    ) -> Result<(), StoreError> {
        let encoded = bincode::serialize(value)?;
        self.put(bucket, key, encoded);
        Ok(())
    }

    pub fn delete(&mut self, bucket: Bucket, key: impl Into<Vec<u8>>) {
        self.ops.push((bucket, BatchOp::Delete(key.into())));
    }
}

/// The store handle shared across the node. Cheaply cloneable (internally
/// `Arc`-backed by each bucket's lock).
pub struct Store {
    buckets: HashMap<Bucket, RwLock<BucketLog>>,
    write_lock: Mutex<()>,
    _lock_file: File,
}

impl Store {
    /// Open (creating if absent) the store at `data_dir`. Fails with
    /// `LockTimeout` if another process already holds the advisory lock.
    pub async fn open(data_dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        let data_dir = data_dir.as_ref();
        std::fs::create_dir_all(data_dir)?;

        let lock_path = data_dir.join(".lock");
        let lock_file = OpenOptions::new()
            .create(true)
            .write(true)
            .open(&lock_path)?;
        fs2::FileExt::try_lock_exclusive(&lock_file).map_err(|_| StoreError::LockTimeout)?;

        let mut buckets = HashMap::new();
        for bucket in Bucket::ALL {
            let path = data_dir.join(bucket.filename());
            buckets.insert(bucket, RwLock::new(BucketLog::open(path)?));
        }

        Ok(Store {
            buckets,
            write_lock: Mutex::new(()),
            _lock_file: lock_file,
        })
    }

    pub async fn get(&self, bucket: Bucket, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        self.buckets[&bucket].read().await.get(key)
    }

    pub async fn get_decoded<T: DeserializeOwned>(
        &self,
        bucket: Bucket,
        key: &[u8],
    ) -> Result<Option<T>, StoreError> {
        match self.get(bucket, key).await? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    pub async fn iterate(&self, bucket: Bucket) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StoreError> {
        self.buckets[&bucket].read().await.iterate()
    }

    /// Apply a single put outside of an explicit batch (wraps it in a
    /// one-operation transaction).
    pub async fn put(&self, bucket: Bucket, key: &[u8], value: &[u8]) -> Result<(), StoreError> {
        self.transact(|batch| {
            batch.put(bucket, key.to_vec(), value.to_vec());
            Ok(())
        })
        .await
    }

    pub async fn delete(&self, bucket: Bucket, key: &[u8]) -> Result<(), StoreError> {
        self.transact(|batch| {
            batch.delete(bucket, key.to_vec());
            Ok(())
        })
        .await
    }

    /// Run `f` against a fresh `Batch`, then atomically apply every
    /// accumulated operation under the store's single writer lock. If `f`
    /// returns `Err`, nothing is applied.
    pub async fn transact<F, T>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut Batch) -> Result<T, StoreError>,
    {
        let _guard = self.write_lock.lock().await;
        let mut batch = Batch::default();
        let result = f(&mut batch)?;
        for (bucket, op) in batch.ops {
            let mut log = self.buckets[&bucket].write().await;
            match op {
                BatchOp::Put(key, value) => log.put(key, value)?,
                BatchOp::Delete(key) => log.delete(&key)?,
            }
        }
        Ok(result)
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("buckets", &Bucket::ALL.map(Bucket::name))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_then_get_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path()).await.unwrap();
        store.put(Bucket::Blocks, b"k1", b"v1").await.unwrap();
        let got = store.get(Bucket::Blocks, b"k1").await.unwrap();
        assert_eq!(got, Some(b"v1".to_vec()));
    }

    #[tokio::test]
    async fn delete_removes_key() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path()).await.unwrap();
        store.put(Bucket::Peers, b"a", b"1").await.unwrap();
        store.delete(Bucket::Peers, b"a").await.unwrap();
        assert_eq!(store.get(Bucket::Peers, b"a").await.unwrap(), None);
    }

    #[tokio::test]
    async fn transact_applies_multiple_buckets_together() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path()).await.unwrap();
        store
            .transact(|batch| {
                batch.put(Bucket::Blocks, b"b1".to_vec(), b"block".to_vec());
                batch.put(Bucket::Chain, b"c1".to_vec(), b"edge".to_vec());
                Ok(())
            })
            .await
            .unwrap();
        assert_eq!(
            store.get(Bucket::Blocks, b"b1").await.unwrap(),
            Some(b"block".to_vec())
        );
        assert_eq!(
            store.get(Bucket::Chain, b"c1").await.unwrap(),
            Some(b"edge".to_vec())
        );
    }

    #[tokio::test]
    async fn transact_rolls_back_on_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path()).await.unwrap();
        let result: Result<(), StoreError> = store
            .transact(|batch| {
                batch.put(Bucket::Utxo, b"u1".to_vec(), b"x".to_vec());
                Err(StoreError::CorruptedRecord("forced failure"))
            })
            .await;
        assert!(result.is_err());
        assert_eq!(store.get(Bucket::Utxo, b"u1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn index_rebuilds_from_existing_log() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = Store::open(dir.path()).await.unwrap();
            store.put(Bucket::Mempool, b"t1", b"tx").await.unwrap();
        }
        let store2 = Store::open(dir.path()).await.unwrap();
        assert_eq!(
            store2.get(Bucket::Mempool, b"t1").await.unwrap(),
            Some(b"tx".to_vec())
        );
    }

    #[tokio::test]
    async fn second_open_is_locked_out() {
        let dir = tempfile::tempdir().unwrap();
        let _store = Store::open(dir.path()).await.unwrap();
        let second = Store::open(dir.path()).await;
        assert!(matches!(second, Err(StoreError::LockTimeout)));
    }
}
