use std::{
    path::Path,
    sync::{Arc, Mutex},
};

use rocksdb::{prelude::*, DBCompressionType, Direction, IteratorMode, WriteBatch, DB};
use tracing::debug;

use super::{KeyValue, StoreKeyValue};

pub type Entry = (Box<[u8]>, Box<[u8]>);

/// The plane's rocksdb. Every table lives under its own one-byte key prefix, see
/// `store/schema.rs`.
#[derive(Clone, Debug)]
pub struct Store {
    pub(crate) db: Arc<DB>,
    /// Serializes read-modify-write sequences such as id allocation and upserts.
    pub(crate) upsert_lock: Arc<Mutex<()>>,
}

impl Store {
    /// Opens or creates the database at `path`.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, String> {
        let path = path.as_ref();
        let mut options = Options::default();
        options.create_if_missing(true);
        options.set_compression_type(DBCompressionType::Lz4);
        let db = DB::open(&options, path)
            .map_err(|e| format!("failed to open store at {:?}: {}", path, e))?;
        debug!(?path, "store opened");
        Ok(Self {
            db: Arc::new(db),
            upsert_lock: Arc::new(Mutex::new(())),
        })
    }

    pub fn get<K: AsRef<[u8]>>(&self, key: K) -> Option<Vec<u8>> {
        self.db
            .get(key.as_ref())
            .map(|v| v.map(|vi| vi.to_vec()))
            .expect("get should be OK")
    }

    pub fn batch(&self) -> Batch {
        Batch {
            db: Arc::clone(&self.db),
            wb: WriteBatch::default(),
        }
    }

    /// Entries whose key starts with `prefix`, in ascending key order.
    pub fn prefix_iterator<'a>(&'a self, prefix: &'a [u8]) -> impl Iterator<Item = Entry> + 'a {
        self.db
            .get_iter(
                &ReadOptions::default(),
                IteratorMode::From(prefix, Direction::Forward),
            )
            .take_while(move |(key, _)| key.starts_with(prefix))
    }

    /// The entry with the greatest key under `prefix`. Time series keys end with a
    /// big-endian timestamp, so this is the latest row of a series.
    pub fn last_with_prefix(&self, prefix: &[u8]) -> Option<Entry> {
        let Some(upper) = upper_bound(prefix) else {
            return self.prefix_iterator(prefix).last();
        };
        self.db
            .get_iter(
                &ReadOptions::default(),
                IteratorMode::From(&upper, Direction::Reverse),
            )
            .find(|(key, _)| key.as_ref() < upper.as_slice())
            .filter(|(key, _)| key.starts_with(prefix))
    }
}

/// The smallest key greater than every key starting with `prefix`, if there is one.
fn upper_bound(prefix: &[u8]) -> Option<Vec<u8>> {
    let position = prefix.iter().rposition(|byte| *byte != u8::MAX)?;
    let mut upper = prefix[..=position].to_vec();
    upper[position] += 1;
    Some(upper)
}

/// Writes applied atomically on `commit`.
pub struct Batch {
    db: Arc<DB>,
    wb: WriteBatch,
}

impl Batch {
    pub fn put_kv(&mut self, key_value: KeyValue) {
        self.put(key_value.key(), key_value.value());
    }

    pub fn put<K: AsRef<[u8]>, V: AsRef<[u8]>>(&mut self, key: K, value: V) {
        self.wb.put(key, value).expect("put should be OK")
    }

    pub fn delete<K: AsRef<[u8]>>(&mut self, key: K) {
        self.wb.delete(key.as_ref()).expect("delete should be OK")
    }

    pub fn commit(self) {
        self.db.write(&self.wb).expect("commit should be OK")
    }
}
