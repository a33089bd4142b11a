use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("key-value backend: {0}")]
    Backend(String),
    #[error("corrupt value at {key}: {source}")]
    Decode {
        key: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to encode value for {key}: {source}")]
    Encode {
        key: String,
        #[source]
        source: serde_json::Error,
    },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Byte-oriented key-value backend the rest of the crate persists through.
pub trait KvStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;
    fn set(&self, key: &str, value: &[u8]) -> Result<(), StoreError>;
    fn delete(&self, key: &str) -> Result<(), StoreError>;

    fn exists(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.get(key)?.is_some())
    }
}

/// JSON helpers over any [`KvStore`], mirroring the Spin store's `get_json`/`set_json`.
pub trait KvStoreExt: KvStore {
    fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StoreError> {
        match self.get(key)? {
            Some(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|source| StoreError::Decode {
                    key: key.to_string(),
                    source,
                }),
            None => Ok(None),
        }
    }

    fn set_json<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec(value).map_err(|source| StoreError::Encode {
            key: key.to_string(),
            source,
        })?;
        self.set(key, &bytes)
    }
}

impl<S: KvStore + ?Sized> KvStoreExt for S {}

/// Process-local store used by tests.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, Vec<u8>>>, StoreError> {
        self.entries
            .lock()
            .map_err(|_| StoreError::Backend("memory store lock poisoned".to_string()))
    }
}

impl KvStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.lock()?.get(key).cloned())
    }

    fn set(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        self.lock()?.insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.lock()?.remove(key);
        Ok(())
    }
}

#[cfg(target_arch = "wasm32")]
pub use spin::SpinStore;

#[cfg(target_arch = "wasm32")]
mod spin {
    use super::{KvStore, StoreError};
    use spin_sdk::key_value::Store;

    /// The component's default Spin key-value store.
    pub struct SpinStore(Store);

    impl SpinStore {
        pub fn open_default() -> Result<Self, StoreError> {
            Store::open_default()
                .map(SpinStore)
                .map_err(|e| StoreError::Backend(e.to_string()))
        }
    }

    impl KvStore for SpinStore {
        fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
            self.0.get(key).map_err(|e| StoreError::Backend(e.to_string()))
        }

        fn set(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
            self.0
                .set(key, value)
                .map_err(|e| StoreError::Backend(e.to_string()))
        }

        fn delete(&self, key: &str) -> Result<(), StoreError> {
            self.0.delete(key).map_err(|e| StoreError::Backend(e.to_string()))
        }

        fn exists(&self, key: &str) -> Result<bool, StoreError> {
            self.0.exists(key).map_err(|e| StoreError::Backend(e.to_string()))
        }
    }
}

#[cfg(not(target_arch = "wasm32"))]
pub use fs::FsStore;

#[cfg(not(target_arch = "wasm32"))]
mod fs {
    use super::{KvStore, StoreError};
    use sha2::{Digest, Sha256};
    use std::io::{ErrorKind, Write};
    use std::path::{Path, PathBuf};

    /// Percent-encoded keys longer than this are stored under a digest name.
    const MAX_PLAIN_NAME: usize = 200;

    /// Where a key lives on disk.
    enum Slot {
        /// File named after the percent-encoded key, holding the raw value.
        Plain(PathBuf),
        /// File named `=<sha256 hex>`, holding a length-prefixed key then the value.
        /// `=` is always escaped by the encoder, so the two name spaces never meet.
        Hashed(PathBuf),
    }

    impl Slot {
        fn path(&self) -> &Path {
            match self {
                Slot::Plain(path) | Slot::Hashed(path) => path,
            }
        }
    }

    fn unwrap_hashed(key: &str, mut bytes: Vec<u8>) -> Option<Vec<u8>> {
        let len = u32::from_be_bytes(bytes.get(..4)?.try_into().ok()?) as usize;
        let stored = bytes.get(4..4 + len)?;
        if stored != key.as_bytes() {
            return None;
        }
        Some(bytes.split_off(4 + len))
    }

    /// One file per key under a data directory. Writes go through a temp file
    /// in the same directory and are renamed into place.
    #[derive(Debug, Clone)]
    pub struct FsStore {
        root: PathBuf,
    }

    impl FsStore {
        pub fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
            let root = root.into();
            std::fs::create_dir_all(&root)?;
            Ok(Self { root })
        }

        pub fn root(&self) -> &Path {
            &self.root
        }

        fn slot_for(&self, key: &str) -> Slot {
            let encoded = urlencoding::encode(key);
            if encoded.len() <= MAX_PLAIN_NAME {
                Slot::Plain(self.root.join(encoded.as_ref()))
            } else {
                let digest = Sha256::digest(key.as_bytes());
                Slot::Hashed(self.root.join(format!("={:x}", digest)))
            }
        }
    }

    impl KvStore for FsStore {
        fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
            let slot = self.slot_for(key);
            match std::fs::read(slot.path()) {
                Ok(bytes) => match slot {
                    Slot::Plain(_) => Ok(Some(bytes)),
                    Slot::Hashed(_) => Ok(unwrap_hashed(key, bytes)),
                },
                Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
                Err(e) => Err(e.into()),
            }
        }

        fn set(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
            let slot = self.slot_for(key);
            let mut tmp = tempfile::NamedTempFile::new_in(&self.root)?;
            if let Slot::Hashed(_) = slot {
                tmp.write_all(&(key.len() as u32).to_be_bytes())?;
                tmp.write_all(key.as_bytes())?;
            }
            tmp.write_all(value)?;
            tmp.as_file().sync_all()?;
            tmp.persist(slot.path()).map_err(|e| e.error)?;
            Ok(())
        }

        fn delete(&self, key: &str) -> Result<(), StoreError> {
            match std::fs::remove_file(self.slot_for(key).path()) {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
                Err(e) => Err(e.into()),
            }
        }

        fn exists(&self, key: &str) -> Result<bool, StoreError> {
            match self.slot_for(key) {
                Slot::Plain(path) => Ok(path.is_file()),
                Slot::Hashed(_) => Ok(self.get(key)?.is_some()),
            }
        }
    }
}
