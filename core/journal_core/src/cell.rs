//! A value mirrored to one key of a [`KvStore`].
//!
//! A cell is written back as soon as it is loaded. Later mutations swap the
//! in-memory value first and the owner writes the encoded value afterwards
//! (see `Journal::commit`). The in-memory value stays authoritative for the
//! session even when the write fails.

use serde::{de::DeserializeOwned, Serialize};
use tracing::{error, warn};

use crate::store::{KvStore, StoreError};

#[derive(Debug, thiserror::Error)]
pub enum CellError {
    #[error("store: {0}")]
    Store(#[from] StoreError),
    #[error("stored value for '{key}' is corrupt: {source}")]
    Parse {
        key: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("serialize '{key}': {source}")]
    Serialize {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Whether the write that followed a mutation reached the store.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PersistOutcome {
    Written,
    Failed,
}

pub struct PersistentCell<T> {
    key: &'static str,
    value: T,
}

impl<T> PersistentCell<T>
where
    T: Serialize + DeserializeOwned,
{
    /// Read and parse the stored value. `Ok(None)` when the key is absent.
    pub fn try_load(store: &dyn KvStore, key: &str) -> Result<Option<T>, CellError> {
        let Some(raw) = store.get(key)? else {
            return Ok(None);
        };
        serde_json::from_str(&raw)
            .map(Some)
            .map_err(|source| CellError::Parse {
                key: key.to_string(),
                source,
            })
    }

    /// Load `key`, falling back to `default` when it is missing or unreadable,
    /// then write the held value back.
    pub fn load(store: &mut dyn KvStore, key: &'static str, default: T) -> Self {
        let value = match Self::try_load(store, key) {
            Ok(Some(v)) => v,
            Ok(None) => default,
            Err(err) => {
                warn!("load '{key}' failed, using default: {err}");
                default
            }
        };
        let cell = Self { key, value };
        cell.persist(store);
        cell
    }

    pub fn get(&self) -> &T {
        &self.value
    }

    /// Swap the in-memory value without writing. Callers that batch several
    /// cells into one store write use this together with [`Self::encode`].
    pub(crate) fn set_unpersisted(&mut self, value: T) {
        self.value = value;
    }

    pub fn encode(&self) -> Result<String, CellError> {
        serde_json::to_string(&self.value).map_err(|source| CellError::Serialize {
            key: self.key.to_string(),
            source,
        })
    }

    fn persist(&self, store: &mut dyn KvStore) -> PersistOutcome {
        let written = self
            .encode()
            .and_then(|raw| store.put(self.key, &raw).map_err(CellError::from));
        match written {
            Ok(()) => PersistOutcome::Written,
            Err(err) => {
                error!("persist '{}' failed: {err}", self.key);
                PersistOutcome::Failed
            }
        }
    }
}
