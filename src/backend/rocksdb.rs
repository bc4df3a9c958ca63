//! Disk-backed cache backend on top of RocksDB.
//!
//! Every operation runs in its own optimistic transaction on Tokio's
//! blocking pool:
//!
//! - `get` opens a transaction, copies the value out and drops the
//!   transaction without committing.
//! - `put` and `delete` mutate inside a transaction and commit it. A failed
//!   commit fails the operation and leaves the stored value untouched.
//!
//! # Example
//!
//! ```no_run
//! use std::collections::HashMap;
//! use tower_edge_cache::backend::BackendKind;
//!
//! # fn example() -> Result<(), tower_edge_cache::error::CacheError> {
//! let mut options = HashMap::new();
//! options.insert("path".to_owned(), "/var/cache/edge".to_owned());
//! options.insert("max_open_files".to_owned(), "256".to_owned());
//! let backend = BackendKind::RocksDb.open(&options)?;
//! # drop(backend);
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use ::rocksdb::{
    Env, OptimisticTransactionDB, OptimisticTransactionOptions, Options, WriteOptions,
};
use async_trait::async_trait;
use bytes::Bytes;

use super::options::{OptionField, Setter};
use super::CacheBackend;
use crate::error::CacheError;

const IN_MEMORY_PATH: &str = "tower-edge-cache";

/// Options accepted by [`RocksDbBackend`], named after RocksDB's tunables.
#[derive(Debug, Clone)]
pub struct RocksDbOptions {
    pub path: Option<String>,
    /// Keep all data in RocksDB's in-memory environment.
    pub in_memory: bool,
    pub create_if_missing: bool,
    pub max_open_files: Option<i32>,
    pub write_buffer_size: Option<usize>,
    pub max_write_buffer_number: Option<i32>,
    pub max_background_jobs: Option<i32>,
    pub increase_parallelism: Option<i32>,
    pub use_fsync: Option<bool>,
    pub paranoid_checks: Option<bool>,
    pub bytes_per_sync: Option<u64>,
    /// Sync the WAL on every committed write.
    pub sync_writes: bool,
}

impl Default for RocksDbOptions {
    fn default() -> Self {
        Self {
            path: None,
            in_memory: false,
            create_if_missing: true,
            max_open_files: None,
            write_buffer_size: None,
            max_write_buffer_number: None,
            max_background_jobs: None,
            increase_parallelism: None,
            use_fsync: None,
            paranoid_checks: None,
            bytes_per_sync: None,
            sync_writes: false,
        }
    }
}

pub(crate) const OPTION_FIELDS: &[OptionField<RocksDbOptions>] = &[
    OptionField {
        name: "path",
        setter: Setter::Str(|o, v| o.path = Some(v)),
    },
    OptionField {
        name: "in_memory",
        setter: Setter::Bool(|o, v| o.in_memory = v),
    },
    OptionField {
        name: "create_if_missing",
        setter: Setter::Bool(|o, v| o.create_if_missing = v),
    },
    OptionField {
        name: "max_open_files",
        setter: Setter::I32(|o, v| o.max_open_files = Some(v)),
    },
    OptionField {
        name: "write_buffer_size",
        setter: Setter::Usize(|o, v| o.write_buffer_size = Some(v)),
    },
    OptionField {
        name: "max_write_buffer_number",
        setter: Setter::I32(|o, v| o.max_write_buffer_number = Some(v)),
    },
    OptionField {
        name: "max_background_jobs",
        setter: Setter::I32(|o, v| o.max_background_jobs = Some(v)),
    },
    OptionField {
        name: "increase_parallelism",
        setter: Setter::I32(|o, v| o.increase_parallelism = Some(v)),
    },
    OptionField {
        name: "use_fsync",
        setter: Setter::Bool(|o, v| o.use_fsync = Some(v)),
    },
    OptionField {
        name: "paranoid_checks",
        setter: Setter::Bool(|o, v| o.paranoid_checks = Some(v)),
    },
    OptionField {
        name: "bytes_per_sync",
        setter: Setter::U64(|o, v| o.bytes_per_sync = Some(v)),
    },
    OptionField {
        name: "sync_writes",
        setter: Setter::Bool(|o, v| o.sync_writes = v),
    },
];

struct Inner {
    db: OptimisticTransactionDB,
    sync_writes: bool,
    // Must outlive `db` when the in-memory environment is used.
    _env: Option<Env>,
}

/// RocksDB-backed [`CacheBackend`].
///
/// RocksDB's handle is internally thread-safe; clones share it through an
/// `Arc` and the database closes when the last clone is dropped.
#[derive(Clone)]
pub struct RocksDbBackend {
    inner: Arc<Inner>,
    path: String,
}

impl RocksDbBackend {
    /// Opens (or creates) a database at `path` with default tuning.
    pub fn open_path(path: impl Into<String>) -> Result<Self, CacheError> {
        Self::open(RocksDbOptions {
            path: Some(path.into()),
            ..RocksDbOptions::default()
        })
    }

    pub fn open(opts: RocksDbOptions) -> Result<Self, CacheError> {
        let mut db_opts = Options::default();
        db_opts.create_if_missing(opts.create_if_missing);
        if let Some(files) = opts.max_open_files {
            db_opts.set_max_open_files(files);
        }
        if let Some(size) = opts.write_buffer_size {
            db_opts.set_write_buffer_size(size);
        }
        if let Some(count) = opts.max_write_buffer_number {
            db_opts.set_max_write_buffer_number(count);
        }
        if let Some(jobs) = opts.max_background_jobs {
            db_opts.set_max_background_jobs(jobs);
        }
        if let Some(threads) = opts.increase_parallelism {
            db_opts.increase_parallelism(threads);
        }
        if let Some(fsync) = opts.use_fsync {
            db_opts.set_use_fsync(fsync);
        }
        if let Some(checks) = opts.paranoid_checks {
            db_opts.set_paranoid_checks(checks);
        }
        if let Some(bytes) = opts.bytes_per_sync {
            db_opts.set_bytes_per_sync(bytes);
        }

        let env = if opts.in_memory {
            let env = Env::mem_env()?;
            db_opts.set_env(&env);
            Some(env)
        } else {
            None
        };

        let path = match (opts.path, opts.in_memory) {
            (Some(path), _) => path,
            (None, true) => IN_MEMORY_PATH.to_owned(),
            (None, false) => {
                return Err(CacheError::config(
                    "rocksdb option `path` is required unless `in_memory` is true",
                ))
            }
        };

        let db = OptimisticTransactionDB::open(&db_opts, &path).map_err(|err| {
            CacheError::Backend(format!("failed to open rocksdb at `{path}`: {err}"))
        })?;

        tracing::debug!(path = %path, in_memory = opts.in_memory, "rocksdb backend opened");

        Ok(Self {
            inner: Arc::new(Inner {
                db,
                sync_writes: opts.sync_writes,
                _env: env,
            }),
            path,
        })
    }

    /// Database path (virtual when running in memory).
    pub fn path(&self) -> &str {
        &self.path
    }

    async fn blocking<T, F>(&self, op: F) -> Result<T, CacheError>
    where
        T: Send + 'static,
        F: FnOnce(&Inner) -> Result<T, CacheError> + Send + 'static,
    {
        let inner = self.inner.clone();
        tokio::task::spawn_blocking(move || op(&inner))
            .await
            .map_err(|err| CacheError::Backend(format!("rocksdb task failed: {err}")))?
    }
}

impl Inner {
    fn write_transaction(&self) -> ::rocksdb::Transaction<'_, OptimisticTransactionDB> {
        let mut write_opts = WriteOptions::default();
        write_opts.set_sync(self.sync_writes);
        self.db
            .transaction_opt(&write_opts, &OptimisticTransactionOptions::default())
    }
}

#[async_trait]
impl CacheBackend for RocksDbBackend {
    async fn get(&self, key: &str) -> Result<Bytes, CacheError> {
        let key = key.to_owned();
        self.blocking(move |inner| {
            let txn = inner.db.transaction();
            let value = txn.get(key.as_bytes())?;
            drop(txn);
            value.map(Bytes::from).ok_or(CacheError::NotFound)
        })
        .await
    }

    async fn put(&self, key: &str, value: Bytes) -> Result<(), CacheError> {
        let key = key.to_owned();
        self.blocking(move |inner| {
            let txn = inner.write_transaction();
            txn.put(key.as_bytes(), &value)?;
            txn.commit()?;
            Ok(())
        })
        .await
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        let key = key.to_owned();
        self.blocking(move |inner| {
            let txn = inner.write_transaction();
            txn.delete(key.as_bytes())?;
            txn.commit()?;
            Ok(())
        })
        .await
    }
}
