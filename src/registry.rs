//! Registry of the storage providers shipped with the native crate.
//!
//! | Provider | Adapter |
//! |----------|---------|
//! | `memory` | [`MemoryAdapter`](semindex_core::store::memory::MemoryAdapter) |
//! | `sqlite` | [`SqliteAdapter`] |
//! | `columnar` | [`ColumnarAdapter`] |
//!
//! Each call returns a new registry; callers may register their own
//! providers on it without affecting anyone else.

use std::sync::Arc;

use semindex_core::store::registry::AdapterRegistry;
use semindex_core::store::StorageAdapter;

use crate::columnar_store::{self, ColumnarAdapter};
use crate::sqlite_store::{self, SqliteAdapter};

pub fn builtin_registry() -> AdapterRegistry {
    let mut registry = AdapterRegistry::new();
    registry
        .register(sqlite_store::PROVIDER, || {
            Arc::new(SqliteAdapter::new()) as Arc<dyn StorageAdapter>
        })
        .register(columnar_store::PROVIDER, || {
            Arc::new(ColumnarAdapter::new()) as Arc<dyn StorageAdapter>
        });
    registry
}
