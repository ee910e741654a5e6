//! Schema snapshots and the single-writer holder.
//!
//! A [`SchemaSnapshot`] is immutable once built. The holder stores an
//! `Arc<SchemaSnapshot>` and replaces it wholesale, so a reader either sees
//! the previous snapshot or the next one, never a mix.
//!
//! [`schema_holder`] returns the only [`SchemaWriter`] together with a
//! [`SchemaReader`]. Readers are cheap to clone and should be kept instead of
//! a copied snapshot: a copy goes stale on the next update, a reader does not.

use std::collections::BTreeSet;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::ids::RpcId;

/// Immutable description of the data/type model in effect at a point in time.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaSnapshot {
    version: u64,
    #[serde(default)]
    modules: BTreeSet<String>,
    #[serde(default)]
    rpcs: BTreeSet<RpcId>,
}

impl SchemaSnapshot {
    /// Create an empty snapshot with the given version.
    #[must_use]
    pub fn new(version: u64) -> Self {
        Self {
            version,
            ..Self::default()
        }
    }

    /// Add a module name.
    #[must_use]
    pub fn with_module(mut self, module: impl Into<String>) -> Self {
        let _ = self.modules.insert(module.into());
        self
    }

    /// Add an RPC defined by this schema.
    #[must_use]
    pub fn with_rpc(mut self, rpc: impl Into<RpcId>) -> Self {
        let _ = self.rpcs.insert(rpc.into());
        self
    }

    /// Snapshot version.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Module names in this snapshot.
    pub fn modules(&self) -> &BTreeSet<String> {
        &self.modules
    }

    /// RPCs defined by this snapshot.
    pub fn rpcs(&self) -> &BTreeSet<RpcId> {
        &self.rpcs
    }

    /// Whether the snapshot defines `rpc`.
    pub fn defines_rpc(&self, rpc: &RpcId) -> bool {
        self.rpcs.contains(rpc)
    }
}

type Shared = Arc<RwLock<Arc<SchemaSnapshot>>>;

/// Create a holder seeded with `initial`.
pub fn schema_holder(initial: SchemaSnapshot) -> (SchemaWriter, SchemaReader) {
    let shared: Shared = Arc::new(RwLock::new(Arc::new(initial)));
    (
        SchemaWriter {
            shared: shared.clone(),
        },
        SchemaReader { shared },
    )
}

/// Exclusive write side of the holder. Not `Clone`.
#[derive(Debug)]
pub struct SchemaWriter {
    shared: Shared,
}

impl SchemaWriter {
    /// Replace the current snapshot, returning the one it superseded.
    pub fn replace(&mut self, next: SchemaSnapshot) -> Arc<SchemaSnapshot> {
        let next = Arc::new(next);
        std::mem::replace(&mut *self.shared.write(), next)
    }

    /// A new reader onto this holder.
    #[must_use]
    pub fn reader(&self) -> SchemaReader {
        SchemaReader {
            shared: self.shared.clone(),
        }
    }
}

/// Shared read side of the holder.
#[derive(Clone, Debug)]
pub struct SchemaReader {
    shared: Shared,
}

impl SchemaReader {
    /// The snapshot currently in effect.
    pub fn load(&self) -> Arc<SchemaSnapshot> {
        self.shared.read().clone()
    }

    /// Version of the snapshot currently in effect.
    pub fn version(&self) -> u64 {
        self.shared.read().version
    }
}
