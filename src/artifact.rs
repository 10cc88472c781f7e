//! In-memory store for finished turn audio, addressed by opaque handles.
//!
//! The collaborator receives an `ArtifactId` and resolves it here for
//! playback or download. Nothing is persisted; the store lives and dies with
//! the process.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};

use uuid::Uuid;

/// Opaque, locally resolvable handle to one turn's audio bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ArtifactId(Uuid);

impl fmt::Display for ArtifactId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Default)]
pub struct ArtifactStore {
    entries: RwLock<HashMap<ArtifactId, Arc<[u8]>>>,
}

impl ArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store one artifact and return its handle.
    pub fn insert(&self, bytes: Vec<u8>) -> ArtifactId {
        let id = ArtifactId(Uuid::new_v4());
        self.entries
            .write()
            .expect("artifact store lock poisoned")
            .insert(id, bytes.into());
        id
    }

    /// Resolve a handle to its bytes, if it exists.
    pub fn resolve(&self, id: ArtifactId) -> Option<Arc<[u8]>> {
        self.entries
            .read()
            .expect("artifact store lock poisoned")
            .get(&id)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.entries
            .read()
            .expect("artifact store lock poisoned")
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_then_resolve() {
        let store = ArtifactStore::new();
        let id = store.insert(vec![1, 2, 3]);
        assert_eq!(store.resolve(id).unwrap().as_ref(), &[1, 2, 3]);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn unknown_handle_resolves_to_none() {
        let store = ArtifactStore::new();
        let id = store.insert(vec![9]);
        let other = ArtifactStore::new().insert(vec![0]);
        assert!(store.resolve(id).is_some());
        assert!(store.resolve(other).is_none());
    }
}
