use ahash::AHashMap;
use parking_lot::RwLock;
use std::sync::Arc;

/// Interned string id used for tag keys and values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct KeyId(u32);

impl From<u32> for KeyId {
    fn from(v: u32) -> Self {
        Self(v)
    }
}

impl From<KeyId> for u32 {
    fn from(v: KeyId) -> Self {
        v.0
    }
}

#[derive(Default, Debug)]
pub(crate) struct Interner {
    inner: RwLock<InternerState>,
}

#[derive(Default, Debug)]
struct InternerState {
    map: AHashMap<Arc<str>, KeyId>,
    names: Vec<Arc<str>>,
}

impl Interner {
    pub(crate) fn get_or_intern(&self, s: &str) -> KeyId {
        if let Some(&id) = self.inner.read().map.get(s) {
            return id;
        }

        let mut state = self.inner.write();

        // Another writer may have interned it between the two locks.
        if let Some(&id) = state.map.get(s) {
            return id;
        }

        let id = KeyId(state.names.len() as u32);
        let s: Arc<str> = Arc::from(s);
        state.names.push(s.clone());
        state.map.insert(s, id);
        id
    }

    pub(crate) fn get(&self, s: &str) -> Option<KeyId> {
        self.inner.read().map.get(s).copied()
    }

    pub(crate) fn resolve(&self, id: KeyId) -> Option<Arc<str>> {
        self.inner.read().names.get(id.0 as usize).cloned()
    }
}
