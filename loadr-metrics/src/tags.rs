use crate::key::KeyId;
use smallvec::SmallVec;

/// Sorted set of interned `(key, value)` tag pairs identifying one series of a metric.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct TagSet {
    // Most series carry `scenario` plus one or two more tags.
    pub(crate) tags: SmallVec<[(KeyId, KeyId); 4]>,
}

impl TagSet {
    /// Builds a tag set from pairs already sorted by key.
    pub fn from_sorted_iter(iter: impl IntoIterator<Item = (KeyId, KeyId)>) -> Self {
        Self {
            tags: iter.into_iter().collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tags.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (KeyId, KeyId)> + '_ {
        self.tags.iter().copied()
    }

    pub fn get(&self, key: KeyId) -> Option<KeyId> {
        let slice: &[(KeyId, KeyId)] = &self.tags;
        let idx = slice.partition_point(|(k, _)| *k < key);
        slice.get(idx).and_then(|(k, v)| (*k == key).then_some(*v))
    }

    pub fn contains(&self, key: KeyId, value: KeyId) -> bool {
        self.get(key) == Some(value)
    }

    /// Keeps only the given keys (in the order of `keys`, which callers keep sorted).
    pub fn project(&self, keys: &[KeyId]) -> TagSet {
        let mut out = SmallVec::<[(KeyId, KeyId); 4]>::new();
        for key in keys {
            if let Some(value) = self.get(*key) {
                out.push((*key, value));
            }
        }
        TagSet { tags: out }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tagset_contains_and_get() {
        let a = KeyId::from(1);
        let b = KeyId::from(2);
        let c = KeyId::from(3);

        let set = TagSet::from_sorted_iter([(a, b), (c, a)]);
        assert!(set.contains(a, b));
        assert!(!set.contains(a, a));
        assert_eq!(set.get(a), Some(b));
        assert_eq!(set.get(c), Some(a));
        assert_eq!(set.get(b), None);
    }

    #[test]
    fn project_keeps_requested_keys_only() {
        let k1 = KeyId::from(1);
        let k2 = KeyId::from(2);
        let v = KeyId::from(9);

        let set = TagSet::from_sorted_iter([(k1, v), (k2, v)]);
        let projected = set.project(&[k2]);
        assert_eq!(projected.len(), 1);
        assert_eq!(projected.get(k2), Some(v));
        assert!(set.project(&[]).is_empty());
    }
}
