use std::cmp::Ordering;
use std::sync::Arc;

use crate::types::{INTERNAL_KEY_TRAILER_SIZE, extract_user_key};

/// Total order over user keys.
///
/// The name is persisted in the manifest; reopening with a comparator of a
/// different name is rejected.
pub trait Comparator: Send + Sync {
    fn name(&self) -> &str;

    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering;

    /// Comparison ignoring any user-defined timestamp suffix.
    fn compare_without_timestamp(&self, a: &[u8], b: &[u8]) -> Ordering {
        self.compare(a, b)
    }

    fn equal_without_timestamp(&self, a: &[u8], b: &[u8]) -> bool {
        self.compare_without_timestamp(a, b) == Ordering::Equal
    }
}

/// Lexicographic byte order.
#[derive(Debug, Default, Clone, Copy)]
pub struct BytewiseComparator;

impl Comparator for BytewiseComparator {
    fn name(&self) -> &str {
        "leveldb.BytewiseComparator"
    }

    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        a.cmp(b)
    }
}

/// Orders encoded internal keys: user key ascending, then the packed
/// `(sequence, type)` trailer descending.
#[derive(Clone)]
pub struct InternalKeyComparator {
    user_comparator: Arc<dyn Comparator>,
}

impl InternalKeyComparator {
    pub fn new(user_comparator: Arc<dyn Comparator>) -> Self {
        InternalKeyComparator { user_comparator }
    }

    pub fn user_comparator(&self) -> &Arc<dyn Comparator> {
        &self.user_comparator
    }

    pub fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        match self
            .user_comparator
            .compare(extract_user_key(a), extract_user_key(b))
        {
            Ordering::Equal => trailer(b).cmp(&trailer(a)),
            other => other,
        }
    }
}

impl std::fmt::Debug for InternalKeyComparator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InternalKeyComparator")
            .field("user_comparator", &self.user_comparator.name())
            .finish()
    }
}

fn trailer(internal_key: &[u8]) -> u64 {
    let n = internal_key.len();
    if n < INTERNAL_KEY_TRAILER_SIZE {
        return 0;
    }
    let mut buf = [0u8; INTERNAL_KEY_TRAILER_SIZE];
    buf.copy_from_slice(&internal_key[n - INTERNAL_KEY_TRAILER_SIZE..]);
    u64::from_le_bytes(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{InternalKey, ValueType};

    #[test]
    fn newer_sequence_sorts_first() {
        let icmp = InternalKeyComparator::new(Arc::new(BytewiseComparator));
        let old = InternalKey::new(b"k", 5, ValueType::Value);
        let new = InternalKey::new(b"k", 9, ValueType::Value);
        assert_eq!(icmp.compare(new.encode(), old.encode()), Ordering::Less);
        let other = InternalKey::new(b"a", 1, ValueType::Value);
        assert_eq!(icmp.compare(other.encode(), new.encode()), Ordering::Less);
    }
}
