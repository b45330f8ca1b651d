use crate::bloom::BloomFilter;

/// Collects the keys of a table being built, then sizes the filter once
/// the final key count is known.
#[derive(Debug, Default)]
pub struct BloomFilterBuilder {
    keys: Vec<Vec<u8>>,
    false_positive_rate: f64,
}

impl BloomFilterBuilder {
    pub fn new(false_positive_rate: f64) -> Self {
        BloomFilterBuilder {
            keys: Vec::new(),
            false_positive_rate,
        }
    }

    /// Adds a key; consecutive duplicates are stored once.
    pub fn add_key(&mut self, key: &[u8]) {
        if self.keys.last().is_some_and(|last| last.as_slice() == key) {
            return;
        }
        self.keys.push(key.to_vec());
    }

    pub fn build(self) -> BloomFilter {
        let mut filter = BloomFilter::new(self.keys.len(), self.false_positive_rate);
        for key in &self.keys {
            filter.insert(key);
        }
        filter
    }
}
