use crate::error::Result;

/// Sorted cursor over `(internal key, value)` entries.
///
/// Table readers hand these out so callers can scan a file's contents in
/// internal-key order.
pub trait StorageIterator {
    /// Current internal key. Only valid when `is_valid()` is true.
    fn key(&self) -> &[u8];

    /// Current value. Only valid when `is_valid()` is true.
    fn value(&self) -> &[u8];

    fn is_valid(&self) -> bool;

    fn next(&mut self) -> Result<()>;

    /// Positions at the first entry with key >= target.
    fn seek(&mut self, key: &[u8]) -> Result<()>;

    fn seek_to_first(&mut self) -> Result<()>;
}
