use crate::error::Result;

/// User-supplied policy that folds merge operands into a value.
pub trait MergeOperator: Send + Sync {
    fn name(&self) -> &str;

    /// Combines `operands` (oldest first) on top of `existing_value`.
    ///
    /// `existing_value` is `None` when every file was exhausted without
    /// reaching a base value.
    fn full_merge(
        &self,
        key: &[u8],
        existing_value: Option<&[u8]>,
        operands: &[Vec<u8>],
    ) -> Result<Vec<u8>>;

    /// Lets the operator stop the lookup early once the operands seen so far
    /// (newest first) determine the result.
    fn should_merge(&self, _operands_newest_first: &[Vec<u8>]) -> bool {
        false
    }
}

/// Merge operands collected for one key during a lookup.
#[derive(Debug, Clone, Default)]
pub struct MergeContext {
    // newest first, in discovery order
    operands: Vec<Vec<u8>>,
}

impl MergeContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_operand(&mut self, operand: &[u8]) {
        self.operands.push(operand.to_vec());
    }

    pub fn num_operands(&self) -> usize {
        self.operands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operands.is_empty()
    }

    pub fn operands_newest_first(&self) -> &[Vec<u8>] {
        &self.operands
    }

    /// Operands in application order.
    pub fn operands(&self) -> Vec<Vec<u8>> {
        self.operands.iter().rev().cloned().collect()
    }
}

/// Appends operands to the existing value in order, joined by `,`.
#[derive(Debug, Default, Clone, Copy)]
pub struct StringAppendOperator;

impl MergeOperator for StringAppendOperator {
    fn name(&self) -> &str {
        "StringAppendOperator"
    }

    fn full_merge(
        &self,
        _key: &[u8],
        existing_value: Option<&[u8]>,
        operands: &[Vec<u8>],
    ) -> Result<Vec<u8>> {
        let mut out = existing_value.map(<[u8]>::to_vec).unwrap_or_default();
        for operand in operands {
            if !out.is_empty() {
                out.push(b',');
            }
            out.extend_from_slice(operand);
        }
        Ok(out)
    }
}
