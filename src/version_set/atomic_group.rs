use crate::error::{Error, Result};
use crate::manifest::edit::VersionEdit;

/// Holds the edits of an atomic group while it is read back from the
/// manifest, so that a group is applied whole or not at all.
#[derive(Debug, Default)]
pub struct AtomicGroupReadBuffer {
    // Size of the group in progress, taken from its first edit.
    group_size: usize,
    replay_buffer: Vec<VersionEdit>,
}

impl AtomicGroupReadBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.replay_buffer.is_empty()
    }

    /// Every edit of the current group has been read.
    pub fn is_full(&self) -> bool {
        !self.replay_buffer.is_empty() && self.replay_buffer.len() == self.group_size
    }

    /// Buffers an edit of a group, or checks that a normal edit does not
    /// interrupt one.
    pub fn add_edit(&mut self, edit: &VersionEdit) -> Result<()> {
        let Some(remaining) = edit.remaining_entries else {
            if !self.replay_buffer.is_empty() {
                return Err(Error::Corruption("corrupted atomic group".into()));
            }
            return Ok(());
        };
        if self.replay_buffer.is_empty() {
            self.group_size = remaining as usize + 1;
        }
        if self.replay_buffer.len() + 1 + remaining as usize != self.group_size {
            return Err(Error::Corruption("corrupted atomic group".into()));
        }
        self.replay_buffer.push(edit.clone());
        Ok(())
    }

    /// Hands out the complete group and resets the buffer.
    pub fn take(&mut self) -> Vec<VersionEdit> {
        self.group_size = 0;
        std::mem::take(&mut self.replay_buffer)
    }

    pub fn clear(&mut self) {
        self.group_size = 0;
        self.replay_buffer.clear();
    }
}
