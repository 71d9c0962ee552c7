//! Disassembly comments keyed by address and opcode checksum.
//!
//! The checksum ties a comment to the bytes it was written against, so a comment on banked or
//! self-modified code only shows while the original instruction is present.

use std::collections::BTreeMap;

use sha1::{Digest, Sha1};

/// 32-bit fold of the SHA-1 digest of an instruction's raw bytes.
#[must_use]
pub fn opcode_checksum(bytes: &[u8]) -> u32 {
    let digest = Sha1::digest(bytes);
    u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]])
}

/// Per-processor comment store with a change counter watched by disassembly views.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommentStore {
    comments: BTreeMap<(u64, u32), String>,
    change_count: u32,
}

impl CommentStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces the comment at (`address`, `checksum`).
    pub fn add(&mut self, address: u64, checksum: u32, text: &str) {
        self.comments.insert((address, checksum), text.to_string());
        self.change_count = self.change_count.wrapping_add(1);
    }

    /// Removes the comment at (`address`, `checksum`), returning whether it existed.
    pub fn remove(&mut self, address: u64, checksum: u32) -> bool {
        let removed = self.comments.remove(&(address, checksum)).is_some();
        if removed {
            self.change_count = self.change_count.wrapping_add(1);
        }
        removed
    }

    /// Comment text for an instruction.
    #[must_use]
    pub fn text(&self, address: u64, checksum: u32) -> Option<&str> {
        self.comments.get(&(address, checksum)).map(String::as_str)
    }

    /// Comments in address order.
    pub fn iter(&self) -> impl Iterator<Item = (u64, u32, &str)> + '_ {
        self.comments
            .iter()
            .map(|(&(address, checksum), text)| (address, checksum, text.as_str()))
    }

    /// Number of comments.
    #[must_use]
    pub fn len(&self) -> usize {
        self.comments.len()
    }

    /// Returns `true` when there are no comments.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.comments.is_empty()
    }

    /// Bumped on every modification.
    #[must_use]
    pub const fn change_count(&self) -> u32 {
        self.change_count
    }
}

#[cfg(test)]
mod tests {
    use super::{opcode_checksum, CommentStore};

    #[test]
    fn checksum_depends_on_bytes() {
        assert_eq!(opcode_checksum(&[0xC3, 0x00, 0x10]), opcode_checksum(&[0xC3, 0x00, 0x10]));
        assert_ne!(opcode_checksum(&[0xC3, 0x00, 0x10]), opcode_checksum(&[0xC3, 0x00, 0x11]));
        // SHA-1 of the empty string starts da39a3ee.
        assert_eq!(opcode_checksum(&[]), 0xDA39_A3EE);
    }

    #[test]
    fn modifications_bump_the_change_count() {
        let mut store = CommentStore::new();
        store.add(0x100, 7, "reset vector");
        store.add(0x100, 7, "entry");
        assert_eq!(store.text(0x100, 7), Some("entry"));
        assert_eq!(store.text(0x100, 8), None);
        assert_eq!(store.change_count(), 2);
        assert!(!store.remove(0x200, 7));
        assert_eq!(store.change_count(), 2);
        assert!(store.remove(0x100, 7));
        assert_eq!(store.change_count(), 3);
        assert!(store.is_empty());
    }
}
