//! The per-block dirty layer (spec.md §4.6/§5): every issue, reissue and
//! balance movement within a block-in-progress is staged here first, so a
//! failed validation midway through a block never touches the committed
//! store, and `TokenEngine::connect_block`/`disconnect_block` can apply or
//! undo the whole layer as one [`crate::store::WriteBatch`].

use std::collections::HashMap;

use super::metadata::TokenMetadata;

#[derive(Default)]
pub struct DirtyLayer {
    /// Newly issued tokens this block, keyed by name.
    pub new_issues: HashMap<String, TokenMetadata>,
    /// Reissued tokens this block: name -> (metadata before, metadata after).
    pub reissues: HashMap<String, (TokenMetadata, TokenMetadata)>,
    /// Net balance change this block, keyed by (token name, address).
    pub balance_deltas: HashMap<(String, String), i64>,
}

impl DirtyLayer {
    pub fn clear(&mut self) {
        self.new_issues.clear();
        self.reissues.clear();
        self.balance_deltas.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.new_issues.is_empty() && self.reissues.is_empty() && self.balance_deltas.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clear_resets_every_field() {
        let mut layer = DirtyLayer::default();
        layer.balance_deltas.insert(("X".to_string(), "addr".to_string()), 5);
        assert!(!layer.is_empty());
        layer.clear();
        assert!(layer.is_empty());
    }
}
