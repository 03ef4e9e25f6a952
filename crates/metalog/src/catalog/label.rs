//! Label history store.
//!
//! Label sets are keyed by label type and identifier, each key holding a
//! chain of [`LabelGroup`]s sorted by descending timestamp. Inserts do
//! not assume chronological arrival and do not check for duplicates;
//! once a load completes, [`LabelStore::dedup`] walks every chain and
//! discards the sets a group shares with its immediate older neighbour.
//! Merged archives produce such duplicates routinely.

use crate::format::{LabelSet, Stamp, ID_NULL, LABEL_COMPOUND, LABEL_CONTEXT, LABEL_OPTIONAL};
use std::collections::HashMap;
use tracing::debug;

/// The label sets observed for one (type, identifier) at one time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelGroup {
    /// Label type bits as recorded, modifier bits included.
    pub kind: u32,
    /// Identifier the sets apply to.
    pub ident: u32,
    /// Observation time.
    pub stamp: Stamp,
    /// The label sets.
    pub sets: Vec<LabelSet>,
}

/// Strips the modifier bits that do not participate in chain keying.
fn key_kind(kind: u32) -> u32 {
    kind & !(LABEL_COMPOUND | LABEL_OPTIONAL)
}

/// Context labels describe the whole archive; they are keyed under the
/// null identifier regardless of what the record carried.
fn key_ident(kind: u32, ident: u32) -> u32 {
    if kind == LABEL_CONTEXT {
        ID_NULL
    } else {
        ident
    }
}

/// Two-level map of label chains: type, then identifier.
#[derive(Debug, Default)]
pub struct LabelStore {
    chains: HashMap<u32, HashMap<u32, Vec<LabelGroup>>>,
}

impl LabelStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a group of label sets, keeping the chain sorted by
    /// descending stamp. A new group lands ahead of any group carrying
    /// the same timestamp; duplicate contents are not examined here but
    /// by the post-load [`dedup`](Self::dedup) pass.
    pub fn insert(&mut self, kind: u32, ident: u32, stamp: Stamp, sets: Vec<LabelSet>) {
        let masked = key_kind(kind);
        let keyed_ident = key_ident(masked, ident);
        debug!(kind, ident, sec = stamp.sec, nsets = sets.len(), "add labels");

        let group = LabelGroup {
            kind,
            ident,
            stamp,
            sets,
        };
        let chain = self
            .chains
            .entry(masked)
            .or_default()
            .entry(keyed_ident)
            .or_default();

        let pos = chain
            .iter()
            .position(|g| g.stamp <= group.stamp)
            .unwrap_or(chain.len());
        chain.insert(pos, group);
    }

    /// Returns the label sets current at `stamp` for a (type, ident)
    /// key: the first group at or before the requested time, or the
    /// latest when no time is given.
    ///
    /// `None` means the key was never recorded; a known key whose every
    /// group is newer than the requested time yields an empty slice.
    pub fn lookup(&self, kind: u32, ident: u32, stamp: Option<&Stamp>) -> Option<&[LabelSet]> {
        let masked = key_kind(kind);
        let chain = self
            .chains
            .get(&masked)?
            .get(&key_ident(masked, ident))?;
        match stamp {
            None => chain.first().map(|g| g.sets.as_slice()),
            Some(ts) => Some(
                chain
                    .iter()
                    .find(|g| g.stamp <= *ts)
                    .map(|g| g.sets.as_slice())
                    .unwrap_or(&[]),
            ),
        }
    }

    /// Discards duplicate label sets between adjacent groups.
    ///
    /// For every chain, each group drops the sets that also appear in
    /// its immediate older neighbour; a group left with no sets is
    /// unlinked. Chains are in reverse chronological order by the time
    /// this runs, so only adjacent groups can be duplicates.
    pub fn dedup(&mut self) {
        for per_ident in self.chains.values_mut() {
            for chain in per_ident.values_mut() {
                let mut i = 0;
                while i + 1 < chain.len() {
                    let (newer, older) = chain.split_at_mut(i + 1);
                    let group = &mut newer[i];
                    let next = &older[0];
                    group
                        .sets
                        .retain(|set| !next.sets.iter().any(|other| set.same_as(other)));
                    if group.sets.is_empty() {
                        chain.remove(i);
                    } else {
                        i += 1;
                    }
                }
            }
        }
    }

    /// Returns the chain for a (type, ident) key, newest first.
    pub fn chain(&self, kind: u32, ident: u32) -> Option<&[LabelGroup]> {
        let masked = key_kind(kind);
        self.chains
            .get(&masked)?
            .get(&key_ident(masked, ident))
            .map(|c| c.as_slice())
    }

    /// Returns true if the store holds no label chains.
    pub fn is_empty(&self) -> bool {
        self.chains.is_empty()
    }
}
