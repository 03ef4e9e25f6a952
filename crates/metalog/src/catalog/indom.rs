//! Instance domain history store.
//!
//! Each instance domain accumulates a chain of [`IndomSnapshot`]s sorted
//! by descending timestamp. Chains stay free of content-equal duplicates:
//! merged archives record the same instance domains over and over, and a
//! duplicate arriving at an already-known timestamp is suppressed, with
//! the surviving snapshot moved to the head of its time slot so that
//! point-in-time queries find it first.

use crate::format::{Instance, Stamp};
use std::collections::HashMap;
use tracing::debug;

/// Instance domains with more instances than this use a hash set to
/// deduplicate the archive-wide union; smaller ones search linearly.
const HASH_THRESHOLD: usize = 16;

/// Outcome of inserting an instance domain snapshot.
///
/// A suppressed duplicate is not an error; the rejected snapshot is
/// dropped and the chain is left holding the earlier-loaded equivalent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndomInsert {
    /// The snapshot was added to the chain.
    Added,
    /// A content-equal snapshot already exists at this timestamp; the
    /// new one was discarded.
    Duplicate,
}

/// One observation of an instance domain's contents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndomSnapshot {
    /// The instance domain this snapshot belongs to.
    pub indom: u32,
    /// Observation time.
    pub stamp: Stamp,
    /// Instances, sorted ascending by identifier.
    pub instances: Vec<Instance>,
}

impl IndomSnapshot {
    /// Finds an instance by external name.
    ///
    /// An exact match wins. Failing that, a stored name containing a
    /// space matches when the query starts with the name's first word.
    /// The fallback exists for instance names of the form "1 minute"
    /// where callers historically passed "1"; it is kept for backward
    /// compatibility and should not be relied on as a primary lookup.
    pub fn instance_by_name(&self, name: &str) -> Option<i32> {
        for inst in &self.instances {
            if inst.name == name {
                return Some(inst.id);
            }
        }
        for inst in &self.instances {
            if let Some(space) = inst.name.find(' ') {
                if name.as_bytes() == &inst.name.as_bytes()[..space] {
                    return Some(inst.id);
                }
            }
        }
        None
    }

    /// Returns the name of an instance, by internal identifier.
    pub fn name_of(&self, inst: i32) -> Option<&str> {
        self.instances
            .iter()
            .find(|i| i.id == inst)
            .map(|i| i.name.as_str())
    }
}

/// Sorts instances ascending by identifier.
///
/// Insertion sort, stable: input is close to sorted in practice, and
/// equal identifiers keep their relative order.
fn sort_instances(instances: &mut [Instance]) {
    for i in 1..instances.len() {
        let mut j = i;
        while j > 0 && instances[j].id < instances[j - 1].id {
            instances.swap(j, j - 1);
            j -= 1;
        }
    }
}

/// Per-instance-domain snapshot chains.
#[derive(Debug, Default)]
pub struct IndomStore {
    chains: HashMap<u32, Vec<IndomSnapshot>>,
}

impl IndomStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a snapshot, keeping the chain sorted by descending stamp
    /// and free of content-equal duplicates.
    ///
    /// Within a run of equal timestamps a new snapshot is placed at the
    /// head of the run. A snapshot whose contents already exist in the
    /// run is discarded, and the existing snapshot is moved to the head
    /// of the run so the chain reads the same as if the duplicate had
    /// been inserted first.
    pub fn insert(&mut self, indom: u32, stamp: Stamp, mut instances: Vec<Instance>) -> IndomInsert {
        sort_instances(&mut instances);
        debug!(indom, sec = stamp.sec, numinst = instances.len(), "add indom");

        let snap = IndomSnapshot {
            indom,
            stamp,
            instances,
        };
        let chain = self.chains.entry(indom).or_default();

        let mut i = 0;
        while i < chain.len() {
            if chain[i].stamp < snap.stamp {
                chain.insert(i, snap);
                return IndomInsert::Added;
            }
            if chain[i].stamp == snap.stamp {
                // head of the time slot
                let slot = i;
                let mut j = i;
                while j < chain.len() && chain[j].stamp == snap.stamp {
                    if chain[j].instances == snap.instances {
                        if j != slot {
                            let existing = chain.remove(j);
                            chain.insert(slot, existing);
                        }
                        return IndomInsert::Duplicate;
                    }
                    j += 1;
                }
                chain.insert(slot, snap);
                return IndomInsert::Added;
            }
            i += 1;
        }

        chain.push(snap);
        IndomInsert::Added
    }

    /// Returns the snapshot current at `stamp`: the first one at or
    /// before the requested time, or the latest when no time is given.
    pub fn search(&self, indom: u32, stamp: Option<&Stamp>) -> Option<&IndomSnapshot> {
        let chain = self.chains.get(&indom)?;
        match stamp {
            None => chain.first(),
            Some(ts) => chain.iter().find(|snap| snap.stamp <= *ts),
        }
    }

    /// Returns the full chain for an instance domain, newest first.
    pub fn chain(&self, indom: u32) -> Option<&[IndomSnapshot]> {
        self.chains.get(&indom).map(|c| c.as_slice())
    }

    /// Returns the union of instances across all snapshots of an
    /// instance domain, first-seen name winning.
    ///
    /// Large instance domains deduplicate through a hash set scoped to
    /// this call; small ones (at most 16 instances per snapshot) search
    /// the output linearly.
    pub fn union(&self, indom: u32) -> Option<Vec<Instance>> {
        let chain = self.chains.get(&indom)?;
        let big = chain
            .iter()
            .any(|snap| snap.instances.len() > HASH_THRESHOLD);

        let mut out: Vec<Instance> = Vec::new();
        if big {
            let mut seen = std::collections::HashSet::new();
            for snap in chain {
                for inst in &snap.instances {
                    if seen.insert(inst.id) {
                        out.push(inst.clone());
                    }
                }
            }
        } else {
            for snap in chain {
                for inst in &snap.instances {
                    if !out.iter().any(|o| o.id == inst.id) {
                        out.push(inst.clone());
                    }
                }
            }
        }
        Some(out)
    }

    /// Returns the number of instance domains in the store.
    pub fn len(&self) -> usize {
        self.chains.len()
    }

    /// Returns true if the store holds no instance domains.
    pub fn is_empty(&self) -> bool {
        self.chains.is_empty()
    }
}
