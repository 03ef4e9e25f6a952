//! Metric descriptor store.
//!
//! Descriptors are frozen after their first sighting: a later record for
//! the same metric must agree field for field, and the first field that
//! disagrees names the error. Archives that change a metric's type,
//! semantics, instance domain or units mid-stream are unusable.

use crate::error::{MetaError, Result};
use crate::format::MetricDesc;
use std::collections::HashMap;

/// Metric identifier to descriptor map.
#[derive(Debug, Default)]
pub struct DescStore {
    descs: HashMap<u32, MetricDesc>,
}

impl DescStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a descriptor, or verifies it against the one already
    /// recorded for the metric. A verified re-insert is a no-op.
    pub fn insert(&mut self, desc: &MetricDesc) -> Result<()> {
        if let Some(old) = self.descs.get(&desc.pmid) {
            if desc.data_type != old.data_type {
                return Err(MetaError::TypeChanged(desc.pmid));
            }
            if desc.sem != old.sem {
                return Err(MetaError::SemanticsChanged(desc.pmid));
            }
            if desc.indom != old.indom {
                return Err(MetaError::IndomChanged(desc.pmid));
            }
            if desc.units != old.units {
                return Err(MetaError::UnitsChanged(desc.pmid));
            }
            return Ok(());
        }
        self.descs.insert(desc.pmid, *desc);
        Ok(())
    }

    /// Returns the descriptor for a metric.
    pub fn lookup(&self, pmid: u32) -> Option<&MetricDesc> {
        self.descs.get(&pmid)
    }

    /// Returns the number of metrics in the store.
    pub fn len(&self) -> usize {
        self.descs.len()
    }

    /// Returns true if the store holds no descriptors.
    pub fn is_empty(&self) -> bool {
        self.descs.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::{Units, SEM_COUNTER, SEM_INSTANT, TYPE_U32, TYPE_U64};

    fn desc() -> MetricDesc {
        MetricDesc {
            pmid: 1,
            data_type: TYPE_U32,
            sem: SEM_COUNTER,
            indom: 42,
            units: Units::new(0, 1, 0, 0, 3, 0),
        }
    }

    #[test]
    fn test_insert_then_verify() {
        let mut store = DescStore::new();
        store.insert(&desc()).unwrap();
        store.insert(&desc()).unwrap();
        assert_eq!(store.len(), 1);
        assert_eq!(store.lookup(1), Some(&desc()));
        assert_eq!(store.lookup(2), None);
    }

    #[test]
    fn test_conflicts_are_field_specific() {
        let mut store = DescStore::new();
        store.insert(&desc()).unwrap();

        let mut d = desc();
        d.data_type = TYPE_U64;
        assert!(matches!(store.insert(&d), Err(MetaError::TypeChanged(1))));

        let mut d = desc();
        d.sem = SEM_INSTANT;
        assert!(matches!(store.insert(&d), Err(MetaError::SemanticsChanged(1))));

        let mut d = desc();
        d.indom = 43;
        assert!(matches!(store.insert(&d), Err(MetaError::IndomChanged(1))));

        let mut d = desc();
        d.units = Units::new(1, 0, 0, 1, 0, 0);
        assert!(matches!(store.insert(&d), Err(MetaError::UnitsChanged(1))));

        // the stored descriptor is untouched by rejected inserts
        assert_eq!(store.lookup(1), Some(&desc()));
    }
}
