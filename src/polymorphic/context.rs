use crate::core::{DbError, Result};
use crate::mapping::Identifier;

/// Relation id read in a first-phase load, waiting for its target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingRelation {
    /// Index of the relation on the owner's persister.
    pub relation: usize,
    /// Subtype that will load the target.
    pub selector: String,
    pub owner: Identifier,
    pub target: Identifier,
}

/// Pending relations of one select call.
#[derive(Debug, Default)]
pub struct PendingRelationSet {
    entries: Vec<PendingRelation>,
}

impl PendingRelationSet {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Removes and returns the entries of relation `relation`, in read order.
    pub fn take_relation(&mut self, relation: usize) -> Vec<PendingRelation> {
        let (taken, kept) = std::mem::take(&mut self.entries)
            .into_iter()
            .partition(|entry| entry.relation == relation);
        self.entries = kept;
        taken
    }
}

/// Stack of pending relation sets, one per select call in progress.
///
/// Passed down explicitly so that a nested select of a relation target
/// works on its own set while the outer one is still being filled.
#[derive(Debug, Default)]
pub struct LoadContext {
    stack: Vec<PendingRelationSet>,
}

impl LoadContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_set(&mut self) {
        self.stack.push(PendingRelationSet::default());
    }

    /// Records into the innermost set.
    pub fn record(&mut self, entry: PendingRelation) -> Result<()> {
        match self.stack.last_mut() {
            Some(set) => {
                set.entries.push(entry);
                Ok(())
            }
            None => Err(DbError::ExecutionError(
                "No pending relation set to record into".into(),
            )),
        }
    }

    pub fn pop_set(&mut self) -> Option<PendingRelationSet> {
        self.stack.pop()
    }

    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stack.is_empty()
    }
}
