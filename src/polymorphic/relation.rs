// ============================================================================
// Two-phase relation loading
// ============================================================================
//
// Phase 1 rides along the owner's select: extra outer joins probe the
// target's tables and each owner row yields (subtype, target id), recorded
// in the innermost pending set of the `LoadContext`.
//
// Phase 2 runs after the owner rows are materialized: targets are
// batch-loaded per subtype and fixed onto their owners.
//
// ============================================================================

use super::context::{LoadContext, PendingRelation};
use super::PolymorphicPersister;
use crate::core::Result;
use crate::engine::PersisterCore;
use crate::mapping::{Entity, Identifier};
use crate::result::ResultRow;
use crate::sql::{Join, Projection};
use async_trait::async_trait;
use log::debug;
use std::collections::HashMap;
use std::sync::Arc;

#[async_trait]
pub trait RelationLoader<O>: Send + Sync {
    fn name(&self) -> &str;

    /// Joins and projections added to the owner select, with the owner
    /// table under `owner_alias` and every added alias starting with `prefix`.
    fn first_phase(&self, owner_alias: &str, prefix: &str) -> (Vec<Join>, Vec<Projection>);

    /// Subtype selector and target id referenced by one owner row.
    fn first_phase_read(&self, row: &ResultRow, prefix: &str) -> Result<Option<(String, Identifier)>>;

    /// Loads the targets of `entries` and attaches them to `owners`, located
    /// through `index` (owner id to position).
    async fn second_phase(
        &self,
        entries: Vec<PendingRelation>,
        owners: &mut [O],
        index: &HashMap<Identifier, usize>,
        ctx: &mut LoadContext,
    ) -> Result<()>;
}

/// To-one relation from `O` to a polymorphic `T` through a foreign key on
/// the owner table.
pub struct PolymorphicRelation<O, T> {
    name: String,
    foreign_key: Vec<String>,
    target: Arc<PolymorphicPersister<T>>,
    fixer: Arc<dyn Fn(&mut O, T) + Send + Sync>,
}

impl<O, T: Entity + Clone> PolymorphicRelation<O, T> {
    pub fn new<F>(
        name: impl Into<String>,
        foreign_key: &[&str],
        target: Arc<PolymorphicPersister<T>>,
        fixer: F,
    ) -> Self
    where
        F: Fn(&mut O, T) + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            foreign_key: foreign_key.iter().map(|col| col.to_string()).collect(),
            target,
            fixer: Arc::new(fixer),
        }
    }
}

#[async_trait]
impl<O: Entity, T: Entity + Clone> RelationLoader<O> for PolymorphicRelation<O, T> {
    fn name(&self) -> &str {
        &self.name
    }

    fn first_phase(&self, owner_alias: &str, prefix: &str) -> (Vec<Join>, Vec<Projection>) {
        self.target.probe(owner_alias, &self.foreign_key, prefix)
    }

    fn first_phase_read(&self, row: &ResultRow, prefix: &str) -> Result<Option<(String, Identifier)>> {
        self.target.resolve(row, prefix)
    }

    async fn second_phase(
        &self,
        entries: Vec<PendingRelation>,
        owners: &mut [O],
        index: &HashMap<Identifier, usize>,
        ctx: &mut LoadContext,
    ) -> Result<()> {
        let mut groups: Vec<(String, Vec<Identifier>)> = Vec::new();
        for entry in &entries {
            match groups.iter_mut().find(|(selector, _)| *selector == entry.selector) {
                Some((_, ids)) => ids.push(entry.target.clone()),
                None => groups.push((entry.selector.clone(), vec![entry.target.clone()])),
            }
        }

        // Ids are only unique per subtype in a table-per-class target.
        let mut targets: HashMap<(String, Identifier), T> = HashMap::new();
        for (selector, ids) in groups {
            for target in self.target.select_subtype(&selector, ids, ctx).await? {
                targets.insert((selector.clone(), self.target.entity_id(&target)), target);
            }
        }

        for entry in entries {
            let key = (entry.selector.clone(), entry.target.clone());
            let (Some(pos), Some(target)) = (index.get(&entry.owner), targets.get(&key)) else {
                debug!(
                    "Relation '{}': nothing to attach for owner {} and target {}",
                    self.name, entry.owner, entry.target
                );
                continue;
            };
            (self.fixer)(&mut owners[*pos], target.clone());
        }
        Ok(())
    }
}
