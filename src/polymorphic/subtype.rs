use crate::core::{DbError, Result};
use crate::engine::{Duo, PersisterCore, SimplePersister, UpdatePlan};
use crate::mapping::{Entity, Identifier};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// One concrete subtype of a polymorphic entity.
pub struct Subtype<C> {
    name: String,
    claims: Arc<dyn Fn(&C) -> bool + Send + Sync>,
    persister: SimplePersister<C>,
}

impl<C: Entity> Subtype<C> {
    /// `claims` decides whether an entity belongs to this subtype.
    pub fn new<F>(name: impl Into<String>, claims: F, persister: SimplePersister<C>) -> Self
    where
        F: Fn(&C) -> bool + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            claims: Arc::new(claims),
            persister,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn claims(&self, entity: &C) -> bool {
        (self.claims)(entity)
    }

    pub fn persister(&self) -> &SimplePersister<C> {
        &self.persister
    }
}

impl<C> fmt::Debug for Subtype<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subtype").field("name", &self.name).finish()
    }
}

/// Index of the first subtype claiming `entity`.
pub(crate) fn route<C: Entity>(subtypes: &[Subtype<C>], entity: &C) -> Option<usize> {
    subtypes.iter().position(|subtype| subtype.claims(entity))
}

/// Routes every entity, failing on the first one no subtype claims.
pub(crate) fn route_all<'e, C: Entity>(
    subtypes: &[Subtype<C>],
    entities: impl Iterator<Item = &'e C>,
    family: &str,
) -> Result<Vec<usize>> {
    entities
        .map(|entity| {
            route(subtypes, entity).ok_or_else(|| {
                DbError::InvalidArgument(format!(
                    "No subtype of '{}' claims entity {:?}",
                    family, entity
                ))
            })
        })
        .collect()
}

pub(crate) fn find<'s, C: Entity>(subtypes: &'s [Subtype<C>], name: &str) -> Result<&'s Subtype<C>> {
    subtypes
        .iter()
        .find(|subtype| subtype.name() == name)
        .ok_or_else(|| DbError::InvalidArgument(format!("Unknown subtype '{}'", name)))
}

/// Splits `items` into one group per subtype, keeping input order.
pub(crate) fn group<T>(items: impl Iterator<Item = T>, routes: &[usize], groups: usize) -> Vec<Vec<T>> {
    let mut grouped: Vec<Vec<T>> = (0..groups).map(|_| Vec::new()).collect();
    for (item, route) in items.zip(routes) {
        grouped[*route].push(item);
    }
    grouped
}

/// `loaded` reordered to the first-occurrence order of `ids`.
pub(crate) fn in_id_order<C>(
    ids: &[Identifier],
    loaded: Vec<C>,
    id_of: impl Fn(&C) -> Identifier,
) -> Vec<C> {
    let mut by_id: HashMap<Identifier, C> = loaded
        .into_iter()
        .map(|entity| (id_of(&entity), entity))
        .collect();
    ids.iter().filter_map(|id| by_id.remove(id)).collect()
}

pub(crate) async fn insert_routed<C: Entity>(
    subtypes: &[Subtype<C>],
    entities: &mut [&mut C],
    routes: &[usize],
) -> Result<u64> {
    let groups = group(entities.iter_mut().map(|e| &mut **e), routes, subtypes.len());
    let mut total = 0;
    for (subtype, mut members) in subtypes.iter().zip(groups) {
        if !members.is_empty() {
            total += subtype.persister.insert_entities(&mut members).await?;
        }
    }
    Ok(total)
}

/// Plans every subtype group before any of them is written, so a NULL in
/// a later group fails the call with nothing executed.
pub(crate) fn plan_routed<C: Entity>(
    subtypes: &[Subtype<C>],
    pairs: &mut [Duo<'_, C>],
    routes: &[usize],
    all_columns: bool,
) -> Result<Vec<UpdatePlan>> {
    let groups = group(reborrow(pairs), routes, subtypes.len());
    subtypes
        .iter()
        .zip(groups)
        .map(|(subtype, members)| subtype.persister.plan_update(&members, all_columns, &[]))
        .collect()
}

/// Executes the plans of [`plan_routed`] against the same pairs and routes.
pub(crate) async fn execute_routed<C: Entity>(
    subtypes: &[Subtype<C>],
    pairs: &mut [Duo<'_, C>],
    routes: &[usize],
    plans: Vec<UpdatePlan>,
) -> Result<u64> {
    let groups = group(reborrow(pairs), routes, subtypes.len());
    let mut total = 0;
    for ((subtype, mut members), plan) in subtypes.iter().zip(groups).zip(plans) {
        total += subtype.persister.execute_update(&mut members, plan).await?;
    }
    Ok(total)
}

fn reborrow<'p, 'a, C>(pairs: &'p mut [Duo<'a, C>]) -> impl Iterator<Item = Duo<'p, C>> {
    pairs
        .iter_mut()
        .map(|pair| Duo::new(&mut *pair.modified, pair.unmodified))
}

pub(crate) async fn update_by_id_routed<C: Entity>(
    subtypes: &[Subtype<C>],
    entities: &[&C],
    routes: &[usize],
) -> Result<u64> {
    let groups = group(entities.iter().copied(), routes, subtypes.len());
    let mut total = 0;
    for (subtype, members) in subtypes.iter().zip(groups) {
        if !members.is_empty() {
            total += subtype.persister.update_entities_by_id(&members).await?;
        }
    }
    Ok(total)
}

pub(crate) async fn delete_routed<C: Entity>(
    subtypes: &[Subtype<C>],
    entities: &[&C],
    routes: &[usize],
) -> Result<u64> {
    let groups = group(entities.iter().copied(), routes, subtypes.len());
    let mut total = 0;
    for (subtype, members) in subtypes.iter().zip(groups) {
        if !members.is_empty() {
            total += subtype.persister.delete_entities(&members).await?;
        }
    }
    Ok(total)
}

/// Deletes each entity by key from the table of its own subtype only.
pub(crate) async fn delete_by_id_routed<C: Entity>(
    subtypes: &[Subtype<C>],
    entities: &[&C],
    routes: &[usize],
) -> Result<u64> {
    let groups = group(entities.iter().copied(), routes, subtypes.len());
    let mut total = 0;
    for (subtype, members) in subtypes.iter().zip(groups) {
        if members.is_empty() {
            continue;
        }
        let ids = members.iter().map(|m| subtype.persister.entity_id(m)).collect();
        total += subtype.persister.delete_ids(ids).await?;
    }
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_group_keeps_input_order() {
        let grouped = group(["a", "b", "c", "d"].into_iter(), &[1, 0, 1, 1], 3);
        assert_eq!(grouped, vec![vec!["b"], vec!["a", "c", "d"], vec![]]);
    }

    #[test]
    fn test_in_id_order() {
        let ids: Vec<Identifier> = vec![3.into(), 1.into(), 2.into()];
        let ordered = in_id_order(&ids, vec![1i64, 2], |n| (*n).into());
        assert_eq!(ordered, vec![1, 2]);
        let ordered = in_id_order(&ids, vec![2i64, 3, 1], |n| (*n).into());
        assert_eq!(ordered, vec![3, 1, 2]);
    }
}
