// ============================================================================
// Optimistic Lock Manager
// ============================================================================
//
// Upgrades the version token of written entities, injects it into the write
// payload and registers a one-shot rollback listener that restores the
// previous value. NoOp when the mapping has no version column.
//
// ============================================================================

use crate::connection::ConnectionProvider;
use crate::core::{DbError, Result, Value};
use crate::mapping::{EntityMapping, VersionMapping, VersionToken, WritePayload};
use crate::transaction::{RollbackListener, RollbackObserver};
use log::debug;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

pub enum OptimisticLockManager<C> {
    NoOp,
    Active {
        version: VersionMapping<C>,
        observer: Arc<dyn RollbackObserver>,
    },
}

impl<C> OptimisticLockManager<C> {
    /// Activates versioning when the mapping has a version column.
    ///
    /// # Errors
    /// `UnsupportedOperation` when the provider cannot observe rollbacks.
    pub fn configure(mapping: &EntityMapping<C>, provider: &dyn ConnectionProvider) -> Result<Self> {
        let Some(version) = mapping.version() else {
            return Ok(OptimisticLockManager::NoOp);
        };
        match provider.rollback_observer() {
            Some(observer) => Ok(OptimisticLockManager::Active {
                version: version.clone(),
                observer,
            }),
            None => Err(DbError::UnsupportedOperation(format!(
                "Optimistic locking on '{}' requires a connection provider that observes rollbacks",
                mapping.table()
            ))),
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, OptimisticLockManager::Active { .. })
    }

    pub fn version_column(&self) -> Option<&str> {
        match self {
            OptimisticLockManager::NoOp => None,
            OptimisticLockManager::Active { version, .. } => Some(version.column().name.as_str()),
        }
    }

    /// Sets the initial version on `entity` and into the payload.
    pub fn manage_insert(&self, entity: &C, payload: &mut WritePayload) -> Result<()> {
        if let OptimisticLockManager::Active { version, observer } = self {
            let (_, next) = Self::upgrade(version, observer.as_ref(), entity)?;
            payload.set(version.column().name.clone(), next);
        }
        Ok(())
    }

    /// Upgrades the version of `modified`: the next value goes to SET, the
    /// previous one to WHERE.
    pub fn manage_update(&self, modified: &C, payload: &mut WritePayload) -> Result<()> {
        if let OptimisticLockManager::Active { version, observer } = self {
            let (previous, next) = Self::upgrade(version, observer.as_ref(), modified)?;
            let column = &version.column().name;
            payload.set(column.clone(), next);
            payload.restrict(column.clone(), previous);
        }
        Ok(())
    }

    /// Restricts a delete to the current version.
    pub fn manage_delete(&self, entity: &C, payload: &mut WritePayload) {
        if let OptimisticLockManager::Active { version, .. } = self {
            payload.restrict(version.column().name.clone(), version.current(entity));
        }
    }

    fn upgrade(
        version: &VersionMapping<C>,
        observer: &dyn RollbackObserver,
        entity: &C,
    ) -> Result<(Value, Value)> {
        let token = version.token(entity);
        let previous = token.get();
        let next = version.next(&previous)?;
        observer.add_rollback_listener(Arc::new(VersionRevertListener::new(
            token.share(),
            previous.clone(),
        )))?;
        token.set(next.clone());
        Ok((previous, next))
    }
}

/// Restores a version token to the value it had before an upgrade.
pub struct VersionRevertListener {
    token: VersionToken,
    previous: Value,
    fired: AtomicBool,
}

impl VersionRevertListener {
    pub fn new(token: VersionToken, previous: Value) -> Self {
        Self {
            token,
            previous,
            fired: AtomicBool::new(false),
        }
    }

    /// Restores the previous value; only the first call has an effect.
    pub fn revert(&self) {
        if self.fired.swap(true, Ordering::SeqCst) {
            return;
        }
        debug!(
            "Reverting version {:?} to {:?}",
            self.token.get(),
            self.previous
        );
        self.token.set(self.previous.clone());
    }
}

impl RollbackListener for VersionRevertListener {
    fn after_rollback(&self, _savepoint: Option<&str>) {
        self.revert();
    }
}
