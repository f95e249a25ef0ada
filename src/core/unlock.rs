//! Administrative removal of a state lock.
//!
//! Nothing here checks whether the original holder is still running. The
//! caller has to say so explicitly with [`Confirmation::Forced`].

use crate::aws::cli::LockTable;
use crate::core::error::{MigrationError, Result};
use crate::terraform::engine::StateEngine;
use crate::terraform::lock::LockRecord;
use tracing::{info, warn};

/// Explicit acknowledgement that a lock is being removed without its holder's consent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Confirmation {
    Unconfirmed,
    Forced,
}

impl From<bool> for Confirmation {
    fn from(force: bool) -> Self {
        if force {
            Confirmation::Forced
        } else {
            Confirmation::Unconfirmed
        }
    }
}

/// Remove the lock with the given ID. Refuses to do anything without confirmation.
pub async fn force_unlock(
    engine: &dyn StateEngine,
    lock_id: &str,
    confirmation: Confirmation,
) -> Result<()> {
    if lock_id.trim().is_empty() {
        return Err(MigrationError::Usage("a lock ID is required".to_string()));
    }
    if confirmation != Confirmation::Forced {
        return Err(MigrationError::Usage(format!(
            "Refusing to remove lock {} without --force. Make sure no other terraform run is using this state first",
            lock_id
        )));
    }
    warn!("Force-unlocking state lock {}", lock_id);
    engine.force_unlock(lock_id).await?;
    info!("Lock {} removed", lock_id);
    Ok(())
}

/// Look up a lock by ID so the operator can see who holds it before removing it.
pub async fn find_lock(
    locks: &dyn LockTable,
    table: &str,
    lock_id: &str,
) -> Option<LockRecord> {
    match locks.list_locks(table).await {
        Ok(records) => records.into_iter().find(|r| r.id == lock_id),
        Err(e) => {
            warn!("Could not read lock table {}: {}", table, e);
            None
        }
    }
}
