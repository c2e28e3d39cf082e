//! Single-flight slot for bulk exports.
//!
//! At most one export streams at a time. Acquiring the slot cancels the
//! export currently holding it, which then fails its stream with a
//! "superseded" error. The slot is a mutex-guarded `Option`, so it is safe
//! to acquire from any runtime worker thread.

use std::sync::{
    Arc, Mutex, MutexGuard, PoisonError,
    atomic::{AtomicU64, Ordering},
};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Debug)]
struct ActiveExport {
    id: u64,
    cancel: CancellationToken,
}

type Slot = Arc<Mutex<Option<ActiveExport>>>;

fn lock(slot: &Slot) -> MutexGuard<'_, Option<ActiveExport>> {
    // The guarded value is a plain Option that is always left consistent.
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Clone, Debug, Default)]
pub struct ExportGuard {
    slot: Slot,
    next_id: Arc<AtomicU64>,
}

impl ExportGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the slot, cancelling whichever export held it.
    pub fn acquire(&self) -> ExportTicket {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let cancel = CancellationToken::new();

        let mut slot = lock(&self.slot);
        if let Some(previous) = slot.take() {
            warn!(
                export_id = previous.id,
                superseded_by = id,
                "cancelling export: superseded by new request"
            );
            previous.cancel.cancel();
        }
        *slot = Some(ActiveExport {
            id,
            cancel: cancel.clone(),
        });
        info!(export_id = id, "export slot acquired");

        ExportTicket {
            id,
            cancel,
            slot: self.slot.clone(),
        }
    }

    /// Id of the export currently holding the slot.
    pub fn active(&self) -> Option<u64> {
        lock(&self.slot).as_ref().map(|active| active.id)
    }
}

/// Proof of holding the export slot. Dropping it frees the slot unless a
/// newer export already took it over.
#[derive(Debug)]
pub struct ExportTicket {
    id: u64,
    cancel: CancellationToken,
    slot: Slot,
}

impl ExportTicket {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Token cancelled when a newer export supersedes this one.
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    #[cfg(test)]
    pub fn is_superseded(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl Drop for ExportTicket {
    fn drop(&mut self) {
        let mut slot = lock(&self.slot);
        if slot.as_ref().is_some_and(|active| active.id == self.id) {
            *slot = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_ticket_supersedes_previous_one() {
        let guard = ExportGuard::new();
        let first = guard.acquire();
        assert_eq!(guard.active(), Some(first.id()));
        assert!(!first.is_superseded());

        let second = guard.acquire();
        assert!(first.is_superseded());
        assert!(!second.is_superseded());
        assert_eq!(guard.active(), Some(second.id()));
    }

    #[test]
    fn stale_ticket_drop_keeps_newer_holder() {
        let guard = ExportGuard::new();
        let first = guard.acquire();
        let second = guard.acquire();

        drop(first);
        assert_eq!(guard.active(), Some(second.id()));

        drop(second);
        assert_eq!(guard.active(), None);
    }

    #[test]
    fn ids_are_unique_across_clones() {
        let guard = ExportGuard::new();
        let clone = guard.clone();
        let a = guard.acquire();
        let b = clone.acquire();
        assert_ne!(a.id(), b.id());
        assert!(a.is_superseded());
    }
}
