use anyhow::Result;
use log::info;

use super::models::EdgeStatus;
use super::pending::PendingQueue;
use super::state_store::ConnectionStateStore;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Edges found GENERATING, rewritten to PLANNED and queued.
    pub requeued_generating: usize,
    pub requeued_planned: usize,
    /// COMPLETED or FAILED edges left alone.
    pub untouched: usize,
}

/// Load-time reconciliation of persisted edges with the pending queue.
///
/// No job survives a process boundary, so a GENERATING edge found at load
/// was interrupted. All such edges are reset to PLANNED in a single write,
/// then every PLANNED edge is queued in persisted order. The queue ignores
/// pairs it already holds, so a second pass adds nothing.
pub fn recover(store: &ConnectionStateStore, queue: &PendingQueue) -> Result<RecoveryReport> {
    let mut report = RecoveryReport::default();
    let edges = store.update_edges(|list| {
        let mut changed = false;
        for e in list.iter_mut() {
            match e.status {
                EdgeStatus::Generating => {
                    *e = e.transition(EdgeStatus::Planned)?;
                    changed = true;
                    report.requeued_generating += 1;
                }
                EdgeStatus::Planned => report.requeued_planned += 1,
                EdgeStatus::Completed | EdgeStatus::Failed => report.untouched += 1,
            }
        }
        Ok((list.clone(), changed))
    })?;

    let mut queued = 0;
    for e in edges.iter().filter(|e| e.status == EdgeStatus::Planned) {
        if queue.push(e) {
            queued += 1;
        }
    }

    info!(
        "recovery: world '{}': {} interrupted, {} planned, {} terminal; {} newly queued",
        store.world(),
        report.requeued_generating,
        report.requeued_planned,
        report.untouched,
        queued
    );
    Ok(report)
}
