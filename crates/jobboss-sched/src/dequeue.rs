//! Group-fair dequeue.
//!
//! Pending jobs are grouped by `(priority, path, batch_id)`. Every group gets
//! `floor(priority + completion_ratio * employee_limit)` slots per scheduler
//! iteration, so no group is starved and groups nearer completion drain
//! faster. The selections are merged and ordered by id.

use tracing::trace;

use crate::error::SchedResult;
use crate::job::{Job, Priority};
use crate::persistence::JobStore;

/// Fairness grouping key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct JobGroup {
    pub priority: Priority,
    pub path: String,
    pub batch_id: Option<String>,
}

/// Per-group counters returned by the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupStats {
    pub group: JobGroup,

    /// Jobs in the group with `completed_at` set.
    pub completed: u64,

    /// Every job ever inserted into the group (still present in the store).
    pub total: u64,
}

impl GroupStats {
    /// Fraction of the group already finalized, in `[0, 1]`.
    pub fn completion_ratio(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.completed as f64 / self.total as f64
        }
    }

    /// Number of the group's oldest pending jobs to offer this iteration.
    pub fn effective_take(&self, employee_limit: usize) -> usize {
        effective_take(self.group.priority, self.completion_ratio(), employee_limit)
    }
}

/// `floor(priority + completion_ratio * employee_limit)`.
pub fn effective_take(priority: Priority, completion_ratio: f64, employee_limit: usize) -> usize {
    let ratio = completion_ratio.clamp(0.0, 1.0);
    (priority.value() as f64 + ratio * employee_limit as f64).floor() as usize
}

/// Compute this iteration's candidate list.
///
/// Never returns a cancelled or already started job. Unconsumed candidates are
/// not reserved; the list is recomputed from scratch on every call.
pub async fn dequeue(store: &dyn JobStore, employee_limit: usize) -> SchedResult<Vec<Job>> {
    let groups = store.pending_groups().await?;

    let mut candidates = Vec::new();
    for stats in &groups {
        let take = stats.effective_take(employee_limit);
        if take == 0 {
            continue;
        }

        trace!(
            path = %stats.group.path,
            batch_id = ?stats.group.batch_id,
            completed = stats.completed,
            total = stats.total,
            take,
            "Dequeue group"
        );

        candidates.extend(store.oldest_pending(&stats.group, take).await?);
    }

    candidates.sort_by_key(|job| job.id);
    candidates.dedup_by_key(|job| job.id);
    Ok(candidates)
}
