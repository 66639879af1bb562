//! Sync task model
//!
//! Every unit of work the daemon hands to a worker is one [`SyncTask`].
//! Termination is an explicit [`SyncTask::Terminate`] variant rather than an
//! out-of-band sentinel, so workers match exhaustively on the task kind.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

/// A unit of sync work, as carried on the task queues.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SyncTask {
    /// Reconcile a single person's enrollments from their registry groups.
    UserSync {
        /// Registry id of the person to sync.
        external_id: i64,
    },
    /// Reconcile one course from the given registry groups' member lists.
    CourseSync {
        /// LMS course code.
        course_id: String,
        /// Registry group ids mapped onto this course.
        group_ids: BTreeSet<String>,
    },
    /// Marks the beginning of a full reconciliation run.
    FullSyncStart,
    /// Marks the end of a full reconciliation fan-out.
    FullSyncDone,
    /// Poison pill. A worker receiving this exits its loop.
    Terminate,
}

impl SyncTask {
    /// Short label used in worker logs.
    pub fn kind(&self) -> &'static str {
        match self {
            SyncTask::UserSync { .. } => "user_sync",
            SyncTask::CourseSync { .. } => "course_sync",
            SyncTask::FullSyncStart => "full_sync_start",
            SyncTask::FullSyncDone => "full_sync_done",
            SyncTask::Terminate => "terminate",
        }
    }

    pub fn is_terminate(&self) -> bool {
        matches!(self, SyncTask::Terminate)
    }
}

impl fmt::Display for SyncTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncTask::UserSync { external_id } => write!(f, "user_sync({})", external_id),
            SyncTask::CourseSync {
                course_id,
                group_ids,
            } => write!(f, "course_sync({}, {} groups)", course_id, group_ids.len()),
            SyncTask::FullSyncStart => write!(f, "full_sync_start"),
            SyncTask::FullSyncDone => write!(f, "full_sync_done"),
            SyncTask::Terminate => write!(f, "terminate"),
        }
    }
}
