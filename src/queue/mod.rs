//! The vault's queue directories and the task files that move between them.
//!
//! A task's lifecycle state is the directory that holds it. Every state
//! change is one `rename(2)`; metadata written afterwards is a whole-file
//! atomic replace inside the destination directory.

mod snapshot;
mod store;
mod task;

pub use snapshot::{DirSnapshot, DirectoryPoller, FileStamp, SnapshotDiff};
pub use store::{TaskStore, is_task_file, task_id};
pub use task::{Priority, Task, TaskMeta};

use serde::{Deserialize, Serialize};

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
    strum::IntoStaticStr,
)]
pub enum Queue {
    #[strum(serialize = "Inbox")]
    #[serde(rename = "Inbox")]
    Inbox,
    #[strum(serialize = "Needs_Action")]
    #[serde(rename = "Needs_Action")]
    NeedsAction,
    #[strum(serialize = "Pending_Approval")]
    #[serde(rename = "Pending_Approval")]
    PendingApproval,
    #[strum(serialize = "Approved")]
    #[serde(rename = "Approved")]
    Approved,
    #[strum(serialize = "Rejected")]
    #[serde(rename = "Rejected")]
    Rejected,
    #[strum(serialize = "Done")]
    #[serde(rename = "Done")]
    Done,
    #[strum(serialize = "Failed")]
    #[serde(rename = "Failed")]
    Failed,
    #[strum(serialize = "Expired")]
    #[serde(rename = "Expired")]
    Expired,
}

impl Queue {
    pub fn all() -> impl Iterator<Item = Queue> {
        <Self as strum::IntoEnumIterator>::iter()
    }

    pub fn dir_name(self) -> &'static str {
        self.into()
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Rejected | Self::Done | Self::Failed | Self::Expired)
    }

    /// Human-readable mirror written into the task's `status` key.
    pub fn status_label(self) -> &'static str {
        match self {
            Self::Inbox => "new",
            Self::NeedsAction => "pending",
            Self::PendingApproval => "pending_approval",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Done => "done",
            Self::Failed => "failed",
            Self::Expired => "expired",
        }
    }
}
