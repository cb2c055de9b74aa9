// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! File-based delegation protocol.
//!
//! Requests and responses are immutable files in a branch's shared messages
//! directory, written via temp-file-then-rename. A response's existence is
//! the only success signal.
//!
//! # Layout
//!
//! - [`filename`] - typed `{NNNN}.{role}.{kind}.{slug}.md` codec
//! - [`header`] - `---` header blocks
//! - [`counter`] - locked task counter
//! - [`lock`] - exclusive file locks
//! - [`descriptor`] - `current-task.json`
//! - [`store`] - create, scan and pair message files
//! - [`feedback`] - structured completion feedback
//! - [`workflow`] - append-only event log

pub mod atomic;
pub mod counter;
pub mod descriptor;
pub mod feedback;
pub mod filename;
pub mod header;
pub mod lock;
pub mod store;
pub mod workflow;

pub use counter::TaskCounter;
pub use descriptor::TaskDescriptor;
pub use feedback::{FeedbackCategories, FeedbackRecord};
pub use filename::{glob_for, slugify, MessageFileName, MessageKind};
pub use header::{CompletionMode, RequestHeader, ResponseHeader};
pub use lock::FileLock;
pub use store::{MessageEntry, MessageStore, NewRequest};
pub use workflow::{WorkflowEvent, WorkflowLog};
