//! Shared data model for the render worker.
//!
//! Everything that crosses a crate boundary lives here: the inbound
//! [`Job`] (and its wire form [`JobPayload`]), the outbound
//! [`RenderResult`], [`TimeoutNotice`] and [`FailureNotice`], the
//! response details captured while a page loads, and the opaque
//! correlation tokens that tie them together.

pub mod error;
pub mod job;
pub mod result;
pub mod types;

pub use error::JobError;
pub use job::{Job, JobPayload, LifecycleEvent, Mode, DEFAULT_TIMEOUT};
pub use result::{Completion, FailureNotice, RenderResult, ResponseDetails, TimeoutNotice};
pub use types::{ClientId, Headers, TaskId, Token};
