//! Headless Chromium rendering contexts.
//!
//! [`CdpProvider`] drives a single browser over the DevTools protocol and
//! gives every task its own page. Pages report back through a Runtime
//! binding: a content script installed on every new document defines
//! `window.FINISH(content[, contentType])`, which page code (or the
//! completion step) calls to end the task.

pub mod context;
pub mod error;
pub mod observe;
pub mod provider;

pub use context::CdpContext;
pub use error::BrowserError;
pub use provider::{BrowserOptions, CdpProvider};
