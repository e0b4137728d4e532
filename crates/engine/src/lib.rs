//! Task dispatch and execution engine.
//!
//! Turns inbound jobs into supervised rendering-context lifecycles:
//!
//! - [`context`]: the rendering capability the engine drives
//!   ([`RenderProvider`] / [`RenderContext`]) and the events it emits.
//! - [`tracker`]: the per-task state machine, a pure function of
//!   (state, trigger) producing side effects.
//! - [`engine`]: the event loop that owns every live task, applies
//!   tracker effects, races timeouts and correlates outcomes back to
//!   the originating transport.
//! - [`sink`]: the delivery half of a transport.

pub mod context;
pub mod engine;
pub mod sink;
pub mod tracker;

pub use context::{ContextEvent, ContextId, EventSink, RenderContext, RenderError, RenderProvider};
pub use engine::{DispatchEngine, EngineHandle, SubmitError};
pub use sink::{DeliveryError, ReplyTarget, ResultSink};
pub use tracker::{Effect, Outcome, TaskState, TaskTracker, Trigger};
