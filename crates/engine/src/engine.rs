//! The dispatch engine.
//!
//! [`DispatchEngine`] is a single tokio task that owns every live task.
//! Transports talk to it through a cloneable [`EngineHandle`]; rendering
//! contexts talk to it through the [`EventSink`] they were created
//! with. Because all state lives in one task, nothing here needs a lock,
//! and every trigger for a task is applied strictly in arrival order.
//!
//! Timers live in a [`DelayQueue`]. Cancelling a timer removes its key,
//! so a deadline that has been cancelled can never fire.
//!
//! The engine stops when every [`EngineHandle`] has been dropped. Any
//! contexts still alive at that point are disposed.

use std::collections::HashMap;
use std::sync::Arc;

use futures::StreamExt;
use renderq_core::{ClientId, FailureNotice, Job, JobError, JobPayload, TaskId};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::time::{delay_queue, DelayQueue};

use crate::context::{ContextEvent, ContextId, EventSink, RenderContext, RenderProvider};
use crate::sink::{ReplyTarget, ResultSink};
use crate::tracker::{Effect, Outcome, TaskTracker, Trigger};

/// Errors returned by [`EngineHandle::submit`].
#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    #[error("Invalid job: {0}")]
    Job(#[from] JobError),

    #[error("Dispatch engine has stopped")]
    EngineStopped,
}

/// Engine-internal key of a live task.
///
/// Task ids come from hosts and are not guaranteed unique, so the
/// engine indexes by its own key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct TaskKey(u64);

/// A validated job together with where its outcome must go.
struct Submission {
    job: Job,
    origin: Arc<dyn ResultSink>,
    reply: Option<ReplyTarget>,
    client_id: Option<ClientId>,
}

/// Cloneable front door of a running [`DispatchEngine`].
#[derive(Clone)]
pub struct EngineHandle {
    submissions: mpsc::UnboundedSender<Submission>,
}

impl EngineHandle {
    /// Validate `payload` and hand it to the engine.
    ///
    /// `origin` receives the outcome; `reply` is passed back to it
    /// untouched. The origin's current identity is captured here and
    /// stamped on every outcome of this job.
    ///
    /// A payload that fails validation is rejected before any context
    /// is allocated for it.
    pub fn submit(
        &self,
        payload: JobPayload,
        origin: Arc<dyn ResultSink>,
        reply: Option<ReplyTarget>,
    ) -> Result<TaskId, SubmitError> {
        let job = Job::try_from(payload)?;
        let task_id = job.id.clone();
        let client_id = origin.identity();

        self.submissions
            .send(Submission {
                job,
                origin,
                reply,
                client_id,
            })
            .map_err(|_| SubmitError::EngineStopped)?;

        Ok(task_id)
    }

    /// Whether the engine task has stopped accepting work.
    pub fn is_closed(&self) -> bool {
        self.submissions.is_closed()
    }
}

/// Bookkeeping for one task between admission and its terminal state.
struct LiveTask {
    tracker: TaskTracker,
    context_id: ContextId,
    /// `None` once disposed.
    context: Option<Box<dyn RenderContext>>,
    /// `None` once cancelled or fired.
    timer: Option<delay_queue::Key>,
    origin: Arc<dyn ResultSink>,
    reply: Option<ReplyTarget>,
}

pub struct DispatchEngine {
    provider: Arc<dyn RenderProvider>,
    submissions: mpsc::UnboundedReceiver<Submission>,
    events_tx: mpsc::UnboundedSender<(ContextId, ContextEvent)>,
    events: mpsc::UnboundedReceiver<(ContextId, ContextEvent)>,
    timers: DelayQueue<TaskKey>,
    tasks: HashMap<TaskKey, LiveTask>,
    by_context: HashMap<ContextId, TaskKey>,
    next_task: u64,
    next_context: u64,
}

impl DispatchEngine {
    /// Spawn the engine on the current runtime.
    ///
    /// Returns the handle transports submit through and the engine's
    /// join handle, which resolves once every handle is dropped and the
    /// remaining contexts are disposed.
    pub fn start(provider: Arc<dyn RenderProvider>) -> (EngineHandle, JoinHandle<()>) {
        let (submissions_tx, submissions) = mpsc::unbounded_channel();
        let (events_tx, events) = mpsc::unbounded_channel();

        let engine = Self {
            provider,
            submissions,
            events_tx,
            events,
            timers: DelayQueue::new(),
            tasks: HashMap::new(),
            by_context: HashMap::new(),
            next_task: 0,
            next_context: 0,
        };

        let join = tokio::spawn(engine.run());
        (
            EngineHandle {
                submissions: submissions_tx,
            },
            join,
        )
    }

    async fn run(mut self) {
        tracing::info!("Dispatch engine started");

        loop {
            tokio::select! {
                submission = self.submissions.recv() => match submission {
                    Some(submission) => self.admit(submission),
                    None => break,
                },
                Some((context_id, event)) = self.events.recv() => {
                    self.on_context_event(context_id, event);
                }
                Some(expired) = self.timers.next() => {
                    self.on_timer(expired.into_inner());
                }
            }
        }

        self.shutdown();
    }

    // TODO: bound the number of live contexts; every admitted job gets a
    // context immediately, so a burst of jobs launches a burst of pages.
    fn admit(&mut self, submission: Submission) {
        let Submission {
            job,
            origin,
            reply,
            client_id,
        } = submission;

        let key = TaskKey(self.next_task);
        self.next_task += 1;
        let context_id = ContextId(self.next_context);
        self.next_context += 1;

        let sink = EventSink::new(context_id, self.events_tx.clone());
        let context = match self.provider.create(sink) {
            Ok(context) => context,
            Err(e) => {
                tracing::error!(
                    task_id = %job.id,
                    url = %job.url,
                    error = %e,
                    "Failed to create rendering context",
                );
                let notice = FailureNotice {
                    task_id: Some(job.id),
                    url: Some(job.url),
                    client_id,
                    error: e.to_string(),
                };
                spawn_delivery(origin, reply, Outcome::Failed(notice));
                return;
            }
        };

        tracing::info!(
            task_id = %job.id,
            url = %job.url,
            context = %context_id,
            transport = origin.name(),
            "Task admitted",
        );

        self.tasks.insert(
            key,
            LiveTask {
                tracker: TaskTracker::new(job, client_id),
                context_id,
                context: Some(context),
                timer: None,
                origin,
                reply,
            },
        );
        self.by_context.insert(context_id, key);
        self.drive(key, Trigger::Start);
    }

    fn on_context_event(&mut self, context_id: ContextId, event: ContextEvent) {
        match self.by_context.get(&context_id) {
            Some(&key) => self.drive(key, Trigger::Context(event)),
            None => {
                tracing::trace!(context = %context_id, ?event, "Dropping event for released context");
            }
        }
    }

    fn on_timer(&mut self, key: TaskKey) {
        let Some(task) = self.tasks.get_mut(&key) else {
            return;
        };
        // The queue already dropped the entry; its key is now stale.
        task.timer = None;
        self.drive(key, Trigger::TimerFired);
    }

    /// Feed one trigger to a task's tracker and apply the effects.
    fn drive(&mut self, key: TaskKey, trigger: Trigger) {
        let Some(task) = self.tasks.get_mut(&key) else {
            return;
        };

        for effect in task.tracker.step(trigger) {
            match effect {
                Effect::ArmTimer(after) => {
                    task.timer = Some(self.timers.insert(key, after));
                }
                Effect::CancelTimer => {
                    if let Some(timer) = task.timer.take() {
                        self.timers.remove(&timer);
                    }
                }
                Effect::Navigate { url, headers } => {
                    if let Some(context) = task.context.as_mut() {
                        context.navigate(&url, &headers);
                    }
                }
                Effect::Watch(event) => {
                    if let Some(context) = task.context.as_mut() {
                        context.watch(event);
                    }
                }
                Effect::RunInjection(script) => {
                    if let Some(context) = task.context.as_mut() {
                        context.run_injection(&script);
                    }
                }
                Effect::RunCompletion(fetch_code) => {
                    if let Some(context) = task.context.as_mut() {
                        context.run_completion(fetch_code.as_deref());
                    }
                }
                Effect::Dispose => {
                    self.by_context.remove(&task.context_id);
                    if let Some(context) = task.context.take() {
                        context.dispose();
                    }
                }
                Effect::Deliver(outcome) => {
                    log_outcome(&outcome, task.context_id);
                    spawn_delivery(Arc::clone(&task.origin), task.reply.clone(), outcome);
                }
            }
        }

        if task.tracker.state().is_terminal() {
            self.tasks.remove(&key);
        }
    }

    fn shutdown(&mut self) {
        tracing::info!(live = self.tasks.len(), "Dispatch engine stopping");

        for (_, mut task) in self.tasks.drain() {
            if let Some(context) = task.context.take() {
                context.dispose();
            }
        }
        self.by_context.clear();
        self.timers.clear();

        tracing::info!("Dispatch engine stopped");
    }
}

fn log_outcome(outcome: &Outcome, context_id: ContextId) {
    match outcome {
        Outcome::Finished(result) => tracing::info!(
            task_id = %result.task_id,
            context = %context_id,
            new_url = %result.new_url,
            status = ?result.status_code,
            "Task finished",
        ),
        Outcome::TimedOut(notice) => tracing::warn!(
            task_id = %notice.task_id,
            context = %context_id,
            url = %notice.url,
            "Task timed out",
        ),
        Outcome::Failed(notice) => tracing::warn!(
            task_id = ?notice.task_id,
            context = %context_id,
            error = %notice.error,
            "Task failed",
        ),
    }
}

/// Hand an outcome to its transport without stalling the engine loop.
fn spawn_delivery(origin: Arc<dyn ResultSink>, reply: Option<ReplyTarget>, outcome: Outcome) {
    tokio::spawn(async move {
        let delivered = match &outcome {
            Outcome::Finished(result) => origin.deliver_result(reply.as_ref(), result).await,
            Outcome::TimedOut(notice) => origin.deliver_timeout(reply.as_ref(), notice).await,
            Outcome::Failed(notice) => origin.deliver_failure(reply.as_ref(), notice).await,
        };
        if let Err(e) = delivered {
            tracing::error!(transport = origin.name(), error = %e, "Failed to deliver outcome");
        }
    });
}
