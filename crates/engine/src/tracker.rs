//! Per-task state machine.
//!
//! [`TaskTracker::step`] is a pure function of the tracker's state and
//! one [`Trigger`]; it returns the [`Effect`]s the engine must carry
//! out, in order. It never touches a context, a timer or a transport
//! itself, which keeps every transition testable without a browser.
//!
//! ```text
//! Created ──Start──▶ Loading ──▶ AwaitingCompletion ──┬─ completion ─▶ Finished
//!                                                      ├─ timer ──────▶ TimedOut
//!                                                      └─ failure ────▶ Failed
//! ```
//!
//! Once a terminal state is reached every further trigger is a no-op.

use std::time::Duration;

use renderq_core::{
    ClientId, Completion, FailureNotice, Headers, Job, LifecycleEvent, RenderResult,
    ResponseDetails, TimeoutNotice,
};

use crate::context::ContextEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Created,
    Loading,
    AwaitingCompletion,
    Finished,
    TimedOut,
    Failed,
}

impl TaskState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Finished | Self::TimedOut | Self::Failed)
    }
}

/// Input to the state machine.
#[derive(Debug, Clone, PartialEq)]
pub enum Trigger {
    /// The task was admitted and its context allocated.
    Start,
    /// The task's context reported an event.
    Context(ContextEvent),
    /// The task's deadline passed.
    TimerFired,
}

/// Side effect requested by a transition.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    ArmTimer(Duration),
    CancelTimer,
    Navigate { url: String, headers: Headers },
    Watch(LifecycleEvent),
    RunInjection(String),
    RunCompletion(Option<String>),
    Dispose,
    Deliver(Outcome),
}

/// Terminal payload for the originating transport.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Finished(RenderResult),
    TimedOut(TimeoutNotice),
    Failed(FailureNotice),
}

/// State of one task from admission to its terminal transition.
#[derive(Debug)]
pub struct TaskTracker {
    job: Job,
    client_id: Option<ClientId>,
    state: TaskState,
    /// One-shot lifecycle listener; `None` once fired or never armed.
    listener: Option<LifecycleEvent>,
    timer_armed: bool,
    /// Latest URL of the main document request, following redirects.
    current_url: String,
    response: Option<ResponseDetails>,
}

impl TaskTracker {
    pub fn new(job: Job, client_id: Option<ClientId>) -> Self {
        let current_url = job.url.clone();
        Self {
            job,
            client_id,
            state: TaskState::Created,
            listener: None,
            timer_armed: false,
            current_url,
            response: None,
        }
    }

    pub fn state(&self) -> TaskState {
        self.state
    }

    /// The lifecycle event the task is still waiting on, if any.
    pub fn listener(&self) -> Option<LifecycleEvent> {
        self.listener
    }

    pub fn timer_armed(&self) -> bool {
        self.timer_armed
    }

    pub fn current_url(&self) -> &str {
        &self.current_url
    }

    /// Response details captured for the current document, if any.
    pub fn response(&self) -> Option<&ResponseDetails> {
        self.response.as_ref()
    }

    /// Advance the state machine by one trigger.
    pub fn step(&mut self, trigger: Trigger) -> Vec<Effect> {
        if self.state.is_terminal() {
            return Vec::new();
        }
        match trigger {
            Trigger::Start => self.start(),
            Trigger::TimerFired => self.time_out(),
            Trigger::Context(event) => self.observe(event),
        }
    }

    fn start(&mut self) -> Vec<Effect> {
        if self.state != TaskState::Created {
            return Vec::new();
        }
        self.timer_armed = true;
        self.state = TaskState::Loading;
        let mut effects = vec![Effect::ArmTimer(self.job.timeout)];

        // The injection (or listener) goes out before navigation so the
        // context has it in place when the new document appears.
        match self.job.injection_script() {
            Some(script) => effects.push(Effect::RunInjection(script.to_string())),
            None => {
                self.listener = Some(self.job.event);
                effects.push(Effect::Watch(self.job.event));
            }
        }
        effects.push(Effect::Navigate {
            url: self.job.url.clone(),
            headers: self.job.headers.clone(),
        });

        self.state = TaskState::AwaitingCompletion;
        effects
    }

    fn observe(&mut self, event: ContextEvent) -> Vec<Effect> {
        match event {
            ContextEvent::LoadStarted => Vec::new(),
            ContextEvent::Redirect { to, .. } => {
                self.current_url = to;
                if self
                    .response
                    .as_ref()
                    .is_some_and(|r| r.url != self.current_url)
                {
                    self.response = None;
                }
                Vec::new()
            }
            ContextEvent::Response(details) => {
                if details.is_get_for(&self.current_url) {
                    self.response = Some(details);
                }
                Vec::new()
            }
            ContextEvent::Lifecycle(event) => {
                if self.state == TaskState::AwaitingCompletion && self.listener == Some(event) {
                    self.listener = None;
                    vec![Effect::RunCompletion(self.job.fetch_code.clone())]
                } else {
                    Vec::new()
                }
            }
            ContextEvent::Completion(completion) => {
                if self.state == TaskState::AwaitingCompletion {
                    self.finish(completion)
                } else {
                    Vec::new()
                }
            }
            ContextEvent::Failed(error) => self.fail(error),
        }
    }

    fn finish(&mut self, completion: Completion) -> Vec<Effect> {
        self.state = TaskState::Finished;
        self.listener = None;
        let result = RenderResult::assemble(
            self.job.id.clone(),
            self.job.url.clone(),
            completion,
            self.response.as_ref(),
            self.client_id.clone(),
        );
        let mut effects = self.disarm();
        effects.push(Effect::Dispose);
        effects.push(Effect::Deliver(Outcome::Finished(result)));
        effects
    }

    fn time_out(&mut self) -> Vec<Effect> {
        if !self.timer_armed {
            return Vec::new();
        }
        // The timer consumed itself by firing; there is nothing to cancel.
        self.timer_armed = false;
        self.state = TaskState::TimedOut;
        self.listener = None;
        vec![
            Effect::Dispose,
            Effect::Deliver(Outcome::TimedOut(TimeoutNotice {
                task_id: self.job.id.clone(),
                url: self.job.url.clone(),
                client_id: self.client_id.clone(),
            })),
        ]
    }

    fn fail(&mut self, error: String) -> Vec<Effect> {
        self.state = TaskState::Failed;
        self.listener = None;
        let mut effects = self.disarm();
        effects.push(Effect::Dispose);
        effects.push(Effect::Deliver(Outcome::Failed(FailureNotice {
            task_id: Some(self.job.id.clone()),
            url: Some(self.job.url.clone()),
            client_id: self.client_id.clone(),
            error,
        })));
        effects
    }

    fn disarm(&mut self) -> Vec<Effect> {
        if std::mem::replace(&mut self.timer_armed, false) {
            vec![Effect::CancelTimer]
        } else {
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use renderq_core::{JobPayload, TaskId};

    use super::*;

    fn job(json: &str) -> Job {
        Job::try_from(JobPayload::from_slice(json.as_bytes()).unwrap()).unwrap()
    }

    fn started(json: &str) -> TaskTracker {
        let mut tracker = TaskTracker::new(job(json), Some(ClientId::from(5)));
        tracker.step(Trigger::Start);
        tracker
    }

    fn completion(url: &str) -> Completion {
        Completion {
            new_url: url.into(),
            content: "<html/>".into(),
            content_type: Some("text/html".into()),
        }
    }

    fn get(url: &str, status: u16) -> ContextEvent {
        ContextEvent::Response(ResponseDetails {
            url: url.into(),
            original_url: "http://x/1".into(),
            status_code: status,
            request_method: "GET".into(),
            ..Default::default()
        })
    }

    fn redirect(from: &str, to: &str) -> ContextEvent {
        ContextEvent::Redirect {
            from: from.into(),
            to: to.into(),
        }
    }

    // -- start ----------------------------------------------------------------

    #[test]
    fn main_wait_arms_timer_and_registers_listener() {
        let mut tracker = TaskTracker::new(job(r#"{"url":"http://x/a","taskID":"t1"}"#), None);
        let effects = tracker.step(Trigger::Start);

        assert_eq!(
            effects,
            vec![
                Effect::ArmTimer(Duration::from_millis(20_000)),
                Effect::Watch(LifecycleEvent::LoadFinished),
                Effect::Navigate {
                    url: "http://x/a".into(),
                    headers: Headers::new(),
                },
            ]
        );
        assert_eq!(tracker.state(), TaskState::AwaitingCompletion);
        assert_eq!(tracker.listener(), Some(LifecycleEvent::LoadFinished));
        assert!(tracker.timer_armed());
    }

    #[test]
    fn inject_dispatches_script_without_listener() {
        let mut tracker = TaskTracker::new(
            job(r#"{"url":"http://x/a","taskID":"t1","mode":"INJECT","injection":"doStuff()"}"#),
            None,
        );
        let effects = tracker.step(Trigger::Start);

        assert!(effects.contains(&Effect::RunInjection("doStuff()".into())));
        assert!(!effects.iter().any(|e| matches!(e, Effect::Watch(_))));
        assert_eq!(tracker.listener(), None);

        // A lifecycle event must not trigger the completion step.
        let effects = tracker.step(Trigger::Context(ContextEvent::Lifecycle(
            LifecycleEvent::LoadFinished,
        )));
        assert!(effects.is_empty());
    }

    #[test]
    fn inject_without_script_behaves_like_main_wait() {
        let mut tracker = TaskTracker::new(
            job(r#"{"url":"http://x/a","taskID":"t1","mode":"INJECT"}"#),
            None,
        );
        let effects = tracker.step(Trigger::Start);
        assert!(effects.contains(&Effect::Watch(LifecycleEvent::LoadFinished)));
        assert!(!effects.iter().any(|e| matches!(e, Effect::RunInjection(_))));
    }

    #[test]
    fn start_twice_is_ignored() {
        let mut tracker = started(r#"{"url":"http://x/a","taskID":1}"#);
        assert!(tracker.step(Trigger::Start).is_empty());
    }

    // -- lifecycle ------------------------------------------------------------

    #[test]
    fn lifecycle_event_runs_fetch_code_once() {
        let mut tracker = started(r#"{"url":"http://x/a","taskID":1,"fetchCode":"grab()"}"#);
        let fired = Trigger::Context(ContextEvent::Lifecycle(LifecycleEvent::LoadFinished));

        assert_eq!(
            tracker.step(fired.clone()),
            vec![Effect::RunCompletion(Some("grab()".into()))]
        );
        assert_eq!(tracker.listener(), None);
        assert!(tracker.step(fired).is_empty());
        // Still waiting for the signal, timer still running.
        assert_eq!(tracker.state(), TaskState::AwaitingCompletion);
        assert!(tracker.timer_armed());
    }

    #[test]
    fn other_lifecycle_events_are_ignored() {
        let mut tracker = started(r#"{"url":"http://x/a","taskID":1,"event":"dom-ready"}"#);
        let effects = tracker.step(Trigger::Context(ContextEvent::Lifecycle(
            LifecycleEvent::LoadFinished,
        )));
        assert!(effects.is_empty());
        let effects =
            tracker.step(Trigger::Context(ContextEvent::Lifecycle(LifecycleEvent::DomReady)));
        assert_eq!(effects, vec![Effect::RunCompletion(None)]);
    }

    // -- completion -----------------------------------------------------------

    #[test]
    fn completion_cancels_timer_disposes_and_delivers() {
        let mut tracker = started(r#"{"url":"http://x/a","taskID":"t1"}"#);
        let effects = tracker.step(Trigger::Context(ContextEvent::Completion(completion(
            "http://x/a",
        ))));

        assert_eq!(effects.len(), 3);
        assert_eq!(effects[0], Effect::CancelTimer);
        assert_eq!(effects[1], Effect::Dispose);
        assert_matches!(&effects[2], Effect::Deliver(Outcome::Finished(result)) => {
            assert_eq!(result.task_id, TaskId::from("t1"));
            assert_eq!(result.original_url, "http://x/a");
            assert_eq!(result.new_url, "http://x/a");
            assert_eq!(result.content, "<html/>");
            assert_eq!(result.client_id, Some(ClientId::from(5)));
        });
        assert_eq!(tracker.state(), TaskState::Finished);
        assert!(!tracker.timer_armed());
    }

    #[test]
    fn timeout_disposes_before_notice() {
        let mut tracker = started(r#"{"url":"http://x/a","taskID":"t1","timeout":5000}"#);
        let effects = tracker.step(Trigger::TimerFired);

        assert_eq!(effects[0], Effect::Dispose);
        assert_matches!(&effects[1], Effect::Deliver(Outcome::TimedOut(notice)) => {
            assert_eq!(notice.task_id, TaskId::from("t1"));
            assert_eq!(notice.url, "http://x/a");
        });
        assert!(!effects.contains(&Effect::CancelTimer));
        assert_eq!(tracker.state(), TaskState::TimedOut);
    }

    #[test]
    fn completion_after_timeout_is_a_no_op() {
        let mut tracker = started(r#"{"url":"http://x/a","taskID":1}"#);
        tracker.step(Trigger::TimerFired);
        let effects = tracker.step(Trigger::Context(ContextEvent::Completion(completion(
            "http://x/a",
        ))));
        assert!(effects.is_empty());
        assert_eq!(tracker.state(), TaskState::TimedOut);
    }

    #[test]
    fn timer_after_completion_is_a_no_op() {
        let mut tracker = started(r#"{"url":"http://x/a","taskID":1}"#);
        tracker.step(Trigger::Context(ContextEvent::Completion(completion("http://x/a"))));
        assert!(tracker.step(Trigger::TimerFired).is_empty());
        assert_eq!(tracker.state(), TaskState::Finished);
    }

    #[test]
    fn timer_before_start_is_ignored() {
        let mut tracker = TaskTracker::new(job(r#"{"url":"http://x/a","taskID":1}"#), None);
        assert!(tracker.step(Trigger::TimerFired).is_empty());
        assert_eq!(tracker.state(), TaskState::Created);
    }

    #[test]
    fn failure_cancels_timer_and_reports() {
        let mut tracker = started(r#"{"url":"http://x/a","taskID":1}"#);
        let effects =
            tracker.step(Trigger::Context(ContextEvent::Failed("net::ERR_NAME".into())));
        assert_eq!(effects[0], Effect::CancelTimer);
        assert_eq!(effects[1], Effect::Dispose);
        assert_matches!(&effects[2], Effect::Deliver(Outcome::Failed(notice)) => {
            assert_eq!(notice.error, "net::ERR_NAME");
            assert_eq!(notice.url.as_deref(), Some("http://x/a"));
        });
        assert!(tracker.step(Trigger::TimerFired).is_empty());
    }

    // -- response tracking ----------------------------------------------------

    #[test]
    fn redirect_chain_keeps_only_final_response() {
        let mut tracker = started(r#"{"url":"http://x/1","taskID":1}"#);
        tracker.step(Trigger::Context(get("http://x/1", 301)));
        assert_eq!(tracker.response().map(|r| r.status_code), Some(301));

        tracker.step(Trigger::Context(redirect("http://x/1", "http://x/2")));
        assert!(tracker.response().is_none(), "stale response must be discarded");
        tracker.step(Trigger::Context(redirect("http://x/2", "http://x/3")));
        assert_eq!(tracker.current_url(), "http://x/3");

        // A late observation for an earlier hop is ignored.
        tracker.step(Trigger::Context(get("http://x/2", 302)));
        assert!(tracker.response().is_none());

        tracker.step(Trigger::Context(get("http://x/3", 200)));
        assert_eq!(tracker.response().map(|r| r.url.as_str()), Some("http://x/3"));

        let effects = tracker.step(Trigger::Context(ContextEvent::Completion(completion(
            "http://x/3",
        ))));
        assert_matches!(effects.last(), Some(Effect::Deliver(Outcome::Finished(result))) => {
            assert_eq!(result.status_code, Some(200));
            assert_eq!(result.original_url, "http://x/1");
            assert_eq!(result.new_url, "http://x/3");
        });
    }

    #[test]
    fn non_get_responses_are_ignored() {
        let mut tracker = started(r#"{"url":"http://x/a","taskID":1}"#);
        tracker.step(Trigger::Context(ContextEvent::Response(ResponseDetails {
            url: "http://x/a".into(),
            request_method: "POST".into(),
            status_code: 200,
            ..Default::default()
        })));
        assert!(tracker.response().is_none());
    }

    #[test]
    fn last_matching_response_wins() {
        let mut tracker = started(r#"{"url":"http://x/a","taskID":1}"#);
        tracker.step(Trigger::Context(get("http://x/a", 503)));
        tracker.step(Trigger::Context(get("http://x/a", 200)));
        assert_eq!(tracker.response().map(|r| r.status_code), Some(200));
    }
}
