use std::time::Instant;

use crate::engine::EngineId;
use crate::event::{ActionStatus, Event};
use crate::runner::ResumeToken;

/// One unit of agent work displayed in progress.
#[derive(Debug, Clone, PartialEq)]
pub struct Action {
    pub id: Option<String>,
    pub kind: Option<String>,
    pub title: String,
    pub status: ActionStatus,
    pub detail: Option<String>,
}

/// The folded snapshot of a run, produced purely from the events observed so
/// far. Two runs that consume identical event sequences produce
/// byte-identical (field-for-field equal) `ProgressState`.
#[derive(Debug, Clone)]
pub struct ProgressState {
    pub engine_id: Option<EngineId>,
    pub resume_token: Option<ResumeToken>,
    pub actions: Vec<Action>,
    pub answer: Option<String>,
    pub ok: Option<bool>,
    pub error: Option<String>,
    pub started_at: Instant,
    pub finished: bool,
}

impl ProgressState {
    pub fn new() -> Self {
        Self {
            engine_id: None,
            resume_token: None,
            actions: Vec::new(),
            answer: None,
            ok: None,
            error: None,
            started_at: Instant::now(),
            finished: false,
        }
    }

    pub fn elapsed(&self) -> std::time::Duration {
        self.started_at.elapsed()
    }
}

impl Default for ProgressState {
    fn default() -> Self {
        Self::new()
    }
}

/// Pure reducer folding a sequence of `Event`s into a `ProgressState`
/// snapshot. Carries no I/O and no hidden state beyond what is passed in and
/// returned — a fresh `ProgressState` plus the same event sequence always
/// yields the same result.
pub struct Tracker;

impl Tracker {
    /// Fold one event into `state`, returning the updated state. Once
    /// `finished` is set, further events are ignored (the invariant that a
    /// run emits exactly one terminal `Completed` is enforced by the runner,
    /// not re-validated here).
    pub fn note_event(mut state: ProgressState, event: Event) -> ProgressState {
        if state.finished {
            return state;
        }

        if state.engine_id.is_none() {
            state.engine_id = Some(event.engine_id().clone());
        }
        if let Some(token) = event.resume_token() {
            state.resume_token = Some(token.clone());
        }

        match event {
            Event::Started(_) => {}
            Event::Action(e) => {
                state.actions.push(Action {
                    id: None,
                    kind: None,
                    title: e.text,
                    status: ActionStatus::Running,
                    detail: None,
                });
            }
            Event::ActionStarted(e) => {
                state.actions.push(Action {
                    id: Some(e.id),
                    kind: Some(e.kind),
                    title: e.title,
                    status: ActionStatus::Running,
                    detail: None,
                });
            }
            Event::ActionUpdated(e) => {
                if let Some(action) = state
                    .actions
                    .iter_mut()
                    .find(|a| a.id.as_deref() == Some(e.id.as_str()))
                {
                    if let Some(title) = e.title {
                        action.title = title;
                    }
                    if let Some(detail) = e.detail {
                        action.detail = Some(detail);
                    }
                }
            }
            Event::ActionCompleted(e) => {
                if let Some(action) = state
                    .actions
                    .iter_mut()
                    .find(|a| a.id.as_deref() == Some(e.id.as_str()))
                {
                    if is_legal_transition(action.status, e.status) {
                        action.status = e.status;
                    }
                    if e.detail.is_some() {
                        action.detail = e.detail;
                    }
                }
            }
            Event::Completed(e) => {
                state.ok = Some(e.ok);
                state.answer = e.answer;
                state.error = e.error;
                state.finished = true;
            }
        }

        state
    }
}

/// `pending -> running -> (done|warning|error)`; never backwards.
fn is_legal_transition(from: ActionStatus, to: ActionStatus) -> bool {
    use ActionStatus::*;
    matches!(
        (from, to),
        (Pending, Running)
            | (Pending, Done)
            | (Pending, Warning)
            | (Pending, Error)
            | (Running, Done)
            | (Running, Warning)
            | (Running, Error)
            | (Running, Running)
            | (Done, Done)
            | (Warning, Warning)
            | (Error, Error)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{
        ActionCompletedEvent, ActionStartedEvent, CompletedEvent, StartedEvent,
    };

    fn engine() -> EngineId {
        EngineId::new("mock").unwrap()
    }

    #[test]
    fn deterministic_fold() {
        let events = vec![
            Event::Started(StartedEvent {
                engine_id: engine(),
                resume_known: false,
                resume_token: None,
                timestamp_ms: 1,
            }),
            Event::ActionStarted(ActionStartedEvent {
                engine_id: engine(),
                id: "a1".into(),
                kind: "tool".into(),
                title: "reading file".into(),
                resume_token: None,
                timestamp_ms: 2,
            }),
            Event::ActionCompleted(ActionCompletedEvent {
                engine_id: engine(),
                id: "a1".into(),
                status: ActionStatus::Done,
                detail: None,
                resume_token: None,
                timestamp_ms: 3,
            }),
            Event::Completed(CompletedEvent {
                engine_id: engine(),
                ok: true,
                answer: Some("done".into()),
                error: None,
                resume_token: None,
                timestamp_ms: 4,
            }),
        ];

        let fold = |events: &[Event]| {
            events
                .iter()
                .cloned()
                .fold(ProgressState::new(), Tracker::note_event)
        };

        let s1 = fold(&events);
        let s2 = fold(&events);
        assert_eq!(s1.actions, s2.actions);
        assert_eq!(s1.answer, s2.answer);
        assert_eq!(s1.ok, s2.ok);
        assert_eq!(s1.actions[0].status, ActionStatus::Done);
        assert!(s1.finished);
    }

    #[test]
    fn events_after_completed_are_ignored() {
        let state = ProgressState::new();
        let state = Tracker::note_event(
            state,
            Event::Completed(CompletedEvent {
                engine_id: engine(),
                ok: true,
                answer: Some("x".into()),
                error: None,
                resume_token: None,
                timestamp_ms: 1,
            }),
        );
        let state = Tracker::note_event(
            state,
            Event::ActionStarted(ActionStartedEvent {
                engine_id: engine(),
                id: "late".into(),
                kind: "tool".into(),
                title: "should not appear".into(),
                resume_token: None,
                timestamp_ms: 2,
            }),
        );
        assert!(state.actions.is_empty());
    }

    #[test]
    fn illegal_backwards_transition_ignored() {
        let mut state = ProgressState::new();
        state.actions.push(Action {
            id: Some("a1".into()),
            kind: Some("tool".into()),
            title: "t".into(),
            status: ActionStatus::Done,
            detail: None,
        });
        let state = Tracker::note_event(
            state,
            Event::ActionCompleted(ActionCompletedEvent {
                engine_id: engine(),
                id: "a1".into(),
                status: ActionStatus::Running,
                detail: None,
                resume_token: None,
                timestamp_ms: 1,
            }),
        );
        assert_eq!(state.actions[0].status, ActionStatus::Done);
    }
}
