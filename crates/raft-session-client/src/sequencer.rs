//! Resequencing of operation completions and pushed events.
//!
//! Every operation takes a slot from [`Sequencer::next_request`]. Completions
//! are released in slot order, and a completion that observed event index `n`
//! is held until every event up to `n` has been released. Events follow their
//! own chain: an event is released once the event it follows has been.
//!
//! An event that could be released is still held while operations are
//! outstanding, until either a response that requires it comes up next or all
//! outstanding responses have been released.

use crate::SessionState;
use raft_session_core::SessionError;
use raft_session_protocol::{OperationResponse, PublishRequest};
use std::collections::BTreeMap;
use tracing::{debug, trace};

/// Work run when an event is released
pub type Callback = Box<dyn FnOnce(&mut SessionState) + Send>;

/// Work run when a completion is released. Carries the session's terminal
/// error instead when the session ends before the completion could be released.
pub type ResponseCallback = Box<dyn FnOnce(&mut SessionState, Option<SessionError>) + Send>;

struct PendingEvent {
    previous_index: u64,
    callback: Callback,
}

struct PendingResponse {
    /// Event index that must be released first; `None` for failed slots
    event_index: Option<u64>,
    callback: ResponseCallback,
}

pub struct Sequencer {
    state: SessionState,
    request_sequence: u64,
    response_sequence: u64,
    event_index: u64,
    events: BTreeMap<u64, PendingEvent>,
    responses: BTreeMap<u64, PendingResponse>,
}

impl Sequencer {
    pub fn new(state: SessionState) -> Self {
        let event_index = state.event_index();
        Sequencer {
            state,
            request_sequence: 0,
            response_sequence: 0,
            event_index,
            events: BTreeMap::new(),
            responses: BTreeMap::new(),
        }
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut SessionState {
        &mut self.state
    }

    /// Slot for the next outgoing operation, command or query.
    pub fn next_request(&mut self) -> u64 {
        self.request_sequence += 1;
        self.request_sequence
    }

    /// Command sequence for the next outgoing command.
    pub fn next_command(&mut self) -> u64 {
        self.state.next_command_request()
    }

    /// Index of the last released event
    pub fn event_index(&self) -> u64 {
        self.event_index
    }

    /// Slots handed out but not yet released
    pub fn outstanding(&self) -> u64 {
        self.request_sequence - self.response_sequence
    }

    pub fn pending_events(&self) -> usize {
        self.events.len()
    }

    pub fn pending_responses(&self) -> usize {
        self.responses.len()
    }

    pub fn sequence_event(&mut self, request: &PublishRequest, callback: Callback) {
        if request.event_index <= self.event_index {
            trace!(
                "Dropping stale event {} (released through {})",
                request.event_index, self.event_index
            );
            return;
        }
        if self.events.contains_key(&request.event_index) {
            trace!("Dropping duplicate event {}", request.event_index);
            return;
        }
        self.events.insert(
            request.event_index,
            PendingEvent {
                previous_index: request.previous_index,
                callback,
            },
        );
        self.release();
    }

    /// Register the completion of slot `sequence`; `None` marks a failed slot.
    pub fn sequence_response(
        &mut self,
        sequence: u64,
        response: Option<&OperationResponse>,
        callback: ResponseCallback,
    ) {
        if sequence <= self.response_sequence || self.responses.contains_key(&sequence) {
            trace!("Dropping completion for already sequenced slot {}", sequence);
            return;
        }
        self.responses.insert(
            sequence,
            PendingResponse {
                event_index: response.map(|r| r.event_index),
                callback,
            },
        );
        self.release();
    }

    /// Tear down ordering when the session ends. Every pending completion is
    /// handed `error` in slot order, whatever event it was waiting on, and held
    /// events are dropped.
    ///
    /// Callers fail their in-flight slots first so that every slot handed out
    /// is released by the time this returns.
    pub fn fail_pending(&mut self, error: &SessionError) {
        if !self.events.is_empty() || !self.responses.is_empty() {
            debug!(
                "Failing {} pending completions and dropping {} held events: {}",
                self.responses.len(),
                self.events.len(),
                error
            );
        }
        self.events.clear();

        let responses = std::mem::take(&mut self.responses);
        for (sequence, pending) in responses {
            self.response_sequence = sequence;
            (pending.callback)(&mut self.state, Some(error.clone()));
        }
        self.response_sequence = self.request_sequence;
    }

    fn release(&mut self) {
        loop {
            let next = self.response_sequence + 1;
            let required = match self.responses.get(&next) {
                Some(pending) => pending.event_index,
                None => break,
            };

            if let Some(required) = required {
                self.release_events(required);
                if required > self.event_index {
                    trace!(
                        "Slot {} waits for event {} (released through {})",
                        next, required, self.event_index
                    );
                    break;
                }
            }

            if let Some(pending) = self.responses.remove(&next) {
                self.response_sequence = next;
                trace!("Releasing slot {}", next);
                (pending.callback)(&mut self.state, None);
            }
        }

        if self.request_sequence == self.response_sequence {
            self.release_events(u64::MAX);
        }
    }

    /// Release chained events up to and including `limit`.
    fn release_events(&mut self, limit: u64) {
        while let Some(entry) = self.events.first_entry() {
            if *entry.key() > limit || entry.get().previous_index > self.event_index {
                break;
            }
            let (event_index, event) = entry.remove_entry();
            self.event_index = event_index;
            self.state.set_event_index(event_index);
            trace!("Releasing event {}", event_index);
            (event.callback)(&mut self.state);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use raft_session_core::SessionId;
    use std::sync::Arc;

    type Log = Arc<Mutex<Vec<String>>>;

    fn sequencer() -> Sequencer {
        Sequencer::new(SessionState::new(SessionId::new(1), "test", "test", 1000))
    }

    fn record(log: &Log, name: &str) -> Callback {
        let log = log.clone();
        let name = name.to_string();
        Box::new(move |_: &mut SessionState| log.lock().push(name))
    }

    fn respond(log: &Log, name: &str) -> ResponseCallback {
        let log = log.clone();
        let name = name.to_string();
        Box::new(move |_: &mut SessionState, aborted: Option<SessionError>| match aborted {
            None => log.lock().push(name),
            Some(_) => log.lock().push(format!("{}!", name)),
        })
    }

    fn event(event_index: u64, previous_index: u64) -> PublishRequest {
        PublishRequest::new(SessionId::new(1), event_index, previous_index)
    }

    fn response(index: u64, event_index: u64) -> OperationResponse {
        OperationResponse::ok(index, event_index, Vec::new())
    }

    fn entries(log: &Log) -> Vec<String> {
        log.lock().clone()
    }

    #[test]
    fn test_event_before_command() {
        let log = Log::default();
        let mut sequencer = sequencer();
        let sequence = sequencer.next_request();

        sequencer.sequence_event(&event(2, 1), record(&log, "event"));
        assert!(entries(&log).is_empty());
        sequencer.sequence_response(sequence, Some(&response(3, 2)), respond(&log, "response"));

        assert_eq!(entries(&log), vec!["event", "response"]);
    }

    #[test]
    fn test_event_at_command_either_order() {
        for event_first in [true, false] {
            let log = Log::default();
            let mut sequencer = sequencer();
            let sequence = sequencer.next_request();

            if event_first {
                sequencer.sequence_event(&event(2, 0), record(&log, "event"));
                sequencer.sequence_response(sequence, Some(&response(2, 2)), respond(&log, "response"));
            } else {
                sequencer.sequence_response(sequence, Some(&response(2, 2)), respond(&log, "response"));
                assert!(entries(&log).is_empty());
                sequencer.sequence_event(&event(2, 0), record(&log, "event"));
            }

            assert_eq!(entries(&log), vec!["event", "response"]);
            assert_eq!(sequencer.event_index(), 2);
            assert_eq!(sequencer.state().event_index(), 2);
        }
    }

    #[test]
    fn test_event_after_all_commands() {
        let log = Log::default();
        let mut sequencer = sequencer();
        let sequence = sequencer.next_request();

        sequencer.sequence_event(&event(2, 0), record(&log, "event-2"));
        sequencer.sequence_response(sequence, Some(&response(2, 2)), respond(&log, "response"));
        sequencer.sequence_event(&event(3, 2), record(&log, "event-3"));

        assert_eq!(entries(&log), vec!["event-2", "response", "event-3"]);
    }

    #[test]
    fn test_events_without_commands_release_immediately() {
        let log = Log::default();
        let mut sequencer = sequencer();

        sequencer.sequence_event(&event(2, 0), record(&log, "event-2"));
        sequencer.sequence_event(&event(3, 2), record(&log, "event-3"));

        assert_eq!(entries(&log), vec!["event-2", "event-3"]);
    }

    #[test]
    fn test_satisfiable_event_waits_for_outstanding_command() {
        let log = Log::default();
        let mut sequencer = sequencer();
        let sequence = sequencer.next_request();

        sequencer.sequence_event(&event(2, 1), record(&log, "event-2"));
        sequencer.sequence_event(&event(3, 2), record(&log, "event-3"));
        assert!(entries(&log).is_empty());
        assert_eq!(sequencer.pending_events(), 2);

        sequencer.sequence_response(sequence, Some(&response(5, 2)), respond(&log, "response"));

        assert_eq!(entries(&log), vec!["event-2", "response", "event-3"]);
        assert_eq!(sequencer.pending_events(), 0);
    }

    #[test]
    fn test_responses_release_in_slot_order() {
        let log = Log::default();
        let mut sequencer = sequencer();
        let first = sequencer.next_request();
        let second = sequencer.next_request();
        assert_eq!(second, first + 1);

        sequencer.sequence_response(second, Some(&response(2, 0)), respond(&log, "second"));
        assert!(entries(&log).is_empty());
        assert_eq!(sequencer.outstanding(), 2);

        sequencer.sequence_response(first, Some(&response(2, 0)), respond(&log, "first"));
        assert_eq!(entries(&log), vec!["first", "second"]);
        assert_eq!(sequencer.outstanding(), 0);
    }

    #[test]
    fn test_failed_slot_is_skipped_in_order() {
        let log = Log::default();
        let mut sequencer = sequencer();
        let first = sequencer.next_request();
        let second = sequencer.next_request();

        sequencer.sequence_response(second, Some(&response(4, 1)), respond(&log, "second"));
        sequencer.sequence_response(first, None, respond(&log, "first-failed"));

        assert_eq!(entries(&log), vec!["first-failed", "second"]);
    }

    #[test]
    fn test_out_of_chain_events_release_in_chain_order() {
        let log = Log::default();
        let mut sequencer = sequencer();

        sequencer.sequence_event(&event(5, 3), record(&log, "event-5"));
        assert!(entries(&log).is_empty());
        sequencer.sequence_event(&event(3, 1), record(&log, "event-3"));

        assert_eq!(entries(&log), vec!["event-3", "event-5"]);
        assert_eq!(sequencer.event_index(), 5);
    }

    #[test]
    fn test_stale_and_duplicate_events_are_dropped() {
        let log = Log::default();
        let mut sequencer = sequencer();
        let sequence = sequencer.next_request();

        sequencer.sequence_event(&event(1, 0), record(&log, "stale"));
        sequencer.sequence_event(&event(3, 1), record(&log, "first"));
        sequencer.sequence_event(&event(3, 1), record(&log, "duplicate"));
        sequencer.sequence_response(sequence, Some(&response(3, 3)), respond(&log, "response"));

        assert_eq!(entries(&log), vec!["first", "response"]);
    }

    #[test]
    fn test_duplicate_completion_is_ignored() {
        let log = Log::default();
        let mut sequencer = sequencer();
        let first = sequencer.next_request();
        let second = sequencer.next_request();

        sequencer.sequence_response(second, Some(&response(3, 0)), respond(&log, "second"));
        sequencer.sequence_response(second, Some(&response(3, 0)), respond(&log, "second-again"));
        sequencer.sequence_response(first, Some(&response(2, 0)), respond(&log, "first"));
        sequencer.sequence_response(first, Some(&response(2, 0)), respond(&log, "first-again"));

        assert_eq!(entries(&log), vec!["first", "second"]);
    }

    #[test]
    fn test_callbacks_update_state() {
        let mut sequencer = sequencer();
        let sequence = sequencer.next_request();
        let command = sequencer.next_command();
        assert_eq!(command, 1);

        sequencer.sequence_response(
            sequence,
            Some(&response(7, 0)),
            Box::new(move |state: &mut SessionState, _: Option<SessionError>| {
                state.set_command_response(command);
                state.set_response_index(7);
            }),
        );

        assert_eq!(sequencer.state().command_response(), 1);
        assert_eq!(sequencer.state().response_index(), 7);
    }

    #[test]
    fn test_fail_pending_releases_blocked_completions_in_order() {
        let log = Log::default();
        let mut sequencer = sequencer();
        let first = sequencer.next_request();
        let second = sequencer.next_request();
        let third = sequencer.next_request();

        sequencer.sequence_event(&event(7, 5), record(&log, "event-7"));
        sequencer.sequence_response(third, None, respond(&log, "third"));
        sequencer.sequence_response(first, Some(&response(3, 5)), respond(&log, "first"));
        sequencer.sequence_response(second, Some(&response(4, 1)), respond(&log, "second"));
        assert!(entries(&log).is_empty());

        sequencer.fail_pending(&SessionError::ClosedSession(SessionId::new(1)));

        assert_eq!(entries(&log), vec!["first!", "second!", "third!"]);
        assert_eq!(sequencer.outstanding(), 0);
        assert_eq!(sequencer.pending_events(), 0);
        assert_eq!(sequencer.pending_responses(), 0);
        assert_eq!(sequencer.event_index(), 1);

        sequencer.sequence_response(first, Some(&response(3, 0)), respond(&log, "first-late"));
        assert_eq!(entries(&log).len(), 3);
    }

    /// Each row interleaves events (`e<index>/<previous>`) and completions
    /// (`r<slot>@<event index>` or `f<slot>` for a failed slot) and lists the
    /// expected release order.
    #[test]
    fn test_interleaving_table() {
        let table: &[(u64, &[&str], &[&str])] = &[
            (1, &["e2/0", "r1@2"], &["e2", "r1"]),
            (1, &["r1@2", "e2/0"], &["e2", "r1"]),
            (2, &["r2@1", "r1@1"], &["r1", "r2"]),
            (2, &["r2@3", "e3/1", "r1@1"], &["r1", "e3", "r2"]),
            (2, &["e3/1", "r2@3", "r1@1"], &["r1", "e3", "r2"]),
            (2, &["e2/1", "e3/2", "r1@2", "r2@2"], &["e2", "r1", "r2", "e3"]),
            (2, &["e2/1", "f1", "e3/2", "r2@3"], &["f1", "e2", "e3", "r2"]),
            (1, &["e4/3", "r1@4", "e3/1"], &["e3", "e4", "r1"]),
            (3, &["r3@1", "f2", "r1@1"], &["r1", "f2", "r3"]),
            (0, &["e3/2", "e2/1"], &["e2", "e3"]),
        ];

        for (row, (slots, steps, expected)) in table.iter().enumerate() {
            let log = Log::default();
            let mut sequencer = sequencer();
            for _ in 0..*slots {
                sequencer.next_request();
            }

            for step in steps.iter() {
                let (kind, body) = step.split_at(1);
                match kind {
                    "e" => {
                        let (index, previous) = body.split_once('/').unwrap();
                        let index: u64 = index.parse().unwrap();
                        let previous: u64 = previous.parse().unwrap();
                        sequencer.sequence_event(&event(index, previous), record(&log, &format!("e{}", index)));
                    }
                    "r" => {
                        let (slot, required) = body.split_once('@').unwrap();
                        let slot: u64 = slot.parse().unwrap();
                        let required: u64 = required.parse().unwrap();
                        sequencer.sequence_response(
                            slot,
                            Some(&response(slot, required)),
                            respond(&log, &format!("r{}", slot)),
                        );
                    }
                    "f" => {
                        let slot: u64 = body.parse().unwrap();
                        sequencer.sequence_response(slot, None, respond(&log, &format!("f{}", slot)));
                    }
                    other => panic!("unknown step kind {}", other),
                }
            }

            assert_eq!(entries(&log), expected.to_vec(), "row {}", row);
        }
    }
}
