// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Stream driver, phase handlers, and per-phase control surfaces.

use thiserror::Error;
use tracing::trace;

/// Stable key naming a phase within a stream.
pub type PhaseKey = &'static str;

/// Handler invoked for a unit-of-work phase.
pub type WorkHandler<C, E> = Box<dyn FnMut(&mut C, &mut Work<E>)>;

/// Handler invoked for an event phase (main handler or fan-out listener).
pub type EventHandler<C> = Box<dyn FnMut(&mut C, &mut EventState)>;

type CompleteHook<C> = Box<dyn FnOnce(&mut C)>;
type ErrorHook<C, E> = Box<dyn FnOnce(&mut C, &E)>;

/// Errors raised by the stream driver itself.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StreamError {
    /// A phase with the same key was already registered.
    #[error("duplicate phase key: {0}")]
    DuplicatePhase(PhaseKey),
    /// A seek or listener registration named a key that does not exist.
    #[error("unknown phase key: {0}")]
    UnknownPhase(PhaseKey),
    /// Listeners may only be attached to event phases.
    #[error("phase is not an event: {0}")]
    NotAnEvent(PhaseKey),
    /// `resolve_pending`/`reject_pending` was called with no pending work.
    #[error("no unit of work is pending")]
    NotSuspended,
    /// The stream already reached a terminal state.
    #[error("stream already finished")]
    Finished,
}

/// Discriminates the two phase kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseKind {
    /// One-shot work that settles through a [`Work`] handle.
    UnitOfWork,
    /// User-observable event with a listener fan-out stage.
    Event,
}

/// A phase handler tagged with its kind.
pub enum Handler<C, E> {
    /// Unit-of-work handler.
    Work(WorkHandler<C, E>),
    /// Event main handler.
    Event(EventHandler<C>),
}

impl<C, E> Handler<C, E> {
    /// Wraps a closure as a unit-of-work handler.
    pub fn work(f: impl FnMut(&mut C, &mut Work<E>) + 'static) -> Self {
        Self::Work(Box::new(f))
    }

    /// Wraps a closure as an event handler.
    pub fn event(f: impl FnMut(&mut C, &mut EventState) + 'static) -> Self {
        Self::Event(Box::new(f))
    }

    /// Returns the phase kind this handler implements.
    pub fn kind(&self) -> PhaseKind {
        match self {
            Self::Work(_) => PhaseKind::UnitOfWork,
            Self::Event(_) => PhaseKind::Event,
        }
    }
}

/// How a unit of work settled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkOutcome<E> {
    /// Not yet settled; the stream suspends after the handler returns.
    Pending,
    /// Completed; the stream advances to the next phase.
    Resolved,
    /// Failed; the stream stops and fires its error hook.
    Rejected(E),
    /// The handler canceled the whole run.
    Canceled,
    /// Jump to the named phase.
    Seek(PhaseKey),
}

/// Control surface handed to a unit-of-work handler.
#[derive(Debug)]
pub struct Work<E> {
    key: PhaseKey,
    outcome: WorkOutcome<E>,
}

impl<E> Work<E> {
    fn new(key: PhaseKey) -> Self {
        Self {
            key,
            outcome: WorkOutcome::Pending,
        }
    }

    /// Key of the phase being executed.
    pub fn key(&self) -> PhaseKey {
        self.key
    }

    /// Settles the work successfully.
    pub fn resolve(&mut self) {
        self.outcome = WorkOutcome::Resolved;
    }

    /// Settles the work with a failure.
    pub fn reject(&mut self, reason: E) {
        self.outcome = WorkOutcome::Rejected(reason);
    }

    /// Cancels the stream.
    pub fn cancel(&mut self) {
        self.outcome = WorkOutcome::Canceled;
    }

    /// Settles the work by jumping to another phase.
    pub fn seek(&mut self, key: PhaseKey) {
        self.outcome = WorkOutcome::Seek(key);
    }

    /// Returns `true` once any settle method was called.
    pub fn is_settled(&self) -> bool {
        !matches!(self.outcome, WorkOutcome::Pending)
    }
}

/// Mutable state shared by an event's main handler and its listeners.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventState {
    key: PhaseKey,
    canceled: bool,
    paused: bool,
    seek: Option<PhaseKey>,
    stopped: bool,
}

impl EventState {
    /// Creates a fresh state for `key`.
    ///
    /// The stream builds one per event dispatch; owners use this to surface
    /// events from inside a unit of work with the same control surface.
    pub fn new(key: PhaseKey) -> Self {
        Self {
            key,
            canceled: false,
            paused: false,
            seek: None,
            stopped: false,
        }
    }

    /// Key of the event phase being fired.
    pub fn key(&self) -> PhaseKey {
        self.key
    }

    /// Cancels the stream once the event finishes dispatching.
    pub fn cancel(&mut self) {
        self.canceled = true;
    }

    /// Pauses the stream after this event.
    pub fn pause(&mut self) {
        self.paused = true;
    }

    /// Clears a pause requested earlier in the same dispatch.
    pub fn resume(&mut self) {
        self.paused = false;
    }

    /// Continues at `key` instead of the next phase.
    pub fn seek(&mut self, key: PhaseKey) {
        self.seek = Some(key);
    }

    /// Skips the remaining listeners registered for this event.
    pub fn stop(&mut self) {
        self.stopped = true;
    }

    /// Returns `true` if some handler canceled the stream.
    pub fn is_canceled(&self) -> bool {
        self.canceled
    }

    /// Returns `true` if the stream will pause after this event.
    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// Returns `true` if remaining listeners are skipped.
    pub fn is_stopped(&self) -> bool {
        self.stopped
    }
}

/// Lifecycle of a stream run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamStatus {
    /// Not yet executed.
    Idle,
    /// Inside [`Stream::execute`].
    Running,
    /// Waiting for a pending unit of work to settle.
    Suspended,
    /// Paused by an event handler or the owner.
    Paused,
    /// All phases ran.
    Completed,
    /// Canceled before completion.
    Canceled,
    /// A unit of work rejected.
    Failed,
}

impl StreamStatus {
    /// Returns `true` for `Completed`, `Canceled`, and `Failed`.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Canceled | Self::Failed)
    }
}

/// Result of one [`Stream::execute`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step<E> {
    /// A unit of work is pending; settle it and execute again.
    Suspended(PhaseKey),
    /// The stream is paused; resume it and execute again.
    Paused(PhaseKey),
    /// Every phase ran.
    Completed,
    /// The run was canceled.
    Canceled,
    /// A unit of work rejected with this reason.
    Failed(E),
}

struct Phase<C, E> {
    key: PhaseKey,
    handler: Handler<C, E>,
    listeners: Vec<EventHandler<C>>,
}

struct Hooks<C, E> {
    on_complete: Option<CompleteHook<C>>,
    on_cancel: Option<CompleteHook<C>>,
    on_error: Option<ErrorHook<C, E>>,
}

/// Ordered phase pipeline driven cooperatively by its owner.
///
/// `C` is the context threaded through every handler; `E` is the rejection
/// type. Stream faults (for example a seek to an unknown key) are converted
/// into `E` so they surface through the same failure path as handler errors.
pub struct Stream<C, E> {
    phases: Vec<Phase<C, E>>,
    cursor: usize,
    status: StreamStatus,
    paused: bool,
    cancel_requested: bool,
    hooks: Hooks<C, E>,
}

impl<C, E> std::fmt::Debug for Stream<C, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let keys: Vec<PhaseKey> = self.phases.iter().map(|p| p.key).collect();
        f.debug_struct("Stream")
            .field("phases", &keys)
            .field("cursor", &self.cursor)
            .field("status", &self.status)
            .field("paused", &self.paused)
            .field("cancel_requested", &self.cancel_requested)
            .finish_non_exhaustive()
    }
}

impl<C, E> Default for Stream<C, E> {
    fn default() -> Self {
        Self::new()
    }
}

enum Advance<E> {
    Next,
    Seek(PhaseKey),
    Suspend,
    PauseAfter,
    Cancel,
    Fail(E),
}

impl<C, E> Stream<C, E> {
    /// Creates an empty stream.
    pub fn new() -> Self {
        Self {
            phases: Vec::new(),
            cursor: 0,
            status: StreamStatus::Idle,
            paused: false,
            cancel_requested: false,
            hooks: Hooks {
                on_complete: None,
                on_cancel: None,
                on_error: None,
            },
        }
    }

    /// Appends a phase.
    pub fn add_phase(&mut self, key: PhaseKey, handler: Handler<C, E>) -> Result<(), StreamError> {
        if self.index_of(key).is_some() {
            return Err(StreamError::DuplicatePhase(key));
        }
        self.phases.push(Phase {
            key,
            handler,
            listeners: Vec::new(),
        });
        Ok(())
    }

    /// Appends a unit-of-work phase.
    pub fn add_work(
        &mut self,
        key: PhaseKey,
        f: impl FnMut(&mut C, &mut Work<E>) + 'static,
    ) -> Result<(), StreamError> {
        self.add_phase(key, Handler::work(f))
    }

    /// Appends an event phase.
    pub fn add_event(
        &mut self,
        key: PhaseKey,
        f: impl FnMut(&mut C, &mut EventState) + 'static,
    ) -> Result<(), StreamError> {
        self.add_phase(key, Handler::event(f))
    }

    /// Adds a fan-out listener to an existing event phase.
    pub fn add_listener(
        &mut self,
        key: PhaseKey,
        f: impl FnMut(&mut C, &mut EventState) + 'static,
    ) -> Result<(), StreamError> {
        let idx = self.index_of(key).ok_or(StreamError::UnknownPhase(key))?;
        let phase = &mut self.phases[idx];
        if phase.handler.kind() != PhaseKind::Event {
            return Err(StreamError::NotAnEvent(key));
        }
        phase.listeners.push(Box::new(f));
        Ok(())
    }

    /// Registers the hook fired when a run completes.
    pub fn on_complete(&mut self, f: impl FnOnce(&mut C) + 'static) {
        self.hooks.on_complete = Some(Box::new(f));
    }

    /// Registers the hook fired when a run is canceled.
    pub fn on_cancel(&mut self, f: impl FnOnce(&mut C) + 'static) {
        self.hooks.on_cancel = Some(Box::new(f));
    }

    /// Registers the hook fired when a run fails.
    pub fn on_error(&mut self, f: impl FnOnce(&mut C, &E) + 'static) {
        self.hooks.on_error = Some(Box::new(f));
    }

    /// Returns the kind of the phase registered under `key`.
    pub fn phase_kind(&self, key: PhaseKey) -> Option<PhaseKind> {
        self.index_of(key).map(|i| self.phases[i].handler.kind())
    }

    /// Key of the phase the cursor points at, if any.
    pub fn current_key(&self) -> Option<PhaseKey> {
        self.phases.get(self.cursor).map(|p| p.key)
    }

    /// Current lifecycle status.
    pub fn status(&self) -> StreamStatus {
        self.status
    }

    /// Returns `true` while [`Stream::execute`] is on the stack.
    pub fn is_working(&self) -> bool {
        self.status == StreamStatus::Running
    }

    /// Requests cancellation; honored at the next phase boundary.
    pub fn cancel(&mut self) {
        self.cancel_requested = true;
    }

    /// Returns `true` once cancellation was requested.
    pub fn is_cancel_requested(&self) -> bool {
        self.cancel_requested
    }

    /// Pauses the stream at the next phase boundary.
    pub fn pause(&mut self) {
        self.paused = true;
    }

    /// Clears a pause; the owner must call [`Stream::execute`] again.
    pub fn resume(&mut self) {
        self.paused = false;
        if self.status == StreamStatus::Paused {
            self.status = StreamStatus::Idle;
        }
    }

    /// Moves the cursor to `key` without running anything.
    pub fn seek(&mut self, key: PhaseKey) -> Result<(), StreamError> {
        if self.status.is_terminal() {
            return Err(StreamError::Finished);
        }
        self.cursor = self.index_of(key).ok_or(StreamError::UnknownPhase(key))?;
        Ok(())
    }

    /// Settles the suspended unit of work successfully.
    pub fn resolve_pending(&mut self) -> Result<(), StreamError> {
        self.take_suspension()?;
        self.cursor += 1;
        Ok(())
    }

    /// Settles the suspended unit of work by seeking to `key`.
    pub fn seek_pending(&mut self, key: PhaseKey) -> Result<(), StreamError> {
        let idx = self.index_of(key).ok_or(StreamError::UnknownPhase(key))?;
        self.take_suspension()?;
        self.cursor = idx;
        Ok(())
    }

    fn take_suspension(&mut self) -> Result<(), StreamError> {
        if self.status != StreamStatus::Suspended {
            return Err(StreamError::NotSuspended);
        }
        self.status = StreamStatus::Idle;
        Ok(())
    }

    fn index_of(&self, key: PhaseKey) -> Option<usize> {
        self.phases.iter().position(|p| p.key == key)
    }
}

impl<C, E: From<StreamError>> Stream<C, E> {
    /// Fails the suspended unit of work with `reason`.
    ///
    /// The error hook fires immediately; there is nothing left to execute.
    pub fn reject_pending(&mut self, cx: &mut C, reason: E) -> Result<Step<E>, StreamError>
    where
        E: Clone,
    {
        self.take_suspension()?;
        Ok(self.fail(cx, reason))
    }

    /// Runs phases until the stream finishes, suspends, or pauses.
    ///
    /// Calling `execute` on a finished stream returns the terminal step again
    /// without firing any hook.
    pub fn execute(&mut self, cx: &mut C) -> Step<E>
    where
        E: Clone,
    {
        match self.status {
            StreamStatus::Completed => return Step::Completed,
            StreamStatus::Canceled => return Step::Canceled,
            StreamStatus::Failed => {
                return Step::Failed(E::from(StreamError::Finished));
            }
            StreamStatus::Suspended => {
                if !self.cancel_requested {
                    return Step::Suspended(self.current_key().unwrap_or("<end>"));
                }
            }
            StreamStatus::Idle | StreamStatus::Running | StreamStatus::Paused => {}
        }
        self.status = StreamStatus::Running;

        loop {
            if self.cancel_requested {
                return self.finish_canceled(cx);
            }
            if self.paused {
                self.status = StreamStatus::Paused;
                return Step::Paused(self.current_key().unwrap_or("<end>"));
            }
            let Some(phase) = self.phases.get_mut(self.cursor) else {
                return self.finish_completed(cx);
            };
            let key = phase.key;
            trace!(phase = key, "stream phase");
            let advance = match &mut phase.handler {
                Handler::Work(handler) => {
                    let mut work = Work::new(key);
                    handler(cx, &mut work);
                    match work.outcome {
                        WorkOutcome::Pending => Advance::Suspend,
                        WorkOutcome::Resolved => Advance::Next,
                        WorkOutcome::Rejected(e) => Advance::Fail(e),
                        WorkOutcome::Canceled => Advance::Cancel,
                        WorkOutcome::Seek(k) => Advance::Seek(k),
                    }
                }
                Handler::Event(handler) => {
                    let mut state = EventState::new(key);
                    handler(cx, &mut state);
                    for listener in &mut phase.listeners {
                        if state.stopped {
                            break;
                        }
                        listener(cx, &mut state);
                    }
                    if state.canceled {
                        Advance::Cancel
                    } else if let Some(k) = state.seek {
                        Advance::Seek(k)
                    } else if state.paused {
                        Advance::PauseAfter
                    } else {
                        Advance::Next
                    }
                }
            };
            match advance {
                Advance::Next => self.cursor += 1,
                Advance::PauseAfter => {
                    self.cursor += 1;
                    self.paused = true;
                }
                Advance::Seek(k) => match self.index_of(k) {
                    Some(idx) => self.cursor = idx,
                    None => return self.fail(cx, E::from(StreamError::UnknownPhase(k))),
                },
                Advance::Suspend => {
                    self.status = StreamStatus::Suspended;
                    return Step::Suspended(key);
                }
                Advance::Cancel => return self.finish_canceled(cx),
                Advance::Fail(e) => return self.fail(cx, e),
            }
        }
    }

    fn finish_completed(&mut self, cx: &mut C) -> Step<E> {
        self.status = StreamStatus::Completed;
        self.drop_other_hooks();
        if let Some(hook) = self.hooks.on_complete.take() {
            hook(cx);
        }
        Step::Completed
    }

    fn finish_canceled(&mut self, cx: &mut C) -> Step<E> {
        self.status = StreamStatus::Canceled;
        self.hooks.on_complete = None;
        self.hooks.on_error = None;
        if let Some(hook) = self.hooks.on_cancel.take() {
            hook(cx);
        }
        Step::Canceled
    }

    fn fail(&mut self, cx: &mut C, reason: E) -> Step<E>
    where
        E: Clone,
    {
        self.status = StreamStatus::Failed;
        self.hooks.on_complete = None;
        self.hooks.on_cancel = None;
        if let Some(hook) = self.hooks.on_error.take() {
            hook(cx, &reason);
        }
        Step::Failed(reason)
    }

    fn drop_other_hooks(&mut self) {
        self.hooks.on_cancel = None;
        self.hooks.on_error = None;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum TestError {
        Stream(StreamError),
        Boom,
    }

    impl From<StreamError> for TestError {
        fn from(e: StreamError) -> Self {
            Self::Stream(e)
        }
    }

    type Log = Vec<&'static str>;

    fn logging_work(tag: &'static str) -> impl FnMut(&mut Log, &mut Work<TestError>) {
        move |log, work| {
            log.push(tag);
            work.resolve();
        }
    }

    #[test]
    fn phases_run_in_registration_order() {
        let mut s: Stream<Log, TestError> = Stream::new();
        s.add_work("a", logging_work("a")).unwrap();
        s.add_event("b", |log: &mut Log, _| log.push("b")).unwrap();
        s.add_work("c", logging_work("c")).unwrap();
        let mut log = Vec::new();
        assert_eq!(s.execute(&mut log), Step::Completed);
        assert_eq!(log, vec!["a", "b", "c"]);
        assert_eq!(s.status(), StreamStatus::Completed);
    }

    #[test]
    fn duplicate_keys_are_rejected() {
        let mut s: Stream<Log, TestError> = Stream::new();
        s.add_work("a", logging_work("a")).unwrap();
        assert_eq!(
            s.add_work("a", logging_work("a")),
            Err(StreamError::DuplicatePhase("a"))
        );
    }

    #[test]
    fn pending_work_suspends_until_resolved() {
        let mut s: Stream<Log, TestError> = Stream::new();
        s.add_work("fetch", |log: &mut Log, _w| log.push("fetch")).unwrap();
        s.add_work("after", logging_work("after")).unwrap();
        let mut log = Vec::new();
        assert_eq!(s.execute(&mut log), Step::Suspended("fetch"));
        // Re-executing while suspended does not re-run the handler.
        assert_eq!(s.execute(&mut log), Step::Suspended("fetch"));
        s.resolve_pending().unwrap();
        assert_eq!(s.execute(&mut log), Step::Completed);
        assert_eq!(log, vec!["fetch", "after"]);
    }

    #[test]
    fn seek_skips_phases() {
        let mut s: Stream<Log, TestError> = Stream::new();
        s.add_work("a", |log: &mut Log, w| {
            log.push("a");
            w.seek("c");
        })
        .unwrap();
        s.add_work("b", logging_work("b")).unwrap();
        s.add_work("c", logging_work("c")).unwrap();
        let mut log = Vec::new();
        assert_eq!(s.execute(&mut log), Step::Completed);
        assert_eq!(log, vec!["a", "c"]);
    }

    #[test]
    fn unknown_seek_fails_the_run() {
        let mut s: Stream<Log, TestError> = Stream::new();
        s.add_work("a", |_: &mut Log, w| w.seek("nope")).unwrap();
        let mut log = Vec::new();
        assert_eq!(
            s.execute(&mut log),
            Step::Failed(TestError::Stream(StreamError::UnknownPhase("nope")))
        );
    }

    #[test]
    fn reject_fires_error_hook_once() {
        let mut s: Stream<Log, TestError> = Stream::new();
        s.add_work("a", |_: &mut Log, w| w.reject(TestError::Boom)).unwrap();
        s.on_error(|log: &mut Log, _e| log.push("error"));
        s.on_complete(|log: &mut Log| log.push("complete"));
        let mut log = Vec::new();
        assert_eq!(s.execute(&mut log), Step::Failed(TestError::Boom));
        assert_eq!(
            s.execute(&mut log),
            Step::Failed(TestError::Stream(StreamError::Finished))
        );
        assert_eq!(log, vec!["error"]);
    }

    #[test]
    fn cancel_while_suspended_fires_cancel_hook() {
        let mut s: Stream<Log, TestError> = Stream::new();
        s.add_work("wait", |_: &mut Log, _w| {}).unwrap();
        s.on_cancel(|log: &mut Log| log.push("canceled"));
        let mut log = Vec::new();
        assert_eq!(s.execute(&mut log), Step::Suspended("wait"));
        s.cancel();
        assert_eq!(s.execute(&mut log), Step::Canceled);
        assert_eq!(s.execute(&mut log), Step::Canceled);
        assert_eq!(log, vec!["canceled"]);
    }

    #[test]
    fn listeners_fan_out_and_stop() {
        let mut s: Stream<Log, TestError> = Stream::new();
        s.add_event("ev", |log: &mut Log, _| log.push("main")).unwrap();
        s.add_listener("ev", |log: &mut Log, st| {
            log.push("first");
            st.stop();
        })
        .unwrap();
        s.add_listener("ev", |log: &mut Log, _| log.push("second"))
            .unwrap();
        let mut log = Vec::new();
        assert_eq!(s.execute(&mut log), Step::Completed);
        assert_eq!(log, vec!["main", "first"]);
    }

    #[test]
    fn listener_on_work_phase_is_rejected() {
        let mut s: Stream<Log, TestError> = Stream::new();
        s.add_work("a", logging_work("a")).unwrap();
        assert_eq!(
            s.add_listener("a", |_: &mut Log, _| {}),
            Err(StreamError::NotAnEvent("a"))
        );
        assert_eq!(
            s.add_listener("zz", |_: &mut Log, _| {}),
            Err(StreamError::UnknownPhase("zz"))
        );
    }

    #[test]
    fn event_pause_stops_after_event_until_resumed() {
        let mut s: Stream<Log, TestError> = Stream::new();
        s.add_event("ev", |log: &mut Log, st| {
            log.push("ev");
            st.pause();
        })
        .unwrap();
        s.add_work("next", logging_work("next")).unwrap();
        let mut log = Vec::new();
        assert_eq!(s.execute(&mut log), Step::Paused("next"));
        assert_eq!(log, vec!["ev"]);
        s.resume();
        assert_eq!(s.execute(&mut log), Step::Completed);
        assert_eq!(log, vec!["ev", "next"]);
    }

    #[test]
    fn event_cancel_wins_over_seek() {
        let mut s: Stream<Log, TestError> = Stream::new();
        s.add_event("ev", |_: &mut Log, st| {
            st.seek("end");
            st.cancel();
        })
        .unwrap();
        s.add_work("end", logging_work("end")).unwrap();
        let mut log = Vec::new();
        assert_eq!(s.execute(&mut log), Step::Canceled);
        assert!(log.is_empty());
    }
}
