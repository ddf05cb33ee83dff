// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! The controller: owns the document, every binding, and the scheduler.
//!
//! Hosts create bindings, request sessions with [`Controller::bind`] or
//! [`Controller::update`], then drive everything with
//! [`Controller::run_until_idle`]. Nothing runs outside a drive call.

use std::collections::VecDeque;
use std::rc::Rc;

use rustc_hash::FxHashMap;
use tether_dom::{Document, NodeId};
use tether_stream::{EventState, StreamError, StreamStatus};
use tracing::{debug, info, warn};

use crate::binder::{parse_handler_attr, HandlerTable};
use crate::binding::{Binding, BindingKind, Completion, Progress};
use crate::config::{BindConfig, BindOptions};
use crate::error::{BindError, ConfigError};
use crate::events::{BindEvent, EventKind, Listeners};
use crate::ident::{BindingId, SessionId};
use crate::markup::{ContentCache, ContentFetcher, Markup, NoFetcher, TemplateCache};
use crate::scheduler::{Scheduler, SessionView};
use crate::session::{targets_conflict, BindCallback, Session, RESOLVE_MARKUP};
use crate::source::{HandlerCall, Source};
use crate::telemetry::{NullTelemetry, RunSummary, SchedulerTelemetry};

/// Binding engine over one document.
pub struct Controller {
    pub(crate) config: BindConfig,
    pub(crate) doc: Document,
    pub(crate) bindings: FxHashMap<BindingId, Binding>,
    pub(crate) sessions: FxHashMap<SessionId, Session>,
    pub(crate) scheduler: Scheduler,
    pub(crate) templates: TemplateCache,
    pub(crate) contents: ContentCache,
    pub(crate) fetcher: Box<dyn ContentFetcher>,
    pub(crate) handlers: HandlerTable,
    pub(crate) listeners: Listeners,
    /// Sessions whose stream must be executed again before anything starts.
    pub(crate) wakeups: VecDeque<SessionId>,
    pub(crate) fetch_waiters: FxHashMap<String, Vec<SessionId>>,
    pub(crate) telemetry: Rc<dyn SchedulerTelemetry>,
    pub(crate) summary: RunSummary,
    /// First fatal hazard seen; ends the current drive call.
    pub(crate) fatal: Option<BindError>,
    next_binding: u32,
    next_session: u64,
}

impl core::fmt::Debug for Controller {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Controller")
            .field("config", &self.config)
            .field("bindings", &self.bindings.len())
            .field("sessions", &self.sessions.len())
            .field("wakeups", &self.wakeups)
            .field("summary", &self.summary)
            .finish_non_exhaustive()
    }
}

struct Sessions<'a> {
    sessions: &'a FxHashMap<SessionId, Session>,
    bindings: &'a FxHashMap<BindingId, Binding>,
}

impl Sessions<'_> {
    fn target(&self, sid: SessionId) -> Option<(BindingId, Option<NodeId>)> {
        self.sessions.get(&sid).map(|s| (s.binding, s.host))
    }
}

impl SessionView for Sessions<'_> {
    fn is_live(&self, sid: SessionId) -> bool {
        self.sessions.contains_key(&sid)
    }

    fn is_started(&self, sid: SessionId) -> bool {
        self.sessions.get(&sid).is_some_and(|s| s.started)
    }

    fn is_blocked(&self, sid: SessionId) -> bool {
        let Some(me) = self.target(sid) else {
            return false;
        };
        self.sessions.values().any(|s| {
            s.id != sid && s.started && targets_conflict(self.bindings, me, (s.binding, s.host))
        })
    }

    fn conflicts(&self, a: SessionId, b: SessionId) -> bool {
        match (self.target(a), self.target(b)) {
            (Some(x), Some(y)) => targets_conflict(self.bindings, x, y),
            _ => false,
        }
    }
}

impl Controller {
    /// Creates a controller over an empty document.
    pub fn new(config: BindConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            scheduler: Scheduler::new(config.batch_size, config.watchdog_interval),
            config,
            doc: Document::new(),
            bindings: FxHashMap::default(),
            sessions: FxHashMap::default(),
            templates: TemplateCache::default(),
            contents: ContentCache::default(),
            fetcher: Box::new(NoFetcher),
            handlers: HandlerTable::default(),
            listeners: Listeners::default(),
            wakeups: VecDeque::new(),
            fetch_waiters: FxHashMap::default(),
            telemetry: Rc::new(NullTelemetry),
            summary: RunSummary::default(),
            fatal: None,
            next_binding: 0,
            next_session: 0,
        })
    }

    /// Replaces the markup fetcher.
    #[must_use]
    pub fn with_fetcher(mut self, fetcher: impl ContentFetcher + 'static) -> Self {
        self.fetcher = Box::new(fetcher);
        self
    }

    /// Replaces the scheduler telemetry sink.
    #[must_use]
    pub fn with_telemetry(mut self, telemetry: impl SchedulerTelemetry + 'static) -> Self {
        self.telemetry = Rc::new(telemetry);
        self
    }

    /// Controller settings.
    pub fn config(&self) -> &BindConfig {
        &self.config
    }

    /// The document bindings render into.
    pub fn document(&self) -> &Document {
        &self.doc
    }

    /// Mutable document access, for building hosts and simulating edits.
    pub fn document_mut(&mut self) -> &mut Document {
        &mut self.doc
    }

    /// Looks up a binding.
    pub fn binding(&self, id: BindingId) -> Option<&Binding> {
        self.bindings.get(&id)
    }

    /// `(hits, misses)` of the parsed-template cache.
    pub fn template_stats(&self) -> (u64, u64) {
        self.templates.stats()
    }

    /// Number of live (queued, running, suspended, or paused) sessions.
    pub fn live_sessions(&self) -> usize {
        self.sessions.len()
    }

    // ── Bindings ───────────────────────────────────────────────────────

    /// Creates a top-level binding with the controller's default options.
    pub fn create_binding(&mut self, markup: Markup, source: Source) -> BindingId {
        let options = BindOptions::from_config(&self.config);
        self.create_binding_with(markup, source, options)
    }

    /// Creates a top-level binding with explicit options.
    pub fn create_binding_with(&mut self, markup: Markup, source: Source, options: BindOptions) -> BindingId {
        let kind = if source.is_array() {
            BindingKind::Array
        } else {
            BindingKind::Object
        };
        let id = self.insert_binding(None, kind, options, 0);
        if let Some(b) = self.bindings.get_mut(&id) {
            b.state.assign_markup(markup);
            b.state.assign_source(source);
        }
        id
    }

    pub(crate) fn insert_binding(
        &mut self,
        parent: Option<BindingId>,
        kind: BindingKind,
        options: BindOptions,
        depth: usize,
    ) -> BindingId {
        let id = BindingId(self.next_binding);
        self.next_binding += 1;
        self.bindings.insert(id, Binding::new(id, parent, kind, options, depth));
        id
    }

    fn binding_entry(&mut self, id: BindingId) -> Result<&mut Binding, ConfigError> {
        self.bindings.get_mut(&id).ok_or(ConfigError::UnknownBinding(id))
    }

    /// Assigns a new source; the next session adopts it.
    pub fn set_source(&mut self, id: BindingId, source: Source) -> Result<(), ConfigError> {
        let b = self.binding_entry(id)?;
        if b.parent.is_none() {
            b.kind = if source.is_array() {
                BindingKind::Array
            } else {
                BindingKind::Object
            };
        }
        b.state.assign_source(source);
        Ok(())
    }

    /// Assigns new markup; the next session adopts it.
    pub fn set_markup(&mut self, id: BindingId, markup: Markup) -> Result<(), ConfigError> {
        self.binding_entry(id)?.state.assign_markup(markup);
        Ok(())
    }

    /// Assigns a new host element; the next session adopts it.
    pub fn set_element(&mut self, id: BindingId, element: NodeId) -> Result<(), ConfigError> {
        if !self.doc.contains(element) {
            return Err(ConfigError::UnknownNode(element));
        }
        self.binding_entry(id)?.state.assign_element(element);
        Ok(())
    }

    /// Registers (or replaces) a named template.
    pub fn register_template(&mut self, name: &str, markup: &str) -> Result<(), ConfigError> {
        self.templates.register(name, markup)?;
        debug!(name, "template registered");
        Ok(())
    }

    // ── Requests ───────────────────────────────────────────────────────

    /// Requests a session rendering `id` into `target`.
    ///
    /// `callback` fires exactly once, when the session (or the session that
    /// superseded it) reaches a terminal state.
    pub fn bind(
        &mut self,
        id: BindingId,
        target: NodeId,
        callback: impl FnOnce(&Binding) + 'static,
    ) -> Result<SessionId, ConfigError> {
        if !self.doc.contains(target) {
            return Err(ConfigError::UnknownNode(target));
        }
        let b = self.bindings.get_mut(&id).ok_or(ConfigError::UnknownBinding(id))?;
        Self::check_markup(&self.templates, b)?;
        b.state.assign_element(target);
        self.request(id, Box::new(callback))
    }

    /// Requests a session re-rendering `id` into its current host.
    pub fn update(
        &mut self,
        id: BindingId,
        callback: impl FnOnce(&Binding) + 'static,
    ) -> Result<SessionId, ConfigError> {
        let b = self.bindings.get(&id).ok_or(ConfigError::UnknownBinding(id))?;
        if b.state.effective_element().is_none() {
            return Err(ConfigError::NotBound(id));
        }
        Self::check_markup(&self.templates, b)?;
        self.request(id, Box::new(callback))
    }

    fn check_markup(templates: &TemplateCache, b: &Binding) -> Result<(), ConfigError> {
        match b.state.effective_markup() {
            None => Err(ConfigError::MissingMarkup(b.id)),
            Some(Markup::Named(name)) if templates.named(&name).is_none() => {
                Err(ConfigError::UnknownTemplate(name))
            }
            Some(_) => Ok(()),
        }
    }

    fn request(&mut self, id: BindingId, callback: BindCallback) -> Result<SessionId, ConfigError> {
        Ok(self.open_session(id, None, vec![(id, callback)])?)
    }

    /// Queues a session for `bid`, superseding every live session that
    /// targets the same binding or host.
    ///
    /// Callbacks of superseded sessions move to the new session ahead of its
    /// own, so collapsed requests still complete in arrival order.
    pub(crate) fn open_session(
        &mut self,
        bid: BindingId,
        parent: Option<SessionId>,
        callbacks: Vec<(BindingId, BindCallback)>,
    ) -> Result<SessionId, StreamError> {
        let host = self.bindings.get(&bid).and_then(|b| match b.kind {
            BindingKind::Element { index } if index > 0 => None,
            _ => b.state.effective_element(),
        });
        let sid = SessionId(self.next_session);
        self.next_session += 1;
        let stream = Self::build_stream(sid)?;

        let mut losers: Vec<SessionId> = self
            .sessions
            .values()
            .filter(|s| targets_conflict(&self.bindings, (bid, host), (s.binding, s.host)))
            .map(|s| s.id)
            .collect();
        losers.sort();

        let mut inherited = Vec::new();
        for loser in &losers {
            if let Some(s) = self.sessions.get_mut(loser) {
                inherited.append(&mut s.callbacks);
            }
            self.summary.supersedes += 1;
            self.telemetry.on_superseded(*loser, sid);
            warn!(loser = %loser, winner = %sid, binding = %bid, "session superseded");
        }
        inherited.extend(callbacks);

        self.sessions
            .insert(sid, Session::new(sid, bid, parent, host, stream, inherited));
        for loser in losers {
            self.cancel_session(loser);
        }
        match parent {
            Some(p) => self.scheduler.enqueue_child(p, sid),
            None => self.scheduler.enqueue(sid),
        }
        if let Some(b) = self.bindings.get_mut(&bid) {
            b.advance(Progress::Queued);
            b.completion = Completion::Queued;
        }
        debug!(session = %sid, binding = %bid, parent = ?parent, "session queued");
        Ok(sid)
    }

    /// Cancels every live session of `id`.
    pub fn cancel(&mut self, id: BindingId) -> Result<(), ConfigError> {
        if !self.bindings.contains_key(&id) {
            return Err(ConfigError::UnknownBinding(id));
        }
        for sid in self.sessions_of(id) {
            self.cancel_session(sid);
        }
        Ok(())
    }

    /// Resumes sessions of `id` paused by a listener. Returns `true` if any
    /// session was paused.
    pub fn resume(&mut self, id: BindingId) -> Result<bool, ConfigError> {
        if !self.bindings.contains_key(&id) {
            return Err(ConfigError::UnknownBinding(id));
        }
        let mut resumed = false;
        for sid in self.sessions_of(id) {
            let Some(stream) = self.sessions.get_mut(&sid).and_then(|s| s.stream.as_mut()) else {
                continue;
            };
            if stream.status() == StreamStatus::Paused {
                stream.resume();
                self.wakeups.push_back(sid);
                resumed = true;
            }
        }
        Ok(resumed)
    }

    fn sessions_of(&self, id: BindingId) -> Vec<SessionId> {
        let mut out: Vec<SessionId> = self
            .sessions
            .values()
            .filter(|s| s.binding == id)
            .map(|s| s.id)
            .collect();
        out.sort();
        out
    }

    /// Removes everything `id` rendered and resets it to `Idle`.
    pub fn dispose(&mut self, id: BindingId) -> Result<(), ConfigError> {
        if !self.bindings.contains_key(&id) {
            return Err(ConfigError::UnknownBinding(id));
        }
        self.dispose_binding(id);
        Ok(())
    }

    /// Disposes `id` and its descendants. Descendant bindings are dropped;
    /// a top-level binding stays behind as `Disposed`.
    pub(crate) fn dispose_binding(&mut self, id: BindingId) {
        let Some(b) = self.bindings.get_mut(&id) else {
            return;
        };
        b.completion = Completion::Disposed;
        let children = b.children();
        let mut doomed: Vec<NodeId> = b.nodes().to_vec();
        doomed.extend(b.fragment.take());
        let parent = b.parent;

        for sid in self.sessions_of(id) {
            self.cancel_session(sid);
        }
        for child in children {
            self.dispose_binding(child);
        }
        for n in doomed {
            if self.doc.contains(n) && self.doc.destroy(n).is_err() {
                warn!(binding = %id, node = %n, "node vanished during dispose");
            }
        }
        self.handlers.remove_binding(id);

        if parent.is_some() {
            self.bindings.remove(&id);
        } else if let Some(b) = self.bindings.get_mut(&id) {
            b.state.reset();
            b.progress = Progress::Idle;
            b.error = None;
            b.observer = None;
            b.anchor = None;
            b.placed = None;
        }
        debug!(binding = %id, "disposed");
    }

    // ── Driving ────────────────────────────────────────────────────────

    /// Delivers the result of a pending retrieval and wakes every session
    /// waiting on it.
    pub fn complete_fetch(&mut self, url: &str, result: Result<String, String>) {
        self.contents.store(url, result);
        for sid in self.fetch_waiters.remove(url).unwrap_or_default() {
            let Some(stream) = self.sessions.get_mut(&sid).and_then(|s| s.stream.as_mut()) else {
                continue;
            };
            if stream.status() == StreamStatus::Suspended && stream.seek_pending(RESOLVE_MARKUP).is_ok() {
                self.wakeups.push_back(sid);
            }
        }
    }

    /// Runs sessions until none can make progress.
    ///
    /// Returns early with the hazard when a fatal error (a circular source)
    /// is raised; sessions not yet finished stay queued.
    pub fn run_until_idle(&mut self) -> Result<RunSummary, BindError> {
        let carved = self.scheduler.batches_carved;
        let rescued = self.scheduler.rescues;
        loop {
            if let Some(err) = self.fatal.take() {
                warn!(err = %err, "drive aborted");
                self.summary = RunSummary::default();
                return Err(err);
            }
            if let Some(sid) = self.wakeups.pop_front() {
                self.drive(sid);
                continue;
            }
            let view = Sessions {
                sessions: &self.sessions,
                bindings: &self.bindings,
            };
            match self.scheduler.next_start(&view, self.telemetry.as_ref()) {
                Some(sid) => self.start(sid),
                None => break,
            }
        }
        let mut summary = std::mem::take(&mut self.summary);
        summary.batches = self.scheduler.batches_carved - carved;
        summary.watchdog_rescues = self.scheduler.rescues - rescued;
        self.telemetry.on_summary(&summary);
        if !self.sessions.is_empty() {
            info!(waiting = self.sessions.len(), "drive idle with suspended sessions");
        }
        Ok(summary)
    }

    // ── Events ─────────────────────────────────────────────────────────

    /// Adds a controller-level listener.
    pub fn on(&mut self, kind: EventKind, listener: impl Fn(&BindEvent, &mut EventState) + 'static) {
        self.listeners.add(kind, Rc::new(listener));
    }

    /// Adds a listener to one binding.
    pub fn on_binding(
        &mut self,
        id: BindingId,
        kind: EventKind,
        listener: impl Fn(&BindEvent, &mut EventState) + 'static,
    ) -> Result<(), ConfigError> {
        self.binding_entry(id)?.listeners.add(kind, Rc::new(listener));
        Ok(())
    }

    /// Invokes the handler bound to `on{event}` on `node`.
    ///
    /// Returns `false` when the node carries no bound handler for `event`.
    pub fn dispatch(&mut self, node: NodeId, event: &str) -> Result<bool, ConfigError> {
        if !self.doc.contains(node) {
            return Err(ConfigError::UnknownNode(node));
        }
        let Some(key) = self
            .doc
            .attr(node, &format!("on{event}"))
            .and_then(parse_handler_attr)
        else {
            return Ok(false);
        };
        let Some((binding, handler)) = self.handlers.get(&key).cloned() else {
            return Ok(false);
        };
        handler.call(&HandlerCall {
            binding,
            node,
            event: event.to_owned(),
        });
        Ok(true)
    }
}
