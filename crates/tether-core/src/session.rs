// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Sessions: one bind-or-update attempt driven through a fixed phase stream.
//!
//! | key                  | kind  | surfaces                          |
//! |----------------------|-------|-----------------------------------|
//! | `begin`              | event | `Bind`                            |
//! | `resolve-markup`     | work  | `SetMarkup` (may wait on a fetch) |
//! | `resolve-bindings`   | work  | `SetBindings`                     |
//! | `populate`           | work  | `PopulateMarkup`                  |
//! | `enumerate-children` | work  |                                   |
//! | `bind-children`      | work  | `BindChildren`, `ChildrenBound`   |
//! | `inject`             | work  |                                   |
//! | `finish`             | event | `Bound`                           |
//!
//! Event phases run the binding's listeners as the main handler and the
//! controller's listeners as the fan-out stage. Work phases surface their
//! events the same way but only honor `cancel`.
//!
//! Nothing attached is mutated before `inject`, so a canceled or failed
//! session rolls its binding back to the exact pre-session state.

use std::collections::BTreeMap;
use std::rc::Rc;

use rustc_hash::{FxHashMap, FxHashSet};
use tether_dom::{Content, IndexPath, NodeId};
use tether_stream::{EventState, PhaseKey, Stream, StreamError, StreamStatus, Work};
use tracing::{debug, trace, warn};

use crate::binder::{collect_paths, render, RenderContext};
use crate::binding::{Binding, BindingKind, Completion, Progress};
use crate::config::{BindMode, InsertMode};
use crate::controller::Controller;
use crate::error::BindError;
use crate::events::{BindEvent, EventKind};
use crate::ident::{BindingId, Hash, SessionId};
use crate::markup::{ContentEntry, FetchPoll, Markup};
use crate::merge::{self, MergeContext, MergePlan};
use crate::observer::{touches, SnapshotObserver};
use crate::reconcile::{reconcile, NewChild, OldChild};
use crate::source::{Handler, Json, Source, Value};
use crate::state::ChildEntry;

pub(crate) const BEGIN: PhaseKey = "begin";
pub(crate) const RESOLVE_MARKUP: PhaseKey = "resolve-markup";
pub(crate) const RESOLVE_BINDINGS: PhaseKey = "resolve-bindings";
pub(crate) const POPULATE: PhaseKey = "populate";
pub(crate) const ENUMERATE_CHILDREN: PhaseKey = "enumerate-children";
pub(crate) const BIND_CHILDREN: PhaseKey = "bind-children";
pub(crate) const INJECT: PhaseKey = "inject";
pub(crate) const FINISH: PhaseKey = "finish";

/// Completion callback handed to `bind`/`update`. Runs once, with the
/// binding in its terminal state.
pub type BindCallback = Box<dyn FnOnce(&Binding)>;

type SessionStream = Stream<Controller, BindError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SessionStatus {
    Queued,
    Running,
    Suspended,
    Paused,
}

/// Data carried between phases of one session.
#[derive(Debug, Default)]
pub(crate) struct Staged {
    template: Option<Rc<Content>>,
    reused: bool,
    handlers: Option<Vec<(Hash, Handler)>>,
    plan: Option<MergePlan>,
    added: Vec<BindingId>,
    removed: Vec<BindingId>,
    spawned: bool,
}

pub(crate) struct Session {
    pub(crate) id: SessionId,
    pub(crate) binding: BindingId,
    pub(crate) parent: Option<SessionId>,
    /// Host element this session targets, if it takes part in host conflicts.
    pub(crate) host: Option<NodeId>,
    pub(crate) stream: Option<SessionStream>,
    pub(crate) status: SessionStatus,
    pub(crate) started: bool,
    pub(crate) cancel: bool,
    cleaned: bool,
    pub(crate) callbacks: Vec<(BindingId, BindCallback)>,
    pub(crate) children: Vec<SessionId>,
    staged: Staged,
}

impl core::fmt::Debug for Session {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("binding", &self.binding)
            .field("parent", &self.parent)
            .field("status", &self.status)
            .field("started", &self.started)
            .field("cancel", &self.cancel)
            .field("callbacks", &self.callbacks.len())
            .field("children", &self.children)
            .finish_non_exhaustive()
    }
}

impl Session {
    pub(crate) fn new(
        id: SessionId,
        binding: BindingId,
        parent: Option<SessionId>,
        host: Option<NodeId>,
        stream: SessionStream,
        callbacks: Vec<(BindingId, BindCallback)>,
    ) -> Self {
        Self {
            id,
            binding,
            parent,
            host,
            stream: Some(stream),
            status: SessionStatus::Queued,
            started: false,
            cancel: false,
            cleaned: false,
            callbacks,
            children: Vec::new(),
            staged: Staged::default(),
        }
    }
}

enum Flow {
    Next,
    Seek(PhaseKey),
    Wait,
    Abort,
}

/// A child region (or array item) found by `enumerate-children`.
struct Found {
    path: String,
    source: Source,
    host: NodeId,
    template: Rc<Content>,
    array_member: bool,
}

fn child_source(value: Option<Value>) -> Source {
    match value {
        Some(Value::Source(s)) => s,
        Some(Value::Scalar(j)) => Source::scalar(j),
        Some(Value::Handler(_)) | None => Source::scalar(Json::Null),
    }
}

/// Two targets conflict when they share a binding, or share a host element
/// unless one is element 0 of the other's array.
pub(crate) fn targets_conflict(
    bindings: &FxHashMap<BindingId, Binding>,
    a: (BindingId, Option<NodeId>),
    b: (BindingId, Option<NodeId>),
) -> bool {
    if a.0 == b.0 {
        return true;
    }
    let (Some(ha), Some(hb)) = (a.1, b.1) else {
        return false;
    };
    if ha != hb {
        return false;
    }
    match (bindings.get(&a.0), bindings.get(&b.0)) {
        (Some(x), Some(y)) => !(x.is_first_array_element_of(y) || y.is_first_array_element_of(x)),
        _ => true,
    }
}

impl Controller {
    pub(crate) fn build_stream(sid: SessionId) -> Result<SessionStream, StreamError> {
        let mut s: SessionStream = Stream::new();
        s.add_event(BEGIN, move |cx, st| cx.emit_binding(sid, EventKind::Bind, st))?;
        s.add_listener(BEGIN, move |cx, st| cx.emit_global(sid, EventKind::Bind, st))?;
        s.add_work(RESOLVE_MARKUP, move |cx, w| cx.run_phase(sid, w, Self::resolve_markup))?;
        s.add_work(RESOLVE_BINDINGS, move |cx, w| cx.run_phase(sid, w, Self::resolve_bindings))?;
        s.add_work(POPULATE, move |cx, w| cx.run_phase(sid, w, Self::populate))?;
        s.add_work(ENUMERATE_CHILDREN, move |cx, w| cx.run_phase(sid, w, Self::enumerate_children))?;
        s.add_work(BIND_CHILDREN, move |cx, w| cx.run_phase(sid, w, Self::bind_children))?;
        s.add_work(INJECT, move |cx, w| cx.run_phase(sid, w, Self::inject))?;
        s.add_event(FINISH, move |cx, st| {
            if !cx.is_cancel_requested(sid) {
                cx.emit_binding(sid, EventKind::Bound, st);
            }
        })?;
        s.add_listener(FINISH, move |cx, st| {
            if !cx.is_cancel_requested(sid) {
                cx.emit_global(sid, EventKind::Bound, st);
            }
        })?;
        s.on_complete(move |cx| cx.finalize(sid, Completion::Success, None));
        s.on_cancel(move |cx| cx.finalize(sid, Completion::Canceled, None));
        s.on_error(move |cx, e| cx.fail(sid, e.clone()));
        Ok(s)
    }

    // ── Driving ────────────────────────────────────────────────────────

    /// Swaps the binding's state and runs the session's stream.
    pub(crate) fn start(&mut self, sid: SessionId) {
        let Some(bid) = self.sessions.get(&sid).map(|s| s.binding) else {
            return;
        };
        let swapped = match self.bindings.get_mut(&bid) {
            Some(b) => b.state.swap().map_err(BindError::from),
            None => Err(BindError::Internal("session outlived its binding")),
        };
        if let Err(e) = swapped {
            self.fail(sid, e);
            return;
        }
        if let Some(b) = self.bindings.get_mut(&bid) {
            b.completion = Completion::Executing;
        }
        if let Some(s) = self.sessions.get_mut(&sid) {
            s.started = true;
        }
        self.summary.sessions_executed += 1;
        debug!(session = %sid, binding = %bid, "session started");
        self.drive(sid);
    }

    /// Executes the session's stream until it finishes, suspends or pauses.
    pub(crate) fn drive(&mut self, sid: SessionId) {
        let Some(session) = self.sessions.get_mut(&sid) else {
            return;
        };
        let Some(mut stream) = session.stream.take() else {
            return;
        };
        session.status = SessionStatus::Running;
        let step = stream.execute(self);
        trace!(session = %sid, ?step, "stream yielded");
        // Finalized sessions are gone; their stream is dropped here.
        let Some(session) = self.sessions.get_mut(&sid) else {
            return;
        };
        session.status = match stream.status() {
            StreamStatus::Paused => SessionStatus::Paused,
            _ => SessionStatus::Suspended,
        };
        if session.cancel {
            match stream.status() {
                StreamStatus::Suspended => {
                    if let Some(key) = stream.current_key() {
                        if stream.seek_pending(key).is_ok() {
                            self.wakeups.push_back(sid);
                        }
                    }
                }
                StreamStatus::Paused => {
                    stream.resume();
                    self.wakeups.push_back(sid);
                }
                _ => {}
            }
        }
        session.stream = Some(stream);
    }

    /// Requests cancellation of a live session.
    ///
    /// Queued sessions finish immediately; suspended or paused ones are woken
    /// so their next phase observes the request.
    pub(crate) fn cancel_session(&mut self, sid: SessionId) {
        let Some(session) = self.sessions.get_mut(&sid) else {
            return;
        };
        if session.cancel && session.started {
            return;
        }
        session.cancel = true;
        if !session.started {
            self.finalize(sid, Completion::Canceled, None);
            return;
        }
        let Some(stream) = session.stream.as_mut() else {
            // Running: the next phase boundary sees the flag.
            return;
        };
        match stream.status() {
            StreamStatus::Suspended => {
                if let Some(key) = stream.current_key() {
                    if stream.seek_pending(key).is_ok() {
                        self.wakeups.push_back(sid);
                    }
                }
            }
            StreamStatus::Paused => {
                stream.resume();
                self.wakeups.push_back(sid);
            }
            _ => {}
        }
    }

    pub(crate) fn is_cancel_requested(&self, sid: SessionId) -> bool {
        self.sessions.get(&sid).map_or(true, |s| s.cancel)
    }

    fn run_phase(
        &mut self,
        sid: SessionId,
        work: &mut Work<BindError>,
        phase: fn(&mut Self, SessionId) -> Result<Flow, BindError>,
    ) {
        if self.is_cancel_requested(sid) {
            self.cleanup(sid);
            work.seek(FINISH);
            return;
        }
        match phase(self, sid) {
            Ok(Flow::Next) => work.resolve(),
            Ok(Flow::Seek(key)) => work.seek(key),
            Ok(Flow::Wait) => {}
            Ok(Flow::Abort) => {
                if let Some(s) = self.sessions.get_mut(&sid) {
                    s.cancel = true;
                }
                self.cleanup(sid);
                work.seek(FINISH);
            }
            Err(e) => work.reject(e),
        }
    }

    // ── Events ─────────────────────────────────────────────────────────

    fn event_for(&self, sid: SessionId, kind: EventKind, error: Option<BindError>) -> Option<BindEvent> {
        let binding = self.sessions.get(&sid)?.binding;
        let progress = self.bindings.get(&binding)?.progress;
        Some(BindEvent {
            kind,
            binding,
            session: sid,
            progress,
            error,
        })
    }

    pub(crate) fn emit_binding(&self, sid: SessionId, kind: EventKind, st: &mut EventState) {
        let Some(event) = self.event_for(sid, kind, None) else {
            return;
        };
        if let Some(b) = self.bindings.get(&event.binding) {
            b.listeners.emit(&event, st);
        }
    }

    pub(crate) fn emit_global(&self, sid: SessionId, kind: EventKind, st: &mut EventState) {
        let Some(event) = self.event_for(sid, kind, None) else {
            return;
        };
        if self.bindings.get(&event.binding).is_some_and(|b| !b.suppressed) {
            self.listeners.emit(&event, st);
        }
    }

    /// Fires `kind` from inside a work phase; returns `true` if a listener
    /// canceled.
    fn surface(&self, sid: SessionId, kind: EventKind, key: PhaseKey) -> bool {
        let mut st = EventState::new(key);
        self.emit_binding(sid, kind, &mut st);
        self.emit_global(sid, kind, &mut st);
        st.is_canceled()
    }

    // ── Phases ─────────────────────────────────────────────────────────

    fn session_binding(&self, sid: SessionId) -> Result<BindingId, BindError> {
        self.sessions
            .get(&sid)
            .map(|s| s.binding)
            .ok_or(BindError::Internal("unknown session"))
    }

    fn binding_ref(&self, bid: BindingId) -> Result<&Binding, BindError> {
        self.bindings
            .get(&bid)
            .ok_or(BindError::Internal("unknown binding"))
    }

    fn binding_mut(&mut self, bid: BindingId) -> Result<&mut Binding, BindError> {
        self.bindings
            .get_mut(&bid)
            .ok_or(BindError::Internal("unknown binding"))
    }

    fn staged_mut(&mut self, sid: SessionId) -> Result<&mut Staged, BindError> {
        self.sessions
            .get_mut(&sid)
            .map(|s| &mut s.staged)
            .ok_or(BindError::Internal("unknown session"))
    }

    fn staged_template(&self, sid: SessionId) -> Result<Rc<Content>, BindError> {
        self.sessions
            .get(&sid)
            .and_then(|s| s.staged.template.clone())
            .ok_or(BindError::Internal("template not resolved"))
    }

    fn resolve_markup(&mut self, sid: SessionId) -> Result<Flow, BindError> {
        let bid = self.session_binding(sid)?;
        let b = self.binding_ref(bid)?;
        if b.depth > self.config.max_depth {
            return Err(BindError::DepthExceeded(b.depth));
        }
        let element = b
            .element()
            .filter(|e| self.doc.contains(*e))
            .ok_or(BindError::MissingElement(bid))?;
        let markup = b.state().markup.clone().ok_or(BindError::MissingMarkup(bid))?;
        self.binding_mut(bid)?.advance(Progress::GotElement);

        if let Some(template) = self.reusable_template(bid) {
            trace!(binding = %bid, "nothing observable changed; reusing populated markup");
            let staged = self.staged_mut(sid)?;
            staged.template = Some(template);
            staged.reused = true;
            self.binding_mut(bid)?.advance(Progress::Populated);
            return Ok(Flow::Seek(ENUMERATE_CHILDREN));
        }

        let template = match markup {
            Markup::Inline(text) => self.templates.parse(&text)?,
            Markup::Content(content) => content,
            Markup::Named(name) => {
                let text = self
                    .templates
                    .named(&name)
                    .ok_or_else(|| BindError::UnknownTemplate(name.clone()))?
                    .to_owned();
                self.templates.parse(&text)?
            }
            Markup::Remote(url) => match self.fetch_markup(sid, &url)? {
                Some(text) => self.templates.parse(&text)?,
                None => {
                    trace!(binding = %bid, url, "waiting for remote markup");
                    return Ok(Flow::Wait);
                }
            },
        };
        trace!(binding = %bid, element = %element, "markup resolved");
        self.staged_mut(sid)?.template = Some(template);
        self.binding_mut(bid)?.advance(Progress::GotMarkup);
        if self.surface(sid, EventKind::SetMarkup, RESOLVE_MARKUP) {
            return Ok(Flow::Abort);
        }
        Ok(Flow::Next)
    }

    /// Returns the previous template when a rebind can skip population:
    /// same source object, same markup, live nodes, and no change the
    /// observer reports touches a bound token.
    fn reusable_template(&self, bid: BindingId) -> Option<Rc<Content>> {
        let b = self.bindings.get(&bid)?;
        let old = b.state.old()?;
        let cur = b.state.current();
        let (Some(before), Some(now)) = (&old.source, &cur.source) else {
            return None;
        };
        if !before.ptr_eq(now) || old.markup != cur.markup {
            return None;
        }
        let template = old.template.clone()?;
        if b.kind != BindingKind::Array {
            old.content.as_ref()?;
            if !old.nodes.iter().all(|n| self.doc.contains(*n)) {
                return None;
            }
        }
        let observer = b.observer.as_ref()?;
        if observer.root() != now.id() {
            return None;
        }
        let touched = observer
            .changes(now)
            .iter()
            .any(|c| old.bound.keys().any(|p| touches(&c.path, p)));
        (!touched).then_some(template)
    }

    fn fetch_markup(&mut self, sid: SessionId, url: &str) -> Result<Option<String>, BindError> {
        match self.contents.get(url).cloned() {
            Some(ContentEntry::Ready(text)) => return Ok(Some(text)),
            Some(ContentEntry::Failed(reason)) => {
                return Err(BindError::Fetch {
                    url: url.to_owned(),
                    reason,
                })
            }
            Some(ContentEntry::Pending) => {
                self.wait_for_fetch(url, sid);
                return Ok(None);
            }
            None => {}
        }
        match self.fetcher.fetch(url) {
            FetchPoll::Ready(result) => {
                self.contents.store(url, result.clone());
                result.map(Some).map_err(|reason| BindError::Fetch {
                    url: url.to_owned(),
                    reason,
                })
            }
            FetchPoll::Pending => {
                self.contents.mark_pending(url);
                self.wait_for_fetch(url, sid);
                Ok(None)
            }
        }
    }

    fn wait_for_fetch(&mut self, url: &str, sid: SessionId) {
        let waiters = self.fetch_waiters.entry(url.to_owned()).or_default();
        if !waiters.contains(&sid) {
            waiters.push(sid);
        }
    }

    fn resolve_bindings(&mut self, sid: SessionId) -> Result<Flow, BindError> {
        let bid = self.session_binding(sid)?;
        let template = self.staged_template(sid)?;
        let source = self.binding_ref(bid)?.source().cloned();
        let bound: BTreeMap<String, String> = collect_paths(&template, &self.config.bind_attribute)
            .into_iter()
            .map(|path| {
                let value = source
                    .as_ref()
                    .and_then(|s| s.resolve(&path))
                    .map(|v| v.render())
                    .unwrap_or_default();
                (path, value)
            })
            .collect();
        let b = self.binding_mut(bid)?;
        b.state.current_mut().bound = bound;
        b.advance(Progress::GotBoundValues);
        if self.surface(sid, EventKind::SetBindings, RESOLVE_BINDINGS) {
            return Ok(Flow::Abort);
        }
        Ok(Flow::Next)
    }

    fn populate(&mut self, sid: SessionId) -> Result<Flow, BindError> {
        let bid = self.session_binding(sid)?;
        let template = self.staged_template(sid)?;
        let (kind, source) = {
            let b = self.binding_ref(bid)?;
            (b.kind, b.source().cloned())
        };
        if kind == BindingKind::Array {
            // Arrays render no wrapper; their items render the template.
            let st = self.binding_mut(bid)?.state.current_mut();
            st.template = Some(template);
            st.content = None;
        } else {
            let rendered = render(
                &template,
                &RenderContext {
                    source: source.as_ref(),
                    binding: bid,
                    bind_attribute: &self.config.bind_attribute,
                },
            );
            let st = self.binding_mut(bid)?.state.current_mut();
            st.template = Some(template);
            st.content = Some(Rc::new(rendered.content));
            st.bound = rendered.bound;
            self.staged_mut(sid)?.handlers = Some(rendered.handlers);
        }
        self.binding_mut(bid)?.advance(Progress::Populated);
        if self.surface(sid, EventKind::PopulateMarkup, POPULATE) {
            return Ok(Flow::Abort);
        }
        Ok(Flow::Next)
    }

    fn enumerate_children(&mut self, sid: SessionId) -> Result<Flow, BindError> {
        let bid = self.session_binding(sid)?;
        let template = self.staged_template(sid)?;
        let b = self.binding_ref(bid)?;
        let kind = b.kind;
        let depth = b.depth;
        let options = b.options;
        let suppress = b.suppressed || b.options.suppress_child_events;
        let element = b.element().ok_or(BindError::MissingElement(bid))?;
        let source = b.source().cloned();
        let content = b.state().content.clone();
        let old_content = b.state.old().and_then(|o| o.content.clone());
        let nodes = b.nodes().to_vec();
        let old_children = b.state().children.clone();

        let mut found = Vec::new();
        if kind == BindingKind::Array {
            let items = source.ok_or(BindError::Internal("array binding without source"))?;
            for (key, value) in items.entries() {
                found.push(Found {
                    path: key,
                    source: child_source(Some(value)),
                    host: element,
                    template: Rc::clone(&template),
                    array_member: true,
                });
            }
        } else {
            let content = content.ok_or(BindError::Internal("content not populated"))?;
            let alive = nodes.iter().all(|n| self.doc.contains(*n));
            let reused = self.sessions.get(&sid).is_some_and(|s| s.staged.reused);
            let forced = options.mode == BindMode::Overwrite && !old_children.is_empty();
            // A reused template diffs against itself in every mode.
            let overwrite = options.mode == BindMode::Overwrite && !forced && !reused;
            let base = if alive && !overwrite { old_content.as_deref() } else { None };
            let live: Vec<NodeId> = nodes.into_iter().filter(|n| self.doc.contains(*n)).collect();
            let cx = MergeContext {
                bind_attribute: &self.config.bind_attribute,
                multi_value: &self.config.multi_value_attributes,
                forced,
            };
            let plan = merge::plan(&mut self.doc, base, &content, &live, &cx)?;
            trace!(binding = %bid, ops = plan.ops.len(), built = plan.built.len(), "merge planned");

            let mut holes: Vec<(IndexPath, String, Rc<Content>)> = Vec::new();
            let bind_attribute = self.config.bind_attribute.as_str();
            template.walk_elements(|path, el| match el.attr(bind_attribute) {
                Some(data_path) => {
                    holes.push((
                        path.clone(),
                        data_path.trim().to_owned(),
                        Rc::new(Content::List(el.children.clone())),
                    ));
                    false
                }
                None => true,
            });
            for (path, data_path, inner) in holes {
                let host = plan
                    .host(&path)
                    .ok_or(BindError::Internal("region host missing from merge plan"))?;
                found.push(Found {
                    source: child_source(source.as_ref().and_then(|s| s.resolve(&data_path))),
                    path: data_path,
                    host,
                    template: inner,
                    array_member: false,
                });
            }
            self.staged_mut(sid)?.plan = Some(plan);
        }
        if !options.recursive {
            found.clear();
        }
        if !found.is_empty() && depth + 1 > self.config.max_depth {
            return Err(BindError::DepthExceeded(depth + 1));
        }
        self.check_circular(bid, &found)?;

        let olds: Vec<OldChild> = old_children
            .iter()
            .map(|c| OldChild {
                path: c.path.clone(),
                binding: c.binding,
                source: c.source.clone(),
                hash: c.hash,
                array_member: c.array_member,
            })
            .collect();
        let news: Vec<NewChild> = found
            .iter()
            .map(|f| NewChild {
                path: f.path.clone(),
                source: f.source.clone(),
            })
            .collect();

        let mut entries = Vec::with_capacity(found.len());
        let mut added = Vec::new();
        let mut removed = Vec::new();
        for rec in reconcile(&olds, &news) {
            let Some(ni) = rec.new else {
                if let Some(oi) = rec.old {
                    removed.push(olds[oi].binding);
                }
                continue;
            };
            let f = &found[ni];
            let child_kind = if f.array_member {
                BindingKind::Element { index: ni }
            } else if f.source.is_array() {
                BindingKind::Array
            } else {
                BindingKind::Object
            };
            let child = match rec.old {
                Some(oi) => olds[oi].binding,
                None => {
                    let id = self.insert_binding(Some(bid), child_kind, options, depth + 1);
                    added.push(id);
                    id
                }
            };
            trace!(parent = %bid, child = %child, path = %f.path, difference = ?rec.difference, changed = rec.content_changed, "child classified");
            let cb = self.binding_mut(child)?;
            cb.kind = child_kind;
            cb.suppressed = suppress;
            cb.state.assign_source(f.source.clone());
            cb.state.assign_element(f.host);
            cb.state.assign_markup(Markup::Content(Rc::clone(&f.template)));
            cb.state.assign_path(&f.path);
            entries.push(ChildEntry {
                path: f.path.clone(),
                binding: child,
                source: f.source.clone(),
                hash: f.source.structural_hash(),
                array_member: f.array_member,
                host: f.host,
            });
        }

        let b = self.binding_mut(bid)?;
        b.state.current_mut().children = entries;
        b.advance(Progress::GotChildren);
        let staged = self.staged_mut(sid)?;
        staged.added = added;
        staged.removed = removed;
        Ok(Flow::Next)
    }

    /// Rejects child sources already bound by this binding or an ancestor.
    fn check_circular(&self, bid: BindingId, found: &[Found]) -> Result<(), BindError> {
        let mut ancestors = Vec::new();
        let mut cursor = Some(bid);
        while let Some(id) = cursor {
            let b = self.binding_ref(id)?;
            if let Some(s) = b.source() {
                ancestors.push(s.id());
            }
            cursor = b.parent;
        }
        for f in found {
            if f.source.scalar_value().is_none() && ancestors.contains(&f.source.id()) {
                warn!(binding = %bid, path = %f.path, "circular source reference");
                return Err(BindError::CircularSource {
                    binding: bid,
                    path: f.path.clone(),
                });
            }
        }
        Ok(())
    }

    fn bind_children(&mut self, sid: SessionId) -> Result<Flow, BindError> {
        let bid = self.session_binding(sid)?;
        let first = !self
            .sessions
            .get(&sid)
            .is_some_and(|s| s.staged.spawned);
        if first {
            self.staged_mut(sid)?.spawned = true;
            self.binding_mut(bid)?.advance(Progress::BindingChildren);
            if self.surface(sid, EventKind::BindChildren, BIND_CHILDREN) {
                return Ok(Flow::Abort);
            }
            let children = self.binding_ref(bid)?.children();
            for child in children {
                let csid = self.open_session(child, Some(sid), Vec::new())?;
                if let Some(s) = self.sessions.get_mut(&sid) {
                    s.children.push(csid);
                }
            }
        }
        let pending = self
            .sessions
            .get(&sid)
            .map_or(0, |s| s.children.iter().filter(|c| self.sessions.contains_key(*c)).count());
        if pending > 0 {
            trace!(binding = %bid, pending, "waiting on child sessions");
            return Ok(Flow::Wait);
        }
        self.binding_mut(bid)?.advance(Progress::ChildrenBound);
        if self.surface(sid, EventKind::ChildrenBound, BIND_CHILDREN) {
            return Ok(Flow::Abort);
        }
        Ok(Flow::Next)
    }

    fn inject(&mut self, sid: SessionId) -> Result<Flow, BindError> {
        let bid = self.session_binding(sid)?;
        let removed = std::mem::take(&mut self.staged_mut(sid)?.removed);
        for child in removed {
            self.dispose_binding(child);
        }
        let (kind, element) = {
            let b = self.binding_ref(bid)?;
            (b.kind, b.element().ok_or(BindError::MissingElement(bid))?)
        };

        if kind == BindingKind::Array {
            // Relink every item's nodes in item order after the array's anchor.
            let mut prev = self.anchor_of(bid)?;
            let mut nodes = Vec::new();
            let children = self.binding_ref(bid)?.children();
            for child in children {
                let child_nodes: Vec<NodeId> = self
                    .binding_ref(child)?
                    .nodes()
                    .iter()
                    .copied()
                    .filter(|n| self.doc.contains(*n))
                    .collect();
                for n in child_nodes {
                    self.doc.insert_after(element, prev, n)?;
                    prev = Some(n);
                    nodes.push(n);
                }
            }
            self.binding_mut(bid)?.state.current_mut().nodes = nodes;
        } else {
            let plan = self
                .staged_mut(sid)?
                .plan
                .take()
                .ok_or(BindError::Internal("merge plan missing"))?;
            merge::apply(&mut self.doc, &plan)?;
            self.place(bid, element, &plan.roots)?;
            self.binding_mut(bid)?.state.current_mut().nodes = plan.roots;
            if let Some(handlers) = self.staged_mut(sid)?.handlers.take() {
                self.handlers.remove_binding(bid);
                for (key, handler) in handlers {
                    self.handlers.insert(key, bid, handler);
                }
            }
        }

        let b = self.binding_mut(bid)?;
        b.state.mark_injected();
        b.advance(Progress::Injected);
        b.observer = b.source().map(SnapshotObserver::observe);
        debug!(binding = %bid, nodes = b.nodes().len(), "injected");
        Ok(Flow::Next)
    }

    // ── Placement ──────────────────────────────────────────────────────

    /// Nodes owned by `bid`: its roots, plus item roots for arrays.
    fn owned_nodes(&self, bid: BindingId) -> FxHashSet<NodeId> {
        let mut out = FxHashSet::default();
        if let Some(b) = self.bindings.get(&bid) {
            out.extend(b.nodes().iter().copied());
            if b.kind == BindingKind::Array {
                for child in b.children() {
                    if let Some(c) = self.bindings.get(&child) {
                        out.extend(c.nodes().iter().copied());
                    }
                }
            }
        }
        out
    }

    /// First placement of a top-level binding into its host applies the
    /// insertion mode and records the anchor.
    fn prepare_host(&mut self, bid: BindingId) -> Result<(), BindError> {
        let b = self.binding_ref(bid)?;
        let host = b.element().ok_or(BindError::MissingElement(bid))?;
        if b.placed == Some(host) {
            return Ok(());
        }
        let insert = b.options.insert;
        let owned = self.owned_nodes(bid);
        let foreign: Vec<NodeId> = self
            .doc
            .children(host)
            .iter()
            .copied()
            .filter(|n| !owned.contains(n))
            .collect();
        let anchor = match insert {
            InsertMode::Replace => {
                for n in foreign {
                    self.doc.destroy(n)?;
                }
                None
            }
            InsertMode::Prepend => None,
            InsertMode::Append => foreign.last().copied(),
        };
        let b = self.binding_mut(bid)?;
        b.anchor = anchor;
        b.placed = Some(host);
        Ok(())
    }

    /// Node after which `bid`'s first root goes; `None` means first child.
    fn anchor_of(&mut self, bid: BindingId) -> Result<Option<NodeId>, BindError> {
        let b = self.binding_ref(bid)?;
        let host = b.element();
        match (b.parent, b.kind) {
            (Some(array), BindingKind::Element { .. }) => {
                let siblings = self.binding_ref(array)?.children();
                let pos = siblings.iter().position(|c| *c == bid).unwrap_or(siblings.len());
                for sib in siblings[..pos].iter().rev() {
                    let last = self
                        .binding_ref(*sib)?
                        .nodes()
                        .iter()
                        .rev()
                        .copied()
                        .find(|n| self.doc.contains(*n) && self.doc.parent(*n) == host);
                    if last.is_some() {
                        return Ok(last);
                    }
                }
                self.anchor_of(array)
            }
            (None, _) => {
                self.prepare_host(bid)?;
                let anchor = self.binding_ref(bid)?.anchor;
                Ok(anchor.filter(|a| self.doc.contains(*a) && self.doc.parent(*a) == host))
            }
            (Some(_), _) => Ok(None),
        }
    }

    /// Puts `roots` in order under `host` after the binding's anchor.
    ///
    /// Roots still living under another parent (the host changed) are first
    /// extracted into the binding's parking fragment.
    fn place(&mut self, bid: BindingId, host: NodeId, roots: &[NodeId]) -> Result<(), BindError> {
        let moved = roots
            .iter()
            .any(|r| self.doc.parent(*r).is_some_and(|p| p != host));
        if moved {
            let frag = match self.binding_ref(bid)?.fragment.filter(|f| self.doc.contains(*f)) {
                Some(f) => f,
                None => {
                    let f = self.doc.create_fragment();
                    self.binding_mut(bid)?.fragment = Some(f);
                    f
                }
            };
            for r in roots {
                self.doc.append_child(frag, *r)?;
            }
            trace!(binding = %bid, host = %host, "relocating nodes");
        }
        let mut prev = self.anchor_of(bid)?;
        for r in roots {
            let in_place = self.doc.parent(*r) == Some(host)
                && match prev {
                    Some(p) => self.doc.previous_sibling(*r) == Some(p),
                    None => self.doc.index_in_parent(*r) == Some(0),
                };
            if !in_place {
                self.doc.insert_after(host, prev, *r)?;
            }
            prev = Some(*r);
        }
        Ok(())
    }

    // ── Completion ─────────────────────────────────────────────────────

    /// Undoes a session's side effects: cancels its children, discards
    /// detached nodes it built, and disposes bindings it created.
    fn cleanup(&mut self, sid: SessionId) {
        let Some(session) = self.sessions.get_mut(&sid) else {
            return;
        };
        if session.cleaned {
            return;
        }
        session.cleaned = true;
        let children = session.children.clone();
        let plan = session.staged.plan.take();
        let added = std::mem::take(&mut session.staged.added);
        for child in children {
            self.cancel_session(child);
        }
        if let Some(plan) = plan {
            plan.discard(&mut self.doc);
        }
        for id in added {
            self.dispose_binding(id);
        }
    }

    pub(crate) fn fail(&mut self, sid: SessionId, error: BindError) {
        let bid = self.sessions.get(&sid).map(|s| s.binding);
        warn!(session = %sid, binding = ?bid, err = %error, "session failed");
        if let Some(event) = self.event_for(sid, EventKind::Error, Some(error.clone())) {
            let mut st = EventState::new("error");
            if let Some(b) = self.bindings.get(&event.binding) {
                b.listeners.emit(&event, &mut st);
                if !b.suppressed {
                    self.listeners.emit(&event, &mut st);
                }
            }
        }
        if error.is_fatal() && self.fatal.is_none() {
            self.fatal = Some(error.clone());
        }
        self.finalize(sid, Completion::Failed, Some(error));
    }

    /// Settles a session: commits or rolls back its binding, fires its
    /// callbacks, and wakes a parent waiting on it.
    pub(crate) fn finalize(&mut self, sid: SessionId, completion: Completion, error: Option<BindError>) {
        let Some(session) = self.sessions.get(&sid) else {
            return;
        };
        let completion = if completion == Completion::Success && session.cancel {
            Completion::Canceled
        } else {
            completion
        };
        if completion != Completion::Success {
            self.cleanup(sid);
        }
        let Some(mut session) = self.sessions.remove(&sid) else {
            return;
        };
        let bid = session.binding;
        let others_live = self.sessions.values().any(|s| s.binding == bid);
        if let Some(b) = self.bindings.get_mut(&bid) {
            if b.completion != Completion::Disposed {
                if session.started {
                    if completion == Completion::Success {
                        b.state.commit();
                    } else if b.state.rollback().is_err() {
                        // Nodes are attached; keep what was injected.
                        b.state.commit();
                    }
                }
                if session.started || !others_live {
                    b.completion = completion;
                    b.error.clone_from(&error);
                }
            }
        }
        match completion {
            Completion::Success => self.summary.completed += 1,
            Completion::Canceled => self.summary.canceled += 1,
            Completion::Failed => self.summary.failed += 1,
            _ => {}
        }
        debug!(session = %sid, binding = %bid, ?completion, "session finished");

        for (owner, callback) in std::mem::take(&mut session.callbacks) {
            if let Some(b) = self.bindings.get(&owner) {
                callback(b);
            }
        }
        if let Some(parent) = session.parent {
            self.notify_parent(parent);
        }
    }

    fn notify_parent(&mut self, parent: SessionId) {
        let Some(p) = self.sessions.get(&parent) else {
            return;
        };
        if p.children.iter().any(|c| self.sessions.contains_key(c)) {
            return;
        }
        let Some(stream) = self.sessions.get_mut(&parent).and_then(|p| p.stream.as_mut()) else {
            return;
        };
        if stream.status() == StreamStatus::Suspended
            && stream.current_key() == Some(BIND_CHILDREN)
            && stream.seek_pending(BIND_CHILDREN).is_ok()
        {
            self.wakeups.push_back(parent);
        }
    }
}
