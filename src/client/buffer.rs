//! Replayable event buffer
//!
//! One buffer per (subject, task). Late subscribers see the retained history
//! and then live events. A `Reset` supersedes everything before it, so the
//! history is compacted to start at the latest `Reset`: it holds at most one
//! attempt's output plus the markers around it. Stream leases enforce that at
//! most one reader feeds a buffer at a time and that nothing resumes once the
//! end was reached.

use crate::error::LogStreamError;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::Notify;

/// Identifies a buffer: the subject (instance or prebuild) and its task
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BufferKey {
    pub subject_id: String,
    pub task_id: String,
}

impl BufferKey {
    pub fn new(subject_id: &str, task_id: &str) -> Self {
        Self {
            subject_id: subject_id.to_string(),
            task_id: task_id.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub enum LogEvent {
    Logs(String),
    Error(Arc<LogStreamError>),
    /// Discard everything received so far; it will be delivered again
    Reset,
    End,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Logs,
    Error,
    Reset,
    End,
}

impl LogEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            LogEvent::Logs(_) => EventKind::Logs,
            LogEvent::Error(_) => EventKind::Error,
            LogEvent::Reset => EventKind::Reset,
            LogEvent::End => EventKind::End,
        }
    }
}

type Handler = Box<dyn FnMut(&LogEvent) + Send>;

struct BufferState {
    /// Retained history, starting at the latest `Reset`
    events: Vec<LogEvent>,
    /// Number of events compacted away before `events[0]`
    base: usize,
    reached_end: bool,
    active_stream: Option<u64>,
    next_stream_id: u64,
    handlers: Vec<(EventKind, Handler)>,
    released: bool,
}

pub struct ReplayBuffer {
    key: BufferKey,
    state: Mutex<BufferState>,
    notify: Notify,
}

impl ReplayBuffer {
    pub fn new(key: BufferKey) -> Self {
        Self {
            key,
            state: Mutex::new(BufferState {
                events: Vec::new(),
                base: 0,
                reached_end: false,
                active_stream: None,
                next_stream_id: 1,
                handlers: Vec::new(),
                released: false,
            }),
            notify: Notify::new(),
        }
    }

    pub fn key(&self) -> &BufferKey {
        &self.key
    }

    pub fn emit(&self, event: LogEvent) {
        let mut state = self.state.lock();
        Self::push(&mut state, event);
        drop(state);
        self.notify.notify_waiters();
    }

    fn push(state: &mut BufferState, event: LogEvent) {
        let kind = event.kind();
        for (handler_kind, handler) in state.handlers.iter_mut() {
            if *handler_kind == kind {
                handler(&event);
            }
        }
        if kind == EventKind::Reset {
            state.base += state.events.len();
            state.events.clear();
        }
        state.events.push(event);
    }

    /// Register a handler, replaying matching retained history first.
    ///
    /// Handlers run while the buffer is locked and must not call back into it.
    pub fn on<F>(&self, kind: EventKind, mut handler: F)
    where
        F: FnMut(&LogEvent) + Send + 'static,
    {
        let mut state = self.state.lock();
        for event in state.events.iter().filter(|e| e.kind() == kind) {
            handler(event);
        }
        state.handlers.push((kind, Box::new(handler)));
    }

    pub fn mark_reached_end(&self) {
        self.state.lock().reached_end = true;
    }

    pub fn has_reached_end(&self) -> bool {
        self.state.lock().reached_end
    }

    pub fn snapshot(&self) -> Vec<LogEvent> {
        self.state.lock().events.clone()
    }

    pub fn last_event(&self) -> Option<LogEvent> {
        self.state.lock().events.last().cloned()
    }

    /// Log text as a subscriber would show it: everything after the last reset
    pub fn current_text(&self) -> String {
        let state = self.state.lock();
        let start = state
            .events
            .iter()
            .rposition(|e| matches!(e, LogEvent::Reset))
            .map_or(0, |i| i + 1);
        state.events[start..]
            .iter()
            .filter_map(|e| match e {
                LogEvent::Logs(text) => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }

    /// Async view over the retained history followed by live events
    pub fn subscribe(self: &Arc<Self>) -> Subscription {
        Subscription {
            buffer: self.clone(),
            cursor: 0,
            done: false,
        }
    }

    pub fn has_active_stream(&self) -> bool {
        self.state.lock().active_stream.is_some()
    }

    /// Take the stream lease. `None` if the end was reached or another stream is active.
    pub fn begin_stream(&self) -> Option<u64> {
        let mut state = self.state.lock();
        if state.reached_end || state.active_stream.is_some() {
            return None;
        }
        let id = state.next_stream_id;
        state.next_stream_id += 1;
        state.active_stream = Some(id);
        Some(id)
    }

    /// Emit on behalf of a stream; dropped unless that stream holds the lease
    pub fn emit_for(&self, stream_id: u64, event: LogEvent) -> bool {
        let mut state = self.state.lock();
        if state.active_stream != Some(stream_id) {
            return false;
        }
        Self::push(&mut state, event);
        drop(state);
        self.notify.notify_waiters();
        true
    }

    /// Mark the end, emit `End` and give up the lease, in one step
    pub fn end_stream(&self, stream_id: u64) -> bool {
        let mut state = self.state.lock();
        if state.active_stream != Some(stream_id) {
            return false;
        }
        state.reached_end = true;
        Self::push(&mut state, LogEvent::End);
        state.active_stream = None;
        drop(state);
        self.notify.notify_waiters();
        true
    }

    /// Give up the lease, emitting `last` first if the stream still held it
    pub fn close_stream(&self, stream_id: u64, last: Option<LogEvent>) -> bool {
        let mut state = self.state.lock();
        if state.active_stream != Some(stream_id) {
            return false;
        }
        if let Some(event) = last {
            Self::push(&mut state, event);
        }
        state.active_stream = None;
        drop(state);
        self.notify.notify_waiters();
        true
    }

    /// Wake subscribers for good; called when the registry tears the buffer down
    pub(crate) fn release(&self) {
        self.state.lock().released = true;
        self.notify.notify_waiters();
    }
}

/// Yields events until `End` or until the buffer is released
pub struct Subscription {
    buffer: Arc<ReplayBuffer>,
    /// Absolute position, compacted events included
    cursor: usize,
    done: bool,
}

impl Subscription {
    pub async fn next(&mut self) -> Option<LogEvent> {
        loop {
            if self.done {
                return None;
            }
            let notified = self.buffer.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            {
                let state = self.buffer.state.lock();
                // events compacted away were superseded by the `Reset` now at the front
                self.cursor = self.cursor.max(state.base);
                if let Some(event) = state.events.get(self.cursor - state.base).cloned() {
                    self.cursor += 1;
                    if matches!(event, LogEvent::End) {
                        self.done = true;
                    }
                    return Some(event);
                }
                if state.released {
                    self.done = true;
                    return None;
                }
            }
            notified.await;
        }
    }
}
