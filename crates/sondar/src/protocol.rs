//! Debug-protocol surface consumed by the controller.
//!
//! The wire transport (JDWP or compatible) sits behind the
//! [`DebugConnection`] trait so implementations can be swapped; this module
//! defines the closed set of event kinds the dispatch loop understands and
//! ships a scripted [`MockConnection`] for unit testing the controller
//! without a live target.

use crate::result::{SondarError, SondarResult};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};

/// Direction of a method instrumentation watch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WatchKind {
    /// Fires on entry into a matching method
    Entry,
    /// Fires on return from a matching method
    Exit,
}

/// Handle to a created instrumentation watch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchHandle(pub u32);

/// One classified debug event.
///
/// Every event the transport delivers maps onto exactly one of these kinds;
/// the dispatch loop matches exhaustively.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DebugEvent {
    /// A class/module finished loading in the target
    ClassReady {
        /// Qualified name of the prepared class
        class_name: String,
    },
    /// A line-keyed breakpoint was hit
    BreakpointHit {
        /// Source line the breakpoint is keyed to
        line: u32,
    },
    /// A watched method was entered
    MethodEntry {
        /// Declaring class of the method
        class_name: String,
        /// Bare method name
        method_name: String,
    },
    /// A watched method returned
    MethodExit {
        /// Declaring class of the method
        class_name: String,
        /// Bare method name
        method_name: String,
    },
    /// The target process died or disconnected
    ProcessTerminated,
}

impl DebugEvent {
    /// Shorthand for a method-entry event
    #[must_use]
    pub fn entry(class: impl Into<String>, method: impl Into<String>) -> Self {
        Self::MethodEntry {
            class_name: class.into(),
            method_name: method.into(),
        }
    }

    /// Shorthand for a method-exit event
    #[must_use]
    pub fn exit(class: impl Into<String>, method: impl Into<String>) -> Self {
        Self::MethodExit {
            class_name: class.into(),
            method_name: method.into(),
        }
    }
}

/// A batch of events sharing one suspend point.
///
/// The whole target process stays suspended while a batch is processed;
/// the loop releases it with a single `resume()` afterwards.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventBatch {
    /// Events in delivery order
    pub events: Vec<DebugEvent>,
}

impl EventBatch {
    /// Batch from a list of events
    #[must_use]
    pub fn new(events: Vec<DebugEvent>) -> Self {
        Self { events }
    }

    /// Batch with one event
    #[must_use]
    pub fn single(event: DebugEvent) -> Self {
        Self {
            events: vec![event],
        }
    }
}

/// Blocking debug-protocol connection to one suspended-capable target.
///
/// All methods are called from the single-threaded dispatch loop while the
/// target is suspended, so implementations need no internal locking.
pub trait DebugConnection {
    /// Arm a breakpoint keyed to a source line of the given class.
    ///
    /// # Errors
    ///
    /// [`SondarError::MetadataUnavailable`] if debug symbols for the line
    /// are missing.
    fn arm_line_breakpoint(&mut self, class_name: &str, line: u32) -> SondarResult<()>;

    /// Read a named string local from the top frame of the suspended thread.
    fn read_string_local(&mut self, name: &str) -> SondarResult<String>;

    /// Read a named string-array local from the top frame.
    fn read_string_array_local(&mut self, name: &str) -> SondarResult<Vec<String>>;

    /// Create (without enabling) a method watch scoped to a class-name
    /// prefix filter.
    fn create_method_watch(
        &mut self,
        class_filter: &str,
        kind: WatchKind,
    ) -> SondarResult<WatchHandle>;

    /// Enable or disable a previously created watch.
    fn set_watch_enabled(&mut self, handle: WatchHandle, enabled: bool) -> SondarResult<()>;

    /// Block until the next event batch arrives.
    ///
    /// # Errors
    ///
    /// [`SondarError::Disconnected`] once the target is gone.
    fn next_batch(&mut self) -> SondarResult<EventBatch>;

    /// Resume the suspended target. Must be called exactly once per
    /// processed batch; skipping it deadlocks the target.
    fn resume(&mut self) -> SondarResult<()>;

    /// Drain whatever the target wrote to stdout/stderr since the last call.
    fn drain_output(&mut self) -> SondarResult<String>;
}

/// Scripted connection for unit testing the controller.
///
/// Batches are served in order; locals and output are preconfigured; every
/// call is recorded in a history the tests can assert on.
#[derive(Debug, Default)]
pub struct MockConnection {
    batches: VecDeque<EventBatch>,
    string_locals: HashMap<String, String>,
    array_locals: HashMap<String, Vec<String>>,
    string_local_queues: HashMap<String, VecDeque<String>>,
    array_local_queues: HashMap<String, VecDeque<Vec<String>>>,
    output: VecDeque<String>,
    watches: Vec<MockWatch>,
    /// Breakpoints armed so far, as (class, line)
    pub breakpoints: Vec<(String, u32)>,
    /// Number of `resume()` calls observed
    pub resume_count: usize,
    /// Call history for verification
    pub call_history: Vec<String>,
    /// When set, arming any breakpoint fails with `MetadataUnavailable`
    pub missing_line_info: bool,
}

#[derive(Debug)]
struct MockWatch {
    filter: String,
    kind: WatchKind,
    enabled: bool,
}

impl MockConnection {
    /// Empty connection; `next_batch` reports [`SondarError::Disconnected`]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue an event batch
    pub fn push_batch(&mut self, batch: EventBatch) {
        self.batches.push_back(batch);
    }

    /// Set a string local visible at breakpoints
    pub fn set_string_local(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.string_locals.insert(name.into(), value.into());
    }

    /// Set a string-array local visible at breakpoints
    pub fn set_array_local(&mut self, name: impl Into<String>, values: Vec<String>) {
        self.array_locals.insert(name.into(), values);
    }

    /// Queue a string local value consumed by one read; queued values are
    /// served before the value set with `set_string_local`. Scripts a
    /// local whose value differs per breakpoint hit.
    pub fn queue_string_local(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.string_local_queues
            .entry(name.into())
            .or_default()
            .push_back(value.into());
    }

    /// Queue a string-array local value consumed by one read
    pub fn queue_array_local(&mut self, name: impl Into<String>, values: Vec<String>) {
        self.array_local_queues
            .entry(name.into())
            .or_default()
            .push_back(values);
    }

    /// Queue target output for `drain_output`
    pub fn push_output(&mut self, text: impl Into<String>) {
        self.output.push_back(text.into());
    }

    /// Whether the watch behind `handle` is currently enabled
    #[must_use]
    pub fn watch_enabled(&self, handle: WatchHandle) -> bool {
        self.watches
            .get(handle.0 as usize)
            .is_some_and(|w| w.enabled)
    }

    /// Enabled state of every watch of the given kind
    #[must_use]
    pub fn watches_of_kind(&self, kind: WatchKind) -> Vec<bool> {
        self.watches
            .iter()
            .filter(|w| w.kind == kind)
            .map(|w| w.enabled)
            .collect()
    }

    /// Watch filters created so far
    #[must_use]
    pub fn watch_filters(&self) -> Vec<&str> {
        self.watches.iter().map(|w| w.filter.as_str()).collect()
    }

    /// Whether a method with the given prefix was called
    #[must_use]
    pub fn was_called(&self, method: &str) -> bool {
        self.call_history.iter().any(|c| c.starts_with(method))
    }
}

impl DebugConnection for MockConnection {
    fn arm_line_breakpoint(&mut self, class_name: &str, line: u32) -> SondarResult<()> {
        self.call_history.push(format!("breakpoint:{class_name}:{line}"));
        if self.missing_line_info {
            return Err(SondarError::MetadataUnavailable {
                message: format!("no line table for {class_name}:{line}"),
            });
        }
        self.breakpoints.push((class_name.to_string(), line));
        Ok(())
    }

    fn read_string_local(&mut self, name: &str) -> SondarResult<String> {
        self.call_history.push(format!("read_string:{name}"));
        if let Some(value) = self
            .string_local_queues
            .get_mut(name)
            .and_then(VecDeque::pop_front)
        {
            return Ok(value);
        }
        self.string_locals
            .get(name)
            .cloned()
            .ok_or_else(|| SondarError::MetadataUnavailable {
                message: format!("no visible local '{name}'"),
            })
    }

    fn read_string_array_local(&mut self, name: &str) -> SondarResult<Vec<String>> {
        self.call_history.push(format!("read_array:{name}"));
        if let Some(values) = self
            .array_local_queues
            .get_mut(name)
            .and_then(VecDeque::pop_front)
        {
            return Ok(values);
        }
        self.array_locals
            .get(name)
            .cloned()
            .ok_or_else(|| SondarError::MetadataUnavailable {
                message: format!("no visible local '{name}'"),
            })
    }

    fn create_method_watch(
        &mut self,
        class_filter: &str,
        kind: WatchKind,
    ) -> SondarResult<WatchHandle> {
        self.call_history
            .push(format!("create_watch:{class_filter}:{kind:?}"));
        let handle = WatchHandle(self.watches.len() as u32);
        self.watches.push(MockWatch {
            filter: class_filter.to_string(),
            kind,
            enabled: false,
        });
        Ok(handle)
    }

    fn set_watch_enabled(&mut self, handle: WatchHandle, enabled: bool) -> SondarResult<()> {
        self.call_history
            .push(format!("set_watch:{}:{enabled}", handle.0));
        match self.watches.get_mut(handle.0 as usize) {
            Some(watch) => {
                watch.enabled = enabled;
                Ok(())
            }
            None => Err(SondarError::Protocol {
                message: format!("unknown watch handle {}", handle.0),
            }),
        }
    }

    fn next_batch(&mut self) -> SondarResult<EventBatch> {
        self.call_history.push("next_batch".to_string());
        self.batches.pop_front().ok_or(SondarError::Disconnected)
    }

    fn resume(&mut self) -> SondarResult<()> {
        self.call_history.push("resume".to_string());
        self.resume_count += 1;
        Ok(())
    }

    fn drain_output(&mut self) -> SondarResult<String> {
        self.call_history.push("drain_output".to_string());
        Ok(self.output.pop_front().unwrap_or_default())
    }
}
