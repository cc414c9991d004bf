//! Per-test measurement data: disclosed metadata, the call-stack model,
//! and the frozen measurement record handed to the report sink.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Metadata disclosed by the target harness: the class under test and its
/// discoverable test methods, in discovery order.
///
/// Produced once per class load, read-only afterwards.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetDescriptor {
    /// Qualified name of the class under test
    pub class_name: String,
    /// Ordered test method names
    pub test_methods: Vec<String>,
}

impl TargetDescriptor {
    /// Descriptor for a class and its test methods
    #[must_use]
    pub fn new(class_name: impl Into<String>, test_methods: Vec<String>) -> Self {
        Self {
            class_name: class_name.into(),
            test_methods,
        }
    }

    /// Whether the bare method name is one of the disclosed test methods
    #[must_use]
    pub fn is_test_method(&self, method_name: &str) -> bool {
        self.test_methods.iter().any(|m| m == method_name)
    }
}

/// Direction of a trace event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TraceDirection {
    /// Entry into a method
    Entry,
    /// Return from a method
    Exit,
}

impl fmt::Display for TraceDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Entry => write!(f, "Entry"),
            Self::Exit => write!(f, "Exit"),
        }
    }
}

impl TraceDirection {
    /// Parse from the report attribute form
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Entry" => Some(Self::Entry),
            "Exit" => Some(Self::Exit),
            _ => None,
        }
    }
}

/// One entry in the per-test trace: what happened and the stack depth that
/// resulted from it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceEvent {
    /// Entry or exit
    pub direction: TraceDirection,
    /// `{class}.{method}` of the frame
    pub qualified_method: String,
    /// Call-stack size immediately after applying this event
    pub depth_after: usize,
}

/// Call-stack model for the frames below the active test method.
///
/// Size is never negative: popping an empty stack is a no-op at depth 0
/// (mismatched exits degrade best-effort rather than underflowing).
#[derive(Debug, Clone, Default)]
pub struct CallStack {
    frames: Vec<String>,
}

impl CallStack {
    /// Empty stack
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Push a frame; returns the depth after the push
    pub fn push(&mut self, class_name: impl Into<String>) -> usize {
        self.frames.push(class_name.into());
        self.frames.len()
    }

    /// Pop a frame; returns the depth after the pop. Popping an empty
    /// stack stays at 0.
    pub fn pop(&mut self) -> usize {
        if self.frames.pop().is_none() {
            tracing::warn!("method exit without matching entry; stack stays at depth 0");
        }
        self.frames.len()
    }

    /// Current depth
    #[must_use]
    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    /// Whether the stack is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Drop all frames
    pub fn clear(&mut self) {
        self.frames.clear();
    }
}

/// Measurement for one executed test.
///
/// Mutable only while the test is active; frozen and handed to the report
/// sink the instant the test finishes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestMeasurement {
    /// Bare test method name
    pub test_name: String,
    /// Class under test
    pub class_name: String,
    /// Deepest stack depth reached below the test method
    pub max_depth: usize,
    /// Calls per qualified non-framework, non-constructor method
    pub method_call_tally: BTreeMap<String, u64>,
    /// Constructions per non-framework class
    pub class_init_tally: BTreeMap<String, u64>,
    /// Ordered entry/exit log
    pub trace: Vec<TraceEvent>,
    /// Stack depth over time; always the same length as `trace`
    pub depth_series: Vec<usize>,
}

impl TestMeasurement {
    /// Fresh measurement for a starting test
    #[must_use]
    pub fn new(test_name: impl Into<String>, class_name: impl Into<String>) -> Self {
        Self {
            test_name: test_name.into(),
            class_name: class_name.into(),
            ..Default::default()
        }
    }

    /// `{class}.{method}` identity of the test itself
    #[must_use]
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.class_name, self.test_name)
    }

    /// Append one trace event.
    ///
    /// Single append point for both the trace and the depth series, which
    /// keeps them the same length and folds `max_depth` as it goes.
    pub fn push_trace(
        &mut self,
        direction: TraceDirection,
        qualified_method: impl Into<String>,
        depth_after: usize,
    ) {
        self.trace.push(TraceEvent {
            direction,
            qualified_method: qualified_method.into(),
            depth_after,
        });
        self.depth_series.push(depth_after);
        self.max_depth = self.max_depth.max(depth_after);
    }

    /// Count one call of a qualified method
    pub fn tally_method_call(&mut self, qualified_method: impl Into<String>) {
        *self
            .method_call_tally
            .entry(qualified_method.into())
            .or_insert(0) += 1;
    }

    /// Count one construction of a class
    pub fn tally_class_init(&mut self, class_name: impl Into<String>) {
        *self.class_init_tally.entry(class_name.into()).or_insert(0) += 1;
    }

    /// Number of distinct methods called
    #[must_use]
    pub fn distinct_method_count(&self) -> usize {
        self.method_call_tally.len()
    }

    /// Total method calls across all methods
    #[must_use]
    pub fn total_method_calls(&self) -> u64 {
        self.method_call_tally.values().sum()
    }

    /// Number of distinct classes constructed
    #[must_use]
    pub fn distinct_class_count(&self) -> usize {
        self.class_init_tally.len()
    }

    /// Total constructions across all classes
    #[must_use]
    pub fn total_class_inits(&self) -> u64 {
        self.class_init_tally.values().sum()
    }
}

impl fmt::Display for TestMeasurement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Test: {}", self.qualified_name())?;
        writeln!(f, "Maximum stack depth: {}", self.max_depth)?;
        if !self.method_call_tally.is_empty() {
            writeln!(f, "Method calls:")?;
            for (method, count) in &self.method_call_tally {
                writeln!(f, "  {method}: {count}")?;
            }
            writeln!(f, "Total methods called: {}", self.total_method_calls())?;
        }
        if !self.class_init_tally.is_empty() {
            writeln!(f, "Class initialisations:")?;
            for (class, count) in &self.class_init_tally {
                writeln!(f, "  {class}: {count}")?;
            }
            writeln!(f, "Total classes initialised: {}", self.total_class_inits())?;
        }
        Ok(())
    }
}
