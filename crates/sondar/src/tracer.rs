//! Per-test tracer state machine.
//!
//! One [`Tracer`] value is threaded through the dispatch loop; it holds at
//! most one active test at a time and yields a frozen [`TestMeasurement`]
//! the instant a test finishes. The tracer performs no protocol or report
//! side effects itself; the caller acts on the returned [`TraceOutcome`].

use crate::config::FRAMEWORK_PREFIX;
use crate::measure::{CallStack, TargetDescriptor, TestMeasurement, TraceDirection};

/// Constructor method name in the target runtime
pub const CONSTRUCTOR: &str = "<init>";

/// Static initializer method name in the target runtime
pub const STATIC_INITIALIZER: &str = "<clinit>";

/// Framework-internal methods whose *entry* signals that the active test
/// terminated abnormally (an uncaught failure never produces a normal
/// return from the test method).
const FAILURE_SIGNAL_PREFIXES: [&str; 2] = ["fireTest", "fail"];

/// What the tracer did with one event
#[derive(Debug, PartialEq)]
pub enum TraceOutcome {
    /// Event irrelevant in the current state
    Ignored,
    /// Event recorded into the active measurement
    Recorded,
    /// A test transitioned Idle -> Active; the caller should make sure
    /// exit watches are enabled
    Started,
    /// The active test finished; the frozen measurement is ready to flush
    Finished(TestMeasurement),
}

#[derive(Debug)]
struct ActiveTest {
    test_name: String,
    measurement: TestMeasurement,
    stack: CallStack,
}

/// Tracer for the currently running test, if any.
///
/// The call stack models the frames *below* the test method: the entry
/// event that activates a test and the exit that closes it are recorded as
/// trace events at depth 0 but never pushed.
#[derive(Debug)]
pub struct Tracer {
    descriptor: TargetDescriptor,
    framework_prefix: String,
    active: Option<ActiveTest>,
}

impl Default for Tracer {
    fn default() -> Self {
        Self::new()
    }
}

impl Tracer {
    /// Idle tracer with no disclosed metadata yet
    #[must_use]
    pub fn new() -> Self {
        Self {
            descriptor: TargetDescriptor::default(),
            framework_prefix: FRAMEWORK_PREFIX.to_string(),
            active: None,
        }
    }

    /// Override the framework namespace prefix
    #[must_use]
    pub fn with_framework_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.framework_prefix = prefix.into();
        self
    }

    /// Install the metadata disclosed at the harness control point
    pub fn set_descriptor(&mut self, descriptor: TargetDescriptor) {
        self.descriptor = descriptor;
    }

    /// Currently installed descriptor
    #[must_use]
    pub fn descriptor(&self) -> &TargetDescriptor {
        &self.descriptor
    }

    /// Whether a test is being traced
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    /// Name of the active test, if any
    #[must_use]
    pub fn active_test(&self) -> Option<&str> {
        self.active.as_ref().map(|a| a.test_name.as_str())
    }

    fn is_framework(&self, class_name: &str) -> bool {
        class_name.starts_with(&self.framework_prefix)
    }

    fn is_failure_signal(&self, class_name: &str, method_name: &str) -> bool {
        self.is_framework(class_name)
            && FAILURE_SIGNAL_PREFIXES
                .iter()
                .any(|p| method_name.starts_with(p))
    }

    /// Process a method-entry event.
    pub fn on_method_entry(&mut self, class_name: &str, method_name: &str) -> TraceOutcome {
        if self.active.is_none() {
            if self.descriptor.is_test_method(method_name) {
                return self.start_test(method_name);
            }
            return TraceOutcome::Ignored;
        }

        if self.is_failure_signal(class_name, method_name) {
            // Abnormal exit: the test threw and will never return normally.
            return TraceOutcome::Finished(self.finish());
        }
        if self.is_framework(class_name) {
            return TraceOutcome::Ignored;
        }

        let Some(active) = self.active.as_mut() else {
            return TraceOutcome::Ignored;
        };
        let qualified = format!("{class_name}.{method_name}");
        let depth = active.stack.push(class_name);
        active
            .measurement
            .push_trace(TraceDirection::Entry, qualified.clone(), depth);

        if method_name == CONSTRUCTOR {
            active.measurement.tally_class_init(class_name);
        } else if method_name != active.test_name && method_name != STATIC_INITIALIZER {
            active.measurement.tally_method_call(qualified);
        }
        TraceOutcome::Recorded
    }

    /// Process a method-exit event.
    pub fn on_method_exit(&mut self, class_name: &str, method_name: &str) -> TraceOutcome {
        if self.active.is_none() {
            return TraceOutcome::Ignored;
        }

        if self
            .active
            .as_ref()
            .is_some_and(|a| a.test_name == method_name)
        {
            // Normal exit: the test method returned.
            return TraceOutcome::Finished(self.finish());
        }
        if self.is_framework(class_name) {
            return TraceOutcome::Ignored;
        }

        let Some(active) = self.active.as_mut() else {
            return TraceOutcome::Ignored;
        };
        let depth = active.stack.pop();
        active.measurement.push_trace(
            TraceDirection::Exit,
            format!("{class_name}.{method_name}"),
            depth,
        );
        TraceOutcome::Recorded
    }

    /// Freeze a test that is still active, if any. Used when the target
    /// dies mid-test and no exit event will ever arrive.
    pub fn flush_active(&mut self) -> Option<TestMeasurement> {
        if self.active.is_some() {
            Some(self.finish())
        } else {
            None
        }
    }

    fn start_test(&mut self, method_name: &str) -> TraceOutcome {
        let class_name = self.descriptor.class_name.clone();
        tracing::info!(test = %method_name, class = %class_name, "tracing test");
        let mut measurement = TestMeasurement::new(method_name, &class_name);
        measurement.push_trace(
            TraceDirection::Entry,
            format!("{class_name}.{method_name}"),
            0,
        );
        self.active = Some(ActiveTest {
            test_name: method_name.to_string(),
            measurement,
            stack: CallStack::new(),
        });
        TraceOutcome::Started
    }

    /// Freeze and hand back the active measurement. The two finish
    /// triggers race first-arrival-wins: once the `Option` is taken the
    /// tracer is Idle and the late second signal is a no-op.
    fn finish(&mut self) -> TestMeasurement {
        let mut active = self.active.take().expect("finish requires an active test");
        if !active.stack.is_empty() {
            tracing::debug!(
                frames = active.stack.depth(),
                "clearing unexited frames at test end"
            );
            active.stack.clear();
        }
        let qualified = active.measurement.qualified_name();
        active
            .measurement
            .push_trace(TraceDirection::Exit, qualified, 0);
        tracing::info!(test = %active.measurement.qualified_name(), "test finished");
        active.measurement
    }
}
