//! Capture controller: the blocking event loop that drives a launched
//! target from first class load to termination.
//!
//! The loop owns the session, the tracer, and the report writer. Each
//! batch is processed in arrival order and answered with exactly one
//! resume; a terminal event ends the loop without resuming.

use crate::measure::TestMeasurement;
use crate::protocol::{DebugConnection, DebugEvent, WatchKind};
use crate::report::{ReportWriter, DEFAULT_REPORT_TITLE};
use crate::result::{SondarError, SondarResult};
use crate::session::SessionDriver;
use crate::tracer::{TraceOutcome, Tracer};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Outcome of a completed capture run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    /// Unique id for this run
    pub session_id: Uuid,
    /// Measurements written to the report
    pub tests_flushed: usize,
    /// Events that failed non-fatally and were skipped
    pub event_errors: usize,
    /// Exit status of the target, when it was reaped
    pub target_exit_code: Option<i32>,
}

enum LoopFlow {
    Continue,
    Terminated,
}

/// Single-threaded controller for one capture run.
#[derive(Debug)]
pub struct EventLoop<C: DebugConnection> {
    session: SessionDriver<C>,
    tracer: Tracer,
    writer: ReportWriter,
    report_title: String,
    session_id: Uuid,
    tests_flushed: usize,
    event_errors: usize,
}

impl<C: DebugConnection> EventLoop<C> {
    /// Controller over an already launched session.
    #[must_use]
    pub fn new(session: SessionDriver<C>, writer: ReportWriter) -> Self {
        Self {
            session,
            tracer: Tracer::new(),
            writer,
            report_title: DEFAULT_REPORT_TITLE.to_string(),
            session_id: Uuid::new_v4(),
            tests_flushed: 0,
            event_errors: 0,
        }
    }

    /// Override the report's root element name (typically the project name)
    #[must_use]
    pub fn with_report_title(mut self, title: impl Into<String>) -> Self {
        self.report_title = title.into();
        self
    }

    /// Run id assigned at construction
    #[must_use]
    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    /// Drive the target to completion.
    ///
    /// Blocks until the target terminates or the connection drops. Fatal
    /// errors (launch and metadata failures) abort the run; anything else
    /// is logged and counted, and the loop keeps going.
    ///
    /// # Errors
    ///
    /// The first fatal error encountered, with the report closed and the
    /// target reaped before returning.
    pub fn run(&mut self) -> SondarResult<RunSummary> {
        tracing::info!(session = %self.session_id, "starting capture run");
        self.session.initialize()?;
        self.open_report();

        let result = self.pump();
        match self.session.drain_target_output() {
            Ok(output) if !output.is_empty() => {
                tracing::info!(target_output = %output, "final target output");
            }
            Ok(_) => {}
            Err(error) => tracing::debug!(%error, "no target output at shutdown"),
        }
        let flushed_late = self.flush_remaining();
        let status = match self.session.shutdown() {
            Ok(status) => status,
            Err(error) => {
                tracing::warn!(%error, "failed to reap target");
                None
            }
        };

        match result {
            Ok(()) => {
                let summary = RunSummary {
                    session_id: self.session_id,
                    tests_flushed: self.tests_flushed,
                    event_errors: self.event_errors,
                    target_exit_code: status.and_then(|s| s.code()),
                };
                tracing::info!(
                    session = %self.session_id,
                    tests = summary.tests_flushed,
                    errors = summary.event_errors,
                    "capture run complete"
                );
                Ok(summary)
            }
            Err(error) => {
                if flushed_late {
                    tracing::warn!(session = %self.session_id, "run aborted after partial flush");
                }
                Err(error)
            }
        }
    }

    fn pump(&mut self) -> SondarResult<()> {
        loop {
            let batch = match self.session.next_batch() {
                Ok(batch) => batch,
                Err(SondarError::Disconnected) => {
                    tracing::debug!("connection dropped; ending run");
                    return Ok(());
                }
                Err(error) => return Err(error),
            };

            let mut terminated = false;
            for event in batch.events {
                match self.handle_event(event) {
                    Ok(LoopFlow::Continue) => {}
                    Ok(LoopFlow::Terminated) => terminated = true,
                    Err(error) if error.is_fatal() => return Err(error),
                    Err(error) => {
                        tracing::warn!(%error, "skipping event");
                        self.event_errors += 1;
                    }
                }
            }

            if terminated {
                return Ok(());
            }
            match self.session.resume() {
                Ok(()) => {}
                Err(SondarError::Disconnected) => {
                    tracing::debug!("target gone at resume; ending run");
                    return Ok(());
                }
                Err(error) => return Err(error),
            }
        }
    }

    fn handle_event(&mut self, event: DebugEvent) -> SondarResult<LoopFlow> {
        match event {
            DebugEvent::ClassReady { class_name } => {
                if class_name == self.session.hooks().class_name {
                    self.session.arm_harness_breakpoints()?;
                }
            }
            DebugEvent::BreakpointHit { line } => self.on_breakpoint(line)?,
            DebugEvent::MethodEntry {
                class_name,
                method_name,
            } => {
                let outcome = self.tracer.on_method_entry(&class_name, &method_name);
                self.apply_outcome(outcome);
            }
            DebugEvent::MethodExit {
                class_name,
                method_name,
            } => {
                let outcome = self.tracer.on_method_exit(&class_name, &method_name);
                self.apply_outcome(outcome);
            }
            DebugEvent::ProcessTerminated => {
                tracing::info!("target terminated");
                return Ok(LoopFlow::Terminated);
            }
        }
        Ok(LoopFlow::Continue)
    }

    fn on_breakpoint(&mut self, line: u32) -> SondarResult<()> {
        if line == self.session.hooks().metadata_ready_line {
            let descriptor = self.session.read_disclosed_metadata()?;
            tracing::info!(
                class = %descriptor.class_name,
                tests = descriptor.test_methods.len(),
                "metadata disclosed"
            );
            self.tracer.set_descriptor(descriptor);
            self.session.set_watches_enabled(WatchKind::Entry, true)?;
            self.session.set_watches_enabled(WatchKind::Exit, true)?;
        } else if line == self.session.hooks().watches_done_line {
            self.session.set_watches_enabled(WatchKind::Entry, false)?;
            self.session.set_watches_enabled(WatchKind::Exit, false)?;
            match self.session.drain_target_output() {
                Ok(output) if !output.is_empty() => {
                    tracing::info!(target_output = %output, "target output");
                }
                Ok(_) => {}
                Err(error) => tracing::warn!(%error, "failed to drain target output"),
            }
        } else {
            tracing::debug!(line, "breakpoint at unexpected line");
        }
        Ok(())
    }

    fn apply_outcome(&mut self, outcome: TraceOutcome) {
        match outcome {
            TraceOutcome::Finished(measurement) => self.flush(&measurement),
            TraceOutcome::Started => {
                // Usually already on; idempotent, so this only covers a
                // test starting before the metadata breakpoint path ran.
                if let Err(error) = self.session.set_watches_enabled(WatchKind::Exit, true) {
                    tracing::warn!(%error, "failed to enable exit watches");
                    self.event_errors += 1;
                }
            }
            TraceOutcome::Recorded | TraceOutcome::Ignored => {}
        }
    }

    /// Report failures never abort a run; the measurement is logged lost.
    fn flush(&mut self, measurement: &TestMeasurement) {
        match self.writer.append(measurement) {
            Ok(()) => {
                self.tests_flushed += 1;
                tracing::info!(test = %measurement.qualified_name(), "measurement flushed");
            }
            Err(error) => {
                tracing::warn!(
                    test = %measurement.qualified_name(),
                    %error,
                    "failed to write measurement"
                );
                self.event_errors += 1;
            }
        }
    }

    /// Opens the root bracket once at session start; the metadata
    /// breakpoint may fire once per discovered test class, so nothing
    /// class-scoped belongs in the report header.
    fn open_report(&mut self) {
        if let Err(error) = self.writer.open(&self.report_title) {
            tracing::warn!(%error, "failed to open report");
            self.event_errors += 1;
        }
    }

    /// Flushes a test the target abandoned mid-run, then closes the
    /// report bracket. Returns whether a partial measurement was flushed.
    fn flush_remaining(&mut self) -> bool {
        let mut flushed = false;
        if let Some(measurement) = self.tracer.flush_active() {
            tracing::warn!(
                test = %measurement.qualified_name(),
                "target ended mid-test; flushing partial measurement"
            );
            self.flush(&measurement);
            flushed = true;
        }
        if let Err(error) = self.writer.close() {
            tracing::warn!(%error, "failed to close report");
        }
        flushed
    }
}
