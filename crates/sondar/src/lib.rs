//! Sondar: runtime behavior capture for test suites via a debug protocol
//!
//! Sondar (Spanish: "to sound, to probe depths") launches a separate
//! process suspended under a debug agent, observes it through a debug
//! connection, and records per-test call stacks, method tallies, and
//! class-construction counts into an append-only XML report.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                      SONDAR Architecture                      │
//! ├──────────────────────────────────────────────────────────────┤
//! │  ┌───────────┐   ┌───────────┐   ┌──────────┐   ┌─────────┐  │
//! │  │ Session   │   │ Event     │   │ Tracer   │   │ Report  │  │
//! │  │ Driver    │──►│ Dispatch  │──►│ (per-    │──►│ Sink    │  │
//! │  │ (launch)  │   │ Loop      │   │  test)   │   │ (XML)   │  │
//! │  └───────────┘   └───────────┘   └──────────┘   └─────────┘  │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! The loop is single threaded: the target is suspended while a batch is
//! processed and resumed exactly once afterwards, so event handling needs
//! no synchronization.

#![warn(missing_docs)]
// Lints are configured in workspace Cargo.toml [workspace.lints.clippy]
#![cfg_attr(test, allow(clippy::large_stack_arrays, clippy::large_stack_frames))]

/// Launch specification, class allow-list, and harness hook points
pub mod config;
/// Blocking event loop driving a session to completion
pub mod dispatch;
/// Per-test measurement data model
pub mod measure;
/// Debug-connection trait seam, event union, and the scripted mock
pub mod protocol;
/// XML report sink and parser
pub mod report;
/// Crate-wide error type and result alias
pub mod result;
/// Session lifecycle over a debug connection
pub mod session;
/// Idle/Active state machine per test
pub mod tracer;

pub use config::{
    AllowList, HarnessHooks, ProcessSpec, FRAMEWORK_PREFIX, FRAMEWORK_SIGNAL_CLASSES,
};
pub use dispatch::{EventLoop, RunSummary};
pub use measure::{CallStack, TargetDescriptor, TestMeasurement, TraceDirection, TraceEvent};
pub use protocol::{DebugConnection, DebugEvent, EventBatch, MockConnection, WatchHandle, WatchKind};
pub use report::{
    escape_xml, render_record, unescape_xml, ParsedReport, ReportParser, ReportWriter,
    DEFAULT_REPORT_FILE, DEFAULT_REPORT_TITLE,
};
pub use result::{SondarError, SondarResult};
pub use session::SessionDriver;
pub use tracer::{TraceOutcome, Tracer};
