//! Session configuration: target process spec, instrumentation allow-list,
//! and the two-control-point harness protocol.

use crate::result::{SondarError, SondarResult};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};

/// Framework classes that must stay on the allow-list so the failure
/// signalling methods (`fireTest*`, `fail*`) are delivered even though the
/// framework namespace is otherwise excluded from tracing.
pub const FRAMEWORK_SIGNAL_CLASSES: [&str; 2] = [
    "org.junit.jupiter.api.AssertionUtils",
    "org.junit.internal.runners.model.EachTestNotifier",
];

/// Class-name prefix identifying the test framework's own namespace.
pub const FRAMEWORK_PREFIX: &str = "org.junit";

/// Specification of the target process to launch.
///
/// The target is started suspended at load (JDWP agent with `suspend=y`),
/// with a classpath and one positional argument naming the root to scan
/// for test classes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessSpec {
    /// Classpath elements for the code and tests under analysis
    pub classpath: Vec<PathBuf>,
    /// Root directory the harness scans for test classes
    pub scan_root: PathBuf,
    /// Fully qualified name of the entry harness class
    pub harness_class: String,
    /// TCP port for the debug agent to listen on
    pub jdwp_port: u16,
    /// Java executable (None = `java` from PATH)
    pub java_path: Option<PathBuf>,
}

impl Default for ProcessSpec {
    fn default() -> Self {
        Self {
            classpath: Vec::new(),
            scan_root: PathBuf::from("."),
            harness_class: "analyser.TestRunner".to_string(),
            jdwp_port: 5005,
            java_path: None,
        }
    }
}

impl ProcessSpec {
    /// Create a spec for the given scan root
    #[must_use]
    pub fn new(scan_root: impl Into<PathBuf>) -> Self {
        Self {
            scan_root: scan_root.into(),
            ..Default::default()
        }
    }

    /// Add a classpath element
    #[must_use]
    pub fn with_classpath_element(mut self, element: impl Into<PathBuf>) -> Self {
        self.classpath.push(element.into());
        self
    }

    /// Set all classpath elements at once
    #[must_use]
    pub fn with_classpath(mut self, elements: Vec<PathBuf>) -> Self {
        self.classpath = elements;
        self
    }

    /// Set the harness entry class
    #[must_use]
    pub fn with_harness_class(mut self, class: impl Into<String>) -> Self {
        self.harness_class = class.into();
        self
    }

    /// Set the debug agent port
    #[must_use]
    pub const fn with_jdwp_port(mut self, port: u16) -> Self {
        self.jdwp_port = port;
        self
    }

    /// Set an explicit java executable
    #[must_use]
    pub fn with_java_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.java_path = Some(path.into());
        self
    }

    /// The JDWP agent argument. `suspend=y` holds the target at load until
    /// the controller attaches and resumes it.
    #[must_use]
    pub fn agent_arg(&self) -> String {
        format!(
            "-agentlib:jdwp=transport=dt_socket,server=y,suspend=y,address={}",
            self.jdwp_port
        )
    }

    /// Classpath joined with the platform path separator
    #[must_use]
    pub fn classpath_arg(&self) -> String {
        let sep = if cfg!(windows) { ";" } else { ":" };
        self.classpath
            .iter()
            .map(|p| p.display().to_string())
            .collect::<Vec<_>>()
            .join(sep)
    }

    /// Assemble the launch command: `java <agent> -cp <classpath>
    /// <harness_class> <scan_root>`.
    #[must_use]
    pub fn command(&self) -> Command {
        let java = self
            .java_path
            .clone()
            .unwrap_or_else(|| PathBuf::from("java"));
        let mut cmd = Command::new(java);
        cmd.arg(self.agent_arg());
        if !self.classpath.is_empty() {
            cmd.arg("-cp").arg(self.classpath_arg());
        }
        cmd.arg(&self.harness_class)
            .arg(&self.scan_root)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        cmd
    }

    /// Spawn the target process suspended at load.
    ///
    /// # Errors
    ///
    /// Returns [`SondarError::LaunchFailure`] if the process cannot start.
    pub fn spawn(&self) -> SondarResult<Child> {
        self.command()
            .spawn()
            .map_err(|e| SondarError::LaunchFailure {
                message: format!("{}: {e}", self.harness_class),
            })
    }
}

/// Prefix-based class-name allow-list selecting which method entry/exit
/// events the controller subscribes to.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllowList {
    /// Class-name prefixes; a class matches if its qualified name starts
    /// with any of them
    pub prefixes: Vec<String>,
}

impl AllowList {
    /// Empty allow-list
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the allow-list for a project: its `{group}.{name}` package
    /// prefix, the harness class, and the framework signal classes.
    #[must_use]
    pub fn for_project(group: &str, name: &str, harness_class: &str) -> Self {
        let mut prefixes = vec![format!("{group}.{name}"), harness_class.to_string()];
        prefixes.extend(FRAMEWORK_SIGNAL_CLASSES.iter().map(ToString::to_string));
        Self { prefixes }
    }

    /// Add a prefix
    #[must_use]
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefixes.push(prefix.into());
        self
    }

    /// Whether the class name matches any prefix
    #[must_use]
    pub fn matches(&self, class_name: &str) -> bool {
        self.prefixes.iter().any(|p| class_name.starts_with(p))
    }
}

/// The two-control-point metadata protocol at the target-process boundary.
///
/// The harness discloses the class under test and its test methods as
/// locals visible at `metadata_ready_line`; by `watches_done_line` the
/// method-level instrumentation is no longer needed. The control points are
/// keyed to literal source lines in the harness, so any edit to the harness
/// must update these hooks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HarnessHooks {
    /// Fully qualified harness class name
    pub class_name: String,
    /// Line at which the disclosed metadata is locally visible
    pub metadata_ready_line: u32,
    /// Line at which method watches can be disabled
    pub watches_done_line: u32,
    /// Name of the string local holding the class under test
    pub class_local: String,
    /// Name of the string-array local holding the test method names
    pub methods_local: String,
}

impl Default for HarnessHooks {
    fn default() -> Self {
        Self {
            class_name: "analyser.TestRunner".to_string(),
            metadata_ready_line: 71,
            watches_done_line: 72,
            class_local: "testClass".to_string(),
            methods_local: "testMethods".to_string(),
        }
    }
}

impl HarnessHooks {
    /// Hooks for a custom harness class, keeping the default line keys
    #[must_use]
    pub fn for_class(class_name: impl Into<String>) -> Self {
        Self {
            class_name: class_name.into(),
            ..Default::default()
        }
    }

    /// Override the control-point lines
    #[must_use]
    pub const fn with_lines(mut self, metadata_ready: u32, watches_done: u32) -> Self {
        self.metadata_ready_line = metadata_ready;
        self.watches_done_line = watches_done;
        self
    }
}
