//! Debug session driver: owns the target process and the debug-protocol
//! connection, and exposes the handful of session-lifecycle operations the
//! dispatch loop needs.

use crate::config::{AllowList, HarnessHooks, ProcessSpec};
use crate::measure::TargetDescriptor;
use crate::protocol::{DebugConnection, EventBatch, WatchHandle, WatchKind};
use crate::result::SondarResult;
use std::process::Child;

/// Driver for one capture session.
///
/// All instrumentation performed here happens while the target is suspended
/// at a batch boundary, so no locking is needed.
#[derive(Debug)]
pub struct SessionDriver<C: DebugConnection> {
    connection: C,
    hooks: HarnessHooks,
    allow_list: AllowList,
    target: Option<Child>,
    entry_watches: Vec<WatchHandle>,
    exit_watches: Vec<WatchHandle>,
    entry_enabled: bool,
    exit_enabled: bool,
    breakpoints_armed: bool,
}

impl<C: DebugConnection> SessionDriver<C> {
    /// Driver over an already attached connection (no spawned child).
    #[must_use]
    pub fn new(connection: C, hooks: HarnessHooks, allow_list: AllowList) -> Self {
        Self {
            connection,
            hooks,
            allow_list,
            target: None,
            entry_watches: Vec::new(),
            exit_watches: Vec::new(),
            entry_enabled: false,
            exit_enabled: false,
            breakpoints_armed: false,
        }
    }

    /// Spawn the target suspended at load and take ownership of it.
    ///
    /// # Errors
    ///
    /// [`crate::SondarError::LaunchFailure`] if the process cannot start.
    pub fn launch(
        spec: &ProcessSpec,
        connection: C,
        hooks: HarnessHooks,
        allow_list: AllowList,
    ) -> SondarResult<Self> {
        let child = spec.spawn()?;
        tracing::info!(pid = child.id(), harness = %spec.harness_class, "target launched");
        let mut driver = Self::new(connection, hooks, allow_list);
        driver.target = Some(child);
        Ok(driver)
    }

    /// Create (without enabling) one entry and one exit watch per
    /// allow-list prefix. Called once before the loop starts.
    pub fn initialize(&mut self) -> SondarResult<()> {
        let prefixes = self.allow_list.prefixes.clone();
        for prefix in &prefixes {
            self.entry_watches
                .push(self.connection.create_method_watch(prefix, WatchKind::Entry)?);
            self.exit_watches
                .push(self.connection.create_method_watch(prefix, WatchKind::Exit)?);
        }
        Ok(())
    }

    /// Arm the two line-keyed breakpoints inside the entry harness: one
    /// where the disclosed metadata is locally visible, one where
    /// method-level instrumentation is no longer needed.
    ///
    /// # Errors
    ///
    /// [`crate::SondarError::MetadataUnavailable`] if debug symbols for the
    /// control-point lines are missing; fatal for the session.
    pub fn arm_harness_breakpoints(&mut self) -> SondarResult<()> {
        if self.breakpoints_armed {
            return Ok(());
        }
        let class = self.hooks.class_name.clone();
        self.connection
            .arm_line_breakpoint(&class, self.hooks.metadata_ready_line)?;
        self.connection
            .arm_line_breakpoint(&class, self.hooks.watches_done_line)?;
        self.breakpoints_armed = true;
        tracing::debug!(class = %class, "harness breakpoints armed");
        Ok(())
    }

    /// Read the disclosed test metadata out of the suspended frame. This
    /// is the sole channel by which target state crosses into the
    /// controller.
    pub fn read_disclosed_metadata(&mut self) -> SondarResult<TargetDescriptor> {
        let class_name = self.connection.read_string_local(&self.hooks.class_local)?;
        let test_methods = self
            .connection
            .read_string_array_local(&self.hooks.methods_local)?;
        tracing::info!(class = %class_name, tests = test_methods.len(), "metadata disclosed");
        Ok(TargetDescriptor::new(class_name, test_methods))
    }

    /// Enable or disable all watches of one kind. Idempotent: repeated
    /// calls with the same target state issue no protocol traffic.
    pub fn set_watches_enabled(&mut self, kind: WatchKind, enabled: bool) -> SondarResult<()> {
        let (handles, flag) = match kind {
            WatchKind::Entry => (&self.entry_watches, &mut self.entry_enabled),
            WatchKind::Exit => (&self.exit_watches, &mut self.exit_enabled),
        };
        if *flag == enabled {
            return Ok(());
        }
        for handle in handles {
            self.connection.set_watch_enabled(*handle, enabled)?;
        }
        *flag = enabled;
        Ok(())
    }

    /// Block until the next event batch.
    pub fn next_batch(&mut self) -> SondarResult<EventBatch> {
        self.connection.next_batch()
    }

    /// Release the suspended target. Exactly once per processed batch.
    pub fn resume(&mut self) -> SondarResult<()> {
        self.connection.resume()
    }

    /// Drain and return target stdout/stderr collected so far.
    pub fn drain_target_output(&mut self) -> SondarResult<String> {
        self.connection.drain_output()
    }

    /// Reap the spawned target after termination, returning its exit
    /// status when one was owned.
    pub fn shutdown(&mut self) -> SondarResult<Option<std::process::ExitStatus>> {
        match self.target.take() {
            Some(mut child) => {
                let status = child.wait()?;
                tracing::info!(%status, "target reaped");
                Ok(Some(status))
            }
            None => Ok(None),
        }
    }

    /// Harness hooks in effect
    #[must_use]
    pub fn hooks(&self) -> &HarnessHooks {
        &self.hooks
    }

    /// The underlying connection (tests inspect the mock through this)
    #[must_use]
    pub fn connection(&self) -> &C {
        &self.connection
    }

    /// Mutable access to the underlying connection
    pub fn connection_mut(&mut self) -> &mut C {
        &mut self.connection
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::MockConnection;
    use crate::result::SondarError;

    fn driver_with(conn: MockConnection) -> SessionDriver<MockConnection> {
        let allow = AllowList::new()
            .with_prefix("com.example.calc")
            .with_prefix("analyser.TestRunner");
        SessionDriver::new(conn, HarnessHooks::default(), allow)
    }

    #[test]
    fn initialize_creates_watch_pair_per_prefix() {
        let mut driver = driver_with(MockConnection::new());
        driver.initialize().unwrap();
        let filters = driver.connection().watch_filters();
        assert_eq!(filters.len(), 4);
        assert_eq!(
            filters.iter().filter(|f| **f == "com.example.calc").count(),
            2
        );
    }

    #[test]
    fn arm_breakpoints_hits_both_lines_once() {
        let mut driver = driver_with(MockConnection::new());
        driver.arm_harness_breakpoints().unwrap();
        driver.arm_harness_breakpoints().unwrap();
        assert_eq!(
            driver.connection().breakpoints,
            vec![
                ("analyser.TestRunner".to_string(), 71),
                ("analyser.TestRunner".to_string(), 72),
            ]
        );
    }

    #[test]
    fn arm_breakpoints_without_symbols_is_fatal() {
        let mut conn = MockConnection::new();
        conn.missing_line_info = true;
        let mut driver = driver_with(conn);
        let err = driver.arm_harness_breakpoints().unwrap_err();
        assert!(matches!(err, SondarError::MetadataUnavailable { .. }));
    }

    #[test]
    fn metadata_read_builds_descriptor() {
        let mut conn = MockConnection::new();
        conn.set_string_local("testClass", "pkg.Calc");
        conn.set_array_local(
            "testMethods",
            vec!["addsOk".to_string(), "divByZero".to_string()],
        );
        let mut driver = driver_with(conn);
        let desc = driver.read_disclosed_metadata().unwrap();
        assert_eq!(desc.class_name, "pkg.Calc");
        assert_eq!(desc.test_methods.len(), 2);
    }

    #[test]
    fn watch_toggling_is_idempotent() {
        let mut driver = driver_with(MockConnection::new());
        driver.initialize().unwrap();

        driver.set_watches_enabled(WatchKind::Entry, true).unwrap();
        let calls_after_first = driver.connection().call_history.len();
        // Second enable must not re-issue protocol traffic.
        driver.set_watches_enabled(WatchKind::Entry, true).unwrap();
        assert_eq!(driver.connection().call_history.len(), calls_after_first);

        assert!(driver
            .connection()
            .watches_of_kind(WatchKind::Entry)
            .iter()
            .all(|&e| e));
        assert!(driver
            .connection()
            .watches_of_kind(WatchKind::Exit)
            .iter()
            .all(|&e| !e));

        driver.set_watches_enabled(WatchKind::Entry, false).unwrap();
        assert!(driver
            .connection()
            .watches_of_kind(WatchKind::Entry)
            .iter()
            .all(|&e| !e));
    }

    #[test]
    fn shutdown_without_child_is_none() {
        let mut driver = driver_with(MockConnection::new());
        assert!(driver.shutdown().unwrap().is_none());
    }
}
