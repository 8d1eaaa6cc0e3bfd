use crate::permission::PermissionOracle;
use crate::policy::should_resume;
use crate::preference::{LifecycleError, MonitoringPreference, PreferenceStore};
#[cfg(test)]
use mockall::automock;

/// Starts the capture and session pipeline as a background unit.
///
/// `launch` returns once the unit is running, not when it finishes.
#[cfg_attr(test, automock)]
pub trait PipelineLauncher: Send + Sync {
    fn launch(&self) -> anyhow::Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    PermissionDenied,
    MonitoringDisabled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResumeOutcome {
    Started,
    /// Expected outcome, not an error. Nothing was started and nothing is surfaced.
    Skipped(SkipReason),
}

/// Owns the "should capture be running" decision across process restarts.
pub struct LifecycleController<O, S, L> {
    permission: O,
    store: S,
    launcher: L,
}

impl<O, S, L> LifecycleController<O, S, L>
where
    O: PermissionOracle,
    S: PreferenceStore,
    L: PipelineLauncher,
{
    pub fn new(permission: O, store: S, launcher: L) -> Self {
        Self {
            permission,
            store,
            launcher,
        }
    }

    /// Records the user's toggle, with the current grant, before returning.
    ///
    /// Enabling while the permission is denied is still recorded; such a
    /// preference simply cannot resume capture until the grant is given.
    pub fn set_monitoring(&self, enabled: bool) -> Result<MonitoringPreference, LifecycleError> {
        let granted = self.permission.microphone_granted();
        if enabled && !granted {
            tracing::warn!("monitoring enabled without microphone permission");
        }
        let preference = MonitoringPreference::new(enabled, granted);
        self.store.save(&preference)?;
        tracing::info!(
            "background monitoring {}",
            if enabled { "enabled" } else { "disabled" }
        );
        Ok(preference)
    }

    /// Handles an OS restart signal.
    ///
    /// The permission is checked before the preference is read, and the
    /// store is not touched at all when it is denied.
    pub fn on_restart(&self) -> Result<ResumeOutcome, LifecycleError> {
        let granted = self.permission.microphone_granted();
        if !granted {
            tracing::info!("microphone permission not granted, not resuming capture");
            return Ok(ResumeOutcome::Skipped(SkipReason::PermissionDenied));
        }

        let preference = self.store.load()?;
        if !should_resume(granted, preference.as_ref()) {
            tracing::info!("background monitoring not enabled, not resuming capture");
            return Ok(ResumeOutcome::Skipped(SkipReason::MonitoringDisabled));
        }

        self.launcher
            .launch()
            .map_err(|e| LifecycleError::Launch(e.into()))?;
        tracing::info!("resumed background capture");
        Ok(ResumeOutcome::Started)
    }

    pub fn preference(&self) -> Result<Option<MonitoringPreference>, LifecycleError> {
        self.store.load()
    }

    pub fn permission_granted(&self) -> bool {
        self.permission.microphone_granted()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::permission::{MockPermissionOracle, StaticPermission};
    use crate::preference::{FilePreferenceStore, MemoryPreferenceStore, MockPreferenceStore};
    use std::io;
    use tempfile::tempdir;

    fn permission(granted: bool) -> MockPermissionOracle {
        let mut oracle = MockPermissionOracle::new();
        oracle.expect_microphone_granted().return_const(granted);
        oracle
    }

    fn idle_launcher() -> MockPipelineLauncher {
        let mut launcher = MockPipelineLauncher::new();
        launcher.expect_launch().never();
        launcher
    }

    #[test]
    fn denied_permission_skips_without_reading_the_preference() {
        // --- Arrange ---
        let mut store = MockPreferenceStore::new();
        store.expect_load().never();
        let controller = LifecycleController::new(permission(false), store, idle_launcher());

        // --- Act ---
        let outcome = controller.on_restart().unwrap();

        // --- Assert ---
        assert_eq!(outcome, ResumeOutcome::Skipped(SkipReason::PermissionDenied));
    }

    #[test]
    fn denied_permission_wins_over_an_enabled_preference() {
        let store = MemoryPreferenceStore::with_preference(MonitoringPreference::new(true, true));
        let controller =
            LifecycleController::new(StaticPermission::denied(), store, idle_launcher());

        let outcome = controller.on_restart().unwrap();

        assert_eq!(outcome, ResumeOutcome::Skipped(SkipReason::PermissionDenied));
    }

    #[test]
    fn never_enabled_monitoring_is_not_resumed() {
        let mut store = MockPreferenceStore::new();
        store.expect_load().times(1).returning(|| Ok(None));
        let controller = LifecycleController::new(permission(true), store, idle_launcher());

        let outcome = controller.on_restart().unwrap();

        assert_eq!(outcome, ResumeOutcome::Skipped(SkipReason::MonitoringDisabled));
    }

    #[test]
    fn disabled_monitoring_is_not_resumed() {
        let store = MemoryPreferenceStore::with_preference(MonitoringPreference::new(false, true));
        let controller =
            LifecycleController::new(StaticPermission::granted(), store, idle_launcher());

        let outcome = controller.on_restart().unwrap();

        assert_eq!(outcome, ResumeOutcome::Skipped(SkipReason::MonitoringDisabled));
    }

    #[test]
    fn granted_and_enabled_starts_the_pipeline_once() {
        // --- Arrange ---
        let store = MemoryPreferenceStore::with_preference(MonitoringPreference::new(true, true));
        let mut launcher = MockPipelineLauncher::new();
        launcher.expect_launch().times(1).returning(|| Ok(()));
        let controller = LifecycleController::new(permission(true), store, launcher);

        // --- Act ---
        let outcome = controller.on_restart().unwrap();

        // --- Assert ---
        assert_eq!(outcome, ResumeOutcome::Started);
    }

    #[test]
    fn launch_failure_is_reported() {
        let store = MemoryPreferenceStore::with_preference(MonitoringPreference::new(true, true));
        let mut launcher = MockPipelineLauncher::new();
        launcher
            .expect_launch()
            .times(1)
            .returning(|| Err(anyhow::anyhow!("no input device")));
        let controller = LifecycleController::new(permission(true), store, launcher);

        let result = controller.on_restart();

        assert!(matches!(result, Err(LifecycleError::Launch(_))));
    }

    #[test]
    fn store_failure_is_reported_and_nothing_starts() {
        let mut store = MockPreferenceStore::new();
        store.expect_load().times(1).returning(|| {
            Err(LifecycleError::Read {
                path: "monitoring.json".into(),
                source: io::Error::new(io::ErrorKind::PermissionDenied, "read-only"),
            })
        });
        let controller = LifecycleController::new(permission(true), store, idle_launcher());

        assert!(matches!(
            controller.on_restart(),
            Err(LifecycleError::Read { .. })
        ));
    }

    #[test]
    fn toggle_records_the_current_grant() {
        // --- Arrange ---
        let mut store = MockPreferenceStore::new();
        store
            .expect_save()
            .withf(|preference| preference.enabled() && !preference.permission_granted())
            .times(1)
            .returning(|_| Ok(()));
        let controller = LifecycleController::new(permission(false), store, idle_launcher());

        // --- Act ---
        let saved = controller.set_monitoring(true).unwrap();

        // --- Assert ---
        assert!(saved.enabled());
        assert!(!saved.permission_granted());
    }

    #[test]
    fn toggle_then_restart_through_the_file_store() -> anyhow::Result<()> {
        // --- Arrange ---
        let dir = tempdir()?;
        let toggler = LifecycleController::new(
            StaticPermission::granted(),
            FilePreferenceStore::new(dir.path()),
            idle_launcher(),
        );
        toggler.set_monitoring(true)?;

        let mut launcher = MockPipelineLauncher::new();
        launcher.expect_launch().times(1).returning(|| Ok(()));
        let restarted = LifecycleController::new(
            StaticPermission::granted(),
            FilePreferenceStore::new(dir.path()),
            launcher,
        );

        // --- Act ---
        let outcome = restarted.on_restart()?;

        // --- Assert ---
        assert_eq!(outcome, ResumeOutcome::Started);

        toggler.set_monitoring(false)?;
        assert_eq!(
            toggler.on_restart()?,
            ResumeOutcome::Skipped(SkipReason::MonitoringDisabled)
        );
        Ok(())
    }
}
