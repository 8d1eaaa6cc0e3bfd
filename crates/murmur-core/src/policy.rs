use crate::preference::MonitoringPreference;

/// Whether capture may resume after a restart.
///
/// Permission wins over preference: a stale "enabled" record never resumes
/// capture once the grant is gone, and a grant alone never starts it.
pub fn should_resume(permission_granted: bool, preference: Option<&MonitoringPreference>) -> bool {
    permission_granted && preference.is_some_and(MonitoringPreference::enabled)
}
