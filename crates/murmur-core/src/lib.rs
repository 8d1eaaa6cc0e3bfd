//! Decides whether background capture should be running, and runs it.
//!
//! The user's monitoring toggle is persisted as a [`MonitoringPreference`].
//! At restart the [`LifecycleController`] consults the microphone permission
//! first and the stored preference second, and only then asks its
//! [`PipelineLauncher`] to start a [`CapturePipeline`].
pub mod lifecycle;
pub mod permission;
pub mod pipeline;
pub mod policy;
pub mod preference;

pub use lifecycle::{LifecycleController, PipelineLauncher, ResumeOutcome, SkipReason};
pub use permission::{EnvPermission, PermissionOracle, StaticPermission};
pub use pipeline::{CapturePipeline, PipelineReport};
pub use policy::should_resume;
pub use preference::{
    FilePreferenceStore, LifecycleError, MemoryPreferenceStore, MonitoringPreference,
    PreferenceStore,
};
