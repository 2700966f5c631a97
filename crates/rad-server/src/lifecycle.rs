//! Structured reporting for module lifecycle events.
//!
//! The registry announces each bootstrap and instantiate step through a
//! [`LifecycleReporter`]. Startup failures reach operators through this sink
//! before the error aborts the server.

use std::sync::Arc;

use crate::error::{LifecyclePhase, ModuleError};

const LIFECYCLE_TARGET: &str = "rad_server::lifecycle";

/// Observer trait used to surface lifecycle events to telemetry sinks.
pub trait LifecycleReporter: Send + Sync {
    /// Invoked before an instance enters `phase`.
    fn phase_starting(&self, instance: &str, phase: LifecyclePhase);

    /// Invoked after an instance completes `phase`.
    fn phase_succeeded(&self, instance: &str, phase: LifecyclePhase);

    /// Invoked when an instance fails `phase`.
    fn phase_failed(&self, instance: &str, phase: LifecyclePhase, error: &ModuleError);
}

impl<T> LifecycleReporter for Arc<T>
where
    T: LifecycleReporter,
{
    fn phase_starting(&self, instance: &str, phase: LifecyclePhase) {
        (**self).phase_starting(instance, phase);
    }

    fn phase_succeeded(&self, instance: &str, phase: LifecyclePhase) {
        (**self).phase_succeeded(instance, phase);
    }

    fn phase_failed(&self, instance: &str, phase: LifecyclePhase, error: &ModuleError) {
        (**self).phase_failed(instance, phase, error);
    }
}

/// Default reporter that records lifecycle events using `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct StructuredLifecycleReporter;

impl StructuredLifecycleReporter {
    /// Builds a new reporter.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl LifecycleReporter for StructuredLifecycleReporter {
    fn phase_starting(&self, instance: &str, phase: LifecyclePhase) {
        tracing::debug!(
            target: LIFECYCLE_TARGET,
            event = "phase_starting",
            instance,
            phase = %phase,
            "module instance entering phase"
        );
    }

    fn phase_succeeded(&self, instance: &str, phase: LifecyclePhase) {
        tracing::info!(
            target: LIFECYCLE_TARGET,
            event = "phase_succeeded",
            instance,
            phase = %phase,
            "module instance ready"
        );
    }

    fn phase_failed(&self, instance: &str, phase: LifecyclePhase, error: &ModuleError) {
        tracing::error!(
            target: LIFECYCLE_TARGET,
            event = "phase_failed",
            instance,
            phase = %phase,
            error = %error,
            "module instance failed"
        );
    }
}
