use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use time::OffsetDateTime;
use tracing::warn;

/// Liveness reporting for the long-running loops of the source.
///
/// Each stage registers a component and must keep reporting healthy more
/// often than its deadline. The process is healthy when every registered
/// component is. A component that misses its deadline is reported as
/// `Stalled`.
///
/// Readiness is tracked separately by `ReadinessFlag`: a process can be alive
/// while still resolving its queue, and it must not be reported ready before.
#[derive(Default, Debug)]
pub struct HealthStatus {
    pub healthy: bool,
    pub components: HashMap<String, ComponentStatus>,
}

impl IntoResponse for HealthStatus {
    fn into_response(self) -> Response {
        let body = format!("{self:?}");
        match self.healthy {
            true => (StatusCode::OK, body),
            false => (StatusCode::INTERNAL_SERVER_ERROR, body),
        }
        .into_response()
    }
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub enum ComponentStatus {
    /// Set on registration, until the first report.
    Starting,
    HealthyUntil(OffsetDateTime),
    Unhealthy,
    /// The `HealthyUntil` deadline passed without a new report.
    Stalled,
}

type Components = Arc<RwLock<HashMap<String, ComponentStatus>>>;

/// Reporting handle for a single component. Cloning it shares the component,
/// so every worker of a pool can report through the same entry.
#[derive(Clone)]
pub struct HealthHandle {
    component: String,
    deadline: time::Duration,
    heartbeat: Duration,
    components: Components,
}

impl HealthHandle {
    /// Longest wait between two reports that keeps the component healthy
    /// with some margin.
    pub fn heartbeat_interval(&self) -> Duration {
        self.heartbeat
    }

    pub fn report_healthy(&self) {
        self.report_status(ComponentStatus::HealthyUntil(
            OffsetDateTime::now_utc() + self.deadline,
        ))
    }

    pub fn report_status(&self, status: ComponentStatus) {
        match self.components.write() {
            Ok(mut components) => {
                components.insert(self.component.clone(), status);
            }
            Err(_) => warn!(component = self.component, "poisoned health registry lock"),
        }
    }
}

#[derive(Clone)]
pub struct HealthRegistry {
    name: String,
    components: Components,
}

impl HealthRegistry {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            components: Default::default(),
        }
    }

    /// Registers a component in `Starting` state and returns its handle.
    pub fn register(&self, component: &str, deadline: Duration) -> HealthHandle {
        let heartbeat = deadline / 2;
        let deadline = time::Duration::try_from(deadline).unwrap_or(time::Duration::MAX);
        let handle = HealthHandle {
            component: component.to_owned(),
            deadline,
            heartbeat,
            components: self.components.clone(),
        };
        handle.report_status(ComponentStatus::Starting);
        handle
    }

    /// Computes the status of the process. Can be used as an axum handler.
    pub fn get_status(&self) -> HealthStatus {
        let Ok(components) = self.components.read() else {
            warn!("{} health check failed: poisoned registry lock", self.name);
            return HealthStatus::default();
        };

        let now = OffsetDateTime::now_utc();
        let mut status = HealthStatus {
            healthy: !components.is_empty(),
            components: HashMap::with_capacity(components.len()),
        };

        for (name, component) in components.iter() {
            let current = match component {
                ComponentStatus::HealthyUntil(until) if *until > now => component.clone(),
                ComponentStatus::HealthyUntil(_) => ComponentStatus::Stalled,
                other => other.clone(),
            };
            if !matches!(current, ComponentStatus::HealthyUntil(_)) {
                status.healthy = false;
            }
            status.components.insert(name.clone(), current);
        }

        if !status.healthy {
            warn!(
                "{} health check failed: {:?}",
                self.name, status.components
            );
        }
        status
    }
}

/// Raised once the source has everything it needs to consume messages.
/// There is no way back to "not ready" other than restarting the process.
#[derive(Clone, Default)]
pub struct ReadinessFlag {
    ready: Arc<AtomicBool>,
}

impl ReadinessFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark_ready(&self) {
        self.ready.store(true, Ordering::Release);
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    pub fn check(&self) -> StatusCode {
        if self.is_ready() {
            StatusCode::OK
        } else {
            StatusCode::SERVICE_UNAVAILABLE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_unhealthy() {
        let registry = HealthRegistry::new("liveness");
        assert!(!registry.get_status().healthy);
    }

    #[test]
    fn component_goes_through_states() {
        let registry = HealthRegistry::new("liveness");
        let handle = registry.register("receiver", Duration::from_secs(30));

        let status = registry.get_status();
        assert!(!status.healthy);
        assert_eq!(
            status.components.get("receiver"),
            Some(&ComponentStatus::Starting)
        );

        handle.report_healthy();
        assert!(registry.get_status().healthy);

        handle.report_status(ComponentStatus::Unhealthy);
        let status = registry.get_status();
        assert!(!status.healthy);
        assert_eq!(
            status.components.get("receiver"),
            Some(&ComponentStatus::Unhealthy)
        );
    }

    #[test]
    fn missed_deadline_is_stalled() {
        let registry = HealthRegistry::new("liveness");
        let handle = registry.register("receiver", Duration::from_secs(30));

        handle.report_status(ComponentStatus::HealthyUntil(
            OffsetDateTime::now_utc() - time::Duration::seconds(1),
        ));

        let status = registry.get_status();
        assert!(!status.healthy);
        assert_eq!(
            status.components.get("receiver"),
            Some(&ComponentStatus::Stalled)
        );
    }

    #[test]
    fn every_component_must_be_healthy() {
        let registry = HealthRegistry::new("liveness");
        let receivers = registry.register("receivers", Duration::from_secs(30));
        let deleters = registry.register("deleters", Duration::from_secs(30));

        receivers.report_healthy();
        assert!(!registry.get_status().healthy);

        deleters.report_healthy();
        assert!(registry.get_status().healthy);

        // clones report into the same component
        let other_receiver = receivers.clone();
        other_receiver.report_status(ComponentStatus::Unhealthy);
        assert!(!registry.get_status().healthy);
        assert_eq!(registry.get_status().components.len(), 2);
    }

    #[test]
    fn heartbeat_is_within_deadline() {
        let registry = HealthRegistry::new("liveness");
        let handle = registry.register("deleters", Duration::from_secs(60));
        assert_eq!(handle.heartbeat_interval(), Duration::from_secs(30));
    }

    #[test]
    fn status_into_response() {
        let nok = HealthStatus::default().into_response();
        assert_eq!(nok.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let ok = HealthStatus {
            healthy: true,
            components: Default::default(),
        }
        .into_response();
        assert_eq!(ok.status(), StatusCode::OK);
    }

    #[test]
    fn readiness_is_raised_once() {
        let readiness = ReadinessFlag::new();
        assert_eq!(readiness.check(), StatusCode::SERVICE_UNAVAILABLE);

        let shared = readiness.clone();
        shared.mark_ready();
        assert!(readiness.is_ready());
        assert_eq!(readiness.check(), StatusCode::OK);
    }
}
