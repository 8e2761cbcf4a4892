use std::collections::HashMap;
use std::ops::Add;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use tracing::warn;

/// Health reporting for components of the service.
///
/// The process can only be trusted with traffic if the loops and
/// resources it depends on are properly running and reporting.
///
/// HealthRegistry allows an arbitrary number of components to be
/// registered and report their health. The process' health status is
/// the combination of these individual health status:
///   - if any component is unhealthy, the process is unhealthy
///   - if all components recently reported healthy, the process is healthy
///   - if a component failed to report healthy for its defined deadline,
///     it is considered stalled, and the check fails.
///
/// Trying to merge the k8s concepts of liveness and readiness in a
/// single state is full of foot-guns, so HealthRegistry does not try
/// to do it. Each probe should have its separate instance of the
/// registry to avoid confusions.

#[derive(Default, Debug)]
pub struct HealthStatus {
    /// The overall status: true if all components are healthy
    pub healthy: bool,
    /// Current status of each registered component, for display
    pub components: HashMap<String, ComponentStatus>,
}

impl IntoResponse for HealthStatus {
    /// Computes the axum status code based on the overall health status,
    /// and prints each component status in the body for debugging.
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
    /// Automatically set when a component is newly registered
    Starting,
    /// Recently reported healthy, will need to report again before the date
    HealthyUntil(time::OffsetDateTime),
    /// Reported unhealthy
    Unhealthy,
    /// Set when the HealthyUntil deadline is reached without a new report
    Stalled,
}

impl ComponentStatus {
    pub fn is_healthy(&self) -> bool {
        match self {
            ComponentStatus::HealthyUntil(until) => until.gt(&time::OffsetDateTime::now_utc()),
            _ => false,
        }
    }
}

type ComponentMap = Arc<RwLock<HashMap<String, ComponentStatus>>>;

/// Shared registry of component health, cheap to clone into the router.
#[derive(Clone, Default)]
pub struct HealthRegistry {
    components: ComponentMap,
}

impl HealthRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new component, starting in the `Starting` state. The
    /// returned handle must report healthy more often than `deadline`.
    pub fn register(&self, component: impl Into<String>, deadline: Duration) -> HealthHandle {
        let component = component.into();
        match self.components.write() {
            Ok(mut components) => {
                components.insert(component.clone(), ComponentStatus::Starting);
            }
            Err(err) => warn!("failed to register health component: {}", err),
        }
        HealthHandle {
            component,
            deadline,
            components: self.components.clone(),
        }
    }

    /// Compute the current process status from all component reports.
    /// Components past their HealthyUntil deadline are reported as Stalled.
    pub fn get_status(&self) -> HealthStatus {
        let components = match self.components.read() {
            Ok(components) => components,
            Err(err) => {
                warn!("failed to read health component map: {}", err);
                return HealthStatus::default();
            }
        };

        let mut result = HealthStatus {
            healthy: !components.is_empty(),
            components: HashMap::with_capacity(components.len()),
        };
        for (component, status) in components.iter() {
            let status = match status {
                ComponentStatus::HealthyUntil(_) if !status.is_healthy() => {
                    ComponentStatus::Stalled
                }
                _ => status.clone(),
            };
            if !status.is_healthy() {
                result.healthy = false;
            }
            result.components.insert(component.clone(), status);
        }
        result
    }
}

/// Handle used by a component to report its health to the registry.
#[derive(Clone)]
pub struct HealthHandle {
    component: String,
    deadline: Duration,
    components: ComponentMap,
}

impl HealthHandle {
    /// Report as healthy. Must be called more frequently than the
    /// configured deadline.
    pub fn report_healthy(&self) {
        self.report_status(ComponentStatus::HealthyUntil(
            time::OffsetDateTime::now_utc().add(self.deadline),
        ))
    }

    /// Report component status, overwriting the previous report.
    pub fn report_status(&self, status: ComponentStatus) {
        match self.components.write() {
            Ok(mut components) => {
                components.insert(self.component.clone(), status);
            }
            Err(err) => warn!("failed to report health status: {}", err),
        }
    }
}
