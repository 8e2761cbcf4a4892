use thiserror::Error;

/// Enumeration of errors that abort startup before the listener serves
/// any traffic. Each variant names the dependency that failed.
#[derive(Error, Debug)]
pub enum StartupError {
    #[error("failed to open storage pool: {0}")]
    Storage(#[from] sqlx::Error),

    #[error("failed to set up telemetry pipeline: {0}")]
    Telemetry(#[from] opentelemetry::trace::TraceError),

    #[error("failed to bind listener on {addr}: {source}")]
    Bind {
        addr: String,
        source: std::io::Error,
    },
}

/// A fatal listener outcome, anything other than closure on request.
/// Carries the rendered reason so it can cross the supervision channel.
#[derive(Error, Debug, Clone)]
#[error("listener failed: {reason}")]
pub struct ListenerError {
    reason: String,
}

impl ListenerError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

impl From<std::io::Error> for ListenerError {
    fn from(error: std::io::Error) -> Self {
        Self::new(error.to_string())
    }
}

/// Enumeration of errors during ordered teardown. Deadline variants
/// mean the shared shutdown budget was exceeded by that step.
#[derive(Error, Debug)]
pub enum ShutdownError {
    #[error("listener close exceeded the shutdown deadline")]
    ListenerDeadline,

    #[error("listener close failed: {0}")]
    ListenerClose(ListenerError),

    #[error("listener task panicked during shutdown: {0}")]
    ListenerPanicked(tokio::task::JoinError),

    #[error("telemetry shutdown exceeded the shutdown deadline")]
    TelemetryDeadline,

    #[error("telemetry shutdown worker failed: {0}")]
    TelemetryShutdown(tokio::task::JoinError),

    #[error("storage pool release exceeded the shutdown deadline")]
    StorageDeadline,
}

/// Binary-level union, consumed by the single exit decision point.
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error(transparent)]
    Startup(#[from] StartupError),

    #[error(transparent)]
    Listener(#[from] ListenerError),

    #[error(transparent)]
    Shutdown(#[from] ShutdownError),
}
