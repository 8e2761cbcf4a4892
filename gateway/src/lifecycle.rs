//! Lifecycle orchestration: ordered startup of the dependent
//! subsystems, supervised serving, signal interception, and
//! deadline-bounded ordered teardown.

use std::fmt;
use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;

use health::{HealthHandle, HealthRegistry};
use sqlx::PgPool;
use tokio::net::TcpListener;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::database;
use crate::error::{ListenerError, ShutdownError, StartupError};
use crate::listener::ListenerSupervisor;
use crate::metrics::{
    emit_shutdown_completed, emit_shutdown_initiated, emit_step_shutdown_duration,
};
use crate::router::{self, ReadinessHandler};
use crate::signals::{self, Signal};
use crate::telemetry::{self, TelemetryHandle};

const LISTENER_LIVENESS_DEADLINE: Duration = Duration::from_secs(30);
const LISTENER_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(10);

/// Run states of the orchestrator. States only move forward:
/// `Initializing → Running → ShuttingDown → {Stopped|Failed}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Initializing,
    Running,
    ShuttingDown,
    Stopped,
    Failed,
}

impl LifecycleState {
    fn can_advance_to(self, next: LifecycleState) -> bool {
        matches!(
            (self, next),
            (LifecycleState::Initializing, LifecycleState::Running)
                | (LifecycleState::Initializing, LifecycleState::Failed)
                | (LifecycleState::Running, LifecycleState::ShuttingDown)
                | (LifecycleState::ShuttingDown, LifecycleState::Stopped)
                | (LifecycleState::ShuttingDown, LifecycleState::Failed)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, LifecycleState::Stopped | LifecycleState::Failed)
    }
}

/// The single event that ends the serving phase. At most one trigger
/// is acted upon; later ones are ignored once shutdown has begun.
#[derive(Debug)]
pub enum TerminationTrigger {
    Signal(Signal),
    ListenerError(ListenerError),
}

impl TerminationTrigger {
    fn reason(&self) -> &'static str {
        match self {
            TerminationTrigger::Signal(_) => "signal",
            TerminationTrigger::ListenerError(_) => "listener_error",
        }
    }
}

impl fmt::Display for TerminationTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TerminationTrigger::Signal(signal) => write!(f, "signal {signal}"),
            TerminationTrigger::ListenerError(error) => write!(f, "{error}"),
        }
    }
}

/// Owns the configuration and every acquired resource for the process
/// lifetime, and is the only place lifecycle state is mutated. The
/// library never terminates the process; every terminal condition is
/// reported as a `Result` for the entry path to act on.
pub struct Orchestrator {
    config: Config,
    state: LifecycleState,
    shutdown_token: CancellationToken,
    liveness: HealthRegistry,
    pool: Option<PgPool>,
    telemetry: Option<TelemetryHandle>,
    supervisor: Option<ListenerSupervisor>,
}

impl Orchestrator {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            state: LifecycleState::Initializing,
            shutdown_token: CancellationToken::new(),
            liveness: HealthRegistry::new(),
            pool: None,
            telemetry: None,
            supervisor: None,
        }
    }

    /// Acquire every dependency in order (storage, telemetry, router,
    /// listener) and hand the listener off to its supervisor. Fails
    /// fast on the first error, naming the dependency that failed; the
    /// listener is never started unless every prior step succeeded.
    pub async fn start(&mut self) -> Result<(), StartupError> {
        match self.try_start().await {
            Ok(()) => {
                self.transition(LifecycleState::Running);
                Ok(())
            }
            Err(error) => {
                self.transition(LifecycleState::Failed);
                Err(error)
            }
        }
    }

    async fn try_start(&mut self) -> Result<(), StartupError> {
        let pool = database::open_pool(&self.config)?;
        let telemetry = telemetry::setup(&self.config)?;

        let readiness = ReadinessHandler::new(self.shutdown_token.clone());
        let app = router::router(
            pool.clone(),
            self.liveness.clone(),
            readiness,
            self.config.export_prometheus,
        );

        let bind = self.config.bind();
        let listener = TcpListener::bind(&bind)
            .await
            .map_err(|source| StartupError::Bind {
                addr: bind.clone(),
                source,
            })?;
        let local_addr = listener
            .local_addr()
            .map_err(|source| StartupError::Bind { addr: bind, source })?;

        let supervisor =
            ListenerSupervisor::spawn(local_addr, listener, app, self.shutdown_token.clone());
        spawn_listener_heartbeat(
            self.liveness
                .register("listener", LISTENER_LIVENESS_DEADLINE),
            self.shutdown_token.clone(),
        );

        self.pool = Some(pool);
        self.telemetry = Some(telemetry);
        self.supervisor = Some(supervisor);
        info!(addr = %local_addr, "listening for http");
        Ok(())
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    /// Address the listener is bound to, once serving.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.supervisor.as_ref().map(ListenerSupervisor::local_addr)
    }

    /// Block until an interrupt/terminate signal arrives or the
    /// listener reports a fatal error, whichever comes first.
    pub async fn await_termination(&mut self) -> TerminationTrigger {
        self.await_termination_with(signals::shutdown_signal()).await
    }

    /// Same as [`await_termination`](Orchestrator::await_termination)
    /// but takes the signal source as a future, so callers and tests
    /// can inject triggers deterministically. Whichever side resolves
    /// first wins; the other is not awaited further. Accepting the
    /// trigger flips readiness and starts draining the listener.
    pub async fn await_termination_with<F>(&mut self, signal: F) -> TerminationTrigger
    where
        F: Future<Output = Signal>,
    {
        let trigger = match self.supervisor.as_mut() {
            Some(supervisor) => tokio::select! {
                kind = signal => TerminationTrigger::Signal(kind),
                error = supervisor.wait_fatal() => TerminationTrigger::ListenerError(error),
            },
            None => TerminationTrigger::Signal(signal.await),
        };

        if self.state == LifecycleState::Running {
            info!(trigger = %trigger, "shutdown initiated");
            emit_shutdown_initiated(trigger.reason());
            self.transition(LifecycleState::ShuttingDown);
            self.shutdown_token.cancel();
        }
        trigger
    }

    /// Drive ordered teardown under the configured deadline: listener
    /// close, then telemetry shutdown, then storage release, bounded
    /// by one absolute deadline shared across all steps. A failing
    /// step does not stop the remaining steps; the first error
    /// encountered is returned. Calling this again after a terminal
    /// state is a no-op.
    pub async fn shutdown(&mut self) -> Result<(), ShutdownError> {
        if self.state.is_terminal() || self.state == LifecycleState::Initializing {
            return Ok(());
        }
        if self.state == LifecycleState::Running {
            info!("shutdown requested");
            emit_shutdown_initiated("requested");
            self.transition(LifecycleState::ShuttingDown);
            self.shutdown_token.cancel();
        }

        let shutdown_clock = Instant::now();
        let deadline = shutdown_clock + self.config.shutdown_timeout.0;
        let mut first_error: Option<ShutdownError> = None;

        if let Some(supervisor) = self.supervisor.take() {
            let result = supervisor.close(deadline).await;
            record_step("listener", shutdown_clock, result, &mut first_error);
        }
        if let Some(telemetry) = self.telemetry.take() {
            let result = telemetry.shutdown(deadline).await;
            record_step("telemetry", shutdown_clock, result, &mut first_error);
        }
        if let Some(pool) = self.pool.take() {
            let result = match tokio::time::timeout_at(deadline, pool.close()).await {
                Ok(()) => Ok(()),
                Err(_elapsed) => Err(ShutdownError::StorageDeadline),
            };
            record_step("storage", shutdown_clock, result, &mut first_error);
        }

        let clean = first_error.is_none();
        emit_shutdown_completed(clean);
        if clean {
            self.transition(LifecycleState::Stopped);
            info!(
                total_duration_secs = shutdown_clock.elapsed().as_secs_f64(),
                "shutdown complete"
            );
        } else {
            self.transition(LifecycleState::Failed);
            warn!(
                total_duration_secs = shutdown_clock.elapsed().as_secs_f64(),
                "shutdown complete with failures"
            );
        }
        first_error.map_or(Ok(()), Err)
    }

    fn transition(&mut self, next: LifecycleState) {
        debug_assert!(
            self.state.can_advance_to(next),
            "invalid lifecycle transition {:?} -> {:?}",
            self.state,
            next
        );
        debug!(from = ?self.state, to = ?next, "lifecycle state change");
        self.state = next;
    }
}

fn record_step(
    step: &str,
    shutdown_clock: Instant,
    result: Result<(), ShutdownError>,
    first_error: &mut Option<ShutdownError>,
) {
    let duration_secs = shutdown_clock.elapsed().as_secs_f64();
    match result {
        Ok(()) => {
            emit_step_shutdown_duration(step, "completed", duration_secs);
            info!(step, duration_secs, "teardown step complete");
        }
        Err(error) => {
            emit_step_shutdown_duration(step, "failed", duration_secs);
            warn!(step, duration_secs, error = %error, "teardown step failed");
            if first_error.is_none() {
                *first_error = Some(error);
            }
        }
    }
}

fn spawn_listener_heartbeat(handle: HealthHandle, shutdown: CancellationToken) {
    tokio::spawn(async move {
        handle.report_healthy();
        let mut interval = tokio::time::interval(LISTENER_HEARTBEAT_INTERVAL);
        loop {
            tokio::select! {
                _ = interval.tick() => handle.report_healthy(),
                _ = shutdown.cancelled() => break,
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::future::{pending, ready};

    use envconfig::Envconfig;

    use super::*;
    use crate::config::EnvMsDuration;

    fn test_config(shutdown_ms: u64) -> Config {
        let mut config =
            Config::init_from_hashmap(&HashMap::new()).expect("default config should parse");
        config.host = "127.0.0.1".to_string();
        config.port = 0;
        config.shutdown_timeout = EnvMsDuration(Duration::from_millis(shutdown_ms));
        config.export_prometheus = false;
        config
    }

    fn test_addr() -> SocketAddr {
        "127.0.0.1:0".parse().expect("valid socket addr")
    }

    #[test]
    fn states_only_move_forward() {
        assert!(LifecycleState::Initializing.can_advance_to(LifecycleState::Running));
        assert!(LifecycleState::Initializing.can_advance_to(LifecycleState::Failed));
        assert!(LifecycleState::Running.can_advance_to(LifecycleState::ShuttingDown));
        assert!(LifecycleState::ShuttingDown.can_advance_to(LifecycleState::Stopped));
        assert!(LifecycleState::ShuttingDown.can_advance_to(LifecycleState::Failed));

        assert!(!LifecycleState::Running.can_advance_to(LifecycleState::Initializing));
        assert!(!LifecycleState::ShuttingDown.can_advance_to(LifecycleState::Running));
        assert!(!LifecycleState::Stopped.can_advance_to(LifecycleState::Running));
        assert!(!LifecycleState::Failed.can_advance_to(LifecycleState::ShuttingDown));
    }

    #[tokio::test]
    async fn listener_fatal_error_ends_the_wait_without_a_signal() {
        let mut orchestrator = Orchestrator::new(test_config(1000));
        orchestrator.supervisor = Some(ListenerSupervisor::supervise(
            test_addr(),
            orchestrator.shutdown_token.clone(),
            async { Err(ListenerError::new("accept loop collapsed")) },
        ));
        orchestrator.state = LifecycleState::Running;

        let trigger = orchestrator.await_termination_with(pending()).await;
        assert!(matches!(trigger, TerminationTrigger::ListenerError(_)));
        assert_eq!(orchestrator.state(), LifecycleState::ShuttingDown);
        assert!(orchestrator.shutdown_token.is_cancelled());

        // the close step surfaces the fatal outcome as a step error
        let result = orchestrator.shutdown().await;
        assert!(matches!(result, Err(ShutdownError::ListenerClose(_))));
        assert_eq!(orchestrator.state(), LifecycleState::Failed);
    }

    #[tokio::test]
    async fn racing_triggers_drive_shutdown_exactly_once() {
        let mut orchestrator = Orchestrator::new(test_config(1000));
        orchestrator.supervisor = Some(ListenerSupervisor::supervise(
            test_addr(),
            orchestrator.shutdown_token.clone(),
            async { Err(ListenerError::new("accept loop collapsed")) },
        ));
        orchestrator.state = LifecycleState::Running;

        // a fatal error and a signal race; exactly one wins the select
        let _trigger = orchestrator
            .await_termination_with(ready(Signal::Interrupt))
            .await;
        assert_eq!(orchestrator.state(), LifecycleState::ShuttingDown);

        let first = orchestrator.shutdown().await;
        assert!(first.is_err());
        assert_eq!(orchestrator.state(), LifecycleState::Failed);

        // a second shutdown on a terminal state is a no-op
        orchestrator
            .shutdown()
            .await
            .expect("repeat shutdown must not corrupt state");
        assert_eq!(orchestrator.state(), LifecycleState::Failed);
    }

    #[tokio::test]
    async fn blown_deadline_still_releases_remaining_resources() {
        let mut orchestrator = Orchestrator::new(test_config(200));
        let pool = database::open_pool(&orchestrator.config).expect("lazy pool should build");
        let pool_probe = pool.clone();
        orchestrator.pool = Some(pool);
        orchestrator.telemetry =
            Some(telemetry::setup(&orchestrator.config).expect("disabled telemetry"));
        // a serve loop that ignores the drain request entirely
        orchestrator.supervisor = Some(ListenerSupervisor::supervise(
            test_addr(),
            orchestrator.shutdown_token.clone(),
            async {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok(())
            },
        ));
        orchestrator.state = LifecycleState::Running;

        let trigger = orchestrator
            .await_termination_with(ready(Signal::Terminate))
            .await;
        assert!(matches!(trigger, TerminationTrigger::Signal(Signal::Terminate)));

        let result = orchestrator.shutdown().await;
        assert!(matches!(result, Err(ShutdownError::ListenerDeadline)));
        assert_eq!(orchestrator.state(), LifecycleState::Failed);

        // best-effort teardown: the later steps still ran
        assert!(pool_probe.is_closed());
    }

    #[tokio::test]
    async fn teardown_within_budget_succeeds() {
        let mut orchestrator = Orchestrator::new(test_config(1000));
        let pool = database::open_pool(&orchestrator.config).expect("lazy pool should build");
        orchestrator.pool = Some(pool);
        orchestrator.telemetry =
            Some(telemetry::setup(&orchestrator.config).expect("disabled telemetry"));
        let drain = orchestrator.shutdown_token.clone();
        orchestrator.supervisor = Some(ListenerSupervisor::supervise(
            test_addr(),
            orchestrator.shutdown_token.clone(),
            async move {
                drain.cancelled().await;
                tokio::time::sleep(Duration::from_millis(200)).await;
                Ok(())
            },
        ));
        orchestrator.state = LifecycleState::Running;

        let started = Instant::now();
        let trigger = orchestrator
            .await_termination_with(ready(Signal::Terminate))
            .await;
        assert!(matches!(trigger, TerminationTrigger::Signal(_)));

        orchestrator
            .shutdown()
            .await
            .expect("drain fits the budget");
        assert_eq!(orchestrator.state(), LifecycleState::Stopped);
        assert!(started.elapsed() < Duration::from_secs(1));
    }
}
