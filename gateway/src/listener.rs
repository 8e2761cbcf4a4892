use std::future::Future;
use std::net::SocketAddr;

use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::error::{ListenerError, ShutdownError};

/// Supervised serving task. The serve loop runs on its own task so the
/// orchestrator's path of control stays free to wait on termination
/// triggers; fatal outcomes are escalated through
/// [`wait_fatal`](ListenerSupervisor::wait_fatal) while closure on
/// request is suppressed.
pub struct ListenerSupervisor {
    local_addr: SocketAddr,
    shutdown: CancellationToken,
    fatal_rx: mpsc::Receiver<ListenerError>,
    task: JoinHandle<Result<(), ListenerError>>,
}

impl ListenerSupervisor {
    /// Serve `app` on the bound listener until `shutdown` is cancelled
    /// or the transport fails. Accepting begins immediately.
    pub fn spawn(
        local_addr: SocketAddr,
        listener: TcpListener,
        app: Router,
        shutdown: CancellationToken,
    ) -> Self {
        let drain = shutdown.clone().cancelled_owned();
        Self::supervise(local_addr, shutdown, async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(drain)
                .await
                .map_err(ListenerError::from)
        })
    }

    /// Supervision seam over any serve future; lets tests stand in for
    /// the transport.
    pub fn supervise<F>(local_addr: SocketAddr, shutdown: CancellationToken, serve: F) -> Self
    where
        F: Future<Output = Result<(), ListenerError>> + Send + 'static,
    {
        let (fatal_tx, fatal_rx) = mpsc::channel(1);
        let task = tokio::spawn(async move {
            let result = serve.await;
            if let Err(error) = &result {
                // the receiver is gone if the orchestrator already took
                // the signal branch; the join in close() still sees it
                drop(fatal_tx.send(error.clone()).await);
            }
            result
        });

        Self {
            local_addr,
            shutdown,
            fatal_rx,
            task,
        }
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Resolves only for fatal outcomes. Closure on request never
    /// resolves here, keeping the termination wait pinned on the signal.
    pub async fn wait_fatal(&mut self) -> ListenerError {
        match self.fatal_rx.recv().await {
            Some(error) => error,
            None => std::future::pending().await,
        }
    }

    /// Stop accepting, drain in-flight requests and join the task, all
    /// bounded by `deadline`. Overrun aborts the task and is an error.
    pub async fn close(self, deadline: Instant) -> Result<(), ShutdownError> {
        self.shutdown.cancel();
        let abort = self.task.abort_handle();
        match tokio::time::timeout_at(deadline, self.task).await {
            Ok(Ok(Ok(()))) => {
                info!("listener closed");
                Ok(())
            }
            Ok(Ok(Err(error))) => Err(ShutdownError::ListenerClose(error)),
            Ok(Err(join_error)) => Err(ShutdownError::ListenerPanicked(join_error)),
            Err(_elapsed) => {
                abort.abort();
                Err(ShutdownError::ListenerDeadline)
            }
        }
    }
}
