use std::fmt;

use tokio::signal::unix::{signal, SignalKind};

/// The OS signals consumed for graceful shutdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Interrupt,
    Terminate,
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Signal::Interrupt => write!(f, "SIGINT"),
            Signal::Terminate => write!(f, "SIGTERM"),
        }
    }
}

/// Resolves when SIGINT or SIGTERM is received, whichever comes first.
pub async fn shutdown_signal() -> Signal {
    let mut term = signal(SignalKind::terminate()).expect("failed to register SIGTERM handler");

    let mut interrupt = signal(SignalKind::interrupt()).expect("failed to register SIGINT handler");

    tokio::select! {
        _ = term.recv() => Signal::Terminate,
        _ = interrupt.recv() => Signal::Interrupt,
    }
}
