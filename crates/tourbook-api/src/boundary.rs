//! # Fault Boundaries
//!
//! Two places where failures escape normal `Result` flow:
//!
//! - **Inside a request**: a handler panic is caught by
//!   `tower_http::catch_panic::CatchPanicLayer` configured with
//!   [`panic_response`], which turns the payload into an
//!   [`AppError::Internal`] response. The normalization layer then renders
//!   it like any other programming fault.
//! - **Outside any request**: background work runs under
//!   [`FatalFaults::spawn_supervised`]. A supervised task that panics or
//!   returns an error reports a [`FatalFault`]; [`shutdown_signal`] resolves
//!   on the first one, the server drains in-flight connections, and `main`
//!   exits with status 1.

use std::any::Any;
use std::future::Future;

use axum::response::{IntoResponse, Response};
use tokio::signal;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::AppError;

// =============================================================================
// Request boundary
// =============================================================================

/// Best-effort text of a panic payload.
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic with non-string payload".to_string()
    }
}

/// `CatchPanicLayer` handler: a panicked request becomes an internal error.
pub fn panic_response(payload: Box<dyn Any + Send + 'static>) -> Response {
    let message = panic_message(&*payload);
    AppError::Internal(format!("handler panicked: {message}")).into_response()
}

// =============================================================================
// Process boundary
// =============================================================================

/// A background failure that ends the process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FatalFault {
    /// Name of the supervised task.
    pub task: &'static str,
    /// What went wrong.
    pub reason: String,
}

/// Sending half of the fatal-fault channel.
#[derive(Debug, Clone)]
pub struct FatalFaults {
    tx: mpsc::UnboundedSender<FatalFault>,
}

impl FatalFaults {
    /// A reporter and the receiver [`shutdown_signal`] listens on.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<FatalFault>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Report a fault. Ignored once the receiver is gone (already shutting
    /// down).
    pub fn report(&self, task: &'static str, reason: impl Into<String>) {
        let fault = FatalFault {
            task,
            reason: reason.into(),
        };
        tracing::error!(task = fault.task, reason = %fault.reason, "fatal fault in background task");
        let _ = self.tx.send(fault);
    }

    /// Run `work` on the runtime; an error or panic becomes a fatal fault.
    pub fn spawn_supervised<F>(&self, task: &'static str, work: F) -> JoinHandle<()>
    where
        F: Future<Output = Result<(), AppError>> + Send + 'static,
    {
        let faults = self.clone();
        let inner = tokio::spawn(work);
        tokio::spawn(async move {
            match inner.await {
                Ok(Ok(())) => tracing::info!(task, "background task finished"),
                Ok(Err(err)) => faults.report(task, err.to_string()),
                Err(join) if join.is_panic() => {
                    let payload = join.into_panic();
                    faults.report(task, format!("panicked: {}", panic_message(&*payload)));
                }
                Err(_) => tracing::debug!(task, "background task cancelled"),
            }
        })
    }
}

/// Why the server stopped accepting connections.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShutdownCause {
    /// Ctrl+C / SIGINT.
    Interrupt,
    /// SIGTERM.
    Terminate,
    /// A supervised task failed.
    Fatal(FatalFault),
}

impl ShutdownCause {
    /// Process exit status for this cause.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Fatal(_) => 1,
            Self::Interrupt | Self::Terminate => 0,
        }
    }
}

/// Resolve on the first of SIGINT, SIGTERM, or a reported fatal fault.
pub async fn shutdown_signal(mut faults: mpsc::UnboundedReceiver<FatalFault>) -> ShutdownCause {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    let fatal = async {
        match faults.recv().await {
            Some(fault) => fault,
            // Every reporter dropped; nothing can fail fatally any more.
            None => std::future::pending().await,
        }
    };

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
            ShutdownCause::Interrupt
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating graceful shutdown");
            ShutdownCause::Terminate
        }
        fault = fatal => {
            tracing::error!(task = fault.task, "fatal fault, initiating graceful shutdown");
            ShutdownCause::Fatal(fault)
        }
    }
}
