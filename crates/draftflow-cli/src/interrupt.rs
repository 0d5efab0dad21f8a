use std::time::Duration;

use draftflow_core::CancelHandle;
use tokio::task::JoinHandle;

/// Returned when a stream was cancelled by the user or a deadline.
#[derive(Debug)]
pub struct InterruptedError;

impl std::fmt::Display for InterruptedError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Interrupted")
    }
}

impl std::error::Error for InterruptedError {}

/// Cancels `handle` on Ctrl+C or once `deadline` elapses.
///
/// Abort the returned task when the stream ends on its own.
pub fn cancel_on_interrupt(handle: CancelHandle, deadline: Option<Duration>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let deadline = async {
            match deadline {
                Some(after) => tokio::time::sleep(after).await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                if let Err(err) = result {
                    tracing::warn!(error = %err, "failed to listen for Ctrl+C");
                    return;
                }
                tracing::debug!("Ctrl+C received");
            }
            () = deadline => tracing::info!("deadline reached"),
        }
        handle.cancel();
    })
}
