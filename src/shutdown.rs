// src/shutdown.rs
use anyhow::{Context, Result};
use tokio::sync::watch;

/// Cooperative shutdown flag shared by every long-running task.
pub fn channel() -> (watch::Sender<bool>, watch::Receiver<bool>) {
    watch::channel(false)
}

/// Resolves once shutdown was requested, or the sender is gone.
pub async fn requested(rx: &mut watch::Receiver<bool>) {
    let _ = rx.wait_for(|stop| *stop).await;
}

pub fn is_requested(rx: &watch::Receiver<bool>) -> bool {
    *rx.borrow()
}

/// Resolves on ctrl-c, or on SIGTERM where the platform has it.
pub async fn termination_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut term = signal(SignalKind::terminate()).context("listen for SIGTERM")?;
        tokio::select! {
            r = tokio::signal::ctrl_c() => r.context("listen for ctrl-c")?,
            _ = term.recv() => tracing::info!("SIGTERM received"),
        }
        Ok(())
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await.context("listen for ctrl-c")
    }
}
