//! Process signals for the host loop
//!
//! SIGINT and SIGTERM request shutdown, SIGHUP requests a reload. Elsewhere
//! only Ctrl-C is available.

use anyhow::Result;
use tokio::sync::mpsc;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostSignal {
    Shutdown,
    Reload,
}

#[cfg(unix)]
pub fn signal_channel() -> Result<mpsc::Receiver<HostSignal>> {
    use anyhow::Context;
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigint = signal(SignalKind::interrupt()).context("Failed to set up SIGINT")?;
    let mut sigterm = signal(SignalKind::terminate()).context("Failed to set up SIGTERM")?;
    let mut sighup = signal(SignalKind::hangup()).context("Failed to set up SIGHUP")?;

    let (tx, rx) = mpsc::channel(4);
    tokio::spawn(async move {
        loop {
            let received = tokio::select! {
                _ = sigint.recv() => {
                    info!("Received SIGINT");
                    HostSignal::Shutdown
                }
                _ = sigterm.recv() => {
                    info!("Received SIGTERM");
                    HostSignal::Shutdown
                }
                _ = sighup.recv() => {
                    info!("Received SIGHUP");
                    HostSignal::Reload
                }
            };
            if tx.send(received).await.is_err() {
                break;
            }
        }
    });

    Ok(rx)
}

#[cfg(not(unix))]
pub fn signal_channel() -> Result<mpsc::Receiver<HostSignal>> {
    let (tx, rx) = mpsc::channel(1);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl-C");
            let _ = tx.send(HostSignal::Shutdown).await;
        }
    });
    Ok(rx)
}
