use std::time::Duration;

use log::{debug, info, warn};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::sleep;

/// Resolves on the first SIGINT or SIGTERM.
pub async fn termination_signal() {
    let interrupt = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Unable to listen for SIGINT: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                tokio::select! {
                    _ = interrupt => {}
                    _ = terminate.recv() => {}
                }
            }
            Err(e) => {
                warn!("Unable to listen for SIGTERM: {}", e);
                interrupt.await;
            }
        }
    }

    #[cfg(not(unix))]
    interrupt.await;
}

/// Reacts to the signals arriving on `signals`: the first raises the exiting
/// flag right away and starts the `grace` countdown, later ones are ignored.
/// `exit` runs once the countdown ends, whether or not teardown finished.
pub async fn supervise_termination<X>(
    mut signals: mpsc::UnboundedReceiver<()>,
    exiting: watch::Sender<bool>,
    grace: Duration,
    exit: X,
) where
    X: FnOnce(),
{
    if signals.recv().await.is_none() {
        return;
    }
    info!("Exiting");
    exiting.send_replace(true);

    let deadline = sleep(grace);
    tokio::pin!(deadline);
    loop {
        tokio::select! {
            _ = &mut deadline => break,
            signal = signals.recv() => match signal {
                Some(()) => debug!("Already exiting, signal ignored"),
                None => {
                    (&mut deadline).await;
                    break;
                }
            },
        }
    }

    warn!("Teardown still running after {:?}, forcing exit", grace);
    exit();
}

/// Installs the process signal listeners and kills the process `grace` after
/// the first SIGINT or SIGTERM.
pub fn spawn_signal_handler(exiting: watch::Sender<bool>, grace: Duration) -> JoinHandle<()> {
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        loop {
            termination_signal().await;
            if tx.send(()).is_err() {
                break;
            }
        }
    });
    tokio::spawn(supervise_termination(rx, exiting, grace, || {
        std::process::exit(0);
    }))
}
