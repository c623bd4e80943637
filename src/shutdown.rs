use tokio::signal;
use tokio::signal::unix::{signal as unix_signal, SignalKind};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Install a shutdown handler that listens for SIGTERM and SIGINT.
///
/// Returns a `CancellationToken` that is cancelled when either signal is
/// received. Used by the server, which drains by simply stopping to accept.
pub fn install_shutdown_handler() -> CancellationToken {
    let token = CancellationToken::new();
    let token_clone = token.clone();

    tokio::spawn(async move {
        let mut sigterm =
            unix_signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
        let mut sigint =
            unix_signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");

        tokio::select! {
            _ = sigterm.recv() => {
                info!("received SIGTERM, initiating graceful shutdown");
            }
            _ = sigint.recv() => {
                info!("received SIGINT, initiating graceful shutdown");
            }
        }

        token_clone.cancel();
    });

    token
}

/// Two-stage interrupt handler for the worker.
///
/// The first Ctrl-C cancels the returned token: the worker finishes its
/// current task and stops taking new work. A second Ctrl-C terminates the
/// process (and the task running within) immediately with exit code -2.
pub fn install_interrupt_handler() -> CancellationToken {
    let token = CancellationToken::new();
    let token_clone = token.clone();

    tokio::spawn(async move {
        if signal::ctrl_c().await.is_err() {
            return;
        }
        warn!(
            "interrupt received; the worker will finish its current task and then stop. \
             Interrupt again to terminate immediately"
        );
        token_clone.cancel();

        if signal::ctrl_c().await.is_err() {
            return;
        }
        error!("second interrupt received; terminating immediately");
        std::process::exit(-2);
    });

    token
}
