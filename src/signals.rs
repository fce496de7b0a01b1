/// Signal handling for graceful shutdown.
///
/// First SIGINT (Ctrl-C) or SIGTERM: finish the current pass, save status, exit.
/// Second one: kill the running child's process group and exit now.
/// Children run in their own process group, so the terminal's Ctrl-C never
/// reaches them directly.
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

const GRACEFUL: u8 = 1;
const FORCE: u8 = 2;

#[derive(Debug, Clone)]
pub struct SignalHandler {
    tx: Arc<watch::Sender<u8>>,
    rx: watch::Receiver<u8>,
}

impl Default for SignalHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl SignalHandler {
    /// A handler with no OS listener attached. Shutdown only via `request_shutdown`.
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(0);
        Self {
            tx: Arc::new(tx),
            rx,
        }
    }

    /// Listen for SIGINT and SIGTERM for the life of the runtime.
    /// Must be called inside a tokio runtime.
    pub fn install() -> Self {
        let handler = Self::new();
        let listener = handler.clone();

        tokio::spawn(async move {
            let mut sigterm =
                match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                    Ok(s) => Some(s),
                    Err(e) => {
                        tracing::warn!(error = %e, "failed to install SIGTERM handler");
                        None
                    }
                };

            loop {
                let terminate = async {
                    match sigterm.as_mut() {
                        Some(s) => {
                            if s.recv().await.is_none() {
                                std::future::pending::<()>().await;
                            }
                        }
                        None => std::future::pending::<()>().await,
                    }
                };

                tokio::select! {
                    res = tokio::signal::ctrl_c() => {
                        if let Err(e) = res {
                            tracing::warn!(error = %e, "failed to listen for Ctrl-C");
                            return;
                        }
                    }
                    _ = terminate => {}
                }

                if listener.request_shutdown() {
                    tracing::warn!("Second interrupt, killing the running process");
                } else {
                    tracing::warn!(
                        "Experiment interrupted by user, finishing current iteration (interrupt again to stop now)"
                    );
                }
            }
        });

        handler
    }

    pub fn shutdown_requested(&self) -> bool {
        *self.rx.borrow() >= GRACEFUL
    }

    /// True once a second interrupt asked for the running child to be killed.
    pub fn force_requested(&self) -> bool {
        *self.rx.borrow() >= FORCE
    }

    /// Escalate one level: graceful first, then force. Returns true once forced.
    pub fn request_shutdown(&self) -> bool {
        let mut level = 0;
        self.tx.send_modify(|l| {
            *l = (*l + 1).min(FORCE);
            level = *l;
        });
        level >= FORCE
    }

    /// Resolves once a forced stop is requested.
    pub async fn forced(&self) {
        let mut rx = self.rx.clone();
        if rx.wait_for(|l| *l >= FORCE).await.is_err() {
            std::future::pending::<()>().await;
        }
    }

    /// Sleep for `duration`, waking early on shutdown. Returns true if interrupted.
    pub async fn pause(&self, duration: Duration) -> bool {
        let mut rx = self.rx.clone();
        if *rx.borrow() >= GRACEFUL {
            return true;
        }
        tokio::select! {
            _ = tokio::time::sleep(duration) => false,
            res = rx.wait_for(|l| *l >= GRACEFUL) => res.is_ok(),
        }
    }
}
