/// Ctrl-C handling for supervised runs.
///
/// The supervisor polls an [`InterruptFlag`] once per loop iteration instead
/// of being cancelled mid-await, so an interrupt always goes through the same
/// terminate-and-drain path as a timeout.
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, Default)]
pub struct InterruptFlag {
    raised: Arc<AtomicBool>,
}

impl InterruptFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// A flag raised by the first SIGINT (Ctrl-C) the process receives.
    ///
    /// Must be called from within a tokio runtime.
    pub fn install_ctrl_c() -> Self {
        let flag = Self::new();
        let handle = flag.clone();
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    tracing::info!("interrupt received");
                    handle.raise();
                }
                Err(e) => tracing::warn!(error = %e, "failed to listen for Ctrl-C"),
            }
        });
        flag
    }

    pub fn raise(&self) {
        self.raised.store(true, Ordering::SeqCst);
    }

    pub fn is_raised(&self) -> bool {
        self.raised.load(Ordering::SeqCst)
    }
}
