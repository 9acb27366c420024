//! Cooperative cancellation.
//!
//! A single-writer/multiple-reader flag set from the Ctrl-C handler and
//! sampled by the sweep loop at well-defined suspension points (iteration
//! boundaries and readiness polls), never mid-measurement, since the
//! measurement hold is an atomic unit of work.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Cloneable cancellation handle. Setting it is the only concurrent write
/// in the system, so a relaxed atomic boolean is all that is needed.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request a save-and-close at the next loop boundary.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }
}

/// Spawn the Ctrl-C listener that trips the token.
pub fn install_ctrl_c_handler(token: CancelToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::error!("Ctrl-C received; will save state and close at the next step boundary");
            token.cancel();
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_is_shared_between_clones() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
    }
}
