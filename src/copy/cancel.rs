use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::{JobError, Result};

/// Set-once cancellation flag shared between a job and whoever may stop it.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            return Err(JobError::Cancelled.into());
        }
        Ok(())
    }

    /// The underlying flag, for registration with signal handlers.
    pub fn as_atomic(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_state() {
        let flag = CancelFlag::new();
        let other = flag.clone();
        assert!(flag.check().is_ok());
        other.cancel();
        assert!(flag.is_cancelled());
        assert!(flag.check().expect_err("cancelled").is_cancelled());
        other.cancel();
        assert!(flag.is_cancelled());
    }
}
