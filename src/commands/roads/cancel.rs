use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;

#[derive(Copy, Clone, Debug, Eq, PartialEq, Error)]
#[error("job canceled")]
pub struct Canceled;

/// Cooperative cancellation flag shared between the driver and one job.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_canceled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    pub fn check(&self) -> Result<(), Canceled> {
        if self.is_canceled() { Err(Canceled) } else { Ok(()) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_the_flag() {
        let t = CancelToken::new();
        let c = t.clone();
        assert!(t.check().is_ok());
        c.cancel();
        assert!(t.is_canceled());
        assert_eq!(t.check(), Err(Canceled));
    }

    #[test]
    fn canceled_downcasts_through_anyhow() {
        let err: anyhow::Error = Canceled.into();
        assert!(err.is::<Canceled>());
    }
}
