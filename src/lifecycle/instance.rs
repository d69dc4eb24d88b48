use crate::error::HostError;
use std::sync::atomic::{AtomicBool, Ordering};

static CLAIMED: AtomicBool = AtomicBool::new(false);

/// Proof that the caller is the only live host in this process.
///
/// A [`LifecycleController`](super::LifecycleController) can only be built
/// from a token, so at most one of them (and therefore one signal bridge and
/// one simulation context) exists at a time. Dropping the token releases the
/// claim.
#[derive(Debug)]
pub struct HostToken {
    _private: (),
}

impl HostToken {
    pub fn claim() -> Result<Self, HostError> {
        if CLAIMED.swap(true, Ordering::AcqRel) {
            return Err(HostError::AlreadyActive);
        }
        Ok(Self { _private: () })
    }

    pub fn is_claimed() -> bool {
        CLAIMED.load(Ordering::Acquire)
    }
}

impl Drop for HostToken {
    fn drop(&mut self) {
        CLAIMED.store(false, Ordering::Release);
    }
}
