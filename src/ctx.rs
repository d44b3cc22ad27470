//! # Call Context
//!
//! Every public namespace operation carries a [`Context`] holding a
//! cancellation token and an optional deadline. Long-running index work
//! checks the context at coarse boundaries only: per document during a
//! commit, per candidate batch during a select. The token is shared, so a
//! server edge can cancel an in-flight call from another thread.

use crate::error::Error;
use eyre::Result;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

#[derive(Clone, Default)]
pub struct Context {
    cancel: Option<Arc<AtomicBool>>,
    deadline: Option<Instant>,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attaches a shared cancellation token. Setting the token to `true`
    /// makes subsequent [`Context::check`] calls fail with `errCanceled`.
    pub fn with_cancel(mut self, token: Arc<AtomicBool>) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn is_cancelled(&self) -> bool {
        if let Some(token) = &self.cancel {
            if token.load(Ordering::Acquire) {
                return true;
            }
        }
        matches!(self.deadline, Some(d) if Instant::now() >= d)
    }

    /// Returns `errCanceled` if the token fired or the deadline elapsed.
    pub fn check(&self) -> Result<()> {
        if let Some(token) = &self.cancel {
            if token.load(Ordering::Acquire) {
                return Err(Error::canceled("operation cancelled").into());
            }
        }
        if let Some(deadline) = self.deadline {
            if Instant::now() >= deadline {
                return Err(Error::canceled("deadline exceeded").into());
            }
        }
        Ok(())
    }
}
