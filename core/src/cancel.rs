//! Cooperative cancellation for a pipeline run.
//!
//! Long-running steps (optimizers, scoring loops) poll the token
//! between iterations. A cancelled run returns Cancelled before any
//! artifact is committed.
//!
//! A child token sees its parent's cancellation, but cancelling the
//! child leaves the parent untouched. Parallel stages share a child so
//! one failing stage can stop its sibling without touching the caller.

use crate::error::{EngineError, EngineResult};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag:   Arc<AtomicBool>,
    parent: Option<Arc<CancelToken>>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn child(&self) -> Self {
        Self {
            flag:   Arc::default(),
            parent: Some(Arc::new(self.clone())),
        }
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
            || self.parent.as_ref().is_some_and(|p| p.is_cancelled())
    }

    pub fn check(&self, stage: &'static str) -> EngineResult<()> {
        if self.is_cancelled() {
            Err(EngineError::Cancelled { stage })
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn child_sees_parent_but_not_the_reverse() {
        let parent = CancelToken::new();
        let child = parent.child();
        let sibling = child.clone();

        child.cancel();
        assert!(sibling.is_cancelled(), "clones share the flag");
        assert!(!parent.is_cancelled());

        let other = parent.child();
        parent.cancel();
        assert!(other.is_cancelled());
        assert!(matches!(other.check("x"), Err(EngineError::Cancelled { stage: "x" })));
    }
}
