//! Reference-counted "loading" indicator.
//!
//! Every network round trip holds a [`LoadingGuard`]; the indicator stays
//! visible while at least one guard is alive, whichever way the holder exits.

use std::sync::Arc;

use tokio::sync::watch;

#[derive(Debug, Clone)]
pub struct LoadingIndicator {
    depth: Arc<watch::Sender<usize>>,
}

impl LoadingIndicator {
    pub fn new() -> Self {
        Self {
            depth: Arc::new(watch::channel(0).0),
        }
    }

    pub fn begin(&self) -> LoadingGuard {
        self.depth.send_modify(|d| *d += 1);
        LoadingGuard {
            depth: self.depth.clone(),
        }
    }

    pub fn depth(&self) -> usize {
        *self.depth.borrow()
    }

    pub fn is_visible(&self) -> bool {
        self.depth() > 0
    }

    /// Watch the nesting depth; the presentation side shows the indicator
    /// while it is non-zero.
    pub fn watch(&self) -> watch::Receiver<usize> {
        self.depth.subscribe()
    }
}

impl Default for LoadingIndicator {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug)]
#[must_use = "the indicator is released as soon as the guard is dropped"]
pub struct LoadingGuard {
    depth: Arc<watch::Sender<usize>>,
}

impl Drop for LoadingGuard {
    fn drop(&mut self) {
        self.depth.send_modify(|d| *d = d.saturating_sub(1));
    }
}
