//! Termination signal of a single session.
//!
//! A session is done once its driver finished (closed, aborted or given up
//! after its watcher failed) and its watcher task exited. Each part reports
//! exactly once; reporting twice is a bug and panics.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use tokio::sync::watch;

#[derive(Debug)]
struct Inner {
    driver_finished: AtomicBool,
    watcher_exited: AtomicBool,
    fired: watch::Sender<bool>,
}

/// Shared between the session driver, its watcher and whoever waits.
#[derive(Debug, Clone)]
pub struct Completion {
    inner: Arc<Inner>,
}

impl Default for Completion {
    fn default() -> Self {
        Self::new()
    }
}

impl Completion {
    pub fn new() -> Self {
        let (fired, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                driver_finished: AtomicBool::new(false),
                watcher_exited: AtomicBool::new(false),
                fired,
            }),
        }
    }

    pub fn driver_finished(&self) {
        Self::report(&self.inner.driver_finished, "driver_finished");
        self.fire_if_complete();
    }

    pub fn watcher_exited(&self) {
        Self::report(&self.inner.watcher_exited, "watcher_exited");
        self.fire_if_complete();
    }

    fn report(flag: &AtomicBool, part: &str) {
        if flag.swap(true, Ordering::AcqRel) {
            panic!("completion part {part} reported twice");
        }
    }

    fn fire_if_complete(&self) {
        if self.inner.driver_finished.load(Ordering::Acquire)
            && self.inner.watcher_exited.load(Ordering::Acquire)
        {
            // Both reporters may see both flags set, only the first flip counts.
            self.inner.fired.send_if_modified(|fired| !std::mem::replace(fired, true));
        }
    }

    pub fn is_done(&self) -> bool {
        *self.inner.fired.borrow()
    }

    /// Resolves once both parts reported.
    pub async fn wait(&self) {
        let mut rx = self.inner.fired.subscribe();
        // The sender lives in `self`, so `changed` cannot fail while we wait.
        while !*rx.borrow_and_update() {
            if rx.changed().await.is_err() {
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn fires_after_both_parts() {
        let c = Completion::new();
        let waiter = tokio::spawn({
            let c = c.clone();
            async move { c.wait().await }
        });

        c.driver_finished();
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert!(!c.is_done());
        assert!(!waiter.is_finished());

        c.watcher_exited();
        waiter.await.unwrap();
        assert!(c.is_done());
        // Waiting after the fact returns immediately.
        c.wait().await;
    }

    #[test]
    #[should_panic(expected = "reported twice")]
    fn double_report_panics() {
        let c = Completion::new();
        c.watcher_exited();
        c.watcher_exited();
    }
}
