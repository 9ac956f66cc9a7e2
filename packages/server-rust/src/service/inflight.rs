//! In-flight call tracking for group teardown.
//!
//! Every tracked call owns an [`InFlightGuard`] for its whole lifetime. The
//! guard registers an [`InFlightCall`] in the arena on creation and removes it
//! on drop, even when the call panics or its task is aborted. Teardown cancels
//! every outstanding token and waits for the arena to drain.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::Notify;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Record of one running call.
#[derive(Debug)]
pub struct InFlightCall {
    pub id: u64,
    pub operation: String,
    pub started_at: Instant,
    token: CancellationToken,
}

/// Point-in-time view of a running call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InFlightSnapshot {
    pub id: u64,
    pub operation: String,
    pub elapsed: Duration,
}

/// Arena of running calls, keyed by a monotonically increasing id.
#[derive(Debug, Default)]
pub struct InFlightCalls {
    next_id: AtomicU64,
    calls: DashMap<u64, InFlightCall>,
    drained: Notify,
}

impl InFlightCalls {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a call and returns the guard that owns its record.
    #[must_use]
    pub fn begin(self: &Arc<Self>, operation: &str) -> InFlightGuard {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let token = CancellationToken::new();
        self.calls.insert(
            id,
            InFlightCall {
                id,
                operation: operation.to_string(),
                started_at: Instant::now(),
                token: token.clone(),
            },
        );
        InFlightGuard {
            arena: Arc::clone(self),
            id,
            token,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.calls.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    /// Running calls, oldest first.
    #[must_use]
    pub fn snapshot(&self) -> Vec<InFlightSnapshot> {
        let mut calls: Vec<_> = self
            .calls
            .iter()
            .map(|entry| InFlightSnapshot {
                id: entry.id,
                operation: entry.operation.clone(),
                elapsed: entry.started_at.elapsed(),
            })
            .collect();
        calls.sort_by_key(|c| c.id);
        calls
    }

    /// Cancels every running call. Returns how many were signalled.
    pub fn cancel_all(&self) -> usize {
        let mut cancelled = 0;
        for entry in &self.calls {
            if !entry.token.is_cancelled() {
                entry.token.cancel();
                cancelled += 1;
            }
        }
        cancelled
    }

    /// Waits until no call is registered.
    pub async fn drain(&self) {
        loop {
            let notified = self.drained.notified();
            if self.calls.is_empty() {
                return;
            }
            notified.await;
        }
    }

    /// Cancels every running call and waits for the arena to drain.
    pub async fn cancel_all_and_drain(&self) -> usize {
        let cancelled = self.cancel_all();
        self.drain().await;
        cancelled
    }

    fn finish(&self, id: u64) {
        self.calls.remove(&id);
        if self.calls.is_empty() {
            self.drained.notify_waiters();
        }
    }
}

/// RAII handle for one tracked call.
#[derive(Debug)]
pub struct InFlightGuard {
    arena: Arc<InFlightCalls>,
    id: u64,
    token: CancellationToken,
}

impl InFlightGuard {
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Token cancelled when the owning group tears down.
    #[must_use]
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.arena.finish(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guard_registers_and_removes() {
        let arena = Arc::new(InFlightCalls::new());
        let a = arena.begin("sleep");
        let b = arena.begin("echo");
        assert_eq!(arena.len(), 2);

        let names: Vec<_> = arena.snapshot().into_iter().map(|c| c.operation).collect();
        assert_eq!(names, vec!["sleep", "echo"]);

        drop(a);
        assert_eq!(arena.len(), 1);
        drop(b);
        assert!(arena.is_empty());
    }

    #[test]
    fn ids_are_unique() {
        let arena = Arc::new(InFlightCalls::new());
        let a = arena.begin("x");
        let b = arena.begin("x");
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn cancel_all_signals_tokens_once() {
        let arena = Arc::new(InFlightCalls::new());
        let guard = arena.begin("sleep");
        assert_eq!(arena.cancel_all(), 1);
        assert!(guard.token().is_cancelled());
        assert_eq!(arena.cancel_all(), 0);
    }

    #[tokio::test]
    async fn drain_returns_immediately_when_empty() {
        let arena = InFlightCalls::new();
        arena.drain().await;
    }

    #[tokio::test]
    async fn cancel_and_drain_waits_for_guards() {
        let arena = Arc::new(InFlightCalls::new());
        let guard = arena.begin("slow_counter");

        let worker = tokio::spawn(async move {
            guard.token().cancelled().await;
            drop(guard);
        });

        let cancelled = arena.cancel_all_and_drain().await;
        assert_eq!(cancelled, 1);
        assert!(arena.is_empty());
        worker.await.unwrap();
    }
}
