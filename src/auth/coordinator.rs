use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::{BoxFuture, FutureExt, Shared};
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use crate::error::RefreshError;

use super::types::Scope;

/// Result every waiter on a shared refresh observes
pub type RefreshOutcome = Result<String, RefreshError>;

type PendingRefresh = Shared<BoxFuture<'static, RefreshOutcome>>;

/// Single-flight token refresh, one in-flight call per scope
///
/// Owned by a client instance, so separate clients never share refreshes.
/// The pending handle is removed by the refresh future itself once it
/// settles, panics included, so a later 401 starts a fresh attempt.
#[derive(Clone, Default)]
pub struct RefreshCoordinator {
    pending: Arc<DashMap<Scope, PendingRefresh>>,
}

impl RefreshCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a refresh is currently outstanding for `scope`
    pub fn in_flight(&self, scope: Scope) -> bool {
        self.pending.contains_key(&scope)
    }

    /// Await the scope's refresh, starting it with `make` if none is in flight
    ///
    /// `make` is only called by the task that installs the handle. The
    /// check and the install happen under one map entry lock with no await
    /// in between.
    pub async fn run<F, Fut>(&self, scope: Scope, make: F) -> RefreshOutcome
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = RefreshOutcome> + Send + 'static,
    {
        let pending = match self.pending.entry(scope) {
            Entry::Occupied(entry) => {
                tracing::debug!(scope = %scope, "Joining in-flight token refresh");
                entry.get().clone()
            }
            Entry::Vacant(entry) => {
                tracing::debug!(scope = %scope, "Starting token refresh");
                let registry = Arc::clone(&self.pending);
                let refresh = make();
                let shared = async move {
                    let outcome = AssertUnwindSafe(refresh)
                        .catch_unwind()
                        .await
                        .unwrap_or_else(|panic| {
                            Err(RefreshError::Aborted(panic_message(panic.as_ref())))
                        });
                    registry.remove(&scope);
                    outcome
                }
                .boxed()
                .shared();
                entry.insert(shared.clone());
                shared
            }
        };

        pending.await
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "refresh task panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn counting_refresh(
        calls: &Arc<AtomicUsize>,
        outcome: RefreshOutcome,
    ) -> impl FnOnce() -> BoxFuture<'static, RefreshOutcome> {
        let calls = Arc::clone(calls);
        move || {
            calls.fetch_add(1, Ordering::SeqCst);
            async move {
                tokio::time::sleep(Duration::from_millis(50)).await;
                outcome
            }
            .boxed()
        }
    }

    #[tokio::test]
    async fn test_concurrent_waiters_share_one_refresh() {
        let coordinator = RefreshCoordinator::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let waiters = (0..5).map(|_| {
            coordinator.run(
                Scope::Admin,
                counting_refresh(&calls, Ok("new-token".to_string())),
            )
        });
        let results = futures::future::join_all(waiters).await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(results.iter().all(|r| r.as_deref() == Ok("new-token")));
        assert!(!coordinator.in_flight(Scope::Admin));
    }

    #[tokio::test]
    async fn test_handle_cleared_after_failure() {
        let coordinator = RefreshCoordinator::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let first = coordinator
            .run(
                Scope::Employee,
                counting_refresh(&calls, Err(RefreshError::MissingAccessToken)),
            )
            .await;
        assert_eq!(first, Err(RefreshError::MissingAccessToken));
        assert!(!coordinator.in_flight(Scope::Employee));

        let second = coordinator
            .run(
                Scope::Employee,
                counting_refresh(&calls, Ok("retry-token".to_string())),
            )
            .await;
        assert_eq!(second.as_deref(), Ok("retry-token"));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_panicking_refresh_clears_handle() {
        let coordinator = RefreshCoordinator::new();

        let first = coordinator
            .run(Scope::Admin, || async {
                if true {
                    panic!("token slice out of bounds");
                }
                Ok::<_, RefreshError>("unreachable".to_string())
            })
            .await;
        assert_eq!(
            first,
            Err(RefreshError::Aborted("token slice out of bounds".to_string()))
        );
        assert!(!coordinator.in_flight(Scope::Admin));

        let calls = Arc::new(AtomicUsize::new(0));
        let second = coordinator
            .run(Scope::Admin, counting_refresh(&calls, Ok("recovered".to_string())))
            .await;
        assert_eq!(second.as_deref(), Ok("recovered"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_scopes_refresh_independently() {
        let coordinator = RefreshCoordinator::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let (admin, employee) = tokio::join!(
            coordinator.run(Scope::Admin, counting_refresh(&calls, Ok("a".to_string()))),
            coordinator.run(Scope::Employee, counting_refresh(&calls, Ok("e".to_string()))),
        );

        assert_eq!(admin.as_deref(), Ok("a"));
        assert_eq!(employee.as_deref(), Ok("e"));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_separate_coordinators_do_not_interfere() {
        let first = RefreshCoordinator::new();
        let second = RefreshCoordinator::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let _ = tokio::join!(
            first.run(Scope::Admin, counting_refresh(&calls, Ok("1".to_string()))),
            second.run(Scope::Admin, counting_refresh(&calls, Ok("2".to_string()))),
        );

        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_single_flight_across_threads() {
        let coordinator = RefreshCoordinator::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let barrier = Arc::new(tokio::sync::Barrier::new(8));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let coordinator = coordinator.clone();
                let calls = Arc::clone(&calls);
                let barrier = Arc::clone(&barrier);
                tokio::spawn(async move {
                    barrier.wait().await;
                    coordinator
                        .run(Scope::Admin, move || {
                            calls.fetch_add(1, Ordering::SeqCst);
                            async {
                                tokio::time::sleep(Duration::from_millis(200)).await;
                                Ok::<_, RefreshError>("shared".to_string())
                            }
                        })
                        .await
                })
            })
            .collect();

        for handle in handles {
            assert_eq!(handle.await.unwrap().as_deref(), Ok("shared"));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
