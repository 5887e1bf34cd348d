use std::future::Future;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::multi_error::MultiError;

// ---------------------------------------------------------------------------
// TaskSet — cancellation-linked fan-out of concurrent activities
// ---------------------------------------------------------------------------

/// A cancellation-linked set of concurrent activities.
///
/// Members are spawned with [`spawn`](Self::spawn) and report a
/// [`MultiError`]; the first member to finish with a non-empty aggregate
/// cancels the shared token, asking its siblings to wind down.
/// [`wait`](Self::wait) joins every member and merges their aggregates in
/// spawn order.
pub struct TaskSet {
    cancel: CancellationToken,
    handles: Vec<JoinHandle<MultiError>>,
}

impl TaskSet {
    /// Create a set whose members observe `cancel`. Cancelling the token
    /// from outside (e.g. on an OS signal) also winds the members down.
    pub fn new(cancel: CancellationToken) -> Self {
        Self {
            cancel,
            handles: Vec::new(),
        }
    }

    /// Clone of the token the members observe.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Spawn a member activity. A member finishing with recorded failures
    /// cancels the whole set.
    pub fn spawn<F>(&mut self, fut: F)
    where
        F: Future<Output = MultiError> + Send + 'static,
    {
        let cancel = self.cancel.clone();
        self.handles.push(tokio::spawn(async move {
            let mu = fut.await;
            if !mu.is_empty() {
                cancel.cancel();
            }
            mu
        }));
    }

    /// Join all members and merge their aggregates. The token is cancelled
    /// on return so nothing keeps waiting on a finished set.
    pub async fn wait(self) -> MultiError {
        let mut merged = MultiError::new();
        for handle in self.handles {
            match handle.await {
                Ok(mu) => merged.merge(mu),
                Err(e) => merged.push(anyhow::anyhow!("task join error: {e}")),
            }
        }
        self.cancel.cancel();
        merged
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn all_members_settle_before_wait_returns() {
        let mut set = TaskSet::new(CancellationToken::new());
        for _ in 0..4 {
            set.spawn(async {
                tokio::time::sleep(Duration::from_millis(5)).await;
                MultiError::new()
            });
        }
        let mu = set.wait().await;
        assert!(mu.is_empty());
    }

    #[tokio::test]
    async fn first_failure_cancels_siblings() {
        let mut set = TaskSet::new(CancellationToken::new());
        let cancel = set.cancel_token();

        let observer = cancel.clone();
        set.spawn(async move {
            let mut mu = MultiError::new();
            // A healthy sibling that only finishes once cancelled.
            tokio::select! {
                _ = observer.cancelled() => {}
                _ = tokio::time::sleep(Duration::from_secs(30)) => {
                    mu.push(anyhow::anyhow!("sibling was never cancelled"));
                }
            }
            mu
        });
        set.spawn(async {
            MultiError::from(anyhow::anyhow!("boom"))
        });

        let mu = tokio::time::timeout(Duration::from_secs(5), set.wait())
            .await
            .expect("wait should settle promptly after the failure");
        assert_eq!(mu.len(), 1);
        assert!(cancel.is_cancelled());
    }

    #[tokio::test]
    async fn external_cancellation_reaches_members() {
        let token = CancellationToken::new();
        let mut set = TaskSet::new(token.clone());
        let observer = token.clone();
        set.spawn(async move {
            observer.cancelled().await;
            MultiError::new()
        });

        token.cancel();
        let mu = tokio::time::timeout(Duration::from_secs(5), set.wait())
            .await
            .expect("cancelled member should settle");
        assert!(mu.is_empty());
    }
}
