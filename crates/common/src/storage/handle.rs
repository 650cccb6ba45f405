use std::fmt;
use std::future::Future;
use std::sync::Arc;

use tokio::sync::OnceCell;

use super::BackendError;

/// A lazily constructed, shared backend client.
///
/// The first caller runs the factory; everyone else waits for and then
/// shares its outcome. A failed construction is cached too, so a backend
/// that can't start in this process reports [`BackendError::Unsupported`]
/// from then on instead of retrying on every request.
pub struct LazyHandle<T> {
    name: &'static str,
    cell: OnceCell<Result<Arc<T>, String>>,
}

impl<T> fmt::Debug for LazyHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self.cell.get() {
            None => "uninitialized",
            Some(Ok(_)) => "ready",
            Some(Err(_)) => "unsupported",
        };
        f.debug_struct("LazyHandle")
            .field("name", &self.name)
            .field("state", &state)
            .finish()
    }
}

impl<T> LazyHandle<T> {
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            cell: OnceCell::const_new(),
        }
    }

    /// Get the shared client, constructing it on first use.
    pub async fn get_or_init<F, Fut, E>(&self, factory: F) -> Result<Arc<T>, BackendError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: fmt::Display,
    {
        let outcome = self
            .cell
            .get_or_init(|| async move {
                match factory().await {
                    Ok(client) => {
                        tracing::debug!(backend = self.name, "backend client initialized");
                        Ok(Arc::new(client))
                    }
                    Err(err) => {
                        tracing::warn!(backend = self.name, error = %err, "backend client unavailable");
                        Err(err.to_string())
                    }
                }
            })
            .await;

        match outcome {
            Ok(client) => Ok(client.clone()),
            Err(reason) => Err(BackendError::Unsupported(format!("{}: {}", self.name, reason))),
        }
    }

    /// The client if it was already constructed successfully.
    pub fn get(&self) -> Option<Arc<T>> {
        match self.cell.get() {
            Some(Ok(client)) => Some(client.clone()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[tokio::test]
    async fn test_factory_runs_once() {
        let handle: LazyHandle<u32> = LazyHandle::new("test");
        let calls = AtomicUsize::new(0);

        for _ in 0..3 {
            let value = handle
                .get_or_init(|| async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, String>(7)
                })
                .await
                .unwrap();
            assert_eq!(*value, 7);
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(handle.get().as_deref(), Some(&7));
    }

    #[tokio::test]
    async fn test_failure_is_cached_as_unsupported() {
        let handle: LazyHandle<u32> = LazyHandle::new("swarm");
        let calls = AtomicUsize::new(0);

        for _ in 0..2 {
            let result = handle
                .get_or_init(|| async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err::<u32, _>("no udp sockets")
                })
                .await;
            assert!(matches!(result, Err(BackendError::Unsupported(_))));
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(handle.get().is_none());
        assert!(format!("{:?}", handle).contains("unsupported"));
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_client() {
        let handle: Arc<LazyHandle<String>> = Arc::new(LazyHandle::new("shared"));

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let handle = handle.clone();
                tokio::spawn(async move {
                    handle
                        .get_or_init(|| async {
                            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
                            Ok::<_, String>("client".to_string())
                        })
                        .await
                        .unwrap()
                })
            })
            .collect();

        let first = handle.get_or_init(|| async { Ok::<_, String>("other".into()) }).await.unwrap();
        for task in tasks {
            let client = task.await.unwrap();
            assert!(Arc::ptr_eq(&client, &first));
        }
    }
}
