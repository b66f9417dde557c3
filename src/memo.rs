use std::{
    collections::HashMap,
    hash::Hash,
    sync::{Arc, Mutex, PoisonError},
};

use tokio::sync::OnceCell;

/// Write-once map shared between concurrent probe workers.
///
/// The first caller for a key runs the initializer; concurrent callers for the
/// same key wait for it and read the same value. A stored value is never replaced.
#[derive(Debug)]
pub struct Memo<K, V> {
    cells: Mutex<HashMap<K, Arc<OnceCell<V>>>>,
}

impl<K, V> Default for Memo<K, V> {
    fn default() -> Self {
        Self {
            cells: Mutex::new(HashMap::new()),
        }
    }
}

impl<K, V> Memo<K, V>
where
    K: Eq + Hash,
    V: Clone,
{
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get_or_init<F, Fut>(&self, key: K, init: F) -> V
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = V>,
    {
        let cell = self
            .cells
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(key)
            .or_default()
            .clone();

        cell.get_or_init(init).await.clone()
    }

    /// Value for `key` if it has been computed already
    pub fn get(&self, key: &K) -> Option<V> {
        self.cells
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .and_then(|cell| cell.get().cloned())
    }

    /// All computed entries. Keys whose initializer never finished are left out.
    pub fn snapshot(&self) -> Vec<(K, V)>
    where
        K: Clone,
    {
        self.cells
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter_map(|(k, cell)| cell.get().map(|v| (k.clone(), v.clone())))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::atomic::{AtomicUsize, Ordering},
        time::Duration,
    };

    use super::*;

    #[tokio::test]
    async fn initializes_once_under_contention() {
        let memo = Arc::new(Memo::<&'static str, usize>::new());
        let calls = Arc::new(AtomicUsize::new(0));

        let mut tasks = tokio::task::JoinSet::new();
        for _ in 0..32 {
            let memo = memo.clone();
            let calls = calls.clone();
            tasks.spawn(async move {
                memo.get_or_init("live1.example:80", || async {
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    calls.fetch_add(1, Ordering::SeqCst) + 100
                })
                .await
            });
        }

        let values = tasks.join_all().await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(values.iter().all(|v| *v == 100));
    }

    #[tokio::test]
    async fn first_writer_wins() {
        let memo = Memo::new();
        assert_eq!(memo.get(&1), None);
        assert_eq!(memo.get_or_init(1, || async { "first" }).await, "first");
        assert_eq!(memo.get_or_init(1, || async { "second" }).await, "first");
        assert_eq!(memo.get(&1), Some("first"));
        assert_eq!(memo.snapshot(), vec![(1, "first")]);
    }
}
