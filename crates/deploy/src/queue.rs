//! Keyed FIFO task queue.
//!
//! Items sharing a key are processed one at a time, in submission order.
//! Items with different keys run concurrently. A key is present in the
//! internal map exactly while a drain task owns it, and the drain task only
//! removes the key under the same lock it uses to find the queue empty, so an
//! item enqueued while the previous one finishes is never left behind.

use std::{
    collections::{HashMap, VecDeque, hash_map::Entry},
    fmt::Debug,
    future::Future,
    hash::Hash,
    panic::AssertUnwindSafe,
    sync::Arc,
};

use futures::{FutureExt, future::BoxFuture};
use thiserror::Error;
use tokio::sync::{Mutex, oneshot};
use tokio_util::sync::CancellationToken;

/// Async processor applied to every item.
pub type Processor<T, R, E> = Arc<dyn Fn(T) -> BoxFuture<'static, Result<R, E>> + Send + Sync>;

/// Why a queued item did not produce a result.
#[derive(Debug, Error)]
pub enum TaskError<E> {
    /// The processor returned an error.
    #[error("{0}")]
    Failed(E),

    /// The processor panicked or the queue went away before replying.
    #[error("Task dropped before completion")]
    Dropped,

    /// The queue was cancelled before the item started.
    #[error("Task cancelled")]
    Cancelled,
}

/// Receiver for the result of a submitted item.
pub type TaskHandle<R, E> = oneshot::Receiver<Result<R, TaskError<E>>>;

struct Pending<T, R, E> {
    item: T,
    reply: oneshot::Sender<Result<R, TaskError<E>>>,
}

struct Inner<K, T, R, E> {
    queues: Mutex<HashMap<K, VecDeque<Pending<T, R, E>>>>,
    processor: Processor<T, R, E>,
    cancel: CancellationToken,
}

/// A queue that serializes work per key.
pub struct TaskQueue<K, T, R, E> {
    inner: Arc<Inner<K, T, R, E>>,
}

impl<K, T, R, E> Clone for TaskQueue<K, T, R, E> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<K, T, R, E> TaskQueue<K, T, R, E>
where
    K: Eq + Hash + Clone + Debug + Send + Sync + 'static,
    T: Send + 'static,
    R: Send + 'static,
    E: Send + 'static,
{
    /// Create a queue that runs `processor` on every item.
    pub fn new<F, Fut>(processor: F) -> Self
    where
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, E>> + Send + 'static,
    {
        let processor: Processor<T, R, E> = Arc::new(move |item| processor(item).boxed());
        Self {
            inner: Arc::new(Inner {
                queues: Mutex::new(HashMap::new()),
                processor,
                cancel: CancellationToken::new(),
            }),
        }
    }

    /// Append `item` to the queue for `key` and return a handle to its result.
    ///
    /// Items are ordered by the completion of this call, so callers that need
    /// a specific order must await submissions one after another.
    pub async fn submit(&self, key: K, item: T) -> Result<TaskHandle<R, E>, TaskError<E>> {
        if self.inner.cancel.is_cancelled() {
            return Err(TaskError::Cancelled);
        }

        let (reply, handle) = oneshot::channel();
        let pending = Pending { item, reply };

        let mut queues = self.inner.queues.lock().await;
        match queues.entry(key.clone()) {
            Entry::Occupied(mut entry) => {
                entry.get_mut().push_back(pending);
                tracing::trace!(?key, queued = entry.get().len(), "Task queued behind in-flight work");
            }
            Entry::Vacant(entry) => {
                entry.insert(VecDeque::from([pending]));
                tracing::trace!(?key, "Starting drain task");
                tokio::spawn(Self::drain(self.inner.clone(), key));
            }
        }

        Ok(handle)
    }

    /// Enqueue `item` and wait for its result.
    pub async fn enqueue(&self, key: K, item: T) -> Result<R, TaskError<E>> {
        let handle = self.submit(key, item).await?;
        wait(handle).await
    }

    /// Stop accepting items.
    ///
    /// The item currently running for each key finishes. Items still waiting
    /// are rejected with [`TaskError::Cancelled`].
    pub fn cancel(&self) {
        tracing::debug!("Cancelling task queue");
        self.inner.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancel.is_cancelled()
    }

    /// Keys that currently have a drain task.
    pub async fn in_flight_keys(&self) -> Vec<K> {
        self.inner.queues.lock().await.keys().cloned().collect()
    }

    async fn drain(inner: Arc<Inner<K, T, R, E>>, key: K) {
        loop {
            let next = {
                let mut queues = inner.queues.lock().await;
                let Some(queue) = queues.get_mut(&key) else {
                    return;
                };
                match queue.pop_front() {
                    Some(next) => next,
                    None => {
                        queues.remove(&key);
                        tracing::trace!(?key, "Drain task finished");
                        return;
                    }
                }
            };

            if inner.cancel.is_cancelled() {
                let _ = next.reply.send(Err(TaskError::Cancelled));
                continue;
            }

            let result = match AssertUnwindSafe((inner.processor)(next.item))
                .catch_unwind()
                .await
            {
                Ok(result) => result.map_err(TaskError::Failed),
                Err(_) => {
                    tracing::error!(?key, "Task processor panicked");
                    Err(TaskError::Dropped)
                }
            };

            // The submitter may have stopped waiting.
            let _ = next.reply.send(result);
        }
    }
}

/// Wait on a handle returned by [`TaskQueue::submit`].
pub async fn wait<R, E>(handle: TaskHandle<R, E>) -> Result<R, TaskError<E>> {
    handle.await.unwrap_or(Err(TaskError::Dropped))
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{
            Mutex as StdMutex,
            atomic::{AtomicUsize, Ordering},
        },
        time::Duration,
    };

    use tokio::sync::{Barrier, Notify};

    use super::*;

    type Events = Arc<StdMutex<Vec<String>>>;

    /// The drain task removes its key right after the last reply, poll until it has.
    async fn wait_idle<K, T, R, E>(queue: &TaskQueue<K, T, R, E>)
    where
        K: Eq + Hash + Clone + Debug + Send + Sync + 'static,
        T: Send + 'static,
        R: Send + 'static,
        E: Send + 'static,
    {
        for _ in 0..100 {
            if queue.in_flight_keys().await.is_empty() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("queue never became idle");
    }

    fn recording_queue(events: Events) -> TaskQueue<&'static str, u32, u32, String> {
        TaskQueue::new(move |item: u32| {
            let events = events.clone();
            async move {
                events.lock().unwrap().push(format!("start {item}"));
                tokio::time::sleep(Duration::from_millis(10)).await;
                events.lock().unwrap().push(format!("end {item}"));
                Ok(item * 2)
            }
        })
    }

    #[tokio::test]
    async fn test_same_key_runs_in_order_without_overlap() {
        let events: Events = Arc::default();
        let queue = recording_queue(events.clone());

        let mut handles = Vec::new();
        for item in 1..=3 {
            handles.push(queue.submit("a", item).await.unwrap());
        }
        let mut results = Vec::new();
        for handle in handles {
            results.push(wait(handle).await.unwrap());
        }

        assert_eq!(results, vec![2, 4, 6]);
        assert_eq!(
            *events.lock().unwrap(),
            vec!["start 1", "end 1", "start 2", "end 2", "start 3", "end 3"]
        );
        wait_idle(&queue).await;
    }

    #[tokio::test]
    async fn test_different_keys_run_concurrently() {
        let barrier = Arc::new(Barrier::new(2));
        let queue: TaskQueue<u64, u64, u64, String> = TaskQueue::new(move |item| {
            let barrier = barrier.clone();
            async move {
                // Both keys must be in flight at once to get past the barrier.
                barrier.wait().await;
                Ok(item)
            }
        });

        let a = queue.enqueue(10, 1);
        let b = queue.enqueue(20, 2);
        let (a, b) = tokio::time::timeout(Duration::from_secs(5), async { tokio::join!(a, b) })
            .await
            .expect("keys were serialized");

        assert_eq!(a.unwrap(), 1);
        assert_eq!(b.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_failure_does_not_block_key() {
        let queue: TaskQueue<&str, u32, u32, String> = TaskQueue::new(|item: u32| async move {
            if item == 1 {
                Err("boom".to_string())
            } else {
                Ok(item)
            }
        });

        let first = queue.submit("a", 1).await.unwrap();
        let second = queue.submit("a", 2).await.unwrap();

        assert!(matches!(wait(first).await, Err(TaskError::Failed(ref e)) if e == "boom"));
        assert_eq!(wait(second).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_panicking_processor_is_isolated() {
        let queue: TaskQueue<&str, u32, u32, String> = TaskQueue::new(|item: u32| async move {
            if item == 1 {
                panic!("processor bug");
            }
            Ok(item)
        });

        let first = queue.submit("a", 1).await.unwrap();
        let second = queue.submit("a", 2).await.unwrap();

        assert!(matches!(wait(first).await, Err(TaskError::Dropped)));
        assert_eq!(wait(second).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_cancel_lets_current_item_finish() {
        let release = Arc::new(Notify::new());
        let started = Arc::new(Notify::new());
        let queue: TaskQueue<&str, u32, u32, String> = {
            let release = release.clone();
            let started = started.clone();
            TaskQueue::new(move |item: u32| {
                let release = release.clone();
                let started = started.clone();
                async move {
                    started.notify_one();
                    release.notified().await;
                    Ok(item)
                }
            })
        };

        let first = queue.submit("a", 1).await.unwrap();
        let second = queue.submit("a", 2).await.unwrap();
        let third = queue.submit("a", 3).await.unwrap();

        started.notified().await;
        queue.cancel();
        assert!(queue.is_cancelled());
        release.notify_one();

        assert_eq!(wait(first).await.unwrap(), 1);
        assert!(matches!(wait(second).await, Err(TaskError::Cancelled)));
        assert!(matches!(wait(third).await, Err(TaskError::Cancelled)));
        assert!(matches!(queue.enqueue("a", 4).await, Err(TaskError::Cancelled)));
        assert!(matches!(queue.enqueue("b", 5).await, Err(TaskError::Cancelled)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_no_item_missed_while_key_drains() {
        let processed = Arc::new(AtomicUsize::new(0));
        let queue: TaskQueue<u8, usize, usize, String> = {
            let processed = processed.clone();
            TaskQueue::new(move |item: usize| {
                let processed = processed.clone();
                async move {
                    processed.fetch_add(1, Ordering::SeqCst);
                    tokio::task::yield_now().await;
                    Ok(item)
                }
            })
        };

        let mut tasks = Vec::new();
        for i in 0..200 {
            let queue = queue.clone();
            tasks.push(tokio::spawn(async move { queue.enqueue((i % 3) as u8, i).await }));
        }
        for (i, task) in tasks.into_iter().enumerate() {
            let result = tokio::time::timeout(Duration::from_secs(5), task)
                .await
                .expect("item was never processed")
                .unwrap();
            assert_eq!(result.unwrap(), i);
        }

        assert_eq!(processed.load(Ordering::SeqCst), 200);
        wait_idle(&queue).await;
    }
}
