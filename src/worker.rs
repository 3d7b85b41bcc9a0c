use crate::log_debug;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tracing::Instrument;

type TaskFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

struct Task {
    id: usize,
    fut: TaskFuture,
}

/// A fixed-width cooperative task pool.
///
/// Workers pull tasks off a shared queue; each task runs inside a span
/// carrying its monotonically increasing id so log lines are tagged. Tasks
/// publish their own outcomes; the pool owns no result channel.
pub struct WorkerPool {
    worker_count: usize,
    next_task_id: AtomicUsize,
    tx: mpsc::UnboundedSender<Task>,
    rx: Arc<Mutex<mpsc::UnboundedReceiver<Task>>>,
}

impl WorkerPool {
    pub fn new(worker_count: usize) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        WorkerPool {
            worker_count,
            next_task_id: AtomicUsize::new(1),
            tx,
            rx: Arc::new(Mutex::new(rx)),
        }
    }

    /// Spawns the workers; call once before adding tasks.
    pub fn start(&self) {
        for worker_id in 1..=self.worker_count {
            log_debug!("Created worker {}", worker_id);
            let rx = Arc::clone(&self.rx);
            tokio::spawn(async move {
                loop {
                    let task = { rx.lock().await.recv().await };
                    let Some(task) = task else {
                        break;
                    };
                    log_debug!("Worker {} started processing task {}", worker_id, task.id);
                    let span = tracing::info_span!("task", task_id = task.id);
                    task.fut.instrument(span).await;
                    log_debug!("Worker {} finished processing task {}", worker_id, task.id);
                }
            });
        }
    }

    /// Enqueues a task and returns its assigned id.
    pub fn add_task<F>(&self, fut: F) -> usize
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let id = self.next_task_id.fetch_add(1, Ordering::SeqCst);
        // send only fails when all workers are gone, which means shutdown
        let _ = self.tx.send(Task {
            id,
            fut: Box::pin(fut),
        });
        id
    }
}
