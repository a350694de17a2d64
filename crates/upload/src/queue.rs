//! Bounded job queue
//!
//! A fixed-capacity FIFO between any number of producers and a single
//! consumer task, built on flume. Senders wait while the queue is full, the
//! receiver waits while it is empty, and the queue closes once every sender
//! has been dropped: the receiver still drains whatever was enqueued before
//! it observes the close.

/// Create a queue holding at most `capacity` jobs
pub fn bounded<T>(capacity: usize) -> (JobSender<T>, JobReceiver<T>) {
    tracing::debug!("creating bounded job queue with capacity {}", capacity);
    let (tx, rx) = flume::bounded(capacity);
    (JobSender { tx }, JobReceiver { rx })
}

#[derive(Debug, thiserror::Error)]
#[error("job receiver has been dropped")]
pub struct QueueClosed;

/// Producer side; clone it freely
#[derive(Debug)]
pub struct JobSender<T> {
    tx: flume::Sender<T>,
}

impl<T> Clone for JobSender<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<T> JobSender<T> {
    /// Enqueue a job, waiting for space if the queue is full
    pub async fn send(&self, job: T) -> Result<(), QueueClosed> {
        self.tx.send_async(job).await.map_err(|_| QueueClosed)
    }

    /// Number of jobs waiting to be received
    pub fn queued(&self) -> usize {
        self.tx.len()
    }
}

/// Consumer side, owned by the worker task
#[derive(Debug)]
pub struct JobReceiver<T> {
    rx: flume::Receiver<T>,
}

impl<T> JobReceiver<T> {
    /// Receive the next job
    ///
    /// Returns None once all senders have been dropped and the queue is empty.
    pub async fn recv(&self) -> Option<T> {
        self.rx.recv_async().await.ok()
    }
}
