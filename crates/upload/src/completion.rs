//! Single-assignment completion handles
//!
//! A job's result is written exactly once by whoever runs the job and can be
//! awaited by any number of waiters. The write side is consumed by
//! [`CompletionSetter::set`], so a second assignment does not type-check.

use tokio::sync::watch;

/// Create a connected setter/handle pair
pub fn completion<T: Clone>() -> (CompletionSetter<T>, Completion<T>) {
    let (tx, rx) = watch::channel(None);
    (CompletionSetter { tx }, Completion { rx })
}

/// Write side of a completion handle
#[derive(Debug)]
pub struct CompletionSetter<T> {
    tx: watch::Sender<Option<T>>,
}

impl<T> CompletionSetter<T> {
    /// Publish the value and wake every waiter
    pub fn set(self, value: T) {
        self.tx.send_replace(Some(value));
    }
}

/// Read side of a completion handle; clone it to share between waiters
#[derive(Debug, Clone)]
pub struct Completion<T> {
    rx: watch::Receiver<Option<T>>,
}

impl<T: Clone> Completion<T> {
    /// Wait until the value is available
    ///
    /// Returns `None` if the setter was dropped without publishing anything.
    pub async fn wait(&self) -> Option<T> {
        let mut rx = self.rx.clone();
        let outcome = match rx.wait_for(|value| value.is_some()).await {
            Ok(value) => value.clone(),
            Err(_) => None,
        };
        outcome
    }

    /// The value, if it has been set already
    pub fn try_get(&self) -> Option<T> {
        self.rx.borrow().clone()
    }
}
