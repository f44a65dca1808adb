use crate::core::errors::ExchangeError;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};
use std::task::{Context, Poll};
use tokio::sync::oneshot;
use tokio::task::AbortHandle;

type Slot<T> = Arc<Mutex<Option<oneshot::Sender<Result<T, ExchangeError>>>>>;

/// Write side of a [`PendingCall`].
///
/// Cloned into every task that may finish the call (the request task and its
/// timeout timer). Only the first [`Completion::resolve`] is delivered.
pub struct Completion<T> {
    slot: Slot<T>,
}

impl<T> Clone for Completion<T> {
    fn clone(&self) -> Self {
        Self {
            slot: Arc::clone(&self.slot),
        }
    }
}

impl<T> Completion<T> {
    /// Deliver the outcome. Returns `false` if the call was already resolved.
    pub fn resolve(&self, result: Result<T, ExchangeError>) -> bool {
        let sender = self
            .slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        match sender {
            Some(sender) => {
                // The caller may have dropped the PendingCall; the call still counts as resolved.
                let _ = sender.send(result);
                true
            }
            None => false,
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }
}

/// Handle to an in-flight request that resolves exactly once, to a value or an error.
///
/// Dropping the handle aborts the tasks still working on it. Tasks attached
/// with [`PendingCall::attach_until_resolved`] survive once the caller has
/// seen a result.
#[must_use = "a PendingCall does nothing unless awaited"]
pub struct PendingCall<T> {
    id: u64,
    receiver: oneshot::Receiver<Result<T, ExchangeError>>,
    tasks: Vec<AbortHandle>,
    until_resolved: Vec<AbortHandle>,
    delivered: bool,
}

impl<T> PendingCall<T> {
    pub fn channel(id: u64) -> (Completion<T>, Self) {
        let (sender, receiver) = oneshot::channel();
        let completion = Completion {
            slot: Arc::new(Mutex::new(Some(sender))),
        };
        (
            completion,
            Self {
                id,
                receiver,
                tasks: Vec::new(),
                until_resolved: Vec::new(),
                delivered: false,
            },
        )
    }

    /// Already-resolved call, used for failures detected before anything is spawned
    pub fn ready(id: u64, result: Result<T, ExchangeError>) -> Self {
        let (completion, call) = Self::channel(id);
        completion.resolve(result);
        call
    }

    pub const fn id(&self) -> u64 {
        self.id
    }

    /// Abort `task` whenever this handle is dropped
    pub fn attach(&mut self, task: AbortHandle) {
        self.tasks.push(task);
    }

    /// Abort `task` on drop only if no result was delivered yet
    pub fn attach_until_resolved(&mut self, task: AbortHandle) {
        self.until_resolved.push(task);
    }

    /// Stop all work on this call without waiting for it
    pub fn cancel(self) {
        drop(self);
    }
}

impl<T> Future for PendingCall<T> {
    type Output = Result<T, ExchangeError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match Pin::new(&mut this.receiver).poll(cx) {
            Poll::Ready(Ok(result)) => {
                this.delivered = true;
                Poll::Ready(result)
            }
            Poll::Ready(Err(_)) => Poll::Ready(Err(ExchangeError::Other(format!(
                "call {} was abandoned before completing",
                this.id
            )))),
            Poll::Pending => Poll::Pending,
        }
    }
}

impl<T> Drop for PendingCall<T> {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
        if !self.delivered {
            for task in &self.until_resolved {
                task.abort();
            }
        }
    }
}

impl<T> std::fmt::Debug for PendingCall<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingCall")
            .field("id", &self.id)
            .field("tasks", &(self.tasks.len() + self.until_resolved.len()))
            .finish_non_exhaustive()
    }
}
