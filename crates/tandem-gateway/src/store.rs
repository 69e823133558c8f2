use std::sync::Arc;
use std::time::Duration;

use tokio::task::{JoinError, JoinHandle};
use tracing::{error, warn};

use tandem_db::ChatStore;
use tandem_types::error::ChatError;

pub const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_secs(5);

/// Async front for the blocking durable store. Every call runs on the
/// blocking pool and is bounded by `timeout`; failures and timeouts surface
/// as `StoreUnavailable`.
#[derive(Clone)]
pub struct StoreHandle {
    store: Arc<dyn ChatStore>,
    timeout: Duration,
}

impl StoreHandle {
    pub fn new(store: Arc<dyn ChatStore>, timeout: Duration) -> Self {
        Self { store, timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Run `f` against the store. `op` names the call in logs and errors.
    ///
    /// A call that times out is abandoned, not cancelled: the blocking task
    /// may still finish its write afterwards. Use `call_or_pending` when the
    /// caller must learn how such a write ends.
    pub async fn call<F, T>(&self, op: &'static str, f: F) -> Result<T, ChatError>
    where
        F: FnOnce(&dyn ChatStore) -> anyhow::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        match self.call_or_pending(op, f).await {
            StoreCall::Done(result) => result,
            StoreCall::Pending(_) => Err(ChatError::unavailable(format!("{op} timed out"))),
        }
    }

    /// Like `call`, but a timed-out call hands back the still-running
    /// blocking task.
    pub async fn call_or_pending<F, T>(&self, op: &'static str, f: F) -> StoreCall<T>
    where
        F: FnOnce(&dyn ChatStore) -> anyhow::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let store = self.store.clone();
        let mut task = tokio::task::spawn_blocking(move || f(store.as_ref()));

        match tokio::time::timeout(self.timeout, &mut task).await {
            Ok(joined) => StoreCall::Done(settle(op, joined)),
            Err(_) => {
                warn!("store {} timed out after {:?}", op, self.timeout);
                StoreCall::Pending(PendingCall { op, task })
            }
        }
    }
}

/// Outcome of `StoreHandle::call_or_pending`.
pub enum StoreCall<T> {
    Done(Result<T, ChatError>),
    /// Timed out; the blocking task is still running.
    Pending(PendingCall<T>),
}

pub struct PendingCall<T> {
    op: &'static str,
    task: JoinHandle<anyhow::Result<T>>,
}

impl<T> PendingCall<T> {
    /// Wait for the abandoned call to finish, however long it takes.
    pub async fn finish(self) -> Result<T, ChatError> {
        let joined = self.task.await;
        settle(self.op, joined)
    }
}

fn settle<T>(op: &str, joined: Result<anyhow::Result<T>, JoinError>) -> Result<T, ChatError> {
    match joined {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => {
            warn!("store {} failed: {:#}", op, e);
            Err(ChatError::unavailable(format!("{op} failed")))
        }
        Err(e) => {
            error!("store {} task aborted: {}", op, e);
            Err(ChatError::unavailable(format!("{op} failed")))
        }
    }
}
