//! Structured task groups: spawn, wait for all, keep the first error.

use crate::error::{Result, SyncError};
use std::future::Future;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupMode {
    /// The first failure cancels the group's token
    CancelOnError,
    /// Failures are recorded; siblings run to completion
    Independent,
}

/// A set of tasks sharing a child cancellation token.
///
/// [`TaskGroup::wait`] always joins every task before returning. Results come
/// back in spawn order; only the first error (by completion) is reported.
pub struct TaskGroup<T> {
    name: &'static str,
    mode: GroupMode,
    token: CancellationToken,
    tasks: JoinSet<(usize, Result<T>)>,
    spawned: usize,
}

impl<T: Send + 'static> TaskGroup<T> {
    pub fn new(name: &'static str, parent: &CancellationToken, mode: GroupMode) -> Self {
        Self {
            name,
            mode,
            token: parent.child_token(),
            tasks: JoinSet::new(),
            spawned: 0,
        }
    }

    /// Token for the tasks of this group; cancelled with the parent or on first error.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn spawn<F>(&mut self, task: F)
    where
        F: Future<Output = Result<T>> + Send + 'static,
    {
        let index = self.spawned;
        self.spawned += 1;
        self.tasks.spawn(async move { (index, task.await) });
    }

    pub async fn wait(mut self) -> Result<Vec<T>> {
        let mut results: Vec<Option<T>> = (0..self.spawned).map(|_| None).collect();
        let mut first_error: Option<SyncError> = None;

        while let Some(joined) = self.tasks.join_next().await {
            let (index, result) = match joined {
                Ok(outcome) => outcome,
                Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
                Err(_) => {
                    record(&mut first_error, SyncError::Cancelled, self.name);
                    continue;
                }
            };

            match result {
                Ok(value) => results[index] = Some(value),
                Err(e) => {
                    if first_error.is_none() && self.mode == GroupMode::CancelOnError {
                        tracing::debug!(group = self.name, error = %e, "cancelling sibling tasks");
                        self.token.cancel();
                    }
                    record(&mut first_error, e, self.name);
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(results.into_iter().flatten().collect()),
        }
    }
}

fn record(first: &mut Option<SyncError>, error: SyncError, group: &str) {
    if first.is_none() {
        *first = Some(error);
    } else if !error.is_cancelled() {
        tracing::debug!(group, error = %error, "additional task failure");
    }
}
