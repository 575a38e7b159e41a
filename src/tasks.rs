use crate::error::Result;
use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Low-frequency jobs (update checks and the like) running on their own
/// timers, independent of the render tick.
pub struct BackgroundTasks {
    runtime: Handle,
    stop_tx: watch::Sender<bool>,
    tasks: HashMap<String, JoinHandle<()>>,
}

impl BackgroundTasks {
    pub fn new(runtime: Handle) -> Self {
        let (stop_tx, _) = watch::channel(false);
        Self {
            runtime,
            stop_tx,
            tasks: HashMap::new(),
        }
    }

    /// Runs `job` immediately and then every `every`. A failed run is
    /// logged and the next one happens on schedule. Re-using an id replaces
    /// the previous task.
    pub fn add_task<F, Fut>(&mut self, id: impl Into<String>, every: Duration, job: F)
    where
        F: Fn() -> Fut + Send + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let id = id.into();
        let every = every.max(Duration::from_millis(1));
        let mut stop_rx = self.stop_tx.subscribe();
        let task_id = id.clone();

        let handle = self.runtime.spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                if *stop_rx.borrow() {
                    break;
                }
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = job().await {
                            tracing::warn!("Background task '{}' failed: {}", task_id, e);
                        }
                    }
                    changed = stop_rx.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
            }
            tracing::debug!("Background task '{}' stopped", task_id);
        });

        tracing::debug!("Scheduled background task '{}' every {:?}", id, every);
        if let Some(previous) = self.tasks.insert(id, handle) {
            previous.abort();
        }
    }

    pub fn remove_task(&mut self, id: &str) -> bool {
        match self.tasks.remove(id) {
            Some(handle) => {
                handle.abort();
                true
            }
            None => false,
        }
    }

    #[cfg(test)]
    pub fn contains(&self, id: &str) -> bool {
        self.tasks.contains_key(id)
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Signals every task to finish and aborts any still running a job.
    pub fn stop(&mut self) {
        if self.tasks.is_empty() {
            return;
        }
        let _ = self.stop_tx.send(true);
        for (_, handle) in self.tasks.drain() {
            if !handle.is_finished() {
                handle.abort();
            }
        }
        tracing::debug!("Background tasks stopped");
    }
}

impl Drop for BackgroundTasks {
    fn drop(&mut self) {
        self.stop();
    }
}
