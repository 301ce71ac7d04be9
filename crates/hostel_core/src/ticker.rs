use std::{
    sync::{Arc, Weak},
    time::Duration,
};

use async_trait::async_trait;
use tokio::{
    sync::{watch, Mutex},
    task::JoinHandle,
    time::{interval_at, Instant, MissedTickBehavior},
};
use tracing::{debug, warn};

#[async_trait]
pub trait TickTarget: Send + Sync {
    async fn on_tick(&self);
}

/// Handle to a running ticker task. Clones share the same task.
#[derive(Clone)]
pub struct TickerHandle {
    inner: Arc<TickerInner>,
}

struct TickerInner {
    period: Duration,
    stop_tx: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl TickerHandle {
    /// Calls `target` once per `period`, starting one period from now. The
    /// task ends on [`TickerHandle::stop`] or once the target is dropped.
    pub fn spawn(target: Weak<dyn TickTarget>, period: Duration) -> Self {
        let (stop_tx, mut stop_rx) = watch::channel(false);
        let task = tokio::spawn(async move {
            let mut interval = interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        let Some(target) = target.upgrade() else {
                            debug!("tick target dropped; ticker exiting");
                            break;
                        };
                        target.on_tick().await;
                    }
                    _ = stop_rx.changed() => {
                        debug!("ticker stopped");
                        break;
                    }
                }
            }
        });

        Self {
            inner: Arc::new(TickerInner {
                period,
                stop_tx,
                task: Mutex::new(Some(task)),
            }),
        }
    }

    pub fn period(&self) -> Duration {
        self.inner.period
    }

    pub async fn is_running(&self) -> bool {
        self.inner
            .task
            .lock()
            .await
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    /// Signals the task and waits for it to finish. Safe to call repeatedly.
    pub async fn stop(&self) {
        let _ = self.inner.stop_tx.send(true);
        let task = self.inner.task.lock().await.take();
        if let Some(task) = task {
            if let Err(err) = task.await {
                warn!(error = %err, "ticker task ended abnormally");
            }
        }
    }

    pub fn same_as(&self, other: &TickerHandle) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}
