//! Fakes shared by the poller and watcher tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::error::WatchError;
use crate::poller::RecordSource;

enum Step<R> {
    Records(Vec<R>),
    Fail(u16),
    Hang,
}

/// Record source that plays back a script of responses. Once the script is
/// exhausted it keeps returning the last successful batch.
pub struct ScriptedSource<R> {
    script: Mutex<VecDeque<Step<R>>>,
    last: Mutex<Vec<R>>,
    calls: AtomicUsize,
    gate: Option<Arc<Notify>>,
}

impl<R: Clone + Send + Sync> ScriptedSource<R> {
    pub fn new() -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            last: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
            gate: None,
        }
    }

    /// Every fetch waits for one `notify_one` on `gate` before answering.
    pub fn with_gate(mut self, gate: Arc<Notify>) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn push_records(&self, records: Vec<R>) {
        self.script.lock().push_back(Step::Records(records));
    }

    pub fn push_failure(&self, status: u16) {
        self.script.lock().push_back(Step::Fail(status));
    }

    pub fn push_hang(&self) {
        self.script.lock().push_back(Step::Hang);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl<R: Clone + Send + Sync> RecordSource for ScriptedSource<R> {
    type Record = R;

    async fn fetch(&self) -> Result<Vec<R>, WatchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }

        let step = self.script.lock().pop_front();
        match step {
            Some(Step::Records(records)) => {
                *self.last.lock() = records.clone();
                Ok(records)
            }
            Some(Step::Fail(status)) => Err(WatchError::Api {
                status,
                message: "scripted failure".to_string(),
            }),
            Some(Step::Hang) => std::future::pending().await,
            None => Ok(self.last.lock().clone()),
        }
    }
}

/// A listener that appends a clone of every event to a shared vec.
pub fn recorder<E: Clone + Send + 'static>() -> (Arc<Mutex<Vec<E>>>, impl Fn(&E) + Send + Sync + 'static) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    (seen, move |event: &E| sink.lock().push(event.clone()))
}

/// Give spawned tasks (desktop notifications) a chance to run.
pub async fn settle() {
    for _ in 0..5 {
        tokio::task::yield_now().await;
    }
}
