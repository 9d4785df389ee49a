/*
 *  source.rs
 *
 *  RGBClock - worth the squeeze
 *  (c) 2020-26 Stuart Hunter
 *
 *  Periodic data sources and their polling runner
 *
 *  This program is free software: you can redistribute it and/or modify
 *  it under the terms of the GNU General Public License as published by
 *  the Free Software Foundation, either version 3 of the License, or
 *  (at your option) any later version.
 *
 *  This program is distributed in the hope that it will be useful,
 *  but WITHOUT ANY WARRANTY; without even the implied warranty of
 *  MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 *  GNU General Public License for more details.
 *
 *  See <http://www.gnu.org/licenses/> to get a copy of the GNU General
 *  Public License.
 *
 */

//! Every source owns one locked snapshot and is driven by [`spawn_source`].
//! A poll either replaces the snapshot wholesale or leaves it alone; the
//! runner is the only place a panic is caught.

use log::{debug, error, info, warn};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::deutils::DecodeError;
use crate::rpc::RpcError;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("http: {0}")]
    Http(reqwest::Error),
    #[error("http status {0}")]
    Status(u16),
    #[error("decode: {0}")]
    Decode(String),
    #[error("timed out")]
    Timeout,
    #[error("invariant violated: {0}")]
    Invariant(String),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("rpc: {0}")]
    Rpc(#[from] RpcError),
}

impl From<reqwest::Error> for SourceError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            SourceError::Timeout
        } else if let Some(status) = e.status() {
            SourceError::Status(status.as_u16())
        } else if e.is_decode() {
            SourceError::Decode(e.to_string())
        } else {
            SourceError::Http(e)
        }
    }
}

impl From<DecodeError> for SourceError {
    fn from(e: DecodeError) -> Self {
        SourceError::Decode(e.to_string())
    }
}

impl From<serde_json::Error> for SourceError {
    fn from(e: serde_json::Error) -> Self {
        SourceError::Decode(e.to_string())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PollOutcome {
    Updated,
    Unchanged,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum SourceState {
    #[default]
    Idle,
    Polling,
    Updated,
    Unchanged,
    Failed,
    Unknown,
}

impl From<PollOutcome> for SourceState {
    fn from(o: PollOutcome) -> Self {
        match o {
            PollOutcome::Updated => SourceState::Updated,
            PollOutcome::Unchanged => SourceState::Unchanged,
        }
    }
}

/// What the runner publishes after every state change.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SourceStatus {
    pub state: SourceState,
    /// Result of the most recent completed poll.
    pub last: Option<SourceState>,
    pub polls: u64,
    pub failures: u64,
}

pub trait PeriodicSource: Send + Sync + 'static {
    fn name(&self) -> &str;

    /// Fetch and, on success, replace the snapshot.
    fn poll(&self) -> impl Future<Output = Result<PollOutcome, SourceError>> + Send;

    /// Called after a poll panicked or broke an invariant; the snapshot
    /// should read as unknown so it is not drawn.
    fn mark_unknown(&self);
}

/// Running source, stop it with [`SourceHandle::stop`].
pub struct SourceHandle {
    name: String,
    token: CancellationToken,
    status: watch::Receiver<SourceStatus>,
    join: JoinHandle<()>,
}

impl SourceHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn status(&self) -> SourceStatus {
        *self.status.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<SourceStatus> {
        self.status.clone()
    }

    /// Cancel and wait for the loop to exit; an in-flight poll finishes first.
    pub async fn stop(self) {
        self.token.cancel();
        if let Err(e) = self.join.await {
            error!("{} runner failed to join: {}", self.name, e);
        }
        info!("{} polling stopped.", self.name);
    }
}

/// Poll `source` every `every` until `token` is cancelled.
pub fn spawn_source<S: PeriodicSource>(
    source: Arc<S>,
    every: Duration,
    token: CancellationToken,
) -> SourceHandle {
    let name = source.name().to_string();
    let (tx, rx) = watch::channel(SourceStatus::default());
    let child = token.clone();
    let task_name = name.clone();

    let join = tokio::spawn(async move {
        info!("{} polling every {:?}", task_name, every);
        loop {
            if child.is_cancelled() {
                break;
            }
            tx.send_modify(|s| s.state = SourceState::Polling);

            let s = source.clone();
            let result = tokio::spawn(async move { s.poll().await }).await;
            let next = match result {
                Ok(Ok(outcome)) => SourceState::from(outcome),
                Ok(Err(SourceError::Invariant(msg))) => {
                    error!("{} invariant violated: {}, marking unknown", task_name, msg);
                    source.mark_unknown();
                    SourceState::Unknown
                }
                Ok(Err(e)) => {
                    warn!("{} polling failed: {}", task_name, e);
                    SourceState::Failed
                }
                Err(join) => {
                    if join.is_panic() {
                        error!("{} poll panicked, marking unknown", task_name);
                    } else {
                        error!("{} poll cancelled: {}", task_name, join);
                    }
                    source.mark_unknown();
                    SourceState::Unknown
                }
            };
            debug!("{} -> {:?}", task_name, next);
            tx.send_modify(|s| {
                s.polls += 1;
                if matches!(next, SourceState::Failed | SourceState::Unknown) {
                    s.failures += 1;
                }
                s.last = Some(next);
                s.state = SourceState::Idle;
            });

            tokio::select! {
                _ = child.cancelled() => break,
                _ = tokio::time::sleep(every) => {}
            }
        }
        info!("{} polling thread received stop signal. Exiting.", task_name);
    });

    SourceHandle { name, token, status: rx, join }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Scripted step for [`ScriptedSource`].
    #[derive(Debug)]
    pub enum Step {
        Ok(u32),
        Fail,
        Invariant,
        Panic,
    }

    /// Replays a script; the snapshot is the last good value.
    pub struct ScriptedSource {
        pub script: Mutex<VecDeque<Step>>,
        pub snapshot: Mutex<Option<u32>>,
        pub unknown: Mutex<bool>,
    }

    impl ScriptedSource {
        pub fn new(steps: Vec<Step>) -> Self {
            Self {
                script: Mutex::new(steps.into()),
                snapshot: Mutex::new(None),
                unknown: Mutex::new(false),
            }
        }
    }

    impl PeriodicSource for ScriptedSource {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn poll(&self) -> Result<PollOutcome, SourceError> {
            let step = self.script.lock().unwrap().pop_front().unwrap_or(Step::Fail);
            match step {
                Step::Ok(v) => {
                    let mut snap = self.snapshot.lock().unwrap();
                    let changed = *snap != Some(v);
                    *snap = Some(v);
                    *self.unknown.lock().unwrap() = false;
                    Ok(if changed { PollOutcome::Updated } else { PollOutcome::Unchanged })
                }
                Step::Fail => Err(SourceError::Status(500)),
                Step::Invariant => Err(SourceError::Invariant("empty".into())),
                Step::Panic => panic!("scripted panic"),
            }
        }

        fn mark_unknown(&self) {
            *self.unknown.lock().unwrap() = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::{ScriptedSource, Step};
    use super::*;

    async fn run_until(src: Arc<ScriptedSource>, polls: u64) -> (SourceHandle, SourceStatus) {
        let h = spawn_source(src, Duration::from_secs(1), CancellationToken::new());
        let mut rx = h.subscribe();
        let st = *rx.wait_for(|s| s.polls >= polls).await.unwrap();
        (h, st)
    }

    #[tokio::test(start_paused = true)]
    async fn failure_keeps_last_good_snapshot() {
        let src = Arc::new(ScriptedSource::new(vec![Step::Ok(7), Step::Fail, Step::Fail]));
        let (h, st) = run_until(src.clone(), 3).await;
        assert_eq!(st.last, Some(SourceState::Failed));
        assert_eq!(st.failures, 2);
        assert_eq!(*src.snapshot.lock().unwrap(), Some(7));
        assert!(!*src.unknown.lock().unwrap());
        h.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn unchanged_and_updated_are_distinguished() {
        let src = Arc::new(ScriptedSource::new(vec![Step::Ok(1), Step::Ok(1)]));
        let (h, st) = run_until(src.clone(), 2).await;
        assert_eq!(st.last, Some(SourceState::Unchanged));
        h.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn panic_is_contained_and_marks_unknown() {
        let src = Arc::new(ScriptedSource::new(vec![Step::Ok(3), Step::Panic, Step::Ok(4)]));
        let (h, st) = run_until(src.clone(), 2).await;
        assert_eq!(st.last, Some(SourceState::Unknown));
        assert!(*src.unknown.lock().unwrap());
        // the runner survives and polls again
        let mut rx = h.subscribe();
        let st = *rx.wait_for(|s| s.polls >= 3).await.unwrap();
        assert_eq!(st.last, Some(SourceState::Updated));
        assert!(!*src.unknown.lock().unwrap());
        h.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn invariant_error_marks_unknown() {
        let src = Arc::new(ScriptedSource::new(vec![Step::Invariant]));
        let (h, st) = run_until(src.clone(), 1).await;
        assert_eq!(st.last, Some(SourceState::Unknown));
        assert!(*src.unknown.lock().unwrap());
        h.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn stop_cancels_the_wait() {
        let token = CancellationToken::new();
        let src = Arc::new(ScriptedSource::new(vec![Step::Ok(1)]));
        let h = spawn_source(src, Duration::from_secs(3600), token.clone());
        let mut rx = h.subscribe();
        rx.wait_for(|s| s.polls >= 1).await.unwrap();
        h.stop().await;
        assert!(token.is_cancelled());
    }
}
