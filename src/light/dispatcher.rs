use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex, MutexGuard,
};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{
    mpsc::{self, error::TryRecvError, error::TrySendError},
    watch,
};
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

use crate::wink::ToggleIntent;

use super::client::{on_off, LightClient};

const ENABLE_LOGS: bool = true;

use crate::{log_error, log_info, log_warn};

const DISPATCH_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitStatus {
    Queued,
    /// Queue was full; the intent took the overflow slot, replacing any
    /// intent already waiting there.
    Coalesced,
    Closed,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchOutcome {
    pub desired_on: bool,
    pub succeeded: bool,
    pub error: Option<String>,
    pub duration_ms: u64,
    pub completed_at: DateTime<Utc>,
}

type OverflowSlot = Arc<Mutex<Option<ToggleIntent>>>;

/// Executes light commands on a single background task.
///
/// `submit` never waits: intents go onto a bounded channel, and once that is
/// full the newest intent waits in a one-entry overflow slot behind everything
/// already queued. The worker runs commands one at a time in submission
/// order. The light state it exposes is the last *confirmed* state: it only
/// changes after the remote call succeeds.
pub struct LightDispatcher {
    tx: Option<mpsc::Sender<ToggleIntent>>,
    overflow: OverflowSlot,
    light_on: Arc<AtomicBool>,
    outcome_rx: watch::Receiver<Option<DispatchOutcome>>,
    cancel_token: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl LightDispatcher {
    /// Spawns the worker on the current tokio runtime.
    pub fn spawn<C: LightClient>(client: C, queue_capacity: usize, initial_on: bool) -> Self {
        let (tx, rx) = mpsc::channel(queue_capacity.max(1));
        let (outcome_tx, outcome_rx) = watch::channel(None);
        let overflow: OverflowSlot = Arc::new(Mutex::new(None));
        let light_on = Arc::new(AtomicBool::new(initial_on));
        let cancel_token = CancellationToken::new();

        let worker = DispatchWorker {
            client,
            rx,
            overflow: Arc::clone(&overflow),
            light_on: Arc::clone(&light_on),
            outcome_tx,
            cancel_token: cancel_token.clone(),
        };
        let handle = tokio::spawn(worker.run());

        Self {
            tx: Some(tx),
            overflow,
            light_on,
            outcome_rx,
            cancel_token,
            handle: Some(handle),
        }
    }

    pub fn submit(&self, intent: ToggleIntent) -> SubmitStatus {
        let Some(tx) = &self.tx else {
            log_warn!(
                "dispatcher closed, dropping light {} command",
                on_off(intent.desired_on)
            );
            return SubmitStatus::Closed;
        };

        // Held across try_send so the worker never sees a newer intent in the
        // slot while an older one is still on its way into the channel.
        let mut slot = lock_slot(&self.overflow);
        if let Some(pending) = slot.as_mut() {
            let replaced = std::mem::replace(pending, intent);
            log_warn!(
                "light queue full, light {} replaced pending {}",
                on_off(intent.desired_on),
                on_off(replaced.desired_on)
            );
            return SubmitStatus::Coalesced;
        }

        match tx.try_send(intent) {
            Ok(()) => SubmitStatus::Queued,
            Err(TrySendError::Full(intent)) => {
                *slot = Some(intent);
                log_warn!(
                    "light queue full, parking light {} behind queued commands",
                    on_off(intent.desired_on)
                );
                SubmitStatus::Coalesced
            }
            Err(TrySendError::Closed(intent)) => {
                log_warn!(
                    "dispatcher worker gone, dropping light {} command",
                    on_off(intent.desired_on)
                );
                SubmitStatus::Closed
            }
        }
    }

    /// Last state the remote device confirmed. May be stale after a failure.
    pub fn current_light_state(&self) -> bool {
        self.light_on.load(Ordering::SeqCst)
    }

    pub fn last_outcome(&self) -> Option<DispatchOutcome> {
        self.outcome_rx.borrow().clone()
    }

    pub fn outcomes(&self) -> watch::Receiver<Option<DispatchOutcome>> {
        self.outcome_rx.clone()
    }

    /// Closes the queue and lets the worker drain it for up to `grace`,
    /// then abandons whatever is left.
    pub async fn shutdown(&mut self, grace: Duration) -> Result<()> {
        self.tx.take();

        let Some(mut handle) = self.handle.take() else {
            return Ok(());
        };

        match tokio::time::timeout(grace, &mut handle).await {
            Ok(joined) => joined.context("light dispatcher task failed to join"),
            Err(_) => {
                log_warn!(
                    "light dispatcher still busy after {}ms, abandoning pending commands",
                    grace.as_millis()
                );
                self.cancel_token.cancel();
                handle
                    .await
                    .context("light dispatcher task failed to join")
            }
        }
    }
}

impl Drop for LightDispatcher {
    fn drop(&mut self) {
        if self.handle.is_some() {
            self.cancel_token.cancel();
        }
    }
}

struct DispatchWorker<C> {
    client: C,
    rx: mpsc::Receiver<ToggleIntent>,
    overflow: OverflowSlot,
    light_on: Arc<AtomicBool>,
    outcome_tx: watch::Sender<Option<DispatchOutcome>>,
    cancel_token: CancellationToken,
}

impl<C: LightClient> DispatchWorker<C> {
    async fn run(mut self) {
        log_info!("light dispatcher started for {}", self.client.describe());

        loop {
            let intent = match self.next_ready() {
                Ready::Intent(intent) => intent,
                Ready::Closed => break,
                Ready::Empty => {
                    tokio::select! {
                        received = self.rx.recv() => match received {
                            Some(intent) => intent,
                            // Closed; the next pass picks up anything left in the slot.
                            None => continue,
                        },
                        _ = self.cancel_token.cancelled() => break,
                    }
                }
            };

            tokio::select! {
                _ = self.dispatch(intent) => {}
                _ = self.cancel_token.cancelled() => {
                    log_warn!(
                        "light {} command abandoned at shutdown",
                        on_off(intent.desired_on)
                    );
                    break;
                }
            }
        }

        log_info!("light dispatcher shutting down");
    }

    fn next_ready(&mut self) -> Ready {
        let mut slot = lock_slot(&self.overflow);
        match self.rx.try_recv() {
            Ok(intent) => Ready::Intent(intent),
            Err(TryRecvError::Empty) => slot.take().map_or(Ready::Empty, Ready::Intent),
            Err(TryRecvError::Disconnected) => slot.take().map_or(Ready::Closed, Ready::Intent),
        }
    }

    async fn dispatch(&self, intent: ToggleIntent) {
        let desired = intent.desired_on;
        log_info!(
            "sending light {} to {}",
            on_off(desired),
            self.client.describe()
        );

        let started = Instant::now();
        let result = match tokio::time::timeout(
            Duration::from_secs(DISPATCH_TIMEOUT_SECS),
            self.client.set_power(desired),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(anyhow::anyhow!(
                "no response within {DISPATCH_TIMEOUT_SECS}s"
            )),
        };
        let duration_ms = started.elapsed().as_millis() as u64;

        let error = match result {
            Ok(()) => {
                self.light_on.store(desired, Ordering::SeqCst);
                log_info!("light {} confirmed in {}ms", on_off(desired), duration_ms);
                None
            }
            Err(err) => {
                let confirmed = self.light_on.load(Ordering::SeqCst);
                log_error!(
                    "light {} command failed after {}ms: {err:?}",
                    on_off(desired),
                    duration_ms
                );
                if confirmed != desired {
                    log_warn!(
                        "light state diverged: requested {} but last confirmed {}",
                        on_off(desired),
                        on_off(confirmed)
                    );
                }
                Some(format!("{err:#}"))
            }
        };

        self.outcome_tx.send_replace(Some(DispatchOutcome {
            desired_on: desired,
            succeeded: error.is_none(),
            error,
            duration_ms,
            completed_at: Utc::now(),
        }));
    }
}

enum Ready {
    Intent(ToggleIntent),
    Empty,
    Closed,
}

fn lock_slot(slot: &OverflowSlot) -> MutexGuard<'_, Option<ToggleIntent>> {
    slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::bail;

    #[derive(Clone, Default)]
    struct Recorder {
        calls: Arc<Mutex<Vec<bool>>>,
        delay: Duration,
        fail: bool,
    }

    impl LightClient for Recorder {
        async fn set_power(&self, on: bool) -> Result<()> {
            tokio::time::sleep(self.delay).await;
            self.calls.lock().unwrap().push(on);
            if self.fail {
                bail!("simulated outage");
            }
            Ok(())
        }

        fn describe(&self) -> String {
            "recorder".into()
        }
    }

    /// Never answers its first call. Later calls succeed after a second.
    #[derive(Clone, Default)]
    struct StallsOnce {
        calls: Arc<Mutex<Vec<bool>>>,
    }

    impl LightClient for StallsOnce {
        async fn set_power(&self, on: bool) -> Result<()> {
            let first = {
                let mut calls = self.calls.lock().unwrap();
                calls.push(on);
                calls.len() == 1
            };
            if first {
                std::future::pending::<()>().await;
            }
            tokio::time::sleep(Duration::from_secs(1)).await;
            Ok(())
        }

        fn describe(&self) -> String {
            "stalls once".into()
        }
    }

    fn on(desired_on: bool) -> ToggleIntent {
        ToggleIntent { desired_on }
    }

    #[tokio::test]
    async fn success_updates_confirmed_state() {
        let client = Recorder::default();
        let mut dispatcher = LightDispatcher::spawn(client.clone(), 4, false);
        assert_eq!(dispatcher.submit(on(true)), SubmitStatus::Queued);
        dispatcher.shutdown(Duration::from_secs(2)).await.unwrap();

        assert!(dispatcher.current_light_state());
        assert_eq!(*client.calls.lock().unwrap(), vec![true]);
        let outcome = dispatcher.last_outcome().unwrap();
        assert!(outcome.succeeded);
        assert!(outcome.desired_on);
    }

    #[tokio::test]
    async fn failure_leaves_state_unchanged() {
        let client = Recorder {
            fail: true,
            ..Recorder::default()
        };
        let mut dispatcher = LightDispatcher::spawn(client.clone(), 4, false);
        dispatcher.submit(on(true));
        dispatcher.shutdown(Duration::from_secs(2)).await.unwrap();

        assert!(!dispatcher.current_light_state());
        let outcome = dispatcher.last_outcome().unwrap();
        assert!(!outcome.succeeded);
        assert!(outcome.error.unwrap().contains("simulated outage"));
    }

    #[tokio::test]
    async fn overflow_slot_keeps_only_the_newest() {
        let client = Recorder {
            delay: Duration::from_millis(100),
            ..Recorder::default()
        };
        let mut dispatcher = LightDispatcher::spawn(client.clone(), 1, false);

        // Let the worker pick up the first command so the channel is empty.
        assert_eq!(dispatcher.submit(on(true)), SubmitStatus::Queued);
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(dispatcher.submit(on(false)), SubmitStatus::Queued);
        assert_eq!(dispatcher.submit(on(true)), SubmitStatus::Coalesced);
        assert_eq!(dispatcher.submit(on(false)), SubmitStatus::Coalesced);
        dispatcher.shutdown(Duration::from_secs(2)).await.unwrap();

        assert_eq!(*client.calls.lock().unwrap(), vec![true, false, false]);
        assert!(!dispatcher.current_light_state());
    }

    #[tokio::test]
    async fn submit_after_shutdown_is_rejected() {
        let mut dispatcher = LightDispatcher::spawn(Recorder::default(), 2, false);
        dispatcher.shutdown(Duration::from_millis(100)).await.unwrap();
        assert_eq!(dispatcher.submit(on(true)), SubmitStatus::Closed);
    }

    #[tokio::test]
    async fn shutdown_abandons_slow_commands_after_grace() {
        let client = Recorder {
            delay: Duration::from_secs(5),
            ..Recorder::default()
        };
        let mut dispatcher = LightDispatcher::spawn(client.clone(), 4, false);
        dispatcher.submit(on(true));
        dispatcher.submit(on(false));

        let started = Instant::now();
        dispatcher.shutdown(Duration::from_millis(50)).await.unwrap();
        assert!(started.elapsed() < Duration::from_secs(1));
        assert!(client.calls.lock().unwrap().is_empty());
        assert!(!dispatcher.current_light_state());
    }

    #[tokio::test(start_paused = true)]
    async fn hung_command_times_out_and_queue_moves_on() {
        let client = StallsOnce::default();
        let mut dispatcher = LightDispatcher::spawn(client.clone(), 4, false);
        let mut outcomes = dispatcher.outcomes();
        dispatcher.submit(on(true));
        dispatcher.submit(on(true));

        outcomes.changed().await.unwrap();
        let timed_out = outcomes.borrow_and_update().clone().unwrap();
        assert!(!timed_out.succeeded);
        assert!(timed_out.desired_on);
        assert!(timed_out.error.unwrap().contains("no response within"));
        assert!(timed_out.duration_ms >= DISPATCH_TIMEOUT_SECS * 1000);
        assert!(!dispatcher.current_light_state());

        dispatcher.shutdown(Duration::from_secs(30)).await.unwrap();
        assert_eq!(*client.calls.lock().unwrap(), vec![true, true]);
        assert!(dispatcher.current_light_state());
        assert!(dispatcher.last_outcome().unwrap().succeeded);
    }
}
