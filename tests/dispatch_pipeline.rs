use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::{bail, Result};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use winkcharge_lib::hud::{HudFrame, HudSink};
use winkcharge_lib::light::{LightClient, LightDispatcher, SubmitStatus};
use winkcharge_lib::operator::OperatorCommand;
use winkcharge_lib::sensing::{LoopExit, SensingLoop, TraceSource};
use winkcharge_lib::wink::{ToggleIntent, WinkMachine, WinkPhase, WinkTimings};

#[derive(Clone, Default)]
struct RecordingLight {
    calls: Arc<Mutex<Vec<bool>>>,
    delay: Duration,
    fail_on: Option<bool>,
}

impl RecordingLight {
    fn slow(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    fn calls(&self) -> Vec<bool> {
        self.calls.lock().unwrap().clone()
    }
}

impl LightClient for RecordingLight {
    async fn set_power(&self, on: bool) -> Result<()> {
        tokio::time::sleep(self.delay).await;
        self.calls.lock().unwrap().push(on);
        if self.fail_on == Some(on) {
            bail!("vendor returned 500");
        }
        Ok(())
    }

    fn describe(&self) -> String {
        "recording light".into()
    }
}

#[derive(Clone, Default)]
struct CollectingHud {
    frames: Arc<Mutex<Vec<HudFrame>>>,
}

impl HudSink for CollectingHud {
    fn render(&mut self, frame: &HudFrame) {
        self.frames.lock().unwrap().push(frame.clone());
    }
}

fn intent(desired_on: bool) -> ToggleIntent {
    ToggleIntent { desired_on }
}

fn trace(samples: impl IntoIterator<Item = (bool, f64)>) -> TraceSource {
    let text: String = samples
        .into_iter()
        .map(|(visible, timestamp)| {
            format!("{{\"visible\": {visible}, \"timestamp\": {timestamp}}}\n")
        })
        .collect();
    TraceSource::from_text(&text)
}

fn machine(light_on: bool) -> WinkMachine {
    WinkMachine::new(
        WinkTimings {
            hold_time: 3.0,
            idle_reset: 1.0,
        },
        light_on,
    )
}

#[tokio::test]
async fn submit_returns_immediately_with_slow_remote() {
    let light = RecordingLight::slow(Duration::from_millis(300));
    let mut dispatcher = LightDispatcher::spawn(light.clone(), 8, false);

    let started = Instant::now();
    for on in [true, false, true] {
        assert_eq!(dispatcher.submit(intent(on)), SubmitStatus::Queued);
    }
    assert!(started.elapsed() < Duration::from_millis(50));

    dispatcher.shutdown(Duration::from_secs(5)).await.unwrap();
    assert_eq!(light.calls(), vec![true, false, true]);
    assert!(dispatcher.current_light_state());
}

#[tokio::test]
async fn commands_run_one_at_a_time_in_order() {
    let light = RecordingLight::slow(Duration::from_millis(200));
    let mut dispatcher = LightDispatcher::spawn(light.clone(), 8, false);
    let mut outcomes = dispatcher.outcomes();

    dispatcher.submit(intent(true));
    dispatcher.submit(intent(false));

    outcomes.changed().await.unwrap();
    let first = outcomes.borrow_and_update().clone().unwrap();
    assert!(first.desired_on);
    assert_eq!(light.calls(), vec![true]);

    dispatcher.shutdown(Duration::from_secs(2)).await.unwrap();
    assert_eq!(light.calls(), vec![true, false]);
    assert!(!dispatcher.current_light_state());
}

#[tokio::test]
async fn failed_command_keeps_last_confirmed_state() {
    let light = RecordingLight {
        fail_on: Some(false),
        ..RecordingLight::default()
    };
    let mut dispatcher = LightDispatcher::spawn(light.clone(), 8, false);
    dispatcher.submit(intent(true));
    dispatcher.submit(intent(false));
    dispatcher.shutdown(Duration::from_secs(2)).await.unwrap();

    assert_eq!(light.calls(), vec![true, false]);
    assert!(dispatcher.current_light_state());
    let last = dispatcher.last_outcome().unwrap();
    assert!(!last.succeeded);
    assert!(!last.desired_on);
}

#[tokio::test]
async fn held_wink_in_trace_switches_light_on() {
    let light = RecordingLight::slow(Duration::from_millis(20));
    let mut dispatcher = LightDispatcher::spawn(light.clone(), 8, false);
    let hud = CollectingHud::default();

    let samples = (0..=32)
        .map(|tick| (true, tick as f64 / 10.0))
        .chain((33..=45).map(|tick| (false, tick as f64 / 10.0)));
    let sensing = SensingLoop::new(
        trace(samples),
        machine(false),
        hud.clone(),
        Duration::from_millis(1),
    );

    let (_command_tx, command_rx) = mpsc::channel(4);
    let summary = sensing
        .run(&dispatcher, command_rx, CancellationToken::new())
        .await;

    assert_eq!(summary.exit, LoopExit::SourceFinished);
    assert_eq!(summary.intents, 1);
    assert_eq!(summary.final_phase, WinkPhase::Idle);
    assert!(summary.light_mirror);

    dispatcher.shutdown(Duration::from_secs(2)).await.unwrap();
    assert_eq!(light.calls(), vec![true]);
    assert!(dispatcher.current_light_state());

    let frames = hud.frames.lock().unwrap();
    assert_eq!(frames.len(), 46);
    let charged = &frames[30];
    assert_eq!(charged.phase, WinkPhase::Charged);
    assert_eq!(charged.progress.fraction, 1.0);
    assert!(charged.light_on);
    assert!(!frames[29].light_on);
}

#[tokio::test]
async fn unreadable_stretch_counts_as_absence_on_the_loop_clock() {
    let mut text: String = (0..=20)
        .map(|tick| format!("{{\"visible\": true, \"timestamp\": {}}}\n", tick as f64 / 10.0))
        .collect();
    text.push_str(&"garbled\n".repeat(200));

    let dispatcher = LightDispatcher::spawn(RecordingLight::default(), 8, false);
    let sensing = SensingLoop::new(
        TraceSource::from_text(&text),
        WinkMachine::new(
            WinkTimings {
                hold_time: 3.0,
                idle_reset: 0.5,
            },
            false,
        ),
        CollectingHud::default(),
        Duration::from_millis(5),
    );

    let (_command_tx, command_rx) = mpsc::channel(4);
    let summary = sensing
        .run(&dispatcher, command_rx, CancellationToken::new())
        .await;

    assert_eq!(summary.exit, LoopExit::SourceFinished);
    assert_eq!(summary.ticks, 222);
    assert_eq!(summary.intents, 0);
    assert_eq!(summary.final_phase, WinkPhase::Idle);
}

#[tokio::test]
async fn operator_force_off_resets_and_sends_off() {
    let light = RecordingLight::default();
    let mut dispatcher = LightDispatcher::spawn(light.clone(), 8, true);

    // A long hold that would fire at 3.0s unless interrupted.
    let sensing = SensingLoop::new(
        trace((0..2_000).map(|tick| (true, tick as f64 / 1000.0))),
        machine(true),
        CollectingHud::default(),
        Duration::from_millis(5),
    );

    let (command_tx, command_rx) = mpsc::channel(4);
    command_tx.send(OperatorCommand::ForceOff).await.unwrap();
    command_tx.send(OperatorCommand::Quit).await.unwrap();

    let summary = sensing
        .run(&dispatcher, command_rx, CancellationToken::new())
        .await;

    assert_eq!(summary.exit, LoopExit::Quit);
    assert_eq!(summary.intents, 0);
    assert!(!summary.light_mirror);

    dispatcher.shutdown(Duration::from_secs(2)).await.unwrap();
    assert_eq!(light.calls(), vec![false]);
    assert!(!dispatcher.current_light_state());
}

#[tokio::test]
async fn cancellation_stops_the_loop() {
    let dispatcher = LightDispatcher::spawn(RecordingLight::default(), 8, false);
    let sensing = SensingLoop::new(
        trace((0..100_000).map(|tick| (false, tick as f64))),
        machine(false),
        CollectingHud::default(),
        Duration::from_millis(1),
    );

    let token = CancellationToken::new();
    let canceller = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(30)).await;
        canceller.cancel();
    });

    let (_command_tx, command_rx) = mpsc::channel(4);
    let summary = sensing.run(&dispatcher, command_rx, token).await;
    assert_eq!(summary.exit, LoopExit::Cancelled);
    assert_eq!(summary.intents, 0);
}
