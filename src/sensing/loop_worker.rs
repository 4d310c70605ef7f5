use tokio::sync::mpsc;
use tokio::time::{Duration, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::hud::{HudFrame, HudSink};
use crate::light::{on_off, LightDispatcher};
use crate::operator::OperatorCommand;
use crate::wink::{PresenceSample, ToggleIntent, WinkMachine, WinkPhase};

use super::source::{PresenceSource, Reading};

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_info, log_warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopExit {
    SourceFinished,
    Quit,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopSummary {
    pub exit: LoopExit,
    pub ticks: u64,
    pub intents: u32,
    pub final_phase: WinkPhase,
    pub light_mirror: bool,
}

/// The primary tick loop: read presence, advance the wink machine, hand any
/// toggle to the dispatcher and redraw the HUD. Nothing here waits on the
/// network.
pub struct SensingLoop<S, H> {
    source: S,
    machine: WinkMachine,
    hud: H,
    tick: Duration,
    last_timestamp: f64,
    /// Timestamp of the last timed reading and the loop clock when it arrived.
    anchor: Option<(f64, f64)>,
    intents: u32,
}

impl<S: PresenceSource, H: HudSink> SensingLoop<S, H> {
    pub fn new(source: S, machine: WinkMachine, hud: H, tick: Duration) -> Self {
        Self {
            source,
            machine,
            hud,
            tick,
            last_timestamp: 0.0,
            anchor: None,
            intents: 0,
        }
    }

    pub async fn run(
        mut self,
        dispatcher: &LightDispatcher,
        mut commands: mpsc::Receiver<OperatorCommand>,
        cancel_token: CancellationToken,
    ) -> LoopSummary {
        let mut ticker = tokio::time::interval(self.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let clock = Instant::now();
        let mut ticks: u64 = 0;
        let mut commands_open = true;

        let exit = loop {
            tokio::select! {
                _ = ticker.tick() => {
                    ticks += 1;
                    if !self.step(clock.elapsed().as_secs_f64(), dispatcher) {
                        log_info!("presence source finished after {} ticks", ticks);
                        break LoopExit::SourceFinished;
                    }
                }
                command = commands.recv(), if commands_open => match command {
                    Some(OperatorCommand::ForceOff) => self.force_off(dispatcher),
                    Some(OperatorCommand::Quit) => {
                        log_info!("operator requested quit");
                        break LoopExit::Quit;
                    }
                    None => commands_open = false,
                },
                _ = cancel_token.cancelled() => {
                    log_info!("sensing loop shutting down");
                    break LoopExit::Cancelled;
                }
            }
        };

        LoopSummary {
            exit,
            ticks,
            intents: self.intents,
            final_phase: self.machine.phase(),
            light_mirror: self.machine.light_mirror(),
        }
    }

    /// Returns false once the source has nothing more to give.
    fn step(&mut self, now: f64, dispatcher: &LightDispatcher) -> bool {
        let sample = match self.source.read() {
            Reading::Sample(sample) => {
                self.anchor = Some((sample.timestamp, now));
                sample
            }
            Reading::Missing { at: Some(at) } => {
                self.anchor = Some((at, now));
                PresenceSample::absent(at)
            }
            Reading::Missing { at: None } => {
                PresenceSample::absent(gap_timestamp(self.anchor, now))
            }
            Reading::Finished => return false,
        };
        self.last_timestamp = sample.timestamp;

        if let Some(intent) = self.machine.observe(sample) {
            self.intents += 1;
            log_info!(
                "wink held {:.1}s, toggling light {}",
                self.machine.progress(sample.timestamp).elapsed,
                on_off(intent.desired_on)
            );
            dispatcher.submit(intent);
        }

        self.render(dispatcher);
        true
    }

    fn force_off(&mut self, dispatcher: &LightDispatcher) {
        self.machine.force_reset();
        self.machine.set_light_mirror(false);
        dispatcher.submit(ToggleIntent { desired_on: false });

        let confirmed = dispatcher.current_light_state();
        if confirmed {
            log_warn!("forcing light OFF (last confirmed state ON)");
        }
        log_info!("operator forced light OFF and reset wink state");
        self.render(dispatcher);
    }

    fn render(&mut self, dispatcher: &LightDispatcher) {
        let frame = HudFrame {
            phase: self.machine.phase(),
            progress: self.machine.progress(self.last_timestamp),
            hold_time: self.machine.timings().hold_time,
            light_on: self.machine.light_mirror(),
            last_dispatch: dispatcher.last_outcome(),
        };
        self.hud.render(&frame);
    }
}

/// Places an untimed gap on the source's timeline: the last timed reading
/// advanced by the loop time since it arrived, so absence keeps accumulating.
fn gap_timestamp(anchor: Option<(f64, f64)>, now: f64) -> f64 {
    match anchor {
        Some((timestamp, seen_at)) => timestamp + (now - seen_at).max(0.0),
        None => now,
    }
}
