use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum WinkPhase {
    Idle,
    Holding,
    Charged,
}

impl Default for WinkPhase {
    fn default() -> Self {
        WinkPhase::Idle
    }
}

/// One marker reading. `timestamp` is monotonic seconds.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct PresenceSample {
    pub visible: bool,
    pub timestamp: f64,
}

impl PresenceSample {
    pub fn visible(timestamp: f64) -> Self {
        Self {
            visible: true,
            timestamp,
        }
    }

    pub fn absent(timestamp: f64) -> Self {
        Self {
            visible: false,
            timestamp,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ToggleIntent {
    pub desired_on: bool,
}

/// A continuous stretch of marker visibility that may become a hold.
#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WinkSession {
    pub start_time: Option<f64>,
    pub triggered: bool,
    pub last_seen_time: Option<f64>,
}

impl WinkSession {
    pub fn is_active(&self) -> bool {
        self.start_time.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WinkTimings {
    /// Seconds the marker must stay visible before the light toggles.
    pub hold_time: f64,
    /// Seconds of continuous absence before an in-progress hold is abandoned.
    pub idle_reset: f64,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WinkProgress {
    pub elapsed: f64,
    pub fraction: f64,
    pub triggered: bool,
}

/// Turns per-tick marker visibility into at most one toggle per hold.
///
/// Brief dropouts do not cancel a hold; only `idle_reset` seconds of
/// continuous absence do. Once a hold has fired it stays `Charged` until the
/// session resets, so holding past the threshold never fires twice.
///
/// The machine keeps its own mirror of the light state and flips it each time
/// it emits an intent. The mirror is optimistic: it is not corrected when the
/// remote call later fails.
#[derive(Debug, Clone)]
pub struct WinkMachine {
    timings: WinkTimings,
    session: WinkSession,
    light_on: bool,
}

impl WinkMachine {
    pub fn new(timings: WinkTimings, light_on: bool) -> Self {
        Self {
            timings,
            session: WinkSession::default(),
            light_on,
        }
    }

    pub fn timings(&self) -> WinkTimings {
        self.timings
    }

    pub fn session(&self) -> WinkSession {
        self.session
    }

    pub fn phase(&self) -> WinkPhase {
        match (self.session.is_active(), self.session.triggered) {
            (false, _) => WinkPhase::Idle,
            (true, false) => WinkPhase::Holding,
            (true, true) => WinkPhase::Charged,
        }
    }

    pub fn light_mirror(&self) -> bool {
        self.light_on
    }

    pub fn set_light_mirror(&mut self, on: bool) {
        self.light_on = on;
    }

    pub fn observe(&mut self, sample: PresenceSample) -> Option<ToggleIntent> {
        let Some(start_time) = self.session.start_time else {
            if sample.visible {
                self.session = WinkSession {
                    start_time: Some(sample.timestamp),
                    triggered: false,
                    last_seen_time: Some(sample.timestamp),
                };
            }
            return None;
        };

        if sample.visible {
            self.session.last_seen_time = Some(sample.timestamp);
            if !self.session.triggered && sample.timestamp - start_time >= self.timings.hold_time {
                self.session.triggered = true;
                self.light_on = !self.light_on;
                return Some(ToggleIntent {
                    desired_on: self.light_on,
                });
            }
            return None;
        }

        let last_seen = self.session.last_seen_time.unwrap_or(start_time);
        if sample.timestamp - last_seen >= self.timings.idle_reset {
            self.session = WinkSession::default();
        }
        None
    }

    pub fn progress(&self, now: f64) -> WinkProgress {
        let elapsed = match self.session.start_time {
            Some(start) => (now - start).max(0.0),
            None => 0.0,
        };
        let fraction = if self.timings.hold_time > 0.0 {
            (elapsed / self.timings.hold_time).min(1.0)
        } else {
            1.0
        };

        WinkProgress {
            elapsed,
            fraction,
            triggered: self.session.triggered,
        }
    }

    pub fn force_reset(&mut self) {
        self.session = WinkSession::default();
    }
}
