use std::fmt;

use serde::Serialize;

use crate::light::{on_off, DispatchOutcome};
use crate::wink::{WinkPhase, WinkProgress};

const BAR_WIDTH: usize = 20;

/// Everything the overlay shows for one tick.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HudFrame {
    pub phase: WinkPhase,
    pub progress: WinkProgress,
    pub hold_time: f64,
    /// Locally tracked light state; may disagree with the device after a
    /// failed command.
    pub light_on: bool,
    pub last_dispatch: Option<DispatchOutcome>,
}

impl fmt::Display for HudFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let filled = (self.progress.fraction.clamp(0.0, 1.0) * BAR_WIDTH as f64).round() as usize;
        write!(
            f,
            "WINK CHARGE [{}{}] {:.1}s / {:.1}s | LIGHT: {}",
            "#".repeat(filled),
            ".".repeat(BAR_WIDTH - filled),
            self.progress.elapsed,
            self.hold_time,
            on_off(self.light_on)
        )?;

        if let Some(outcome) = &self.last_dispatch {
            if !outcome.succeeded {
                write!(f, " | last {} command FAILED", on_off(outcome.desired_on))?;
            }
        }
        Ok(())
    }
}

pub trait HudSink {
    fn render(&mut self, frame: &HudFrame);
}

/// Prints the HUD line whenever it changes.
#[derive(Debug, Default)]
pub struct ConsoleHud {
    last_line: Option<String>,
}

impl ConsoleHud {
    pub fn new() -> Self {
        Self::default()
    }
}

impl HudSink for ConsoleHud {
    fn render(&mut self, frame: &HudFrame) {
        let line = frame.to_string();
        if self.last_line.as_deref() == Some(line.as_str()) {
            return;
        }
        log::info!("{line}");
        self.last_line = Some(line);
    }
}
