use std::{fs, path::Path};

use anyhow::{Context, Result};

use crate::wink::PresenceSample;

const ENABLE_LOGS: bool = true;

use crate::log_warn;

/// What a presence source produced for one tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Reading {
    Sample(PresenceSample),
    /// Nothing usable this tick; treated as the marker being absent. `at` is
    /// set when the source still knows where it is on its own timeline.
    /// Otherwise the loop stamps the gap from its clock.
    Missing { at: Option<f64> },
    Finished,
}

/// Per-tick marker visibility.
pub trait PresenceSource {
    fn read(&mut self) -> Reading;
}

/// Replays presence samples recorded one JSON object per line:
/// `{"visible": true, "timestamp": 0.1}`.
pub struct TraceSource {
    lines: Vec<String>,
    cursor: usize,
}

impl TraceSource {
    pub fn open(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read trace {}", path.display()))?;
        Ok(Self::from_text(&contents))
    }

    pub fn from_text(text: &str) -> Self {
        let lines = text
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_owned)
            .collect();

        Self { lines, cursor: 0 }
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}

impl PresenceSource for TraceSource {
    fn read(&mut self) -> Reading {
        let Some(line) = self.lines.get(self.cursor) else {
            return Reading::Finished;
        };
        self.cursor += 1;

        match serde_json::from_str::<PresenceSample>(line) {
            Ok(sample) => Reading::Sample(sample),
            Err(err) => {
                log_warn!("trace line {} unreadable: {err}", self.cursor);
                Reading::Missing { at: None }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replays_samples_then_finishes() {
        let mut source = TraceSource::from_text(
            "{\"visible\": true, \"timestamp\": 0.0}\n\n{\"visible\": false, \"timestamp\": 0.1}\n",
        );
        assert_eq!(source.len(), 2);
        assert_eq!(source.read(), Reading::Sample(PresenceSample::visible(0.0)));
        assert_eq!(source.read(), Reading::Sample(PresenceSample::absent(0.1)));
        assert_eq!(source.read(), Reading::Finished);
        assert_eq!(source.read(), Reading::Finished);
    }

    #[test]
    fn bad_line_is_missing_without_a_timestamp() {
        let mut source =
            TraceSource::from_text("{\"visible\": true, \"timestamp\": 1.5}\nnot json\n");
        source.read();
        assert_eq!(source.read(), Reading::Missing { at: None });
        assert_eq!(source.read(), Reading::Finished);
    }
}
