pub mod state;

pub use state::{
    PresenceSample, ToggleIntent, WinkMachine, WinkPhase, WinkProgress, WinkSession, WinkTimings,
};
