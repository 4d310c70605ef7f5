pub mod client;
pub mod dispatcher;
pub mod govee;

pub use client::{on_off, DryRunClient, LightClient};
pub use dispatcher::{DispatchOutcome, LightDispatcher, SubmitStatus};
pub use govee::GoveeClient;
