pub mod args;
pub mod hud;
pub mod light;
pub mod operator;
pub mod sensing;
pub mod settings;
pub mod utils;
pub mod wink;

use anyhow::{Context, Result};
use clap::Parser;
use log::{info, warn};
use tokio::sync::mpsc;
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;

use args::Args;
use hud::ConsoleHud;
use light::{DryRunClient, GoveeClient, LightClient, LightDispatcher};
use operator::spawn_stdin_reader;
use sensing::{FrameDirSource, MarkerDetector, PresenceSource, SensingLoop, TraceSource};
use settings::Settings;
use wink::WinkMachine;

const STDIN_RELEASE_TIMEOUT: Duration = Duration::from_millis(200);

pub fn run() -> Result<()> {
    // Initialize logging (reads RUST_LOG env var)
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .init();

    let args = Args::parse();

    let mut settings = Settings::load(&args.config)?;
    settings.apply_env_overrides();
    settings
        .validate(args.dry_run)
        .context("invalid configuration")?;

    info!(
        "WinkCharge starting: hold {:.2}s, idle reset {:.2}s",
        settings.wink.hold_time_secs, settings.wink.idle_reset_secs
    );

    let runtime = tokio::runtime::Runtime::new().context("failed to start tokio runtime")?;
    let result = runtime.block_on(async move {
        if args.dry_run {
            start(&args, &settings, DryRunClient).await
        } else {
            let client = GoveeClient::new(&settings.govee)?;
            start(&args, &settings, client).await
        }
    });

    // The stdin reader parks a blocking thread that would otherwise hold up exit.
    runtime.shutdown_timeout(STDIN_RELEASE_TIMEOUT);
    result
}

async fn start<C: LightClient>(args: &Args, settings: &Settings, client: C) -> Result<()> {
    match (&args.trace, &args.frames) {
        (Some(trace), _) => {
            let source = TraceSource::open(trace)?;
            info!("replaying {} trace samples from {}", source.len(), trace.display());
            drive(args, settings, client, source).await
        }
        (None, Some(dir)) => {
            let detector = MarkerDetector::new(settings.marker.clone());
            let source =
                FrameDirSource::open(dir, settings.sensing.frames_per_second, detector)?;
            drive(args, settings, client, source).await
        }
        (None, None) => anyhow::bail!("no presence source given (use --trace or --frames)"),
    }
}

async fn drive<C, S>(args: &Args, settings: &Settings, client: C, source: S) -> Result<()>
where
    C: LightClient,
    S: PresenceSource,
{
    info!("Using light {}", client.describe());
    let mut dispatcher = LightDispatcher::spawn(
        client,
        settings.dispatcher.queue_capacity,
        args.initial_light_on,
    );

    let cancel_token = CancellationToken::new();
    {
        let token = cancel_token.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                token.cancel();
            }
        });
    }

    let (command_tx, command_rx) = mpsc::channel(8);
    let _stdin_reader = spawn_stdin_reader(command_tx);
    info!("Type 'q' to quit, 'f' to force the light OFF and reset the wink.");

    let machine = WinkMachine::new(settings.wink.timings(), args.initial_light_on);
    let sensing = SensingLoop::new(
        source,
        machine,
        ConsoleHud::new(),
        Duration::from_millis(settings.sensing.tick_ms),
    );
    let summary = sensing.run(&dispatcher, command_rx, cancel_token).await;
    info!(
        "sensing stopped ({:?}) after {} ticks, {} toggles requested",
        summary.exit, summary.ticks, summary.intents
    );

    dispatcher
        .shutdown(Duration::from_millis(settings.dispatcher.shutdown_grace_ms))
        .await?;

    if summary.light_mirror != dispatcher.current_light_state() {
        warn!(
            "light may be out of sync: expected {} but last confirmed {}",
            light::on_off(summary.light_mirror),
            light::on_off(dispatcher.current_light_state())
        );
    }
    Ok(())
}
