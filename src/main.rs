mod app;
mod bus;
mod clock;
mod components;
mod config;
mod error;
mod hardware;
mod util;

use std::env;
use std::path::PathBuf;
use std::thread;

use anyhow::{Context, Result};
use crossbeam_channel::Receiver;
use signal_hook::consts::{SIGINT, SIGTERM};
use signal_hook::iterator::Signals;
use tracing::{info, warn};

use crate::app::App;
use crate::bus::MessageBus;
use crate::clock::Clock;
use crate::config::PanelConfig;
use crate::hardware::{Gpio, SimulatedGpio};

fn main() -> Result<()> {
    init_tracing();

    let explicit = env::args_os().nth(1).map(PathBuf::from);
    let config = match config::load_settings(explicit.as_deref())? {
        Some(settings) => {
            info!(path = %settings.path.display(), "loaded configuration");
            settings.config
        }
        None => {
            warn!("no panel_ctrl configuration found; running without peripherals");
            PanelConfig::default()
        }
    };

    let (bus, commands) = bus::start_stdio()?;
    let shutdown = shutdown_channel()?;

    match hardware::open(&config.gpio) {
        Ok(gpio) => run(&config, gpio, bus, commands, shutdown),
        Err(err) => {
            warn!(error = %err, "GPIO unavailable; using simulated pins");
            run(&config, SimulatedGpio::headless(), bus, commands, shutdown)
        }
    }
}

fn run<G, B>(
    config: &PanelConfig,
    gpio: G,
    bus: B,
    commands: Receiver<bus::BusMessage>,
    shutdown: Receiver<()>,
) -> Result<()>
where
    G: Gpio + Clone,
    B: MessageBus,
{
    let clock = Clock::system(config.animation.interval());
    let mut app = App::new(config, gpio, bus, clock);
    app.set_command_channel(commands);
    app.set_shutdown_channel(shutdown);
    app.run()
}

fn shutdown_channel() -> Result<Receiver<()>> {
    let mut signals =
        Signals::new([SIGINT, SIGTERM]).context("failed to install signal handlers")?;
    let (tx, rx) = crossbeam_channel::bounded(1);

    thread::Builder::new()
        .name("signals".into())
        .spawn(move || {
            if let Some(signal) = signals.forever().next() {
                info!(signal, "received termination signal");
                let _ = tx.send(());
            }
        })
        .context("failed to spawn signal handler")?;

    Ok(rx)
}

fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_level(true)
        .compact()
        .try_init();
}
