mod config;
mod sink;

use std::io;
use dotenv::dotenv;
use log::{debug, info};
use nix::sys::signal::{SigSet, Signal};
use sysinfo::System;
use keyscan_gpio::gpiod::GpiodDriver;
use keyscan_gpio::keypad::{self, Keymap};
use crate::config::Config;
use crate::sink::JsonLinesSink;

fn main() -> eyre::Result<()> {
    // Initialize environment and logger
    dotenv().ok();
    pretty_env_logger::init();

    const UNKNOWN_STR: &str = "???";

    info!("keyscan v{} starting...", env!("CARGO_PKG_VERSION"));
    info!(
        "Hostname {}, kernel ver {}",
        System::host_name().as_deref().unwrap_or(UNKNOWN_STR),
        System::kernel_version().as_deref().unwrap_or(UNKNOWN_STR),
    );

    debug!("Trying to load config...");
    let path = Config::path();
    let mut config = if let Some(config) = Config::try_load(&path)? {
        info!("Config loaded from {}.", path.display());
        config
    } else {
        info!("Config not found. Using default");
        let config = Config::default();
        config.save(&path)?;
        info!("Default config saved to {}.", path.display());
        config
    };
    config.apply_env()?;
    debug!("{:?}", config);

    // Blocked before any thread starts, so every thread inherits the mask and only the
    // wait below receives them.
    let signals = block_termination_signals()?;

    debug!("Initializing GPIO driver...");
    let gpio = GpiodDriver::open(&config.chip)?;
    debug!("{:?} initialized.", gpio);

    let keypad = keypad::start(
        &gpio,
        &config.keypad_config(),
        Keymap::default(),
        JsonLinesSink::new(io::stdout()),
    )?;

    info!("Scanning. Send SIGINT or SIGTERM to stop.");
    let signal = signals.wait()?;
    info!("Received {:?}, stopping", signal);

    keypad.stop();
    Ok(())
}

/// Blocks SIGINT and SIGTERM in the calling thread and returns them as a set to wait on.
fn block_termination_signals() -> nix::Result<SigSet> {
    let mut signals = SigSet::empty();
    signals.add(Signal::SIGINT);
    signals.add(Signal::SIGTERM);
    signals.thread_block()?;
    Ok(signals)
}
