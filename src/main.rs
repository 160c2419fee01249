use std::time::Duration;

use chrono::{DateTime, Local};
use color_eyre::{eyre::eyre, Result};
use padmux::config::Config;
use padmux::controller::hub::{self, ControllerHub, Polling};
use padmux::controller::keyboard::KeyboardHandle;
use tokio::time::MissedTickBehavior;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<()> {
    setup()?;

    let config = Config::load().await?;
    if config.poll.tick_hz == 0 {
        return Err(eyre!("poll.tick_hz must be greater than zero"));
    }
    info!("Loaded configuration from {}", Config::path().display());

    // Key events come from the window layer; without one the handle stays idle
    let keyboard = KeyboardHandle::new(config.keyboard.clone());
    let mut hub = hub::assemble(&config, keyboard).initialize();
    info!("Polling backends: {}", hub.backend_names().join(", "));

    run(&mut hub, &config).await;

    hub.shutdown();
    info!("padmux stopped");
    Ok(())
}

async fn run(hub: &mut ControllerHub<Polling>, config: &Config) {
    let mut ticker =
        tokio::time::interval(Duration::from_secs_f64(1.0 / f64::from(config.poll.tick_hz)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut stats = tokio::time::interval(Duration::from_secs(
        config.poll.stats_interval_secs.max(1),
    ));
    // The first tick completes immediately
    stats.tick().await;

    let started = Local::now();
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                hub.poll();
            }
            _ = stats.tick() => log_stats(hub, started),
            _ = &mut ctrl_c => {
                info!("Ctrl-C received, shutting down");
                break;
            }
        }
    }
}

fn log_stats(hub: &ControllerHub<Polling>, started: DateTime<Local>) {
    let uptime = Local::now().signed_duration_since(started);
    let seconds = uptime.num_milliseconds() as f64 / 1000.0;
    let rate = if seconds > 0.0 {
        hub.polls() as f64 / seconds
    } else {
        0.0
    };
    info!(
        "Up since {} ({}s), {} polls ({:.1}/s), pad: {}",
        started.format("%H:%M:%S"),
        uptime.num_seconds(),
        hub.polls(),
        rate,
        hub.last()
    );
}

fn setup() -> Result<()> {
    if std::env::var("RUST_LIB_BACKTRACE").is_err() {
        std::env::set_var("RUST_LIB_BACKTRACE", "0")
    }
    color_eyre::install()?;
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "info")
    }
    setup_logging_env();
    Ok(())
}

fn setup_logging_env() {
    let level = std::env::var("RUST_LOG")
        .ok()
        .and_then(|level| level.parse::<Level>().ok())
        .unwrap_or(Level::INFO);

    FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .pretty()
        .init();
}
