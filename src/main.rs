//! Headless scene runner.
//!
//! Loads a scene (and optionally a TOML config), enables the scripted
//! radios, then plays the scene for a fixed virtual duration:
//! - a dedicated thread drives the supervisor tick and the delayed delivery
//!   queue on embassy timers
//! - a voice thread feeds sine-tone frames from every talker to the router
//!
//! At the end every radio is shut down, the final state and per-sink traffic
//! are logged, and with `--snapshot` the radio records are written as JSON.

use anyhow::{Context, anyhow, bail};
use embassy_futures::select::{Either, select, select3};
use embassy_time::{Duration, Instant, Ticker, Timer};
use env_logger::Builder;
use log::{LevelFilter, info};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;

use fieldradio::audio::codec::CodecSupport;
use fieldradio::collaborators::RadioStore;
use fieldradio::config::{ConfigHandle, RadioConfig};
use fieldradio::runtime::RadioSystem;
use fieldradio::runtime::clock::set_time_scale_percent;
use fieldradio::runtime::delivery::{DeliveryQueue, delivery_loop};
use fieldradio::runtime::scene::load_scene;
use fieldradio::runtime::voice::VoiceTraffic;
use fieldradio::supervisor::supervisor_loop;

const USAGE: &str = "usage: fieldradio <scene.json> [config.toml] [--seconds N] [--speed PERCENT] [--snapshot radios.json]";
const DEFAULT_RUN_SECONDS: u64 = 30;
const STATS_PERIOD: Duration = Duration::from_secs(5);

#[derive(Debug, PartialEq)]
struct Args {
    scene: PathBuf,
    config: Option<PathBuf>,
    seconds: u64,
    speed_percent: u32,
    snapshot: Option<PathBuf>,
}

fn parse_args(args: impl IntoIterator<Item = String>) -> anyhow::Result<Args> {
    let mut positional = Vec::new();
    let mut seconds = DEFAULT_RUN_SECONDS;
    let mut speed_percent = 100;
    let mut snapshot = None;
    let mut args = args.into_iter();
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--seconds" => {
                let value = args.next().ok_or_else(|| anyhow!("--seconds needs a value"))?;
                seconds = value.parse().with_context(|| format!("Invalid --seconds value: {value}"))?;
            }
            "--speed" => {
                let value = args.next().ok_or_else(|| anyhow!("--speed needs a value"))?;
                speed_percent = value.parse().with_context(|| format!("Invalid --speed value: {value}"))?;
            }
            "--snapshot" => {
                let value = args.next().ok_or_else(|| anyhow!("--snapshot needs a path"))?;
                snapshot = Some(PathBuf::from(value));
            }
            flag if flag.starts_with("--") => bail!("unknown option {flag}\n{USAGE}"),
            _ => positional.push(PathBuf::from(&arg)),
        }
    }

    let mut positional = positional.into_iter();
    let scene = positional.next().ok_or_else(|| anyhow!(USAGE))?;
    let config = positional.next();
    if positional.next().is_some() {
        bail!("too many arguments\n{USAGE}");
    }
    Ok(Args {
        scene,
        config,
        seconds,
        speed_percent,
        snapshot,
    })
}

fn log_stats(system: &RadioSystem, queue: &DeliveryQueue) {
    let stats = system.router.stats();
    let overview = system.control.channel_overview();
    info!(
        "Router stats: {} | channels {}/{} active | queue overflow {}",
        serde_json::to_string(&stats).unwrap_or_default(),
        overview.active.len(),
        overview.total,
        queue.overflowed()
    );
}

/// Log statistics every `STATS_PERIOD` until `run` has elapsed.
async fn report_until(system: &RadioSystem, queue: &DeliveryQueue, run: Duration) {
    let end = Instant::now() + run;
    let mut ticker = Ticker::every(STATS_PERIOD);
    loop {
        match select(ticker.next(), Timer::at(end)).await {
            Either::First(()) => log_stats(system, queue),
            Either::Second(()) => return,
        }
    }
}

fn main() -> anyhow::Result<()> {
    // Logging setup
    Builder::new()
        .filter_level(LevelFilter::Info)
        .filter(Some("fieldradio"), LevelFilter::Debug)
        .parse_default_env()
        .init();

    let args = parse_args(std::env::args().skip(1))?;
    let config = match &args.config {
        Some(path) => RadioConfig::load(path)?,
        None => RadioConfig::default(),
    };
    let scene = load_scene(&args.scene)?;
    info!("Starting up: {} radio(s), {} talker(s), {} s at {}%", scene.radios.len(), scene.talkers.len(), args.seconds, args.speed_percent);

    set_time_scale_percent(args.speed_percent);
    let sample_rate = config.audio.sample_rate;
    let config = Arc::new(ConfigHandle::new(config));
    let queue = Arc::new(DeliveryQueue::new(config.clone()));

    // INTENTIONAL LEAK: the loop thread and the voice thread borrow the system for the whole process.
    let system: &'static RadioSystem = Box::leak(Box::new(RadioSystem::new(config, scene.radios(), queue.clone(), CodecSupport::pcm16())));
    let start = scene.apply(system);
    info!("{} radio(s) enabled, {} rejected, {} missing", start.enabled.len(), start.rejected.len(), start.missing.len());

    let voice = VoiceTraffic::spawn(system.router.clone(), scene.talkers(), sample_rate).context("Failed to start voice thread")?;

    let run = Duration::from_secs(args.seconds);
    let loops = thread::Builder::new()
        .name("fieldradio-loops".to_string())
        .spawn(move || {
            futures::executor::block_on(select3(
                supervisor_loop(&system.supervisor),
                delivery_loop(&queue, &system.router),
                report_until(system, &queue, run),
            ));
            queue
        })
        .context("Failed to start loop thread")?;
    let queue = loops.join().map_err(|_| anyhow!("loop thread panicked"))?;

    let frames = voice.stop();
    info!("Voice thread routed {frames} frame(s)");
    system.control.shutdown();
    log_stats(system, &queue);
    for radio in system.store.all() {
        info!(
            "{}: enabled={} tx={} listen={} fuel={}s antennas={} range={}",
            radio.id,
            radio.enabled,
            radio.transmit_channel,
            radio.listen_channel,
            radio.fuel_seconds,
            radio.antenna_count,
            radio.final_range()
        );
    }
    for sink in system.transport.all_sinks() {
        let at = sink.position();
        info!(
            "Sink at {} ({:.1}, {:.1}, {:.1}) r={}: {} frame(s){}",
            at.world,
            at.x,
            at.y,
            at.z,
            sink.radius(),
            sink.frame_count(),
            if sink.is_closed() { ", closed" } else { "" }
        );
    }
    if let Some(path) = &args.snapshot {
        system.store.write_snapshot(path)?;
        info!("Radio snapshot written to {}", path.display());
    }
    Ok(())
}
