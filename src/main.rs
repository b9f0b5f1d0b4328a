use std::{
    path::{Path, PathBuf},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::Duration,
};

use clap::{Parser, Subcommand, arg};
use log::warn;

use f1replay::{
    Direction, FileFrameCache, PlaybackController, PlaybackSpeed, RaceEventKind, ReplayConfig,
    ReplayError, Session, SessionLoader,
    frames::Gap,
    summary::RaceSummary,
    telemetry::JsonlSampleSource,
};

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
struct Args {
    /// Frame cache directory, overrides the config file
    #[arg(long, global = true)]
    cache_dir: Option<PathBuf>,

    /// Frames per second of session time, overrides the config file
    #[arg(long, global = true)]
    frame_rate: Option<f64>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Synthesize the frame sequence for a telemetry file and cache it
    Build {
        #[arg(short, long)]
        input: PathBuf,

        /// Ignore any cached frames and re-synthesize
        #[arg(short, long)]
        refresh: bool,
    },
    /// Print the final classification, pit stops and fastest lap
    Summary {
        #[arg(short, long)]
        input: PathBuf,
    },
    /// Play the session back in the terminal
    Play {
        #[arg(short, long)]
        input: PathBuf,

        #[arg(short, long, default_value_t = 1.0)]
        speed: f64,

        #[arg(long)]
        reverse: bool,
    },
}

fn load_config(args: &Args) -> Result<ReplayConfig, ReplayError> {
    let mut config = ReplayConfig::from_local_file()?.unwrap_or_default();
    if let Some(cache_dir) = &args.cache_dir {
        config.cache_dir = Some(cache_dir.clone());
    }
    if let Some(frame_rate) = args.frame_rate {
        config.frame_rate_hz = frame_rate;
    }
    config.validate()?;
    Ok(config)
}

fn load_session(
    config: &ReplayConfig,
    input: &Path,
    refresh: bool,
) -> Result<Session, ReplayError> {
    let source = JsonlSampleSource::open(input)?;
    let cache = match &config.cache_dir {
        Some(dir) => FileFrameCache::new(dir.clone())?,
        None => FileFrameCache::new_default()?,
    };
    SessionLoader::new(config.clone(), cache).load(&source, refresh)
}

fn build(config: &ReplayConfig, input: &Path, refresh: bool) -> Result<(), ReplayError> {
    let session = load_session(config, input, refresh)?;
    println!(
        "{}: {} frames ({:.1}s) for {} drivers, {:?}",
        session.title(),
        session.frames.len(),
        session.frames.duration(),
        session.drivers.len(),
        session.origin
    );
    Ok(())
}

fn summary(config: &ReplayConfig, input: &Path) -> Result<(), ReplayError> {
    let session = load_session(config, input, false)?;
    println!("{}", session.title());
    print!("{}", RaceSummary::from_frames(&session.frames));
    if !session.events.is_empty() {
        println!("Race events:");
    }
    for event in &session.events.events {
        let at = session
            .frames
            .get(event.index)
            .map_or(0.0, |frame| frame.timestamp);
        let what = match event.kind {
            RaceEventKind::Dnf { driver, lap } => {
                format!("{} out on lap {}", session.driver_code(driver), lap)
            }
            RaceEventKind::LeaderLap { lap } => match session.events.total_laps {
                Some(total) => format!("Lap {}/{}", lap, total),
                None => format!("Lap {}", lap),
            },
            RaceEventKind::TrackStatus { status, end_index } => {
                format!("{} for {} frames", status, end_index - event.index)
            }
        };
        println!("  {:>8.1}s  {}", at, what);
    }
    Ok(())
}

fn print_leaderboard(session: &Session, controller: &PlaybackController) {
    let frame = controller.current_frame();
    let state = controller.state();
    println!(
        "t={:>8.2}s  {}  {:?}{}",
        frame.timestamp,
        state.speed,
        state.direction,
        if state.paused { "  (paused)" } else { "" }
    );
    for entry in controller.current_leaderboard().iter().take(10) {
        let gap = match entry.gap {
            Gap::Leader => "Leader".to_string(),
            Gap::Behind { seconds, .. } => format!("+{:.2}s", seconds),
            Gap::Laps(laps) => format!("+{} lap(s)", laps),
        };
        println!(
            "  {:>2}. {:<4} {}",
            entry.rank,
            session.driver_code(entry.driver),
            gap
        );
    }
    for driver in frame.retired() {
        println!("      {:<4} OUT", session.driver_code(driver));
    }
}

fn play(
    config: &ReplayConfig,
    input: &Path,
    speed: f64,
    reverse: bool,
    running: Arc<AtomicBool>,
) -> Result<(), ReplayError> {
    let session = load_session(config, input, false)?;
    let mut controller = PlaybackController::new(&session.frames)?;
    controller.set_speed(PlaybackSpeed::try_from(speed)?);
    if reverse {
        controller.seek(i64::MAX);
        controller.set_direction(Direction::Backward);
    }
    controller.resume();

    // cached frames carry their own rate
    let dt = session.frames.dt;
    let frames_per_report = (1.0 / dt).round().max(1.0) as usize;
    let tick = Duration::from_secs_f64(dt);
    let mut ticks = 0usize;
    print_leaderboard(&session, &controller);
    while running.load(Ordering::SeqCst) && !controller.state().paused {
        thread::sleep(tick);
        controller.tick();
        ticks += 1;
        if ticks % frames_per_report == 0 || controller.state().paused {
            print_leaderboard(&session, &controller);
        }
    }
    Ok(())
}

fn main() {
    #[cfg(debug_assertions)]
    colog::init();

    let args = Args::parse();
    let running = Arc::new(AtomicBool::new(true));
    let handler_flag = running.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        println!("Exiting...");
        handler_flag.store(false, Ordering::SeqCst);
    }) {
        warn!("Could not set Ctrl-C handler: {}", e);
    }

    let result = load_config(&args).and_then(|config| match &args.command {
        Commands::Build { input, refresh } => build(&config, input, *refresh),
        Commands::Summary { input } => summary(&config, input),
        Commands::Play {
            input,
            speed,
            reverse,
        } => play(&config, input, *speed, *reverse, running.clone()),
    });

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
