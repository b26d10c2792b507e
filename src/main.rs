use tlcache::cli::Args;
use tlcache::core::cache_man::{CacheManager, PlayerCacheInfo};
use tlcache::core::observer::Delivery;
use tlcache::core::options::CacheOptions;
use tlcache::core::player::{Player, Shown};
use tlcache::entities::{Composition, ReaderRegistry, Timeline};
use tlcache::paths::{self, PathConfig};

use anyhow::{Context, Result, bail};
use clap::Parser;
use log::{debug, info, warn};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Driver tick (UI refresh rate stand-in)
const TICK: Duration = Duration::from_millis(4);

/// Upper bound for the initial cache fill
const PREROLL_TIMEOUT: Duration = Duration::from_secs(10);

fn main() -> Result<()> {
    // Parse command-line arguments first (needed for log setup)
    let args = Args::parse();

    // Create path configuration from CLI args and environment
    let path_config = PathConfig::from_env_and_cli(args.config_dir.clone());
    if let Err(e) = paths::ensure_dirs(&path_config) {
        eprintln!("Warning: Failed to create application directories: {}", e);
    }

    init_logging(&args, &path_config)?;

    info!("tlcache {} starting...", env!("CARGO_PKG_VERSION"));
    debug!("Command-line args: {:?}", args);

    let options = load_options(&args, &path_config)?;
    let timeline = build_timeline(&args)?;

    let mut cache = CacheManager::new(Arc::clone(&timeline), Arc::new(ReaderRegistry::with_defaults()), options)
        .context("Failed to start cache manager")?;

    // Progress goes to the log once per tick, never from inside the cache
    cache
        .observe_cache_info()
        .subscribe(Delivery::Deferred, |info: &PlayerCacheInfo| {
            debug!(
                "Cache: {:.0}% ahead, {} video / {} audio frames, {:?}",
                info.percentage, info.video_frames, info.audio_frames, info.video_ranges
            );
        });

    let mut player = Player::new(&cache);
    player.set_loop_mode(args.loop_mode.into());
    player.set_miss_policy(args.miss.into());
    if let Some(frame) = args.start_frame {
        player.seek(&mut cache, frame);
    }

    // Clock starts on the first tick, so preroll time isn't skipped over
    if args.reverse {
        player.play_reverse();
    } else {
        player.play_forward();
    }
    player.sync_cache(&mut cache);

    let filled = cache.preroll(PREROLL_TIMEOUT);
    info!("Preroll: {:.0}% of read-ahead resident", filled);

    run(&mut player, &mut cache, Duration::from_secs_f64(args.seconds.max(0.0)));
    Ok(())
}

fn init_logging(args: &Args, path_config: &PathConfig) -> Result<()> {
    // 0 (default) = warn, 1 (-v) = info, 2 (-vv) = debug, 3+ (-vvv) = trace
    let log_level = match args.verbosity {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };

    if let Some(log_path_opt) = &args.log_file {
        let log_path = log_path_opt
            .clone()
            .unwrap_or_else(|| paths::data_file(paths::LOG_FILE, path_config));
        let file = std::fs::File::create(&log_path)
            .with_context(|| format!("Failed to create log file: {}", log_path.display()))?;

        env_logger::Builder::new()
            .filter_level(log_level)
            .format_timestamp_millis()
            .target(env_logger::Target::Pipe(Box::new(file)))
            .init();

        info!("Logging to file: {} (level: {:?})", log_path.display(), log_level);
    } else {
        // Console logging (respects RUST_LOG if set)
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level.as_str()))
            .format_timestamp_millis()
            .init();
    }
    Ok(())
}

/// Defaults < options file < CLI flags
fn load_options(args: &Args, path_config: &PathConfig) -> Result<CacheOptions> {
    let path = paths::config_file(paths::OPTIONS_FILE, path_config);
    let base = if path.exists() {
        info!("Options: {}", path.display());
        CacheOptions::load(&path).with_context(|| format!("Failed to load {}", path.display()))?
    } else {
        CacheOptions::default()
    };

    let options = args.apply_to(base);
    options.validate()?;

    if args.save_options {
        options
            .save(&path)
            .with_context(|| format!("Failed to save {}", path.display()))?;
        info!("Saved options to {}", path.display());
    }
    Ok(options)
}

fn build_timeline(args: &Args) -> Result<Arc<dyn Timeline>> {
    if !(args.fps > 0.0 && args.fps.is_finite()) {
        bail!("Invalid --fps {}", args.fps);
    }
    let (first, last) = args.source_range();

    let pattern = match (&args.pattern, args.synthetic) {
        (_, true) => "synthetic.####.synth".to_string(),
        (Some(pattern), false) => pattern.clone(),
        (None, false) => bail!("No sequence pattern given (use --synthetic for a test pattern)"),
    };
    info!("Sequence: {} [{}..{}] @ {} fps", pattern, first, last, args.fps);

    let comp = Composition::from_sequence(pattern, first, last, args.fps);
    Ok(Arc::new(comp))
}

/// Drive the player until `duration` elapses
fn run(player: &mut Player, cache: &mut CacheManager, duration: Duration) {
    let started = Instant::now();
    let mut shown = 0u64;
    let mut held = 0u64;

    while started.elapsed() < duration {
        let tick = player.update(cache);
        if tick.advanced > 0 {
            match tick.shown {
                Shown::Ready(_) => shown += 1,
                Shown::Held(_) | Shown::Placeholder(_) | Shown::Nothing => {
                    held += 1;
                    debug!("Frame {} not ready", tick.frame);
                }
            }
        }
        if !player.is_playing() {
            break;
        }
        std::thread::sleep(TICK);
    }

    let stats = cache.stats();
    if held > 0 {
        warn!("{} of {} displayed frames were not ready in time", held, shown + held);
    }
    info!(
        "Done: frame {}, hit rate {:.1}%, {} inserted, {} stale, {} failed",
        player.current_frame(),
        stats.hit_rate() * 100.0,
        stats.inserted,
        stats.stale,
        stats.failures
    );
}
