use clap::Parser;
use std::path::PathBuf;

use crate::core::options::CacheOptions;
use crate::core::player::{Loop, MissPolicy};

// Build version with target info
const VERSION_INFO: &str = const_format::concatcp!(
    env!("CARGO_PKG_VERSION"),
    "\n",
    "Image:  image-rs (exr, png, jpeg, tiff, tga, hdr)\n",
    "Target: ",
    std::env::consts::ARCH,
    "-",
    std::env::consts::OS
);

/// Headless timeline player with read-ahead frame cache
#[derive(Parser, Debug)]
#[command(author, version = VERSION_INFO, about, long_about = None)]
pub struct Args {
    /// Image sequence mask, e.g. shot.####.exr or shot.%04d.png
    #[arg(value_name = "PATTERN", required_unless_present = "synthetic")]
    pub pattern: Option<String>,

    /// Play a procedural test pattern instead of files
    #[arg(long = "synthetic")]
    pub synthetic: bool,

    /// Source frame range of the sequence
    #[arg(long = "range", value_names = ["START", "END"], num_args = 2, default_values_t = [1, 100])]
    pub range: Vec<i64>,

    /// Timeline frame rate
    #[arg(long = "fps", value_name = "FPS", default_value_t = 24.0)]
    pub fps: f64,

    /// Start frame (timeline frame, 0-based)
    #[arg(long = "frame", value_name = "N")]
    pub start_frame: Option<i64>,

    /// Play backwards
    #[arg(short = 'r', long = "reverse")]
    pub reverse: bool,

    /// Behavior at range end
    #[arg(long = "loop", value_enum, default_value = "loop")]
    pub loop_mode: LoopArg,

    /// What to show while a frame isn't decoded
    #[arg(long = "miss", value_enum, default_value = "hold")]
    pub miss: MissArg,

    /// Seconds to play before exiting
    #[arg(short = 's', long = "seconds", value_name = "SEC", default_value_t = 5.0)]
    pub seconds: f64,

    /// Seconds to cache ahead of the playhead
    #[arg(long = "read-ahead", value_name = "SEC")]
    pub read_ahead: Option<f64>,

    /// Seconds to cache behind the playhead
    #[arg(long = "read-behind", value_name = "SEC")]
    pub read_behind: Option<f64>,

    /// Video cache budget in megabytes
    #[arg(long = "video-mb", value_name = "MB")]
    pub video_mb: Option<usize>,

    /// Audio cache budget in megabytes
    #[arg(long = "audio-mb", value_name = "MB")]
    pub audio_mb: Option<usize>,

    /// Video budget as a fraction of free RAM (0.0-1.0), overrides --video-mb
    #[arg(long = "mem", value_name = "FRACTION")]
    pub mem_fraction: Option<f64>,

    /// Decode worker threads (0 = auto)
    #[arg(short = 'w', long = "workers", value_name = "N")]
    pub workers: Option<usize>,

    /// Write log to file (default: tlcache.log in the data dir)
    #[arg(short = 'l', long = "log", value_name = "LOG_FILE")]
    pub log_file: Option<Option<PathBuf>>,

    /// Increase logging verbosity (default: warn, -v: info, -vv: debug, -vvv+: trace)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    pub verbosity: u8,

    /// Custom configuration directory (overrides default platform paths)
    #[arg(short = 'c', long = "config-dir", value_name = "DIR")]
    pub config_dir: Option<PathBuf>,

    /// Save the effective cache options to the config dir
    #[arg(long = "save-options")]
    pub save_options: bool,
}

#[derive(clap::ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopArg {
    Loop,
    Once,
    Pingpong,
}

impl From<LoopArg> for Loop {
    fn from(arg: LoopArg) -> Self {
        match arg {
            LoopArg::Loop => Loop::Loop,
            LoopArg::Once => Loop::Once,
            LoopArg::Pingpong => Loop::PingPong,
        }
    }
}

#[derive(clap::ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissArg {
    Hold,
    Placeholder,
    Stall,
}

impl From<MissArg> for MissPolicy {
    fn from(arg: MissArg) -> Self {
        match arg {
            MissArg::Hold => MissPolicy::HoldLast,
            MissArg::Placeholder => MissPolicy::Placeholder,
            MissArg::Stall => MissPolicy::Stall,
        }
    }
}

impl Args {
    /// Layer CLI overrides on top of file/default options
    pub fn apply_to(&self, mut options: CacheOptions) -> CacheOptions {
        if let Some(v) = self.read_ahead {
            options.read_ahead = v;
        }
        if let Some(v) = self.read_behind {
            options.read_behind = v;
        }
        if let Some(mb) = self.video_mb {
            options.video_budget_bytes = mb * 1024 * 1024;
        }
        if let Some(mb) = self.audio_mb {
            options.audio_budget_bytes = mb * 1024 * 1024;
        }
        if let Some(n) = self.workers {
            options.worker_count = n;
        }
        if let Some(fraction) = self.mem_fraction {
            options = options.with_system_budget(fraction, 2.0);
        }
        options
    }

    /// Source frame range as (first, last)
    pub fn source_range(&self) -> (i64, i64) {
        match self.range.as_slice() {
            [start, end] => (*start, *end),
            _ => (1, 100),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_pattern_and_overrides() {
        let args = Args::try_parse_from([
            "tlcache",
            "shot.####.exr",
            "--range",
            "1001",
            "1100",
            "--read-ahead",
            "2",
            "--video-mb",
            "512",
            "-vv",
        ])
        .unwrap();

        assert_eq!(args.pattern.as_deref(), Some("shot.####.exr"));
        assert_eq!(args.source_range(), (1001, 1100));
        assert_eq!(args.verbosity, 2);

        let options = args.apply_to(CacheOptions::default());
        assert_eq!(options.read_ahead, 2.0);
        assert_eq!(options.video_budget_bytes, 512 * 1024 * 1024);
        assert_eq!(options.read_behind, CacheOptions::default().read_behind);
    }

    #[test]
    fn test_synthetic_needs_no_pattern() {
        let args = Args::try_parse_from(["tlcache", "--synthetic", "--loop", "pingpong", "--miss", "stall"]).unwrap();
        assert!(args.pattern.is_none());
        assert_eq!(Loop::from(args.loop_mode), Loop::PingPong);
        assert_eq!(MissPolicy::from(args.miss), MissPolicy::Stall);
    }

    #[test]
    fn test_pattern_required_otherwise() {
        assert!(Args::try_parse_from(["tlcache"]).is_err());
    }
}
