use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;

pub const DEFAULT_LIVE_COMMAND: &str = "ffmpeg -y -i $INPUT -movflags +faststart -c:v libx264 -preset veryfast -crf 28 -c:a aac -b:a 128k $OUTPUT";
pub const DEFAULT_RECORDED_COMMAND: &str =
    "yt-dlp $INPUT -o $OUTPUT --no-playlist --hls-prefer-ffmpeg --no-part";

const MEGABYTE: u64 = 1024 * 1024;

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    /// Directory holding in-flight and about-to-be-delivered artifacts.
    pub work_dir: PathBuf,
    pub max_concurrent_transfers: usize,
    pub max_artifact_size_mb: u64,
    /// Denominator of the progress percentage; the real total is unknown up front.
    pub assumed_total_size_mb: u64,
    pub standard_cooldown: Duration,
    pub punitive_block: Duration,
    pub progress_poll_interval: Duration,
    pub expire_finished_jobs_after: Duration,
    /// Shared secret for elevation; `None` disables it.
    pub owner_password: Option<String>,
    pub trusted_domain: String,
    pub player_prefix: String,
    pub caption_footer: String,
    pub delivery_name: String,
    pub live_command: String,
    pub recorded_command: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 3600,
            work_dir: PathBuf::from("data"),
            max_concurrent_transfers: 4,
            max_artifact_size_mb: 1024,
            assumed_total_size_mb: 1024,
            standard_cooldown: Duration::from_secs(600),
            punitive_block: Duration::from_secs(1200),
            progress_poll_interval: Duration::from_secs(2),
            expire_finished_jobs_after: Duration::from_secs(60 * 60),
            owner_password: None,
            trusted_domain: "cloudfront.net".to_owned(),
            player_prefix: "https://studysmarterx.netlify.app/Player?url=".to_owned(),
            caption_footer: String::new(),
            delivery_name: "video.mp4".to_owned(),
            live_command: DEFAULT_LIVE_COMMAND.to_owned(),
            recorded_command: DEFAULT_RECORDED_COMMAND.to_owned(),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let seconds = |key: &'static str, default: Duration| -> Result<Duration, ConfigError> {
            parse(&lookup, key, default.as_secs()).map(Duration::from_secs)
        };
        let text = |key: &str, default: String| lookup(key).unwrap_or(default);

        let config = Self {
            port: parse(&lookup, "PORT", defaults.port)?,
            work_dir: lookup("FFQUEUE_WORK_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.work_dir),
            max_concurrent_transfers: parse(
                &lookup,
                "FFQUEUE_MAX_CONCURRENT_TRANSFERS",
                defaults.max_concurrent_transfers,
            )?,
            max_artifact_size_mb: parse(
                &lookup,
                "FFQUEUE_MAX_ARTIFACT_SIZE_MB",
                defaults.max_artifact_size_mb,
            )?,
            assumed_total_size_mb: parse(
                &lookup,
                "FFQUEUE_ASSUMED_TOTAL_SIZE_MB",
                defaults.assumed_total_size_mb,
            )?,
            standard_cooldown: seconds(
                "FFQUEUE_STANDARD_COOLDOWN_SECONDS",
                defaults.standard_cooldown,
            )?,
            punitive_block: seconds("FFQUEUE_PUNITIVE_BLOCK_SECONDS", defaults.punitive_block)?,
            progress_poll_interval: seconds(
                "FFQUEUE_PROGRESS_POLL_INTERVAL_SECONDS",
                defaults.progress_poll_interval,
            )?,
            expire_finished_jobs_after: seconds(
                "FFQUEUE_EXPIRE_FINISHED_JOBS_AFTER_SECONDS",
                defaults.expire_finished_jobs_after,
            )?,
            owner_password: lookup("FFQUEUE_OWNER_PASSWORD").filter(|p| !p.is_empty()),
            trusted_domain: text("FFQUEUE_TRUSTED_DOMAIN", defaults.trusted_domain),
            player_prefix: text("FFQUEUE_PLAYER_PREFIX", defaults.player_prefix),
            caption_footer: text("FFQUEUE_CAPTION_FOOTER", defaults.caption_footer),
            delivery_name: text("FFQUEUE_DELIVERY_NAME", defaults.delivery_name),
            live_command: text("FFQUEUE_LIVE_COMMAND", defaults.live_command),
            recorded_command: text("FFQUEUE_RECORDED_COMMAND", defaults.recorded_command),
        };

        if config.max_concurrent_transfers == 0 {
            return Err(ConfigError::Zero("FFQUEUE_MAX_CONCURRENT_TRANSFERS"));
        }
        if config.assumed_total_size_mb == 0 {
            return Err(ConfigError::Zero("FFQUEUE_ASSUMED_TOTAL_SIZE_MB"));
        }
        if config.progress_poll_interval.is_zero() {
            return Err(ConfigError::Zero("FFQUEUE_PROGRESS_POLL_INTERVAL_SECONDS"));
        }

        Ok(config)
    }

    pub fn max_artifact_bytes(&self) -> u64 {
        self.max_artifact_size_mb * MEGABYTE
    }
}

fn parse<F, T>(lookup: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        None => Ok(default),
        Some(value) => {
            let parsed = value.trim().parse::<T>();
            parsed.map_err(|_| ConfigError::Invalid { key, value })
        }
    }
}
