use anyhow::Result;
use std::{path::PathBuf, time::Duration};

use crate::sources::YtDlpExtractor;

/// Tiempos que gobiernan el ciclo de vida de una sesión.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SessionTimings {
    /// Espera máxima a que la conexión de voz quede lista
    pub ready_timeout: Duration,
    /// Espera a que el transporte se recupere solo, y tope de cada reintento
    pub reconnect_grace: Duration,
    /// Pausa fija entre reintentos de rejoin
    pub reconnect_backoff: Duration,
    pub reconnect_attempts: u32,
    /// Sin track y con la cola vacía durante este tiempo → teardown
    pub idle_timeout: Duration,
    pub occupancy_poll: Duration,
}

impl Default for SessionTimings {
    fn default() -> Self {
        Self {
            ready_timeout: Duration::from_secs(30),
            reconnect_grace: Duration::from_secs(5),
            reconnect_backoff: Duration::from_secs(5),
            reconnect_attempts: 5,
            idle_timeout: Duration::from_secs(30),
            occupancy_poll: Duration::from_secs(3),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    // Discord
    pub discord_token: String,
    pub application_id: u64,
    pub guild_id: Option<u64>, // Para comandos de desarrollo

    // Herramientas externas
    pub ytdlp_path: PathBuf,
    pub ffmpeg_path: PathBuf,
    pub ytdlp_cookies: Option<PathBuf>,

    // Audio
    pub max_queue_size: usize,
    pub opus_bitrate: i32,

    // Tiempos
    pub timings: SessionTimings,
    pub resolve_timeout: Duration,
}

fn env_or<T: std::str::FromStr>(key: &str, default: &str) -> Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    Ok(std::env::var(key)
        .unwrap_or_else(|_| default.to_string())
        .parse()?)
}

fn env_secs(key: &str, default: u64) -> Result<Duration> {
    Ok(Duration::from_secs(env_or(key, &default.to_string())?))
}

impl Config {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let defaults = SessionTimings::default();

        let config = Self {
            // Discord
            discord_token: std::env::var("DISCORD_TOKEN")?,
            application_id: std::env::var("APPLICATION_ID")?.parse()?,
            guild_id: std::env::var("GUILD_ID").ok().and_then(|s| s.parse().ok()),

            // Herramientas
            ytdlp_path: std::env::var("YTDLP_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|_| YtDlpExtractor::locate()),
            ffmpeg_path: std::env::var("FFMPEG_PATH")
                .unwrap_or_else(|_| "ffmpeg".to_string())
                .into(),
            ytdlp_cookies: std::env::var("YTDLP_COOKIES")
                .ok()
                .filter(|s| !s.trim().is_empty())
                .map(PathBuf::from),

            // Audio
            max_queue_size: env_or("MAX_QUEUE_SIZE", "100")?,
            opus_bitrate: env_or("OPUS_BITRATE", "96000")?, // 96kbps (Discord default)

            // Tiempos
            timings: SessionTimings {
                ready_timeout: env_secs("READY_TIMEOUT_SECS", defaults.ready_timeout.as_secs())?,
                reconnect_grace: env_secs(
                    "RECONNECT_GRACE_SECS",
                    defaults.reconnect_grace.as_secs(),
                )?,
                reconnect_backoff: env_secs(
                    "RECONNECT_BACKOFF_SECS",
                    defaults.reconnect_backoff.as_secs(),
                )?,
                reconnect_attempts: env_or(
                    "RECONNECT_ATTEMPTS",
                    &defaults.reconnect_attempts.to_string(),
                )?,
                idle_timeout: env_secs("IDLE_TIMEOUT_SECS", defaults.idle_timeout.as_secs())?,
                occupancy_poll: env_secs(
                    "OCCUPANCY_POLL_SECS",
                    defaults.occupancy_poll.as_secs(),
                )?,
            },
            resolve_timeout: env_secs("RESOLVE_TIMEOUT_SECS", 45)?,
        };

        config.validate()?;

        Ok(config)
    }

    /// Validates configuration values for correctness.
    ///
    /// - Opus bitrate must be within 8..=510 kbps
    /// - Queue size and every timer must be non-zero
    /// - At least one reconnect attempt is required
    pub fn validate(&self) -> Result<()> {
        if self.opus_bitrate > 510_000 {
            anyhow::bail!("Opus bitrate cannot exceed 510kbps, got: {}", self.opus_bitrate);
        }

        if self.opus_bitrate < 8_000 {
            anyhow::bail!("Opus bitrate too low, minimum 8kbps, got: {}", self.opus_bitrate);
        }

        if self.max_queue_size == 0 {
            anyhow::bail!("Max queue size must be greater than 0");
        }

        if self.timings.reconnect_attempts == 0 {
            anyhow::bail!("At least one reconnect attempt is required");
        }

        let timers = [
            ("READY_TIMEOUT_SECS", self.timings.ready_timeout),
            ("RECONNECT_GRACE_SECS", self.timings.reconnect_grace),
            ("IDLE_TIMEOUT_SECS", self.timings.idle_timeout),
            ("OCCUPANCY_POLL_SECS", self.timings.occupancy_poll),
            ("RESOLVE_TIMEOUT_SECS", self.resolve_timeout),
        ];
        if let Some((name, _)) = timers.iter().find(|(_, d)| d.is_zero()) {
            anyhow::bail!("{} must be greater than 0", name);
        }

        Ok(())
    }

    /// Returns a summary of the current configuration for logging.
    ///
    /// The Discord token is never included.
    pub fn summary(&self) -> String {
        format!(
            "Config Summary:\n  \
            Discord: App ID {} (Guild: {})\n  \
            Tools: yt-dlp={} ffmpeg={} cookies={}\n  \
            Audio: {}kbps, {} tracks max\n  \
            Timers: ready {}, idle {}, poll {}, reconnect {}x{} (grace {})",
            self.application_id,
            self.guild_id.map_or("global".to_string(), |id| id.to_string()),
            self.ytdlp_path.display(),
            self.ffmpeg_path.display(),
            self.ytdlp_cookies.is_some(),
            self.opus_bitrate / 1000,
            self.max_queue_size,
            humantime::format_duration(self.timings.ready_timeout),
            humantime::format_duration(self.timings.idle_timeout),
            humantime::format_duration(self.timings.occupancy_poll),
            self.timings.reconnect_attempts,
            humantime::format_duration(self.timings.reconnect_backoff),
            humantime::format_duration(self.timings.reconnect_grace),
        )
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            // Discord (sin defaults reales)
            discord_token: String::new(),
            application_id: 0,
            guild_id: None,

            ytdlp_path: PathBuf::from("yt-dlp"),
            ffmpeg_path: PathBuf::from("ffmpeg"),
            ytdlp_cookies: None,

            max_queue_size: 100,
            opus_bitrate: 96_000,

            timings: SessionTimings::default(),
            resolve_timeout: Duration::from_secs(45),
        }
    }
}
