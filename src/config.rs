use anyhow::Result;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    // Audio
    pub default_volume: u8, // 0-100

    // Límites
    pub max_song_duration: u64, // en segundos
    pub max_queue_size: usize,
    pub max_playlist_size: usize,

    // Tiempos
    pub idle_disconnect_secs: u64,
    pub search_session_ttl_secs: u64,
    pub advance_delay_ms: u64, // pausa entre canciones al avanzar la cola
}

impl Config {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = Self {
            default_volume: std::env::var("DEFAULT_VOLUME")
                .unwrap_or_else(|_| "50".to_string())
                .parse()?,

            max_song_duration: std::env::var("MAX_SONG_DURATION")
                .unwrap_or_else(|_| "3600".to_string()) // 1 hora
                .parse()?,
            max_queue_size: std::env::var("MAX_QUEUE_SIZE")
                .unwrap_or_else(|_| "1000".to_string())
                .parse()?,
            max_playlist_size: std::env::var("MAX_PLAYLIST_SIZE")
                .unwrap_or_else(|_| "50".to_string())
                .parse()?,

            idle_disconnect_secs: std::env::var("IDLE_DISCONNECT_SECS")
                .unwrap_or_else(|_| "30".to_string())
                .parse()?,
            search_session_ttl_secs: std::env::var("SEARCH_SESSION_TTL_SECS")
                .unwrap_or_else(|_| "300".to_string()) // 5 minutos
                .parse()?,
            advance_delay_ms: std::env::var("ADVANCE_DELAY_MS")
                .unwrap_or_else(|_| "1000".to_string())
                .parse()?,
        };

        config.validate()?;

        Ok(config)
    }

    /// Validates configuration values for correctness.
    ///
    /// Performs sanity checks on configuration values to catch
    /// common mistakes before the engine starts serving commands.
    pub fn validate(&self) -> Result<()> {
        if self.default_volume > 100 {
            anyhow::bail!(
                "Default volume must be between 0 and 100, got: {}",
                self.default_volume
            );
        }

        if self.max_song_duration == 0 {
            anyhow::bail!("Max song duration must be greater than 0");
        }

        if self.max_queue_size == 0 {
            anyhow::bail!("Max queue size must be greater than 0");
        }

        if self.max_playlist_size == 0 {
            anyhow::bail!("Max playlist size must be greater than 0");
        }

        if self.search_session_ttl_secs == 0 {
            anyhow::bail!("Search session TTL must be greater than 0");
        }

        Ok(())
    }

    /// Returns a summary of the current configuration for logging.
    pub fn summary(&self) -> String {
        format!(
            "Config Summary:\n  \
            Audio: {}% vol\n  \
            Limits: {} queue, {} playlist, {}s max duration\n  \
            Timers: {}s idle disconnect, {}s search TTL, {}ms advance delay",
            self.default_volume,
            self.max_queue_size,
            self.max_playlist_size,
            self.max_song_duration,
            self.idle_disconnect_secs,
            self.search_session_ttl_secs,
            self.advance_delay_ms,
        )
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_volume: 50,
            max_song_duration: 3600,
            max_queue_size: 1000,
            max_playlist_size: 50,
            idle_disconnect_secs: 30,
            search_session_ttl_secs: 300,
            advance_delay_ms: 1000,
        }
    }
}
