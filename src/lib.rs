//! # Open Jukebox
//!
//! Queue-driven music playback engine for Discord bots.
//!
//! The crate owns the stateful core of a music bot:
//!
//! - Per-guild playback queues driven by a control loop that consumes
//!   transport lifecycle events ([`audio::player`])
//! - Multi-strategy track/stream resolution with an ordered fallback chain
//!   ([`sources`])
//! - Ephemeral paginated search sessions ([`search`])
//! - Automatic teardown of abandoned voice connections ([`reaper`])
//!
//! The embedding bot keeps the gateway, command parsing, and message
//! rendering, and talks to the engine through [`service::MusicService`],
//! whose methods map 1:1 onto the bot's slash commands. Voice output goes
//! through the [`audio::transport::AudioTransport`] trait; the production
//! implementation ([`audio::voice::SongbirdTransport`]) rides Songbird.
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use open_jukebox::{Config, MusicService, SongbirdTransport};
//! # use open_jukebox::OccupancyProbe;
//! # async fn example(
//! #     songbird: Arc<songbird::Songbird>,
//! #     probe: Arc<dyn OccupancyProbe>,
//! # ) -> anyhow::Result<()> {
//! let config = Config::load()?;
//! let transport = Arc::new(SongbirdTransport::new(songbird));
//! let service = MusicService::new(config, transport, probe);
//! # Ok(())
//! # }
//! ```

pub mod audio;
pub mod config;
pub mod error;
pub mod reaper;
pub mod search;
pub mod service;
pub mod sources;

#[cfg(test)]
pub(crate) mod testutil;

pub use audio::player::{EnqueueOutcome, PlayState, PlayerHandle, PlayerRegistry, QueueSnapshot};
pub use audio::queue::{PlaybackQueue, Track};
pub use audio::transport::{
    AudioTransport, StreamSource, TransportError, TransportEvent, TransportHandle,
};
pub use audio::voice::SongbirdTransport;
pub use config::Config;
pub use error::PlayerError;
pub use reaper::{IdleReaper, OccupancyProbe, VoiceTeardown};
pub use search::{PageDirection, SearchManager, SearchPage};
pub use service::MusicService;
pub use sources::{
    CobaltClient, InvidiousClient, SourceError, SourceStrategy, TrackResolver, YtDlpClient,
};
