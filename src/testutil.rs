//! Dobles de prueba compartidos: transporte, estrategia de resolución y
//! sonda de ocupación.

use async_trait::async_trait;
use parking_lot::Mutex;
use serenity::model::id::{ChannelId, GuildId};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::audio::transport::{
    AudioTransport, StreamSource, TransportError, TransportEvent, TransportHandle,
};
use crate::config::Config;
use crate::reaper::OccupancyProbe;
use crate::sources::{ResolvedStream, SourceError, SourceStrategy, TrackMetadata};

/// Configuración con tiempos cortos para que los tests no esperen.
pub(crate) fn test_config() -> Config {
    init_tracing();
    Config {
        advance_delay_ms: 10,
        ..Config::default()
    }
}

/// Logging opcional para depurar tests (`RUST_LOG=debug cargo test`).
pub(crate) fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

/// Deja correr el reloj (virtual o real) hasta que el loop procese lo suyo.
pub(crate) async fn settle() {
    tokio::time::sleep(Duration::from_millis(200)).await;
}

/// Modo de fallo de una [`FakeStrategy`].
#[derive(Debug, Clone, Copy)]
pub(crate) enum FakeFailure {
    /// No responde nunca; fuerza el timeout de la cadena.
    Hang,
    Restricted,
    Unavailable,
    NotFound,
}

/// Estrategia de resolución programable.
pub(crate) struct FakeStrategy {
    name: &'static str,
    failure: Option<FakeFailure>,
    video_info: Option<TrackMetadata>,
    search_results: Vec<TrackMetadata>,
    playlist: Vec<TrackMetadata>,
}

impl FakeStrategy {
    pub fn ok(name: &'static str) -> Self {
        Self {
            name,
            failure: None,
            video_info: None,
            search_results: Vec::new(),
            playlist: Vec::new(),
        }
    }

    pub fn failing(name: &'static str, failure: FakeFailure) -> Self {
        Self {
            failure: Some(failure),
            ..Self::ok(name)
        }
    }

    pub fn with_video_info(mut self, meta: TrackMetadata) -> Self {
        self.video_info = Some(meta);
        self
    }

    pub fn with_search_results(mut self, results: Vec<TrackMetadata>) -> Self {
        self.search_results = results;
        self
    }

    pub fn with_playlist(mut self, entries: Vec<TrackMetadata>) -> Self {
        self.playlist = entries;
        self
    }

    async fn maybe_fail(&self) -> Result<(), SourceError> {
        match self.failure {
            None => Ok(()),
            Some(FakeFailure::Hang) => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Err(SourceError::Timeout)
            }
            Some(FakeFailure::Restricted) => Err(SourceError::Restricted),
            Some(FakeFailure::Unavailable) => Err(SourceError::Unavailable),
            Some(FakeFailure::NotFound) => Err(SourceError::NotFound),
        }
    }
}

#[async_trait]
impl SourceStrategy for FakeStrategy {
    fn name(&self) -> &'static str {
        self.name
    }

    fn timeout(&self) -> Duration {
        Duration::from_millis(50)
    }

    async fn get_video_info(&self, url: &str) -> Result<TrackMetadata, SourceError> {
        self.maybe_fail().await?;
        Ok(self.video_info.clone().unwrap_or_else(|| TrackMetadata {
            title: "resultado".to_string(),
            url: url.to_string(),
            duration_secs: 240,
            uploader: Some("Uploader".to_string()),
            thumbnail: None,
            is_live: false,
        }))
    }

    async fn get_audio_source(&self, url: &str) -> Result<ResolvedStream, SourceError> {
        self.maybe_fail().await?;
        let mut stream =
            ResolvedStream::new(StreamSource::DirectUrl(format!("{url}#stream")));
        stream.uploader = Some("Uploader".to_string());
        Ok(stream)
    }

    async fn search(&self, _query: &str, limit: usize) -> Result<Vec<TrackMetadata>, SourceError> {
        self.maybe_fail().await?;
        Ok(self.search_results.iter().take(limit).cloned().collect())
    }

    async fn expand_playlist(
        &self,
        _url: &str,
        _max_items: usize,
    ) -> Result<Vec<TrackMetadata>, SourceError> {
        self.maybe_fail().await?;
        Ok(self.playlist.clone())
    }
}

/// Estado observable de la última conexión del [`FakeTransport`].
struct FakeConnection {
    channel: ChannelId,
    events: mpsc::UnboundedSender<TransportEvent>,
    played: Mutex<Vec<(StreamSource, f32)>>,
    released: AtomicBool,
}

/// Transporte de prueba: registra lo reproducido y deja emitir eventos.
pub(crate) struct FakeTransport {
    deny: bool,
    last: Mutex<Option<Arc<FakeConnection>>>,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self {
            deny: false,
            last: Mutex::new(None),
        }
    }

    pub fn denying() -> Self {
        Self {
            deny: true,
            last: Mutex::new(None),
        }
    }

    fn connection(&self) -> Option<Arc<FakeConnection>> {
        self.last.lock().clone()
    }

    /// Simula el fin del track actual.
    pub fn emit_idle(&self) {
        if let Some(conn) = self.connection() {
            let _ = conn.events.send(TransportEvent::Idle);
        }
    }

    /// Simula un crash del track actual.
    pub fn emit_error(&self, message: &str) {
        if let Some(conn) = self.connection() {
            let _ = conn.events.send(TransportEvent::Errored(message.to_string()));
        }
    }

    pub fn play_count(&self) -> usize {
        self.connection()
            .map(|conn| conn.played.lock().len())
            .unwrap_or(0)
    }

    pub fn last_played(&self) -> Option<(StreamSource, f32)> {
        self.connection()
            .and_then(|conn| conn.played.lock().last().cloned())
    }

    pub fn released(&self) -> bool {
        self.connection()
            .map(|conn| conn.released.load(Ordering::SeqCst))
            .unwrap_or(false)
    }
}

#[async_trait]
impl AudioTransport for FakeTransport {
    async fn connect(
        &self,
        _guild_id: GuildId,
        channel_id: ChannelId,
    ) -> Result<
        (
            Box<dyn TransportHandle>,
            mpsc::UnboundedReceiver<TransportEvent>,
        ),
        TransportError,
    > {
        if self.deny {
            return Err(TransportError::Denied);
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let conn = Arc::new(FakeConnection {
            channel: channel_id,
            events: tx,
            played: Mutex::new(Vec::new()),
            released: AtomicBool::new(false),
        });
        *self.last.lock() = Some(conn.clone());

        Ok((Box::new(FakeHandle { conn }), rx))
    }
}

struct FakeHandle {
    conn: Arc<FakeConnection>,
}

#[async_trait]
impl TransportHandle for FakeHandle {
    fn channel_id(&self) -> ChannelId {
        self.conn.channel
    }

    async fn play(&self, source: StreamSource, volume: f32) -> Result<(), TransportError> {
        self.conn.played.lock().push((source, volume));
        let _ = self.conn.events.send(TransportEvent::Playing);
        Ok(())
    }

    async fn pause(&self) -> Result<(), TransportError> {
        let _ = self.conn.events.send(TransportEvent::Paused);
        Ok(())
    }

    async fn resume(&self) -> Result<(), TransportError> {
        let _ = self.conn.events.send(TransportEvent::Playing);
        Ok(())
    }

    async fn stop_current(&self) -> Result<(), TransportError> {
        // Detener un track dispara el mismo evento que su fin natural.
        let _ = self.conn.events.send(TransportEvent::Idle);
        Ok(())
    }

    async fn stop_and_release(&self) -> Result<(), TransportError> {
        self.conn.released.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Sonda de ocupación con conteo fijo ajustable.
pub(crate) struct FakeProbe {
    count: AtomicUsize,
}

impl FakeProbe {
    pub fn empty() -> Self {
        Self {
            count: AtomicUsize::new(0),
        }
    }

    pub fn set_count(&self, count: usize) {
        self.count.store(count, Ordering::SeqCst);
    }
}

#[async_trait]
impl OccupancyProbe for FakeProbe {
    async fn non_bot_members(&self, _guild_id: GuildId) -> usize {
        self.count.load(Ordering::SeqCst)
    }
}
