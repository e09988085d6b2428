pub mod cobalt;
pub mod invidious;
pub mod ytdlp;

use async_trait::async_trait;
use regex::Regex;
use serenity::model::id::UserId;
use url::Url;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::audio::queue::Track;
use crate::audio::transport::StreamSource;
use crate::config::Config;
use crate::error::PlayerError;

pub use cobalt::CobaltClient;
pub use invidious::InvidiousClient;
pub use ytdlp::YtDlpClient;

/// Metadata de un track tal como la devuelve una fuente.
#[derive(Debug, Clone)]
pub struct TrackMetadata {
    pub title: String,
    pub url: String,
    pub duration_secs: u64,
    pub uploader: Option<String>,
    pub thumbnail: Option<String>,
    pub is_live: bool,
}

impl TrackMetadata {
    pub fn into_track(self, requested_by: UserId) -> Track {
        let mut track = Track::new(self.title, self.url, requested_by)
            .with_duration(if self.is_live { 0 } else { self.duration_secs });
        if let Some(uploader) = self.uploader {
            track = track.with_uploader(uploader);
        }
        if let Some(thumbnail) = self.thumbnail {
            track = track.with_thumbnail(thumbnail);
        }
        track
    }
}

/// Stream de audio resuelto, con la metadata extra que la fuente conozca.
#[derive(Debug, Clone)]
pub struct ResolvedStream {
    pub source: StreamSource,
    pub uploader: Option<String>,
    pub thumbnail: Option<String>,
}

impl ResolvedStream {
    pub fn new(source: StreamSource) -> Self {
        Self {
            source,
            uploader: None,
            thumbnail: None,
        }
    }
}

/// Opciones de búsqueda (ver la interfaz del colaborador de resolución).
#[derive(Debug, Clone)]
pub struct SearchOptions {
    pub limit: usize,
    pub exclude_short_form: bool,
    pub prefer_long_form: bool,
    /// Se aplica sólo a candidatos con duración conocida.
    pub min_duration_secs: u64,
}

impl SearchOptions {
    /// Búsqueda automática: un resultado, sin clips cortos, música primero.
    pub fn autoplay() -> Self {
        Self {
            limit: 1,
            exclude_short_form: true,
            prefer_long_form: true,
            min_duration_secs: 61,
        }
    }

    /// Búsqueda interactiva: hasta 15 resultados en el orden del proveedor.
    pub fn interactive() -> Self {
        Self {
            limit: 15,
            exclude_short_form: true,
            prefer_long_form: false,
            min_duration_secs: 0,
        }
    }
}

/// Fallo de una estrategia individual.
#[derive(Debug, Error)]
pub enum SourceError {
    /// La fuente no implementa esta operación; la cadena la salta sin
    /// registrar causa.
    #[error("operación no soportada por esta fuente")]
    Unsupported,

    #[error("contenido no disponible")]
    Unavailable,

    #[error("contenido privado o restringido por región")]
    Restricted,

    #[error("contenido no encontrado")]
    NotFound,

    #[error("tiempo de espera agotado")]
    Timeout,

    #[error("respuesta malformada: {0}")]
    Malformed(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl SourceError {
    /// Qué tan específica es la causa; la cadena de fallback reporta la
    /// mayor que haya visto, no el error de la última estrategia.
    fn specificity(&self) -> u8 {
        match self {
            SourceError::Restricted => 4,
            SourceError::Unavailable => 3,
            SourceError::NotFound => 2,
            SourceError::Timeout => 1,
            SourceError::Malformed(_) | SourceError::Other(_) => 0,
            SourceError::Unsupported => 0,
        }
    }

    /// Clasifica el texto de error de un proveedor externo (stderr de
    /// yt-dlp, campo `text` de Cobalt, etc.).
    pub fn classify_provider_message(message: &str) -> SourceError {
        let lower = message.to_lowercase();

        if lower.contains("private video") || lower.contains("privado") {
            SourceError::Restricted
        } else if lower.contains("region")
            || lower.contains("country")
            || lower.contains("geo restricted")
            || lower.contains("blocked")
        {
            SourceError::Restricted
        } else if lower.contains("video unavailable") || lower.contains("no longer available") {
            SourceError::Unavailable
        } else if lower.contains("not available")
            || lower.contains("not found")
            || lower.contains("does not exist")
            || lower.contains("404")
        {
            SourceError::NotFound
        } else if lower.contains("timed out") || lower.contains("timeout") {
            SourceError::Timeout
        } else {
            SourceError::Malformed(message.trim().to_string())
        }
    }
}

/// Una estrategia concreta de resolución (API hosteada, herramienta local,
/// proveedor alternativo). Cada una falla de forma independiente.
#[async_trait]
pub trait SourceStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Presupuesto de tiempo de ESTA estrategia; agotarlo avanza la cadena.
    fn timeout(&self) -> Duration;

    async fn get_video_info(&self, url: &str) -> Result<TrackMetadata, SourceError>;

    async fn get_audio_source(&self, url: &str) -> Result<ResolvedStream, SourceError>;

    async fn search(&self, query: &str, limit: usize) -> Result<Vec<TrackMetadata>, SourceError>;

    async fn expand_playlist(
        &self,
        url: &str,
        max_items: usize,
    ) -> Result<Vec<TrackMetadata>, SourceError>;
}

/// Acumulador de la cadena de fallback: un intento por estrategia, con su
/// timeout propio, quedándose con la causa más específica.
struct FallbackChain {
    what: &'static str,
    best: Option<SourceError>,
}

impl FallbackChain {
    fn new(what: &'static str) -> Self {
        Self { what, best: None }
    }

    async fn attempt<T>(
        &mut self,
        strategy: &dyn SourceStrategy,
        fut: impl Future<Output = Result<T, SourceError>>,
    ) -> Option<T> {
        match tokio::time::timeout(strategy.timeout(), fut).await {
            Ok(Ok(value)) => {
                debug!("✅ Estrategia {} resolvió {}", strategy.name(), self.what);
                Some(value)
            }
            Ok(Err(SourceError::Unsupported)) => {
                debug!("↪️ Estrategia {} no soporta {}", strategy.name(), self.what);
                None
            }
            Ok(Err(err)) => {
                warn!(
                    "⚠️ Estrategia {} falló para {}: {}",
                    strategy.name(),
                    self.what,
                    err
                );
                self.record(err);
                None
            }
            Err(_) => {
                warn!(
                    "⏰ Estrategia {} agotó su tiempo para {}",
                    strategy.name(),
                    self.what
                );
                self.record(SourceError::Timeout);
                None
            }
        }
    }

    fn record(&mut self, err: SourceError) {
        let replace = match &self.best {
            Some(best) => err.specificity() > best.specificity(),
            None => true,
        };
        if replace {
            self.best = Some(err);
        }
    }

    /// Convierte el mejor fallo registrado en el error que ve el usuario.
    fn into_error(self) -> PlayerError {
        match self.best {
            Some(SourceError::Restricted) => PlayerError::RegionOrPrivacyRestricted,
            Some(err) => PlayerError::ResolutionUnavailable(err.to_string()),
            None => {
                PlayerError::ResolutionUnavailable("ninguna fuente disponible".to_string())
            }
        }
    }
}

/// Clasificación de una consulta de usuario.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum QueryKind {
    MediaUrl,
    PlaylistUrl,
    Text,
}

/// Resolutor de tracks: clasifica consultas y recorre las estrategias en
/// orden de prioridad hasta que una responda.
pub struct TrackResolver {
    strategies: Vec<Arc<dyn SourceStrategy>>,
    max_playlist_size: usize,
    max_song_duration: u64,
}

impl TrackResolver {
    pub fn new(strategies: Vec<Arc<dyn SourceStrategy>>, config: &Config) -> Self {
        Self {
            strategies,
            max_playlist_size: config.max_playlist_size,
            max_song_duration: config.max_song_duration,
        }
    }

    /// Cadena por defecto: API hosteada, luego yt-dlp local, luego Invidious.
    pub fn with_default_strategies(config: &Config) -> Self {
        let strategies: Vec<Arc<dyn SourceStrategy>> = vec![
            Arc::new(CobaltClient::new()),
            Arc::new(YtDlpClient::new()),
            Arc::new(InvidiousClient::new()),
        ];
        Self::new(strategies, config)
    }

    /// Clasifica la consulta: URL de playlist, URL directa de video, o texto
    /// libre. Sólo se aceptan formas de URL conocidas; el resto se busca.
    pub fn classify(query: &str) -> QueryKind {
        if is_playlist_url(query) {
            QueryKind::PlaylistUrl
        } else if is_media_url(query) {
            QueryKind::MediaUrl
        } else {
            QueryKind::Text
        }
    }

    /// Resuelve una consulta de reproducción a uno o más tracks.
    pub async fn resolve(
        &self,
        query: &str,
        requested_by: UserId,
    ) -> Result<Vec<Track>, PlayerError> {
        let query = query.trim();
        if query.is_empty() {
            return Err(PlayerError::InvalidQuery("consulta vacía".to_string()));
        }

        match Self::classify(query) {
            QueryKind::PlaylistUrl => self.expand_playlist(query, requested_by).await,
            QueryKind::MediaUrl => {
                let meta = self.video_info(query).await?;
                let track = meta.into_track(requested_by);
                self.validate_duration(&track)?;
                Ok(vec![track])
            }
            QueryKind::Text => {
                let hits = self
                    .search_with_options(query, &SearchOptions::autoplay())
                    .await?;
                let first = hits.into_iter().next().ok_or_else(|| {
                    PlayerError::ResolutionUnavailable(format!(
                        "sin resultados para '{query}'"
                    ))
                })?;
                let track = first.into_track(requested_by);
                self.validate_duration(&track)?;
                Ok(vec![track])
            }
        }
    }

    /// Búsqueda interactiva (hasta 15 candidatos para el selector).
    pub async fn search(
        &self,
        query: &str,
        requested_by: UserId,
    ) -> Result<Vec<Track>, PlayerError> {
        let query = query.trim();
        if query.is_empty() {
            return Err(PlayerError::InvalidQuery("consulta vacía".to_string()));
        }

        let hits = self
            .search_with_options(query, &SearchOptions::interactive())
            .await?;
        Ok(hits
            .into_iter()
            .map(|meta| meta.into_track(requested_by))
            .collect())
    }

    /// Resuelve el stream de audio de un track ya encolado.
    pub async fn resolve_stream(&self, track: &Track) -> Result<ResolvedStream, PlayerError> {
        info!("🎵 Resolviendo stream para: {}", track.title);

        let mut chain = FallbackChain::new("stream");
        for strategy in &self.strategies {
            if let Some(stream) = chain
                .attempt(strategy.as_ref(), strategy.get_audio_source(&track.url))
                .await
            {
                return Ok(stream);
            }
        }
        Err(chain.into_error())
    }

    async fn video_info(&self, url: &str) -> Result<TrackMetadata, PlayerError> {
        let mut chain = FallbackChain::new("metadata");
        for strategy in &self.strategies {
            if let Some(meta) = chain
                .attempt(strategy.as_ref(), strategy.get_video_info(url))
                .await
            {
                return Ok(meta);
            }
        }
        Err(chain.into_error())
    }

    async fn search_with_options(
        &self,
        query: &str,
        opts: &SearchOptions,
    ) -> Result<Vec<TrackMetadata>, PlayerError> {
        // Se piden más candidatos de los necesarios porque el filtro de
        // clips cortos descarta parte de la página.
        let fetch_limit = 15usize.max(opts.limit);

        let mut chain = FallbackChain::new("búsqueda");
        for strategy in &self.strategies {
            if let Some(results) = chain
                .attempt(strategy.as_ref(), strategy.search(query, fetch_limit))
                .await
            {
                return Ok(apply_search_options(results, opts));
            }
        }
        Err(chain.into_error())
    }

    async fn expand_playlist(
        &self,
        url: &str,
        requested_by: UserId,
    ) -> Result<Vec<Track>, PlayerError> {
        let mut chain = FallbackChain::new("playlist");
        for strategy in &self.strategies {
            if let Some(entries) = chain
                .attempt(
                    strategy.as_ref(),
                    strategy.expand_playlist(url, self.max_playlist_size),
                )
                .await
            {
                let total = entries.len();
                let tracks: Vec<Track> = entries
                    .into_iter()
                    .filter(|meta| {
                        // Miembros individuales demasiado largos se saltan
                        // sin abortar la expansión completa.
                        meta.duration_secs == 0 || meta.duration_secs <= self.max_song_duration
                    })
                    .take(self.max_playlist_size)
                    .map(|meta| meta.into_track(requested_by))
                    .collect();

                if tracks.is_empty() {
                    return Err(PlayerError::ResolutionUnavailable(
                        "la playlist no tiene elementos reproducibles".to_string(),
                    ));
                }
                if tracks.len() < total {
                    info!(
                        "📋 Playlist: {} de {} elementos aprovechables",
                        tracks.len(),
                        total
                    );
                }
                return Ok(tracks);
            }
        }
        Err(chain.into_error())
    }

    /// Revalida la duración de un resultado ya resuelto: defensa contra
    /// clips cortos mal clasificados y canciones fuera del límite.
    pub fn validate_duration(&self, track: &Track) -> Result<(), PlayerError> {
        if track.duration_secs > 0 && track.duration_secs <= SHORT_FORM_MAX_SECS {
            return Err(PlayerError::ShortFormRejected);
        }
        if track.duration_secs > self.max_song_duration {
            return Err(PlayerError::DurationExceeded {
                limit: self.max_song_duration,
            });
        }
        Ok(())
    }
}

/// Umbral bajo el cual un video con duración conocida se trata como clip.
pub const SHORT_FORM_MAX_SECS: u64 = 60;

/// Marcadores de título que delatan un clip corto.
const SHORT_FORM_MARKERS: &[&str] = &["#shorts", "tiktok"];

/// Palabras que suelen marcar versiones largas/musicales de un resultado.
const MUSIC_KEYWORDS: &[&str] = &["official", "audio", "song", "lyrics"];

/// Detecta clips cortos por duración conocida o marcadores en el título.
pub fn is_short_form(meta: &TrackMetadata) -> bool {
    if meta.duration_secs > 0 && meta.duration_secs <= SHORT_FORM_MAX_SECS {
        return true;
    }
    let title = meta.title.to_lowercase();
    SHORT_FORM_MARKERS.iter().any(|marker| title.contains(marker))
}

/// Puntaje de "parece música" de un título.
fn music_score(title: &str) -> usize {
    let title = title.to_lowercase();
    MUSIC_KEYWORDS
        .iter()
        .filter(|keyword| title.contains(*keyword))
        .count()
}

/// Aplica filtros y re-ranking sobre los candidatos crudos de una fuente.
fn apply_search_options(results: Vec<TrackMetadata>, opts: &SearchOptions) -> Vec<TrackMetadata> {
    let mut filtered: Vec<TrackMetadata> = results
        .into_iter()
        .filter(|meta| !opts.exclude_short_form || !is_short_form(meta))
        .filter(|meta| {
            meta.duration_secs == 0 || meta.duration_secs >= opts.min_duration_secs
        })
        .collect();

    if opts.prefer_long_form {
        // sort estable: a igual puntaje se conserva el orden del proveedor.
        filtered.sort_by_key(|meta| std::cmp::Reverse(music_score(&meta.title)));
    }

    filtered.truncate(opts.limit);
    filtered
}

/// Formas de URL aceptadas; cualquier otra cosa se trata como búsqueda.
fn is_media_url(query: &str) -> bool {
    let Ok(parsed) = Url::parse(query) else {
        return false;
    };
    let Some(host) = parsed.host_str() else {
        return false;
    };

    let is_youtube_host = matches!(
        host,
        "www.youtube.com" | "youtube.com" | "m.youtube.com" | "music.youtube.com"
    );
    let is_short_host = host == "youtu.be";

    if is_short_host {
        return parsed.path().len() > 1;
    }

    is_youtube_host
        && (parsed.path().starts_with("/watch")
            || parsed.path().starts_with("/embed/")
            || parsed.path().starts_with("/shorts/")
            || parsed.path().starts_with("/v/"))
}

fn is_playlist_url(query: &str) -> bool {
    let playlist_regex = Regex::new(r"[?&]list=[A-Za-z0-9_-]+").unwrap();
    query.starts_with("http") && playlist_regex.is_match(query)
}
