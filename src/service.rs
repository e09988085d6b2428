use serenity::model::id::{ChannelId, GuildId, UserId};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::audio::player::{EnqueueOutcome, PlayerHandle, PlayerRegistry, QueueSnapshot};
use crate::audio::queue::Track;
use crate::audio::transport::AudioTransport;
use crate::config::Config;
use crate::error::PlayerError;
use crate::reaper::{IdleReaper, OccupancyProbe};
use crate::search::{PageDirection, SearchManager, SearchPage};
use crate::sources::TrackResolver;

/// Cada cuánto corre el barrido periódico de sesiones de búsqueda.
const SEARCH_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Servicio coordinador del motor: un método por comando del bot.
///
/// Es dueño de los dos únicos mapas compartidos (guild → reproductor y
/// sesión → búsqueda) y de las verificaciones de autorización por canal.
/// El bot anfitrión traduce interacciones del gateway a estas llamadas y
/// renderiza los resultados.
///
/// Debe construirse dentro del runtime de tokio (lanza tareas de fondo).
pub struct MusicService {
    config: Config,
    registry: Arc<PlayerRegistry>,
    resolver: Arc<TrackResolver>,
    search: SearchManager,
    reaper: IdleReaper,
}

impl MusicService {
    /// Servicio con la cadena de resolución por defecto.
    pub fn new(
        config: Config,
        transport: Arc<dyn AudioTransport>,
        probe: Arc<dyn OccupancyProbe>,
    ) -> Self {
        let resolver = Arc::new(TrackResolver::with_default_strategies(&config));
        Self::with_resolver(config, transport, probe, resolver)
    }

    /// Servicio con un resolutor armado por el llamador.
    pub fn with_resolver(
        config: Config,
        transport: Arc<dyn AudioTransport>,
        probe: Arc<dyn OccupancyProbe>,
        resolver: Arc<TrackResolver>,
    ) -> Self {
        let registry = Arc::new(PlayerRegistry::new(
            transport,
            resolver.clone(),
            config.clone(),
        ));
        let search = SearchManager::new(Duration::from_secs(config.search_session_ttl_secs));
        let reaper = IdleReaper::new(
            Duration::from_secs(config.idle_disconnect_secs),
            probe,
            registry.clone(),
        );

        search.spawn_sweeper(SEARCH_SWEEP_INTERVAL);
        info!("🎛️ Motor de reproducción listo\n{}", config.summary());

        Self {
            config,
            registry,
            resolver,
            search,
            reaper,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Resuelve la consulta y encola el resultado, conectando si hace falta.
    pub async fn play(
        &self,
        guild_id: GuildId,
        voice_channel: ChannelId,
        user: UserId,
        query: &str,
    ) -> Result<EnqueueOutcome, PlayerError> {
        let tracks = self.resolver.resolve(query, user).await?;
        self.enqueue_tracks(guild_id, voice_channel, tracks).await
    }

    pub async fn pause(
        &self,
        guild_id: GuildId,
        voice_channel: ChannelId,
    ) -> Result<(), PlayerError> {
        let player = self.existing_player(guild_id)?;
        Self::ensure_same_channel(&player, voice_channel)?;
        player.pause().await
    }

    pub async fn resume(
        &self,
        guild_id: GuildId,
        voice_channel: ChannelId,
    ) -> Result<(), PlayerError> {
        let player = self.existing_player(guild_id)?;
        Self::ensure_same_channel(&player, voice_channel)?;
        player.resume().await
    }

    pub async fn skip(
        &self,
        guild_id: GuildId,
        voice_channel: ChannelId,
    ) -> Result<(), PlayerError> {
        let player = self.existing_player(guild_id)?;
        Self::ensure_same_channel(&player, voice_channel)?;
        player.skip().await
    }

    /// Detiene todo y libera la conexión. Sin reproductor es un no-op.
    pub async fn stop(
        &self,
        guild_id: GuildId,
        voice_channel: ChannelId,
    ) -> Result<(), PlayerError> {
        let Some(player) = self.registry.get(guild_id) else {
            return Ok(());
        };
        Self::ensure_same_channel(&player, voice_channel)?;
        self.registry.destroy(guild_id).await;
        Ok(())
    }

    /// Vacía la cola sin tocar la canción actual.
    pub async fn clear(
        &self,
        guild_id: GuildId,
        voice_channel: ChannelId,
    ) -> Result<(), PlayerError> {
        let player = self.existing_player(guild_id)?;
        Self::ensure_same_channel(&player, voice_channel)?;
        player.clear().await
    }

    pub async fn remove(
        &self,
        guild_id: GuildId,
        voice_channel: ChannelId,
        position: usize,
    ) -> Result<Track, PlayerError> {
        let player = self.existing_player(guild_id)?;
        Self::ensure_same_channel(&player, voice_channel)?;
        player.remove_song(position).await
    }

    pub async fn shuffle(
        &self,
        guild_id: GuildId,
        voice_channel: ChannelId,
    ) -> Result<(), PlayerError> {
        let player = self.existing_player(guild_id)?;
        Self::ensure_same_channel(&player, voice_channel)?;
        player.shuffle().await
    }

    /// Devuelve el nuevo estado del loop.
    pub async fn toggle_loop(
        &self,
        guild_id: GuildId,
        voice_channel: ChannelId,
    ) -> Result<bool, PlayerError> {
        let player = self.existing_player(guild_id)?;
        Self::ensure_same_channel(&player, voice_channel)?;
        player.toggle_loop().await
    }

    /// Devuelve el volumen aplicado (recortado a [0,100]).
    pub async fn set_volume(
        &self,
        guild_id: GuildId,
        voice_channel: ChannelId,
        volume: i64,
    ) -> Result<u8, PlayerError> {
        let player = self.existing_player(guild_id)?;
        Self::ensure_same_channel(&player, voice_channel)?;
        player.set_volume(volume).await
    }

    /// Foto de la cola para el comando `queue`.
    pub async fn queue(&self, guild_id: GuildId) -> Result<QueueSnapshot, PlayerError> {
        self.existing_player(guild_id)?.snapshot().await
    }

    /// Canción actual, si hay reproductor y canción.
    pub async fn now_playing(&self, guild_id: GuildId) -> Result<Option<Track>, PlayerError> {
        match self.registry.get(guild_id) {
            Some(player) => Ok(player.snapshot().await?.current),
            None => Ok(None),
        }
    }

    /// Búsqueda interactiva: crea la sesión y devuelve la primera página.
    pub async fn search(
        &self,
        user: UserId,
        query: &str,
    ) -> Result<(String, SearchPage), PlayerError> {
        let results = self.resolver.search(query, user).await?;
        if results.is_empty() {
            return Err(PlayerError::ResolutionUnavailable(format!(
                "sin resultados para '{query}'"
            )));
        }

        let session_id = self.search.create_session(user, query, results);
        let page = self.search.page(&session_id, user)?;
        Ok((session_id, page))
    }

    pub fn paginate_search(
        &self,
        session_id: &str,
        user: UserId,
        direction: PageDirection,
    ) -> Result<SearchPage, PlayerError> {
        self.search.paginate(session_id, user, direction)
    }

    /// Selección del menú de búsqueda: consume la sesión y entra por el
    /// mismo camino de encolado que `play`.
    pub async fn select_search(
        &self,
        guild_id: GuildId,
        voice_channel: ChannelId,
        user: UserId,
        session_id: &str,
        index: usize,
    ) -> Result<EnqueueOutcome, PlayerError> {
        let track = self.search.select(session_id, user, index)?;
        self.resolver.validate_duration(&track)?;
        self.enqueue_tracks(guild_id, voice_channel, vec![track])
            .await
    }

    pub fn cancel_search(&self, session_id: &str, user: UserId) -> Result<(), PlayerError> {
        self.search.cancel(session_id, user)
    }

    /// Entrada del reaper: el bot anfitrión la llama en cada cambio de
    /// estado de voz con el conteo de usuarios no-bot del canal.
    pub fn notify_occupancy(&self, guild_id: GuildId, non_bot_members: usize) {
        self.reaper.notify_occupancy(guild_id, non_bot_members);
    }

    async fn enqueue_tracks(
        &self,
        guild_id: GuildId,
        voice_channel: ChannelId,
        tracks: Vec<Track>,
    ) -> Result<EnqueueOutcome, PlayerError> {
        let player = self.registry.get_or_create(guild_id);
        Self::ensure_same_channel(&player, voice_channel)?;
        player.connect(voice_channel).await?;
        player.enqueue(tracks).await
    }

    fn existing_player(&self, guild_id: GuildId) -> Result<PlayerHandle, PlayerError> {
        self.registry.get(guild_id).ok_or(PlayerError::QueueEmpty)
    }

    /// Autorización por ubicación: el que comanda debe compartir canal con
    /// el bot. Nunca muta estado.
    fn ensure_same_channel(
        player: &PlayerHandle,
        voice_channel: ChannelId,
    ) -> Result<(), PlayerError> {
        match player.connected_channel() {
            Some(connected) if connected != voice_channel => Err(PlayerError::NotInSameChannel),
            _ => Ok(()),
        }
    }
}
