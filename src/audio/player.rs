use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use serenity::model::id::{ChannelId, GuildId};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::audio::queue::{PlaybackQueue, Track};
use crate::audio::transport::{AudioTransport, TransportError, TransportEvent, TransportHandle};
use crate::config::Config;
use crate::error::PlayerError;
use crate::reaper::VoiceTeardown;
use crate::sources::{ResolvedStream, TrackResolver};

/// Estado del reproductor de un guild.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayState {
    Idle,
    Connecting,
    Resolving,
    Playing,
    Paused,
}

/// Foto de la cola para renderizar `queue`/`nowplaying`.
#[derive(Debug, Clone)]
pub struct QueueSnapshot {
    pub current: Option<Track>,
    pub upcoming: Vec<Track>,
    pub playing: bool,
    pub paused: bool,
    pub loop_current: bool,
    pub volume: u8,
    pub connected_channel: Option<ChannelId>,
}

/// Resultado de un encolado (una canción o una playlist parcial).
#[derive(Debug, Clone)]
pub struct EnqueueOutcome {
    pub added: usize,
    /// Posición 1-based de la primera canción agregada.
    pub first_position: usize,
    pub track: Track,
}

/// Comandos que el servicio envía al control loop de un guild.
enum PlayerCommand {
    Connect {
        channel: ChannelId,
        reply: oneshot::Sender<Result<(), PlayerError>>,
    },
    Enqueue {
        tracks: Vec<Track>,
        reply: oneshot::Sender<Result<EnqueueOutcome, PlayerError>>,
    },
    Pause {
        reply: oneshot::Sender<Result<(), PlayerError>>,
    },
    Resume {
        reply: oneshot::Sender<Result<(), PlayerError>>,
    },
    Skip {
        reply: oneshot::Sender<Result<(), PlayerError>>,
    },
    Stop {
        reply: oneshot::Sender<()>,
    },
    Clear {
        reply: oneshot::Sender<()>,
    },
    Remove {
        position: usize,
        reply: oneshot::Sender<Result<Track, PlayerError>>,
    },
    Shuffle {
        reply: oneshot::Sender<Result<(), PlayerError>>,
    },
    SetVolume {
        volume: i64,
        reply: oneshot::Sender<u8>,
    },
    ToggleLoop {
        reply: oneshot::Sender<bool>,
    },
    Snapshot {
        reply: oneshot::Sender<QueueSnapshot>,
    },
}

/// Entradas internas de la máquina de estados: señales del transporte,
/// resultados de resolución y el tick de avance diferido.
enum PlayerEvent {
    Transport(TransportEvent),
    Resolved {
        track_url: String,
        result: Result<ResolvedStream, PlayerError>,
    },
    AdvanceTick,
}

/// Lado público del reproductor de un guild: envía comandos al control
/// loop y espera la respuesta por un canal oneshot.
#[derive(Clone)]
pub struct PlayerHandle {
    guild_id: GuildId,
    tx: mpsc::UnboundedSender<PlayerCommand>,
    connected: Arc<Mutex<Option<ChannelId>>>,
    shutdown: CancellationToken,
}

impl PlayerHandle {
    pub fn guild_id(&self) -> GuildId {
        self.guild_id
    }

    /// Canal de voz al que está conectado este reproductor, si alguno.
    pub fn connected_channel(&self) -> Option<ChannelId> {
        *self.connected.lock()
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> PlayerCommand,
    ) -> Result<T, PlayerError> {
        let (tx, rx) = oneshot::channel();
        self.tx
            .send(build(tx))
            .map_err(|_| PlayerError::PlayerGone)?;
        rx.await.map_err(|_| PlayerError::PlayerGone)
    }

    pub async fn connect(&self, channel: ChannelId) -> Result<(), PlayerError> {
        self.request(|reply| PlayerCommand::Connect { channel, reply })
            .await?
    }

    pub async fn enqueue(&self, tracks: Vec<Track>) -> Result<EnqueueOutcome, PlayerError> {
        self.request(|reply| PlayerCommand::Enqueue { tracks, reply })
            .await?
    }

    pub async fn pause(&self) -> Result<(), PlayerError> {
        self.request(|reply| PlayerCommand::Pause { reply }).await?
    }

    pub async fn resume(&self) -> Result<(), PlayerError> {
        self.request(|reply| PlayerCommand::Resume { reply }).await?
    }

    pub async fn skip(&self) -> Result<(), PlayerError> {
        self.request(|reply| PlayerCommand::Skip { reply }).await?
    }

    /// Siempre tiene éxito, incluso si el reproductor ya fue destruido.
    pub async fn stop(&self) -> Result<(), PlayerError> {
        match self.request(|reply| PlayerCommand::Stop { reply }).await {
            Ok(()) | Err(PlayerError::PlayerGone) => Ok(()),
            Err(e) => Err(e),
        }
    }

    pub async fn clear(&self) -> Result<(), PlayerError> {
        self.request(|reply| PlayerCommand::Clear { reply }).await
    }

    pub async fn remove_song(&self, position: usize) -> Result<Track, PlayerError> {
        self.request(|reply| PlayerCommand::Remove { position, reply })
            .await?
    }

    pub async fn shuffle(&self) -> Result<(), PlayerError> {
        self.request(|reply| PlayerCommand::Shuffle { reply })
            .await?
    }

    pub async fn set_volume(&self, volume: i64) -> Result<u8, PlayerError> {
        self.request(|reply| PlayerCommand::SetVolume { volume, reply })
            .await
    }

    pub async fn toggle_loop(&self) -> Result<bool, PlayerError> {
        self.request(|reply| PlayerCommand::ToggleLoop { reply })
            .await
    }

    pub async fn snapshot(&self) -> Result<QueueSnapshot, PlayerError> {
        self.request(|reply| PlayerCommand::Snapshot { reply }).await
    }

    pub(crate) fn shutdown(&self) {
        self.shutdown.cancel();
    }
}

/// Máquina de estados de reproducción de un guild.
///
/// Corre en su propia task y consume dos canales: los comandos de control y
/// los eventos internos (transporte, resolución, avance diferido). A lo sumo
/// una transición está en vuelo a la vez; los comandos que llegan durante
/// una resolución simplemente esperan su turno en el canal.
pub struct GuildPlayer {
    guild_id: GuildId,
    queue: PlaybackQueue,
    state: PlayState,
    transport: Arc<dyn AudioTransport>,
    resolver: Arc<TrackResolver>,
    handle: Option<Box<dyn TransportHandle>>,
    connected: Arc<Mutex<Option<ChannelId>>>,
    commands: mpsc::UnboundedReceiver<PlayerCommand>,
    events_tx: mpsc::UnboundedSender<PlayerEvent>,
    events_rx: mpsc::UnboundedReceiver<PlayerEvent>,
    resolve_token: Option<CancellationToken>,
    advance_token: Option<CancellationToken>,
    advance_delay: Duration,
    shutdown: CancellationToken,
}

impl GuildPlayer {
    /// Crea el reproductor del guild y arranca su control loop.
    pub fn spawn(
        guild_id: GuildId,
        transport: Arc<dyn AudioTransport>,
        resolver: Arc<TrackResolver>,
        config: &Config,
    ) -> PlayerHandle {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let connected = Arc::new(Mutex::new(None));
        let shutdown = CancellationToken::new();

        let player = GuildPlayer {
            guild_id,
            queue: PlaybackQueue::new(config.max_queue_size, config.default_volume),
            state: PlayState::Idle,
            transport,
            resolver,
            handle: None,
            connected: connected.clone(),
            commands: cmd_rx,
            events_tx,
            events_rx,
            resolve_token: None,
            advance_token: None,
            advance_delay: Duration::from_millis(config.advance_delay_ms),
            shutdown: shutdown.clone(),
        };

        tokio::spawn(player.run());

        PlayerHandle {
            guild_id,
            tx: cmd_tx,
            connected,
            shutdown,
        }
    }

    async fn run(mut self) {
        debug!("🎛️ Control loop iniciado para guild {}", self.guild_id);

        loop {
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                Some(event) = self.events_rx.recv() => self.handle_event(event).await,
                cmd = self.commands.recv() => match cmd {
                    Some(cmd) => self.handle_command(cmd).await,
                    None => break,
                },
            }
        }

        // Estado terminal: liberar el transporte antes de descartar la cola.
        self.cancel_pending_work();
        if let Some(handle) = self.handle.take() {
            let _ = handle.stop_and_release().await;
        }
        *self.connected.lock() = None;
        debug!("🗑️ Control loop destruido para guild {}", self.guild_id);
    }

    async fn handle_command(&mut self, cmd: PlayerCommand) {
        match cmd {
            PlayerCommand::Connect { channel, reply } => {
                let _ = reply.send(self.connect(channel).await);
            }
            PlayerCommand::Enqueue { tracks, reply } => {
                let _ = reply.send(self.enqueue(tracks));
            }
            PlayerCommand::Pause { reply } => {
                let _ = reply.send(self.pause().await);
            }
            PlayerCommand::Resume { reply } => {
                let _ = reply.send(self.resume().await);
            }
            PlayerCommand::Skip { reply } => {
                let _ = reply.send(self.skip().await);
            }
            PlayerCommand::Stop { reply } => {
                self.stop().await;
                let _ = reply.send(());
            }
            PlayerCommand::Clear { reply } => {
                self.queue.clear_upcoming();
                info!("🗑️ Cola limpiada en guild {}", self.guild_id);
                let _ = reply.send(());
            }
            PlayerCommand::Remove { position, reply } => {
                let _ = reply.send(self.queue.remove_song(position));
            }
            PlayerCommand::Shuffle { reply } => {
                let _ = reply.send(self.queue.shuffle());
            }
            PlayerCommand::SetVolume { volume, reply } => {
                let applied = self.queue.set_volume(volume);
                info!("🔊 Volumen ajustado a {}% en guild {}", applied, self.guild_id);
                let _ = reply.send(applied);
            }
            PlayerCommand::ToggleLoop { reply } => {
                let _ = reply.send(self.queue.toggle_loop());
            }
            PlayerCommand::Snapshot { reply } => {
                let _ = reply.send(self.snapshot());
            }
        }
    }

    async fn handle_event(&mut self, event: PlayerEvent) {
        match event {
            PlayerEvent::Transport(event) => self.on_transport_event(event).await,
            PlayerEvent::Resolved { track_url, result } => {
                self.on_resolved(track_url, result).await
            }
            PlayerEvent::AdvanceTick => {
                self.advance_token = None;
                if self.state == PlayState::Resolving && self.resolve_token.is_none() {
                    self.start_resolving();
                }
            }
        }
    }

    async fn connect(&mut self, channel: ChannelId) -> Result<(), PlayerError> {
        if let Some(handle) = &self.handle {
            if handle.channel_id() == channel {
                return Ok(());
            }
        }

        let was_idle = self.state == PlayState::Idle;
        if was_idle {
            self.state = PlayState::Connecting;
        }

        match self.transport.connect(self.guild_id, channel).await {
            Ok((handle, events)) => {
                self.handle = Some(handle);
                *self.connected.lock() = Some(channel);
                self.spawn_event_pipe(events);
                info!(
                    "🔊 Conectado al canal {} en guild {}",
                    channel, self.guild_id
                );

                if was_idle {
                    self.state = PlayState::Idle;
                    // Autoarranque si ya había canciones esperando conexión.
                    if !self.queue.is_empty() {
                        self.start_resolving();
                    }
                }
                Ok(())
            }
            Err(err) => {
                if was_idle {
                    self.state = PlayState::Idle;
                }
                match err {
                    TransportError::Denied => Err(PlayerError::ConnectionDenied),
                    TransportError::Failed(msg) => {
                        warn!("❌ Fallo al conectar en guild {}: {}", self.guild_id, msg);
                        Err(PlayerError::ConnectionDenied)
                    }
                }
            }
        }
    }

    /// Reenvía los eventos de la conexión al canal interno del loop.
    fn spawn_event_pipe(&self, mut events: mpsc::UnboundedReceiver<TransportEvent>) {
        let tx = self.events_tx.clone();
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    event = events.recv() => match event {
                        Some(event) => {
                            if tx.send(PlayerEvent::Transport(event)).is_err() {
                                break;
                            }
                        }
                        None => break,
                    },
                }
            }
        });
    }

    fn enqueue(&mut self, tracks: Vec<Track>) -> Result<EnqueueOutcome, PlayerError> {
        if tracks.is_empty() {
            return Err(PlayerError::InvalidQuery("nada que encolar".to_string()));
        }

        let total = tracks.len();
        let first_position = self.queue.len() + 1;
        let mut first = None;
        let mut added = 0;

        for track in tracks {
            match self.queue.enqueue(track) {
                Ok(stored) => {
                    if first.is_none() {
                        first = Some(stored.clone());
                    }
                    added += 1;
                }
                Err(err) => {
                    if added == 0 {
                        return Err(err);
                    }
                    warn!(
                        "⚠️ Cola llena en guild {}: se encolaron {} de {}",
                        self.guild_id, added, total
                    );
                    break;
                }
            }
        }

        let track = first.expect("added > 0 implica una canción almacenada");
        info!(
            "➕ Encoladas {} canciones desde la posición {} en guild {}",
            added, first_position, self.guild_id
        );

        if self.state == PlayState::Idle && self.handle.is_some() {
            self.start_resolving();
        }

        Ok(EnqueueOutcome {
            added,
            first_position,
            track,
        })
    }

    async fn pause(&mut self) -> Result<(), PlayerError> {
        if self.state != PlayState::Playing {
            return Err(PlayerError::QueueEmpty);
        }
        if let Some(handle) = &self.handle {
            let _ = handle.pause().await;
        }
        self.state = PlayState::Paused;
        info!("⏸️ Reproducción pausada en guild {}", self.guild_id);
        Ok(())
    }

    async fn resume(&mut self) -> Result<(), PlayerError> {
        if self.state != PlayState::Paused {
            return Err(PlayerError::QueueEmpty);
        }
        if let Some(handle) = &self.handle {
            let _ = handle.resume().await;
        }
        self.state = PlayState::Playing;
        info!("▶️ Reproducción reanudada en guild {}", self.guild_id);
        Ok(())
    }

    /// Fuerza el fin del track actual. El avance en sí ocurre por la misma
    /// transición de fin de track que un término natural.
    async fn skip(&mut self) -> Result<(), PlayerError> {
        if self.queue.is_empty() {
            return Err(PlayerError::QueueEmpty);
        }

        match self.state {
            PlayState::Playing | PlayState::Paused => {
                if let Some(track) = self.queue.current() {
                    info!("⏭️ Saltando: {}", track.title);
                }
                if let Some(handle) = &self.handle {
                    let _ = handle.stop_current().await;
                }
                Ok(())
            }
            PlayState::Resolving => {
                // Resolución en vuelo: se cancela y se avanza por el mismo
                // camino que un fin de track.
                self.cancel_pending_work();
                self.on_track_end();
                Ok(())
            }
            PlayState::Idle | PlayState::Connecting => Err(PlayerError::QueueEmpty),
        }
    }

    async fn stop(&mut self) {
        info!("⏹️ Deteniendo reproducción en guild {}", self.guild_id);
        self.cancel_pending_work();
        self.queue.clear_all();
        if let Some(handle) = self.handle.take() {
            let _ = handle.stop_and_release().await;
        }
        *self.connected.lock() = None;
        self.state = PlayState::Idle;
    }

    fn cancel_pending_work(&mut self) {
        if let Some(token) = self.resolve_token.take() {
            token.cancel();
        }
        if let Some(token) = self.advance_token.take() {
            token.cancel();
        }
    }

    /// Lanza la resolución del stream del track actual como subtarea
    /// cancelable; el resultado vuelve al loop como evento.
    fn start_resolving(&mut self) {
        if let Some(token) = self.resolve_token.take() {
            token.cancel();
        }

        let Some(track) = self.queue.current().cloned() else {
            self.state = PlayState::Idle;
            return;
        };

        self.state = PlayState::Resolving;
        let token = CancellationToken::new();
        self.resolve_token = Some(token.clone());
        let resolver = self.resolver.clone();
        let tx = self.events_tx.clone();

        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                result = resolver.resolve_stream(&track) => {
                    let _ = tx.send(PlayerEvent::Resolved {
                        track_url: track.url,
                        result,
                    });
                }
            }
        });
    }

    async fn on_resolved(
        &mut self,
        track_url: String,
        result: Result<ResolvedStream, PlayerError>,
    ) {
        // Resultados obsoletos (stop, skip o cambio de cola durante la
        // resolución) se descartan.
        if self.state != PlayState::Resolving {
            return;
        }
        match self.queue.current() {
            Some(current) if current.url == track_url => {}
            _ => return,
        }
        self.resolve_token = None;

        match result {
            Ok(resolved) => {
                self.queue
                    .enrich_current(resolved.uploader, resolved.thumbnail);

                let volume = f32::from(self.queue.volume()) / 100.0;
                let Some(handle) = &self.handle else {
                    self.state = PlayState::Idle;
                    return;
                };

                match handle.play(resolved.source, volume).await {
                    Ok(()) => {
                        self.state = PlayState::Playing;
                        if let Some(track) = self.queue.current() {
                            info!("🎵 Reproduciendo: {}", track.title);
                        }
                    }
                    Err(err) => {
                        warn!(
                            "⚠️ El transporte rechazó el recurso en guild {}: {}",
                            self.guild_id, err
                        );
                        self.fail_current();
                    }
                }
            }
            Err(err) => {
                warn!(
                    "⚠️ No se pudo resolver el stream en guild {}: {}",
                    self.guild_id, err
                );
                self.fail_current();
            }
        }
    }

    /// Un fallo de resolución descarta el track (incluso con loop activo,
    /// para no girar sobre un track muerto) y reintenta con el siguiente.
    fn fail_current(&mut self) {
        self.queue.drop_current();
        if self.queue.is_empty() {
            info!(
                "📭 Cola vacía tras fallo de resolución en guild {}",
                self.guild_id
            );
            self.state = PlayState::Idle;
        } else {
            self.schedule_advance();
        }
    }

    /// Espera breve antes de reproducir el siguiente track, para no ciclar
    /// a toda velocidad sobre fallos consecutivos.
    fn schedule_advance(&mut self) {
        self.state = PlayState::Resolving;
        if let Some(token) = self.advance_token.take() {
            token.cancel();
        }

        let token = CancellationToken::new();
        self.advance_token = Some(token.clone());
        let tx = self.events_tx.clone();
        let delay = self.advance_delay;

        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(delay) => {
                    let _ = tx.send(PlayerEvent::AdvanceTick);
                }
            }
        });
    }

    async fn on_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Playing => {
                debug!("▶️ Transporte reproduciendo en guild {}", self.guild_id);
            }
            TransportEvent::Paused => {
                debug!("⏸️ Transporte pausado en guild {}", self.guild_id);
            }
            TransportEvent::Idle => {
                if matches!(self.state, PlayState::Playing | PlayState::Paused) {
                    self.on_track_end();
                }
            }
            TransportEvent::Errored(msg) => {
                // Un crash del track se trata igual que un fin natural.
                if matches!(self.state, PlayState::Playing | PlayState::Paused) {
                    warn!(
                        "❌ Error del transporte en guild {}: {}",
                        self.guild_id, msg
                    );
                    self.on_track_end();
                }
            }
        }
    }

    fn on_track_end(&mut self) {
        if self.queue.loop_current() && self.queue.current().is_some() {
            if let Some(track) = self.queue.current() {
                info!("🔂 Repitiendo track: {}", track.title);
            }
            self.start_resolving();
            return;
        }

        self.queue.drop_current();
        if self.queue.is_empty() {
            info!("📭 Cola terminada en guild {}", self.guild_id);
            self.state = PlayState::Idle;
        } else {
            self.schedule_advance();
        }
    }

    fn snapshot(&self) -> QueueSnapshot {
        QueueSnapshot {
            current: self.queue.current().cloned(),
            upcoming: self.queue.tracks().iter().skip(1).cloned().collect(),
            playing: self.state == PlayState::Playing,
            paused: self.state == PlayState::Paused,
            loop_current: self.queue.loop_current(),
            volume: self.queue.volume(),
            connected_channel: *self.connected.lock(),
        }
    }
}

/// Mapa guild → reproductor: el único estado compartido entre canales.
///
/// La creación usa la entrada del mapa como guard, así dos comandos
/// simultáneos del mismo guild no crean reproductores duplicados.
pub struct PlayerRegistry {
    players: DashMap<GuildId, PlayerHandle>,
    transport: Arc<dyn AudioTransport>,
    resolver: Arc<TrackResolver>,
    config: Config,
}

impl PlayerRegistry {
    pub fn new(
        transport: Arc<dyn AudioTransport>,
        resolver: Arc<TrackResolver>,
        config: Config,
    ) -> Self {
        Self {
            players: DashMap::new(),
            transport,
            resolver,
            config,
        }
    }

    /// Obtiene el reproductor del guild, creándolo en el primer uso.
    pub fn get_or_create(&self, guild_id: GuildId) -> PlayerHandle {
        self.players
            .entry(guild_id)
            .or_insert_with(|| {
                info!("🆕 Creando reproductor para guild {}", guild_id);
                GuildPlayer::spawn(
                    guild_id,
                    self.transport.clone(),
                    self.resolver.clone(),
                    &self.config,
                )
            })
            .clone()
    }

    pub fn get(&self, guild_id: GuildId) -> Option<PlayerHandle> {
        self.players.get(&guild_id).map(|entry| entry.value().clone())
    }

    /// Detiene y descarta el reproductor del guild. El transporte se libera
    /// antes de tirar el estado.
    pub async fn destroy(&self, guild_id: GuildId) {
        if let Some((_, handle)) = self.players.remove(&guild_id) {
            info!("🔌 Destruyendo reproductor de guild {}", guild_id);
            let _ = handle.stop().await;
            handle.shutdown();
        }
    }
}

#[async_trait]
impl VoiceTeardown for PlayerRegistry {
    async fn teardown(&self, guild_id: GuildId) {
        self.destroy(guild_id).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{settle, test_config, FakeFailure, FakeStrategy, FakeTransport};
    use serenity::model::id::UserId;
    use std::sync::Arc;

    fn track(title: &str, duration: u64) -> Track {
        Track::new(title, format!("https://youtu.be/{title}"), UserId::new(7))
            .with_duration(duration)
    }

    fn spawn_player(
        strategy: FakeStrategy,
    ) -> (PlayerHandle, Arc<FakeTransport>) {
        let config = test_config();
        let transport = Arc::new(FakeTransport::new());
        let resolver = Arc::new(TrackResolver::new(vec![Arc::new(strategy)], &config));
        let handle = GuildPlayer::spawn(GuildId::new(1), transport.clone(), resolver, &config);
        (handle, transport)
    }

    #[tokio::test(start_paused = true)]
    async fn test_enqueue_autostarts_playback() {
        let (player, transport) = spawn_player(FakeStrategy::ok("fuente"));

        player.connect(ChannelId::new(10)).await.unwrap();
        let outcome = player
            .enqueue(vec![track("a", 300)])
            .await
            .unwrap();
        assert_eq!(outcome.added, 1);
        assert_eq!(outcome.first_position, 1);
        settle().await;

        let snap = player.snapshot().await.unwrap();
        assert!(snap.playing);
        assert_eq!(snap.current.unwrap().title, "a");
        assert_eq!(transport.play_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_skip_then_natural_completion() {
        let (player, transport) = spawn_player(FakeStrategy::ok("fuente"));

        player.connect(ChannelId::new(10)).await.unwrap();
        player
            .enqueue(vec![track("a", 300), track("b", 200)])
            .await
            .unwrap();
        settle().await;

        player.skip().await.unwrap();
        settle().await;

        let snap = player.snapshot().await.unwrap();
        assert_eq!(snap.current.as_ref().unwrap().title, "b");
        assert!(snap.upcoming.is_empty());
        assert!(snap.playing);

        // Fin natural de b: la cola queda vacía y el estado en Idle.
        transport.emit_idle();
        settle().await;

        let snap = player.snapshot().await.unwrap();
        assert!(snap.current.is_none());
        assert!(!snap.playing);
        assert!(!snap.paused);
    }

    #[tokio::test(start_paused = true)]
    async fn test_loop_replays_current_track() {
        let (player, transport) = spawn_player(FakeStrategy::ok("fuente"));

        player.connect(ChannelId::new(10)).await.unwrap();
        assert!(player.toggle_loop().await.unwrap());
        player.enqueue(vec![track("a", 300)]).await.unwrap();
        settle().await;

        transport.emit_idle();
        settle().await;

        let snap = player.snapshot().await.unwrap();
        assert_eq!(snap.current.unwrap().title, "a");
        assert_eq!(snap.upcoming.len(), 0);
        assert!(snap.playing);
        // Se volvió a crear un recurso para el mismo track.
        assert_eq!(transport.play_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_all_failing_queue_drains_to_idle() {
        let (player, transport) = spawn_player(FakeStrategy::failing(
            "rota",
            FakeFailure::Unavailable,
        ));

        player.connect(ChannelId::new(10)).await.unwrap();
        player
            .enqueue(vec![track("a", 300), track("b", 200), track("c", 100)])
            .await
            .unwrap();
        settle().await;
        settle().await;
        settle().await;

        let snap = player.snapshot().await.unwrap();
        assert!(snap.current.is_none());
        assert!(!snap.playing);
        assert_eq!(transport.play_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_resume_validity() {
        let (player, _transport) = spawn_player(FakeStrategy::ok("fuente"));

        // Nada reproduciéndose: ambas fallan.
        assert!(player.pause().await.is_err());
        assert!(player.resume().await.is_err());

        player.connect(ChannelId::new(10)).await.unwrap();
        player.enqueue(vec![track("a", 300)]).await.unwrap();
        settle().await;

        player.pause().await.unwrap();
        let snap = player.snapshot().await.unwrap();
        assert!(snap.paused);
        assert!(!snap.playing);

        // Pausar dos veces falla; reanudar vuelve a Playing.
        assert!(player.pause().await.is_err());
        player.resume().await.unwrap();
        assert!(player.snapshot().await.unwrap().playing);
    }

    #[tokio::test(start_paused = true)]
    async fn test_skip_on_empty_queue_fails() {
        let (player, _transport) = spawn_player(FakeStrategy::ok("fuente"));
        player.connect(ChannelId::new(10)).await.unwrap();
        assert!(matches!(
            player.skip().await.unwrap_err(),
            PlayerError::QueueEmpty
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_clears_and_releases() {
        let (player, transport) = spawn_player(FakeStrategy::ok("fuente"));

        player.connect(ChannelId::new(10)).await.unwrap();
        player
            .enqueue(vec![track("a", 300), track("b", 200)])
            .await
            .unwrap();
        settle().await;

        player.stop().await.unwrap();
        let snap = player.snapshot().await.unwrap();
        assert!(snap.current.is_none());
        assert!(snap.upcoming.is_empty());
        assert!(snap.connected_channel.is_none());
        assert!(transport.released());

        // Idempotente.
        player.stop().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_denied_leaves_queue_untouched() {
        let config = test_config();
        let transport = Arc::new(FakeTransport::denying());
        let resolver = Arc::new(TrackResolver::new(
            vec![Arc::new(FakeStrategy::ok("fuente"))],
            &config,
        ));
        let player = GuildPlayer::spawn(GuildId::new(2), transport, resolver, &config);

        player.enqueue(vec![track("a", 300)]).await.unwrap();
        let err = player.connect(ChannelId::new(10)).await.unwrap_err();
        assert!(matches!(err, PlayerError::ConnectionDenied));

        let snap = player.snapshot().await.unwrap();
        assert_eq!(snap.upcoming.len(), 0);
        assert_eq!(snap.current.unwrap().title, "a");
        assert!(!snap.playing);
    }

    #[tokio::test(start_paused = true)]
    async fn test_volume_applied_at_resource_creation() {
        let (player, transport) = spawn_player(FakeStrategy::ok("fuente"));

        player.connect(ChannelId::new(10)).await.unwrap();
        player.set_volume(30).await.unwrap();
        player.enqueue(vec![track("a", 300)]).await.unwrap();
        settle().await;

        let played = transport.last_played().unwrap();
        assert!((played.1 - 0.30).abs() < f32::EPSILON);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transport_error_advances_like_completion() {
        let (player, transport) = spawn_player(FakeStrategy::ok("fuente"));

        player.connect(ChannelId::new(10)).await.unwrap();
        player
            .enqueue(vec![track("a", 300), track("b", 200)])
            .await
            .unwrap();
        settle().await;

        transport.emit_error("se cayó el stream");
        settle().await;

        let snap = player.snapshot().await.unwrap();
        assert_eq!(snap.current.unwrap().title, "b");
        assert!(snap.playing);
    }
}
