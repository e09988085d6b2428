use async_trait::async_trait;
use parking_lot::Mutex;
use serenity::model::id::{ChannelId, GuildId};
use songbird::{
    input::{HttpRequest, Input, YoutubeDl},
    tracks::TrackHandle,
    Call, Event, EventContext, EventHandler as VoiceEventHandler, Songbird, TrackEvent,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::audio::transport::{
    AudioTransport, StreamSource, TransportError, TransportEvent, TransportHandle,
};

/// Transporte de producción sobre Songbird.
///
/// Convierte las señales de los tracks (fin, error, pausa) en el stream de
/// eventos que consume el control loop; nadie más escucha los callbacks de
/// Songbird.
pub struct SongbirdTransport {
    manager: Arc<Songbird>,
    http: reqwest::Client,
}

impl SongbirdTransport {
    pub fn new(manager: Arc<Songbird>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_default();

        Self { manager, http }
    }
}

#[async_trait]
impl AudioTransport for SongbirdTransport {
    async fn connect(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
    ) -> Result<
        (
            Box<dyn TransportHandle>,
            mpsc::UnboundedReceiver<TransportEvent>,
        ),
        TransportError,
    > {
        let call = match self.manager.join(guild_id, channel_id).await {
            Ok(call) => call,
            Err(e) => {
                error!("Error al obtener handler de voz: {:?}", e);
                return Err(TransportError::Failed(e.to_string()));
            }
        };

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        {
            let mut handler = call.lock().await;
            register_track_events(&mut handler, events_tx);
        }

        info!("🔊 Conectado al canal de voz {} en guild {}", channel_id, guild_id);

        let handle = SongbirdHandle {
            manager: self.manager.clone(),
            guild_id,
            channel_id,
            call,
            http: self.http.clone(),
            current: Mutex::new(None),
        };

        Ok((Box::new(handle), events_rx))
    }
}

struct SongbirdHandle {
    manager: Arc<Songbird>,
    guild_id: GuildId,
    channel_id: ChannelId,
    call: Arc<tokio::sync::Mutex<Call>>,
    http: reqwest::Client,
    current: Mutex<Option<TrackHandle>>,
}

#[async_trait]
impl TransportHandle for SongbirdHandle {
    fn channel_id(&self) -> ChannelId {
        self.channel_id
    }

    async fn play(&self, source: StreamSource, volume: f32) -> Result<(), TransportError> {
        let input: Input = match source {
            StreamSource::DirectUrl(url) => HttpRequest::new(self.http.clone(), url).into(),
            StreamSource::WebPage(url) => YoutubeDl::new(self.http.clone(), url).into(),
        };

        let track = {
            let mut handler = self.call.lock().await;
            handler.play_input(input)
        };

        // La ganancia de la cola se aplica al crear el recurso.
        let _ = track.set_volume(volume);
        *self.current.lock() = Some(track);
        Ok(())
    }

    async fn pause(&self) -> Result<(), TransportError> {
        if let Some(track) = self.current.lock().as_ref() {
            let _ = track.pause();
        }
        Ok(())
    }

    async fn resume(&self) -> Result<(), TransportError> {
        if let Some(track) = self.current.lock().as_ref() {
            let _ = track.play();
        }
        Ok(())
    }

    async fn stop_current(&self) -> Result<(), TransportError> {
        if let Some(track) = self.current.lock().as_ref() {
            let _ = track.stop();
        }
        Ok(())
    }

    async fn stop_and_release(&self) -> Result<(), TransportError> {
        if let Some(track) = self.current.lock().take() {
            let _ = track.stop();
        }

        if let Err(e) = self.manager.remove(self.guild_id).await {
            warn!(
                "⚠️ No se pudo liberar la conexión de guild {}: {:?}",
                self.guild_id, e
            );
        }
        Ok(())
    }
}

/// Registra los reenviadores de eventos de track sobre la llamada.
fn register_track_events(handler: &mut Call, tx: mpsc::UnboundedSender<TransportEvent>) {
    handler.add_global_event(
        Event::Track(TrackEvent::Play),
        EventForwarder {
            tx: tx.clone(),
            event: ForwardAs::Playing,
        },
    );
    handler.add_global_event(
        Event::Track(TrackEvent::Pause),
        EventForwarder {
            tx: tx.clone(),
            event: ForwardAs::Paused,
        },
    );
    handler.add_global_event(
        Event::Track(TrackEvent::End),
        EventForwarder {
            tx: tx.clone(),
            event: ForwardAs::Idle,
        },
    );
    handler.add_global_event(
        Event::Track(TrackEvent::Error),
        EventForwarder {
            tx,
            event: ForwardAs::Errored,
        },
    );
}

#[derive(Clone, Copy)]
enum ForwardAs {
    Playing,
    Paused,
    Idle,
    Errored,
}

/// Puente entre los callbacks de Songbird y el canal de eventos del motor.
struct EventForwarder {
    tx: mpsc::UnboundedSender<TransportEvent>,
    event: ForwardAs,
}

#[async_trait]
impl VoiceEventHandler for EventForwarder {
    async fn act(&self, ctx: &EventContext<'_>) -> Option<Event> {
        let event = match self.event {
            ForwardAs::Playing => TransportEvent::Playing,
            ForwardAs::Paused => TransportEvent::Paused,
            ForwardAs::Idle => TransportEvent::Idle,
            ForwardAs::Errored => {
                let detail = match ctx {
                    EventContext::Track(track_list) => track_list
                        .iter()
                        .map(|(state, _)| format!("{:?}", state.playing))
                        .collect::<Vec<_>>()
                        .join(", "),
                    _ => "desconocido".to_string(),
                };
                TransportEvent::Errored(detail)
            }
        };

        let _ = self.tx.send(event);
        None
    }
}
