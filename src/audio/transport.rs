use async_trait::async_trait;
use serenity::model::id::{ChannelId, GuildId};
use thiserror::Error;
use tokio::sync::mpsc;

/// Señales de ciclo de vida que emite el transporte por cada conexión.
///
/// El control loop del guild las consume como entradas de su máquina de
/// estados; nada más reacciona a ellas.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    Playing,
    /// El track actual terminó (fin natural, stop forzado o crash del
    /// driver: el motor trata los tres igual).
    Idle,
    Paused,
    Errored(String),
}

/// Recurso de audio que el transporte sabe convertir en un stream real.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamSource {
    /// URL directa de audio progresivo (Cobalt, Invidious, yt-dlp --get-url).
    DirectUrl(String),
    /// URL de página que se delega a yt-dlp en el momento de reproducir.
    WebPage(String),
}

#[derive(Debug, Error)]
pub enum TransportError {
    /// El transporte negó el acceso al canal (permisos).
    #[error("acceso denegado al canal de voz")]
    Denied,
    #[error("fallo del transporte: {0}")]
    Failed(String),
}

/// Fábrica de conexiones de voz. El motor sólo conoce esta interfaz;
/// la implementación real vive en [`crate::audio::voice::SongbirdTransport`].
#[async_trait]
pub trait AudioTransport: Send + Sync {
    /// Conecta (o mueve) la sesión de voz del guild al canal dado.
    ///
    /// Devuelve el handle de la conexión y el stream de eventos asociado.
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
    >;
}

/// Conexión de voz activa de un guild, propiedad exclusiva de su cola.
#[async_trait]
pub trait TransportHandle: Send + Sync {
    /// Canal al que está conectado este handle.
    fn channel_id(&self) -> ChannelId;

    /// Comienza a reproducir el recurso con la ganancia dada (0.0-1.0).
    async fn play(&self, source: StreamSource, volume: f32) -> Result<(), TransportError>;

    async fn pause(&self) -> Result<(), TransportError>;

    async fn resume(&self) -> Result<(), TransportError>;

    /// Detiene el track actual sin soltar la conexión. Dispara el mismo
    /// evento `Idle` que un fin natural.
    async fn stop_current(&self) -> Result<(), TransportError>;

    /// Detiene todo y libera la conexión de voz.
    async fn stop_and_release(&self) -> Result<(), TransportError>;
}
