use thiserror::Error;

/// Errores que el motor expone al comando que lo invocó.
///
/// Los errores del resolver y del transporte se convierten a uno de estos
/// tipos en la frontera del servicio; nunca se propagan crudos.
#[derive(Debug, Error)]
pub enum PlayerError {
    #[error("consulta inválida: {0}")]
    InvalidQuery(String),

    #[error("no se pudo resolver una fuente de audio: {0}")]
    ResolutionUnavailable(String),

    #[error("el contenido es privado o está bloqueado por región")]
    RegionOrPrivacyRestricted,

    #[error("el resultado es un clip corto y fue descartado")]
    ShortFormRejected,

    #[error("la canción excede la duración máxima ({limit}s)")]
    DurationExceeded { limit: u64 },

    #[error("no se pudo conectar al canal de voz")]
    ConnectionDenied,

    #[error("debes estar en el mismo canal de voz que el bot")]
    NotInSameChannel,

    #[error("no hay nada en la cola")]
    QueueEmpty,

    #[error("la cola está llena (máximo {max} canciones)")]
    QueueFull { max: usize },

    #[error("posición inválida: {position}")]
    InvalidPosition { position: usize },

    #[error("la sesión de búsqueda expiró")]
    SessionExpired,

    #[error("esta sesión de búsqueda pertenece a otro usuario")]
    SessionUnauthorized,

    /// El control loop del guild ya terminó (stop/teardown concurrente).
    #[error("el reproductor ya no está disponible")]
    PlayerGone,
}

impl PlayerError {
    /// Indica si el error proviene de una verificación de autorización,
    /// que por contrato nunca muta estado.
    pub fn is_authorization(&self) -> bool {
        matches!(
            self,
            PlayerError::NotInSameChannel | PlayerError::SessionUnauthorized
        )
    }
}
