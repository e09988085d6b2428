use chrono::{DateTime, Utc};
use rand::seq::SliceRandom;
use serenity::model::id::UserId;

use crate::error::PlayerError;

/// Un track listo para reproducir, con su metadata.
///
/// Inmutable una vez creado; la única excepción es el enriquecimiento de
/// `thumbnail`/`uploader` sobre el track actual (ver
/// [`PlaybackQueue::enrich_current`]).
#[derive(Debug, Clone, PartialEq)]
pub struct Track {
    pub title: String,
    pub url: String,
    /// 0 = desconocida o transmisión en vivo.
    pub duration_secs: u64,
    pub thumbnail: Option<String>,
    pub uploader: Option<String>,
    pub requested_by: UserId,
    pub added_at: DateTime<Utc>,
}

impl Track {
    pub fn new(title: impl Into<String>, url: impl Into<String>, requested_by: UserId) -> Self {
        Self {
            title: title.into(),
            url: url.into(),
            duration_secs: 0,
            thumbnail: None,
            uploader: None,
            requested_by,
            added_at: Utc::now(),
        }
    }

    pub fn with_duration(mut self, secs: u64) -> Self {
        self.duration_secs = secs;
        self
    }

    pub fn with_thumbnail(mut self, thumbnail: impl Into<String>) -> Self {
        self.thumbnail = Some(thumbnail.into());
        self
    }

    pub fn with_uploader(mut self, uploader: impl Into<String>) -> Self {
        self.uploader = Some(uploader.into());
        self
    }
}

/// Cola de reproducción de un guild.
///
/// El índice 0 es siempre la canción actual cuando la cola no está vacía.
/// Esta estructura sólo guarda estado; el control loop de
/// [`crate::audio::player::GuildPlayer`] decide cuándo avanzar.
#[derive(Debug)]
pub struct PlaybackQueue {
    tracks: Vec<Track>,
    loop_current: bool,
    volume: u8,
    max_size: usize,
}

impl PlaybackQueue {
    pub fn new(max_size: usize, default_volume: u8) -> Self {
        Self {
            tracks: Vec::new(),
            loop_current: false,
            volume: default_volume.min(100),
            max_size,
        }
    }

    /// Agrega un track al final de la cola.
    ///
    /// Devuelve una referencia al track almacenado; la cola conserva la
    /// propiedad.
    pub fn enqueue(&mut self, track: Track) -> Result<&Track, PlayerError> {
        if self.tracks.len() >= self.max_size {
            return Err(PlayerError::QueueFull { max: self.max_size });
        }
        self.tracks.push(track);
        Ok(self.tracks.last().unwrap())
    }

    /// Espacio restante antes de llegar al máximo.
    pub fn remaining_capacity(&self) -> usize {
        self.max_size.saturating_sub(self.tracks.len())
    }

    pub fn current(&self) -> Option<&Track> {
        self.tracks.first()
    }

    /// Descarta la canción actual y promueve la siguiente.
    pub fn drop_current(&mut self) -> Option<Track> {
        if self.tracks.is_empty() {
            None
        } else {
            Some(self.tracks.remove(0))
        }
    }

    /// Vacía la cola por completo, incluida la canción actual.
    pub fn clear_all(&mut self) {
        self.tracks.clear();
    }

    /// Elimina todo excepto la canción actual (índice 0).
    pub fn clear_upcoming(&mut self) {
        self.tracks.truncate(1);
    }

    /// Elimina la canción en `position` (1-based, 1 = la actual).
    ///
    /// La posición 1 se rechaza: para quitar la actual hay que usar skip.
    pub fn remove_song(&mut self, position: usize) -> Result<Track, PlayerError> {
        if position <= 1 || position > self.tracks.len() {
            return Err(PlayerError::InvalidPosition { position });
        }
        Ok(self.tracks.remove(position - 1))
    }

    /// Mezcla la cola manteniendo fija la canción actual.
    pub fn shuffle(&mut self) -> Result<(), PlayerError> {
        if self.tracks.len() < 2 {
            return Err(PlayerError::QueueEmpty);
        }
        let mut rng = rand::thread_rng();
        self.tracks[1..].shuffle(&mut rng);
        Ok(())
    }

    pub fn set_volume(&mut self, volume: i64) -> u8 {
        self.volume = volume.clamp(0, 100) as u8;
        self.volume
    }

    pub fn volume(&self) -> u8 {
        self.volume
    }

    pub fn toggle_loop(&mut self) -> bool {
        self.loop_current = !self.loop_current;
        self.loop_current
    }

    pub fn set_loop(&mut self, enabled: bool) {
        self.loop_current = enabled;
    }

    pub fn loop_current(&self) -> bool {
        self.loop_current
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    /// Completa metadata faltante del track actual tras resolver su stream.
    ///
    /// Sólo rellena campos vacíos y sólo sobre el índice 0.
    pub fn enrich_current(&mut self, uploader: Option<String>, thumbnail: Option<String>) {
        if let Some(current) = self.tracks.first_mut() {
            if current.uploader.is_none() {
                current.uploader = uploader;
            }
            if current.thumbnail.is_none() {
                current.thumbnail = thumbnail;
            }
        }
    }
}
