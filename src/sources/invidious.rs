use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{ResolvedStream, SourceError, SourceStrategy, TrackMetadata};
use crate::audio::transport::StreamSource;

/// Estrategia alternativa: instancias públicas de Invidious.
pub struct InvidiousClient {
    client: reqwest::Client,
    instances: Vec<String>,
    current_instance: AtomicUsize,
}

#[derive(Debug, Deserialize)]
struct InvidiousVideo {
    title: String,
    #[serde(rename = "lengthSeconds")]
    length_seconds: Option<u64>,
    author: Option<String>,
    #[serde(rename = "videoThumbnails")]
    video_thumbnails: Option<Vec<Thumbnail>>,
    #[serde(rename = "adaptiveFormats")]
    adaptive_formats: Option<Vec<AdaptiveFormat>>,
    #[serde(rename = "liveNow")]
    live_now: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct Thumbnail {
    url: String,
}

#[derive(Debug, Deserialize)]
struct AdaptiveFormat {
    url: String,
    #[serde(rename = "type")]
    format_type: String,
    bitrate: Option<String>,
}

#[derive(Debug, Deserialize)]
struct InvidiousSearchResult {
    #[serde(rename = "videoId")]
    video_id: String,
    title: String,
    #[serde(rename = "lengthSeconds")]
    length_seconds: Option<u64>,
    author: Option<String>,
    #[serde(rename = "videoThumbnails")]
    video_thumbnails: Option<Vec<Thumbnail>>,
}

impl InvidiousClient {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .user_agent("Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36")
            .build()
            .unwrap_or_default();

        // Instancias públicas conocidas; se rotan ante fallos.
        let instances = vec![
            "https://yewtu.be".to_string(),
            "https://inv.nadeko.net".to_string(),
            "https://invidious.nerdvpn.de".to_string(),
        ];

        Self {
            client,
            instances,
            current_instance: AtomicUsize::new(0),
        }
    }

    fn instance(&self) -> &str {
        let index = self.current_instance.load(Ordering::Relaxed) % self.instances.len();
        &self.instances[index]
    }

    fn rotate_instance(&self) {
        self.current_instance.fetch_add(1, Ordering::Relaxed);
        debug!("🔄 Invidious: rotando a instancia {}", self.instance());
    }

    /// Extrae el id de video de una URL de YouTube.
    pub fn extract_video_id(url: &str) -> Result<String, SourceError> {
        let pattern = Regex::new(
            r"(?:youtube\.com/watch\?v=|youtu\.be/|youtube\.com/embed/|youtube\.com/shorts/)([A-Za-z0-9_-]{11})",
        )
        .unwrap();

        pattern
            .captures(url)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().to_string())
            .ok_or_else(|| {
                SourceError::Malformed(format!("no se pudo extraer id de video de {url}"))
            })
    }

    async fn fetch_video(&self, video_id: &str) -> Result<InvidiousVideo, SourceError> {
        let url = format!("{}/api/v1/videos/{}", self.instance(), video_id);

        let response = self.client.get(&url).send().await.map_err(|e| {
            self.rotate_instance();
            if e.is_timeout() {
                SourceError::Timeout
            } else {
                SourceError::Other(e.into())
            }
        })?;

        match response.status().as_u16() {
            200 => {}
            404 => return Err(SourceError::NotFound),
            status => {
                self.rotate_instance();
                return Err(SourceError::classify_provider_message(&format!(
                    "invidious http {status}"
                )));
            }
        }

        response
            .json()
            .await
            .map_err(|e| SourceError::Malformed(e.to_string()))
    }

    fn best_thumbnail(thumbnails: Option<Vec<Thumbnail>>) -> Option<String> {
        thumbnails.and_then(|mut list| {
            if list.is_empty() {
                None
            } else {
                Some(list.remove(0).url)
            }
        })
    }
}

impl Default for InvidiousClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SourceStrategy for InvidiousClient {
    fn name(&self) -> &'static str {
        "invidious"
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(15)
    }

    async fn get_video_info(&self, url: &str) -> Result<TrackMetadata, SourceError> {
        let video_id = Self::extract_video_id(url)?;
        let video = self.fetch_video(&video_id).await?;

        Ok(TrackMetadata {
            title: video.title,
            url: format!("https://www.youtube.com/watch?v={video_id}"),
            duration_secs: video.length_seconds.unwrap_or(0),
            uploader: video.author,
            thumbnail: Self::best_thumbnail(video.video_thumbnails),
            is_live: video.live_now.unwrap_or(false),
        })
    }

    async fn get_audio_source(&self, url: &str) -> Result<ResolvedStream, SourceError> {
        let video_id = Self::extract_video_id(url)?;
        let video = self.fetch_video(&video_id).await?;

        let formats = video.adaptive_formats.unwrap_or_default();
        let audio = formats
            .into_iter()
            .filter(|f| f.format_type.starts_with("audio/"))
            .max_by_key(|f| {
                f.bitrate
                    .as_deref()
                    .and_then(|b| b.parse::<u64>().ok())
                    .unwrap_or(0)
            });

        match audio {
            Some(format) => {
                info!("✅ Invidious entregó audio para {}", video_id);
                let mut stream = ResolvedStream::new(StreamSource::DirectUrl(format.url));
                stream.uploader = video.author;
                stream.thumbnail = Self::best_thumbnail(video.video_thumbnails);
                Ok(stream)
            }
            None => {
                warn!("⚠️ Invidious sin formatos de audio para {}", video_id);
                Err(SourceError::Unavailable)
            }
        }
    }

    async fn search(&self, query: &str, limit: usize) -> Result<Vec<TrackMetadata>, SourceError> {
        info!("🔍 Invidious: buscando '{}'", query);

        let url = format!(
            "{}/api/v1/search?q={}&type=video",
            self.instance(),
            urlencoding::encode(query)
        );

        let response = self.client.get(&url).send().await.map_err(|e| {
            self.rotate_instance();
            if e.is_timeout() {
                SourceError::Timeout
            } else {
                SourceError::Other(e.into())
            }
        })?;

        if !response.status().is_success() {
            self.rotate_instance();
            return Err(SourceError::classify_provider_message(&format!(
                "invidious http {}",
                response.status()
            )));
        }

        let results: Vec<InvidiousSearchResult> = response
            .json()
            .await
            .map_err(|e| SourceError::Malformed(e.to_string()))?;

        Ok(results
            .into_iter()
            .take(limit)
            .map(|result| TrackMetadata {
                title: result.title,
                url: format!("https://www.youtube.com/watch?v={}", result.video_id),
                duration_secs: result.length_seconds.unwrap_or(0),
                uploader: result.author,
                thumbnail: Self::best_thumbnail(result.video_thumbnails),
                is_live: false,
            })
            .collect())
    }

    async fn expand_playlist(
        &self,
        _url: &str,
        _max_items: usize,
    ) -> Result<Vec<TrackMetadata>, SourceError> {
        Err(SourceError::Unsupported)
    }
}
