use anyhow::Context;
use async_process::Command;
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info};

use super::{ResolvedStream, SourceError, SourceStrategy, TrackMetadata};
use crate::audio::transport::StreamSource;

/// Estrategia local: extracción con el binario `yt-dlp`.
pub struct YtDlpClient {
    // Limitar requests concurrentes para evitar rate limiting
    rate_limiter: tokio::sync::Semaphore,
}

/// Información extraída de yt-dlp (una línea JSON por entrada).
#[derive(Debug, Deserialize)]
struct YtDlpInfo {
    id: Option<String>,
    title: String,
    duration: Option<f64>,
    uploader: Option<String>,
    thumbnail: Option<String>,
    webpage_url: Option<String>,
    url: Option<String>,
    is_live: Option<bool>,
}

impl YtDlpInfo {
    /// URL canónica de la entrada; las playlists planas a veces sólo traen
    /// el id del video.
    fn canonical_url(&self) -> Option<String> {
        if let Some(url) = &self.webpage_url {
            return Some(url.clone());
        }
        if let Some(url) = &self.url {
            if url.starts_with("http") {
                return Some(url.clone());
            }
        }
        self.id
            .as_ref()
            .map(|id| format!("https://www.youtube.com/watch?v={id}"))
    }

    fn into_metadata(self) -> Option<TrackMetadata> {
        let url = self.canonical_url()?;
        Some(TrackMetadata {
            title: self.title,
            url,
            duration_secs: self.duration.map(|d| d as u64).unwrap_or(0),
            uploader: self.uploader,
            thumbnail: self.thumbnail,
            is_live: self.is_live.unwrap_or(false),
        })
    }
}

impl YtDlpClient {
    pub fn new() -> Self {
        Self {
            rate_limiter: tokio::sync::Semaphore::new(3),
        }
    }

    async fn run(&self, args: &[&str]) -> Result<String, SourceError> {
        let _permit = self
            .rate_limiter
            .acquire()
            .await
            .map_err(|e| SourceError::Other(e.into()))?;

        let output = Command::new("yt-dlp")
            .args(args)
            .output()
            .await
            .context("Error al ejecutar yt-dlp")?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(SourceError::classify_provider_message(&stderr));
        }

        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    fn parse_lines(stdout: &str) -> Vec<TrackMetadata> {
        let mut results = Vec::new();
        for line in stdout.lines() {
            match serde_json::from_str::<YtDlpInfo>(line) {
                Ok(info) => {
                    if let Some(meta) = info.into_metadata() {
                        results.push(meta);
                    }
                }
                Err(e) => debug!("↪️ Línea de yt-dlp ignorada: {}", e),
            }
        }
        results
    }
}

impl Default for YtDlpClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SourceStrategy for YtDlpClient {
    fn name(&self) -> &'static str {
        "yt-dlp"
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(20)
    }

    async fn get_video_info(&self, url: &str) -> Result<TrackMetadata, SourceError> {
        debug!("📊 yt-dlp: obteniendo info de {}", url);

        let stdout = self
            .run(&["--no-playlist", "--dump-json", "--no-warnings", url])
            .await?;

        let info: YtDlpInfo = serde_json::from_str(stdout.trim())
            .map_err(|e| SourceError::Malformed(e.to_string()))?;

        info.into_metadata()
            .ok_or_else(|| SourceError::Malformed("entrada sin URL".to_string()))
    }

    async fn get_audio_source(&self, url: &str) -> Result<ResolvedStream, SourceError> {
        debug!("🎵 yt-dlp: obteniendo URL de stream para {}", url);

        let stdout = self
            .run(&[
                "--no-playlist",
                "-f",
                "bestaudio/best",
                "--get-url",
                "--no-warnings",
                url,
            ])
            .await?;

        let stream_url = stdout.trim().to_string();
        if stream_url.is_empty() {
            return Err(SourceError::Malformed(
                "yt-dlp no devolvió URL de stream".to_string(),
            ));
        }

        Ok(ResolvedStream::new(StreamSource::DirectUrl(stream_url)))
    }

    async fn search(&self, query: &str, limit: usize) -> Result<Vec<TrackMetadata>, SourceError> {
        info!("🔍 yt-dlp: buscando '{}'", query);

        let search_query = format!("ytsearch{limit}:{query}");
        let stdout = self
            .run(&[
                "--dump-json",
                "--flat-playlist",
                "--skip-download",
                "--no-warnings",
                &search_query,
            ])
            .await?;

        Ok(Self::parse_lines(&stdout))
    }

    async fn expand_playlist(
        &self,
        url: &str,
        max_items: usize,
    ) -> Result<Vec<TrackMetadata>, SourceError> {
        info!("📋 yt-dlp: expandiendo playlist {}", url);

        let playlist_end = max_items.to_string();
        let stdout = self
            .run(&[
                "--flat-playlist",
                "--dump-json",
                "--playlist-end",
                &playlist_end,
                "--no-warnings",
                url,
            ])
            .await?;

        Ok(Self::parse_lines(&stdout))
    }
}
