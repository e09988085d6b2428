use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::{debug, info};

use super::{ResolvedStream, SourceError, SourceStrategy, TrackMetadata};
use crate::audio::transport::StreamSource;

const DEFAULT_ENDPOINT: &str = "https://api.cobalt.tools/api/json";

/// Estrategia principal: API hosteada de resolución de streams (Cobalt).
///
/// Sólo resuelve streams de audio; metadata y búsqueda quedan para las
/// siguientes estrategias de la cadena.
pub struct CobaltClient {
    client: reqwest::Client,
    endpoint: String,
}

#[derive(Debug, Deserialize)]
struct CobaltResponse {
    status: String,
    url: Option<String>,
    text: Option<String>,
}

impl CobaltClient {
    pub fn new() -> Self {
        Self::with_endpoint(DEFAULT_ENDPOINT)
    }

    pub fn with_endpoint(endpoint: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent("open-jukebox/0.1")
            .build()
            .unwrap_or_default();

        Self {
            client,
            endpoint: endpoint.into(),
        }
    }
}

impl Default for CobaltClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SourceStrategy for CobaltClient {
    fn name(&self) -> &'static str {
        "cobalt"
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(30)
    }

    async fn get_video_info(&self, _url: &str) -> Result<TrackMetadata, SourceError> {
        Err(SourceError::Unsupported)
    }

    async fn get_audio_source(&self, url: &str) -> Result<ResolvedStream, SourceError> {
        debug!("🎵 Cobalt: pidiendo stream de audio para {}", url);

        let response = self
            .client
            .post(&self.endpoint)
            .json(&json!({
                "url": url,
                "isAudioOnly": true,
                "aFormat": "mp3",
                "disableMetadata": false,
            }))
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    SourceError::Timeout
                } else {
                    SourceError::Other(e.into())
                }
            })?;

        if !response.status().is_success() {
            return Err(SourceError::classify_provider_message(&format!(
                "cobalt http {}",
                response.status()
            )));
        }

        let body: CobaltResponse = response
            .json()
            .await
            .map_err(|e| SourceError::Malformed(e.to_string()))?;

        match body.status.as_str() {
            "stream" | "success" | "redirect" | "tunnel" => {
                let stream_url = body.url.ok_or_else(|| {
                    SourceError::Malformed("respuesta de Cobalt sin URL".to_string())
                })?;
                info!("✅ Cobalt entregó stream para {}", url);
                Ok(ResolvedStream::new(StreamSource::DirectUrl(stream_url)))
            }
            "error" | "rate-limit" => {
                let text = body.text.unwrap_or_else(|| "error desconocido".to_string());
                Err(SourceError::classify_provider_message(&text))
            }
            other => Err(SourceError::Malformed(format!(
                "estado de Cobalt inesperado: {other}"
            ))),
        }
    }

    async fn search(&self, _query: &str, _limit: usize) -> Result<Vec<TrackMetadata>, SourceError> {
        Err(SourceError::Unsupported)
    }

    async fn expand_playlist(
        &self,
        _url: &str,
        _max_items: usize,
    ) -> Result<Vec<TrackMetadata>, SourceError> {
        Err(SourceError::Unsupported)
    }
}
