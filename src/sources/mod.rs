//! # Sources Module
//!
//! Turns free-form user input (a URL or a search phrase) into a [`ResolvedTrack`]
//! that the audio pipeline can stream.
//!
//! - [`ladder`] tries an ordered list of extraction strategies until one succeeds
//! - [`ytdlp`] runs one strategy through the `yt-dlp` binary
//!
//! Resolution always happens before a guild session is touched, so a failed lookup
//! never disturbs what is already playing.

pub mod ladder;
pub mod ytdlp;

use async_trait::async_trait;
use serenity::model::id::{ChannelId, UserId};
use std::time::Duration;

use crate::error::ResolutionError;

pub use ladder::{LadderResolver, ResolveAttempt};
pub use ytdlp::YtDlpExtractor;

/// Petición de reproducción tal como llega desde la capa de comandos.
#[derive(Debug, Clone)]
pub struct TrackRequest {
    pub input: String,
    pub requested_by: UserId,
    pub voice_channel: ChannelId,
    pub text_channel: ChannelId,
}

/// Track ya resuelto, listo para construir el pipeline de audio.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedTrack {
    pub title: String,
    pub webpage_url: String,
    pub stream_url: String,
    pub duration: Option<Duration>,
    pub is_live: Option<bool>,
}

impl ResolvedTrack {
    /// Un stream en vivo no tiene duración conocida.
    pub fn is_live(&self) -> bool {
        self.is_live.unwrap_or(false)
    }
}

/// Contrato del resolvedor de tracks.
#[async_trait]
pub trait TrackResolver: Send + Sync {
    async fn resolve(&self, input: &str) -> Result<ResolvedTrack, ResolutionError>;
}

/// Verifica si la entrada es una URI bien formada (esquema + host)
pub fn is_likely_url(input: &str) -> bool {
    url::Url::parse(input)
        .map(|u| !u.scheme().is_empty() && u.host_str().is_some_and(|h| !h.is_empty()))
        .unwrap_or(false)
}

/// Usa la URL tal cual o la envuelve como búsqueda del primer resultado
pub fn build_query(input: &str) -> String {
    let trimmed = input.trim();
    if is_likely_url(trimmed) {
        trimmed.to_string()
    } else {
        format!("ytsearch1:{}", trimmed)
    }
}
