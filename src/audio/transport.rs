//! Capabilities consumed from the chat platform.
//!
//! The session core only talks to these traits; the songbird/serenity
//! implementations live in `bot::voice` and `ui::panel`.

use async_trait::async_trait;
use serenity::model::id::{ChannelId, GuildId, MessageId};
use std::sync::Arc;
use tokio::sync::mpsc;

use super::{pipeline::FrameStream, queue::PlaybackState};
use crate::error::{ConnectionError, PipelineError};

/// Cambios de estado de la conexión de voz.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkEvent {
    Connected,
    Reconnecting,
    Disconnected,
}

/// Fin (natural o por error) de un track iniciado con una generación concreta.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackFinished {
    pub generation: u64,
    pub error: Option<String>,
}

/// Canal por el que el transporte avisa que un track terminó.
#[derive(Debug, Clone)]
pub struct TrackCompletion {
    generation: u64,
    tx: mpsc::UnboundedSender<TrackFinished>,
}

impl TrackCompletion {
    pub fn new(generation: u64, tx: mpsc::UnboundedSender<TrackFinished>) -> Self {
        Self { generation, tx }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn ended(&self) {
        self.send(None);
    }

    pub fn failed(&self, error: impl Into<String>) {
        self.send(Some(error.into()));
    }

    fn send(&self, error: Option<String>) {
        // La sesión puede haber terminado ya; no es un error
        let _ = self.tx.send(TrackFinished {
            generation: self.generation,
            error,
        });
    }
}

/// Control del track en reproducción.
pub trait TrackControl: Send + Sync {
    fn stop(&self);
    fn pause(&self);
    fn resume(&self);
}

/// Conexión de voz activa de una guild.
#[async_trait]
pub trait VoiceLink: Send + Sync {
    /// Vuelve a unirse al mismo canal.
    async fn rejoin(&self) -> Result<(), ConnectionError>;

    /// Reproduce el stream reemplazando cualquier track anterior.
    async fn play(
        &self,
        stream: FrameStream,
        completion: TrackCompletion,
    ) -> Result<Box<dyn TrackControl>, PipelineError>;

    async fn disconnect(&self);
}

/// Transporte de voz + consultas de presencia.
#[async_trait]
pub trait VoiceTransport: Send + Sync + 'static {
    /// Abre la conexión; resuelve cuando está lista.
    async fn connect(
        &self,
        guild: GuildId,
        channel: ChannelId,
        events: mpsc::UnboundedSender<LinkEvent>,
    ) -> Result<Arc<dyn VoiceLink>, ConnectionError>;

    /// Miembros humanos (no bots, no nosotros) en el canal; `None` si el canal ya no existe.
    async fn human_listeners(&self, guild: GuildId, channel: ChannelId) -> Option<usize>;
}

/// Contenido del panel de estado.
#[derive(Debug, Clone, PartialEq)]
pub struct PanelView {
    pub title: String,
    pub description: String,
    pub url: Option<String>,
    /// `None` cuando la sesión ya terminó
    pub state: Option<PlaybackState>,
}

/// Mensajes de estado; siempre best-effort.
#[async_trait]
pub trait StatusNotifier: Send + Sync + 'static {
    async fn send(&self, channel: ChannelId, view: &PanelView) -> anyhow::Result<MessageId>;

    async fn edit(
        &self,
        channel: ChannelId,
        message: MessageId,
        view: &PanelView,
    ) -> anyhow::Result<()>;
}
