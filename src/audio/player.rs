use serenity::model::id::{ChannelId, GuildId};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::{
    queue::{QueueEntry, QueueSnapshot},
    registry::{SessionContext, SessionRegistry},
    session::{SessionCommand, TeardownReason},
};
use crate::{
    error::{PlayerError, PlayerResult},
    sources::{ResolvedTrack, TrackRequest, TrackResolver},
};

/// Intentos de entrega cuando la sesión muere entre la búsqueda y el envío
const ENQUEUE_ATTEMPTS: usize = 2;

/// Punto de entrada del reproductor para la capa de comandos.
pub struct MusicPlayer {
    resolver: Arc<dyn TrackResolver>,
    registry: Arc<SessionRegistry>,
}

impl MusicPlayer {
    pub fn new(resolver: Arc<dyn TrackResolver>, ctx: SessionContext) -> Self {
        Self {
            resolver,
            registry: SessionRegistry::new(ctx),
        }
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Resuelve la entrada y la agrega a la cola de la guild
    pub async fn enqueue(
        &self,
        guild: GuildId,
        request: TrackRequest,
    ) -> PlayerResult<ResolvedTrack> {
        // Un stop durante la resolución invalida este pedido
        let epoch = self.registry.epoch(guild);

        info!("🔍 Resolviendo '{}' para guild {}", request.input, guild);
        let track = self.resolver.resolve(&request.input).await?;
        let entry = QueueEntry::new(track.clone(), request.requested_by);

        let mut last_error = PlayerError::NoSession;
        for _ in 0..ENQUEUE_ATTEMPTS {
            let handle = self
                .registry
                .get_or_create(guild, request.voice_channel, request.text_channel, epoch)
                .await?;

            let entry = entry.clone();
            match handle
                .request(|reply| SessionCommand::Enqueue { entry, reply })
                .await
            {
                Ok(result) => {
                    result?;
                    return Ok(track);
                }
                Err(e) => {
                    debug!("Sesión {} cerrada durante enqueue, reintentando", handle.instance);
                    last_error = e;
                }
            }
        }

        Err(last_error)
    }

    pub async fn get_queue(&self, guild: GuildId) -> QueueSnapshot {
        let Some(handle) = self.registry.current(guild).await else {
            return QueueSnapshot::default();
        };

        handle
            .request(|reply| SessionCommand::Snapshot { reply })
            .await
            .unwrap_or_default()
    }

    /// `false` si no había nada sonando
    pub async fn skip(&self, guild: GuildId) -> bool {
        self.ask(guild, |reply| SessionCommand::Skip { reply }).await
    }

    pub async fn pause(&self, guild: GuildId) -> bool {
        self.ask(guild, |reply| SessionCommand::Pause { reply }).await
    }

    pub async fn resume(&self, guild: GuildId) -> bool {
        self.ask(guild, |reply| SessionCommand::Resume { reply }).await
    }

    /// Vacía la cola, corta el audio y sale del canal
    pub async fn stop(&self, guild: GuildId) {
        info!("⏹️ Stop en guild {}", guild);
        self.registry.stop(guild).await;
    }

    /// Un canal borrado cierra la sesión que lo usaba (voz o texto)
    pub async fn on_channel_deleted(&self, guild: GuildId, channel: ChannelId) {
        let Some(handle) = self.registry.current(guild).await else {
            return;
        };

        if handle.voice_channel == channel || handle.text_channel == channel {
            warn!("🗑️ Canal {} eliminado en guild {}", channel, guild);
            self.registry
                .remove(guild, TeardownReason::ChannelDeleted)
                .await;
        }
    }

    /// Cambio de miembros en voz: revisa la ocupación sin esperar al sondeo
    pub fn on_voice_state_changed(&self, guild: GuildId) {
        if let Some(handle) = self.registry.handle(guild) {
            handle.notify(SessionCommand::CheckOccupancy);
        }
    }

    pub async fn shutdown(&self) {
        self.registry.shutdown_all().await;
    }

    async fn ask(
        &self,
        guild: GuildId,
        make: impl FnOnce(tokio::sync::oneshot::Sender<bool>) -> SessionCommand,
    ) -> bool {
        match self.registry.current(guild).await {
            Some(handle) => handle.request(make).await.unwrap_or(false),
            None => false,
        }
    }
}
