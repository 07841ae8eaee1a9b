//! Guild → session map.
//!
//! Each guild owns a slot guarded by an async mutex. Creating a session
//! (which includes waiting for the voice connection) happens while holding
//! that slot, so concurrent callers for the same guild end up sharing one
//! session while other guilds are never blocked.

use dashmap::DashMap;
use futures::future::join_all;
use serenity::model::id::{ChannelId, GuildId};
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::{
    pipeline::PipelineBuilder,
    session::{GuildSession, SessionHandle, TeardownReason},
    transport::{StatusNotifier, VoiceTransport},
};
use crate::{
    config::SessionTimings,
    error::{PlayerError, PlayerResult},
};

type Slot = Arc<Mutex<Option<SessionHandle>>>;

/// Colaboradores compartidos por todas las sesiones
pub struct SessionContext {
    pub transport: Arc<dyn VoiceTransport>,
    pub pipeline: Arc<dyn PipelineBuilder>,
    pub notifier: Arc<dyn StatusNotifier>,
    pub timings: SessionTimings,
    pub max_queue_size: usize,
}

pub struct SessionRegistry {
    ctx: SessionContext,
    slots: DashMap<GuildId, Slot>,
    /// Se incrementa con cada `stop`; invalida resoluciones en curso
    stop_epochs: DashMap<GuildId, u64>,
    next_instance: AtomicU64,
}

impl SessionRegistry {
    pub fn new(ctx: SessionContext) -> Arc<Self> {
        Arc::new(Self {
            ctx,
            slots: DashMap::new(),
            stop_epochs: DashMap::new(),
            next_instance: AtomicU64::new(1),
        })
    }

    pub fn context(&self) -> &SessionContext {
        &self.ctx
    }

    pub fn epoch(&self, guild: GuildId) -> u64 {
        self.stop_epochs.get(&guild).map(|e| *e).unwrap_or(0)
    }

    /// Devuelve la sesión viva o crea una (conectando antes de volver)
    pub async fn get_or_create(
        self: &Arc<Self>,
        guild: GuildId,
        voice_channel: ChannelId,
        text_channel: ChannelId,
        expected_epoch: u64,
    ) -> PlayerResult<SessionHandle> {
        loop {
            let slot = self.slots.entry(guild).or_default().value().clone();
            let mut current = slot.lock().await;

            // El slot pudo haberse retirado mientras esperábamos
            if !self.is_current(guild, &slot) {
                continue;
            }

            if self.epoch(guild) != expected_epoch {
                drop(current);
                self.prune(guild, &slot);
                return Err(PlayerError::Superseded);
            }

            if let Some(handle) = current.as_ref().filter(|h| !h.is_closed()) {
                return Ok(handle.clone());
            }

            let instance = self.next_instance.fetch_add(1, Ordering::Relaxed);
            match GuildSession::start(
                Arc::clone(self),
                guild,
                voice_channel,
                text_channel,
                instance,
            )
            .await
            {
                Ok(handle) => {
                    *current = Some(handle.clone());
                    return Ok(handle);
                }
                Err(e) => {
                    *current = None;
                    drop(current);
                    self.prune(guild, &slot);
                    return Err(e.into());
                }
            }
        }
    }

    /// Sesión viva, sin esperar a una creación en curso (avisos sin respuesta)
    pub fn handle(&self, guild: GuildId) -> Option<SessionHandle> {
        let slot = self.slots.get(&guild).map(|s| Arc::clone(s.value()))?;
        let current = slot.try_lock().ok()?;
        current.as_ref().filter(|h| !h.is_closed()).cloned()
    }

    /// Sesión viva; si hay una creación en curso espera a que termine
    pub async fn current(&self, guild: GuildId) -> Option<SessionHandle> {
        let slot = self.slots.get(&guild).map(|s| Arc::clone(s.value()))?;
        let current = slot.lock().await;
        current.as_ref().filter(|h| !h.is_closed()).cloned()
    }

    pub fn contains(&self, guild: GuildId) -> bool {
        self.handle(guild).is_some()
    }

    pub fn len(&self) -> usize {
        self.slots
            .iter()
            .filter(|slot| {
                slot.value()
                    .try_lock()
                    .map(|h| h.as_ref().is_some_and(|h| !h.is_closed()))
                    .unwrap_or(true)
            })
            .count()
    }

    /// Detiene la guild: invalida resoluciones pendientes y cierra la sesión
    pub async fn stop(&self, guild: GuildId) {
        let slot = self.slots.entry(guild).or_default().value().clone();
        let handle = {
            let current = slot.lock().await;
            *self.stop_epochs.entry(guild).or_insert(0) += 1;
            current.clone()
        };

        match handle {
            Some(handle) => handle.shutdown(TeardownReason::Stopped).await,
            None => self.prune(guild, &slot),
        }
    }

    /// Cierra la sesión de la guild si existe; idempotente
    pub async fn remove(&self, guild: GuildId, reason: TeardownReason) {
        let Some(slot) = self.slots.get(&guild).map(|s| Arc::clone(s.value())) else {
            return;
        };
        let handle = slot.lock().await.clone();

        if let Some(handle) = handle {
            handle.shutdown(reason).await;
        }
    }

    /// Cierra todas las sesiones (apagado del proceso)
    pub async fn shutdown_all(&self) {
        let guilds: Vec<GuildId> = self.slots.iter().map(|s| *s.key()).collect();
        info!("🛑 Cerrando {} sesiones", guilds.len());
        join_all(
            guilds
                .into_iter()
                .map(|guild| self.remove(guild, TeardownReason::Dropped)),
        )
        .await;
    }

    /// Llamado por la sesión al terminar; sólo libera su propia instancia
    pub(crate) async fn release(&self, guild: GuildId, instance: u64) {
        let Some(slot) = self.slots.get(&guild).map(|s| Arc::clone(s.value())) else {
            return;
        };

        {
            let mut current = slot.lock().await;
            if current.as_ref().is_some_and(|h| h.instance == instance) {
                *current = None;
                debug!("Sesión {} liberada en guild {}", instance, guild);
            }
        }

        self.prune(guild, &slot);
    }

    fn is_current(&self, guild: GuildId, slot: &Slot) -> bool {
        self.slots
            .get(&guild)
            .is_some_and(|s| Arc::ptr_eq(s.value(), slot))
    }

    /// Retira el slot si sigue vacío y nadie lo está usando
    fn prune(&self, guild: GuildId, slot: &Slot) {
        self.slots.remove_if(&guild, |_, s| {
            Arc::ptr_eq(s, slot) && s.try_lock().map(|h| h.is_none()).unwrap_or(false)
        });
    }
}
