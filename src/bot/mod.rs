//! # Bot Module
//!
//! Discord side of the jukebox: slash command registration, interaction
//! routing and the gateway events that feed the per-guild sessions.
//!
//! [`JukeboxBot`] implements serenity's [`EventHandler`]. The shared
//! [`MusicPlayer`] lives in the client's `TypeMap` under [`PlayerKey`], so it
//! is built after the client (it needs the cache, http and songbird manager)
//! and reached from every handler through [`player`].

use anyhow::Result;
use serenity::{
    all::{
        Context, EventHandler, GuildChannel, GuildId, Interaction, Message, Ready, VoiceState,
    },
    async_trait,
    prelude::TypeMapKey,
};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

pub mod commands;
pub mod events;
pub mod handlers;
pub mod voice;

use crate::{audio::player::MusicPlayer, config::Config};

/// Clave del reproductor compartido en `ctx.data`
pub struct PlayerKey;

impl TypeMapKey for PlayerKey {
    type Value = Arc<MusicPlayer>;
}

/// Obtiene el reproductor registrado en el cliente
pub async fn player(ctx: &Context) -> Option<Arc<MusicPlayer>> {
    let data = ctx.data.read().await;
    data.get::<PlayerKey>().cloned()
}

/// Handler de eventos de Discord.
pub struct JukeboxBot {
    config: Arc<Config>,
}

impl JukeboxBot {
    pub fn new(config: Arc<Config>) -> Self {
        Self { config }
    }

    /// Registra `/music` en la guild de desarrollo o de forma global.
    ///
    /// Los comandos de guild se propagan al instante; los globales pueden
    /// tardar hasta una hora.
    async fn register_commands(&self, ctx: &Context) -> Result<()> {
        info!("📝 Registrando comandos slash...");
        info!("🔧 Application ID: {}", self.config.application_id);

        match self.config.guild_id {
            Some(guild_id) => {
                let guild_id = GuildId::new(guild_id);
                info!("🏠 Registrando comandos para guild específica: {}", guild_id);

                // Verificar que el bot esté en la guild
                if !ctx.cache.guilds().contains(&guild_id) {
                    warn!("⚠️ El bot no está en la guild especificada: {}", guild_id);
                    return Ok(());
                }

                commands::register_guild_commands(ctx, guild_id)
                    .await
                    .map_err(|e| {
                        error!("❌ Error registrando comandos de guild: {:?}", e);
                        anyhow::anyhow!("No se pudieron registrar comandos de guild. Verifica que el bot tenga permisos de 'applications.commands' en la guild.")
                    })?;
                info!("✅ Comandos de guild registrados para: {}", guild_id);
            }
            None => {
                info!("🌐 Registrando comandos globalmente");
                commands::register_global_commands(ctx).await.map_err(|e| {
                    error!("❌ Error registrando comandos globales: {:?}", e);
                    anyhow::anyhow!("No se pudieron registrar comandos globales. Verifica que el bot tenga permisos de 'applications.commands'.")
                })?;
                info!("✅ Comandos globales registrados");
            }
        }

        Ok(())
    }
}

#[async_trait]
impl EventHandler for JukeboxBot {
    async fn ready(&self, ctx: Context, ready: Ready) {
        info!("🤖 {} está en línea!", ready.user.name);
        info!("📊 Conectado a {} servidores", ready.guilds.len());

        if let Err(e) = self.register_commands(&ctx).await {
            error!("Error al registrar comandos: {:?}", e);
        }
    }

    async fn interaction_create(&self, ctx: Context, interaction: Interaction) {
        let Interaction::Command(command) = interaction else {
            return;
        };

        let Some(player) = player(&ctx).await else {
            error!("❌ Reproductor no inicializado");
            return;
        };

        if let Err(e) = handlers::handle_command(&ctx, command, &player).await {
            error!("Error manejando comando: {:?}", e);
        }
    }

    /// Cualquier entrada o salida de voz puede dejar vacío el canal del bot
    async fn voice_state_update(&self, ctx: Context, _old: Option<VoiceState>, new: VoiceState) {
        let Some(guild_id) = new.guild_id else {
            return;
        };

        if let Some(player) = player(&ctx).await {
            debug!("🔊 Cambio de voz de {} en guild {}", new.user_id, guild_id);
            player.on_voice_state_changed(guild_id);
        }
    }

    async fn channel_delete(
        &self,
        ctx: Context,
        channel: GuildChannel,
        _messages: Option<Vec<Message>>,
    ) {
        if let Some(player) = player(&ctx).await {
            player.on_channel_deleted(channel.guild_id, channel.id).await;
        }
    }
}
