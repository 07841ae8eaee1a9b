use anyhow::Result;
use chrono::Utc;
use serenity::{
    builder::{
        CreateInteractionResponse, CreateInteractionResponseMessage, EditInteractionResponse,
    },
    model::{
        application::CommandInteraction,
        id::{ChannelId, GuildId, UserId},
    },
    prelude::Context,
};
use tracing::{info, warn};

use super::commands::MusicAction;
use crate::{
    audio::player::MusicPlayer,
    error::PlayerError,
    sources::TrackRequest,
    ui::embeds,
};

/// Maneja comandos slash
pub async fn handle_command(
    ctx: &Context,
    command: CommandInteraction,
    player: &MusicPlayer,
) -> Result<()> {
    let guild_id = command
        .guild_id
        .ok_or_else(|| anyhow::anyhow!("Comando usado fuera de un servidor"))?;

    let Some(action) = MusicAction::from_options(&command.data.options()) else {
        command
            .create_response(
                &ctx.http,
                CreateInteractionResponse::Message(
                    CreateInteractionResponseMessage::new()
                        .content("❌ Comando no reconocido")
                        .ephemeral(true),
                ),
            )
            .await?;
        return Ok(());
    };

    info!(
        "📝 Comando /{} {} usado por {} en guild {}",
        command.data.name,
        action.name(),
        command.user.name,
        guild_id
    );

    match action {
        MusicAction::Play(query) => handle_play(ctx, &command, player, guild_id, query).await,
        MusicAction::List => handle_list(ctx, &command, player, guild_id).await,
        action => handle_control(ctx, &command, player, guild_id, action).await,
    }
}

async fn handle_play(
    ctx: &Context,
    command: &CommandInteraction,
    player: &MusicPlayer,
    guild_id: GuildId,
    query: String,
) -> Result<()> {
    // Verificar que el usuario esté en un canal de voz
    let Some(voice_channel) = get_user_voice_channel(ctx, guild_id, command.user.id) else {
        command
            .create_response(
                &ctx.http,
                CreateInteractionResponse::Message(
                    CreateInteractionResponseMessage::new()
                        .content("❌ Debes estar en un canal de voz")
                        .ephemeral(true),
                ),
            )
            .await?;
        return Ok(());
    };

    // Defer la respuesta ya que la búsqueda puede tomar tiempo
    command.defer_ephemeral(&ctx.http).await?;

    let request = TrackRequest {
        input: query.clone(),
        requested_by: command.user.id,
        voice_channel,
        text_channel: command.channel_id,
    };

    match player.enqueue(guild_id, request).await {
        Ok(track) => {
            command
                .channel_id
                .say(
                    &ctx.http,
                    format!(
                        ":notes: **Queue Added**\n> [{}]({})",
                        track.title, track.webpage_url
                    ),
                )
                .await?;
            command.delete_response(&ctx.http).await?;
        }
        Err(e) => {
            warn!("❌ No se pudo agregar '{}' en guild {}: {}", query, guild_id, e);
            command
                .edit_response(
                    &ctx.http,
                    EditInteractionResponse::new().embed(embeds::create_error_embed(
                        "No se pudo reproducir",
                        &user_message(&e),
                    )),
                )
                .await?;
        }
    }

    Ok(())
}

async fn handle_list(
    ctx: &Context,
    command: &CommandInteraction,
    player: &MusicPlayer,
    guild_id: GuildId,
) -> Result<()> {
    let snapshot = player.get_queue(guild_id).await;

    let message = match embeds::queue_listing(&snapshot, Utc::now()) {
        Some(listing) => CreateInteractionResponseMessage::new()
            .embed(embeds::create_queue_embed(&listing)),
        None => CreateInteractionResponseMessage::new()
            .content("😴 **La cola está vacía**\n\n💡 Usa `/music play <canción>` para agregar música"),
    };

    command
        .create_response(&ctx.http, CreateInteractionResponse::Message(message))
        .await?;
    Ok(())
}

/// skip / clear / pause / resume: pueden esperar a la sesión, así que se difiere
async fn handle_control(
    ctx: &Context,
    command: &CommandInteraction,
    player: &MusicPlayer,
    guild_id: GuildId,
    action: MusicAction,
) -> Result<()> {
    command.defer(&ctx.http).await?;

    let content = match action {
        MusicAction::Skip => {
            if player.skip(guild_id).await {
                "⏭️ Canción saltada"
            } else {
                "❌ No hay nada reproduciéndose"
            }
        }
        MusicAction::Pause => {
            if player.pause(guild_id).await {
                "⏸️ Reproducción pausada"
            } else {
                "❌ No hay nada reproduciéndose"
            }
        }
        MusicAction::Resume => {
            if player.resume(guild_id).await {
                "▶️ Reproducción reanudada"
            } else {
                "❌ La reproducción no está pausada"
            }
        }
        MusicAction::Clear => {
            player.stop(guild_id).await;
            "⏹️ Reproducción detenida y cola limpiada"
        }
        MusicAction::Play(_) | MusicAction::List => "❌ Comando no reconocido",
    };

    command
        .edit_response(&ctx.http, EditInteractionResponse::new().content(content))
        .await?;
    Ok(())
}

/// Canal de voz del usuario según la caché
fn get_user_voice_channel(ctx: &Context, guild_id: GuildId, user_id: UserId) -> Option<ChannelId> {
    let guild = ctx.cache.guild(guild_id)?;
    guild
        .voice_states
        .get(&user_id)
        .and_then(|state| state.channel_id)
}

/// Mensaje para el usuario; el detalle técnico queda en los logs
pub fn user_message(error: &PlayerError) -> String {
    match error {
        PlayerError::Resolution(_) => {
            "No se encontró la canción o no se pudo obtener su audio".to_string()
        }
        PlayerError::Connection(_) => "No se pudo conectar al canal de voz".to_string(),
        PlayerError::QueueFull(max) => format!("La cola está llena (máximo {} canciones)", max),
        PlayerError::Superseded => {
            "La reproducción se detuvo mientras se buscaba la canción".to_string()
        }
        PlayerError::Pipeline(_) | PlayerError::NoSession => {
            "Ocurrió un error inesperado, intenta de nuevo".to_string()
        }
    }
}
