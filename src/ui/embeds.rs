use chrono::{DateTime, Utc};
use serenity::{
    all::{Colour, Timestamp},
    builder::{CreateEmbed, CreateEmbedFooter},
};
use std::time::Duration;

use crate::audio::{
    queue::{PlaybackState, QueueSnapshot},
    transport::PanelView,
};

/// Paleta de colores estandarizada para el bot
pub mod colors {
    use serenity::all::Colour;

    pub const ERROR_RED: Colour = Colour::from_rgb(220, 53, 69);
    pub const WARNING_ORANGE: Colour = Colour::from_rgb(255, 193, 7);
    pub const MUSIC_PURPLE: Colour = Colour::from_rgb(138, 43, 226);
    pub const NEUTRAL_GRAY: Colour = Colour::from_rgb(108, 117, 125);
}

/// Footer estandarizado para todos los embeds
const STANDARD_FOOTER: &str = "🎵 Guild Jukebox";

/// Entradas máximas en el listado de la cola
pub const MAX_LISTED: usize = 50;

/// Límite de Discord para la descripción de un embed
const MAX_DESCRIPTION: usize = 4096;

/// Contenido del panel de estado según la cola actual
pub fn panel_view(snapshot: &QueueSnapshot) -> PanelView {
    let pending = snapshot.queue.len();

    match (&snapshot.current, snapshot.state) {
        (Some(current), state) if state != PlaybackState::Idle => {
            let title = if state == PlaybackState::Paused {
                "⏸️ Pausado"
            } else {
                "🎵 Reproduciendo Ahora"
            };
            let length = current
                .track
                .duration
                .map(format_duration)
                .unwrap_or_else(|| "🔴 En vivo".to_string());

            PanelView {
                title: title.to_string(),
                description: format!(
                    "**{}** `[{}]`\n👤 <@{}> • 📋 {} en cola",
                    current.title(),
                    length,
                    current.requested_by,
                    pending
                ),
                url: Some(current.track.webpage_url.clone()),
                state: Some(state),
            }
        }
        _ => PanelView {
            title: "😴 Sin reproducción".to_string(),
            description: format!("📋 {} en cola", pending),
            url: None,
            state: Some(PlaybackState::Idle),
        },
    }
}

/// Panel final cuando la sesión termina
pub fn ended_view(reason: &str) -> PanelView {
    PanelView {
        title: "👋 Sesión terminada".to_string(),
        description: reason.to_string(),
        url: None,
        state: None,
    }
}

/// Embed del panel de estado
pub fn create_panel_embed(view: &PanelView) -> CreateEmbed {
    let mut embed = CreateEmbed::default()
        .title(&view.title)
        .description(&view.description)
        .color(panel_color(view.state))
        .timestamp(Timestamp::now())
        .footer(CreateEmbedFooter::new(STANDARD_FOOTER));

    if let Some(url) = &view.url {
        embed = embed.url(url);
    }

    embed
}

fn panel_color(state: Option<PlaybackState>) -> Colour {
    match state {
        Some(PlaybackState::Playing) => colors::MUSIC_PURPLE,
        Some(PlaybackState::Paused) => colors::WARNING_ORANGE,
        Some(PlaybackState::Idle) | None => colors::NEUTRAL_GRAY,
    }
}

/// Listado de `/music list`; `None` si no hay nada
pub fn queue_listing(snapshot: &QueueSnapshot, now: DateTime<Utc>) -> Option<String> {
    if snapshot.is_empty() {
        return None;
    }

    let mut text = String::new();

    if let Some(current) = &snapshot.current {
        let elapsed = snapshot
            .started_at
            .and_then(|started| (now - started).to_std().ok())
            .unwrap_or_default();

        let progress = match current.track.duration {
            Some(total) => format!(
                "{} / {}",
                format_duration(elapsed.min(total)),
                format_duration(total)
            ),
            None => format!("{} / 🔴", format_duration(elapsed)),
        };

        text.push_str(&format!(
            "**Now Playing**\n> [{}]({}) `[{}]`\n",
            current.title(),
            current.track.webpage_url,
            progress
        ));
    }

    if !snapshot.queue.is_empty() {
        text.push_str("\n**Queue**\n");
        for (i, entry) in snapshot.queue.iter().take(MAX_LISTED).enumerate() {
            let duration = entry
                .track
                .duration
                .map(|d| format!(" `[{}]`", format_duration(d)))
                .unwrap_or_default();
            text.push_str(&format!("**{}**. {}{}\n", i + 1, entry.title(), duration));
        }

        if snapshot.queue.len() > MAX_LISTED {
            text.push_str(&format!(
                "… y {} más\n",
                snapshot.queue.len() - MAX_LISTED
            ));
        }
    }

    Some(text)
}

/// Embed del listado de la cola, recortado al límite de Discord
pub fn create_queue_embed(listing: &str) -> CreateEmbed {
    let description: String = if listing.chars().count() > MAX_DESCRIPTION {
        listing.chars().take(MAX_DESCRIPTION - 1).chain(['…']).collect()
    } else {
        listing.to_string()
    };

    CreateEmbed::default()
        .title("📋 Cola de Reproducción")
        .description(description)
        .color(colors::MUSIC_PURPLE)
        .timestamp(Timestamp::now())
        .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
}

/// Crea un embed de error
pub fn create_error_embed(title: &str, description: &str) -> CreateEmbed {
    CreateEmbed::default()
        .title(format!("❌ {}", title))
        .description(description)
        .color(colors::ERROR_RED)
        .timestamp(Timestamp::now())
        .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
}

/// Formatea una duración en formato legible
pub fn format_duration(duration: Duration) -> String {
    let total_seconds = duration.as_secs();
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;

    if hours > 0 {
        format!("{}:{:02}:{:02}", hours, minutes, seconds)
    } else {
        format!("{}:{:02}", minutes, seconds)
    }
}
