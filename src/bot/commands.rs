use anyhow::Result;
use serenity::{
    builder::{CreateCommand, CreateCommandOption},
    model::{
        application::{CommandOptionType, ResolvedOption, ResolvedValue},
        id::GuildId,
    },
    prelude::Context,
};

/// Subcomandos de `/music`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MusicAction {
    Play(String),
    Skip,
    Clear,
    List,
    Pause,
    Resume,
}

impl MusicAction {
    pub fn parse(name: &str, query: Option<&str>) -> Option<Self> {
        let action = match name {
            "play" => MusicAction::Play(query.map(str::trim).filter(|q| !q.is_empty())?.to_string()),
            "skip" => MusicAction::Skip,
            "clear" => MusicAction::Clear,
            "list" => MusicAction::List,
            "pause" => MusicAction::Pause,
            "resume" => MusicAction::Resume,
            _ => return None,
        };
        Some(action)
    }

    /// Lee el subcomando de las opciones resueltas de la interacción
    pub fn from_options(options: &[ResolvedOption<'_>]) -> Option<Self> {
        let option = options.first()?;
        let ResolvedValue::SubCommand(sub_options) = &option.value else {
            return None;
        };

        let query = sub_options
            .iter()
            .find(|o| o.name == "query")
            .and_then(|o| match o.value {
                ResolvedValue::String(s) => Some(s),
                _ => None,
            });

        Self::parse(option.name, query)
    }

    pub fn name(&self) -> &'static str {
        match self {
            MusicAction::Play(_) => "play",
            MusicAction::Skip => "skip",
            MusicAction::Clear => "clear",
            MusicAction::List => "list",
            MusicAction::Pause => "pause",
            MusicAction::Resume => "resume",
        }
    }
}

/// Registra comandos globales
pub async fn register_global_commands(ctx: &Context) -> Result<()> {
    ctx.http.create_global_command(&music_command()).await?;
    Ok(())
}

/// Registra comandos para una guild específica (desarrollo)
pub async fn register_guild_commands(ctx: &Context, guild_id: GuildId) -> Result<()> {
    guild_id.set_commands(&ctx.http, vec![music_command()]).await?;
    Ok(())
}

pub fn music_command() -> CreateCommand {
    CreateCommand::new("music")
        .description("Reproductor de música")
        .add_option(
            subcommand("play", "Reproduce una canción o la agrega a la cola").add_sub_option(
                CreateCommandOption::new(
                    CommandOptionType::String,
                    "query",
                    "URL o término de búsqueda",
                )
                .required(true),
            ),
        )
        .add_option(subcommand("skip", "Salta la canción actual"))
        .add_option(subcommand("clear", "Detiene la reproducción y limpia la cola"))
        .add_option(subcommand("list", "Muestra la cola de reproducción"))
        .add_option(subcommand("pause", "Pausa la reproducción actual"))
        .add_option(subcommand("resume", "Reanuda la reproducción pausada"))
}

fn subcommand(name: &str, description: &str) -> CreateCommandOption {
    CreateCommandOption::new(CommandOptionType::SubCommand, name, description)
}
