use anyhow::Result;
use serenity::{model::gateway::GatewayIntents, Client};
use songbird::{SerenityInit, Songbird};
use std::sync::Arc;
use tracing::{error, info};

mod audio;
mod bot;
mod config;
mod error;
mod sources;
mod ui;

use crate::audio::{pipeline::FfmpegOpusPipeline, player::MusicPlayer, registry::SessionContext};
use crate::bot::{voice::SongbirdTransport, JukeboxBot, PlayerKey};
use crate::config::Config;
use crate::sources::{LadderResolver, YtDlpExtractor};
use crate::ui::panel::DiscordNotifier;

#[tokio::main]
async fn main() -> Result<()> {
    // Inicializar logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("guild_jukebox=debug".parse()?)
                .add_directive("serenity=info".parse()?)
                .add_directive("songbird=info".parse()?),
        )
        .init();

    info!("🎵 Iniciando Guild Jukebox v{}", env!("CARGO_PKG_VERSION"));

    // Cargar configuración
    let config = Arc::new(Config::load()?);
    info!("{}", config.summary());

    // Manejar health check si es necesario
    if std::env::args().any(|arg| arg == "--health-check") {
        return health_check(&config).await;
    }

    // Configurar intents mínimos necesarios
    let intents = GatewayIntents::GUILDS
        | GatewayIntents::GUILD_VOICE_STATES
        | GatewayIntents::GUILD_MESSAGES;

    // Construir cliente
    let manager = Songbird::serenity();
    let mut client = Client::builder(&config.discord_token, intents)
        .event_handler(JukeboxBot::new(Arc::clone(&config)))
        .register_songbird_with(Arc::clone(&manager))
        .await?;

    let player = Arc::new(build_player(&config, &client, manager));
    {
        let mut data = client.data.write().await;
        data.insert::<PlayerKey>(Arc::clone(&player));
    }

    // Manejar shutdown graceful
    let shard_manager = Arc::clone(&client.shard_manager);
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Error al registrar Ctrl+C: {:?}", e);
            return;
        }
        info!(
            "⚠️ Señal de shutdown recibida, cerrando {} sesiones...",
            player.registry().len()
        );
        player.shutdown().await;
        shard_manager.shutdown_all().await;
    });

    // Iniciar bot
    info!("🚀 Bot iniciado exitosamente");
    if let Err(why) = client.start().await {
        error!("Error al ejecutar cliente: {:?}", why);
    }

    Ok(())
}

fn build_player(config: &Config, client: &Client, manager: Arc<Songbird>) -> MusicPlayer {
    let extractor = Arc::new(YtDlpExtractor::new(&config.ytdlp_path));
    let resolver = LadderResolver::new(
        extractor,
        config.ytdlp_cookies.clone(),
        config.resolve_timeout,
    );

    let ctx = SessionContext {
        transport: Arc::new(SongbirdTransport::new(manager, Arc::clone(&client.cache))),
        pipeline: Arc::new(FfmpegOpusPipeline::new(
            &config.ffmpeg_path,
            config.opus_bitrate,
        )),
        notifier: Arc::new(DiscordNotifier::new(Arc::clone(&client.http))),
        timings: config.timings,
        max_queue_size: config.max_queue_size,
    };

    MusicPlayer::new(Arc::new(resolver), ctx)
}

async fn health_check(config: &Config) -> Result<()> {
    // Verificar dependencias críticas
    let version = YtDlpExtractor::new(&config.ytdlp_path).verify().await?;
    info!("✅ yt-dlp {}", version.trim());

    FfmpegOpusPipeline::new(&config.ffmpeg_path, config.opus_bitrate)
        .verify()
        .await?;

    println!("OK");
    Ok(())
}
