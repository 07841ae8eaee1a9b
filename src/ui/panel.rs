use async_trait::async_trait;
use serenity::{
    builder::{CreateMessage, EditMessage},
    http::Http,
    model::id::{ChannelId, MessageId},
};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, warn};

use super::embeds::create_panel_embed;
use crate::audio::transport::{PanelView, StatusNotifier};

/// Mensaje de estado de una sesión, editado en el lugar.
///
/// Las actualizaciones se publican en segundo plano y sólo la más reciente
/// importa; un fallo de Discord nunca llega a la sesión.
pub struct StatusPanel {
    tx: watch::Sender<Option<PanelView>>,
}

impl StatusPanel {
    pub fn spawn(notifier: Arc<dyn StatusNotifier>, channel: ChannelId) -> Self {
        let (tx, mut rx) = watch::channel(None::<PanelView>);

        tokio::spawn(async move {
            let mut message: Option<MessageId> = None;

            // Termina cuando la sesión suelta el panel
            while rx.changed().await.is_ok() {
                let Some(view) = rx.borrow_and_update().clone() else {
                    continue;
                };

                if let Some(id) = message {
                    match notifier.edit(channel, id, &view).await {
                        Ok(()) => continue,
                        Err(e) => debug!("Panel no editable, reenviando: {}", e),
                    }
                }

                match notifier.send(channel, &view).await {
                    Ok(id) => message = Some(id),
                    Err(e) => warn!("⚠️ No se pudo publicar el panel en {}: {}", channel, e),
                }
            }
        });

        Self { tx }
    }

    pub fn update(&self, view: PanelView) {
        self.tx.send_replace(Some(view));
    }
}

/// Notificador real sobre la API HTTP de Discord
pub struct DiscordNotifier {
    http: Arc<Http>,
}

impl DiscordNotifier {
    pub fn new(http: Arc<Http>) -> Self {
        Self { http }
    }
}

#[async_trait]
impl StatusNotifier for DiscordNotifier {
    async fn send(&self, channel: ChannelId, view: &PanelView) -> anyhow::Result<MessageId> {
        let message = channel
            .send_message(&self.http, CreateMessage::new().embed(create_panel_embed(view)))
            .await?;
        Ok(message.id)
    }

    async fn edit(
        &self,
        channel: ChannelId,
        message: MessageId,
        view: &PanelView,
    ) -> anyhow::Result<()> {
        channel
            .edit_message(
                &self.http,
                message,
                EditMessage::new().embed(create_panel_embed(view)),
            )
            .await?;
        Ok(())
    }
}
