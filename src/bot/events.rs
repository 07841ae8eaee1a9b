use serenity::async_trait;
use songbird::{
    tracks::PlayMode, Event as VoiceEvent, EventContext, EventHandler as VoiceEventHandler,
};
use tokio::sync::mpsc;
use tracing::{debug, error};

use crate::audio::transport::{LinkEvent, TrackCompletion};

/// Reenvía los eventos del driver de voz al supervisor de la sesión
pub struct LinkEventForwarder {
    event: LinkEvent,
    tx: mpsc::UnboundedSender<LinkEvent>,
}

impl LinkEventForwarder {
    pub fn new(event: LinkEvent, tx: mpsc::UnboundedSender<LinkEvent>) -> Self {
        Self { event, tx }
    }
}

#[async_trait]
impl VoiceEventHandler for LinkEventForwarder {
    async fn act(&self, _ctx: &EventContext<'_>) -> Option<VoiceEvent> {
        debug!("🔌 Evento de voz: {:?}", self.event);

        // Sesión terminada: el handler ya no tiene a quién avisar
        if self.tx.send(self.event).is_err() {
            return Some(VoiceEvent::Cancel);
        }
        None
    }
}

/// Avisa a la sesión cuando un track termina o falla
pub struct TrackCompletionNotifier {
    completion: TrackCompletion,
}

impl TrackCompletionNotifier {
    pub fn new(completion: TrackCompletion) -> Self {
        Self { completion }
    }
}

#[async_trait]
impl VoiceEventHandler for TrackCompletionNotifier {
    async fn act(&self, ctx: &EventContext<'_>) -> Option<VoiceEvent> {
        if let EventContext::Track(track_list) = ctx {
            for (state, _handle) in *track_list {
                if let PlayMode::Errored(e) = &state.playing {
                    error!(
                        "❌ Error en track gen {}: {}",
                        self.completion.generation(),
                        e
                    );
                    self.completion.failed(e.to_string());
                    return None;
                }
            }
        }

        self.completion.ended();
        None
    }
}
