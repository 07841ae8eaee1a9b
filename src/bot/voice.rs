//! songbird/serenity side of the voice transport.
//!
//! Opus frames from the pipeline are handed to songbird as a live DCA stream,
//! which songbird passes through to Discord without re-encoding.

use async_trait::async_trait;
use bytes::{Buf, BufMut, BytesMut};
use serenity::{
    cache::Cache,
    model::id::{ChannelId, GuildId},
};
use songbird::{
    input::{AudioStream, Input, LiveInput},
    tracks::TrackHandle,
    Call, CoreEvent, Event, Songbird, TrackEvent,
};
use std::{
    io::{self, Read, Seek, SeekFrom},
    sync::Arc,
};
use symphonia::core::{io::MediaSource, probe::Hint};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info};

use super::events::{LinkEventForwarder, TrackCompletionNotifier};
use crate::{
    audio::{
        pipeline::{FrameStream, FRAME_SAMPLES, SAMPLE_RATE},
        transport::{LinkEvent, TrackCompletion, TrackControl, VoiceLink, VoiceTransport},
    },
    error::{ConnectionError, PipelineError},
};

pub struct SongbirdTransport {
    manager: Arc<Songbird>,
    cache: Arc<Cache>,
}

impl SongbirdTransport {
    pub fn new(manager: Arc<Songbird>, cache: Arc<Cache>) -> Self {
        Self { manager, cache }
    }
}

#[async_trait]
impl VoiceTransport for SongbirdTransport {
    async fn connect(
        &self,
        guild: GuildId,
        channel: ChannelId,
        events: mpsc::UnboundedSender<LinkEvent>,
    ) -> Result<Arc<dyn VoiceLink>, ConnectionError> {
        let call = self
            .manager
            .join(guild, channel)
            .await
            .map_err(|e| ConnectionError::Join(e.to_string()))?;

        {
            let mut handler = call.lock().await;
            handler.remove_all_global_events();
            for (core, event) in [
                (CoreEvent::DriverConnect, LinkEvent::Connected),
                (CoreEvent::DriverReconnect, LinkEvent::Connected),
                (CoreEvent::DriverDisconnect, LinkEvent::Disconnected),
            ] {
                handler.add_global_event(core.into(), LinkEventForwarder::new(event, events.clone()));
            }
        }

        let link: Arc<dyn VoiceLink> = Arc::new(SongbirdLink {
            manager: Arc::clone(&self.manager),
            guild,
            channel,
            call,
        });
        Ok(link)
    }

    async fn human_listeners(&self, guild: GuildId, channel: ChannelId) -> Option<usize> {
        count_human_listeners(&self.cache, guild, channel)
    }
}

/// Humanos en el canal según la caché; `None` si el canal ya no existe
pub fn count_human_listeners(cache: &Cache, guild: GuildId, channel: ChannelId) -> Option<usize> {
    let me = cache.current_user().id;
    let guild = cache.guild(guild)?;

    if !guild.channels.contains_key(&channel) {
        return None;
    }

    let count = guild
        .voice_states
        .values()
        .filter(|state| state.channel_id == Some(channel) && state.user_id != me)
        .filter(|state| {
            let is_bot = guild
                .members
                .get(&state.user_id)
                .map(|m| m.user.bot)
                .or_else(|| state.member.as_ref().map(|m| m.user.bot))
                .unwrap_or(false);
            !is_bot
        })
        .count();

    Some(count)
}

struct SongbirdLink {
    manager: Arc<Songbird>,
    guild: GuildId,
    channel: ChannelId,
    call: Arc<Mutex<Call>>,
}

#[async_trait]
impl VoiceLink for SongbirdLink {
    async fn rejoin(&self) -> Result<(), ConnectionError> {
        self.manager
            .join(self.guild, self.channel)
            .await
            .map(|_| ())
            .map_err(|e| ConnectionError::Join(e.to_string()))
    }

    async fn play(
        &self,
        stream: FrameStream,
        completion: TrackCompletion,
    ) -> Result<Box<dyn TrackControl>, PipelineError> {
        let input = DcaFrameSource::new(stream)?.into_input();

        let handle = {
            let mut call = self.call.lock().await;
            call.stop();
            call.play_input(input)
        };

        for event in [TrackEvent::End, TrackEvent::Error] {
            handle
                .add_event(
                    Event::Track(event),
                    TrackCompletionNotifier::new(completion.clone()),
                )
                .map_err(|e| PipelineError::Transport(e.to_string()))?;
        }

        debug!(
            "🎶 Track gen {} entregado a songbird en guild {}",
            completion.generation(),
            self.guild
        );
        Ok(Box::new(SongbirdTrack(handle)))
    }

    async fn disconnect(&self) {
        if let Err(e) = self.manager.remove(self.guild).await {
            debug!("Desconexión de guild {}: {:?}", self.guild, e);
        } else {
            info!("👋 Salí del canal de voz en guild {}", self.guild);
        }
    }
}

struct SongbirdTrack(TrackHandle);

impl TrackControl for SongbirdTrack {
    fn stop(&self) {
        let _ = self.0.stop();
    }

    fn pause(&self) {
        let _ = self.0.pause();
    }

    fn resume(&self) {
        let _ = self.0.play();
    }
}

/// Adapta un [`FrameStream`] al contenedor DCA que songbird sabe leer.
pub struct DcaFrameSource {
    stream: FrameStream,
    pending: BytesMut,
}

impl DcaFrameSource {
    pub fn new(stream: FrameStream) -> Result<Self, PipelineError> {
        let header = dca_header(stream.bitrate())?;
        Ok(Self {
            stream,
            pending: header,
        })
    }

    pub fn into_input(self) -> Input {
        let mut hint = Hint::new();
        hint.with_extension("dca");

        Input::Live(
            LiveInput::Raw(AudioStream {
                input: Box::new(self) as Box<dyn MediaSource>,
                hint: Some(hint),
            }),
            None,
        )
    }
}

fn dca_header(bitrate: i32) -> Result<BytesMut, PipelineError> {
    let metadata = serde_json::json!({
        "dca": {
            "version": 1,
            "tool": {
                "name": env!("CARGO_PKG_NAME"),
                "version": env!("CARGO_PKG_VERSION"),
                "url": null,
                "author": null,
            },
        },
        "opus": {
            "mode": "music",
            "sample_rate": SAMPLE_RATE,
            "frame_size": FRAME_SAMPLES,
            "abr": bitrate,
            "vbr": true,
            "channels": 2,
        },
        "info": null,
        "origin": null,
        "extra": null,
    });

    let json = serde_json::to_vec(&metadata).map_err(|e| PipelineError::Encoder(e.to_string()))?;
    let len = i32::try_from(json.len()).map_err(|e| PipelineError::Encoder(e.to_string()))?;

    let mut header = BytesMut::with_capacity(8 + json.len());
    header.put_slice(b"DCA1");
    header.put_i32_le(len);
    header.put_slice(&json);
    Ok(header)
}

impl Read for DcaFrameSource {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.pending.is_empty() {
            match self.stream.next_frame_blocking() {
                Some(Ok(packet)) => {
                    let len = i16::try_from(packet.len())
                        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "opus packet too large"))?;
                    self.pending.put_i16_le(len);
                    self.pending.put_slice(&packet);
                }
                Some(Err(e)) => return Err(io::Error::other(e.to_string())),
                None => return Ok(0),
            }
        }

        let n = buf.len().min(self.pending.len());
        buf[..n].copy_from_slice(&self.pending[..n]);
        self.pending.advance(n);
        Ok(n)
    }
}

impl Seek for DcaFrameSource {
    fn seek(&mut self, _pos: SeekFrom) -> io::Result<u64> {
        Err(io::Error::new(io::ErrorKind::Unsupported, "live stream"))
    }
}

impl MediaSource for DcaFrameSource {
    fn is_seekable(&self) -> bool {
        false
    }

    fn byte_len(&self) -> Option<u64> {
        None
    }
}
