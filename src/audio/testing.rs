//! In-memory collaborators for exercising sessions without Discord,
//! yt-dlp or ffmpeg. Tests run on tokio's paused clock.

use async_trait::async_trait;
use parking_lot::Mutex;
use serenity::model::id::{ChannelId, GuildId, MessageId, UserId};
use std::{
    collections::{HashMap, HashSet},
    sync::{
        atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::{
    pipeline::{FrameStream, PipelineBuilder},
    player::MusicPlayer,
    registry::SessionContext,
    transport::{
        LinkEvent, PanelView, StatusNotifier, TrackCompletion, TrackControl, VoiceLink,
        VoiceTransport,
    },
};
use crate::{
    config::SessionTimings,
    error::{ConnectionError, PipelineError, ResolutionError},
    sources::{ResolvedTrack, TrackRequest, TrackResolver},
};

pub const GUILD: GuildId = GuildId::new(1);
pub const VOICE: ChannelId = ChannelId::new(10);
pub const TEXT: ChannelId = ChannelId::new(20);
pub const USER: UserId = UserId::new(7);

/// Deja correr las tareas pendientes
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(10)).await;
}

pub fn request(input: &str) -> TrackRequest {
    TrackRequest {
        input: input.to_string(),
        requested_by: USER,
        voice_channel: VOICE,
        text_channel: TEXT,
    }
}

pub fn track(title: &str) -> ResolvedTrack {
    ResolvedTrack {
        title: title.to_string(),
        webpage_url: format!("https://example.com/{title}"),
        stream_url: format!("https://cdn.example.com/{title}"),
        duration: Some(Duration::from_secs(180)),
        is_live: Some(false),
    }
}

#[derive(Default)]
pub struct FakeControl {
    pub stopped: AtomicBool,
    pub paused: AtomicBool,
}

impl TrackControl for Arc<FakeControl> {
    fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }

    fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
    }

    fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
    }
}

struct Playback {
    completion: TrackCompletion,
    control: Arc<FakeControl>,
    // Mantiene vivo el stream como lo haría el driver
    _stream: FrameStream,
}

pub struct FakeLink {
    pub rejoin_ok: AtomicBool,
    pub rejoins: AtomicUsize,
    pub disconnects: AtomicUsize,
    plays: Mutex<Vec<Playback>>,
}

impl Default for FakeLink {
    fn default() -> Self {
        Self {
            rejoin_ok: AtomicBool::new(true),
            rejoins: AtomicUsize::new(0),
            disconnects: AtomicUsize::new(0),
            plays: Mutex::new(Vec::new()),
        }
    }
}

impl FakeLink {
    pub fn played(&self) -> usize {
        self.plays.lock().len()
    }

    pub fn control(&self, index: usize) -> Arc<FakeControl> {
        Arc::clone(&self.plays.lock()[index].control)
    }

    /// Fin natural del track `index`
    pub fn finish(&self, index: usize) {
        self.plays.lock()[index].completion.ended();
    }

    pub fn finish_last(&self) {
        let index = self.played() - 1;
        self.finish(index);
    }

    pub fn fail_last(&self, error: &str) {
        let plays = self.plays.lock();
        if let Some(playback) = plays.last() {
            playback.completion.failed(error);
        }
    }
}

#[async_trait]
impl VoiceLink for FakeLink {
    async fn rejoin(&self) -> Result<(), ConnectionError> {
        self.rejoins.fetch_add(1, Ordering::SeqCst);
        if self.rejoin_ok.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(ConnectionError::Join("gateway unavailable".into()))
        }
    }

    async fn play(
        &self,
        stream: FrameStream,
        completion: TrackCompletion,
    ) -> Result<Box<dyn TrackControl>, PipelineError> {
        let control = Arc::new(FakeControl::default());
        self.plays.lock().push(Playback {
            completion,
            control: Arc::clone(&control),
            _stream: stream,
        });
        Ok(Box::new(control))
    }

    async fn disconnect(&self) {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
    }
}

pub struct FakeTransport {
    pub connects: AtomicUsize,
    pub connect_delay: Mutex<Duration>,
    pub fail_connect: AtomicBool,
    /// Nunca llega a estar lista
    pub hang: AtomicBool,
    pub link: Arc<FakeLink>,
    listeners: Mutex<Option<usize>>,
    events: Mutex<Vec<mpsc::UnboundedSender<LinkEvent>>>,
}

impl Default for FakeTransport {
    fn default() -> Self {
        Self {
            connects: AtomicUsize::new(0),
            connect_delay: Mutex::new(Duration::ZERO),
            fail_connect: AtomicBool::new(false),
            hang: AtomicBool::new(false),
            link: Arc::new(FakeLink::default()),
            listeners: Mutex::new(Some(1)),
            events: Mutex::new(Vec::new()),
        }
    }
}

impl FakeTransport {
    pub fn set_listeners(&self, count: Option<usize>) {
        *self.listeners.lock() = count;
    }

    /// Emite un evento en la última conexión abierta
    pub fn emit(&self, event: LinkEvent) {
        if let Some(tx) = self.events.lock().last() {
            let _ = tx.send(event);
        }
    }
}

#[async_trait]
impl VoiceTransport for FakeTransport {
    async fn connect(
        &self,
        _guild: GuildId,
        _channel: ChannelId,
        events: mpsc::UnboundedSender<LinkEvent>,
    ) -> Result<Arc<dyn VoiceLink>, ConnectionError> {
        self.connects.fetch_add(1, Ordering::SeqCst);

        if self.hang.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }

        let delay = *self.connect_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        if self.fail_connect.load(Ordering::SeqCst) {
            return Err(ConnectionError::Join("missing permissions".into()));
        }

        self.events.lock().push(events);
        let link: Arc<dyn VoiceLink> = self.link.clone();
        Ok(link)
    }

    async fn human_listeners(&self, _guild: GuildId, _channel: ChannelId) -> Option<usize> {
        *self.listeners.lock()
    }
}

#[derive(Default)]
pub struct FakePipeline {
    failing: Mutex<HashSet<String>>,
    pub built: AtomicUsize,
}

impl FakePipeline {
    /// Hace fallar el pipeline del track con ese título
    pub fn fail(&self, title: &str) {
        self.failing.lock().insert(track(title).stream_url);
    }
}

#[async_trait]
impl PipelineBuilder for FakePipeline {
    async fn build(&self, stream_url: &str) -> Result<FrameStream, PipelineError> {
        if self.failing.lock().contains(stream_url) {
            return Err(PipelineError::DecoderExit("exit status: 1".into()));
        }

        self.built.fetch_add(1, Ordering::SeqCst);
        let (_tx, rx) = flume::bounded(1);
        Ok(FrameStream::new(rx, CancellationToken::new(), 96_000))
    }
}

pub struct FakeResolver {
    tracks: HashMap<String, ResolvedTrack>,
    pub delay: Mutex<Duration>,
}

impl Default for FakeResolver {
    fn default() -> Self {
        let mut tracks: HashMap<String, ResolvedTrack> = ["A", "B", "C", "D"]
            .into_iter()
            .map(|t| (t.to_string(), track(t)))
            .collect();

        tracks.insert(
            "https://example.com/a.mp3".to_string(),
            ResolvedTrack {
                webpage_url: "https://example.com/a.mp3".to_string(),
                ..track("A")
            },
        );

        Self {
            tracks,
            delay: Mutex::new(Duration::ZERO),
        }
    }
}

#[async_trait]
impl TrackResolver for FakeResolver {
    async fn resolve(&self, input: &str) -> Result<ResolvedTrack, ResolutionError> {
        let delay = *self.delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        self.tracks
            .get(input)
            .cloned()
            .ok_or_else(|| ResolutionError::Exhausted {
                attempts: 1,
                last: Box::new(ResolutionError::Process("no results".into())),
            })
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    pub fail: AtomicBool,
    pub sent: AtomicUsize,
    pub edited: AtomicUsize,
    next_id: AtomicU64,
    views: Mutex<Vec<PanelView>>,
}

impl RecordingNotifier {
    pub fn titles(&self) -> Vec<String> {
        self.views.lock().iter().map(|v| v.title.clone()).collect()
    }

    fn check(&self) -> anyhow::Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            anyhow::bail!("discord unavailable");
        }
        Ok(())
    }
}

#[async_trait]
impl StatusNotifier for RecordingNotifier {
    async fn send(&self, _channel: ChannelId, view: &PanelView) -> anyhow::Result<MessageId> {
        self.sent.fetch_add(1, Ordering::SeqCst);
        self.check()?;
        self.views.lock().push(view.clone());
        Ok(MessageId::new(self.next_id.fetch_add(1, Ordering::SeqCst) + 1))
    }

    async fn edit(
        &self,
        _channel: ChannelId,
        _message: MessageId,
        view: &PanelView,
    ) -> anyhow::Result<()> {
        self.edited.fetch_add(1, Ordering::SeqCst);
        self.check()?;
        self.views.lock().push(view.clone());
        Ok(())
    }
}

/// Reproductor completo sobre colaboradores falsos
pub struct Harness {
    pub transport: Arc<FakeTransport>,
    pub pipeline: Arc<FakePipeline>,
    pub notifier: Arc<RecordingNotifier>,
    pub resolver: Arc<FakeResolver>,
    pub player: Arc<MusicPlayer>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_queue_size(100)
    }

    pub fn with_queue_size(max_queue_size: usize) -> Self {
        let transport = Arc::new(FakeTransport::default());
        let pipeline = Arc::new(FakePipeline::default());
        let notifier = Arc::new(RecordingNotifier::default());
        let resolver = Arc::new(FakeResolver::default());

        let player = Arc::new(MusicPlayer::new(
            resolver.clone(),
            SessionContext {
                transport: transport.clone(),
                pipeline: pipeline.clone(),
                notifier: notifier.clone(),
                timings: SessionTimings::default(),
                max_queue_size,
            },
        ));

        Self {
            transport,
            pipeline,
            notifier,
            resolver,
            player,
        }
    }
}
