//! Per-guild playback actor.
//!
//! Every guild gets one task that owns its queue, its voice connection and its
//! timers. The outside world reaches it only through [`SessionHandle`], so all
//! playback transitions for a guild run one at a time from a single loop.
//!
//! Completions coming back from the transport carry the generation of the
//! track that produced them; anything from an older generation is dropped.

use serenity::model::id::{ChannelId, GuildId};
use std::{fmt, sync::Arc};
use tokio::{
    sync::{mpsc, oneshot},
    time::{self, Instant},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{
    occupancy::OccupancyMonitor,
    pipeline::PipelineBuilder,
    queue::{MusicQueue, PlaybackState, QueueEntry, QueueSnapshot},
    registry::{SessionContext, SessionRegistry},
    supervisor::{ConnectionSupervisor, Recovery, RecoveryOutcome},
    transport::{LinkEvent, TrackCompletion, TrackControl, TrackFinished},
};
use crate::{
    config::SessionTimings,
    error::{ConnectionError, PlayerError, PlayerResult},
    ui::{embeds, panel::StatusPanel},
};

const COMMAND_BUFFER: usize = 32;

/// Por qué terminó una sesión
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TeardownReason {
    Stopped,
    IdleTimeout,
    ChannelEmpty,
    ChannelDeleted,
    ReconnectExhausted,
    ConnectionLost,
    Dropped,
}

impl fmt::Display for TeardownReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            TeardownReason::Stopped => "⏹️ Reproducción detenida",
            TeardownReason::IdleTimeout => "💤 Inactividad",
            TeardownReason::ChannelEmpty => "👥 Canal de voz vacío",
            TeardownReason::ChannelDeleted => "🗑️ Canal eliminado",
            TeardownReason::ReconnectExhausted => "📡 No se pudo reconectar",
            TeardownReason::ConnectionLost => "📡 Conexión perdida",
            TeardownReason::Dropped => "👋 Cierre",
        };
        f.write_str(label)
    }
}

pub enum SessionCommand {
    Enqueue {
        entry: QueueEntry,
        reply: oneshot::Sender<PlayerResult<()>>,
    },
    Skip {
        reply: oneshot::Sender<bool>,
    },
    Pause {
        reply: oneshot::Sender<bool>,
    },
    Resume {
        reply: oneshot::Sender<bool>,
    },
    Snapshot {
        reply: oneshot::Sender<QueueSnapshot>,
    },
    CheckOccupancy,
    Shutdown {
        reason: TeardownReason,
        done: oneshot::Sender<()>,
    },
}

/// Referencia barata a una sesión viva.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    pub guild: GuildId,
    pub instance: u64,
    pub voice_channel: ChannelId,
    pub text_channel: ChannelId,
    commands: mpsc::Sender<SessionCommand>,
}

impl SessionHandle {
    pub fn is_closed(&self) -> bool {
        self.commands.is_closed()
    }

    /// Envía un comando y espera la respuesta; `NoSession` si la sesión ya terminó
    pub async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> SessionCommand,
    ) -> PlayerResult<T> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(make(tx))
            .await
            .map_err(|_| PlayerError::NoSession)?;
        rx.await.map_err(|_| PlayerError::NoSession)
    }

    /// Aviso sin respuesta; se descarta si el buzón está lleno
    pub fn notify(&self, command: SessionCommand) {
        if self.commands.try_send(command).is_err() {
            debug!("Comando descartado para guild {}", self.guild);
        }
    }

    pub async fn shutdown(&self, reason: TeardownReason) {
        let (done, rx) = oneshot::channel();
        if self
            .commands
            .send(SessionCommand::Shutdown { reason, done })
            .await
            .is_ok()
        {
            let _ = rx.await;
        }
    }
}

struct ActiveTrack {
    control: Box<dyn TrackControl>,
    cancel: CancellationToken,
}

impl ActiveTrack {
    fn halt(self) {
        self.control.stop();
        self.cancel.cancel();
    }
}

pub(crate) struct GuildSession {
    guild: GuildId,
    instance: u64,
    queue: MusicQueue,
    state: PlaybackState,
    generation: u64,
    active: Option<ActiveTrack>,
    supervisor: ConnectionSupervisor,
    /// Reconexión en curso; se sondea dentro del loop principal
    recovery: Option<Recovery>,
    occupancy: OccupancyMonitor,
    pipeline: Arc<dyn PipelineBuilder>,
    panel: StatusPanel,
    timings: SessionTimings,
    idle_deadline: Option<Instant>,
    finished_tx: mpsc::UnboundedSender<TrackFinished>,
    finished_rx: mpsc::UnboundedReceiver<TrackFinished>,
    commands: mpsc::Receiver<SessionCommand>,
    registry: Arc<SessionRegistry>,
}

impl GuildSession {
    /// Conecta y lanza el actor; sin conexión lista no hay sesión
    pub(crate) async fn start(
        registry: Arc<SessionRegistry>,
        guild: GuildId,
        voice_channel: ChannelId,
        text_channel: ChannelId,
        instance: u64,
    ) -> Result<SessionHandle, ConnectionError> {
        let ctx: &SessionContext = registry.context();

        let supervisor = ConnectionSupervisor::establish(
            Arc::clone(&ctx.transport),
            guild,
            voice_channel,
            ctx.timings,
        )
        .await?;

        let occupancy = OccupancyMonitor::new(
            Arc::clone(&ctx.transport),
            guild,
            voice_channel,
            ctx.timings.occupancy_poll,
        );

        let (commands_tx, commands_rx) = mpsc::channel(COMMAND_BUFFER);
        let (finished_tx, finished_rx) = mpsc::unbounded_channel();

        let session = GuildSession {
            guild,
            instance,
            queue: MusicQueue::new(ctx.max_queue_size),
            state: PlaybackState::Idle,
            generation: 0,
            active: None,
            supervisor,
            recovery: None,
            occupancy,
            pipeline: Arc::clone(&ctx.pipeline),
            panel: StatusPanel::spawn(Arc::clone(&ctx.notifier), text_channel),
            timings: ctx.timings,
            // Una sesión recién creada sin tracks también expira
            idle_deadline: Some(Instant::now() + ctx.timings.idle_timeout),
            finished_tx,
            finished_rx,
            commands: commands_rx,
            registry: Arc::clone(&registry),
        };

        tokio::spawn(session.run());

        info!("🎧 Sesión {} creada para guild {}", instance, guild);

        Ok(SessionHandle {
            guild,
            instance,
            voice_channel,
            text_channel,
            commands: commands_tx,
        })
    }

    async fn run(mut self) {
        let (reason, ack) = loop {
            let idle_deadline = self.idle_deadline;

            tokio::select! {
                biased;

                Some(finished) = self.finished_rx.recv() => {
                    if let Some(reason) = self.on_track_finished(finished).await {
                        break (reason, None);
                    }
                }

                outcome = recovery_done(&mut self.recovery) => {
                    self.recovery = None;
                    if let Some(reason) = self.on_recovery_done(outcome) {
                        break (reason, None);
                    }
                }

                Some(event) = self.supervisor.next_event() => {
                    if let Some(reason) = self.on_link_event(event) {
                        break (reason, None);
                    }
                }

                command = self.commands.recv() => match command {
                    Some(SessionCommand::Shutdown { reason, done }) => break (reason, Some(done)),
                    Some(command) => {
                        if let Some(reason) = self.handle(command).await {
                            break (reason, None);
                        }
                    }
                    None => break (TeardownReason::Dropped, None),
                },

                _ = idle_expired(idle_deadline) => break (TeardownReason::IdleTimeout, None),

                _ = self.occupancy.tick() => {
                    if self.occupancy.is_abandoned().await {
                        break (TeardownReason::ChannelEmpty, None);
                    }
                }
            }
        };

        self.teardown(reason).await;

        if let Some(done) = ack {
            let _ = done.send(());
        }
    }

    async fn handle(&mut self, command: SessionCommand) -> Option<TeardownReason> {
        match command {
            SessionCommand::Enqueue { entry, reply } => {
                if let Err(e) = self.queue.add_track(entry) {
                    let _ = reply.send(Err(e));
                    return None;
                }

                let flow = if self.state == PlaybackState::Idle && self.queue.current().is_none() {
                    self.start_next().await
                } else {
                    self.refresh_panel();
                    None
                };

                let _ = reply.send(Ok(()));
                flow
            }
            SessionCommand::Skip { reply } => {
                if self.queue.current().is_none() {
                    let _ = reply.send(false);
                    return None;
                }

                info!("⏭️ Saltando track en guild {}", self.guild);
                self.halt_active();
                self.queue.finish_current();
                let flow = self.start_next().await;
                let _ = reply.send(true);
                flow
            }
            SessionCommand::Pause { reply } => {
                let _ = reply.send(self.set_paused(true));
                None
            }
            SessionCommand::Resume { reply } => {
                let _ = reply.send(self.set_paused(false));
                None
            }
            SessionCommand::Snapshot { reply } => {
                let _ = reply.send(self.snapshot());
                None
            }
            SessionCommand::CheckOccupancy => self
                .occupancy
                .is_abandoned()
                .await
                .then_some(TeardownReason::ChannelEmpty),
            // Atendido en el loop principal
            SessionCommand::Shutdown { reason, .. } => Some(reason),
        }
    }

    async fn on_track_finished(&mut self, finished: TrackFinished) -> Option<TeardownReason> {
        if finished.generation != self.generation || self.queue.current().is_none() {
            debug!(
                "Fin de track obsoleto (gen {} vs {}) en guild {}",
                finished.generation, self.generation, self.guild
            );
            return None;
        }

        match &finished.error {
            Some(e) => warn!("❌ Error de reproducción en guild {}: {}", self.guild, e),
            None => debug!("🎵 Track terminó en guild {}", self.guild),
        }

        self.active = None;
        self.queue.finish_current();
        self.start_next().await
    }

    fn on_link_event(&mut self, event: LinkEvent) -> Option<TeardownReason> {
        match event {
            LinkEvent::Disconnected => match self.supervisor.begin_recovery() {
                Ok(recovery) => {
                    self.recovery = Some(recovery);
                    None
                }
                Err(e) => {
                    error!("❌ {} en guild {}", e, self.guild);
                    Some(TeardownReason::ConnectionLost)
                }
            },
            LinkEvent::Connected | LinkEvent::Reconnecting => {
                debug!("🔌 {:?} en guild {}", event, self.guild);
                None
            }
        }
    }

    fn on_recovery_done(&mut self, outcome: RecoveryOutcome) -> Option<TeardownReason> {
        match self.supervisor.finish_recovery(outcome) {
            Ok(()) => None,
            Err(e) => {
                error!("❌ {} en guild {}", e, self.guild);
                Some(TeardownReason::ReconnectExhausted)
            }
        }
    }

    /// Arranca el siguiente track reproducible o pasa a Idle
    async fn start_next(&mut self) -> Option<TeardownReason> {
        while let Some(entry) = self.queue.next_track() {
            self.generation += 1;

            let stream = match self.pipeline.build(&entry.track.stream_url).await {
                Ok(stream) => stream,
                Err(e) => {
                    warn!("❌ Pipeline falló para '{}': {}", entry.title(), e);
                    continue;
                }
            };

            let link = match self.supervisor.ensure().await {
                Ok(link) => link,
                Err(e) => {
                    error!("❌ Sin conexión de voz en guild {}: {}", self.guild, e);
                    return Some(TeardownReason::ConnectionLost);
                }
            };

            let cancel = stream.cancel_token();
            let completion = TrackCompletion::new(self.generation, self.finished_tx.clone());

            match link.play(stream, completion).await {
                Ok(control) => {
                    self.active = Some(ActiveTrack { control, cancel });
                    self.state = PlaybackState::Playing;
                    self.idle_deadline = None;
                    info!("▶️ Reproduciendo '{}' en guild {}", entry.title(), self.guild);
                    self.refresh_panel();
                    return None;
                }
                Err(e) => {
                    cancel.cancel();
                    warn!("❌ El transporte rechazó '{}': {}", entry.title(), e);
                }
            }
        }

        self.enter_idle();
        None
    }

    fn enter_idle(&mut self) {
        self.active = None;
        self.state = PlaybackState::Idle;
        self.idle_deadline = Some(Instant::now() + self.timings.idle_timeout);
        debug!(
            "💤 Guild {} inactiva, expira en {}",
            self.guild,
            humantime::format_duration(self.timings.idle_timeout)
        );
        self.refresh_panel();
    }

    fn halt_active(&mut self) {
        if let Some(active) = self.active.take() {
            active.halt();
        }
        // Cualquier fin pendiente del track anterior queda obsoleto
        self.generation += 1;
    }

    fn set_paused(&mut self, paused: bool) -> bool {
        let Some(active) = &self.active else {
            return false;
        };

        match (self.state, paused) {
            (PlaybackState::Playing, true) => {
                active.control.pause();
                self.state = PlaybackState::Paused;
            }
            (PlaybackState::Paused, false) => {
                active.control.resume();
                self.state = PlaybackState::Playing;
            }
            _ => return false,
        }

        info!("{} Guild {} ahora {}", if paused { "⏸️" } else { "▶️" }, self.guild, self.state);
        self.refresh_panel();
        true
    }

    fn snapshot(&self) -> QueueSnapshot {
        self.queue.snapshot(self.state)
    }

    fn refresh_panel(&self) {
        self.panel.update(embeds::panel_view(&self.snapshot()));
    }

    /// Única salida de la sesión: todas las causas de cierre pasan por aquí
    async fn teardown(mut self, reason: TeardownReason) {
        info!("🛑 Cerrando sesión de guild {}: {:?}", self.guild, reason);

        if self.recovery.take().is_some() {
            debug!("Reconexión abandonada en guild {}", self.guild);
        }
        self.halt_active();
        self.queue.clear();
        self.state = PlaybackState::Idle;
        self.idle_deadline = None;

        self.supervisor.teardown().await;

        // Lo que quede en el buzón recibe NoSession al soltarse
        self.commands.close();
        while let Ok(command) = self.commands.try_recv() {
            if let SessionCommand::Shutdown { done, .. } = command {
                let _ = done.send(());
            }
        }

        self.panel.update(embeds::ended_view(&reason.to_string()));
        self.registry.release(self.guild, self.instance).await;
    }
}

async fn recovery_done(recovery: &mut Option<Recovery>) -> RecoveryOutcome {
    match recovery {
        Some(recovery) => recovery.as_mut().await,
        None => std::future::pending().await,
    }
}

async fn idle_expired(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
