//! Voice connection ownership for a single guild.
//!
//! A supervisor opens the link once, hands the same link back on every
//! [`ConnectionSupervisor::ensure`], and runs the recovery policy when the
//! transport reports an unexpected disconnect:
//!
//! 1. wait up to `reconnect_grace` for the transport to recover on its own
//! 2. otherwise rejoin up to `reconnect_attempts` times, `reconnect_backoff` apart
//! 3. give up with [`ConnectionError::ReconnectExhausted`]
//!
//! Recovery runs as a [`Recovery`] future owned by the session, so the
//! session keeps answering commands while it is pending.

use futures::future::BoxFuture;
use serenity::model::id::{ChannelId, GuildId};
use std::{sync::Arc, time::Duration};
use tokio::{sync::mpsc, time};
use tracing::{debug, info, warn};

use super::transport::{LinkEvent, VoiceLink, VoiceTransport};
use crate::{config::SessionTimings, error::ConnectionError};

pub struct ConnectionSupervisor {
    guild: GuildId,
    channel: ChannelId,
    transport: Arc<dyn VoiceTransport>,
    timings: SessionTimings,
    link: Option<Arc<dyn VoiceLink>>,
    events_tx: mpsc::UnboundedSender<LinkEvent>,
    events_rx: Option<mpsc::UnboundedReceiver<LinkEvent>>,
}

impl ConnectionSupervisor {
    /// Abre la conexión y espera a que esté lista
    pub async fn establish(
        transport: Arc<dyn VoiceTransport>,
        guild: GuildId,
        channel: ChannelId,
        timings: SessionTimings,
    ) -> Result<Self, ConnectionError> {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let mut supervisor = Self {
            guild,
            channel,
            transport,
            timings,
            link: None,
            events_tx,
            events_rx: Some(events_rx),
        };
        supervisor.ensure().await?;
        Ok(supervisor)
    }

    pub fn is_connected(&self) -> bool {
        self.link.is_some()
    }

    /// Devuelve la conexión existente o abre una nueva (nunca dos a la vez)
    pub async fn ensure(&mut self) -> Result<Arc<dyn VoiceLink>, ConnectionError> {
        if let Some(link) = &self.link {
            return Ok(Arc::clone(link));
        }

        debug!("🔌 Conectando a canal {} en guild {}", self.channel, self.guild);

        let link = time::timeout(
            self.timings.ready_timeout,
            self.transport
                .connect(self.guild, self.channel, self.events_tx.clone()),
        )
        .await
        .map_err(|_| ConnectionError::ReadyTimeout(self.timings.ready_timeout))??;

        info!("🔊 Conectado a canal de voz {} en guild {}", self.channel, self.guild);
        self.link = Some(Arc::clone(&link));
        Ok(link)
    }

    /// Siguiente evento del transporte; pendiente mientras hay una recuperación en curso
    pub async fn next_event(&mut self) -> Option<LinkEvent> {
        match self.events_rx.as_mut() {
            Some(events) => events.recv().await,
            None => std::future::pending().await,
        }
    }

    /// Arranca la política de reconexión como un future independiente.
    ///
    /// El future se queda con el receptor de eventos hasta terminar; la sesión
    /// lo sondea junto a sus comandos y lo devuelve con [`Self::finish_recovery`].
    /// Soltarlo a medias cancela la recuperación.
    pub fn begin_recovery(&mut self) -> Result<Recovery, ConnectionError> {
        let link = self.link.clone().ok_or(ConnectionError::Unavailable)?;
        let events = self.events_rx.take().ok_or(ConnectionError::Unavailable)?;

        warn!("⚠️ Conexión de voz perdida en guild {}", self.guild);

        Ok(Box::pin(run_recovery(self.guild, link, events, self.timings)))
    }

    pub fn finish_recovery(&mut self, outcome: RecoveryOutcome) -> Result<(), ConnectionError> {
        self.events_rx = Some(outcome.events);
        outcome.result
    }

    /// Aplica la política de reconexión completa antes de volver
    pub async fn recover(&mut self) -> Result<(), ConnectionError> {
        let recovery = self.begin_recovery()?;
        let outcome = recovery.await;
        self.finish_recovery(outcome)
    }

    /// Suelta la conexión; idempotente
    pub async fn teardown(&mut self) {
        if let Some(link) = self.link.take() {
            link.disconnect().await;
            info!("👋 Desconectado de guild {}", self.guild);
        }
    }
}

/// Recuperación en curso de una conexión caída
pub type Recovery = BoxFuture<'static, RecoveryOutcome>;

pub struct RecoveryOutcome {
    events: mpsc::UnboundedReceiver<LinkEvent>,
    pub result: Result<(), ConnectionError>,
}

async fn run_recovery(
    guild: GuildId,
    link: Arc<dyn VoiceLink>,
    mut events: mpsc::UnboundedReceiver<LinkEvent>,
    timings: SessionTimings,
) -> RecoveryOutcome {
    let result = if wait_for_transport(&mut events, timings.reconnect_grace).await {
        info!("🔄 El transporte se recuperó solo en guild {}", guild);
        Ok(())
    } else {
        rejoin(guild, link.as_ref(), timings).await
    };

    RecoveryOutcome { events, result }
}

/// Espera un Connected/Reconnecting dentro del periodo de gracia
async fn wait_for_transport(
    events: &mut mpsc::UnboundedReceiver<LinkEvent>,
    grace: Duration,
) -> bool {
    let signalled = async {
        while let Some(event) = events.recv().await {
            match event {
                LinkEvent::Connected | LinkEvent::Reconnecting => return true,
                LinkEvent::Disconnected => continue,
            }
        }
        false
    };

    time::timeout(grace, signalled).await.unwrap_or(false)
}

async fn rejoin(
    guild: GuildId,
    link: &dyn VoiceLink,
    timings: SessionTimings,
) -> Result<(), ConnectionError> {
    let attempts = timings.reconnect_attempts;
    for attempt in 1..=attempts {
        info!(
            "🔄 Reintento de conexión {}/{} en guild {}",
            attempt, attempts, guild
        );

        match time::timeout(timings.reconnect_grace, link.rejoin()).await {
            Ok(Ok(())) => {
                info!("✅ Reconectado en guild {}", guild);
                return Ok(());
            }
            Ok(Err(e)) => warn!("❌ Reintento {} falló: {}", attempt, e),
            Err(_) => warn!("⏱️ Reintento {} expiró", attempt),
        }

        if attempt < attempts {
            time::sleep(timings.reconnect_backoff).await;
        }
    }

    Err(ConnectionError::ReconnectExhausted(attempts))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::testing::{FakeTransport, GUILD, VOICE};
    use std::{sync::atomic::Ordering, time::Duration};

    async fn connect(transport: &Arc<FakeTransport>) -> ConnectionSupervisor {
        ConnectionSupervisor::establish(transport.clone(), GUILD, VOICE, SessionTimings::default())
            .await
            .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_ensure_reuses_link() {
        let transport = Arc::new(FakeTransport::default());
        let mut supervisor = connect(&transport).await;

        supervisor.ensure().await.unwrap();
        supervisor.ensure().await.unwrap();
        assert_eq!(transport.connects.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ready_timeout() {
        let transport = Arc::new(FakeTransport::default());
        transport.hang.store(true, Ordering::SeqCst);

        let result =
            ConnectionSupervisor::establish(transport, GUILD, VOICE, SessionTimings::default())
                .await;
        assert!(matches!(result, Err(ConnectionError::ReadyTimeout(d)) if d == Duration::from_secs(30)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_transport_recovers_within_grace() {
        let transport = Arc::new(FakeTransport::default());
        let mut supervisor = connect(&transport).await;

        transport.emit(LinkEvent::Disconnected);
        transport.emit(LinkEvent::Reconnecting);
        supervisor.recover().await.unwrap();
        assert_eq!(transport.link.rejoins.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejoin_after_grace() {
        let transport = Arc::new(FakeTransport::default());
        let mut supervisor = connect(&transport).await;

        supervisor.recover().await.unwrap();
        assert_eq!(transport.link.rejoins.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_attempts() {
        let transport = Arc::new(FakeTransport::default());
        transport.link.rejoin_ok.store(false, Ordering::SeqCst);
        let mut supervisor = connect(&transport).await;

        let started = time::Instant::now();
        let result = supervisor.recover().await;

        assert!(matches!(result, Err(ConnectionError::ReconnectExhausted(5))));
        assert_eq!(transport.link.rejoins.load(Ordering::SeqCst), 5);
        // gracia + 4 pausas fijas entre 5 intentos
        assert_eq!(started.elapsed(), Duration::from_secs(25));
    }

    #[tokio::test(start_paused = true)]
    async fn test_one_recovery_at_a_time() {
        let transport = Arc::new(FakeTransport::default());
        let mut supervisor = connect(&transport).await;

        let recovery = supervisor.begin_recovery().unwrap();
        assert!(matches!(
            supervisor.begin_recovery(),
            Err(ConnectionError::Unavailable)
        ));

        // Los eventos van al future mientras está pendiente
        transport.emit(LinkEvent::Connected);
        let started = time::Instant::now();
        let outcome = recovery.await;
        assert!(started.elapsed() < Duration::from_secs(1));
        supervisor.finish_recovery(outcome).unwrap();

        assert_eq!(transport.link.rejoins.load(Ordering::SeqCst), 0);
        assert!(supervisor.begin_recovery().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_teardown_is_idempotent() {
        let transport = Arc::new(FakeTransport::default());
        let mut supervisor = connect(&transport).await;

        supervisor.teardown().await;
        supervisor.teardown().await;
        assert!(!supervisor.is_connected());
        assert_eq!(transport.link.disconnects.load(Ordering::SeqCst), 1);
    }
}
