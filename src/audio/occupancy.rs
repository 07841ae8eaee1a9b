use serenity::model::id::{ChannelId, GuildId};
use std::{sync::Arc, time::Duration};
use tokio::time::{self, Instant, Interval, MissedTickBehavior};
use tracing::debug;

use super::transport::VoiceTransport;

/// Vigila si queda algún humano en el canal de voz de la sesión.
pub struct OccupancyMonitor {
    transport: Arc<dyn VoiceTransport>,
    guild: GuildId,
    channel: ChannelId,
    interval: Interval,
}

impl OccupancyMonitor {
    pub fn new(
        transport: Arc<dyn VoiceTransport>,
        guild: GuildId,
        channel: ChannelId,
        period: Duration,
    ) -> Self {
        // El primer chequeo llega tras un periodo completo, no al crear la sesión
        let mut interval = time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        Self {
            transport,
            guild,
            channel,
            interval,
        }
    }

    pub async fn tick(&mut self) {
        self.interval.tick().await;
    }

    /// Canal inexistente cuenta como vacío
    pub async fn is_abandoned(&self) -> bool {
        let listeners = self
            .transport
            .human_listeners(self.guild, self.channel)
            .await
            .unwrap_or(0);

        debug!(
            "👥 {} oyentes en canal {} de guild {}",
            listeners, self.channel, self.guild
        );
        listeners == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::testing::{FakeTransport, GUILD, VOICE};

    fn monitor(transport: &Arc<FakeTransport>) -> OccupancyMonitor {
        OccupancyMonitor::new(transport.clone(), GUILD, VOICE, Duration::from_secs(3))
    }

    #[tokio::test(start_paused = true)]
    async fn test_listener_counts() {
        let transport = Arc::new(FakeTransport::default());
        let monitor = monitor(&transport);

        transport.set_listeners(Some(2));
        assert!(!monitor.is_abandoned().await);

        transport.set_listeners(Some(0));
        assert!(monitor.is_abandoned().await);

        // canal borrado
        transport.set_listeners(None);
        assert!(monitor.is_abandoned().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_tick_after_full_period() {
        let transport = Arc::new(FakeTransport::default());
        let mut monitor = monitor(&transport);

        let started = Instant::now();
        monitor.tick().await;
        assert_eq!(started.elapsed(), Duration::from_secs(3));
        monitor.tick().await;
        assert_eq!(started.elapsed(), Duration::from_secs(6));
    }
}
