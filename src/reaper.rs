use async_trait::async_trait;
use dashmap::DashMap;
use serenity::model::id::GuildId;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Consulta cuántos usuarios no-bot ocupan el canal de voz del guild.
/// El bot anfitrión lo implementa contra su caché del gateway.
#[async_trait]
pub trait OccupancyProbe: Send + Sync {
    async fn non_bot_members(&self, guild_id: GuildId) -> usize;
}

/// Desmonte de la sesión de voz de un guild; lo implementa
/// [`crate::audio::player::PlayerRegistry`].
#[async_trait]
pub trait VoiceTeardown: Send + Sync {
    async fn teardown(&self, guild_id: GuildId);
}

struct ReaperInner {
    grace: Duration,
    pending: DashMap<GuildId, CancellationToken>,
    probe: Arc<dyn OccupancyProbe>,
    teardown: Arc<dyn VoiceTeardown>,
}

/// Desconecta al bot de canales que quedaron sin usuarios.
///
/// Cada cambio de ocupación pasa por [`IdleReaper::notify_occupancy`]. Un
/// canal vacío arma un único temporizador de gracia por guild; si al
/// expirar sigue vacío (se reconsulta, por si alguien volvió a entrar
/// durante la espera) se desmonta el reproductor y su conexión.
#[derive(Clone)]
pub struct IdleReaper {
    inner: Arc<ReaperInner>,
}

impl IdleReaper {
    pub fn new(
        grace: Duration,
        probe: Arc<dyn OccupancyProbe>,
        teardown: Arc<dyn VoiceTeardown>,
    ) -> Self {
        Self {
            inner: Arc::new(ReaperInner {
                grace,
                pending: DashMap::new(),
                probe,
                teardown,
            }),
        }
    }

    /// Procesa un cambio de ocupación del canal de voz del guild.
    pub fn notify_occupancy(&self, guild_id: GuildId, non_bot_members: usize) {
        if non_bot_members > 0 {
            // Alguien está en el canal: cancelar el temporizador pendiente.
            if let Some((_, token)) = self.inner.pending.remove(&guild_id) {
                debug!("👥 Usuarios de vuelta en guild {}; se cancela la desconexión", guild_id);
                token.cancel();
            }
            return;
        }

        // Nunca dos temporizadores para el mismo guild.
        if self.inner.pending.contains_key(&guild_id) {
            return;
        }

        info!(
            "👥 Canal sin usuarios en guild {}; desconexión en {}s",
            guild_id,
            self.inner.grace.as_secs()
        );

        let token = CancellationToken::new();
        self.inner.pending.insert(guild_id, token.clone());

        let inner = self.inner.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => return,
                _ = tokio::time::sleep(inner.grace) => {}
            }

            inner.pending.remove(&guild_id);

            // Reverificación contra la carrera de un usuario reentrando
            // justo cuando expira la gracia.
            if inner.probe.non_bot_members(guild_id).await == 0 {
                info!("🔌 Desconexión automática por canal vacío en guild {}", guild_id);
                inner.teardown.teardown(guild_id).await;
            } else {
                debug!("👥 El canal de guild {} volvió a ocuparse; no se desconecta", guild_id);
            }
        });
    }

    /// Cantidad de temporizadores de gracia activos (para diagnóstico).
    pub fn pending_count(&self) -> usize {
        self.inner.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FixedProbe {
        count: AtomicUsize,
    }

    #[async_trait]
    impl OccupancyProbe for FixedProbe {
        async fn non_bot_members(&self, _guild_id: GuildId) -> usize {
            self.count.load(Ordering::SeqCst)
        }
    }

    #[derive(Default)]
    struct RecordingTeardown {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl VoiceTeardown for RecordingTeardown {
        async fn teardown(&self, _guild_id: GuildId) {
            self.calls.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn reaper(
        grace_ms: u64,
        occupants: usize,
    ) -> (IdleReaper, Arc<FixedProbe>, Arc<RecordingTeardown>) {
        let probe = Arc::new(FixedProbe {
            count: AtomicUsize::new(occupants),
        });
        let teardown = Arc::new(RecordingTeardown::default());
        let reaper = IdleReaper::new(
            Duration::from_millis(grace_ms),
            probe.clone(),
            teardown.clone(),
        );
        (reaper, probe, teardown)
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_channel_is_reaped_after_grace() {
        let (reaper, _probe, teardown) = reaper(30_000, 0);

        reaper.notify_occupancy(GuildId::new(1), 0);
        assert_eq!(reaper.pending_count(), 1);

        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(teardown.calls.load(Ordering::SeqCst), 1);
        assert_eq!(reaper.pending_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejoin_cancels_pending_timer() {
        let (reaper, _probe, teardown) = reaper(30_000, 0);

        reaper.notify_occupancy(GuildId::new(1), 0);
        tokio::time::sleep(Duration::from_secs(5)).await;

        // Un usuario vuelve antes de que expire la gracia.
        reaper.notify_occupancy(GuildId::new(1), 1);
        tokio::time::sleep(Duration::from_secs(60)).await;

        assert_eq!(teardown.calls.load(Ordering::SeqCst), 0);
        assert_eq!(reaper.pending_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_recheck_guards_against_rejoin_race() {
        // El canal figura vacío al programar, pero la sonda ve un usuario
        // al expirar: no se desconecta.
        let (reaper, probe, teardown) = reaper(30_000, 0);

        reaper.notify_occupancy(GuildId::new(1), 0);
        probe.count.store(1, Ordering::SeqCst);

        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(teardown.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_double_schedule() {
        let (reaper, _probe, teardown) = reaper(30_000, 0);

        reaper.notify_occupancy(GuildId::new(1), 0);
        reaper.notify_occupancy(GuildId::new(1), 0);
        reaper.notify_occupancy(GuildId::new(1), 0);
        assert_eq!(reaper.pending_count(), 1);

        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(teardown.calls.load(Ordering::SeqCst), 1);
    }
}
