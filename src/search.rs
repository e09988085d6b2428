use chrono::Utc;
use dashmap::DashMap;
use serenity::model::id::UserId;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::audio::queue::Track;
use crate::error::PlayerError;

/// Resultados por página del selector de búsqueda.
pub const PAGE_SIZE: usize = 3;

/// Máximo de candidatos que guarda una sesión (5 páginas).
pub const MAX_RESULTS: usize = 15;

/// Estado efímero de una búsqueda interactiva esperando selección.
#[derive(Debug)]
struct SearchSession {
    owner: UserId,
    query: String,
    results: Vec<Track>,
    current_page: usize,
    created_at: Instant,
}

impl SearchSession {
    fn total_pages(&self) -> usize {
        self.results.len().div_ceil(PAGE_SIZE).max(1)
    }

    fn page_view(&self) -> SearchPage {
        let start = self.current_page * PAGE_SIZE;
        let end = (start + PAGE_SIZE).min(self.results.len());
        SearchPage {
            query: self.query.clone(),
            page: self.current_page,
            total_pages: self.total_pages(),
            total_results: self.results.len(),
            start_index: start,
            tracks: self.results[start..end].to_vec(),
        }
    }
}

/// Una página de resultados lista para renderizar.
#[derive(Debug, Clone)]
pub struct SearchPage {
    pub query: String,
    /// Índice 0-based de la página actual.
    pub page: usize,
    pub total_pages: usize,
    pub total_results: usize,
    /// Índice absoluto del primer resultado de la página.
    pub start_index: usize,
    pub tracks: Vec<Track>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PageDirection {
    Previous,
    Next,
}

struct SearchManagerInner {
    sessions: DashMap<String, SearchSession>,
    ttl: Duration,
}

/// Sesiones de búsqueda por usuario: paginación y selección con dueño.
///
/// Toda operación que muta exige que el solicitante sea el dueño de la
/// sesión; los demás reciben un error de autorización sin ver el contenido.
#[derive(Clone)]
pub struct SearchManager {
    inner: Arc<SearchManagerInner>,
}

impl SearchManager {
    pub fn new(ttl: Duration) -> Self {
        Self {
            inner: Arc::new(SearchManagerInner {
                sessions: DashMap::new(),
                ttl,
            }),
        }
    }

    /// Registra una sesión nueva y devuelve su id.
    pub fn create_session(&self, owner: UserId, query: &str, mut results: Vec<Track>) -> String {
        results.truncate(MAX_RESULTS);
        let session_id = format!("{}-{}", owner, Utc::now().timestamp_millis());

        info!(
            "🔍 Sesión de búsqueda {} creada ({} resultados para '{}')",
            session_id,
            results.len(),
            query
        );

        self.inner.sessions.insert(
            session_id.clone(),
            SearchSession {
                owner,
                query: query.to_string(),
                results,
                current_page: 0,
                created_at: Instant::now(),
            },
        );

        session_id
    }

    /// Página actual de la sesión.
    pub fn page(&self, session_id: &str, requester: UserId) -> Result<SearchPage, PlayerError> {
        self.with_session(session_id, requester, |session| Ok(session.page_view()))
    }

    /// Avanza o retrocede una página. Fuera de rango se rechaza sin tocar
    /// la página actual.
    pub fn paginate(
        &self,
        session_id: &str,
        requester: UserId,
        direction: PageDirection,
    ) -> Result<SearchPage, PlayerError> {
        self.with_session_mut(session_id, requester, |session| {
            let target = match direction {
                PageDirection::Next => session.current_page.checked_add(1),
                PageDirection::Previous => session.current_page.checked_sub(1),
            };

            match target {
                Some(page) if page < session.total_pages() => {
                    session.current_page = page;
                    Ok(session.page_view())
                }
                Some(page) => Err(PlayerError::InvalidPosition { position: page + 1 }),
                None => Err(PlayerError::InvalidPosition { position: 0 }),
            }
        })
    }

    /// Consume la sesión devolviendo el resultado elegido (índice absoluto,
    /// 0-based). Una sesión seleccionada deja de existir.
    pub fn select(
        &self,
        session_id: &str,
        requester: UserId,
        index: usize,
    ) -> Result<Track, PlayerError> {
        self.with_session(session_id, requester, |session| {
            if index >= session.results.len() {
                return Err(PlayerError::InvalidPosition {
                    position: index + 1,
                });
            }
            Ok(())
        })?;

        let (_, session) = self
            .inner
            .sessions
            .remove(session_id)
            .ok_or(PlayerError::SessionExpired)?;

        let track = session.results.into_iter().nth(index).ok_or(
            PlayerError::InvalidPosition {
                position: index + 1,
            },
        )?;

        debug!("✅ Sesión {} consumida (selección {})", session_id, index);

        // Limpieza amortizada tras cada selección exitosa.
        self.sweep_expired();

        Ok(track)
    }

    /// Cancela y destruye la sesión.
    pub fn cancel(&self, session_id: &str, requester: UserId) -> Result<(), PlayerError> {
        self.with_session(session_id, requester, |_| Ok(()))?;
        self.inner.sessions.remove(session_id);
        debug!("❌ Sesión {} cancelada por su dueño", session_id);
        Ok(())
    }

    /// Elimina las sesiones que superaron el TTL. Devuelve cuántas cayeron.
    pub fn sweep_expired(&self) -> usize {
        let ttl = self.inner.ttl;
        let before = self.inner.sessions.len();
        self.inner
            .sessions
            .retain(|_, session| session.created_at.elapsed() <= ttl);
        let swept = before - self.inner.sessions.len();
        if swept > 0 {
            info!("🧹 {} sesiones de búsqueda expiradas eliminadas", swept);
        }
        swept
    }

    /// Barrido periódico en segundo plano.
    pub fn spawn_sweeper(&self, every: Duration) -> tokio::task::JoinHandle<()> {
        let manager = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            loop {
                interval.tick().await;
                manager.sweep_expired();
            }
        })
    }

    pub fn len(&self) -> usize {
        self.inner.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.sessions.is_empty()
    }

    /// Ejecuta `f` sobre la sesión viva, tras las verificaciones de TTL y
    /// de dueño. Los no-dueños no llegan a ver el contenido.
    fn with_session<T>(
        &self,
        session_id: &str,
        requester: UserId,
        f: impl FnOnce(&SearchSession) -> Result<T, PlayerError>,
    ) -> Result<T, PlayerError> {
        let session = self
            .inner
            .sessions
            .get(session_id)
            .ok_or(PlayerError::SessionExpired)?;
        if session.created_at.elapsed() > self.inner.ttl {
            return Err(PlayerError::SessionExpired);
        }
        if session.owner != requester {
            return Err(PlayerError::SessionUnauthorized);
        }
        f(&session)
    }

    fn with_session_mut<T>(
        &self,
        session_id: &str,
        requester: UserId,
        f: impl FnOnce(&mut SearchSession) -> Result<T, PlayerError>,
    ) -> Result<T, PlayerError> {
        let mut session = self
            .inner
            .sessions
            .get_mut(session_id)
            .ok_or(PlayerError::SessionExpired)?;
        if session.created_at.elapsed() > self.inner.ttl {
            return Err(PlayerError::SessionExpired);
        }
        if session.owner != requester {
            return Err(PlayerError::SessionUnauthorized);
        }
        f(&mut session)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const OWNER: UserId = UserId::new(100);
    const INTRUDER: UserId = UserId::new(200);

    fn tracks(count: usize) -> Vec<Track> {
        (0..count)
            .map(|i| Track::new(format!("t{i}"), format!("https://youtu.be/t{i}"), OWNER))
            .collect()
    }

    fn manager() -> SearchManager {
        SearchManager::new(Duration::from_secs(300))
    }

    #[tokio::test]
    async fn test_session_retrievable_after_creation() {
        let manager = manager();
        let id = manager.create_session(OWNER, "consulta", tracks(7));

        let page = manager.page(&id, OWNER).unwrap();
        assert_eq!(page.page, 0);
        assert_eq!(page.total_pages, 3);
        assert_eq!(page.total_results, 7);
        assert_eq!(page.start_index, 0);
        let titles: Vec<_> = page.tracks.iter().map(|t| t.title.as_str()).collect();
        assert_eq!(titles, vec!["t0", "t1", "t2"]);
    }

    #[tokio::test]
    async fn test_pagination_walk_over_seven_results() {
        let manager = manager();
        let id = manager.create_session(OWNER, "consulta", tracks(7));

        let page = manager
            .paginate(&id, OWNER, PageDirection::Next)
            .unwrap();
        assert_eq!(page.start_index, 3);
        assert_eq!(page.tracks.len(), 3);

        let page = manager
            .paginate(&id, OWNER, PageDirection::Next)
            .unwrap();
        assert_eq!(page.start_index, 6);
        assert_eq!(page.tracks.len(), 1);

        // No hay más páginas: se rechaza y la página no cambia.
        assert!(manager.paginate(&id, OWNER, PageDirection::Next).is_err());
        assert_eq!(manager.page(&id, OWNER).unwrap().page, 2);
    }

    #[tokio::test]
    async fn test_previous_from_first_page_is_rejected() {
        let manager = manager();
        let id = manager.create_session(OWNER, "consulta", tracks(7));

        assert!(manager
            .paginate(&id, OWNER, PageDirection::Previous)
            .is_err());
        assert_eq!(manager.page(&id, OWNER).unwrap().page, 0);
    }

    #[tokio::test]
    async fn test_non_owner_operations_are_rejected_without_mutation() {
        let manager = manager();
        let id = manager.create_session(OWNER, "consulta", tracks(7));

        assert!(matches!(
            manager.page(&id, INTRUDER),
            Err(PlayerError::SessionUnauthorized)
        ));
        assert!(matches!(
            manager.paginate(&id, INTRUDER, PageDirection::Next),
            Err(PlayerError::SessionUnauthorized)
        ));
        assert!(matches!(
            manager.select(&id, INTRUDER, 0),
            Err(PlayerError::SessionUnauthorized)
        ));
        assert!(matches!(
            manager.cancel(&id, INTRUDER),
            Err(PlayerError::SessionUnauthorized)
        ));

        // La sesión sigue intacta para su dueño.
        let page = manager.page(&id, OWNER).unwrap();
        assert_eq!(page.page, 0);
        assert_eq!(page.total_results, 7);
    }

    #[tokio::test]
    async fn test_select_is_single_use() {
        let manager = manager();
        let id = manager.create_session(OWNER, "consulta", tracks(7));

        let track = manager.select(&id, OWNER, 4).unwrap();
        assert_eq!(track.title, "t4");

        assert!(matches!(
            manager.select(&id, OWNER, 4),
            Err(PlayerError::SessionExpired)
        ));
        assert!(manager.page(&id, OWNER).is_err());
    }

    #[tokio::test]
    async fn test_select_out_of_range_keeps_session() {
        let manager = manager();
        let id = manager.create_session(OWNER, "consulta", tracks(3));

        assert!(matches!(
            manager.select(&id, OWNER, 10),
            Err(PlayerError::InvalidPosition { .. })
        ));
        assert!(manager.page(&id, OWNER).is_ok());
    }

    #[tokio::test]
    async fn test_cancel_destroys_session() {
        let manager = manager();
        let id = manager.create_session(OWNER, "consulta", tracks(3));

        manager.cancel(&id, OWNER).unwrap();
        assert!(matches!(
            manager.page(&id, OWNER),
            Err(PlayerError::SessionExpired)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_ttl_sweep_removes_old_sessions() {
        let manager = manager();
        let id = manager.create_session(OWNER, "consulta", tracks(3));

        tokio::time::sleep(Duration::from_secs(301)).await;
        assert_eq!(manager.sweep_expired(), 1);
        assert!(manager.is_empty());
        assert!(matches!(
            manager.page(&id, OWNER),
            Err(PlayerError::SessionExpired)
        ));
    }

    #[tokio::test]
    async fn test_results_are_capped_at_fifteen() {
        let manager = manager();
        let id = manager.create_session(OWNER, "consulta", tracks(40));

        let page = manager.page(&id, OWNER).unwrap();
        assert_eq!(page.total_results, MAX_RESULTS);
        assert_eq!(page.total_pages, 5);
    }
}
