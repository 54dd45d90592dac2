//! Upstream session cookies.
//!
//! The proxy talks to exactly one upstream, so a single cookie jar holds the
//! whole session. Locking discipline:
//!
//! - read side: cookie snapshots for outgoing requests, merging response
//!   cookies (the jar synchronizes its own writes), state reads;
//! - write side: replacing the jar, marking the session invalidated, and the
//!   complete login handshake (see [`crate::auth`]), so no request ever
//!   observes a half-built session.
//!
//! Every successful login bumps a generation counter. Snapshots carry the
//! generation they were taken from; merges from an older generation are
//! dropped and concurrent invalidations of the same generation trigger one
//! login only.

use reqwest::Url;
use reqwest::cookie::{CookieStore, Jar};
use reqwest::header::{HeaderMap, HeaderValue, SET_COOKIE};
use tokio::sync::{RwLock, RwLockWriteGuard};

/// Authentication state of the upstream session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No login has succeeded since the jar was last cleared.
    Unauthenticated,
    /// The last login succeeded and no request has proven otherwise.
    Authenticated,
    /// The upstream answered with its login page under this session.
    Invalidated,
}

/// The jar plus its bookkeeping. Only reachable through [`SessionStore`].
#[derive(Debug)]
pub(crate) struct Session {
    jar: Jar,
    state: SessionState,
    generation: u64,
}

impl Session {
    fn new() -> Self {
        Self {
            jar: Jar::default(),
            state: SessionState::Unauthenticated,
            generation: 0,
        }
    }

    /// `Cookie` header value applicable to `url`.
    pub(crate) fn cookie_header(&self, url: &Url) -> Option<HeaderValue> {
        self.jar.cookies(url)
    }

    /// Absorb every `Set-Cookie` header of a response to `url`.
    pub(crate) fn absorb(&self, url: &Url, headers: &HeaderMap) {
        let mut set_cookies = headers.get_all(SET_COOKIE).iter().peekable();
        if set_cookies.peek().is_some() {
            self.jar.set_cookies(&mut set_cookies, url);
        }
    }

    /// Drop all cookies and forget the authenticated state.
    pub(crate) fn reset(&mut self) {
        self.jar = Jar::default();
        self.state = SessionState::Unauthenticated;
    }

    /// Record a successful login, starting a new generation.
    pub(crate) fn mark_authenticated(&mut self) {
        self.state = SessionState::Authenticated;
        self.generation += 1;
    }

    pub(crate) fn generation(&self) -> u64 {
        self.generation
    }
}

/// Cookies to attach to one outgoing request.
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    /// `Cookie` header value, if any cookie applies.
    pub cookie: Option<HeaderValue>,
    /// Generation the snapshot was taken from.
    pub generation: u64,
}

/// Exclusive access to the session for the login handshake.
pub(crate) type SessionGuard<'a> = RwLockWriteGuard<'a, Session>;

/// Thread-safe holder of the upstream session.
#[derive(Debug)]
pub struct SessionStore {
    inner: RwLock<Session>,
}

impl SessionStore {
    /// Create an empty, unauthenticated store.
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Session::new()),
        }
    }

    /// Isolated cookie set for one request to `url`.
    pub async fn snapshot_for(&self, url: &Url) -> SessionSnapshot {
        let session = self.inner.read().await;
        SessionSnapshot {
            cookie: session.cookie_header(url),
            generation: session.generation,
        }
    }

    /// Merge response cookies taken under `generation`.
    ///
    /// Returns `false` when the session was replaced since and the cookies
    /// were dropped.
    pub async fn merge(&self, url: &Url, headers: &HeaderMap, generation: u64) -> bool {
        let session = self.inner.read().await;
        if session.generation != generation {
            tracing::debug!(
                stale = generation,
                current = session.generation,
                "Dropping cookies from superseded session"
            );
            return false;
        }
        session.absorb(url, headers);
        true
    }

    /// Discard every cookie and start over unauthenticated.
    pub async fn replace(&self) {
        self.inner.write().await.reset();
    }

    /// Current authentication state.
    pub async fn state(&self) -> SessionState {
        self.inner.read().await.state
    }

    /// Current generation.
    pub async fn generation(&self) -> u64 {
        self.inner.read().await.generation
    }

    /// Flag the session as invalidated if it is still `generation`.
    pub async fn mark_invalidated(&self, generation: u64) {
        let mut session = self.inner.write().await;
        if session.generation == generation {
            session.state = SessionState::Invalidated;
        }
    }

    /// Exclusive guard held for a whole login handshake.
    pub(crate) async fn lock_exclusive(&self) -> SessionGuard<'_> {
        self.inner.write().await
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url() -> Url {
        Url::parse("https://upstream.test/owa/").unwrap()
    }

    fn set_cookie(values: &[&str]) -> HeaderMap {
        let mut headers = HeaderMap::new();
        for value in values {
            headers.append(SET_COOKIE, HeaderValue::from_str(value).unwrap());
        }
        headers
    }

    #[tokio::test]
    async fn test_new_store_is_empty() {
        let store = SessionStore::new();
        let snapshot = store.snapshot_for(&url()).await;
        assert!(snapshot.cookie.is_none());
        assert_eq!(snapshot.generation, 0);
        assert_eq!(store.state().await, SessionState::Unauthenticated);
    }

    #[tokio::test]
    async fn test_merge_then_snapshot() {
        let store = SessionStore::new();
        assert!(store.merge(&url(), &set_cookie(&["sid=abc; Path=/"]), 0).await);

        let snapshot = store.snapshot_for(&url()).await;
        assert_eq!(snapshot.cookie.unwrap().to_str().unwrap(), "sid=abc");
    }

    #[tokio::test]
    async fn test_merge_multiple_and_overwrite() {
        let store = SessionStore::new();
        store
            .merge(&url(), &set_cookie(&["a=1; Path=/", "b=2; Path=/"]), 0)
            .await;
        store.merge(&url(), &set_cookie(&["a=3; Path=/"]), 0).await;

        let cookie = store.snapshot_for(&url()).await.cookie.unwrap();
        let cookie = cookie.to_str().unwrap();
        assert!(cookie.contains("a=3"));
        assert!(cookie.contains("b=2"));
        assert!(!cookie.contains("a=1"));
    }

    #[tokio::test]
    async fn test_snapshot_is_isolated() {
        let store = SessionStore::new();
        store.merge(&url(), &set_cookie(&["sid=old; Path=/"]), 0).await;
        let snapshot = store.snapshot_for(&url()).await;

        store.merge(&url(), &set_cookie(&["sid=new; Path=/"]), 0).await;
        assert_eq!(snapshot.cookie.unwrap().to_str().unwrap(), "sid=old");
    }

    #[tokio::test]
    async fn test_replace_clears_cookies() {
        let store = SessionStore::new();
        store.merge(&url(), &set_cookie(&["sid=abc; Path=/"]), 0).await;
        store.replace().await;
        assert!(store.snapshot_for(&url()).await.cookie.is_none());
        assert_eq!(store.state().await, SessionState::Unauthenticated);
    }

    #[tokio::test]
    async fn test_stale_generation_merge_dropped() {
        let store = SessionStore::new();
        {
            let mut session = store.lock_exclusive().await;
            session.reset();
            session.mark_authenticated();
        }
        assert_eq!(store.generation().await, 1);

        assert!(!store.merge(&url(), &set_cookie(&["sid=stale; Path=/"]), 0).await);
        assert!(store.snapshot_for(&url()).await.cookie.is_none());
    }

    #[tokio::test]
    async fn test_mark_invalidated_respects_generation() {
        let store = SessionStore::new();
        {
            let mut session = store.lock_exclusive().await;
            session.mark_authenticated();
        }

        store.mark_invalidated(0).await;
        assert_eq!(store.state().await, SessionState::Authenticated);

        store.mark_invalidated(1).await;
        assert_eq!(store.state().await, SessionState::Invalidated);
    }

    #[tokio::test]
    async fn test_concurrent_merges_do_not_lose_updates() {
        let store = std::sync::Arc::new(SessionStore::new());
        let mut handles = Vec::new();
        for i in 0..16 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                let header = format!("c{i}=v{i}; Path=/");
                store.merge(&url(), &set_cookie(&[header.as_str()]), 0).await;
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let cookie = store.snapshot_for(&url()).await.cookie.unwrap();
        let cookie = cookie.to_str().unwrap().to_string();
        for i in 0..16 {
            assert!(cookie.contains(&format!("c{i}=v{i}")), "missing c{i} in {cookie}");
        }
    }
}
