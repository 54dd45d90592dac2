//! Forwarding of client requests to the upstream under the shared session.
//!
//! Handles header filtering, session cookies, invalidation detection and
//! rewriting of HTML bodies and redirect targets.

use std::sync::Arc;

use axum::body::Bytes;
use reqwest::header::{
    CONNECTION, CONTENT_LENGTH, CONTENT_TYPE, COOKIE, HeaderMap, HeaderValue, LOCATION, ORIGIN,
    TRANSFER_ENCODING, USER_AGENT,
};
use reqwest::{Method, StatusCode};

use crate::error::{ProxyError, Result};
use crate::gate::AccessGate;
use crate::rewrite::Rewriter;
use crate::session::SessionStore;
use crate::upstream::{LOGIN_PAGE_MARKER, LOGIN_REDIRECT_MARKER, Upstream};

/// Inbound headers never forwarded: cookies come from the session, the
/// referer is synthesized and bodies must arrive unencoded for rewriting.
const SUPPRESSED_REQUEST_HEADERS: &[&str] = &["cookie", "referer", "accept-encoding"];

/// Connection-level headers the HTTP client recomputes itself.
const HOP_HEADERS: &[&str] = &["host", "content-length", "transfer-encoding", "connection"];

/// A fully buffered client request.
#[derive(Debug, Clone)]
pub struct InboundRequest {
    pub method: Method,
    pub path: String,
    pub query: Option<String>,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl InboundRequest {
    pub fn new(method: Method, path: &str, query: Option<&str>) -> Self {
        Self {
            method,
            path: path.to_string(),
            query: query.map(str::to_string),
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }

    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }
}

/// Upstream response after rewriting, ready to send to the client.
#[derive(Debug, Clone)]
pub struct ProxiedResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// Forwards requests to the upstream using the current session.
#[derive(Debug, Clone)]
pub struct ProxyEngine {
    upstream: Upstream,
    session: Arc<SessionStore>,
    gate: AccessGate,
    rewriter: Rewriter,
}

impl ProxyEngine {
    pub fn new(upstream: Upstream, session: Arc<SessionStore>, gate: AccessGate) -> Self {
        let rewriter = Rewriter::new(upstream.base_url(), gate.key());
        Self {
            upstream,
            session,
            gate,
            rewriter,
        }
    }

    pub fn gate(&self) -> &AccessGate {
        &self.gate
    }

    /// Resolve, forward and rewrite one request.
    ///
    /// Fails with [`ProxyError::Unauthorized`] before any upstream call when
    /// the access key does not match, and with
    /// [`ProxyError::SessionInvalidated`] when the upstream answers with its
    /// login page.
    pub async fn forward(&self, request: &InboundRequest) -> Result<ProxiedResponse> {
        let target = self
            .gate
            .resolve(&request.path, request.query.as_deref())?;
        let url = self.upstream.url(&target)?;

        let snapshot = self.session.snapshot_for(&url).await;
        let headers = self.outbound_headers(&request.headers, snapshot.cookie)?;

        let response = self
            .upstream
            .client()
            .request(request.method.clone(), url.clone())
            .headers(headers)
            .body(request.body.clone())
            .send()
            .await?;

        self.session
            .merge(&url, response.headers(), snapshot.generation)
            .await;

        let status = response.status();
        let upstream_headers = response.headers().clone();
        let body = response.bytes().await?;

        tracing::debug!(
            method = %request.method,
            target = %target,
            status = status.as_u16(),
            bytes = body.len(),
            "Upstream responded"
        );

        let location = upstream_headers
            .get(LOCATION)
            .and_then(|v| v.to_str().ok());
        if let Some(reason) = detect_invalidation(&body, location) {
            self.session.mark_invalidated(snapshot.generation).await;
            return Err(ProxyError::SessionInvalidated(reason.to_string()));
        }

        let body = if is_html(&upstream_headers) {
            self.rewrite_body(body)
        } else {
            body
        };
        let headers = self.response_headers(&upstream_headers, status, body.len())?;

        Ok(ProxiedResponse {
            status,
            headers,
            body,
        })
    }

    fn outbound_headers(
        &self,
        inbound: &HeaderMap,
        cookie: Option<HeaderValue>,
    ) -> Result<HeaderMap> {
        let mut headers = HeaderMap::with_capacity(inbound.len() + 3);
        for (name, value) in inbound {
            let lower = name.as_str();
            if SUPPRESSED_REQUEST_HEADERS.contains(&lower) || HOP_HEADERS.contains(&lower) {
                continue;
            }
            headers.append(name.clone(), value.clone());
        }

        headers.insert(USER_AGENT, header_value(self.upstream.user_agent())?);
        headers.insert(ORIGIN, header_value(self.upstream.base_url())?);
        if let Some(cookie) = cookie {
            headers.insert(COOKIE, cookie);
        }
        Ok(headers)
    }

    fn rewrite_body(&self, body: Bytes) -> Bytes {
        match std::str::from_utf8(&body) {
            Ok(text) => Bytes::from(self.rewriter.rewrite_html(text)),
            Err(_) => {
                tracing::debug!("HTML body is not valid UTF-8, passing through unchanged");
                body
            }
        }
    }

    fn response_headers(
        &self,
        upstream: &HeaderMap,
        status: StatusCode,
        body_len: usize,
    ) -> Result<HeaderMap> {
        let mut headers = HeaderMap::with_capacity(upstream.len());
        for (name, value) in upstream {
            if name == TRANSFER_ENCODING || name == CONNECTION || name == CONTENT_LENGTH {
                continue;
            }
            headers.append(name.clone(), value.clone());
        }

        if status.is_redirection()
            && let Some(location) = upstream.get(LOCATION).and_then(|v| v.to_str().ok())
        {
            let rewritten = self.rewriter.rewrite_location(location);
            headers.insert(LOCATION, header_value(&rewritten)?);
        }

        headers.insert(CONTENT_LENGTH, HeaderValue::from(body_len));
        Ok(headers)
    }
}

/// Why a response proves the session is gone, if it does.
pub fn detect_invalidation(body: &[u8], location: Option<&str>) -> Option<&'static str> {
    let marker = LOGIN_PAGE_MARKER.as_bytes();
    if body.windows(marker.len()).any(|w| w == marker) {
        return Some("upstream served its login page");
    }
    if location.is_some_and(|l| l.contains(LOGIN_REDIRECT_MARKER)) {
        return Some("upstream redirected to its login endpoint");
    }
    None
}

fn is_html(headers: &HeaderMap) -> bool {
    headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.contains("text/html"))
}

fn header_value(value: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(value)
        .map_err(|e| ProxyError::Upstream(format!("Invalid header value {:?}: {}", value, e)))
}
