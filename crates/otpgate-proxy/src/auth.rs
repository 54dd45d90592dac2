//! Upstream login handshake.
//!
//! ```text
//! Unauthenticated -> ParamsFetched -> LoginSubmitted -> Authenticated
//!        \________________\_________________\________> Failed
//! ```
//!
//! 1. `GET /` must answer `302` with a `Location` whose text after the last
//!    `?` holds the hidden login form fields.
//! 2. Wait for a fresh OTP interval and generate the code.
//! 3. `POST` the form fields, username and code to the login endpoint.
//! 4. Success is exactly `302` with `Location: /`.
//!
//! The whole sequence runs under the session's exclusive lock.

use std::sync::Arc;

use chrono::Utc;
use reqwest::header::{COOKIE, LOCATION, REFERER, USER_AGENT};
use reqwest::{RequestBuilder, Response, StatusCode, Url};

use crate::error::{ProxyError, Result};
use crate::otp::SharedOtpSource;
use crate::session::{Session, SessionStore};
use crate::upstream::{LOGIN_PATH, Upstream};

/// Hidden form fields echoed back to the login endpoint.
pub const FORM_FIELDS: &[&str] = &["curl", "curlid", "curlmode"];

/// Steps of the login handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginPhase {
    Unauthenticated,
    ParamsFetched,
    LoginSubmitted,
    Authenticated,
    Failed,
}

/// Outcome of a re-authentication request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reauth {
    /// This call performed the login.
    LoggedIn,
    /// Another request renewed the session first; it is reused as is.
    Reused,
}

/// Login form parameters recovered from the initial redirect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginParams {
    pub fields: Vec<(String, String)>,
    pub referer: String,
}

impl LoginParams {
    /// First value of a form field, empty when absent.
    pub fn get(&self, name: &str) -> &str {
        self.fields
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
            .unwrap_or("")
    }
}

/// Drives the login handshake against the upstream.
#[derive(Debug, Clone)]
pub struct Authenticator {
    upstream: Upstream,
    session: Arc<SessionStore>,
    otp: SharedOtpSource,
    username: String,
}

impl Authenticator {
    pub fn new(
        upstream: Upstream,
        session: Arc<SessionStore>,
        otp: SharedOtpSource,
        username: &str,
    ) -> Result<Self> {
        let username = username.trim();
        if username.is_empty() {
            return Err(ProxyError::Config("username is required".to_string()));
        }
        Ok(Self {
            upstream,
            session,
            otp,
            username: username.to_string(),
        })
    }

    pub fn session(&self) -> &Arc<SessionStore> {
        &self.session
    }

    /// Log in unconditionally, replacing whatever session exists.
    pub async fn authenticate(&self) -> Result<()> {
        let mut session = self.session.lock_exclusive().await;
        self.login(&mut session).await
    }

    /// Log in again unless the session moved past `observed_generation`
    /// while this caller waited for the lock.
    pub async fn reauthenticate(&self, observed_generation: u64) -> Result<Reauth> {
        let mut session = self.session.lock_exclusive().await;
        if session.generation() != observed_generation {
            tracing::info!(
                observed = observed_generation,
                current = session.generation(),
                "Session already renewed by a concurrent request"
            );
            return Ok(Reauth::Reused);
        }
        self.login(&mut session).await?;
        Ok(Reauth::LoggedIn)
    }

    async fn login(&self, session: &mut Session) -> Result<()> {
        tracing::info!("Authenticating upstream session");
        session.reset();

        let mut phase = LoginPhase::Unauthenticated;
        match self.handshake(session, &mut phase).await {
            Ok(()) => {
                session.mark_authenticated();
                tracing::info!(
                    generation = session.generation(),
                    "Upstream session authenticated"
                );
                Ok(())
            }
            Err(e) => {
                let reached = std::mem::replace(&mut phase, LoginPhase::Failed);
                tracing::warn!(reached = ?reached, phase = ?phase, error = %e, "Upstream login failed");
                Err(e)
            }
        }
    }

    async fn handshake(&self, session: &Session, phase: &mut LoginPhase) -> Result<()> {
        let params = self.fetch_login_params(session).await?;
        *phase = LoginPhase::ParamsFetched;
        tracing::debug!(referer = %params.referer, "Fetched login parameters");

        // One code per interval: never reuse one a previous login may have consumed.
        self.otp.wait_for_next_interval().await;
        let password = self.otp.generate(Utc::now());

        let response = self.submit_login(session, &params, &password).await?;
        *phase = LoginPhase::LoginSubmitted;

        let location = header_str(&response, LOCATION);
        if !is_login_successful(response.status(), location.as_deref()) {
            return Err(ProxyError::Login(format!(
                "login rejected (status {}, location {:?})",
                response.status(),
                location
            )));
        }
        *phase = LoginPhase::Authenticated;
        Ok(())
    }

    async fn fetch_login_params(&self, session: &Session) -> Result<LoginParams> {
        let url = self.upstream.url("/")?;
        let request = self.upstream.client().get(url.clone());
        let response = self
            .send(session, request, &url)
            .await
            .map_err(|e| ProxyError::Login(format!("initial GET request failed: {}", e)))?;

        if response.status() != StatusCode::FOUND {
            return Err(ProxyError::Login(format!(
                "expected a 302 redirect, but got status {}",
                response.status()
            )));
        }

        let location = header_str(&response, LOCATION)
            .ok_or_else(|| ProxyError::Login("'Location' header not found".to_string()))?;

        Ok(LoginParams {
            fields: parse_login_location(&location)?,
            referer: format!("{}{}", self.upstream.base_url(), location),
        })
    }

    async fn submit_login(
        &self,
        session: &Session,
        params: &LoginParams,
        password: &str,
    ) -> Result<Response> {
        let url = self.upstream.url(LOGIN_PATH)?;

        let mut form: Vec<(&str, &str)> = FORM_FIELDS
            .iter()
            .map(|field| (*field, params.get(field)))
            .collect();
        form.push(("username", self.username.as_str()));
        form.push(("password", password));

        let request = self
            .upstream
            .client()
            .post(url.clone())
            .header(REFERER, &params.referer)
            .form(&form);

        self.send(session, request, &url)
            .await
            .map_err(|e| ProxyError::Login(format!("login POST request failed: {}", e)))
    }

    async fn send(&self, session: &Session, request: RequestBuilder, url: &Url) -> Result<Response> {
        let mut request = request.header(USER_AGENT, self.upstream.user_agent());
        if let Some(cookie) = session.cookie_header(url) {
            request = request.header(COOKIE, cookie);
        }
        let response = request.send().await?;
        session.absorb(url, response.headers());
        Ok(response)
    }
}

/// Form fields encoded after the last `?` of the initial redirect target.
pub fn parse_login_location(location: &str) -> Result<Vec<(String, String)>> {
    let (_, query) = location.rsplit_once('?').ok_or_else(|| {
        ProxyError::Login(format!(
            "could not parse query string from location: {}",
            location
        ))
    })?;

    Ok(url::form_urlencoded::parse(query.as_bytes())
        .into_owned()
        .collect())
}

/// Exactly `302 Found` to `/`.
pub fn is_login_successful(status: StatusCode, location: Option<&str>) -> bool {
    status == StatusCode::FOUND && location == Some("/")
}

fn header_str(response: &Response, name: reqwest::header::HeaderName) -> Option<String> {
    response
        .headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}
