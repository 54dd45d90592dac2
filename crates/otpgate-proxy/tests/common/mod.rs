//! Common test utilities for integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use wiremock::matchers::{body_string, header, header_regex, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use otpgate_proxy::upstream::LOGIN_PAGE_MARKER;
use otpgate_proxy::{AccessKey, OtpSource, Outcome, ProxiedResponse, RetryController, UpstreamConfig};

pub const USERNAME: &str = "alice";
pub const CODE: &str = "123456";
pub const LOGIN_LOCATION: &str = "/lm_auth_proxy?DoLogon?curl=Z2F&curlid=abc-123&curlmode=0";

/// OTP source that never waits and counts generated codes.
#[derive(Debug, Default)]
pub struct CountingOtp {
    calls: AtomicUsize,
}

impl CountingOtp {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl OtpSource for CountingOtp {
    fn generate(&self, _time: DateTime<Utc>) -> String {
        self.calls.fetch_add(1, Ordering::SeqCst);
        CODE.to_string()
    }

    async fn wait_for_next_interval(&self) {}
}

/// Build a controller against the mock upstream.
pub fn controller(server: &MockServer, key: &str, otp: Arc<CountingOtp>) -> RetryController {
    controller_with(UpstreamConfig::new(server.uri()), key, otp)
}

pub fn controller_with(config: UpstreamConfig, key: &str, otp: Arc<CountingOtp>) -> RetryController {
    // Surrounding whitespace is trimmed before submission.
    RetryController::build(config, &format!("  {USERNAME} "), otp, AccessKey::parse(key).unwrap())
        .unwrap()
}

pub fn with_timeout(server: &MockServer, timeout: Duration) -> UpstreamConfig {
    UpstreamConfig::new(server.uri()).with_timeout(timeout)
}

/// Mount the two login endpoints. Every login hands out `session=<session>`.
pub async fn mount_login(server: &MockServer, session: &str) {
    mount_login_redirect(server).await;
    Mock::given(method("POST"))
        .and(path("/lm_auth_proxy"))
        .respond_with(login_success(session))
        .mount(server)
        .await;
}

/// Mount the login endpoints so the first login hands out `first` and every
/// later one `then`.
pub async fn mount_rotating_login(server: &MockServer, first: &str, then: &str) {
    mount_login_redirect(server).await;
    Mock::given(method("POST"))
        .and(path("/lm_auth_proxy"))
        .respond_with(login_success(first))
        .up_to_n_times(1)
        .with_priority(1)
        .mount(server)
        .await;
    Mock::given(method("POST"))
        .and(path("/lm_auth_proxy"))
        .respond_with(login_success(then))
        .mount(server)
        .await;
}

pub async fn mount_login_redirect(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(
            ResponseTemplate::new(302)
                .insert_header("location", LOGIN_LOCATION)
                .insert_header("set-cookie", "pre=1; Path=/"),
        )
        .mount(server)
        .await;
}

fn login_success(session: &str) -> ResponseTemplate {
    ResponseTemplate::new(302)
        .insert_header("location", "/")
        .insert_header("set-cookie", format!("session={session}; Path=/").as_str())
}

/// Serve `body` on `GET <route>` to requests carrying `session=<session>`,
/// and the upstream login page to everybody else.
pub async fn mount_protected(server: &MockServer, route: &str, session: &str, body: ResponseTemplate) {
    Mock::given(method("GET"))
        .and(path(route))
        .and(header_regex("cookie", &format!(r"(^|; )session={session}(;|$)")))
        .respond_with(body)
        .with_priority(1)
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(login_page())
        .mount(server)
        .await;
}

pub fn login_page() -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_raw(
        format!("<html><body><h1>{LOGIN_PAGE_MARKER}</h1></body></html>"),
        "text/html; charset=utf-8",
    )
}

pub fn html(body: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_raw(body.to_string(), "text/html; charset=utf-8")
}

/// Expected urlencoded login form.
pub fn expected_login_form() -> String {
    format!("curl=Z2F&curlid=abc-123&curlmode=0&username={USERNAME}&password={CODE}")
}

/// Mount a strict login POST that only matches the exact expected request.
pub async fn mount_strict_login(server: &MockServer, session: &str) {
    mount_login_redirect(server).await;
    Mock::given(method("POST"))
        .and(path("/lm_auth_proxy"))
        .and(header("content-type", "application/x-www-form-urlencoded"))
        .and(header("referer", format!("{}{}", server.uri(), LOGIN_LOCATION).as_str()))
        .and(header("cookie", "pre=1"))
        .and(body_string(expected_login_form()))
        .respond_with(login_success(session))
        .expect(1)
        .mount(server)
        .await;
}

/// Number of login form submissions the upstream received.
pub async fn login_posts(server: &MockServer) -> usize {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .filter(|r| r.method.as_str() == "POST" && r.url.path() == "/lm_auth_proxy")
        .count()
}

/// Unwrap a forwarded response.
pub fn forwarded(outcome: Outcome) -> ProxiedResponse {
    match outcome {
        Outcome::Forwarded(response) => response,
        other => panic!("expected a forwarded response, got {:?}", other),
    }
}

pub fn failure(outcome: Outcome) -> (u16, String) {
    match outcome {
        Outcome::Failed { status, message } => (status.as_u16(), message),
        other => panic!("expected a failure, got {:?}", other),
    }
}
