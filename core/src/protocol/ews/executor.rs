/*
 * executor.rs
 * Copyright (C) 2026 Chris Burdess
 *
 * This file is part of Tagliacarte, a cross-platform email client.
 *
 * Tagliacarte is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * Tagliacarte is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with Tagliacarte.  If not, see <http://www.gnu.org/licenses/>.
 */

//! Rate-limited POST executor.
//!
//! Two policies are supported. Fail-fast gives up on anything but a 200. Fault-tolerant
//! retries responses that look like a temporary outage or throttling (503, 401, a 500 from
//! an overloaded front end, a redirect to the generic error page, `Connection: close`),
//! doubling the cool-down each time, until the total time spent exceeds the policy's
//! maximum wait. Cool-downs are published on the shared `RetryPolicy` so every concurrent
//! request to the same server backs off, not just the one that saw the error.
//!
//! The session handed in is the one used for the request; the caller gets back the session
//! that was in use at the end. On any error the session is retired before returning.

use std::borrow::Cow;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, error, info, trace, warn, Level};

use crate::protocol::ews::error::EwsError;
use crate::protocol::ews::policy::RetryPolicy;
use crate::protocol::ews::redirect::get_redirect_url;
use crate::protocol::ews::response::{AttemptFailure, Response, TOKEN_EXPIRED_HEADER};
use crate::protocol::ews::transport::{PostRequest, Protocol, SendError, Session};
use crate::xml::is_xml;

/// Target for request and response bodies. Kept separate so bodies can be enabled
/// independently of the request trace.
const XML_TARGET: &str = "tagliacarte_ews::xml";

/// Where Exchange redirects to when its web service is failing.
const GENERIC_ERROR_PAGE: &str = "/ews/genericerrorpage.htm?aspxerrorpath=/ews/exchange.asmx";

/// Seen from overloaded front ends in highly concurrent use.
const SERVER_ERROR_MARKER: &[u8] = b"Server Error in '/EWS' Application";

const INVALID_SERVER_VERSION: &[u8] = b"The specified server version is invalid";
const INVALID_SCHEMA_VERSION: &[u8] = b"ErrorInvalidSchemaVersionForMailboxVersion";
const ACCOUNT_LOCKED_OUT: &[u8] = b"The referenced account is currently locked out";

/// Statuses we can hope to recover from by waiting.
const RETRYABLE_STATUS: [u16; 5] = [301, 302, 401, 500, 503];

/// Progress of one `execute` call, for logging.
#[derive(Debug)]
struct Attempt {
    retry: u32,
    wait: Duration,
    redirects: u32,
    started: Instant,
}

impl Attempt {
    fn new(wait: Duration) -> Self {
        Self {
            retry: 0,
            wait,
            redirects: 0,
            started: Instant::now(),
        }
    }

    fn total_wait(&self) -> Duration {
        self.started.elapsed()
    }
}

/// POST `request` until the server gives a useful answer or the retry policy gives up.
///
/// Returns a 200 response, or a 500 whose body is an XML document (EWS sends some SOAP faults
/// that way), together with the session now in use.
pub async fn execute<P: Protocol>(
    protocol: &P,
    session: P::Session,
    request: &PostRequest,
) -> Result<(Response, P::Session), EwsError> {
    let config = protocol.config();
    let policy = protocol.retry_policy();
    let timeout = request.timeout.unwrap_or(config.timeout);
    let mut session = session;
    let mut url = request.url.clone();
    let mut attempt = Attempt::new(config.retry_wait);

    let mut response = loop {
        if back_off_if_needed(policy).await {
            // We may have slept for a long time
            session = match protocol.renew_session(session).await {
                Ok(renewed) => renewed,
                Err((stale, e)) => return Err(retire(protocol, stale, e)),
            };
        }
        debug!(
            session = session.session_id(),
            retry = attempt.retry,
            ?timeout,
            %url,
            "POST after {:?} wait",
            attempt.wait
        );
        let sent_at = Instant::now();
        let outcome = tokio::time::timeout(timeout, protocol.post(&session, &url, request, timeout)).await;
        let mut r = match outcome {
            Ok(Ok(r)) => r,
            Ok(Err(SendError::Tls(msg))) => {
                // Persistent, so never retried
                return Err(retire(protocol, session, EwsError::Transport(msg)));
            }
            Ok(Err(SendError::Connection(e))) => {
                debug!(session = session.session_id(), %url, "connection error: {}", e);
                placeholder(&url, request, AttemptFailure::Connection(e.to_string()))
            }
            Err(_) => {
                debug!(session = session.session_id(), %url, "timed out after {:?}", timeout);
                let msg = format!("request timed out after {:?}", timeout);
                placeholder(&url, request, AttemptFailure::Connection(msg))
            }
            Ok(Err(SendError::TokenExpired(msg))) => {
                debug!(session = session.session_id(), "OAuth token expired; refreshing");
                placeholder(&url, request, AttemptFailure::TokenExpired(msg))
            }
            Ok(Err(SendError::MissingAuthHeader)) => {
                debug!(session = session.session_id(), %url, "auth headers missing from response");
                placeholder(&url, request, AttemptFailure::MissingAuthHeader)
            }
        };
        log_attempt(&session, &attempt, request, &r, sent_at.elapsed());

        if need_new_credentials(&r) {
            r.close();
            session = match protocol.refresh_credentials(session).await {
                Ok(refreshed) => refreshed,
                Err((expired, e)) => return Err(retire(protocol, expired, e)),
            };
            continue;
        }

        let content = if r.status == 500 {
            match r.content().await {
                Ok(content) => Some(content),
                Err(e) => return Err(retire(protocol, session, e.into())),
            }
        } else {
            None
        };
        match may_retry_on_error(&r, content.as_deref(), policy, attempt.total_wait()) {
            Ok(true) => {
                r.close();
                info!(
                    session = session.session_id(),
                    url = %r.url,
                    status = r.status,
                    "connection error; cooling down for {:?}",
                    attempt.wait
                );
                policy.back_off(Some(attempt.wait));
                attempt.retry += 1;
                attempt.wait *= 2;
                continue;
            }
            Ok(false) => {}
            Err(e) => return Err(retire(protocol, session, e)),
        }

        if r.status == 301 || r.status == 302 {
            r.close();
            match redirect_or_fail(&r, &mut attempt, request.allow_redirects, config.max_redirects) {
                Ok(next) => {
                    url = next;
                    continue;
                }
                Err(e) => return Err(retire(protocol, session, e)),
            }
        }
        break r;
    };

    if response.status == 200 {
        debug!(session = session.session_id(), %url, "useful response");
        return Ok((response, session));
    }
    let content = match response.content().await {
        Ok(content) => content,
        Err(e) => return Err(retire(protocol, session, e.into())),
    };
    if response.status == 500 && !content.is_empty() && is_xml(&content) {
        debug!(status = response.status, "trying to parse the response anyway");
        return Ok((response, session));
    }
    let e = classify(&response, &content, policy.is_fail_fast());
    trace!(target: XML_TARGET, request = %String::from_utf8_lossy(&request.body), response = %String::from_utf8_lossy(&content));
    Err(retire(protocol, session, e))
}

/// Sleep until the shared back-off deadline has passed. Returns whether we slept.
async fn back_off_if_needed(policy: &RetryPolicy) -> bool {
    let mut slept = false;
    // Another request may extend the deadline while we sleep
    while let Some(remaining) = policy.remaining_back_off() {
        warn!("server requested back off; sleeping {:?}", remaining);
        tokio::time::sleep(remaining).await;
        slept = true;
    }
    slept
}

fn placeholder(url: &str, request: &PostRequest, failure: AttemptFailure) -> Response {
    Response::placeholder(url, request.headers.clone(), failure)
}

fn log_attempt<S: Session>(session: &S, attempt: &Attempt, request: &PostRequest, r: &Response, elapsed: Duration) {
    debug!(
        retry = attempt.retry,
        wait = ?attempt.wait,
        session = session.session_id(),
        auth = session.auth(),
        url = %r.url,
        allow_redirects = request.allow_redirects,
        stream = request.stream,
        response_time = ?elapsed,
        status = r.status,
        request_headers = ?request.headers,
        response_headers = ?r.headers,
        "attempt finished"
    );
    if !xml_trace_enabled() {
        return;
    }
    let body: Cow<'_, str> = if request.stream {
        "[STREAMING]".into()
    } else {
        r.buffered_content()
            .map(|b| String::from_utf8_lossy(b))
            .unwrap_or_default()
    };
    trace!(target: XML_TARGET, request = %String::from_utf8_lossy(&request.body), response = %body);
}

fn xml_trace_enabled() -> bool {
    tracing::enabled!(target: XML_TARGET, Level::TRACE)
}

fn need_new_credentials(r: &Response) -> bool {
    r.status == 401 && r.headers.contains(TOKEN_EXPIRED_HEADER)
}

/// Whether `r` looks like a temporary condition worth waiting out. `content` is the body of a
/// 500 response. Fails with `RateLimit` once `total_wait` exceeds the policy's maximum.
fn may_retry_on_error(
    r: &Response,
    content: Option<&[u8]>,
    policy: &RetryPolicy,
    total_wait: Duration,
) -> Result<bool, EwsError> {
    if !RETRYABLE_STATUS.contains(&r.status) {
        debug!(status = r.status, "no retry: wrong status code");
        return Ok(false);
    }
    if policy.is_fail_fast() {
        debug!("no retry: fail-fast policy");
        return Ok(false);
    }
    if total_wait > policy.max_wait() {
        return Err(EwsError::RateLimit {
            url: r.url.clone(),
            status: r.status,
            total_wait,
        });
    }
    let connection_close = r
        .headers
        .get("connection")
        .is_some_and(|v| v.eq_ignore_ascii_case("close"));
    let error_page = r.status == 302
        && r.headers
            .get("location")
            .is_some_and(|l| l.to_lowercase() == GENERIC_ERROR_PAGE);
    let server_error = r.status == 500 && content.is_some_and(|c| contains(c, SERVER_ERROR_MARKER));
    let retry = r.status == 401 || connection_close || error_page || r.status == 503 || server_error;
    if retry {
        debug!("retry allowed: conditions met");
    }
    Ok(retry)
}

/// Resolve the redirect in `r` and count it. Same-origin redirects are always followed;
/// others only when `allow_redirects` is set.
fn redirect_or_fail(
    r: &Response,
    attempt: &mut Attempt,
    allow_redirects: bool,
    max_redirects: u32,
) -> Result<String, EwsError> {
    let next = get_redirect_url(r, true, !allow_redirects).inspect_err(|e| {
        if let EwsError::Redirect { url } = e {
            debug!(from = %r.url, to = %url, "cross-origin redirect not allowed");
        }
    })?;
    attempt.redirects += 1;
    if attempt.redirects > max_redirects {
        return Err(EwsError::Transport("Max redirect count exceeded".to_string()));
    }
    debug!(to = %next, "HTTP redirected");
    Ok(next)
}

/// Turn a terminal non-200 response into the most specific error.
fn classify(r: &Response, content: &[u8], fail_fast: bool) -> EwsError {
    if let Some(cas_error) = r.headers.get("X-CasErrorCode").filter(|v| !v.is_empty()) {
        let cas_error = match cas_error.strip_prefix("CAS error:") {
            Some(rest) => rest.trim(),
            None => cas_error,
        };
        return EwsError::Cas {
            cas_error: cas_error.to_string(),
            status: r.status,
        };
    }
    if r.status == 500 && (contains(content, INVALID_SERVER_VERSION) || contains(content, INVALID_SCHEMA_VERSION)) {
        return EwsError::SchemaVersion("Invalid server version".to_string());
    }
    if contains(content, ACCOUNT_LOCKED_OUT) {
        return EwsError::Transport("The service account is currently locked out".to_string());
    }
    if r.status == 401 && fail_fast {
        return EwsError::Unauthorized(format!("Invalid credentials for {}", r.url));
    }
    if let Some(AttemptFailure::Connection(msg)) = &r.failure {
        return EwsError::Transport(msg.clone());
    }
    EwsError::Transport(format!(
        "Unknown failure in response. Code: {} headers: {:?} content: {}",
        r.status,
        r.headers,
        String::from_utf8_lossy(content)
    ))
}

/// Log `e`, retire `session` and hand `e` back for returning.
fn retire<P: Protocol>(protocol: &P, session: P::Session, e: EwsError) -> EwsError {
    match &e {
        EwsError::RateLimit { .. } | EwsError::Redirect { .. } => {
            warn!(session = session.session_id(), "{}", e)
        }
        _ => error!(session = session.session_id(), "{}", e),
    }
    protocol.retire_session(session);
    e
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|w| w == needle)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fault_tolerant() -> RetryPolicy {
        RetryPolicy::fault_tolerance(Duration::from_secs(60))
    }

    #[test]
    fn body_logging_is_off_without_a_subscriber() {
        assert!(!xml_trace_enabled());
    }

    #[test]
    fn retry_needs_a_recoverable_status() {
        let policy = fault_tolerant();
        let r = Response::new(404, "https://x/EWS").with_header("Connection", "close");
        assert!(!may_retry_on_error(&r, None, &policy, Duration::ZERO).unwrap());
        let r = Response::new(503, "https://x/EWS");
        assert!(may_retry_on_error(&r, None, &policy, Duration::ZERO).unwrap());
        assert!(!may_retry_on_error(&r, None, &RetryPolicy::fail_fast(), Duration::ZERO).unwrap());
    }

    #[test]
    fn retry_conditions() {
        let policy = fault_tolerant();
        let error_page = Response::new(302, "https://x/EWS").with_header("Location", GENERIC_ERROR_PAGE);
        assert!(may_retry_on_error(&error_page, None, &policy, Duration::ZERO).unwrap());
        let other_redirect = Response::new(302, "https://x/EWS").with_header("Location", "/owa/");
        assert!(!may_retry_on_error(&other_redirect, None, &policy, Duration::ZERO).unwrap());
        let closing = Response::new(301, "https://x/EWS").with_header("connection", "close");
        assert!(may_retry_on_error(&closing, None, &policy, Duration::ZERO).unwrap());

        let r = Response::new(500, "https://x/EWS");
        let marker = b"<html>Server Error in '/EWS' Application</html>";
        assert!(may_retry_on_error(&r, Some(marker), &policy, Duration::ZERO).unwrap());
        assert!(!may_retry_on_error(&r, Some(b"<html>boom</html>"), &policy, Duration::ZERO).unwrap());
    }

    #[test]
    fn gives_up_after_max_wait() {
        let r = Response::new(503, "https://x/EWS");
        match may_retry_on_error(&r, None, &fault_tolerant(), Duration::from_secs(61)) {
            Err(EwsError::RateLimit { status, total_wait, .. }) => {
                assert_eq!(status, 503);
                assert_eq!(total_wait, Duration::from_secs(61));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn classify_cas_error_first() {
        let r = Response::new(500, "https://x/EWS").with_header("X-CasErrorCode", "CAS error: MailboxGuid not found");
        match classify(&r, INVALID_SERVER_VERSION, false) {
            EwsError::Cas { cas_error, status } => {
                assert_eq!(cas_error, "MailboxGuid not found");
                assert_eq!(status, 500);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn classify_by_content_and_status() {
        let r = Response::new(500, "https://x/EWS");
        assert!(matches!(
            classify(&r, b"..ErrorInvalidSchemaVersionForMailboxVersion..", false),
            EwsError::SchemaVersion(_)
        ));
        let r = Response::new(456, "https://x/EWS");
        match classify(&r, ACCOUNT_LOCKED_OUT, false) {
            EwsError::Transport(msg) => assert!(msg.contains("locked out")),
            other => panic!("unexpected {:?}", other),
        }
        let r = Response::new(401, "https://x/EWS");
        assert!(matches!(classify(&r, b"", true), EwsError::Unauthorized(_)));
        match classify(&r, b"nope", false) {
            EwsError::Transport(msg) => assert!(msg.starts_with("Unknown failure in response. Code: 401")),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn classify_connection_placeholder() {
        let r = Response::placeholder(
            "https://x/EWS",
            Default::default(),
            AttemptFailure::Connection("connection reset".to_string()),
        );
        match classify(&r, b"", false) {
            EwsError::Transport(msg) => assert_eq!(msg, "connection reset"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn redirect_count_is_capped() {
        let mut attempt = Attempt::new(Duration::from_secs(10));
        let r = Response::new(302, "https://x/EWS/a").with_header("Location", "/EWS/b");
        for _ in 0..2 {
            assert_eq!(redirect_or_fail(&r, &mut attempt, false, 2).unwrap(), "https://x/EWS/b");
        }
        assert!(matches!(
            redirect_or_fail(&r, &mut attempt, false, 2),
            Err(EwsError::Transport(_))
        ));
    }

    #[test]
    fn cross_origin_redirect_needs_permission() {
        let mut attempt = Attempt::new(Duration::from_secs(10));
        let r = Response::new(302, "https://x/EWS").with_header("Location", "https://y/EWS");
        assert!(matches!(
            redirect_or_fail(&r, &mut attempt, false, 10),
            Err(EwsError::Redirect { url }) if url == "https://y/EWS"
        ));
        assert_eq!(redirect_or_fail(&r, &mut attempt, true, 10).unwrap(), "https://y/EWS");
    }
}
