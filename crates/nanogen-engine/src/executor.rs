use std::error::Error as StdError;
use std::time::Duration;

use reqwest::blocking::Client as HttpClient;
use serde_json::{json, Value};
use thiserror::Error;

use nanogen_contracts::error::{GenerateError, Result};
use nanogen_contracts::events::{self, EventPayload, EventWriter};

use crate::plan::AttemptSpec;

/// Image generation is slow; one attempt may take minutes.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(180);

const BODY_PREVIEW_CHARS: usize = 512;

/// Status plus body text of a completed HTTP exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportResponse {
    pub status: u16,
    pub body: String,
}

/// The request never produced an HTTP status (DNS, refused, timeout, ...).
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct TransportError {
    pub message: String,
}

pub trait Transport {
    fn post_json(
        &self,
        attempt: &AttemptSpec,
        payload: &Value,
        timeout: Duration,
    ) -> std::result::Result<TransportResponse, TransportError>;
}

impl<T: Transport + ?Sized> Transport for &T {
    fn post_json(
        &self,
        attempt: &AttemptSpec,
        payload: &Value,
        timeout: Duration,
    ) -> std::result::Result<TransportResponse, TransportError> {
        (**self).post_json(attempt, payload, timeout)
    }
}

#[derive(Debug, Clone, Default)]
pub struct HttpTransport {
    http: HttpClient,
}

impl HttpTransport {
    pub fn new() -> Self {
        Self {
            http: HttpClient::new(),
        }
    }
}

impl Transport for HttpTransport {
    fn post_json(
        &self,
        attempt: &AttemptSpec,
        payload: &Value,
        timeout: Duration,
    ) -> std::result::Result<TransportResponse, TransportError> {
        let mut request = self.http.post(&attempt.url).timeout(timeout);
        for (name, value) in &attempt.headers {
            request = request.header(name.as_str(), value.as_str());
        }
        let response = request.json(payload).send().map_err(|err| TransportError {
            message: error_chain_text(&err),
        })?;
        let status = response.status().as_u16();
        let body = response.text().map_err(|err| TransportError {
            message: format!("response body read failed: {}", error_chain_text(&err)),
        })?;
        Ok(TransportResponse { status, body })
    }
}

/// Statuses that look the same for "wrong credentials" and "wrong route"
/// across gateways, so the next base/auth combination is worth a try.
pub fn is_ambiguous_auth_or_route_failure(status: u16) -> bool {
    matches!(status, 401 | 403 | 404)
}

#[derive(Debug)]
pub enum AttemptOutcome {
    Success(Value),
    Retry(String),
    Fatal(GenerateError),
}

pub fn classify_response(response: TransportResponse, retryable: fn(u16) -> bool) -> AttemptOutcome {
    let TransportResponse { status, body } = response;
    if (200..300).contains(&status) {
        return match serde_json::from_str::<Value>(&body) {
            Ok(parsed) => AttemptOutcome::Success(parsed),
            Err(err) => AttemptOutcome::Fatal(GenerateError::response_shape(format!(
                "HTTP {status} with invalid JSON payload ({err}): {}",
                truncate_text(&body, BODY_PREVIEW_CHARS)
            ))),
        };
    }
    if retryable(status) {
        return AttemptOutcome::Retry(format!(
            "HTTP {status}: {}",
            truncate_text(&body, BODY_PREVIEW_CHARS)
        ));
    }
    AttemptOutcome::Fatal(GenerateError::FatalHttp {
        status,
        body: truncate_text(&body, BODY_PREVIEW_CHARS),
    })
}

/// Walks an attempt plan until one request succeeds or a failure is fatal.
pub struct RequestExecutor<T: Transport> {
    transport: T,
    retryable: fn(u16) -> bool,
    timeout: Duration,
    events: Option<EventWriter>,
    progress: Option<ProgressSink>,
}

/// Receives each retry diagnostic as soon as the attempt fails.
pub type ProgressSink = Box<dyn Fn(&str)>;

impl<T: Transport> RequestExecutor<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            retryable: is_ambiguous_auth_or_route_failure,
            timeout: REQUEST_TIMEOUT,
            events: None,
            progress: None,
        }
    }

    pub fn with_retry_classifier(mut self, retryable: fn(u16) -> bool) -> Self {
        self.retryable = retryable;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_events(mut self, events: Option<EventWriter>) -> Self {
        self.events = events;
        self
    }

    /// Routes retry diagnostics to `sink` instead of collecting them in
    /// the caller's warnings.
    pub fn with_progress(mut self, sink: impl Fn(&str) + 'static) -> Self {
        self.progress = Some(Box::new(sink));
        self
    }

    pub fn execute(
        &self,
        payload: &Value,
        attempts: &[AttemptSpec],
        warnings: &mut Vec<String>,
    ) -> Result<Value> {
        let total = attempts.len();
        let mut last_error: Option<String> = None;

        for (idx, attempt) in attempts.iter().enumerate() {
            let index = idx + 1;
            let response = match self.transport.post_json(attempt, payload, self.timeout) {
                Ok(response) => response,
                Err(err) => {
                    let err = GenerateError::Network {
                        url: attempt.redacted_url(),
                        message: err.message,
                    };
                    self.record_failure(index, total, attempt, None, &err.to_string(), warnings);
                    return Err(err);
                }
            };
            let status = response.status;

            match classify_response(response, self.retryable) {
                AttemptOutcome::Success(parsed) => {
                    self.record(
                        events::ATTEMPT_SUCCEEDED,
                        attempt_payload(index, total, attempt, Some(status)),
                        warnings,
                    );
                    return Ok(parsed);
                }
                AttemptOutcome::Retry(message) => {
                    let next = if index < total {
                        "retrying..."
                    } else {
                        "no attempts left"
                    };
                    self.report(
                        format!("Attempt {index}/{total} failed: HTTP {status}, {next}"),
                        warnings,
                    );
                    self.record_failure(index, total, attempt, Some(status), &message, warnings);
                    last_error = Some(message);
                }
                AttemptOutcome::Fatal(err) => {
                    self.record_failure(
                        index,
                        total,
                        attempt,
                        Some(status),
                        &err.to_string(),
                        warnings,
                    );
                    return Err(err);
                }
            }
        }

        Err(GenerateError::ExhaustedAttempts {
            attempts: total,
            last_error,
        })
    }

    fn report(&self, line: String, warnings: &mut Vec<String>) {
        match self.progress.as_ref() {
            Some(sink) => sink(&line),
            None => warnings.push(line),
        }
    }

    fn record_failure(
        &self,
        index: usize,
        total: usize,
        attempt: &AttemptSpec,
        status: Option<u16>,
        error: &str,
        warnings: &mut Vec<String>,
    ) {
        let mut payload = attempt_payload(index, total, attempt, status);
        payload.insert("error".to_string(), Value::String(error.to_string()));
        self.record(events::ATTEMPT_FAILED, payload, warnings);
    }

    fn record(&self, event_type: &str, payload: EventPayload, warnings: &mut Vec<String>) {
        let Some(writer) = self.events.as_ref() else {
            return;
        };
        if let Err(err) = writer.emit(event_type, payload) {
            push_unique_warning(
                warnings,
                format!("event log write failed ({}): {err:#}", writer.path().display()),
            );
        }
    }
}

fn attempt_payload(
    index: usize,
    total: usize,
    attempt: &AttemptSpec,
    status: Option<u16>,
) -> EventPayload {
    events::payload([
        ("attempt", json!(index)),
        ("attempts", json!(total)),
        ("url", json!(attempt.redacted_url())),
        ("auth", json!(attempt.auth.label())),
        ("status", json!(status)),
    ])
}

pub(crate) fn error_chain_text(err: &(dyn StdError + 'static)) -> String {
    let mut parts: Vec<String> = Vec::new();
    let mut cause = Some(err);
    while let Some(current) = cause {
        let text = current.to_string();
        let trimmed = text.trim();
        if !trimmed.is_empty()
            && !parts
                .last()
                .map(|existing| existing == trimmed)
                .unwrap_or(false)
        {
            parts.push(trimmed.to_string());
        }
        cause = current.source();
    }
    parts.join(" | caused by: ")
}

pub(crate) fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}

pub(crate) fn push_unique_warning(warnings: &mut Vec<String>, message: String) {
    if message.trim().is_empty() {
        return;
    }
    if warnings.iter().any(|existing| existing == &message) {
        return;
    }
    warnings.push(message);
}

#[cfg(test)]
pub(crate) mod tests {
    use std::cell::RefCell;
    use std::collections::VecDeque;
    use std::fs;
    use std::rc::Rc;

    use super::*;
    use crate::plan::build_attempts;

    pub(crate) type Scripted = std::result::Result<TransportResponse, TransportError>;

    /// Replays scripted responses and panics if called past the script.
    #[derive(Default)]
    pub(crate) struct ScriptedTransport {
        script: RefCell<VecDeque<Scripted>>,
        pub(crate) calls: RefCell<Vec<String>>,
    }

    impl ScriptedTransport {
        pub(crate) fn new(script: Vec<Scripted>) -> Self {
            Self {
                script: RefCell::new(script.into()),
                calls: RefCell::new(Vec::new()),
            }
        }

        pub(crate) fn call_count(&self) -> usize {
            self.calls.borrow().len()
        }
    }

    impl Transport for ScriptedTransport {
        fn post_json(
            &self,
            attempt: &AttemptSpec,
            _payload: &Value,
            timeout: Duration,
        ) -> std::result::Result<TransportResponse, TransportError> {
            assert_eq!(timeout, REQUEST_TIMEOUT);
            self.calls.borrow_mut().push(attempt.url.clone());
            self.script
                .borrow_mut()
                .pop_front()
                .unwrap_or_else(|| panic!("unexpected request to {}", attempt.url))
        }
    }

    pub(crate) fn status(code: u16, body: &str) -> Scripted {
        Ok(TransportResponse {
            status: code,
            body: body.to_string(),
        })
    }

    fn plan() -> Vec<AttemptSpec> {
        build_attempts("k1", "https://example.com/api").unwrap_or_default()
    }

    #[test]
    fn ambiguous_statuses_are_exactly_401_403_404() {
        for code in [401, 403, 404] {
            assert!(is_ambiguous_auth_or_route_failure(code), "{code}");
        }
        for code in [200, 400, 402, 405, 408, 429, 500, 502, 503] {
            assert!(!is_ambiguous_auth_or_route_failure(code), "{code}");
        }
    }

    #[test]
    fn success_short_circuits_remaining_attempts() -> anyhow::Result<()> {
        let attempts = plan();
        let transport = ScriptedTransport::new(vec![
            status(401, "bad bearer"),
            status(403, "bad header"),
            status(200, r#"{"candidates": []}"#),
        ]);
        let mut warnings = Vec::new();
        let result = RequestExecutor::new(&transport).execute(&json!({}), &attempts, &mut warnings)?;

        assert_eq!(result, json!({"candidates": []}));
        assert_eq!(transport.call_count(), 3);
        assert_eq!(
            warnings,
            vec![
                "Attempt 1/6 failed: HTTP 401, retrying...".to_string(),
                "Attempt 2/6 failed: HTTP 403, retrying...".to_string(),
            ]
        );
        Ok(())
    }

    #[test]
    fn progress_sink_sees_each_retry_before_the_next_request() -> anyhow::Result<()> {
        let attempts = plan();
        let transport = ScriptedTransport::new(vec![
            status(401, "bad bearer"),
            status(404, "no route"),
            status(200, "{}"),
        ]);
        let seen = Rc::new(RefCell::new(Vec::<(String, usize)>::new()));
        let calls = Rc::new(RefCell::new(0usize));
        let sink_seen = Rc::clone(&seen);
        let sink_calls = Rc::clone(&calls);
        let counting = CountingTransport {
            inner: &transport,
            calls: Rc::clone(&calls),
        };
        let executor = RequestExecutor::new(counting).with_progress(move |line: &str| {
            sink_seen
                .borrow_mut()
                .push((line.to_string(), *sink_calls.borrow()));
        });
        let mut warnings = Vec::new();
        executor.execute(&json!({}), &attempts, &mut warnings)?;

        assert_eq!(
            *seen.borrow(),
            vec![
                ("Attempt 1/6 failed: HTTP 401, retrying...".to_string(), 1),
                ("Attempt 2/6 failed: HTTP 404, retrying...".to_string(), 2),
            ]
        );
        assert!(warnings.is_empty());
        Ok(())
    }

    struct CountingTransport<'a> {
        inner: &'a ScriptedTransport,
        calls: Rc<RefCell<usize>>,
    }

    impl Transport for CountingTransport<'_> {
        fn post_json(
            &self,
            attempt: &AttemptSpec,
            payload: &Value,
            timeout: Duration,
        ) -> std::result::Result<TransportResponse, TransportError> {
            *self.calls.borrow_mut() += 1;
            self.inner.post_json(attempt, payload, timeout)
        }
    }

    #[test]
    fn first_attempt_success_makes_one_request() -> anyhow::Result<()> {
        let attempts = plan();
        let transport = ScriptedTransport::new(vec![status(200, "{}")]);
        let mut warnings = Vec::new();
        RequestExecutor::new(&transport).execute(&json!({}), &attempts, &mut warnings)?;
        assert_eq!(*transport.calls.borrow(), vec![attempts[0].url.clone()]);
        assert!(warnings.is_empty());
        Ok(())
    }

    #[test]
    fn all_unauthorized_exhausts_the_plan() {
        let attempts = plan();
        let script = (0..attempts.len())
            .map(|idx| status(401, &format!("denied {idx}")))
            .collect();
        let transport = ScriptedTransport::new(script);
        let mut warnings = Vec::new();
        let err = RequestExecutor::new(&transport)
            .execute(&json!({}), &attempts, &mut warnings)
            .err();

        assert_eq!(transport.call_count(), 6);
        assert_eq!(
            *transport.calls.borrow(),
            attempts
                .iter()
                .map(|attempt| attempt.url.clone())
                .collect::<Vec<_>>()
        );
        match err {
            Some(GenerateError::ExhaustedAttempts {
                attempts,
                last_error,
            }) => {
                assert_eq!(attempts, 6);
                assert_eq!(last_error.as_deref(), Some("HTTP 401: denied 5"));
            }
            other => panic!("expected exhausted attempts, got {other:?}"),
        }
        assert_eq!(
            warnings.last().map(String::as_str),
            Some("Attempt 6/6 failed: HTTP 401, no attempts left")
        );
    }

    #[test]
    fn server_error_on_first_attempt_is_fatal() {
        let attempts = plan();
        let transport = ScriptedTransport::new(vec![status(500, "boom")]);
        let mut warnings = Vec::new();
        let err = RequestExecutor::new(&transport)
            .execute(&json!({}), &attempts, &mut warnings)
            .err();

        assert_eq!(transport.call_count(), 1);
        match err {
            Some(GenerateError::FatalHttp { status, body }) => {
                assert_eq!(status, 500);
                assert_eq!(body, "boom");
            }
            other => panic!("expected fatal http, got {other:?}"),
        }
    }

    #[test]
    fn boundary_statuses_are_fatal_after_retryable_ones() {
        for code in [400, 405, 429] {
            let attempts = plan();
            let transport = ScriptedTransport::new(vec![status(404, "no route"), status(code, "nope")]);
            let mut warnings = Vec::new();
            let err = RequestExecutor::new(&transport)
                .execute(&json!({}), &attempts, &mut warnings)
                .err();
            assert_eq!(transport.call_count(), 2, "{code}");
            assert!(
                matches!(err, Some(GenerateError::FatalHttp { status, .. }) if status == code),
                "{code}: {err:?}"
            );
        }
    }

    #[test]
    fn transport_failure_is_fatal_network_error() {
        let attempts = plan();
        let transport = ScriptedTransport::new(vec![
            status(403, "forbidden"),
            Err(TransportError {
                message: "connection refused".to_string(),
            }),
        ]);
        let mut warnings = Vec::new();
        let err = RequestExecutor::new(&transport)
            .execute(&json!({}), &attempts, &mut warnings)
            .err();

        assert_eq!(transport.call_count(), 2);
        match err {
            Some(GenerateError::Network { url, message }) => {
                assert_eq!(url, attempts[1].url);
                assert_eq!(message, "connection refused");
            }
            other => panic!("expected network error, got {other:?}"),
        }
    }

    #[test]
    fn invalid_json_on_success_is_a_response_shape_error() {
        let attempts = plan();
        let transport = ScriptedTransport::new(vec![status(200, "<html>gateway</html>")]);
        let mut warnings = Vec::new();
        let err = RequestExecutor::new(&transport)
            .execute(&json!({}), &attempts, &mut warnings)
            .err();
        assert_eq!(transport.call_count(), 1);
        assert_eq!(err.map(|err| err.kind()), Some("response_shape"));
    }

    #[test]
    fn custom_classifier_changes_what_is_retried() -> anyhow::Result<()> {
        let attempts = plan();
        let transport = ScriptedTransport::new(vec![status(500, "flaky"), status(200, "{}")]);
        let mut warnings = Vec::new();
        RequestExecutor::new(&transport)
            .with_retry_classifier(|code| code >= 500)
            .execute(&json!({}), &attempts, &mut warnings)?;
        assert_eq!(transport.call_count(), 2);

        let transport = ScriptedTransport::new(vec![status(404, "gone")]);
        let err = RequestExecutor::new(&transport)
            .with_retry_classifier(|code| code >= 500)
            .execute(&json!({}), &attempts, &mut warnings)
            .err();
        assert_eq!(err.map(|err| err.kind()), Some("fatal_http"));
        Ok(())
    }

    #[test]
    fn empty_plan_reports_exhaustion_without_requests() {
        let transport = ScriptedTransport::default();
        let mut warnings = Vec::new();
        let err = RequestExecutor::new(&transport)
            .execute(&json!({}), &[], &mut warnings)
            .err();
        assert_eq!(transport.call_count(), 0);
        assert!(matches!(
            err,
            Some(GenerateError::ExhaustedAttempts {
                attempts: 0,
                last_error: None
            })
        ));
    }

    #[test]
    fn attempts_are_logged_to_events_without_the_key() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let events_path = temp.path().join("events.jsonl");
        let attempts = build_attempts("secret-key", "https://example.com/api")?;
        let transport = ScriptedTransport::new(vec![
            status(401, "a"),
            status(401, "b"),
            status(404, "c"),
            status(200, "{}"),
        ]);
        let mut warnings = Vec::new();
        RequestExecutor::new(&transport)
            .with_events(Some(EventWriter::new(&events_path, "run-1")))
            .execute(&json!({}), &attempts, &mut warnings)?;

        let content = fs::read_to_string(&events_path)?;
        assert!(!content.contains("secret-key"));
        let events = content
            .lines()
            .map(serde_json::from_str::<Value>)
            .collect::<std::result::Result<Vec<_>, _>>()?;
        assert_eq!(events.len(), 4);
        assert_eq!(events[0]["type"], json!("attempt_failed"));
        assert_eq!(events[0]["auth"], json!("bearer"));
        assert_eq!(events[2]["auth"], json!("query-key"));
        assert_eq!(events[2]["status"], json!(404));
        assert_eq!(events[3]["type"], json!("attempt_succeeded"));
        assert_eq!(events[3]["attempt"], json!(4));
        Ok(())
    }

    #[test]
    fn long_bodies_are_truncated_in_errors() {
        let body = "x".repeat(2000);
        let outcome = classify_response(
            TransportResponse { status: 502, body },
            is_ambiguous_auth_or_route_failure,
        );
        match outcome {
            AttemptOutcome::Fatal(GenerateError::FatalHttp { body, .. }) => {
                assert_eq!(body.chars().count(), BODY_PREVIEW_CHARS + 1);
                assert!(body.ends_with('…'));
            }
            other => panic!("expected fatal http, got {other:?}"),
        }
    }

    #[test]
    fn error_chain_text_joins_sources() {
        let inner = std::io::Error::new(std::io::ErrorKind::Other, "socket closed");
        let outer = TransportErrorWithSource { source: inner };
        assert_eq!(
            error_chain_text(&outer),
            "request failed | caused by: socket closed"
        );
    }

    #[derive(Debug, Error)]
    #[error("request failed")]
    struct TransportErrorWithSource {
        #[source]
        source: std::io::Error,
    }
}
