//! TPS/CTPS compliance API client.
//!
//! A check request carries an ordered list of phone numbers; the response
//! carries one result per number in the same order and does not reliably echo
//! the numbers back. Results are therefore attributed by position only.

use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};
use url::Url;

use tpsync_shared::{ComplianceConfig, ComplianceResult, Result, TpsyncError};

/// Default maximum numbers per request.
pub const DEFAULT_MAX_BATCH: usize = 10_000;

/// Default timeout in seconds for batch checks.
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Service name used in upstream errors.
const SERVICE: &str = "compliance API";

/// User-Agent string for compliance requests.
const USER_AGENT: &str = concat!("tpsync/", env!("CARGO_PKG_VERSION"));

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct CheckRequest<'a> {
    phone_numbers: &'a [String],
}

#[derive(Debug, Deserialize)]
struct CheckResponse {
    #[serde(default)]
    results: Vec<WireResult>,
}

/// One result as returned by the API. Missing or null flags count as false.
#[derive(Debug, Deserialize)]
struct WireResult {
    #[serde(default)]
    on_tps: Option<bool>,
    #[serde(default)]
    on_ctps: Option<bool>,
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Client options.
#[derive(Debug, Clone)]
pub struct CheckerOptions {
    /// Per-request timeout.
    pub timeout: Duration,
    /// Largest batch accepted by [`TpsClient::check_batch`].
    pub max_batch: usize,
}

impl Default for CheckerOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            max_batch: DEFAULT_MAX_BATCH,
        }
    }
}

impl From<&ComplianceConfig> for CheckerOptions {
    fn from(config: &ComplianceConfig) -> Self {
        Self {
            timeout: Duration::from_secs(config.timeout_secs),
            max_batch: config.batch_size.max(1),
        }
    }
}

impl CheckerOptions {
    /// Options for single-number checks, which get a shorter timeout.
    pub fn for_single_checks(config: &ComplianceConfig) -> Self {
        Self {
            timeout: Duration::from_secs(config.single_timeout_secs),
            ..Self::from(config)
        }
    }
}

/// Authenticated client for the compliance check endpoint.
#[derive(Debug, Clone)]
pub struct TpsClient {
    client: Client,
    endpoint: Url,
    api_key: String,
    max_batch: usize,
}

impl TpsClient {
    pub fn new(endpoint: &str, api_key: impl Into<String>, opts: &CheckerOptions) -> Result<Self> {
        let endpoint = Url::parse(endpoint).map_err(|e| {
            TpsyncError::config(format!("invalid compliance endpoint '{endpoint}': {e}"))
        })?;

        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(opts.timeout)
            .build()
            .map_err(|e| TpsyncError::Transport(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint,
            api_key: api_key.into(),
            max_batch: opts.max_batch.max(1),
        })
    }

    pub fn max_batch(&self) -> usize {
        self.max_batch
    }

    /// Check `numbers` in one request.
    ///
    /// The returned results line up with `numbers` index for index. Any
    /// status other than 200, an unparseable body, or a result count that
    /// differs from the request fails the whole batch.
    #[instrument(skip_all, fields(numbers = numbers.len()))]
    pub async fn check_batch(&self, numbers: &[String]) -> Result<Vec<ComplianceResult>> {
        if numbers.is_empty() {
            return Ok(Vec::new());
        }
        if numbers.len() > self.max_batch {
            return Err(TpsyncError::validation(format!(
                "batch of {} numbers exceeds the maximum of {}",
                numbers.len(),
                self.max_batch
            )));
        }

        let response = self
            .client
            .post(self.endpoint.clone())
            .header("Authorization", &self.api_key)
            .header("check-tps", "true")
            .header("check-ctps", "true")
            .json(&CheckRequest {
                phone_numbers: numbers,
            })
            .send()
            .await
            .map_err(|e| TpsyncError::Transport(format!("{}: {e}", self.endpoint)))?;

        let status = response.status();
        let body = response.text().await.map_err(|e| {
            TpsyncError::Transport(format!("{}: failed to read body: {e}", self.endpoint))
        })?;

        if status != StatusCode::OK {
            return Err(TpsyncError::upstream(SERVICE, status.as_u16(), &body));
        }

        let parsed: CheckResponse = serde_json::from_str(&body)
            .map_err(|e| TpsyncError::malformed(format!("compliance response: {e}")))?;

        if parsed.results.len() != numbers.len() {
            return Err(TpsyncError::malformed(format!(
                "compliance API returned {} results for {} numbers",
                parsed.results.len(),
                numbers.len()
            )));
        }

        let results: Vec<ComplianceResult> = numbers
            .iter()
            .zip(parsed.results)
            .map(|(number, wire)| ComplianceResult {
                phone_number: number.clone(),
                on_tps: wire.on_tps.unwrap_or(false),
                on_ctps: wire.on_ctps.unwrap_or(false),
            })
            .collect();

        debug!(
            listed = results.iter().filter(|r| r.on_tps || r.on_ctps).count(),
            "batch checked"
        );
        Ok(results)
    }

    /// Check a single number, swallowing failures.
    ///
    /// Used by the webhook path: any error or empty answer is logged and
    /// reported as `None`, never retried.
    pub async fn check_one(&self, number: &str) -> Option<ComplianceResult> {
        match self.check_batch(&[number.to_string()]).await {
            Ok(mut results) => results.pop(),
            Err(e) => {
                warn!(error = %e, "single-number compliance check failed");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

    const KEY: &str = "tps-test-key";

    /// Answers each request positionally: numbers in `listed` are on TPS.
    #[derive(Clone)]
    struct Positional {
        listed: HashSet<String>,
        calls: Arc<AtomicUsize>,
    }

    impl Respond for Positional {
        fn respond(&self, request: &Request) -> ResponseTemplate {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let body: serde_json::Value = request.body_json().expect("json request");
            let results: Vec<_> = body["phone_numbers"]
                .as_array()
                .expect("phone_numbers array")
                .iter()
                .map(|n| {
                    let listed = self.listed.contains(n.as_str().unwrap_or_default());
                    serde_json::json!({ "on_tps": listed, "on_ctps": false })
                })
                .collect();
            ResponseTemplate::new(200).set_body_json(serde_json::json!({ "results": results }))
        }
    }

    fn client_for(server: &MockServer, max_batch: usize) -> TpsClient {
        let opts = CheckerOptions {
            max_batch,
            ..Default::default()
        };
        TpsClient::new(&format!("{}/check", server.uri()), KEY, &opts).unwrap()
    }

    fn numbers(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[tokio::test]
    async fn check_batch_sends_expected_request() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/check"))
            .and(header("authorization", KEY))
            .and(header("check-tps", "true"))
            .and(header("check-ctps", "true"))
            .and(wiremock::matchers::body_json(serde_json::json!({
                "phone_numbers": ["02079460000", "07700900123"]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "results": [
                    { "on_tps": false, "on_ctps": true },
                    { "on_tps": false, "on_ctps": false }
                ]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server, 10);
        let results = client
            .check_batch(&numbers(&["02079460000", "07700900123"]))
            .await
            .unwrap();

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].phone_number, "02079460000");
        assert!(results[0].on_ctps);
        assert_eq!(results[0].status(), tpsync_shared::TpsStatus::Listed);
        assert_eq!(results[1].status(), tpsync_shared::TpsStatus::NotListed);
    }

    #[tokio::test]
    async fn results_are_attributed_by_position() {
        let server = MockServer::start().await;
        // Same number twice with different verdicts: only position matters.
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "results": [
                    { "on_tps": true, "on_ctps": false, "phone_number": "0000" },
                    { "on_tps": false, "on_ctps": false, "phone_number": "0000" },
                    { "on_tps": null }
                ]
            })))
            .mount(&server)
            .await;

        let client = client_for(&server, 10);
        let batch = numbers(&["0201", "0201", "0202"]);
        let results = client.check_batch(&batch).await.unwrap();

        assert_eq!(results[0].phone_number, "0201");
        assert!(results[0].on_tps);
        assert_eq!(results[1].phone_number, "0201");
        assert!(!results[1].on_tps);
        assert_eq!(results[2].phone_number, "0202");
        assert!(!results[2].on_tps && !results[2].on_ctps);
    }

    #[tokio::test]
    async fn positional_responder_round_trip() {
        let server = MockServer::start().await;
        let calls = Arc::new(AtomicUsize::new(0));
        Mock::given(method("POST"))
            .respond_with(Positional {
                listed: HashSet::from(["0203".to_string()]),
                calls: calls.clone(),
            })
            .mount(&server)
            .await;

        let client = client_for(&server, 10);
        let results = client
            .check_batch(&numbers(&["0201", "0202", "0203"]))
            .await
            .unwrap();
        let listed: Vec<_> = results.iter().map(|r| r.on_tps).collect();
        assert_eq!(listed, vec![false, false, true]);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn non_200_is_hard_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(402).set_body_string("insufficient credit"))
            .mount(&server)
            .await;

        let client = client_for(&server, 10);
        let err = client.check_batch(&numbers(&["0201"])).await.unwrap_err();
        match err {
            TpsyncError::UpstreamStatus { service, status, body } => {
                assert_eq!(service, "compliance API");
                assert_eq!(status, 402);
                assert_eq!(body, "insufficient credit");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn result_count_mismatch_is_malformed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({ "results": [{ "on_tps": true }] })),
            )
            .mount(&server)
            .await;

        let client = client_for(&server, 10);
        let err = client
            .check_batch(&numbers(&["0201", "0202"]))
            .await
            .unwrap_err();
        assert!(matches!(err, TpsyncError::MalformedPayload { .. }));
    }

    #[tokio::test]
    async fn oversized_batch_is_rejected_without_request() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let client = client_for(&server, 2);
        let err = client
            .check_batch(&numbers(&["1", "2", "3"]))
            .await
            .unwrap_err();
        assert!(matches!(err, TpsyncError::Validation { .. }));
        assert!(client.check_batch(&[]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn check_one_swallows_failures() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let client = client_for(&server, 10);
        assert!(client.check_one("0201").await.is_none());
    }

    #[tokio::test]
    async fn check_one_empty_results_is_none() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "results": [] })))
            .mount(&server)
            .await;

        let client = client_for(&server, 10);
        assert!(client.check_one("0201").await.is_none());
    }

    #[tokio::test]
    async fn check_one_returns_result() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "results": [{ "on_tps": true, "on_ctps": true }]
            })))
            .mount(&server)
            .await;

        let client = client_for(&server, 10);
        let result = client.check_one("07700900123").await.unwrap();
        assert_eq!(result.phone_number, "07700900123");
        assert_eq!(result.status(), tpsync_shared::TpsStatus::Listed);
    }

    #[test]
    fn configured_batch_size_sets_client_limit() {
        let config = ComplianceConfig {
            batch_size: 15_000,
            ..Default::default()
        };
        let client =
            TpsClient::new("https://tps.example/check", KEY, &CheckerOptions::from(&config)).unwrap();
        assert_eq!(client.max_batch(), 15_000);
    }

    #[test]
    fn single_check_options_use_short_timeout() {
        let config = ComplianceConfig {
            batch_size: 500,
            ..Default::default()
        };
        let opts = CheckerOptions::for_single_checks(&config);
        assert_eq!(opts.timeout, Duration::from_secs(10));
        assert_eq!(opts.max_batch, 500);
        assert_eq!(CheckerOptions::from(&config).timeout, Duration::from_secs(30));
    }

    #[tokio::test]
    async fn slow_single_check_times_out_to_none() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({ "results": [{ "on_tps": true }] }))
                    .set_delay(Duration::from_millis(500)),
            )
            .mount(&server)
            .await;

        let opts = CheckerOptions {
            timeout: Duration::from_millis(50),
            ..Default::default()
        };
        let client = TpsClient::new(&format!("{}/check", server.uri()), KEY, &opts).unwrap();
        assert!(client.check_one("0201").await.is_none());
    }
}
