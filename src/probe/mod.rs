//! Probing: HTTP execution, request resolution and outcome evaluation.

mod evaluate;
mod http;
mod request;
mod tracker;

pub use evaluate::*;
pub use http::*;
pub use request::*;
pub use tracker::*;

use std::collections::BTreeMap;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;

/// Probe error types.
#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("probe timed out after {0:?}")]
    Timeout(Duration),
    #[error("network error: {0}")]
    Network(String),
    #[error("invalid configuration: {0}")]
    Config(String),
}

/// A fully resolved HTTP check.
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeRequest {
    pub url: String,
    pub method: String,
    pub headers: BTreeMap<String, String>,
    pub timeout: Duration,
}

/// What came back. `error` is set for transport failures and timeouts.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProbeResponse {
    pub http_status: Option<u16>,
    pub latency_seconds: Option<f64>,
    pub ttfb_seconds: Option<f64>,
    pub body: String,
    pub error: Option<String>,
}

impl ProbeResponse {
    pub fn failed(error: impl ToString) -> Self {
        Self {
            error: Some(error.to_string()),
            ..Default::default()
        }
    }
}

/// Executes checks. Implementations must honor `request.timeout`.
pub trait Prober: Send + Sync + 'static {
    fn probe(&self, request: ProbeRequest) -> impl Future<Output = ProbeResponse> + Send;
}


#[cfg(test)]
mod tests {
    use super::testing::ScriptedProber;
    use super::*;

    fn request(url: &str) -> ProbeRequest {
        ProbeRequest {
            url: url.to_string(),
            method: "GET".to_string(),
            headers: BTreeMap::new(),
            timeout: Duration::from_secs(1),
        }
    }

    #[test]
    fn test_scripted_prober_answers_by_url() {
        let prober = ScriptedProber::default();
        prober.respond("http://down.test", ProbeResponse::failed("refused"));

        let down = tokio_test::block_on(prober.probe(request("http://down.test")));
        assert_eq!(down.error.as_deref(), Some("refused"));
        assert_eq!(down.http_status, None);

        let fallback = tokio_test::block_on(prober.probe(request("http://other.test")));
        assert_eq!(fallback.http_status, Some(200));
        assert_eq!(prober.requests.lock().unwrap().len(), 2);
    }
}
