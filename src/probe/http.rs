//! HTTP probe implementation.

use std::future::Future;
use std::time::{Duration, Instant};

use super::{ProbeError, ProbeRequest, ProbeResponse, Prober};

/// Probes over reqwest, one client per request so each carries its own timeout.
#[derive(Debug, Clone)]
pub struct HttpProber {
    /// Upper bound for the random start delay.
    pub max_jitter: Duration,
}

impl Default for HttpProber {
    fn default() -> Self {
        Self {
            max_jitter: Duration::from_millis(100),
        }
    }
}

impl HttpProber {
    pub fn without_jitter() -> Self {
        Self {
            max_jitter: Duration::ZERO,
        }
    }
}

impl Prober for HttpProber {
    fn probe(&self, request: ProbeRequest) -> impl Future<Output = ProbeResponse> + Send {
        let max_jitter = self.max_jitter;
        async move {
            // Add jitter to avoid thundering herd
            let max_ms = max_jitter.as_millis() as u64;
            if max_ms > 0 {
                let jitter = rand::random::<u64>() % max_ms;
                tokio::time::sleep(Duration::from_millis(jitter)).await;
            }

            match run_http_probe(&request).await {
                Ok(response) => response,
                Err(e) => {
                    tracing::debug!("HttpProber: {} {} failed: {}", request.method, request.url, e);
                    ProbeResponse::failed(e)
                }
            }
        }
    }
}

/// Run one HTTP exchange. TTFB is measured to the response headers, latency
/// to the end of the body.
pub async fn run_http_probe(request: &ProbeRequest) -> Result<ProbeResponse, ProbeError> {
    let method = reqwest::Method::from_bytes(request.method.as_bytes())
        .map_err(|_| ProbeError::Config(format!("invalid method: {}", request.method)))?;

    let client = reqwest::Client::builder()
        .timeout(request.timeout)
        .build()
        .map_err(|e| ProbeError::Network(e.to_string()))?;

    let mut builder = client.request(method, &request.url);
    for (name, value) in &request.headers {
        builder = builder.header(name.as_str(), value.as_str());
    }

    let timeout = request.timeout;
    let classify = move |e: reqwest::Error| {
        if e.is_timeout() {
            ProbeError::Timeout(timeout)
        } else {
            ProbeError::Network(e.to_string())
        }
    };

    let start = Instant::now();
    let response = builder.send().await.map_err(classify)?;
    let ttfb = start.elapsed();
    let status = response.status().as_u16();

    // Read the full body to measure complete transfer time
    let body = response.text().await.map_err(classify)?;
    let latency = start.elapsed();

    Ok(ProbeResponse {
        http_status: Some(status),
        latency_seconds: Some(latency.as_secs_f64()),
        ttfb_seconds: Some(ttfb.as_secs_f64()),
        body,
        error: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{routing::get, Router};
    use std::collections::BTreeMap;

    fn request(url: &str) -> ProbeRequest {
        ProbeRequest {
            url: url.to_string(),
            method: "GET".to_string(),
            headers: BTreeMap::new(),
            timeout: Duration::from_millis(500),
        }
    }

    async fn serve() -> String {
        let app = Router::new()
            .route("/ok", get(|| async { "service healthy" }))
            .route(
                "/missing",
                get(|| async { (axum::http::StatusCode::NOT_FOUND, "gone") }),
            );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn test_http_probe_invalid_url() {
        let response = HttpProber::without_jitter()
            .probe(request("http://256.256.256.256"))
            .await;
        assert!(response.error.is_some());
        assert!(response.http_status.is_none());
        assert!(response.latency_seconds.is_none());
    }

    #[tokio::test]
    async fn test_http_probe_reads_status_and_body() {
        let base = serve().await;

        let ok = HttpProber::without_jitter()
            .probe(request(&format!("{}/ok", base)))
            .await;
        assert_eq!(ok.http_status, Some(200));
        assert_eq!(ok.body, "service healthy");
        assert!(ok.ttfb_seconds.unwrap() <= ok.latency_seconds.unwrap());

        let missing = HttpProber::without_jitter()
            .probe(request(&format!("{}/missing", base)))
            .await;
        assert_eq!(missing.http_status, Some(404));
        assert!(missing.error.is_none());
    }

    #[tokio::test]
    async fn test_http_probe_rejects_bad_method() {
        let mut req = request("http://127.0.0.1:1");
        req.method = "NOT A METHOD".to_string();
        let result = run_http_probe(&req).await;
        assert!(matches!(result, Err(ProbeError::Config(_))));
    }
}
