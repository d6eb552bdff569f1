//! Probe seam and its HTTP implementation.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use http::{Method, StatusCode};
use tokio::time::Instant;
use tracing::debug;

use cutover_core::{CheckKind, CheckSpec, SmokeStep};

use crate::checker::ProbeResult;
use crate::http::{self as client, HttpRequest};

/// Boxed future returned by [`Probe::run`].
pub type ProbeFuture<'a> = Pin<Box<dyn Future<Output = ProbeResult> + Send + 'a>>;

/// Executes one check against an environment endpoint, injected for
/// testability.
pub trait Probe: Send + Sync {
    /// Run `check` against `endpoint` (a base URL), finishing within
    /// `timeout`.
    fn run<'a>(&'a self, endpoint: &'a str, check: &'a CheckSpec, timeout: Duration)
    -> ProbeFuture<'a>;
}

/// Probe that speaks HTTP/1.1 to the environment.
#[derive(Debug, Clone, Default)]
pub struct HttpProbe;

impl HttpProbe {
    pub fn new() -> Self {
        Self
    }
}

impl Probe for HttpProbe {
    fn run<'a>(
        &'a self,
        endpoint: &'a str,
        check: &'a CheckSpec,
        timeout: Duration,
    ) -> ProbeFuture<'a> {
        Box::pin(async move {
            match &check.kind {
                CheckKind::Http {
                    path,
                    expect_status,
                } => http_check(endpoint, path, *expect_status, timeout).await,
                CheckKind::Smoke { steps } => smoke_suite(endpoint, steps, timeout).await,
            }
        })
    }
}

/// Single GET against `endpoint + path`.
async fn http_check(
    endpoint: &str,
    path: &str,
    expect_status: Option<u16>,
    timeout: Duration,
) -> ProbeResult {
    let url = join_url(endpoint, path);
    match client::send(HttpRequest::get(&url), timeout).await {
        Ok(resp) => evaluate_status(resp.status, expect_status),
        Err(e) => {
            debug!(error = %e, %url, "health probe failed");
            ProbeResult::failed(e.to_string())
        }
    }
}

/// Run every smoke step in order; the whole suite shares one deadline.
async fn smoke_suite(endpoint: &str, steps: &[SmokeStep], timeout: Duration) -> ProbeResult {
    if steps.is_empty() {
        return ProbeResult::failed("smoke suite has no steps");
    }

    let deadline = Instant::now() + timeout;
    for step in steps {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return ProbeResult::failed(format!("step {:?}: suite timed out", step.name));
        }

        let method = match Method::from_bytes(step.method.to_ascii_uppercase().as_bytes()) {
            Ok(m) => m,
            Err(_) => {
                return ProbeResult::failed(format!(
                    "step {:?}: invalid method {:?}",
                    step.name, step.method
                ));
            }
        };

        let url = join_url(endpoint, &step.path);
        let mut req = HttpRequest::new(method, &url);
        if let Some(body) = &step.body {
            req = req
                .header("content-type", "application/json")
                .body(body.clone());
        }

        let result = match client::send(req, remaining).await {
            Ok(resp) => evaluate_status(resp.status, step.expect_status),
            Err(e) => ProbeResult::failed(e.to_string()),
        };

        match result {
            ProbeResult::Healthy => {
                debug!(step = %step.name, %url, "smoke step passed");
            }
            ProbeResult::Unhealthy { reason } => {
                return ProbeResult::unhealthy(format!("step {:?}: {reason}", step.name));
            }
            ProbeResult::Failed { reason } => {
                return ProbeResult::failed(format!("step {:?}: {reason}", step.name));
            }
        }
    }
    ProbeResult::Healthy
}

/// 2xx passes unless a specific status is expected.
fn evaluate_status(status: StatusCode, expect_status: Option<u16>) -> ProbeResult {
    let ok = match expect_status {
        Some(code) => status.as_u16() == code,
        None => status.is_success(),
    };
    if ok {
        ProbeResult::Healthy
    } else {
        match expect_status {
            Some(code) => ProbeResult::unhealthy(format!("status {status}, expected {code}")),
            None => ProbeResult::unhealthy(format!("status {status}")),
        }
    }
}

fn join_url(endpoint: &str, path: &str) -> String {
    let base = endpoint.trim_end_matches('/');
    if path.starts_with('/') {
        format!("{base}{path}")
    } else {
        format!("{base}/{path}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Answer each accepted connection with the next canned status line.
    async fn serve_statuses(statuses: Vec<&'static str>) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            for status in statuses {
                let (mut sock, _) = listener.accept().await.unwrap();
                drain_request(&mut sock).await;
                let resp = format!(
                    "HTTP/1.1 {status}\r\ncontent-length: 0\r\nconnection: close\r\n\r\n"
                );
                let _ = sock.write_all(resp.as_bytes()).await;
                let _ = sock.shutdown().await;
            }
        });
        format!("http://{addr}")
    }

    /// Consume one request (headers plus `content-length` body bytes).
    async fn drain_request(sock: &mut tokio::net::TcpStream) {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 1024];
        loop {
            let n = match sock.read(&mut chunk).await {
                Ok(0) | Err(_) => return,
                Ok(n) => n,
            };
            buf.extend_from_slice(&chunk[..n]);
            let text = String::from_utf8_lossy(&buf).to_ascii_lowercase();
            if let Some(head_end) = text.find("\r\n\r\n") {
                let body_len = text[..head_end]
                    .lines()
                    .find_map(|l| l.strip_prefix("content-length:"))
                    .and_then(|v| v.trim().parse::<usize>().ok())
                    .unwrap_or(0);
                if buf.len() >= head_end + 4 + body_len {
                    return;
                }
            }
        }
    }

    fn step(name: &str, path: &str) -> SmokeStep {
        SmokeStep {
            name: name.to_string(),
            method: "GET".to_string(),
            path: path.to_string(),
            body: None,
            expect_status: None,
        }
    }

    #[tokio::test]
    async fn http_check_passes_on_2xx() {
        let endpoint = serve_statuses(vec!["204 No Content"]).await;
        let check = CheckSpec::http("liveness", "/health");
        let result = HttpProbe::new()
            .run(&endpoint, &check, Duration::from_secs(2))
            .await;
        assert_eq!(result, ProbeResult::Healthy);
    }

    #[tokio::test]
    async fn http_check_fails_on_non_2xx() {
        let endpoint = serve_statuses(vec!["503 Service Unavailable"]).await;
        let check = CheckSpec::http("readiness", "/ready");
        let result = HttpProbe::new()
            .run(&endpoint, &check, Duration::from_secs(2))
            .await;
        assert!(matches!(result, ProbeResult::Unhealthy { .. }));
        assert!(result.reason().unwrap().contains("503"));
    }

    #[tokio::test]
    async fn http_check_to_closed_port_returns_failed() {
        let check = CheckSpec::http("liveness", "/health");
        let result = HttpProbe::new()
            .run("http://127.0.0.1:1", &check, Duration::from_millis(200))
            .await;
        assert!(matches!(result, ProbeResult::Failed { .. }));
    }

    #[tokio::test]
    async fn expected_status_overrides_2xx_rule() {
        let endpoint = serve_statuses(vec!["200 OK"]).await;
        let check = CheckSpec {
            id: "auth".to_string(),
            kind: CheckKind::Http {
                path: "/admin".to_string(),
                expect_status: Some(401),
            },
        };
        let result = HttpProbe::new()
            .run(&endpoint, &check, Duration::from_secs(2))
            .await;
        assert!(matches!(result, ProbeResult::Unhealthy { .. }));
    }

    #[tokio::test]
    async fn smoke_suite_stops_at_first_failing_step() {
        let endpoint = serve_statuses(vec!["200 OK", "500 Internal Server Error"]).await;
        let check = CheckSpec::smoke(
            "smoke",
            vec![step("ready", "/ready"), step("chat", "/chat"), step("never", "/x")],
        );
        let result = HttpProbe::new()
            .run(&endpoint, &check, Duration::from_secs(2))
            .await;
        let reason = result.reason().unwrap().to_string();
        assert!(reason.contains("\"chat\""), "{reason}");
        assert!(reason.contains("500"), "{reason}");
    }

    #[tokio::test]
    async fn smoke_suite_passes_when_all_steps_pass() {
        let endpoint = serve_statuses(vec!["200 OK", "201 Created"]).await;
        let mut chat = step("chat", "/chat");
        chat.method = "post".to_string();
        chat.body = Some(r#"{"message":"ping"}"#.to_string());
        let check = CheckSpec::smoke("smoke", vec![step("ready", "/ready"), chat]);
        let result = HttpProbe::new()
            .run(&endpoint, &check, Duration::from_secs(2))
            .await;
        assert_eq!(result, ProbeResult::Healthy);
    }

    #[tokio::test]
    async fn empty_smoke_suite_fails_closed() {
        let check = CheckSpec::smoke("smoke", vec![]);
        let result = HttpProbe::new()
            .run("http://127.0.0.1:1", &check, Duration::from_secs(1))
            .await;
        assert!(matches!(result, ProbeResult::Failed { .. }));
    }

    #[test]
    fn join_url_handles_slashes() {
        assert_eq!(join_url("http://a:1/", "/ready"), "http://a:1/ready");
        assert_eq!(join_url("http://a:1", "ready"), "http://a:1/ready");
    }
}
