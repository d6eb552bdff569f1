//! Alertmanager v2 client.
//!
//! Polls `GET /api/v2/alerts` for active, unsilenced alerts carrying a
//! `service` label equal to the Service name. Alert rules are expected to
//! set:
//!
//! - label `severity` (`info`, `warning`, `critical`, `page`)
//! - label `metric` (falls back to `alertname`)
//! - annotations `value` and `threshold` (numeric strings)

use std::collections::HashMap;
use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, warn};

use cutover_core::{AlertSignal, ServiceRef, Severity};

use crate::error::{AlertError, AlertResult};
use crate::source::{AlertFuture, AlertSource};

/// Alert as returned by `/api/v2/alerts` (only the fields we read).
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GettableAlert {
    #[serde(default)]
    labels: HashMap<String, String>,
    #[serde(default)]
    annotations: HashMap<String, String>,
    starts_at: Option<String>,
    status: Option<AlertStatus>,
}

#[derive(Debug, Deserialize)]
struct AlertStatus {
    state: String,
}

const USER_AGENT: &str = concat!("cutover/", env!("CARGO_PKG_VERSION"));

pub struct AlertmanagerSource {
    base_url: String,
    client: reqwest::Client,
}

impl AlertmanagerSource {
    /// Every poll, connect included, must finish within `timeout`.
    pub fn new(base_url: &str, timeout: Duration) -> AlertResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| AlertError::Setup(e.to_string()))?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    fn request(&self, service: &ServiceRef) -> reqwest::RequestBuilder {
        let filter = format!("service=\"{}\"", service.name);
        self.client
            .get(format!("{}/api/v2/alerts", self.base_url))
            .query(&[
                ("active", "true"),
                ("silenced", "false"),
                ("inhibited", "false"),
                ("filter", filter.as_str()),
            ])
    }

    async fn fetch(&self, service: &ServiceRef) -> AlertResult<Vec<AlertSignal>> {
        let resp = self
            .request(service)
            .send()
            .await
            .map_err(|e| AlertError::Transport(e.to_string()))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(AlertError::Status {
                status: status.as_u16(),
                body: resp.text().await.unwrap_or_default(),
            });
        }
        let alerts: Vec<GettableAlert> = resp
            .json()
            .await
            .map_err(|e| AlertError::Decode(e.to_string()))?;
        let signals = to_signals(alerts);
        debug!(service = %service, firing = signals.len(), "polled alertmanager");
        Ok(signals)
    }
}

impl AlertSource for AlertmanagerSource {
    fn firing<'a>(&'a self, service: &'a ServiceRef) -> AlertFuture<'a> {
        Box::pin(self.fetch(service))
    }
}

/// Decode an `/api/v2/alerts` response body into signals.
pub fn parse_alerts(body: &[u8]) -> AlertResult<Vec<AlertSignal>> {
    let alerts: Vec<GettableAlert> =
        serde_json::from_slice(body).map_err(|e| AlertError::Decode(e.to_string()))?;
    Ok(to_signals(alerts))
}

fn to_signals(alerts: Vec<GettableAlert>) -> Vec<AlertSignal> {
    alerts
        .into_iter()
        .filter(|a| a.status.as_ref().is_none_or(|s| s.state == "active"))
        .map(to_signal)
        .collect()
}

fn to_signal(alert: GettableAlert) -> AlertSignal {
    let metric = alert
        .labels
        .get("metric")
        .or_else(|| alert.labels.get("alertname"))
        .cloned()
        .unwrap_or_else(|| "unknown".to_string());
    let severity = alert
        .labels
        .get("severity")
        .map(|s| Severity::from_label(s.as_str()))
        .unwrap_or(Severity::Info);
    let number = |key: &str| {
        alert
            .annotations
            .get(key)
            .and_then(|v| v.trim().parse::<f64>().ok())
            .unwrap_or(0.0)
    };
    let fired_at_ms = alert
        .starts_at
        .as_deref()
        .and_then(|ts| match chrono::DateTime::parse_from_rfc3339(ts) {
            Ok(t) => Some(t.timestamp_millis().max(0) as u64),
            Err(e) => {
                warn!(%metric, starts_at = %ts, error = %e, "unparseable startsAt; treating as now");
                None
            }
        })
        .unwrap_or_else(cutover_core::epoch_millis);

    AlertSignal {
        value: number("value"),
        threshold: number("threshold"),
        metric,
        severity,
        fired_at_ms,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    const PAYLOAD: &str = r#"[
      {
        "labels": {"alertname": "HighErrorRate", "service": "ai-agent", "severity": "critical", "metric": "http_error_rate"},
        "annotations": {"value": "0.12", "threshold": "0.05", "summary": "errors"},
        "startsAt": "2026-03-01T12:00:10Z",
        "status": {"state": "active", "silencedBy": [], "inhibitedBy": []}
      },
      {
        "labels": {"alertname": "SlowResponses", "service": "ai-agent", "severity": "warning"},
        "annotations": {"value": "2.4"},
        "startsAt": "2026-03-01T12:00:00.250+00:00",
        "status": {"state": "active"}
      },
      {
        "labels": {"alertname": "Muted", "severity": "page"},
        "annotations": {},
        "startsAt": "2026-03-01T12:00:00Z",
        "status": {"state": "suppressed"}
      }
    ]"#;

    #[test]
    fn parses_labels_and_annotations() {
        let signals = parse_alerts(PAYLOAD.as_bytes()).unwrap();
        assert_eq!(signals.len(), 2);

        let first = &signals[0];
        assert_eq!(first.metric, "http_error_rate");
        assert_eq!(first.severity, Severity::Critical);
        assert_eq!(first.value, 0.12);
        assert_eq!(first.threshold, 0.05);
        assert_eq!(first.fired_at_ms, 1_772_366_410_000);

        let second = &signals[1];
        assert_eq!(second.metric, "SlowResponses");
        assert_eq!(second.severity, Severity::Warning);
        assert_eq!(second.threshold, 0.0);
        assert_eq!(second.fired_at_ms, 1_772_366_400_250);
    }

    #[test]
    fn rejects_non_array_payload() {
        let err = parse_alerts(br#"{"error":"nope"}"#).unwrap_err();
        assert!(matches!(err, AlertError::Decode(_)));
    }

    #[test]
    fn filter_is_query_encoded() {
        let source = AlertmanagerSource::new("http://am:9093/", Duration::from_secs(1)).unwrap();
        let request = source
            .request(&ServiceRef::new("ai-agents", "ai-agent"))
            .build()
            .unwrap();
        assert_eq!(
            request.url().as_str(),
            "http://am:9093/api/v2/alerts?active=true&silenced=false&inhibited=false&filter=service%3D%22ai-agent%22"
        );
    }

    async fn serve_once(status: &'static str, body: &'static str) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let mut buf = Vec::new();
            let mut chunk = [0u8; 1024];
            while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
                let n = sock.read(&mut chunk).await.unwrap();
                if n == 0 {
                    break;
                }
                buf.extend_from_slice(&chunk[..n]);
            }
            let resp = format!(
                "HTTP/1.1 {status}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                body.len()
            );
            sock.write_all(resp.as_bytes()).await.unwrap();
            let _ = sock.shutdown().await;
            String::from_utf8_lossy(&buf).into_owned()
        });
        (format!("http://{addr}"), handle)
    }

    #[tokio::test]
    async fn polls_alertmanager_over_http() {
        let (url, handle) = serve_once("200 OK", PAYLOAD).await;
        let source = AlertmanagerSource::new(&url, Duration::from_secs(2)).unwrap();
        let signals = source
            .firing(&ServiceRef::new("ai-agents", "ai-agent"))
            .await
            .unwrap();
        assert_eq!(signals.len(), 2);

        let request = handle.await.unwrap();
        assert!(request.starts_with("GET /api/v2/alerts?active=true"), "{request}");
        assert!(request.contains("filter=service%3D%22ai-agent%22"), "{request}");
    }

    #[tokio::test]
    async fn non_2xx_is_an_error() {
        let (url, _handle) = serve_once("503 Service Unavailable", "down").await;
        let source = AlertmanagerSource::new(&url, Duration::from_secs(2)).unwrap();
        let err = source
            .firing(&ServiceRef::new("ai-agents", "ai-agent"))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            AlertError::Status {
                status: 503,
                body: "down".to_string()
            }
        );
    }

    #[tokio::test]
    async fn unreachable_backend_is_transport_error() {
        let source = AlertmanagerSource::new("http://127.0.0.1:1", Duration::from_millis(300)).unwrap();
        let err = source
            .firing(&ServiceRef::new("ai-agents", "ai-agent"))
            .await
            .unwrap_err();
        assert!(matches!(err, AlertError::Transport(_)));
    }
}
