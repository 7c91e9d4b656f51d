use std::collections::BTreeMap;
use std::time::Duration;

use reqwest::Client;

use crate::error::NetworkError;

/// Status, headers and body of an HTTP response. Header names are lowercase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawResponse {
    pub status: u16,
    pub headers: BTreeMap<String, String>,
    pub body: String,
}

impl RawResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            headers: BTreeMap::new(),
            body: body.into(),
        }
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
    }
}

/// One POST of a JSON body to a chat-completions URL.
///
/// Implementations send exactly one request per call and never retry:
/// retry policy belongs to the caller. An HTTP error status is a successful
/// send; only the absence of a response is an error.
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    async fn send(
        &self,
        url: &str,
        body: &str,
        api_key: &str,
        timeout: Duration,
    ) -> Result<RawResponse, NetworkError>;
}

/// [`Transport`] backed by a shared `reqwest` client.
#[derive(Debug, Clone, Default)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new() -> Self {
        Self {
            client: Client::new(),
        }
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait::async_trait]
impl Transport for HttpTransport {
    async fn send(
        &self,
        url: &str,
        body: &str,
        api_key: &str,
        timeout: Duration,
    ) -> Result<RawResponse, NetworkError> {
        let resp = self
            .client
            .post(url)
            .header("Content-Type", "application/json")
            .header("api-key", api_key)
            .timeout(timeout)
            .body(body.to_string())
            .send()
            .await
            .map_err(|e| network_error(e, timeout))?;

        let status = resp.status().as_u16();
        let headers = resp
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_ascii_lowercase(), v.to_string()))
            })
            .collect();
        // the status line arrived, so a broken body is still an HTTP answer
        let body = match resp.text().await {
            Ok(body) => body,
            Err(e) => {
                log::warn!("Reading response body from {url} failed: {e}");
                format!("<failed to read response body: {e}>")
            }
        };

        log::debug!("POST {url} -> {status}");
        Ok(RawResponse {
            status,
            headers,
            body,
        })
    }
}

fn network_error(err: reqwest::Error, timeout: Duration) -> NetworkError {
    if err.is_timeout() {
        NetworkError::Timeout(timeout)
    } else if err.is_connect() {
        NetworkError::NoResponse(format!("connection failed: {err}"))
    } else {
        NetworkError::NoResponse(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_string, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const KEY: &str = "test-api-key-123456";

    #[tokio::test]
    async fn posts_json_with_api_key_header() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/openai/deployments/gpt-4o/chat/completions"))
            .and(query_param("api-version", "2024-10-21"))
            .and(header("content-type", "application/json"))
            .and(header("api-key", KEY))
            .and(body_string(r#"{"a":1}"#))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("x-request-id", "abc")
                    .set_body_string(r#"{"ok":true}"#),
            )
            .expect(1)
            .mount(&server)
            .await;

        let url = format!(
            "{}/openai/deployments/gpt-4o/chat/completions?api-version=2024-10-21",
            server.uri()
        );
        let resp = HttpTransport::new()
            .send(&url, r#"{"a":1}"#, KEY, Duration::from_secs(5))
            .await
            .unwrap();

        assert_eq!(resp.status, 200);
        assert_eq!(resp.body, r#"{"ok":true}"#);
        assert_eq!(resp.header("X-Request-Id"), Some("abc"));
    }

    #[tokio::test]
    async fn never_sends_bearer_authorization() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        HttpTransport::new()
            .send(&server.uri(), "{}", KEY, Duration::from_secs(5))
            .await
            .unwrap();

        let requests = server.received_requests().await.unwrap();
        assert_eq!(requests.len(), 1);
        assert!(!requests[0].headers.contains_key("authorization"));
    }

    #[tokio::test]
    async fn error_status_is_a_response_not_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).set_body_string("slow down"))
            .expect(1)
            .mount(&server)
            .await;

        let resp = HttpTransport::new()
            .send(&server.uri(), "{}", KEY, Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(resp.status, 429);
        assert_eq!(resp.body, "slow down");
    }

    #[tokio::test]
    async fn slow_server_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
            .mount(&server)
            .await;

        let err = HttpTransport::new()
            .send(&server.uri(), "{}", KEY, Duration::from_millis(100))
            .await
            .unwrap_err();
        assert_eq!(err, NetworkError::Timeout(Duration::from_millis(100)));
    }

    #[tokio::test]
    async fn unreachable_host_is_no_response() {
        // port 9 (discard) on localhost is normally closed
        let err = HttpTransport::new()
            .send("http://127.0.0.1:9/", "{}", KEY, Duration::from_secs(2))
            .await
            .unwrap_err();
        assert!(matches!(err, NetworkError::NoResponse(_)));
    }

    #[tokio::test]
    async fn truncated_body_keeps_status() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 1024];
            while !request.ends_with(b"{}") {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&buf[..n]);
            }
            // promise 100 bytes, deliver 7, hang up
            socket
                .write_all(b"HTTP/1.1 502 Bad Gateway\r\nContent-Length: 100\r\nConnection: close\r\n\r\npartial")
                .await
                .unwrap();
            socket.shutdown().await.unwrap();
        });

        let resp = HttpTransport::new()
            .send(&format!("http://{addr}/"), "{}", KEY, Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(resp.status, 502);
        assert!(resp.body.starts_with("<failed to read response body"));
    }
}
