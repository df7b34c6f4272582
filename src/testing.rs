use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use crate::{Client, Config, ReadCacheConfig, RetryConfig};

/// Create a test client configured to use a wiremock server.
/// Disables retries by default for predictable test behavior.
pub fn test_client(base_url: &str) -> Client {
    Client::new(Config {
        base_url: Some(base_url.to_string()),
        access_token: Some("test-token".to_string()),
        retry: Some(RetryConfig::disabled()),
        ..Default::default()
    })
    .expect("client")
}

/// Like [`test_client`] but every GET reaches the server.
pub fn test_client_uncached(base_url: &str) -> Client {
    Client::new(Config {
        base_url: Some(base_url.to_string()),
        retry: Some(RetryConfig::disabled()),
        read_cache: Some(ReadCacheConfig::no_store()),
        ..Default::default()
    })
    .expect("client")
}

/// Format one SSE frame carrying a JSON payload.
pub fn sse_frame(data: &str) -> String {
    format!("data: {data}\n\n")
}

/// Start a local server answering one request with a chunked
/// `text/event-stream` body; each step's text is written as its own chunk.
pub async fn start_chunked_sse_server(
    steps: Vec<(Duration, String)>,
    finish_after: Option<Duration>,
) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");

    tokio::spawn(async move {
        let (mut socket, _) = match listener.accept().await {
            Ok(conn) => conn,
            Err(_) => return,
        };

        // Drain the request headers and body.
        let mut buf = [0u8; 4096];
        let mut received = Vec::new();
        loop {
            let n = match socket.read(&mut buf).await {
                Ok(n) => n,
                Err(_) => return,
            };
            if n == 0 {
                return;
            }
            received.extend_from_slice(&buf[..n]);
            if let Some(end) = received.windows(4).position(|w| w == b"\r\n\r\n") {
                let head = String::from_utf8_lossy(&received[..end]).to_ascii_lowercase();
                let body_len = head
                    .lines()
                    .find_map(|line| line.strip_prefix("content-length:"))
                    .and_then(|v| v.trim().parse::<usize>().ok())
                    .unwrap_or(0);
                if received.len() >= end + 4 + body_len {
                    break;
                }
            }
        }

        let headers = concat!(
            "HTTP/1.1 200 OK\r\n",
            "Content-Type: text/event-stream\r\n",
            "Cache-Control: no-cache\r\n",
            "X-Request-Id: req-stream\r\n",
            "Transfer-Encoding: chunked\r\n",
            "\r\n"
        );
        if socket.write_all(headers.as_bytes()).await.is_err() {
            return;
        }

        for (delay, text) in steps {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            if text.is_empty() {
                continue;
            }
            let mut chunk = format!("{:X}\r\n", text.len()).into_bytes();
            chunk.extend_from_slice(text.as_bytes());
            chunk.extend_from_slice(b"\r\n");
            if socket.write_all(&chunk).await.is_err() {
                return;
            }
            let _ = socket.flush().await;
        }

        if let Some(delay) = finish_after {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
        }

        let _ = socket.write_all(b"0\r\n\r\n").await;
    });

    format!("http://{}", addr)
}

/// Start a local SSE server that immediately emits all frames.
pub async fn start_sse_server(frames: Vec<String>) -> String {
    let steps = frames
        .into_iter()
        .map(|frame| (Duration::from_millis(0), sse_frame(&frame)))
        .collect();
    start_chunked_sse_server(steps, None).await
}
