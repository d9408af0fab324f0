//! Request/response transport. Every frame is one POST; the response body is
//! the server's frame. One request is in flight at a time.

use tracing::{debug, warn};

use crate::config::HttpOption;
use crate::core::constants::HTTP_PATH;
use crate::core::{TransportError, TransportEventType};

use super::{DriverContext, HttpRequest, Shared};

fn build_client(option: &HttpOption) -> Result<reqwest::Client, TransportError> {
    let mut builder = reqwest::Client::builder().timeout(option.connect_timeout);
    if option.use_https {
        if let Some(ca_file) = &option.ca_file {
            let pem = std::fs::read(ca_file)?;
            let cert = reqwest::Certificate::from_pem(&pem)
                .map_err(|e| TransportError::Tls(e.to_string()))?;
            builder = builder
                .tls_built_in_root_certs(false)
                .add_root_certificate(cert);
        }
    }
    builder
        .build()
        .map_err(|e| TransportError::Http(format!("failed to create HTTP client: {e}")))
}

fn endpoint_url(use_https: bool, host: &str, port: u16) -> String {
    let scheme = if use_https { "https" } else { "http" };
    format!("{scheme}://{host}:{port}{HTTP_PATH}")
}

async fn post(
    client: &reqwest::Client,
    url: &str,
    request: HttpRequest,
) -> Result<(Vec<(String, String)>, Vec<u8>), TransportError> {
    let mut builder = client.post(url).body(request.body);
    for (key, value) in &request.headers {
        builder = builder.header(key.as_str(), value.as_str());
    }

    let response = builder
        .send()
        .await
        .map_err(|e| TransportError::Http(e.to_string()))?;
    let status = response.status();
    if !status.is_success() {
        return Err(TransportError::HttpStatus(status.as_u16()));
    }

    let headers = response
        .headers()
        .iter()
        .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.as_str().to_string(), v.to_string())))
        .collect();
    let body = response
        .bytes()
        .await
        .map_err(|e| TransportError::Http(e.to_string()))?;
    Ok((headers, body.to_vec()))
}

/// Outcome of one exchange.
enum Exchange {
    Continue,
    Fatal(TransportError),
    Abandon,
}

async fn exchange(
    shared: &Shared,
    client: &reqwest::Client,
    url: &str,
    request: HttpRequest,
) -> Exchange {
    match post(client, url, request).await {
        Ok((headers, body)) => {
            let inbound = shared.core().on_http_response(&headers, body);
            match shared.deliver(inbound) {
                Some(e) => Exchange::Fatal(e),
                None => Exchange::Continue,
            }
        }
        Err(e) => {
            let resumable = shared.core().on_http_failure();
            warn!(error = %e, resumable, "request failed");
            shared.emit(
                TransportEventType::ConnectionFailed,
                Some(e.to_event_error()),
            );
            if resumable {
                Exchange::Continue
            } else {
                Exchange::Abandon
            }
        }
    }
}

pub(crate) async fn run(mut ctx: DriverContext, option: HttpOption) {
    let client = match build_client(&option) {
        Ok(client) => client,
        Err(e) => {
            ctx.shared.connect_failed(e);
            return;
        }
    };
    let url = endpoint_url(option.use_https, &ctx.host, ctx.port);
    debug!(%url, "http transport ready");

    let shared = &ctx.shared;
    if let Err(e) = shared.connected() {
        shared.stopped(Some(e));
        return;
    }

    loop {
        let request = match shared.core().take_http_request() {
            Ok(request) => request,
            Err(e) => {
                shared.stopped(Some(e));
                return;
            }
        };

        match request {
            Some(request) => {
                let outcome = tokio::select! {
                    outcome = exchange(shared, &client, &url, request) => outcome,
                    _ = &mut ctx.shutdown => {
                        shared.stopped(None);
                        return;
                    }
                };
                match outcome {
                    Exchange::Continue => {}
                    Exchange::Fatal(e) => {
                        shared.stopped(Some(e));
                        return;
                    }
                    Exchange::Abandon => {
                        shared.stopped(None);
                        return;
                    }
                }
            }
            None => {
                tokio::select! {
                    _ = shared.wake.notified() => {}
                    _ = &mut ctx.shutdown => {
                        shared.stopped(None);
                        return;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_url() {
        assert_eq!(endpoint_url(false, "127.0.0.1", 8018), "http://127.0.0.1:8018/v1/");
        assert_eq!(endpoint_url(true, "game.example", 8019), "https://game.example:8019/v1/");
    }

    #[test]
    fn test_client_without_tls() {
        assert!(build_client(&HttpOption::default()).is_ok());
    }

    #[tokio::test]
    async fn test_post_reports_status() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 4096];
            let _ = socket.read(&mut buf).await.unwrap();
            socket
                .write_all(b"HTTP/1.1 503 Service Unavailable\r\ncontent-length: 0\r\n\r\n")
                .await
                .unwrap();
        });

        let client = build_client(&HttpOption::default()).unwrap();
        let request = HttpRequest {
            headers: vec![("VER".into(), "1".into())],
            body: b"{}".to_vec(),
        };
        let result = post(&client, &endpoint_url(false, "127.0.0.1", port), request).await;
        assert!(matches!(result, Err(TransportError::HttpStatus(503))));
    }
}
