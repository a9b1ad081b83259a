//! WebSocket connector over `tokio-tungstenite`.
//!
//! Maps the configuration surface onto the connection: http(s) schemes are
//! upgraded to ws(s), the `/stream` path is appended, TLS options become a
//! `native_tls::TlsConnector`, and an optional outbound HTTP proxy is
//! traversed with a CONNECT tunnel before the WebSocket handshake.

use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{
    Connector as TlsMode, MaybeTlsStream, WebSocketStream, client_async_tls_with_config,
    connect_async_tls_with_config,
};
use tracing::debug;
use url::Url;

use relay_core::errors::TransportError;
use relay_settings::{BridgeSettings, TlsVersion};

use crate::transport::{Connector, TransportMessage, TransportSink, TransportStream};

type WsWebSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Production [`Connector`] for one configured remote endpoint.
pub struct WsConnector {
    endpoint: Url,
    timeout: Option<Duration>,
    tls: native_tls::TlsConnector,
    proxy: Option<(String, u16)>,
}

impl WsConnector {
    /// Build a connector from settings. Fails on an unparseable URL or
    /// unusable TLS material.
    pub fn from_settings(settings: &BridgeSettings) -> Result<Self, TransportError> {
        let endpoint = stream_endpoint(&settings.ad_url)?;
        let tls = build_tls(settings)?;
        let proxy = match (&settings.http_proxy_host, settings.http_proxy_port) {
            (Some(host), Some(port)) => Some((host.clone(), port)),
            (Some(host), None) => Some((host.clone(), 8080)),
            _ => None,
        };
        Ok(Self {
            endpoint,
            timeout: settings.timeout.map(Duration::from_secs),
            tls,
            proxy,
        })
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(
        &self,
    ) -> Result<(Box<dyn TransportSink>, Box<dyn TransportStream>), TransportError> {
        let attempt = self.open();
        let ws = match self.timeout {
            Some(timeout) => tokio::time::timeout(timeout, attempt)
                .await
                .map_err(|_| TransportError::Connect("connect timed out".to_string()))??,
            None => attempt.await?,
        };

        let (sink, stream) = ws.split();
        Ok((Box::new(WsSink { sink }), Box::new(WsRecv { stream })))
    }
}

impl WsConnector {
    async fn open(&self) -> Result<WsWebSocket, TransportError> {
        let connector = Some(TlsMode::NativeTls(self.tls.clone()));

        if let Some((proxy_host, proxy_port)) = &self.proxy {
            let tcp = connect_via_proxy(&self.endpoint, proxy_host, *proxy_port).await?;
            let (ws, _) =
                client_async_tls_with_config(self.endpoint.as_str(), tcp, None, connector)
                    .await
                    .map_err(|e| TransportError::Connect(e.to_string()))?;
            return Ok(ws);
        }

        let (ws, _) =
            connect_async_tls_with_config(self.endpoint.as_str(), None, false, connector)
                .await
                .map_err(|e| TransportError::Connect(e.to_string()))?;
        Ok(ws)
    }
}

/// Upgrade the configured base URL to its socket equivalent and append the
/// `/stream` path.
pub fn stream_endpoint(ad_url: &str) -> Result<Url, TransportError> {
    let upgraded = if let Some(rest) = ad_url.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = ad_url.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        ad_url.to_string()
    };
    let base = upgraded.trim_end_matches('/');
    Url::parse(&format!("{base}/stream")).map_err(|e| TransportError::InvalidUrl(e.to_string()))
}

fn build_tls(settings: &BridgeSettings) -> Result<native_tls::TlsConnector, TransportError> {
    let mut builder = native_tls::TlsConnector::builder();

    if !settings.cert_verify {
        let _ = builder.danger_accept_invalid_certs(true);
    }
    if !settings.check_hostname {
        let _ = builder.danger_accept_invalid_hostnames(true);
    }

    let _ = builder.min_protocol_version(match settings.tls_version {
        TlsVersion::V1_0 => Some(native_tls::Protocol::Tlsv10),
        TlsVersion::V1_1 => Some(native_tls::Protocol::Tlsv11),
        TlsVersion::V1_2 => Some(native_tls::Protocol::Tlsv12),
        TlsVersion::Auto => None,
    });

    if let Some(path) = &settings.ca_certs {
        let pem = std::fs::read(path).map_err(|e| TransportError::Tls(e.to_string()))?;
        let cert = native_tls::Certificate::from_pem(&pem)
            .map_err(|e| TransportError::Tls(e.to_string()))?;
        let _ = builder.add_root_certificate(cert);
    }

    if let Some(dir) = &settings.ca_cert_path {
        let entries = std::fs::read_dir(dir).map_err(|e| TransportError::Tls(e.to_string()))?;
        for entry in entries.flatten() {
            let Ok(pem) = std::fs::read(entry.path()) else {
                continue;
            };
            if let Ok(cert) = native_tls::Certificate::from_pem(&pem) {
                let _ = builder.add_root_certificate(cert);
            }
        }
    }

    if let (Some(cert_path), Some(key_path)) = (&settings.ssl_certificate, &settings.ssl_key) {
        let cert = std::fs::read(cert_path).map_err(|e| TransportError::Tls(e.to_string()))?;
        let key = std::fs::read(key_path).map_err(|e| TransportError::Tls(e.to_string()))?;
        let identity = native_tls::Identity::from_pkcs8(&cert, &key)
            .map_err(|e| TransportError::Tls(e.to_string()))?;
        let _ = builder.identity(identity);
    }

    builder.build().map_err(|e| TransportError::Tls(e.to_string()))
}

/// Open a TCP stream to the endpoint through an HTTP CONNECT proxy.
async fn connect_via_proxy(
    endpoint: &Url,
    proxy_host: &str,
    proxy_port: u16,
) -> Result<TcpStream, TransportError> {
    let host = endpoint
        .host_str()
        .ok_or_else(|| TransportError::InvalidUrl("endpoint has no host".to_string()))?;
    let port = endpoint
        .port_or_known_default()
        .ok_or_else(|| TransportError::InvalidUrl("endpoint has no port".to_string()))?;

    let mut tcp = TcpStream::connect((proxy_host, proxy_port))
        .await
        .map_err(|e| TransportError::Connect(format!("proxy connect: {e}")))?;

    let connect = format!("CONNECT {host}:{port} HTTP/1.1\r\nHost: {host}:{port}\r\n\r\n");
    tcp.write_all(connect.as_bytes())
        .await
        .map_err(|e| TransportError::Connect(format!("proxy handshake: {e}")))?;

    // Read the proxy status line and headers.
    let mut response = Vec::new();
    let mut byte = [0u8; 1];
    while !response.ends_with(b"\r\n\r\n") {
        let n = tcp
            .read(&mut byte)
            .await
            .map_err(|e| TransportError::Connect(format!("proxy handshake: {e}")))?;
        if n == 0 {
            return Err(TransportError::Connect(
                "proxy closed during handshake".to_string(),
            ));
        }
        response.extend_from_slice(&byte);
        if response.len() > 8192 {
            return Err(TransportError::Connect(
                "oversized proxy response".to_string(),
            ));
        }
    }

    let status = String::from_utf8_lossy(&response);
    let ok = status
        .lines()
        .next()
        .is_some_and(|line| line.contains(" 200 ") || line.ends_with(" 200"));
    if !ok {
        return Err(TransportError::Connect(format!(
            "proxy refused CONNECT: {}",
            status.lines().next().unwrap_or_default()
        )));
    }
    debug!(%host, port, "proxy tunnel established");
    Ok(tcp)
}

fn map_ws_error(err: &tokio_tungstenite::tungstenite::Error) -> TransportError {
    use tokio_tungstenite::tungstenite::Error;
    match err {
        Error::ConnectionClosed | Error::AlreadyClosed => TransportError::Closed,
        other => TransportError::Io(other.to_string()),
    }
}

struct WsSink {
    sink: SplitSink<WsWebSocket, Message>,
}

#[async_trait]
impl TransportSink for WsSink {
    async fn send_text(&mut self, text: String) -> Result<(), TransportError> {
        self.sink
            .send(Message::Text(text.into()))
            .await
            .map_err(|e| map_ws_error(&e))
    }

    async fn send_binary(&mut self, bytes: Vec<u8>) -> Result<(), TransportError> {
        self.sink
            .send(Message::Binary(bytes.into()))
            .await
            .map_err(|e| map_ws_error(&e))
    }

    async fn close(&mut self) {
        let _ = self.sink.close().await;
    }
}

struct WsRecv {
    stream: SplitStream<WsWebSocket>,
}

#[async_trait]
impl TransportStream for WsRecv {
    async fn recv(&mut self) -> Result<TransportMessage, TransportError> {
        loop {
            match self.stream.next().await {
                None => return Err(TransportError::Closed),
                Some(Err(e)) => return Err(map_ws_error(&e)),
                Some(Ok(Message::Text(text))) => {
                    return Ok(TransportMessage::Text(text.to_string()));
                }
                Some(Ok(Message::Binary(bytes))) => {
                    return Ok(TransportMessage::Binary(bytes.to_vec()));
                }
                Some(Ok(Message::Close(_))) => return Err(TransportError::Closed),
                // Control frames are handled by tungstenite itself.
                Some(Ok(_)) => continue,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn https_upgrades_to_wss() {
        let url = stream_endpoint("https://remote:5050").unwrap();
        assert_eq!(url.as_str(), "wss://remote:5050/stream");
    }

    #[test]
    fn http_upgrades_to_ws() {
        let url = stream_endpoint("http://remote:5050").unwrap();
        assert_eq!(url.as_str(), "ws://remote:5050/stream");
    }

    #[test]
    fn trailing_slash_does_not_double_path() {
        let url = stream_endpoint("http://remote:5050/").unwrap();
        assert_eq!(url.as_str(), "ws://remote:5050/stream");
    }

    #[test]
    fn ws_scheme_passes_through() {
        let url = stream_endpoint("ws://remote:5050").unwrap();
        assert_eq!(url.as_str(), "ws://remote:5050/stream");
    }

    #[test]
    fn garbage_url_is_rejected() {
        assert!(stream_endpoint("not a url").is_err());
    }
}
