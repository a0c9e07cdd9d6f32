//! Proxy transport layer
//!
//! Dials targets through the SOCKS proxy, resolving hostnames on the proxy
//! side, and wraps the tunnel in TLS for https targets.

use std::sync::Arc;

use rustls::pki_types::ServerName;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tokio_socks::tcp::Socks5Stream;
use tracing::{debug, instrument, warn};
use url::Url;

use crate::config::SocksProxyConfig;
use crate::error::{Result, RotaError};

/// Trait for proxied connections
pub trait ProxyConnection: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

impl<T> ProxyConnection for T where T: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

/// Target endpoint extracted from a URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub host: String,
    pub port: u16,
    pub tls: bool,
}

impl Target {
    pub fn from_url(url: &Url) -> Result<Self> {
        let tls = match url.scheme() {
            "http" => false,
            "https" => true,
            other => {
                return Err(RotaError::InvalidRequest(format!(
                    "Unsupported scheme: {}",
                    other
                )))
            }
        };

        let host = url
            .host_str()
            .ok_or_else(|| RotaError::InvalidRequest("Missing host in URL".to_string()))?;
        let host = host
            .strip_prefix('[')
            .and_then(|h| h.strip_suffix(']'))
            .unwrap_or(host);

        let port = url
            .port_or_known_default()
            .ok_or_else(|| RotaError::InvalidRequest("Missing port in URL".to_string()))?;

        Ok(Self {
            host: host.to_string(),
            port,
            tls,
        })
    }

    /// Value for the Host header
    pub fn authority(&self) -> String {
        let default_port = if self.tls { 443 } else { 80 };
        let host = if self.host.contains(':') {
            format!("[{}]", self.host)
        } else {
            self.host.clone()
        };

        if self.port == default_port {
            host
        } else {
            format!("{}:{}", host, self.port)
        }
    }
}

/// SOCKS5 transport, one fresh tunnel per call
#[derive(Clone)]
pub struct ProxyTransport {
    proxy: SocksProxyConfig,
    tls: TlsConnector,
}

impl ProxyTransport {
    pub fn new(proxy: SocksProxyConfig) -> Result<Self> {
        let tls_config = rustls::ClientConfig::builder_with_provider(Arc::new(
            rustls::crypto::ring::default_provider(),
        ))
        .with_safe_default_protocol_versions()
        .map_err(|e| RotaError::InvalidConfig(format!("TLS setup failed: {}", e)))?
        .with_root_certificates(load_root_store())
        .with_no_client_auth();

        Ok(Self {
            proxy,
            tls: TlsConnector::from(Arc::new(tls_config)),
        })
    }

    /// Open a connection to the target through the proxy
    #[instrument(skip(self), fields(target = %target.host, port = target.port))]
    pub async fn connect(&self, target: &Target) -> Result<Box<dyn ProxyConnection>> {
        let proxy_addr = format_tcp_addr(&self.proxy.host, self.proxy.port);

        let stream = connect_via_socks5_proxy(&self.proxy, &proxy_addr, &target.host, target.port)
            .await
            .map_err(|e| {
                RotaError::ProxyConnectionFailed(format!(
                    "SOCKS5 connect failed ({} -> {}:{}): {}",
                    proxy_addr, target.host, target.port, e
                ))
            })?;

        if !target.tls {
            debug!("SOCKS5 tunnel established");
            return Ok(Box::new(stream));
        }

        let server_name = ServerName::try_from(target.host.clone()).map_err(|e| {
            RotaError::InvalidRequest(format!("Invalid TLS server name {}: {}", target.host, e))
        })?;

        let tls_stream = self
            .tls
            .connect(server_name, stream)
            .await
            .map_err(|e| RotaError::ProxyConnectionFailed(format!("TLS handshake failed: {}", e)))?;

        debug!("SOCKS5 tunnel established with TLS");
        Ok(Box::new(tls_stream))
    }
}

async fn connect_via_socks5_proxy(
    proxy: &SocksProxyConfig,
    proxy_addr: &str,
    target_host: &str,
    target_port: u16,
) -> std::result::Result<TcpStream, anyhow::Error> {
    let socket = TcpStream::connect(proxy_addr).await?;

    let stream = match (&proxy.username, &proxy.password) {
        (Some(username), Some(password)) => {
            Socks5Stream::connect_with_password_and_socket(
                socket,
                (target_host, target_port),
                username,
                password,
            )
            .await?
        }
        _ => Socks5Stream::connect_with_socket(socket, (target_host, target_port)).await?,
    };

    Ok(stream.into_inner())
}

/// System trust roots; https targets fail their handshake if none load
fn load_root_store() -> rustls::RootCertStore {
    let result = rustls_native_certs::load_native_certs();
    for e in &result.errors {
        warn!("Error loading system certificates: {}", e);
    }

    let mut roots = rustls::RootCertStore::empty();
    let (added, ignored) = roots.add_parsable_certificates(result.certs);
    if ignored > 0 {
        warn!("Skipped {} invalid system certificates", ignored);
    }
    if added == 0 {
        warn!("No system certificates loaded, https targets will be rejected");
    }
    roots
}

fn format_tcp_addr(host: &str, port: u16) -> String {
    if host.contains(':') && !(host.starts_with('[') && host.ends_with(']')) {
        format!("[{}]:{}", host, port)
    } else {
        format!("{}:{}", host, port)
    }
}
