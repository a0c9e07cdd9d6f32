use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, instrument};
use url::Url;

use super::AddressProbe;
use crate::config::ProbeConfig;
use crate::error::{Result, RotaError};
use crate::models::Identity;
use crate::proxy::client::HttpSender;

/// Asks an address-echo service which address our traffic comes from
///
/// Each call goes through the sender on a new connection, so a probe never
/// reuses a session opened before the last renewal.
pub struct HttpAddressProbe {
    client: Arc<dyn HttpSender>,
    url: Url,
    field: String,
    timeout: Duration,
}

impl HttpAddressProbe {
    pub fn new(client: Arc<dyn HttpSender>, config: &ProbeConfig) -> Self {
        Self {
            client,
            url: config.url.clone(),
            field: config.field.clone(),
            timeout: config.timeout,
        }
    }
}

#[async_trait]
impl AddressProbe for HttpAddressProbe {
    #[instrument(skip(self), fields(url = %self.url))]
    async fn current_address(&self) -> Result<Identity> {
        let response = self
            .client
            .get(&self.url, None, self.timeout)
            .await
            .map_err(|e| RotaError::Probe(e.to_string()))?;

        if !response.status.is_success() {
            return Err(RotaError::Probe(format!(
                "oracle returned status {}",
                response.status
            )));
        }

        let identity = parse_identity(&response.body, &self.field)?;
        debug!(identity = %identity, "Observed address");
        Ok(identity)
    }
}

fn parse_identity(body: &[u8], field: &str) -> Result<Identity> {
    let value: serde_json::Value = serde_json::from_slice(body)
        .map_err(|e| RotaError::Probe(format!("invalid JSON from oracle: {}", e)))?;

    let address = value
        .get(field)
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| RotaError::Probe(format!("oracle response has no '{}' field", field)))?;

    Ok(Identity::new(address))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::client::HttpResponse;
    use bytes::Bytes;
    use http::StatusCode;

    struct StaticSender {
        status: StatusCode,
        body: &'static str,
    }

    #[async_trait]
    impl HttpSender for StaticSender {
        async fn get(
            &self,
            _url: &Url,
            _user_agent: Option<&str>,
            _timeout: Duration,
        ) -> Result<HttpResponse> {
            Ok(HttpResponse {
                status: self.status,
                body: Bytes::from_static(self.body.as_bytes()),
                elapsed: Duration::from_millis(5),
            })
        }
    }

    struct FailingSender;

    #[async_trait]
    impl HttpSender for FailingSender {
        async fn get(
            &self,
            _url: &Url,
            _user_agent: Option<&str>,
            _timeout: Duration,
        ) -> Result<HttpResponse> {
            Err(RotaError::RequestTimeout)
        }
    }

    fn probe_with(client: Arc<dyn HttpSender>) -> HttpAddressProbe {
        HttpAddressProbe::new(
            client,
            &ProbeConfig {
                url: Url::parse("http://httpbin.org/ip").unwrap(),
                field: "origin".to_string(),
                timeout: Duration::from_secs(10),
            },
        )
    }

    #[test]
    fn test_parse_identity_reads_field() {
        let identity = parse_identity(br#"{"origin": " 198.51.100.7 "}"#, "origin").unwrap();
        assert_eq!(identity, Identity::new("198.51.100.7"));
    }

    #[test]
    fn test_parse_identity_rejects_missing_or_non_string_field() {
        assert!(matches!(
            parse_identity(br#"{"ip": "198.51.100.7"}"#, "origin"),
            Err(RotaError::Probe(_))
        ));
        assert!(matches!(
            parse_identity(br#"{"origin": 42}"#, "origin"),
            Err(RotaError::Probe(_))
        ));
        assert!(matches!(
            parse_identity(b"<html>", "origin"),
            Err(RotaError::Probe(_))
        ));
    }

    #[tokio::test]
    async fn test_current_address_returns_identity() {
        let probe = probe_with(Arc::new(StaticSender {
            status: StatusCode::OK,
            body: r#"{"origin": "203.0.113.9"}"#,
        }));
        let identity = tokio_test::assert_ok!(probe.current_address().await);
        assert_eq!(identity.as_str(), "203.0.113.9");
    }

    #[tokio::test]
    async fn test_current_address_maps_failures_to_probe_errors() {
        let probe = probe_with(Arc::new(StaticSender {
            status: StatusCode::BAD_GATEWAY,
            body: "",
        }));
        assert!(matches!(
            probe.current_address().await,
            Err(RotaError::Probe(_))
        ));

        let probe = probe_with(Arc::new(FailingSender));
        assert!(matches!(
            probe.current_address().await,
            Err(RotaError::Probe(_))
        ));
    }
}
