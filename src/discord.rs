use crate::embed::WebhookPayload;
use crate::error::{ConfigError, DeliveryError};
use crate::transport::WebhookTransport;
use crate::webhook::WebhookConfig;
use async_trait::async_trait;
use reqwest::{redirect, Client, Proxy, StatusCode};
use std::time::Duration;

/// Discord implementation of [`WebhookTransport`] using the HTTP webhook
/// API. Requests carry JSON bodies, never follow redirects and are bounded
/// by the configured request timeout.
#[derive(Clone)]
pub struct DiscordTransport {
    client: Client,
    url: String,
    timeout: Duration,
}

impl DiscordTransport {
    /// Build the HTTP client and endpoint URL from the handler options.
    ///
    /// **Returns**
    /// - `Err(ConfigError)` if the credentials are empty or the proxy URL is
    ///   rejected by the HTTP client.
    pub fn new(config: &WebhookConfig) -> Result<Self, ConfigError> {
        config.validate()?;

        let mut builder = Client::builder()
            .timeout(config.request_timeout)
            .redirect(redirect::Policy::none());
        if let Some(proxy) = &config.proxy {
            let proxy = Proxy::all(proxy).map_err(|e| ConfigError::InvalidOption {
                option: "proxy",
                reason: e.to_string(),
            })?;
            builder = builder.proxy(proxy);
        }
        let client = builder.build().map_err(|e| ConfigError::InvalidOption {
            option: "proxy",
            reason: e.to_string(),
        })?;

        Ok(DiscordTransport {
            client,
            url: endpoint(&config.base_url, &config.webhook_id, &config.webhook_token),
            timeout: config.request_timeout,
        })
    }

    /// Send a short text message to check that the webhook accepts
    /// requests. This is optional and is not called automatically.
    pub async fn verify(&self) -> Result<(), DeliveryError> {
        self.post(&WebhookPayload::text("Initializing webhook connection..."))
            .await
    }

    fn map_send_error(&self, error: reqwest::Error) -> DeliveryError {
        if error.is_timeout() {
            DeliveryError::Timeout(self.timeout)
        } else {
            DeliveryError::Network(Box::new(error))
        }
    }
}

fn endpoint(base_url: &str, id: &str, token: &str) -> String {
    format!(
        "{}/api/webhooks/{}/{}",
        base_url.trim_end_matches('/'),
        urlencoding::encode(id),
        urlencoding::encode(token)
    )
}

/// Seconds from a `Retry-After` header. Negative or unrepresentable values
/// are ignored.
fn parse_retry_after(value: &str) -> Option<Duration> {
    let seconds: f64 = value.trim().parse().ok()?;
    Duration::try_from_secs_f64(seconds).ok()
}

#[async_trait]
impl WebhookTransport for DiscordTransport {
    async fn post(&self, payload: &WebhookPayload) -> Result<(), DeliveryError> {
        let resp = self
            .client
            .post(&self.url)
            .json(payload)
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;

        let status = resp.status();
        if status.is_success() {
            return Ok(());
        }
        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = resp
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(parse_retry_after);
            return Err(DeliveryError::RateLimited { retry_after });
        }
        let body = resp.text().await.unwrap_or_else(|_| "<no body>".to_string());
        Err(DeliveryError::Status {
            status: status.as_u16(),
            body,
        })
    }
}
