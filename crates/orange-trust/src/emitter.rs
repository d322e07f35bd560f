use std::time::Duration;

use chrono::Utc;

use crate::callback::{CallbackPayload, PaymentEvent};
use crate::constants::{DEFAULT_CALLBACK_TIMEOUT, DEFAULT_REFERENCE_PREFIX, SIGNATURE_HEADER};
use crate::error::CallbackError;

/// Warn at startup when the callback URL is not HTTPS.
pub fn validate_callback_url(url: &str) {
    if !url.starts_with("https://") {
        tracing::warn!(
            url = %url,
            "callback URL does not use HTTPS, payloads will be sent in cleartext"
        );
    }
}

/// What the receiver acknowledged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallbackReceipt {
    pub status: u16,
    pub payment_reference: String,
    pub signature: String,
}

/// Sends signed payment callbacks to one receiver.
#[derive(Clone)]
pub struct CallbackEmitter {
    client: reqwest::Client,
    url: String,
    secret: Vec<u8>,
    reference_prefix: String,
    timeout: Duration,
}

impl std::fmt::Debug for CallbackEmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackEmitter")
            .field("url", &self.url)
            .field("secret", &"[REDACTED]")
            .field("reference_prefix", &self.reference_prefix)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl CallbackEmitter {
    pub fn new(url: impl Into<String>, secret: impl Into<Vec<u8>>) -> Result<Self, CallbackError> {
        let client = reqwest::Client::builder()
            .timeout(DEFAULT_CALLBACK_TIMEOUT)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| CallbackError::Transport(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            url: url.into(),
            secret: secret.into(),
            reference_prefix: DEFAULT_REFERENCE_PREFIX.to_string(),
            timeout: DEFAULT_CALLBACK_TIMEOUT,
        })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_reference_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.reference_prefix = prefix.into();
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// A fresh, unique payment reference.
    pub fn next_reference(&self) -> String {
        format!("{}{}", self.reference_prefix, uuid::Uuid::new_v4().simple())
    }

    /// Build, sign and deliver the callback for `event`, forwarding the
    /// caller's bearer token to the receiver.
    pub async fn emit(
        &self,
        event: &PaymentEvent,
        forwarded_token: &str,
    ) -> Result<CallbackReceipt, CallbackError> {
        let payload = CallbackPayload::new(event, self.next_reference(), Utc::now())?;
        self.deliver(&payload, forwarded_token).await
    }

    /// Deliver an already built payload. Any status outside 2xx is an error
    /// carrying the receiver's response body.
    pub async fn deliver(
        &self,
        payload: &CallbackPayload,
        forwarded_token: &str,
    ) -> Result<CallbackReceipt, CallbackError> {
        let signature = payload.sign(&self.secret);
        let body = serde_json::to_vec(payload)
            .map_err(|e| CallbackError::Build(format!("failed to serialize payload: {e}")))?;

        let resp = self
            .client
            .post(&self.url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .header(SIGNATURE_HEADER, signature.as_str())
            .bearer_auth(forwarded_token)
            .timeout(self.timeout)
            .body(body)
            .send()
            .await
            .map_err(|e| {
                tracing::warn!(
                    url = %self.url,
                    reference = %payload.payment_reference,
                    error = %e,
                    "callback delivery failed"
                );
                CallbackError::Transport(e.to_string())
            })?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            tracing::warn!(
                url = %self.url,
                reference = %payload.payment_reference,
                status = status.as_u16(),
                body = %body,
                "callback receiver rejected payment notification"
            );
            return Err(CallbackError::NonSuccessStatus {
                status: status.as_u16(),
                body,
            });
        }

        tracing::info!(
            reference = %payload.payment_reference,
            va_number = %payload.va_number,
            status = status.as_u16(),
            "payment callback delivered"
        );
        Ok(CallbackReceipt {
            status: status.as_u16(),
            payment_reference: payload.payment_reference.clone(),
            signature,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn references_are_prefixed_and_unique() {
        let emitter = CallbackEmitter::new("http://127.0.0.1:9/cb", "s")
            .unwrap()
            .with_reference_prefix("sim-");
        let a = emitter.next_reference();
        let b = emitter.next_reference();
        assert!(a.starts_with("sim-"));
        assert_ne!(a, b);
    }

    #[test]
    fn debug_redacts_secret() {
        let emitter = CallbackEmitter::new("http://127.0.0.1:9/cb", "super-secret-value").unwrap();
        let rendered = format!("{emitter:?}");
        assert!(!rendered.contains("super-secret-value"));
        assert!(rendered.contains("[REDACTED]"));
    }
}
