//! HTTP signaling client for the offer/answer exchange
//!
//! The media server speaks a one-shot exchange: the viewer POSTs its offer
//! SDP to `{base}/api/webrtc?src={stream}` and the response body is the
//! answer SDP. There is no session state on the wire beyond that single
//! request; retry policy lives in the controller, not here.

use crate::{Error, Result};
use async_trait::async_trait;
use tracing::debug;

/// Seam for the offer/answer exchange
///
/// Implemented over HTTP by [`SignalingClient`]; hosts and tests can
/// substitute their own exchange. Called exactly once per connection
/// attempt, never concurrently with itself within one attempt.
#[async_trait]
pub trait Negotiator: Send + Sync {
    /// Exchange a local offer for the remote answer
    ///
    /// # Arguments
    ///
    /// * `base_url` - Media server base address
    /// * `stream` - Stream identifier on the server
    /// * `offer_sdp` - Local session description (offer) as SDP text
    async fn negotiate(&self, base_url: &str, stream: &str, offer_sdp: &str) -> Result<String>;
}

/// HTTP signaling client
pub struct SignalingClient {
    http: reqwest::Client,
}

impl SignalingClient {
    /// Create a new signaling client
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::new(),
        }
    }

    /// Build the negotiation endpoint for a base URL
    ///
    /// A single trailing path separator is stripped from the base address.
    fn endpoint(base_url: &str) -> String {
        let base = base_url.strip_suffix('/').unwrap_or(base_url);
        format!("{}/api/webrtc", base)
    }
}

impl Default for SignalingClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Negotiator for SignalingClient {
    async fn negotiate(&self, base_url: &str, stream: &str, offer_sdp: &str) -> Result<String> {
        let endpoint = Self::endpoint(base_url);
        debug!(endpoint, stream, "negotiating media session");

        let response = self
            .http
            .post(&endpoint)
            .query(&[("src", stream)])
            .body(offer_sdp.to_string())
            .send()
            .await
            .map_err(|e| Error::Signaling(format!("request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::Signaling(format!(
                "server returned {}",
                status
                    .canonical_reason()
                    .map(|reason| format!("{} {}", status.as_u16(), reason))
                    .unwrap_or_else(|| status.as_u16().to_string())
            )));
        }

        let answer = response
            .text()
            .await
            .map_err(|e| Error::Signaling(format!("unreadable answer body: {}", e)))?;

        debug!(bytes = answer.len(), "received remote answer");

        Ok(answer)
    }
}
