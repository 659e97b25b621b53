//! Drop-in HTTP client with optional payment handling.
//!
//! [`HttpClient`] looks like a thin `reqwest` wrapper; when a
//! [`PaymentNegotiator`] is attached, 402 responses are paid and
//! retried transparently. Callers that need settlement details use
//! [`HttpClient::send_with_payment_info`]; everyone else gets a plain
//! response.

use std::time::Duration;

use http::Method;

use crate::error::NegotiationError;
use crate::negotiator::{NegotiationResult, PaymentNegotiator};

/// Environment variable gating payment handling.
pub const ENABLE_PAYMENTS_ENV: &str = "H402_ENABLE_SERVER_WALLETS";

/// Whether payment handling is switched on in the environment.
#[must_use]
pub fn payments_enabled_from_env() -> bool {
    std::env::var(ENABLE_PAYMENTS_ENV).is_ok_and(|value| value == "true")
}

/// Transport knobs for [`HttpClient`].
#[derive(Debug, Clone)]
pub struct HttpClientOptions {
    /// Per-request timeout.
    pub timeout: Duration,
    /// Skip TLS certificate verification. For test rigs only.
    pub accept_invalid_certs: bool,
    /// Close connections after each request instead of pooling them.
    pub disable_keep_alives: bool,
    /// Force HTTP/1.1, for servers that mishandle the h2 upgrade.
    pub force_http1: bool,
}

impl Default for HttpClientOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            accept_invalid_certs: false,
            disable_keep_alives: false,
            force_http1: false,
        }
    }
}

impl HttpClientOptions {
    fn build(&self) -> Result<reqwest::Client, reqwest::Error> {
        let mut builder = reqwest::Client::builder().timeout(self.timeout);
        if self.accept_invalid_certs {
            builder = builder.danger_accept_invalid_certs(true);
        }
        if self.disable_keep_alives {
            builder = builder.pool_max_idle_per_host(0);
        }
        if self.force_http1 {
            builder = builder.http1_only();
        }
        builder.build()
    }
}

/// An HTTP client that may negotiate payments.
#[derive(Debug)]
pub struct HttpClient {
    inner: reqwest::Client,
    negotiator: Option<PaymentNegotiator>,
}

impl HttpClient {
    /// A plain client with the given transport options.
    ///
    /// # Errors
    ///
    /// Fails if the underlying `reqwest` client cannot be built.
    pub fn new(options: &HttpClientOptions) -> Result<Self, NegotiationError> {
        Ok(Self {
            inner: options.build()?,
            negotiator: None,
        })
    }

    /// A client that pays 402 responses through `negotiator`. The
    /// negotiator is rebound to this client's transport so both paths
    /// share one connection pool.
    ///
    /// # Errors
    ///
    /// Fails if the underlying `reqwest` client cannot be built.
    pub fn with_negotiator(
        options: &HttpClientOptions,
        negotiator: PaymentNegotiator,
    ) -> Result<Self, NegotiationError> {
        let inner = options.build()?;
        Ok(Self {
            negotiator: Some(negotiator.with_http_client(inner.clone())),
            inner,
        })
    }

    /// Builds a client honoring [`ENABLE_PAYMENTS_ENV`]: when the flag
    /// is off, `negotiator` is dropped and responses pass through
    /// unpaid.
    ///
    /// # Errors
    ///
    /// Fails if the underlying `reqwest` client cannot be built.
    pub fn from_env(
        options: &HttpClientOptions,
        negotiator: PaymentNegotiator,
    ) -> Result<Self, NegotiationError> {
        if payments_enabled_from_env() {
            Self::with_negotiator(options, negotiator)
        } else {
            Self::new(options)
        }
    }

    /// Whether this client negotiates payments.
    #[must_use]
    pub const fn payments_enabled(&self) -> bool {
        self.negotiator.is_some()
    }

    /// The attached negotiator, if any.
    #[must_use]
    pub const fn negotiator(&self) -> Option<&PaymentNegotiator> {
        self.negotiator.as_ref()
    }

    /// GET, paying a 402 when a negotiator is attached.
    ///
    /// # Errors
    ///
    /// Transport or negotiation failure.
    pub async fn get(&self, url: &str) -> Result<reqwest::Response, NegotiationError> {
        Ok(self
            .send_with_payment_info(Method::GET, url, None)
            .await?
            .response)
    }

    /// POST with a JSON body, paying a 402 when a negotiator is
    /// attached.
    ///
    /// # Errors
    ///
    /// Transport or negotiation failure.
    pub async fn post(
        &self,
        url: &str,
        body: &[u8],
    ) -> Result<reqwest::Response, NegotiationError> {
        Ok(self
            .send_with_payment_info(Method::POST, url, Some(body))
            .await?
            .response)
    }

    /// Sends a request and reports any payment that was made for it.
    ///
    /// Without a negotiator this is a plain request: the result carries
    /// the response and no payment data.
    ///
    /// # Errors
    ///
    /// Transport or negotiation failure.
    pub async fn send_with_payment_info(
        &self,
        method: Method,
        url: &str,
        body: Option<&[u8]>,
    ) -> Result<NegotiationResult, NegotiationError> {
        if let Some(negotiator) = &self.negotiator {
            return negotiator.send_with_payment_info(method, url, body).await;
        }

        let mut request = self.inner.request(method, url);
        if let Some(body) = body {
            request = request
                .header(http::header::CONTENT_TYPE, "application/json")
                .body(body.to_vec());
        }
        let response = request.send().await?;
        Ok(NegotiationResult {
            response,
            payment: None,
            limit_breach: None,
            notice: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use h402::registry::{ChainRegistry, Environment};

    #[test]
    fn plain_client_reports_payments_disabled() {
        let client = HttpClient::new(&HttpClientOptions::default()).unwrap();
        assert!(!client.payments_enabled());
    }

    #[test]
    fn negotiator_client_reports_payments_enabled() {
        let negotiator = PaymentNegotiator::new(ChainRegistry::with_defaults(Environment::Mainnet));
        let client =
            HttpClient::with_negotiator(&HttpClientOptions::default(), negotiator).unwrap();
        assert!(client.payments_enabled());
        assert!(client.negotiator().is_some());
    }
}
