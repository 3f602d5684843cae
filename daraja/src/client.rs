//! The Daraja gateway client.
//!
//! [`Mpesa`] binds one paybill account to the gateway. It resolves the
//! account's settings, keeps an OAuth access token, derives security
//! credentials, and exposes one method per gateway command. Every method
//! builds a [`Payload`], posts it as JSON with a bearer token and returns the
//! raw response body.
//!
//! ## Features
//!
//! - Uses `reqwest` for async HTTP requests
//! - Supports an optional request timeout and a custom base URL
//! - Integrates with `tracing` if the `telemetry` feature is enabled
//!
//! ## Known defects kept on the wire
//!
//! [`Mpesa::b2b`] and [`Mpesa::reverse_transaction`] accept identifying
//! inputs that are not sent to the gateway. See their docs.

use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use url::Url;

use crate::config::{AccountConfig, DarajaConfig};
use crate::credential::SecurityCredential;
use crate::error::{Error, Result};
use crate::payload::{
    AccountBalanceRequest, B2bRequest, B2cCommandId, B2cRequest, C2bRegisterUrlRequest,
    C2bSimulateRequest, DEFAULT_STK_REFERENCE, Initiator, Payload, ResultUrls, ReversalRequest,
    StkPushQueryRequest, StkPushRequest, TransactionStatusRequest,
};
use crate::timestamp::GatewayTimestamp;
use crate::token::{AccessToken, TokenCache, fetch_token};

#[cfg(feature = "telemetry")]
use tracing::Span;

/// Raw gateway answer to a command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayResponse {
    /// HTTP status (always a success status).
    pub status: StatusCode,
    /// Unparsed response body.
    pub body: String,
}

impl GatewayResponse {
    /// Parses the body as JSON.
    ///
    /// # Errors
    ///
    /// Returns the `serde_json` error if the body does not match `T`.
    pub fn json<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
        serde_json::from_str(&self.body)
    }
}

/// A client for one paybill account on the Daraja gateway.
///
/// Cloning is cheap; clones share configuration and the access token.
#[derive(Clone, Debug)]
pub struct Mpesa {
    /// Gateway host, sandbox or production
    base_url: Url,
    /// Global settings shared by all accounts
    config: Arc<DarajaConfig>,
    /// Name of the account in use
    account_name: String,
    /// Settings of the account in use
    account: Arc<AccountConfig>,
    /// Shared reqwest HTTP client
    client: Client,
    /// Optional request timeout
    timeout: Option<Duration>,
    /// Current access token
    token: TokenCache,
}

impl Mpesa {
    /// Creates a client for the named account and fetches a first token.
    ///
    /// A failed token fetch does not fail construction; the token stays
    /// unset and is fetched again by the first command.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if the account does not exist.
    pub async fn new(config: DarajaConfig, account: &str) -> Result<Self> {
        let client = Self::unauthenticated(config, account)?;
        client.prefetch_token().await;
        Ok(client)
    }

    /// Creates a client for the named account without contacting the gateway.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if the account does not exist, or
    /// [`Error::UrlParse`] if the gateway host cannot be parsed.
    pub fn unauthenticated(config: DarajaConfig, account: &str) -> Result<Self> {
        let account_config = config.account(account)?.clone();
        let base_url = parse_base_url(account_config.base_url())?;
        let timeout = config.timeout_secs.map(Duration::from_secs);
        Ok(Self {
            base_url,
            config: Arc::new(config),
            account_name: account.to_owned(),
            account: Arc::new(account_config),
            client: Client::new(),
            timeout,
            token: TokenCache::new(),
        })
    }

    /// Points the client at another host, e.g. a mock gateway or a proxy.
    ///
    /// A path on `base_url` is kept as a prefix of every endpoint, so
    /// `https://proxy.example/daraja` posts to
    /// `https://proxy.example/daraja/mpesa/...`.
    ///
    /// Clears any cached token, since it was issued by the previous host.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UrlParse`] if `base_url` is not a valid URL.
    pub fn with_base_url(mut self, base_url: &str) -> Result<Self> {
        self.base_url = parse_base_url(base_url)?;
        self.token = TokenCache::new();
        Ok(self)
    }

    /// Sets a timeout for all future requests.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Uses a preconfigured reqwest client.
    #[must_use]
    pub fn with_http_client(mut self, client: Client) -> Self {
        self.client = client;
        self
    }

    /// Returns the gateway host used by this client.
    pub const fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Returns the name of the account in use.
    #[must_use]
    pub fn account_name(&self) -> &str {
        &self.account_name
    }

    /// Returns the settings of the account in use.
    #[must_use]
    pub fn account(&self) -> &AccountConfig {
        &self.account
    }

    /// Returns the global configuration.
    #[must_use]
    pub fn config(&self) -> &DarajaConfig {
        &self.config
    }

    /// Returns the configured timeout, if any.
    #[must_use]
    pub const fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Returns the token cache.
    pub const fn token_cache(&self) -> &TokenCache {
        &self.token
    }

    /// Fetches a token and stores it, logging instead of failing.
    pub async fn prefetch_token(&self) {
        match self.access_token().await {
            Ok(_) => {
                #[cfg(feature = "telemetry")]
                tracing::debug!(account = %self.account_name, "daraja.token.acquired");
            }
            Err(err) => {
                #[cfg(feature = "telemetry")]
                tracing::warn!(
                    account = %self.account_name,
                    error = %err,
                    "Access token unavailable; commands will retry the exchange"
                );
                #[cfg(not(feature = "telemetry"))]
                let _ = err;
            }
        }
    }

    /// Returns a usable access token, fetching one if none is cached or the
    /// cached one expired.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Authentication`] if the gateway rejects the consumer
    /// key/secret, or [`Error::Transport`] if it cannot be reached.
    pub async fn access_token(&self) -> Result<AccessToken> {
        self.token
            .get_or_refresh(|| {
                fetch_token(
                    &self.client,
                    &self.base_url,
                    &self.account.key,
                    &self.account.secret,
                    self.timeout,
                )
            })
            .await
    }

    /// Encrypts the initiator password with the certificate of the
    /// configured environment.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Credential`] if the certificate cannot be used.
    pub fn security_credential(&self) -> Result<SecurityCredential> {
        Ok(SecurityCredential::derive(
            &self.account.password,
            self.config.certificate_path(),
        )?)
    }

    fn initiator(&self) -> Result<Initiator> {
        Ok(Initiator {
            name: self.account.initiator.clone(),
            credential: self.security_credential()?,
        })
    }

    /// Business to customer: sends `amount` from the paybill to `phone`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] for a zero amount or a non-numeric phone,
    /// and any submission error.
    #[cfg_attr(
        feature = "telemetry",
        tracing::instrument(name = "daraja.b2c", skip_all, err, fields(command_id = %command_id, amount = amount))
    )]
    pub async fn b2c(
        &self,
        amount: u64,
        phone: &str,
        command_id: B2cCommandId,
        remarks: &str,
        occasion: Option<&str>,
    ) -> Result<GatewayResponse> {
        let request = B2cRequest::new(
            self.initiator()?,
            command_id,
            amount,
            self.account.paybill(),
            phone,
            remarks,
            occasion,
            self.account.b2c_timeout.clone(),
            self.account.b2c_result.clone(),
        )?;
        self.submit(&request.into()).await
    }

    /// Business to business transfer.
    ///
    /// # Known defect
    ///
    /// `amount` and `shortcode` are **not** sent. Every transfer carries
    /// [`B2B_FIXED_AMOUNT`](crate::payload::B2B_FIXED_AMOUNT) to
    /// [`B2B_FIXED_RECEIVER`](crate::payload::B2B_FIXED_RECEIVER). The
    /// parameters stay in the signature so callers do not break when this is
    /// corrected.
    ///
    /// # Errors
    ///
    /// Returns any credential or submission error.
    #[cfg_attr(
        feature = "telemetry",
        tracing::instrument(name = "daraja.b2b", skip_all, err)
    )]
    pub async fn b2b(&self, amount: u64, shortcode: &str) -> Result<GatewayResponse> {
        #[cfg(feature = "telemetry")]
        tracing::warn!(
            requested_amount = amount,
            requested_shortcode = shortcode,
            sent_amount = crate::payload::B2B_FIXED_AMOUNT,
            sent_shortcode = crate::payload::B2B_FIXED_RECEIVER,
            "B2B transfer ignores the requested amount and shortcode"
        );
        #[cfg(not(feature = "telemetry"))]
        let _ = (amount, shortcode);

        let urls = ResultUrls {
            timeout: self.account.b2b_timeout.clone(),
            result: self.account.b2b_result.clone(),
        };
        let request = B2bRequest::new(self.initiator()?, self.account.paybill(), urls);
        self.submit(&request.into()).await
    }

    /// Registers the configured C2B confirmation and validation URLs.
    ///
    /// # Errors
    ///
    /// Returns any submission error.
    #[cfg_attr(
        feature = "telemetry",
        tracing::instrument(name = "daraja.c2b_register_urls", skip_all, err)
    )]
    pub async fn c2b_register_urls(&self) -> Result<GatewayResponse> {
        let request = C2bRegisterUrlRequest::new(
            self.account.paybill(),
            self.config.c2b_confirm_callback.clone(),
            self.config.c2b_validate_callback.clone(),
        );
        self.submit(&request.into()).await
    }

    /// Simulates a customer paying into the paybill (sandbox only).
    ///
    /// # Errors
    ///
    /// Returns any submission error.
    #[cfg_attr(
        feature = "telemetry",
        tracing::instrument(name = "daraja.simulate_c2b", skip_all, err, fields(amount = amount))
    )]
    pub async fn simulate_c2b(
        &self,
        amount: u64,
        msisdn: &str,
        reference: &str,
    ) -> Result<GatewayResponse> {
        let request = C2bSimulateRequest::new(self.account.paybill(), amount, msisdn, reference);
        self.submit(&request.into()).await
    }

    /// Queries the paybill balance. The result is delivered to the balance
    /// callback.
    ///
    /// # Errors
    ///
    /// Returns any credential or submission error.
    #[cfg_attr(
        feature = "telemetry",
        tracing::instrument(name = "daraja.check_balance", skip_all, err)
    )]
    pub async fn check_balance(&self) -> Result<GatewayResponse> {
        let urls = ResultUrls {
            timeout: self.account.balance_timeout.clone(),
            result: self.account.balance_result.clone(),
        };
        let request = AccountBalanceRequest::new(self.initiator()?, self.account.paybill(), urls);
        self.submit(&request.into()).await
    }

    /// Queries the status of a transaction, e.g.
    /// [`SAMPLE_TRANSACTION_ID`](crate::payload::SAMPLE_TRANSACTION_ID).
    ///
    /// # Errors
    ///
    /// Returns any credential or submission error.
    #[cfg_attr(
        feature = "telemetry",
        tracing::instrument(name = "daraja.transaction_status", skip_all, err, fields(transaction_id = transaction_id))
    )]
    pub async fn transaction_status(&self, transaction_id: &str) -> Result<GatewayResponse> {
        let urls = ResultUrls {
            timeout: self.account.status_timeout.clone(),
            result: self.account.status_result.clone(),
        };
        let request = TransactionStatusRequest::new(
            self.initiator()?,
            self.account.paybill(),
            transaction_id,
            urls,
        );
        self.submit(&request.into()).await
    }

    /// Reverses a transaction.
    ///
    /// # Known defect
    ///
    /// Only `amount` is sent. The receiver is always the configured
    /// `test_msisdn` and the transaction id is always
    /// [`REVERSAL_FIXED_TRANSACTION_ID`](crate::payload::REVERSAL_FIXED_TRANSACTION_ID),
    /// whatever `receiver` and `transaction_id` say.
    ///
    /// # Errors
    ///
    /// Returns any credential or submission error.
    #[cfg_attr(
        feature = "telemetry",
        tracing::instrument(name = "daraja.reverse_transaction", skip_all, err, fields(amount = amount))
    )]
    pub async fn reverse_transaction(
        &self,
        receiver: &str,
        transaction_id: &str,
        amount: u64,
    ) -> Result<GatewayResponse> {
        #[cfg(feature = "telemetry")]
        tracing::warn!(
            requested_receiver = receiver,
            requested_transaction_id = transaction_id,
            sent_receiver = %self.config.test_msisdn,
            sent_transaction_id = crate::payload::REVERSAL_FIXED_TRANSACTION_ID,
            "Reversal ignores the requested receiver and transaction id"
        );
        #[cfg(not(feature = "telemetry"))]
        let _ = (receiver, transaction_id);

        let urls = ResultUrls {
            timeout: self.account.reversal_timeout.clone(),
            result: self.account.reversal_result.clone(),
        };
        let request =
            ReversalRequest::new(self.initiator()?, &self.config.test_msisdn, amount, urls);
        self.submit(&request.into()).await
    }

    /// Lipa Na M-Pesa Online: prompts `phone` to pay `amount`.
    ///
    /// `reference` and `description` default to `"Payment"`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] if `amount` is below 1 or `phone` is not
    /// numeric, and any submission error.
    #[cfg_attr(
        feature = "telemetry",
        tracing::instrument(name = "daraja.express_checkout", skip_all, err, fields(amount = amount))
    )]
    pub async fn express_checkout(
        &self,
        amount: u64,
        phone: &str,
        reference: Option<&str>,
        description: Option<&str>,
    ) -> Result<GatewayResponse> {
        let request = StkPushRequest::new(
            &self.config.lipa_na_mpesa,
            &self.config.lipa_na_mpesa_passkey,
            GatewayTimestamp::now(),
            amount,
            phone,
            self.config.lnmocallback.clone(),
            reference.unwrap_or(DEFAULT_STK_REFERENCE),
            description.unwrap_or(DEFAULT_STK_REFERENCE),
        )?;
        self.submit(&request.into()).await
    }

    /// Queries the outcome of an STK push by its `CheckoutRequestID`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] for an empty id, and any submission
    /// error.
    #[cfg_attr(
        feature = "telemetry",
        tracing::instrument(name = "daraja.express_query", skip_all, err)
    )]
    pub async fn express_query(&self, checkout_request_id: &str) -> Result<GatewayResponse> {
        let request = StkPushQueryRequest::new(
            &self.config.lipa_na_mpesa,
            &self.config.lipa_na_mpesa_passkey,
            GatewayTimestamp::now(),
            checkout_request_id,
        )?;
        self.submit(&request.into()).await
    }

    /// Posts a payload to its endpoint with the current bearer token.
    ///
    /// Nothing is sent when no token can be obtained.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Authentication`] without a token, [`Error::Transport`]
    /// on network failure and [`Error::Gateway`] for a non-success status.
    pub async fn submit(&self, payload: &Payload) -> Result<GatewayResponse> {
        let context = payload.command();
        let token = self.access_token().await?;
        let url =
            endpoint_url(&self.base_url, payload.endpoint()).map_err(|source| Error::UrlParse {
                context: "Failed to construct endpoint URL",
                source,
            })?;

        let mut req = self
            .client
            .post(url)
            .bearer_auth(token.secret())
            .json(payload);
        if let Some(timeout) = self.timeout {
            req = req.timeout(timeout);
        }
        let http_response = req
            .send()
            .await
            .map_err(|source| Error::Transport { context, source })?;

        let status = http_response.status();
        let body = http_response
            .text()
            .await
            .map_err(|source| Error::Transport { context, source })?;

        let result = if status.is_success() {
            Ok(GatewayResponse { status, body })
        } else {
            Err(Error::Gateway {
                context,
                status,
                body,
            })
        };

        record_result_on_span(&result);

        result
    }
}

fn parse_base_url(value: &str) -> Result<Url> {
    Url::parse(value).map_err(|source| Error::UrlParse {
        context: "Failed to parse base url",
        source,
    })
}

/// Appends `endpoint` to `base`, keeping any path prefix `base` carries.
pub(crate) fn endpoint_url(base: &Url, endpoint: &str) -> Result<Url, url::ParseError> {
    let mut base = base.clone();
    if !base.path().ends_with('/') {
        let path = format!("{}/", base.path());
        base.set_path(&path);
    }
    base.join(endpoint.trim_start_matches('/'))
}

/// Records the outcome of a request on a tracing span, including status and errors.
#[cfg(feature = "telemetry")]
fn record_result_on_span<R, E: Display>(result: &Result<R, E>) {
    let span = Span::current();
    match result {
        Ok(_) => {
            span.record("otel.status_code", "OK");
        }
        Err(err) => {
            span.record("otel.status_code", "ERROR");
            span.record("error.message", tracing::field::display(err));
            tracing::event!(tracing::Level::ERROR, error = %err, "Request to gateway failed");
        }
    }
}

/// Records the outcome of a request on a tracing span, including status and errors.
/// Noop if telemetry feature is off.
#[cfg(not(feature = "telemetry"))]
fn record_result_on_span<R, E: Display>(_result: &Result<R, E>) {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{
        CertificatePaths, Environment, LnmoAccount, PRODUCTION_BASE_URL, SANDBOX_BASE_URL,
    };
    use crate::error::ValidationError;
    use crate::payload::{B2B_FIXED_AMOUNT, B2B_FIXED_RECEIVER, REVERSAL_FIXED_TRANSACTION_ID};
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD as b64;
    use rsa::pkcs1::LineEnding;
    use rsa::pkcs8::EncodePublicKey;
    use rsa::rand_core::OsRng;
    use rsa::{Pkcs1v15Encrypt, RsaPrivateKey};
    use serde_json::{Value, json};
    use std::collections::HashMap;
    use std::io::Write;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, Request, ResponseTemplate};

    fn url(s: &str) -> Url {
        s.parse().unwrap()
    }

    fn account(sandbox: bool) -> AccountConfig {
        AccountConfig {
            sandbox,
            key: "key".to_owned(),
            secret: "secret".to_owned(),
            initiator: "testapi".to_owned(),
            password: "Safaricom999!*!".to_owned(),
            lnmo: LnmoAccount {
                paybill: "600000".to_owned(),
            },
            b2c_timeout: url("https://example.com/b2c/timeout"),
            b2c_result: url("https://example.com/b2c/result"),
            b2b_timeout: None,
            b2b_result: None,
            balance_timeout: Some(url("https://example.com/balance/timeout")),
            balance_result: Some(url("https://example.com/balance/result")),
            status_timeout: None,
            status_result: None,
            reversal_timeout: None,
            reversal_result: None,
        }
    }

    fn config(certificate: &std::path::Path) -> DarajaConfig {
        let mut accounts = HashMap::new();
        accounts.insert("sandbox".to_owned(), account(true));
        accounts.insert("live".to_owned(), account(false));
        DarajaConfig {
            environment: Environment::Sandbox,
            lipa_na_mpesa: "174379".to_owned(),
            lipa_na_mpesa_passkey: "passkey".to_owned(),
            lnmocallback: url("https://example.com/lnmo"),
            test_msisdn: "254708374149".to_owned(),
            c2b_validate_callback: url("https://example.com/validate"),
            c2b_confirm_callback: url("https://example.com/confirm"),
            certificates: CertificatePaths {
                sandbox: certificate.to_path_buf(),
                production: "/unused/production.cer".into(),
            },
            timeout_secs: None,
            accounts,
        }
    }

    struct Fixture {
        server: MockServer,
        private_key: RsaPrivateKey,
        _certificate: tempfile::NamedTempFile,
        config: DarajaConfig,
    }

    impl Fixture {
        async fn new() -> Self {
            let private_key = RsaPrivateKey::new(&mut OsRng, 1024).expect("key generation");
            let pem = private_key
                .to_public_key()
                .to_public_key_pem(LineEnding::LF)
                .unwrap();
            let mut certificate = tempfile::NamedTempFile::new().unwrap();
            certificate.write_all(pem.as_bytes()).unwrap();
            let config = config(certificate.path());
            Self {
                server: MockServer::start().await,
                private_key,
                _certificate: certificate,
                config,
            }
        }

        async fn grant_token(&self, token: &str) {
            Mock::given(method("GET"))
                .and(path("/oauth/v1/generate"))
                .respond_with(
                    ResponseTemplate::new(200)
                        .set_body_json(json!({"access_token": token, "expires_in": "3599"})),
                )
                .mount(&self.server)
                .await;
        }

        async fn accept(&self, endpoint: &str) {
            Mock::given(method("POST"))
                .and(path(endpoint))
                .respond_with(
                    ResponseTemplate::new(200)
                        .set_body_string(r#"{"ResponseCode":"0","ResponseDescription":"Accept the service request successfully."}"#),
                )
                .mount(&self.server)
                .await;
        }

        fn client(&self) -> Mpesa {
            Mpesa::unauthenticated(self.config.clone(), "sandbox")
                .unwrap()
                .with_base_url(&self.server.uri())
                .unwrap()
        }

        async fn posted(&self, endpoint: &str) -> Vec<Request> {
            self.server
                .received_requests()
                .await
                .unwrap_or_default()
                .into_iter()
                .filter(|r| r.method.as_str() == "POST" && r.url.path() == endpoint)
                .collect()
        }

        async fn last_body(&self, endpoint: &str) -> Value {
            let requests = self.posted(endpoint).await;
            let request = requests.last().expect("request was posted");
            serde_json::from_slice(&request.body).unwrap()
        }

        fn decrypt(&self, credential: &Value) -> String {
            let ciphertext = b64.decode(credential.as_str().unwrap()).unwrap();
            let plain = self
                .private_key
                .decrypt(Pkcs1v15Encrypt, &ciphertext)
                .unwrap();
            String::from_utf8(plain).unwrap()
        }
    }

    #[test]
    fn selects_host_by_sandbox_flag() {
        let cfg = config(std::path::Path::new("/unused.cer"));
        let sandbox = Mpesa::unauthenticated(cfg.clone(), "sandbox").unwrap();
        let live = Mpesa::unauthenticated(cfg, "live").unwrap();
        assert_eq!(sandbox.base_url().as_str(), format!("{SANDBOX_BASE_URL}/"));
        assert_eq!(live.base_url().as_str(), format!("{PRODUCTION_BASE_URL}/"));
    }

    #[test]
    fn unknown_account_fails_construction() {
        let cfg = config(std::path::Path::new("/unused.cer"));
        let err = Mpesa::unauthenticated(cfg, "nope").unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn timeout_comes_from_config() {
        let mut cfg = config(std::path::Path::new("/unused.cer"));
        cfg.timeout_secs = Some(15);
        let client = Mpesa::unauthenticated(cfg, "sandbox").unwrap();
        assert_eq!(client.timeout(), Some(Duration::from_secs(15)));
    }

    #[tokio::test]
    async fn token_is_fetched_once_and_reused() {
        let fx = Fixture::new().await;
        Mock::given(method("GET"))
            .and(path("/oauth/v1/generate"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"access_token": "T"})))
            .expect(1)
            .mount(&fx.server)
            .await;
        Mock::given(method("POST"))
            .and(path("/mpesa/c2b/v1/registerurl"))
            .and(header("authorization", "Bearer T"))
            .respond_with(ResponseTemplate::new(200).set_body_string("{}"))
            .expect(2)
            .mount(&fx.server)
            .await;

        let client = fx.client();
        client.prefetch_token().await;
        client.c2b_register_urls().await.unwrap();
        client.c2b_register_urls().await.unwrap();
    }

    #[test]
    fn endpoint_url_keeps_base_path() {
        let host: Url = "https://sandbox.safaricom.co.ke".parse().unwrap();
        let proxy: Url = "https://proxy.example/daraja".parse().unwrap();
        let proxy_slash: Url = "https://proxy.example/daraja/".parse().unwrap();
        assert_eq!(
            endpoint_url(&host, "/mpesa/b2c/v1/paymentrequest").unwrap().as_str(),
            "https://sandbox.safaricom.co.ke/mpesa/b2c/v1/paymentrequest"
        );
        for base in [&proxy, &proxy_slash] {
            assert_eq!(
                endpoint_url(base, crate::token::TOKEN_PATH).unwrap().as_str(),
                "https://proxy.example/daraja/oauth/v1/generate?grant_type=client_credentials"
            );
        }
    }

    #[tokio::test]
    async fn prefixed_base_url_reaches_gateway() {
        let fx = Fixture::new().await;
        Mock::given(method("GET"))
            .and(path("/daraja/oauth/v1/generate"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"access_token": "T"})))
            .expect(1)
            .mount(&fx.server)
            .await;
        Mock::given(method("POST"))
            .and(path("/daraja/mpesa/c2b/v1/registerurl"))
            .and(header("authorization", "Bearer T"))
            .respond_with(ResponseTemplate::new(200).set_body_string("{}"))
            .expect(1)
            .mount(&fx.server)
            .await;

        let client = Mpesa::unauthenticated(fx.config.clone(), "sandbox")
            .unwrap()
            .with_base_url(&format!("{}/daraja", fx.server.uri()))
            .unwrap();
        client.c2b_register_urls().await.unwrap();
    }

    #[tokio::test]
    async fn rejected_token_blocks_submission() {
        let fx = Fixture::new().await;
        Mock::given(method("GET"))
            .and(path("/oauth/v1/generate"))
            .respond_with(ResponseTemplate::new(401).set_body_string("Invalid credentials"))
            .mount(&fx.server)
            .await;
        fx.accept("/mpesa/c2b/v1/registerurl").await;

        let client = fx.client();
        client.prefetch_token().await;
        assert!(client.token_cache().get().await.is_none());

        let err = client.c2b_register_urls().await.unwrap_err();
        assert!(matches!(
            err,
            Error::Authentication {
                status: StatusCode::UNAUTHORIZED,
                ..
            }
        ));
        assert!(fx.posted("/mpesa/c2b/v1/registerurl").await.is_empty());
    }

    #[tokio::test]
    async fn gateway_error_keeps_raw_body() {
        let fx = Fixture::new().await;
        fx.grant_token("T").await;
        Mock::given(method("POST"))
            .and(path("/mpesa/accountbalance/v1/query"))
            .respond_with(
                ResponseTemplate::new(400).set_body_string(r#"{"errorCode":"400.002.02"}"#),
            )
            .mount(&fx.server)
            .await;

        let err = fx.client().check_balance().await.unwrap_err();
        match err {
            Error::Gateway { status, body, .. } => {
                assert_eq!(status, StatusCode::BAD_REQUEST);
                assert_eq!(body, r#"{"errorCode":"400.002.02"}"#);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn express_checkout_validates_before_sending() {
        let fx = Fixture::new().await;
        fx.grant_token("T").await;
        fx.accept("/mpesa/stkpush/v1/processrequest").await;
        let client = fx.client();

        let err = client
            .express_checkout(0, "254700000000", None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(ValidationError::Amount(0))));

        let err = client
            .express_checkout(10, "abc", None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(ValidationError::Phone(_))));

        assert!(fx.posted("/mpesa/stkpush/v1/processrequest").await.is_empty());
    }

    #[tokio::test]
    async fn express_checkout_posts_stk_push() {
        let fx = Fixture::new().await;
        fx.grant_token("T").await;
        fx.accept("/mpesa/stkpush/v1/processrequest").await;

        let response = fx
            .client()
            .express_checkout(10, "254700000000", None, Some("Order 7"))
            .await
            .unwrap();
        assert_eq!(response.status, StatusCode::OK);
        let parsed: Value = response.json().unwrap();
        assert_eq!(parsed["ResponseCode"], json!("0"));

        let body = fx.last_body("/mpesa/stkpush/v1/processrequest").await;
        let timestamp = body["Timestamp"].as_str().unwrap();
        assert_eq!(
            body["Password"],
            json!(b64.encode(format!("174379passkey{timestamp}")))
        );
        assert_eq!(body["BusinessShortCode"], json!("174379"));
        assert_eq!(body["PartyB"], json!("174379"));
        assert_eq!(body["Amount"], json!(10));
        assert_eq!(body["AccountReference"], json!("Payment"));
        assert_eq!(body["TransactionDesc"], json!("Order 7"));
    }

    #[tokio::test]
    async fn express_query_requires_id() {
        let fx = Fixture::new().await;
        fx.grant_token("T").await;
        fx.accept("/mpesa/stkpushquery/v1/query").await;
        let client = fx.client();

        let err = client.express_query("").await.unwrap_err();
        assert!(matches!(
            err,
            Error::Validation(ValidationError::CheckoutRequestId)
        ));

        client.express_query("ws_CO_191220191020363925").await.unwrap();
        let body = fx.last_body("/mpesa/stkpushquery/v1/query").await;
        assert_eq!(body["CheckoutRequestID"], json!("ws_CO_191220191020363925"));
    }

    #[tokio::test]
    async fn b2c_carries_fresh_security_credential() {
        let fx = Fixture::new().await;
        fx.grant_token("T").await;
        fx.accept("/mpesa/b2c/v1/paymentrequest").await;

        fx.client()
            .b2c(
                250,
                "254708374149",
                B2cCommandId::BusinessPayment,
                "refund",
                Some("June"),
            )
            .await
            .unwrap();

        let body = fx.last_body("/mpesa/b2c/v1/paymentrequest").await;
        assert_eq!(fx.decrypt(&body["SecurityCredential"]), "Safaricom999!*!");
        assert_eq!(body["InitiatorName"], json!("testapi"));
        assert_eq!(body["PartyA"], json!("600000"));
        assert_eq!(body["PartyB"], json!("254708374149"));
        assert_eq!(body["Amount"], json!(250));
        assert_eq!(body["Occasion"], json!("June"));
        assert_eq!(body["ResultURL"], json!("https://example.com/b2c/result"));
    }

    #[tokio::test]
    async fn b2c_with_missing_certificate_fails_before_sending() {
        let mut fx = Fixture::new().await;
        fx.config.certificates.sandbox = "/no/such/sandbox.cer".into();
        fx.grant_token("T").await;
        fx.accept("/mpesa/b2c/v1/paymentrequest").await;

        let err = fx
            .client()
            .b2c(1, "254708374149", B2cCommandId::SalaryPayment, "r", None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Credential(_)));
        assert!(fx.posted("/mpesa/b2c/v1/paymentrequest").await.is_empty());
    }

    #[tokio::test]
    async fn b2b_does_not_propagate_amount_or_shortcode() {
        let fx = Fixture::new().await;
        fx.grant_token("T").await;
        fx.accept("/mpesa/b2b/v1/paymentrequest").await;

        fx.client().b2b(9_999, "123456").await.unwrap();

        let body = fx.last_body("/mpesa/b2b/v1/paymentrequest").await;
        assert_eq!(body["Amount"], json!(B2B_FIXED_AMOUNT));
        assert_eq!(body["PartyB"], json!(B2B_FIXED_RECEIVER));
        assert_ne!(body["Amount"], json!(9_999));
        assert_ne!(body["PartyB"], json!("123456"));
        assert_eq!(body["PartyA"], json!("600000"));
    }

    #[tokio::test]
    async fn reversal_does_not_propagate_receiver_or_transaction() {
        let fx = Fixture::new().await;
        fx.grant_token("T").await;
        fx.accept("/mpesa/reversal/v1/request").await;

        fx.client()
            .reverse_transaction("254711111111", "OEI2AK4Q16", 30)
            .await
            .unwrap();

        let body = fx.last_body("/mpesa/reversal/v1/request").await;
        assert_eq!(body["TransactionID"], json!(REVERSAL_FIXED_TRANSACTION_ID));
        assert_eq!(body["ReceiverParty"], json!("254708374149"));
        assert_eq!(body["Amount"], json!(30));
        assert_eq!(fx.decrypt(&body["SecurityCredential"]), "Safaricom999!*!");
    }

    #[tokio::test]
    async fn account_commands_hit_their_endpoints() {
        let fx = Fixture::new().await;
        fx.grant_token("T").await;
        for endpoint in [
            "/mpesa/c2b/v1/registerurl",
            "/c2b/v1/simulate",
            "/mpesa/accountbalance/v1/query",
            "/mpesa/transactionstatus/v1/query",
        ] {
            fx.accept(endpoint).await;
        }
        let client = fx.client();

        client.c2b_register_urls().await.unwrap();
        let body = fx.last_body("/mpesa/c2b/v1/registerurl").await;
        assert_eq!(body["ShortCode"], json!("600000"));
        assert_eq!(body["ResponseType"], json!("Completed"));
        assert_eq!(body["ConfirmationURL"], json!("https://example.com/confirm"));
        assert_eq!(body["ValidationURL"], json!("https://example.com/validate"));

        client.simulate_c2b(100, "254708374149", "INV-1").await.unwrap();
        let body = fx.last_body("/c2b/v1/simulate").await;
        assert_eq!(body["CommandID"], json!("CustomerPayBillOnline"));
        assert_eq!(body["Msisdn"], json!("254708374149"));
        assert_eq!(body["BillRefNumber"], json!("INV-1"));

        client.check_balance().await.unwrap();
        let body = fx.last_body("/mpesa/accountbalance/v1/query").await;
        assert_eq!(body["CommandID"], json!("AccountBalance"));
        assert_eq!(body["PartyA"], json!("600000"));
        assert_eq!(body["IdentifierType"], json!("4"));
        assert_eq!(
            body["QueueTimeOutURL"],
            json!("https://example.com/balance/timeout")
        );

        client.transaction_status("OEI2AK4Q16").await.unwrap();
        let body = fx.last_body("/mpesa/transactionstatus/v1/query").await;
        assert_eq!(body["CommandID"], json!("TransactionStatusQuery"));
        assert_eq!(body["TransactionID"], json!("OEI2AK4Q16"));
        assert!(body.get("ResultURL").is_none());
    }
}
