//! Error types for the Daraja client.
//!
//! Every client operation returns [`Error`]. Failures are grouped the way the
//! gateway flow can fail: configuration, token acquisition, client-side
//! validation, the network, the gateway itself, and security credential
//! derivation.

use std::path::PathBuf;

use reqwest::StatusCode;

/// Base error type for Daraja client operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Configuration is missing, unreadable or invalid.
    #[error("{0}")]
    Configuration(#[from] ConfigError),

    /// The OAuth token endpoint rejected the consumer key/secret, or no
    /// token is available to authenticate a request.
    #[error("Authentication failed (HTTP {status}): {body}")]
    Authentication {
        /// Status returned by the token endpoint.
        status: StatusCode,
        /// Raw response body.
        body: String,
    },

    /// A client-side check on the request inputs failed.
    #[error("{0}")]
    Validation(#[from] ValidationError),

    /// HTTP transport error.
    #[error("HTTP error: {context}: {source}")]
    Transport {
        /// Human-readable context.
        context: &'static str,
        /// The underlying reqwest error.
        #[source]
        source: reqwest::Error,
    },

    /// The gateway answered with a non-success HTTP status.
    #[error("Unexpected HTTP status {status}: {context}: {body}")]
    Gateway {
        /// Human-readable context.
        context: &'static str,
        /// The HTTP status code.
        status: StatusCode,
        /// The raw response body.
        body: String,
    },

    /// The security credential could not be derived.
    #[error("{0}")]
    Credential(#[from] CredentialError),

    /// URL parse error.
    #[error("URL parse error: {context}: {source}")]
    UrlParse {
        /// Human-readable context.
        context: &'static str,
        /// The underlying parse error.
        #[source]
        source: url::ParseError,
    },
}

/// Errors raised while resolving configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The named account has no entry in the configuration.
    #[error("Unknown account '{0}'")]
    UnknownAccount(String),

    /// The configuration file could not be read.
    #[error("Failed to read config file {path}: {source}")]
    Read {
        /// Path that was read.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The configuration document is malformed or lacks a required field.
    #[error("Invalid configuration: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Client-side validation failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    /// Amount was below the gateway minimum of 1.
    #[error("Invalid amount {0}: amount should be 1 or more")]
    Amount(u64),

    /// Phone number was not purely numeric.
    #[error("Invalid phone number '{0}': phone number should be in the format 254xxxxxxxxx")]
    Phone(String),

    /// STK query needs the id returned by the push request.
    #[error("Checkout request id cannot be empty")]
    CheckoutRequestId,
}

/// Errors raised while deriving a security credential.
#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    /// The certificate file could not be read.
    #[error("Failed to read certificate {path}: {source}")]
    Read {
        /// Certificate path.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The certificate could not be decoded.
    #[error("Invalid certificate {path}: {source}")]
    Certificate {
        /// Certificate path.
        path: PathBuf,
        /// The underlying DER/PEM error.
        #[source]
        source: x509_cert::der::Error,
    },

    /// The certificate does not carry a usable RSA public key.
    #[error("Invalid RSA public key in {path}: {reason}")]
    PublicKey {
        /// Certificate path.
        path: PathBuf,
        /// Decoder message.
        reason: String,
    },

    /// RSA encryption of the password failed.
    #[error("Failed to encrypt password: {0}")]
    Encrypt(#[from] rsa::Error),
}

/// Convenience alias for results returned by this crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;
