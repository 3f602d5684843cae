#![cfg_attr(docsrs, feature(doc_auto_cfg))]

//! Client for Safaricom's Daraja (M-Pesa) payment gateway.
//!
//! The crate wraps the gateway's REST commands behind a single client,
//! [`Mpesa`], bound to one paybill account from a [`DarajaConfig`]. The client
//! obtains OAuth access tokens, encrypts the initiator password into a
//! security credential, builds each command's JSON body and posts it.
//! Responses are returned as raw text.
//!
//! # Example
//!
//! ```no_run
//! use daraja::{DarajaConfig, Mpesa};
//!
//! # async fn run() -> Result<(), daraja::Error> {
//! let config = DarajaConfig::load()?;
//! let mpesa = Mpesa::new(config, "staging").await?;
//! let response = mpesa
//!     .express_checkout(10, "254708374149", Some("INV-1"), None)
//!     .await?;
//! println!("{}", response.body);
//! # Ok(())
//! # }
//! ```
//!
//! # Modules
//!
//! - [`client`] - The gateway client and its commands
//! - [`config`] - Global and per-account settings, TOML loading
//! - [`credential`] - RSA security credential derivation
//! - [`error`] - Error types
//! - [`payload`] - Request bodies of each gateway command
//! - [`timestamp`] - Gateway timestamps and the Lipa Na M-Pesa password
//! - [`token`] - OAuth access tokens
//!
//! # Feature Flags
//!
//! - `telemetry` - Enables tracing instrumentation for debugging and monitoring

pub mod client;
pub mod config;
pub mod credential;
pub mod error;
pub mod payload;
pub mod timestamp;
pub mod token;

pub use client::{GatewayResponse, Mpesa};
pub use config::{AccountConfig, DarajaConfig, Environment};
pub use error::{Error, Result};
pub use payload::B2cCommandId;
