//! Security credential derivation.
//!
//! Several gateway commands authenticate the initiator with a
//! `SecurityCredential`: the portal password, RSA-encrypted (PKCS#1 v1.5)
//! with the gateway's public certificate and base64-encoded. The certificate
//! is read from disk each time a credential is derived and dropped right
//! after.

use std::fmt;
use std::path::Path;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as b64;
use rsa::pkcs1::DecodeRsaPublicKey;
use rsa::pkcs8::DecodePublicKey;
use rsa::rand_core::OsRng;
use rsa::{Pkcs1v15Encrypt, RsaPublicKey};
use serde::{Deserialize, Serialize};
use x509_cert::Certificate;
use x509_cert::der::{Decode, DecodePem, Encode};

use crate::error::CredentialError;

/// Base64 RSA-encrypted initiator password.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SecurityCredential(String);

impl SecurityCredential {
    /// Encrypts `password` with the public key found in `certificate`.
    ///
    /// Each call uses fresh random padding, so two credentials for the same
    /// password differ.
    ///
    /// # Errors
    ///
    /// Returns [`CredentialError`] if the certificate cannot be read or
    /// decoded, or if encryption fails.
    pub fn derive(password: &str, certificate: &Path) -> Result<Self, CredentialError> {
        let key = load_public_key(certificate)?;
        let encrypted = key.encrypt(&mut OsRng, Pkcs1v15Encrypt, password.as_bytes())?;
        Ok(Self(b64.encode(encrypted)))
    }

    /// Returns the encoded credential.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for SecurityCredential {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Debug for SecurityCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecurityCredential(<redacted>)")
    }
}

/// Reads the RSA public key from a certificate file.
///
/// Accepts a PEM or DER X.509 certificate, a PEM `PUBLIC KEY` or a PEM
/// `RSA PUBLIC KEY`.
fn load_public_key(path: &Path) -> Result<RsaPublicKey, CredentialError> {
    let bytes = std::fs::read(path).map_err(|source| CredentialError::Read {
        path: path.to_path_buf(),
        source,
    })?;

    let public_key_error = |reason: String| CredentialError::PublicKey {
        path: path.to_path_buf(),
        reason,
    };
    let certificate_error = |source| CredentialError::Certificate {
        path: path.to_path_buf(),
        source,
    };

    let Ok(text) = std::str::from_utf8(&bytes) else {
        let cert = Certificate::from_der(&bytes).map_err(certificate_error)?;
        return spki_to_key(&cert, path);
    };

    if text.contains("-----BEGIN CERTIFICATE-----") {
        let cert = Certificate::from_pem(text.trim()).map_err(certificate_error)?;
        spki_to_key(&cert, path)
    } else if text.contains("-----BEGIN PUBLIC KEY-----") {
        RsaPublicKey::from_public_key_pem(text.trim()).map_err(|e| public_key_error(e.to_string()))
    } else if text.contains("-----BEGIN RSA PUBLIC KEY-----") {
        RsaPublicKey::from_pkcs1_pem(text.trim()).map_err(|e| public_key_error(e.to_string()))
    } else {
        let cert = Certificate::from_der(&bytes).map_err(certificate_error)?;
        spki_to_key(&cert, path)
    }
}

fn spki_to_key(cert: &Certificate, path: &Path) -> Result<RsaPublicKey, CredentialError> {
    let der = cert
        .tbs_certificate
        .subject_public_key_info
        .to_der()
        .map_err(|source| CredentialError::Certificate {
            path: path.to_path_buf(),
            source,
        })?;
    RsaPublicKey::from_public_key_der(&der).map_err(|e| CredentialError::PublicKey {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}
