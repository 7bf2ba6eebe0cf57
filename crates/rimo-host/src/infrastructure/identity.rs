//! Bearer credential → owner identity.
//!
//! The pairing-code endpoints need to know *whose* code they are handling.
//! That is the job of an [`IdentityProvider`]: given the bearer credential
//! from the `Authorization` header, return the opaque subject id used as
//! the [`OwnerId`] (and as the relay namespace).
//!
//! # `UnverifiedJwtIdentity`
//!
//! The shipped provider decodes the JWT payload and reads its `email`
//! claim, falling back to `sub`.  It does **not** verify the signature; it
//! trusts whatever the front end forwarded.  Deployments exposed beyond a
//! trusted network should plug in a verifying provider instead.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use serde::Deserialize;
use thiserror::Error;

use rimo_core::OwnerId;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdentityError {
    #[error("credential is not a JWT")]
    NotAJwt,
    #[error("JWT payload could not be decoded: {0}")]
    Payload(String),
    #[error("JWT carries neither an email nor a subject")]
    NoSubject,
}

/// Resolves a bearer credential to the caller's owner id.
#[cfg_attr(test, mockall::automock)]
pub trait IdentityProvider: Send + Sync {
    fn resolve(&self, bearer: &str) -> Result<OwnerId, IdentityError>;
}

#[derive(Deserialize)]
struct Claims {
    email: Option<String>,
    sub: Option<String>,
}

/// Reads the subject from a JWT without checking its signature.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnverifiedJwtIdentity;

impl IdentityProvider for UnverifiedJwtIdentity {
    fn resolve(&self, bearer: &str) -> Result<OwnerId, IdentityError> {
        let mut parts = bearer.split('.');
        let (Some(_header), Some(payload), Some(_sig)) = (parts.next(), parts.next(), parts.next())
        else {
            return Err(IdentityError::NotAJwt);
        };

        let bytes = URL_SAFE_NO_PAD
            .decode(payload.trim_end_matches('='))
            .map_err(|e| IdentityError::Payload(e.to_string()))?;
        let claims: Claims =
            serde_json::from_slice(&bytes).map_err(|e| IdentityError::Payload(e.to_string()))?;

        claims
            .email
            .or(claims.sub)
            .filter(|s| !s.is_empty())
            .map(OwnerId::new)
            .ok_or(IdentityError::NoSubject)
    }
}
