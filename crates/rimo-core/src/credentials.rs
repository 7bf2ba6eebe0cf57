//! Ephemeral connection tokens and pairing codes.
//!
//! # Two kinds of secret (for beginners)
//!
//! - A **token** is the capability to open the direct channel.  It is short
//!   (8 hex characters, so it fits in a QR code next to the host address),
//!   lives for one hour by default, and is never mutated after issue.
//!
//! - A **pairing code** is a 6-character value a person can type.  It is
//!   bound to one owner identity, lives for 15 minutes, and can be exchanged
//!   any number of times for a *fresh* token until it expires.  Issuing a new
//!   code for the same owner replaces the old one.
//!
//! Nothing is persisted: restarting the host invalidates every secret.
//!
//! # Time
//!
//! Every expiry check reads the injected [`Clock`], so tests drive time with
//! [`ManualClock::advance`] instead of sleeping.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use rand::Rng;
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use crate::domain::device::OwnerId;

/// Token that the host's own loopback client presents; always accepted.
pub const SAME_MACHINE_TOKEN: &str = "pc-internal";

/// Default lifetime of a connection token.
pub const DEFAULT_TOKEN_TTL: Duration = Duration::from_secs(60 * 60);

/// Default lifetime of a pairing code.
pub const DEFAULT_PAIRING_TTL: Duration = Duration::from_secs(15 * 60);

/// Length of a pairing code.
pub const PAIRING_CODE_LEN: usize = 6;

const TOKEN_LEN: usize = 8;
const PAIRING_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

// ── Clock ─────────────────────────────────────────────────────────────────────

/// Source of monotonic time for expiry decisions.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

/// Wall-clock implementation backed by [`Instant::now`].
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Test clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    base: Instant,
    offset: Mutex<Duration>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            base: Instant::now(),
            offset: Mutex::new(Duration::ZERO),
        }
    }

    /// Moves the clock forward by `by`.
    pub fn advance(&self, by: Duration) {
        let mut offset = self.offset.lock().unwrap_or_else(|e| e.into_inner());
        *offset += by;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        let offset = *self.offset.lock().unwrap_or_else(|e| e.into_inner());
        self.base + offset
    }
}

// ── Types ─────────────────────────────────────────────────────────────────────

/// Why a pairing code was not accepted.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CredentialError {
    /// No code for this owner, or the candidate does not match.
    #[error("pairing code is invalid")]
    Invalid,
    /// The code matched but its lifetime has elapsed.
    #[error("pairing code has expired")]
    Expired,
    /// The supplied code is not 6 ASCII letters or digits.
    #[error("pairing code must be 6 letters or digits")]
    Malformed,
}

/// An issued connection token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub value: String,
    pub issued_at: Instant,
    pub expires_at: Instant,
}

/// The live pairing code of one owner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PairingCode {
    pub value: String,
    pub owner: OwnerId,
    pub expires_at: Instant,
}

// ── Store ─────────────────────────────────────────────────────────────────────

/// Process-wide store of live tokens and pairing codes.
pub struct CredentialStore {
    clock: Arc<dyn Clock>,
    token_ttl: Duration,
    pairing_ttl: Duration,
    tokens: HashMap<String, Token>,
    pairing_codes: HashMap<OwnerId, PairingCode>,
}

impl CredentialStore {
    /// Creates a store with the default lifetimes (1 h tokens, 15 min codes).
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self::with_ttls(clock, DEFAULT_TOKEN_TTL, DEFAULT_PAIRING_TTL)
    }

    pub fn with_ttls(clock: Arc<dyn Clock>, token_ttl: Duration, pairing_ttl: Duration) -> Self {
        Self {
            clock,
            token_ttl,
            pairing_ttl,
            tokens: HashMap::new(),
            pairing_codes: HashMap::new(),
        }
    }

    /// Issues a fresh token, unique among live tokens.
    pub fn issue_token(&mut self) -> Token {
        let now = self.clock.now();
        self.tokens.retain(|_, t| now < t.expires_at);

        let value = loop {
            let candidate: String = Uuid::new_v4().simple().to_string()[..TOKEN_LEN].to_owned();
            if !self.tokens.contains_key(&candidate) && candidate != SAME_MACHINE_TOKEN {
                break candidate;
            }
        };

        let token = Token {
            value: value.clone(),
            issued_at: now,
            expires_at: now + self.token_ttl,
        };
        self.tokens.insert(value, token.clone());
        debug!(token = %redact(&token.value), "issued connection token");
        token
    }

    /// Returns `true` for the same-machine sentinel or a known, unexpired
    /// token.
    ///
    /// Unknown and expired tokens are indistinguishable to the caller.  An
    /// expired token is dropped from the store when it is looked up.
    pub fn is_token_valid(&mut self, token: &str) -> bool {
        if token == SAME_MACHINE_TOKEN {
            return true;
        }
        let now = self.clock.now();
        match self.tokens.get(token) {
            Some(t) if now < t.expires_at => true,
            Some(_) => {
                self.tokens.remove(token);
                false
            }
            None => false,
        }
    }

    /// Mints a random pairing code for `owner`, replacing any previous one.
    pub fn issue_pairing_code(&mut self, owner: OwnerId) -> PairingCode {
        let mut rng = rand::thread_rng();
        let value: String = (0..PAIRING_CODE_LEN)
            .map(|_| PAIRING_ALPHABET[rng.gen_range(0..PAIRING_ALPHABET.len())] as char)
            .collect();
        self.store_pairing_code(owner, value)
    }

    /// Registers a code chosen by the host UI for `owner`, replacing any
    /// previous one.
    ///
    /// Letters are upper-cased so that entry is case-insensitive.
    ///
    /// # Errors
    ///
    /// [`CredentialError::Malformed`] unless `value` is exactly six ASCII
    /// letters or digits.
    pub fn register_pairing_code(
        &mut self,
        owner: OwnerId,
        value: &str,
    ) -> Result<PairingCode, CredentialError> {
        if value.len() != PAIRING_CODE_LEN || !value.bytes().all(|b| b.is_ascii_alphanumeric()) {
            return Err(CredentialError::Malformed);
        }
        Ok(self.store_pairing_code(owner, value.to_ascii_uppercase()))
    }

    /// Exchanges a pairing code for a fresh token.
    ///
    /// The code stays valid until it expires, so it can be entered again on
    /// another device.
    ///
    /// # Errors
    ///
    /// [`CredentialError::Invalid`] when `owner` has no code or the candidate
    /// differs; [`CredentialError::Expired`] when the code's lifetime has
    /// elapsed (the code is removed).
    pub fn validate_pairing_code(
        &mut self,
        owner: &OwnerId,
        candidate: &str,
    ) -> Result<Token, CredentialError> {
        let now = self.clock.now();
        let code = self
            .pairing_codes
            .get(owner)
            .ok_or(CredentialError::Invalid)?;

        if now >= code.expires_at {
            self.pairing_codes.remove(owner);
            return Err(CredentialError::Expired);
        }
        if !code.value.eq_ignore_ascii_case(candidate.trim()) {
            return Err(CredentialError::Invalid);
        }
        Ok(self.issue_token())
    }

    /// Drops every expired token and pairing code.
    pub fn purge_expired(&mut self) {
        let now = self.clock.now();
        self.tokens.retain(|_, t| now < t.expires_at);
        self.pairing_codes.retain(|_, c| now < c.expires_at);
    }

    /// The code currently registered for `owner`, expired or not.
    pub fn pairing_code(&self, owner: &OwnerId) -> Option<&PairingCode> {
        self.pairing_codes.get(owner)
    }

    /// Number of tokens still held (expired ones count until purged).
    pub fn live_token_count(&self) -> usize {
        self.tokens.len()
    }

    fn store_pairing_code(&mut self, owner: OwnerId, value: String) -> PairingCode {
        let code = PairingCode {
            value,
            owner: owner.clone(),
            expires_at: self.clock.now() + self.pairing_ttl,
        };
        debug!(%owner, "registered pairing code");
        self.pairing_codes.insert(owner, code.clone());
        code
    }
}

/// Shortens a secret for logging: first three characters then `...`.
pub fn redact(secret: &str) -> String {
    let head: String = secret.chars().take(3).collect();
    format!("{head}...")
}

// ── Tests ─────────────────────────────────────────────────────────────────────
