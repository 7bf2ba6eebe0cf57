//! End-to-end credential flows through the public `rimo_core` API.

use std::sync::Arc;
use std::time::Duration;

use rimo_core::credentials::{DEFAULT_PAIRING_TTL, DEFAULT_TOKEN_TTL};
use rimo_core::{CredentialError, CredentialStore, ManualClock, OwnerId, SAME_MACHINE_TOKEN};

#[test]
fn test_pairing_code_exchange_then_token_expiry() {
    // Arrange
    let clock = Arc::new(ManualClock::new());
    let mut store = CredentialStore::new(clock.clone());
    let owner = OwnerId::new("owner-u");
    store.register_pairing_code(owner.clone(), "AB12CD").unwrap();

    // Act: exchange the code within its lifetime.
    clock.advance(Duration::from_secs(14 * 60));
    let token = store.validate_pairing_code(&owner, "AB12CD").unwrap();

    // Assert: the exchanged token outlives the code.
    assert!(store.is_token_valid(&token.value));
    clock.advance(Duration::from_secs(2 * 60));
    assert_eq!(
        store.validate_pairing_code(&owner, "AB12CD"),
        Err(CredentialError::Expired)
    );
    assert!(store.is_token_valid(&token.value));

    clock.advance(DEFAULT_TOKEN_TTL);
    assert!(!store.is_token_valid(&token.value));
}

#[test]
fn test_reissued_code_invalidates_previous_for_owner_only() {
    let clock = Arc::new(ManualClock::new());
    let mut store = CredentialStore::new(clock);
    let alice = OwnerId::new("alice");
    let bob = OwnerId::new("bob");

    let first = store.issue_pairing_code(alice.clone());
    let bobs = store.issue_pairing_code(bob.clone());
    let second = store.issue_pairing_code(alice.clone());

    if first.value != second.value {
        assert_eq!(
            store.validate_pairing_code(&alice, &first.value),
            Err(CredentialError::Invalid)
        );
    }
    assert!(store.validate_pairing_code(&alice, &second.value).is_ok());
    assert!(store.validate_pairing_code(&bob, &bobs.value).is_ok());
}

#[test]
fn test_custom_ttls_are_honoured() {
    let clock = Arc::new(ManualClock::new());
    let mut store =
        CredentialStore::with_ttls(clock.clone(), Duration::from_secs(5), DEFAULT_PAIRING_TTL);

    let token = store.issue_token();
    clock.advance(Duration::from_secs(5));

    assert!(!store.is_token_valid(&token.value));
    assert!(store.is_token_valid(SAME_MACHINE_TOKEN));
}
