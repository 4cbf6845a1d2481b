//! End-to-end token lifecycle scenarios.
//!
//! Covers expiry against a manual clock, refresh rotation and reuse
//! detection, signing key rotation with in-flight tokens, and verification
//! while the state store is degraded.
#![allow(clippy::expect_used, clippy::unwrap_used, clippy::panic)]

use std::{sync::Arc, time::Duration};

use trustcore_authn::{
    AuthError, IssueRequest, RevocationOutcome, RevocationReason, TokenConfig, assert_auth_error,
    testutil::{TEST_COOLDOWN, TestHarness},
};

fn login(subject: &str) -> IssueRequest {
    IssueRequest::builder()
        .subject(subject)
        .org_id("acme")
        .scopes(vec!["docs:read".into()])
        .role("member")
        .build()
}

// ===========================================================================
// Expiry and refresh rotation
// ===========================================================================

#[tokio::test]
async fn access_expires_at_minute_16_and_refresh_reuse_revokes_family() {
    let h = TestHarness::with_config(
        TokenConfig::builder()
            .access_ttl(Duration::from_secs(15 * 60))
            .refresh_ttl(Duration::from_secs(30 * 24 * 3600))
            .build()
            .unwrap(),
    )
    .await;

    let original = h.service.issue_pair(&login("user-1")).await.unwrap();
    h.service.verify_access(&original.access_token).await.expect("fresh access token");

    h.clock.advance(Duration::from_secs(16 * 60));
    assert_auth_error!(h.service.verify_access(&original.access_token).await, TokenExpired);

    // The refresh token is still valid and may be exchanged once.
    let rotated = h.service.rotate_refresh(&original.refresh_token).await.unwrap();
    assert_eq!(rotated.family_id, original.family_id);
    let principal = h.service.verify_access(&rotated.access_token).await.unwrap().principal();
    assert_eq!(principal.subject, "user-1");
    assert_eq!(principal.org_id.as_deref(), Some("acme"));

    // Presenting the superseded refresh token is a theft signal.
    assert_auth_error!(h.service.rotate_refresh(&original.refresh_token).await, TokenRevoked);

    // Every token in the family now fails, the newest included.
    assert_auth_error!(h.service.verify(&rotated.access_token).await, TokenRevoked);
    assert_auth_error!(h.service.verify(&rotated.refresh_token).await, TokenRevoked);
    assert_auth_error!(h.service.rotate_refresh(&rotated.refresh_token).await, TokenRevoked);
}

#[tokio::test]
async fn refresh_chain_rotates_repeatedly() {
    let h = TestHarness::new().await;
    let mut pair = h.service.issue_pair(&login("user-2")).await.unwrap();
    let family = pair.family_id.clone();

    for _ in 0..5 {
        h.clock.advance(Duration::from_secs(60));
        pair = h.service.rotate_refresh(&pair.refresh_token).await.unwrap();
        assert_eq!(pair.family_id, family);
    }
    h.service.verify_access(&pair.access_token).await.unwrap();
}

#[tokio::test]
async fn other_families_survive_reuse_revocation() {
    let h = TestHarness::new().await;
    let laptop = h.service.issue_pair(&login("user-3")).await.unwrap();
    let phone = h.service.issue_pair(&login("user-3")).await.unwrap();
    assert_ne!(laptop.family_id, phone.family_id);

    h.service.rotate_refresh(&laptop.refresh_token).await.unwrap();
    assert_auth_error!(h.service.rotate_refresh(&laptop.refresh_token).await, TokenRevoked);

    h.service.verify_access(&phone.access_token).await.unwrap();
    h.service.rotate_refresh(&phone.refresh_token).await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_rotation_of_one_token_has_single_winner() {
    let h = Arc::new(TestHarness::new().await);
    let pair = h.service.issue_pair(&login("user-4")).await.unwrap();

    let mut handles = Vec::new();
    for _ in 0..8 {
        let h = Arc::clone(&h);
        let token = pair.refresh_token.clone();
        handles.push(tokio::spawn(async move { h.service.rotate_refresh(&token).await }));
    }

    let mut winners = Vec::new();
    for handle in handles {
        match handle.await.unwrap() {
            Ok(new_pair) => winners.push(new_pair),
            Err(err) => assert!(matches!(err, AuthError::TokenRevoked), "unexpected {err:?}"),
        }
    }
    assert!(winners.len() <= 1, "at most one rotation may succeed, got {}", winners.len());

    // Losers revoked the family, so even the winner's tokens are dead.
    for pair in winners {
        assert_auth_error!(h.service.verify(&pair.access_token).await, TokenRevoked);
    }
}

// ===========================================================================
// Revocation
// ===========================================================================

#[tokio::test]
async fn revoked_token_fails_although_signature_is_valid() {
    let h = TestHarness::new().await;
    let pair = h.service.issue_pair(&login("user-5")).await.unwrap();
    let jti = h.service.verify(&pair.access_token).await.unwrap().claims.jti;

    let outcome = h.service.revoke_token(&jti, RevocationReason::Logout).await;
    assert_eq!(outcome, RevocationOutcome::Recorded);

    assert_auth_error!(h.service.verify(&pair.access_token).await, TokenRevoked);
}

// ===========================================================================
// Signing key rotation
// ===========================================================================

#[tokio::test]
async fn ten_tokens_survive_rotation_until_retirement() {
    let grace = Duration::from_secs(5 * 60);
    let h = TestHarness::with_config(TokenConfig::builder().key_grace_period(grace).build().unwrap())
        .await;

    let mut tokens = Vec::new();
    for i in 0..10 {
        let pair = h.service.issue_pair(&login(&format!("user-{i}"))).await.unwrap();
        tokens.push(pair.access_token);
    }
    let old_kid = h.ring.active_kid().unwrap();

    let new_kid = h.rotator.rotate_now().await.unwrap();
    assert_ne!(old_kid, new_kid);
    assert_eq!(h.service.jwks().keys.len(), 2);

    for token in &tokens {
        h.service.verify_access(token).await.expect("verifies during grace window");
    }
    let fresh = h.service.issue_pair(&login("user-new")).await.unwrap();
    h.service.verify_access(&fresh.access_token).await.unwrap();

    h.clock.advance(grace);
    assert_eq!(h.rotator.retire_expired().await.unwrap(), 1);
    assert!(h.service.jwks().find(&old_kid).is_none());

    for token in &tokens {
        let result = h.service.verify_access(token).await;
        assert!(
            matches!(&result, Err(AuthError::KeyNotFound { kid }) if *kid == old_kid),
            "expected KeyNotFound for retired key, got {result:?}"
        );
    }
    // Tokens from the new key are unaffected.
    h.service.verify_access(&fresh.access_token).await.unwrap();
}

// ===========================================================================
// Degraded state store
// ===========================================================================

#[tokio::test]
async fn verify_proceeds_flagged_when_store_fails() {
    let h = TestHarness::new().await;
    let pair = h.service.issue_pair(&login("user-6")).await.unwrap();

    h.backend.fail();
    let verified = h.service.verify_access(&pair.access_token).await.unwrap();
    assert!(verified.degraded);
    assert_eq!(verified.principal().subject, "user-6");
}

#[tokio::test]
async fn open_circuit_skips_backend_during_verification() {
    let h = TestHarness::new().await;
    let pair = h.service.issue_pair(&login("user-7")).await.unwrap();

    h.open_circuit().await;
    let calls_before = h.backend.calls();

    let verified = h.service.verify_access(&pair.access_token).await.unwrap();
    assert!(verified.degraded);
    assert_eq!(h.backend.calls(), calls_before, "open breaker must not call the backend");
}

#[tokio::test]
async fn cached_revocation_still_rejects_while_degraded() {
    let h = TestHarness::new().await;
    let pair = h.service.issue_pair(&login("user-8")).await.unwrap();
    let jti = h.service.verify(&pair.access_token).await.unwrap().claims.jti;
    let _ = h.service.revoke_token(&jti, RevocationReason::Compromised).await;

    // A successful read caches the revocation record.
    assert_auth_error!(h.service.verify(&pair.access_token).await, TokenRevoked);

    h.open_circuit().await;
    assert_auth_error!(h.service.verify(&pair.access_token).await, TokenRevoked);
}

#[tokio::test]
async fn writes_fail_explicitly_while_degraded() {
    let h = TestHarness::new().await;
    let pair = h.service.issue_pair(&login("user-9")).await.unwrap();
    let jti = h.service.verify(&pair.access_token).await.unwrap().claims.jti;

    h.open_circuit().await;

    let outcome = h.service.revoke_token(&jti, RevocationReason::Logout).await;
    assert_eq!(outcome, RevocationOutcome::NotPersisted);

    let rotated = h.service.rotate_refresh(&pair.refresh_token).await;
    assert!(matches!(&rotated, Err(err) if err.is_retryable()), "got {rotated:?}");

    let issued = h.service.issue_pair(&login("user-9")).await;
    assert!(matches!(issued, Err(AuthError::BackendUnavailable { .. })));
}

#[tokio::test]
async fn service_recovers_after_cooldown() {
    let h = TestHarness::new().await;
    let pair = h.service.issue_pair(&login("user-10")).await.unwrap();

    h.open_circuit().await;
    h.backend.heal();
    tokio::time::sleep(TEST_COOLDOWN + Duration::from_millis(20)).await;

    // Half-open probes succeed and close the circuit again.
    for _ in 0..3 {
        let verified = h.service.verify_access(&pair.access_token).await.unwrap();
        assert!(!verified.degraded);
    }
    assert!(!h.store.is_degraded());
    h.service.rotate_refresh(&pair.refresh_token).await.unwrap();
}
