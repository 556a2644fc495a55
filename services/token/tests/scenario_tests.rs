//! End-to-end lifecycle scenarios against the in-memory store.

use chrono::Duration;
use std::sync::Arc;
use std::time::Duration as StdDuration;
use test_utils::{epoch, SampleClient, SIGNING_KEY};
use token_rotation::refresh::{RefreshTokenGenerator, RefreshTokenRecord, RevokeReason, TokenState};
use token_rotation::{
    ClientContext, Clock, InMemoryRefreshTokenStore, JwtAccessTokenSigner, ManualClock, RecordingEventSink,
    RefreshTokenStore, RotationError, RotationPolicy, SecurityEventKind, SigningKeyRing, TokenRotationEngine,
};

struct Fixture {
    engine: Arc<TokenRotationEngine>,
    store: InMemoryRefreshTokenStore,
    clock: ManualClock,
    events: RecordingEventSink,
}

fn fixture(policy: RotationPolicy) -> Fixture {
    let store = InMemoryRefreshTokenStore::new();
    let clock = ManualClock::new(epoch());
    let events = RecordingEventSink::new();
    let keys = SigningKeyRing::new("test-key", SIGNING_KEY).unwrap();
    let signer = JwtAccessTokenSigner::new("auth-platform", "api", Duration::minutes(15), keys);
    let engine = TokenRotationEngine::new(
        Arc::new(store.clone()),
        Arc::new(signer),
        Arc::new(clock.clone()),
        policy,
    )
    .with_event_sink(Arc::new(events.clone()));
    Fixture {
        engine: Arc::new(engine),
        store,
        clock,
        events,
    }
}

fn context(sample: &SampleClient) -> ClientContext {
    ClientContext::new(sample.ip.clone(), sample.user_agent.clone()).with_fingerprint(sample.fingerprint.clone())
}

async fn record_of(f: &Fixture, raw: &str) -> RefreshTokenRecord {
    f.store
        .find_by_hash(&RefreshTokenGenerator::hash(raw))
        .await
        .unwrap()
        .unwrap()
}

/// Scenario A: login, rotate, then replay the first token.
#[tokio::test]
async fn scenario_a_replayed_token_revokes_family() {
    let f = fixture(RotationPolicy::default());
    let laptop = context(&SampleClient::desktop_firefox());

    let token1 = f.engine.issue_initial("alice", None, &laptop).await.unwrap();
    f.clock.advance(Duration::minutes(14));
    let token2 = f.engine.rotate(&token1.refresh_token, &laptop).await.unwrap();

    let err = f.engine.rotate(&token1.refresh_token, &laptop).await.unwrap_err();
    assert_eq!(err, RotationError::TokenReuseDetected);
    assert!(err.is_security_event());

    let current = record_of(&f, &token2.refresh_token).await;
    assert_eq!(current.state(f.clock.now()), TokenState::Revoked);
    assert_eq!(current.revoke_reason, Some(RevokeReason::ReuseDetected));

    // The rotated parent keeps its chain link.
    let parent = record_of(&f, &token1.refresh_token).await;
    assert_eq!(parent.state(f.clock.now()), TokenState::Rotated);
    assert_eq!(parent.replaced_by_token_hash, Some(current.token_hash.clone()));

    let events = f.events.events();
    let reuse: Vec<_> = events
        .iter()
        .filter(|e| e.kind == SecurityEventKind::ReuseDetected)
        .collect();
    assert_eq!(reuse.len(), 1);
    assert_eq!(reuse[0].user_id, "alice");
    assert_eq!(reuse[0].token_family, Some(current.token_family));
}

/// Scenario A, attacker variant: the thief replays from another device.
#[tokio::test]
async fn scenario_a_attacker_replay_logs_attacker_ip() {
    let f = fixture(RotationPolicy::default().with_device_fingerprinting(false));
    let victim = context(&SampleClient::mobile_safari());
    let attacker = context(&SampleClient::attacker());

    let stolen = f.engine.issue_initial("bob", None, &victim).await.unwrap();
    let _ = f.engine.rotate(&stolen.refresh_token, &victim).await.unwrap();

    let err = f.engine.rotate(&stolen.refresh_token, &attacker).await.unwrap_err();
    assert_eq!(err, RotationError::TokenReuseDetected);

    let event = f
        .events
        .events()
        .into_iter()
        .find(|e| e.kind == SecurityEventKind::ReuseDetected)
        .unwrap();
    assert_eq!(event.ip.as_deref(), Some(attacker.ip.as_str()));
}

/// Scenario B: cap of two, three logins.
#[tokio::test]
async fn scenario_b_session_cap_keeps_newest() {
    let f = fixture(RotationPolicy::default().with_max_concurrent_sessions(2));
    let client = context(&SampleClient::desktop_firefox());

    let s1 = f.engine.issue_initial("carol", None, &client).await.unwrap();
    f.clock.advance(Duration::minutes(1));
    let s2 = f.engine.issue_initial("carol", None, &client).await.unwrap();
    f.clock.advance(Duration::minutes(1));
    let s3 = f.engine.issue_initial("carol", None, &client).await.unwrap();

    let now = f.clock.now();
    let first = record_of(&f, &s1.refresh_token).await;
    assert_eq!(first.state(now), TokenState::Revoked);
    assert_eq!(first.revoke_reason, Some(RevokeReason::SessionLimitExceeded));
    assert!(record_of(&f, &s2.refresh_token).await.is_active(now));
    assert!(record_of(&f, &s3.refresh_token).await.is_active(now));
    assert_eq!(f.events.count(SecurityEventKind::SessionEvicted), 1);

    // An evicted session presented again is treated as reuse.
    let err = f.engine.rotate(&s1.refresh_token, &client).await.unwrap_err();
    assert_eq!(err, RotationError::TokenReuseDetected);
}

/// Scenario B with rotation: rotating does not grow the session count.
#[tokio::test]
async fn scenario_b_rotation_does_not_evict() {
    let f = fixture(RotationPolicy::default().with_max_concurrent_sessions(2));
    let client = context(&SampleClient::desktop_firefox());

    let s1 = f.engine.issue_initial("carol", None, &client).await.unwrap();
    let s2 = f.engine.issue_initial("carol", None, &client).await.unwrap();
    let s1b = f.engine.rotate(&s1.refresh_token, &client).await.unwrap();

    let now = f.clock.now();
    assert!(record_of(&f, &s2.refresh_token).await.is_active(now));
    assert!(record_of(&f, &s1b.refresh_token).await.is_active(now));
    assert_eq!(f.events.count(SecurityEventKind::SessionEvicted), 0);
}

/// Scenario C: expired token is rejected without touching anything else.
#[tokio::test]
async fn scenario_c_expired_token_is_benign() {
    let f = fixture(RotationPolicy::default());
    let client = context(&SampleClient::desktop_firefox());

    let old = f.engine.issue_initial("dave", None, &client).await.unwrap();
    f.clock.advance(Duration::days(1));
    let sibling = f.engine.issue_initial("dave", None, &client).await.unwrap();

    f.clock.set(old.refresh_expires_at + Duration::seconds(1));
    let err = f.engine.rotate(&old.refresh_token, &client).await.unwrap_err();
    assert_eq!(err, RotationError::Expired);
    assert!(!err.is_security_event());

    let now = f.clock.now();
    let expired = record_of(&f, &old.refresh_token).await;
    assert_eq!(expired.state(now), TokenState::Expired);
    assert!(expired.revoked_at.is_none());
    assert!(record_of(&f, &sibling.refresh_token).await.is_active(now));
    assert_eq!(f.events.count(SecurityEventKind::ReuseDetected), 0);
}

/// Scenario D: revoke everything after a password change.
#[tokio::test]
async fn scenario_d_revoke_all_for_user() {
    let f = fixture(RotationPolicy::default());
    let laptop = context(&SampleClient::desktop_firefox());
    let phone = context(&SampleClient::mobile_safari());

    let a = f.engine.issue_initial("erin", None, &laptop).await.unwrap();
    let a2 = f.engine.rotate(&a.refresh_token, &laptop).await.unwrap();
    let b = f.engine.issue_initial("erin", None, &phone).await.unwrap();
    let other = f.engine.issue_initial("frank", None, &phone).await.unwrap();

    let revoked = f
        .engine
        .revoke_all_for_user("erin", RevokeReason::AdminRevoked)
        .await
        .unwrap();
    assert_eq!(revoked, 2);

    let now = f.clock.now();
    assert!(f.store.find_active_by_user("erin", now).await.unwrap().is_empty());
    assert!(record_of(&f, &other.refresh_token).await.is_active(now));

    for (raw, device) in [(&a2.refresh_token, &laptop), (&b.refresh_token, &phone)] {
        let err = f.engine.rotate(raw, device).await.unwrap_err();
        assert_eq!(err, RotationError::TokenReuseDetected);
    }
}

/// Two rotations of the same token race; exactly one wins.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_rotation_single_winner() {
    for _ in 0..20 {
        let f = fixture(RotationPolicy::default());
        let client = context(&SampleClient::desktop_firefox());
        let pair = f.engine.issue_initial("grace", None, &client).await.unwrap();

        let handles: Vec<_> = (0..2)
            .map(|_| {
                let engine = Arc::clone(&f.engine);
                let raw = pair.refresh_token.clone();
                let client = client.clone();
                tokio::spawn(async move { engine.rotate(&raw, &client).await })
            })
            .collect();

        let mut results = Vec::new();
        for handle in handles {
            results.push(handle.await.unwrap());
        }

        let successes = results.iter().filter(|r| r.is_ok()).count();
        let reused = results
            .iter()
            .filter(|r| matches!(r, Err(RotationError::TokenReuseDetected)))
            .count();
        assert_eq!(successes, 1);
        assert_eq!(reused, 1);

        // The parent was rotated exactly once.
        let parent = record_of(&f, &pair.refresh_token).await;
        assert_eq!(parent.state(f.clock.now()), TokenState::Rotated);
        assert_eq!(f.store.family_records(parent.token_family).await.len(), 2);
    }
}

/// A store that never answers yields a retryable error, and a retry succeeds.
#[tokio::test]
async fn store_timeout_is_retryable() {
    let f = fixture(RotationPolicy::default().with_store_timeout(StdDuration::from_millis(25)));
    let client = context(&SampleClient::desktop_firefox());
    let pair = f.engine.issue_initial("heidi", None, &client).await.unwrap();

    f.store.set_latency(StdDuration::from_millis(250));
    let err = f.engine.rotate(&pair.refresh_token, &client).await.unwrap_err();
    assert_eq!(err, RotationError::StoreUnavailable);
    assert!(err.is_retryable());
    assert!(!err.requires_reauthentication());

    f.store.set_latency(StdDuration::ZERO);
    assert!(f.engine.rotate(&pair.refresh_token, &client).await.is_ok());
}

/// A rotation whose commit fails leaves the presented token usable.
#[tokio::test]
async fn failed_commit_is_safe_to_retry() {
    let f = fixture(RotationPolicy::default());
    let client = context(&SampleClient::desktop_firefox());
    let pair = f.engine.issue_initial("ivan", None, &client).await.unwrap();

    f.store.set_fail_commits(true);
    let err = f.engine.rotate(&pair.refresh_token, &client).await.unwrap_err();
    assert_eq!(err, RotationError::StoreUnavailable);

    f.store.set_fail_commits(false);
    let record = record_of(&f, &pair.refresh_token).await;
    assert!(record.is_active(f.clock.now()));
    assert_eq!(f.store.family_records(record.token_family).await.len(), 1);

    let next = f.engine.rotate(&pair.refresh_token, &client).await.unwrap();
    assert!(record_of(&f, &next.refresh_token).await.is_active(f.clock.now()));
}

/// Failing logins persist nothing.
#[tokio::test]
async fn unavailable_store_on_login() {
    let f = fixture(RotationPolicy::default());
    f.store.set_unavailable(true);

    let err = f
        .engine
        .issue_initial("judy", Some("tenant-a"), &context(&SampleClient::desktop_firefox()))
        .await
        .unwrap_err();
    assert_eq!(err, RotationError::StoreUnavailable);

    f.store.set_unavailable(false);
    assert!(f.store.is_empty().await);
}

/// Logout of one device keeps the other signed in.
#[tokio::test]
async fn single_device_logout() {
    let f = fixture(RotationPolicy::default());
    let laptop = context(&SampleClient::desktop_firefox());
    let phone = context(&SampleClient::mobile_safari());

    let l = f.engine.issue_initial("ken", None, &laptop).await.unwrap();
    let p = f.engine.issue_initial("ken", None, &phone).await.unwrap();

    assert!(f
        .engine
        .revoke_session_by_token(&l.refresh_token, RevokeReason::UserLogout, Some(laptop.ip.as_str()))
        .await
        .unwrap());

    let now = f.clock.now();
    assert_eq!(record_of(&f, &l.refresh_token).await.state(now), TokenState::Revoked);
    assert!(f.engine.rotate(&p.refresh_token, &phone).await.is_ok());
    assert_eq!(
        f.events.count(SecurityEventKind::SessionRevoked {
            reason: RevokeReason::UserLogout
        }),
        1
    );

    let err = f
        .engine
        .revoke_session_by_token("not-a-token", RevokeReason::UserLogout, None)
        .await
        .unwrap_err();
    assert_eq!(err, RotationError::Malformed);
}
