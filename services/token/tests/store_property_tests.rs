//! Property-based tests for the refresh-token store contract.
//!
//! Property 1: Conditional updates succeed at most once per record
//! Property 2: Family revocation leaves no unrevoked record behind
//! Property 3: Active records come back ordered by issuance, then insertion

use chrono::Duration;
use proptest::prelude::*;
use test_utils::{epoch, user_id_strategy};
use token_rotation::refresh::{NewRefreshToken, RevokeReason};
use token_rotation::storage::{InMemoryRefreshTokenStore, RefreshTokenStore};
use uuid::Uuid;

fn token(hash: String, user_id: &str, family: Uuid, issued_offset_secs: i64) -> NewRefreshToken {
    let issued_at = epoch() + Duration::seconds(issued_offset_secs);
    NewRefreshToken {
        token_hash: hash,
        user_id: user_id.to_string(),
        tenant_id: None,
        token_family: family,
        issued_at,
        expires_at: issued_at + Duration::days(7),
        created_by_ip: "10.0.0.1".to_string(),
        device_fingerprint: None,
        user_agent: "test".to_string(),
        device_name: "Unknown device".to_string(),
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(50))]

    /// Property 1: Conditional updates succeed at most once per record
    #[test]
    fn prop_conditional_updates_win_once(
        user_id in user_id_strategy(),
        attempts in prop::collection::vec(any::<bool>(), 1..8),
    ) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let store = InMemoryRefreshTokenStore::new();
            store.insert(token("parent".to_string(), &user_id, Uuid::new_v4(), 0)).await.unwrap();

            let mut wins = 0;
            for (i, rotate) in attempts.iter().enumerate() {
                let result = if *rotate {
                    store.mark_rotated("parent", &format!("child-{}", i), epoch()).await
                } else {
                    store.mark_revoked("parent", RevokeReason::UserLogout, None, epoch()).await
                };
                match result {
                    Ok(()) => wins += 1,
                    Err(e) => prop_assert!(e.is_conflict()),
                }
            }
            prop_assert_eq!(wins, 1);

            Ok(())
        })?;
    }

    /// Property 2: Family revocation leaves no unrevoked record behind
    #[test]
    fn prop_revoke_family_is_complete(
        user_id in user_id_strategy(),
        family_size in 1usize..6,
        pre_revoked in 0usize..6,
    ) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let store = InMemoryRefreshTokenStore::new();
            let family = Uuid::new_v4();
            let bystander = Uuid::new_v4();
            for i in 0..family_size {
                store.insert(token(format!("f-{}", i), &user_id, family, 0)).await.unwrap();
            }
            store.insert(token("other".to_string(), &user_id, bystander, 0)).await.unwrap();

            let already = pre_revoked.min(family_size);
            for i in 0..already {
                store
                    .mark_revoked(&format!("f-{}", i), RevokeReason::UserLogout, None, epoch())
                    .await
                    .unwrap();
            }

            let revoked = store.revoke_family(family, RevokeReason::ReuseDetected, epoch()).await.unwrap();
            prop_assert_eq!(revoked, family_size - already);

            for record in store.family_records(family).await {
                prop_assert!(record.revoked_at.is_some());
            }
            let other = store.find_by_hash("other").await.unwrap().unwrap();
            prop_assert!(other.is_unrevoked());

            Ok(())
        })?;
    }

    /// Property 3: Active records come back ordered by issuance, then insertion
    #[test]
    fn prop_active_by_user_is_ordered(
        user_id in user_id_strategy(),
        offsets in prop::collection::vec(0i64..5, 1..10),
    ) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let store = InMemoryRefreshTokenStore::new();
            for (i, offset) in offsets.iter().enumerate() {
                store
                    .insert(token(format!("t-{}", i), &user_id, Uuid::new_v4(), *offset))
                    .await
                    .unwrap();
            }

            let now = epoch() + Duration::seconds(10);
            let active = store.find_active_by_user(&user_id, now).await.unwrap();
            prop_assert_eq!(active.len(), offsets.len());
            for pair in active.windows(2) {
                prop_assert!(pair[0].age_key() < pair[1].age_key());
            }

            Ok(())
        })?;
    }
}
