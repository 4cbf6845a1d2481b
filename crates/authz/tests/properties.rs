//! Hierarchy properties over arbitrary grant tables.
#![allow(clippy::expect_used, clippy::unwrap_used, clippy::panic)]

use std::sync::Arc;

use proptest::prelude::*;
use trustcore_authz::{
    GrantSet, MemoryGrantRepository, PermissionEngine, PermissionGrant, Principal, Resource, Role,
};
use trustcore_storage::{MemoryBackend, ResilientStore, ResilientStoreConfig};

const ROLE_PATTERNS: &[&str] = &["viewer", "member", "admin", "owner", "super_admin", "*", "own*"];
const RESOURCE_PATTERNS: &[&str] = &["document:*", "org:*", "org:acme", "billing:*", "*", "*:acme"];
const ACTION_PATTERNS: &[&str] = &["document:read", "org:*", "org:read", "billing:*", "*", "*:read"];

const RESOURCES: &[&str] = &["document:1", "org:acme", "org:globex", "billing:acme"];
const ACTIONS: &[&str] = &["document:read", "org:read", "org:write", "billing:pay"];

fn grant_table() -> impl Strategy<Value = Vec<PermissionGrant>> {
    let grant = (
        prop::sample::select(ROLE_PATTERNS),
        prop::sample::select(RESOURCE_PATTERNS),
        prop::sample::select(ACTION_PATTERNS),
    )
        .prop_map(|(role, resource, action)| PermissionGrant::new(role, resource, action).unwrap());
    prop::collection::vec(grant, 0..12)
}

fn role() -> impl Strategy<Value = Role> {
    prop::sample::select(Role::ALL.to_vec())
}

fn allowed(grants: &GrantSet, role: Role, resource: &str, action: &str) -> bool {
    let principal = Principal::builder().subject("p").role(role).build();
    let resource = Resource::new(resource);
    grants
        .effective(role)
        .iter()
        .any(|g| g.covers(resource.id(), action) && g.applies_to(&principal, &resource))
}

proptest! {
    #[test]
    fn higher_roles_hold_a_superset(grants in grant_table(), high in role(), low in role()) {
        prop_assume!(high > low);
        let set = GrantSet::new(grants).unwrap();

        let upper = set.effective(high);
        for grant in set.effective(low) {
            prop_assert!(upper.iter().any(|g| Arc::ptr_eq(g, grant)), "{high} lost {grant:?}");
        }
    }

    #[test]
    fn decisions_are_monotone_in_rank(
        grants in grant_table(),
        high in role(),
        low in role(),
        resource in prop::sample::select(RESOURCES),
        action in prop::sample::select(ACTIONS),
    ) {
        prop_assume!(high > low);
        let set = GrantSet::new(grants).unwrap();
        if allowed(&set, low, resource, action) {
            prop_assert!(allowed(&set, high, resource, action));
        }
    }

    #[test]
    fn engine_agrees_with_grant_set(
        grants in grant_table(),
        role in role(),
        resource in prop::sample::select(RESOURCES),
        action in prop::sample::select(ACTIONS),
    ) {
        let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
        let expected = allowed(&GrantSet::new(grants.clone()).unwrap(), role, resource, action);

        let decision = runtime.block_on(async {
            let store = ResilientStore::new(
                Arc::new(MemoryBackend::new()),
                "memory",
                ResilientStoreConfig::default(),
            );
            let engine = PermissionEngine::builder()
                .store(store)
                .repository(Arc::new(MemoryGrantRepository::new(grants)))
                .build();
            engine.refresh_grants().await.unwrap();

            let principal = Principal::builder().subject("p").role(role).build();
            let first = engine.check(&principal, &Resource::new(resource), action).await.unwrap();
            let cached = engine.check(&principal, &Resource::new(resource), action).await.unwrap();
            assert_eq!(first, cached);
            first
        });
        prop_assert_eq!(decision.is_allowed(), expected);
    }
}
