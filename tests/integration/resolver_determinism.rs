//! Property tests for context resolution across providers

use super::support::{context_tree, FakeProvider};
use dataprivacy::privacy::{PrivacyManager, ProviderRegistry};
use dataprivacy::types::{ContextId, UserId};
use proptest::prelude::*;
use std::collections::BTreeSet;
use std::sync::Arc;

fn manager(holdings: &[Vec<u64>], user: UserId) -> PrivacyManager {
    let order: Vec<usize> = (0..holdings.len()).collect();
    manager_in_order(holdings, &order, user)
}

/// Register `component_<i>` holding `holdings[i]`, in the given order.
fn manager_in_order(holdings: &[Vec<u64>], order: &[usize], user: UserId) -> PrivacyManager {
    let mut registry = ProviderRegistry::new();
    for &i in order {
        let ids: Vec<ContextId> = holdings[i].iter().copied().map(ContextId).collect();
        let provider = FakeProvider::new(&format!("component_{}", i)).holding(user, &ids);
        registry.register(Arc::new(provider)).unwrap();
    }
    PrivacyManager::new(Arc::new(registry), Arc::new(context_tree()))
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .build()
        .unwrap()
}

/// Resolution reports exactly what each provider holds, sorted and deduplicated,
/// and leaves out providers holding nothing.
#[test]
fn test_resolution_matches_provider_holdings() {
    let mut runner = proptest::test_runner::TestRunner::default();
    let rt = runtime();

    runner
        .run(
            &prop::collection::vec(prop::collection::vec(1u64..50, 0..8), 1..6),
            |holdings| {
                let user = UserId(2);
                let manager = manager(&holdings, user);
                let resolved = rt.block_on(manager.get_contexts_for_user(user)).unwrap();

                let non_empty = holdings.iter().filter(|h| !h.is_empty()).count();
                prop_assert_eq!(resolved.len(), non_empty);

                for (i, held) in holdings.iter().enumerate() {
                    let component = format!("component_{}", i);
                    let expected: BTreeSet<ContextId> = held.iter().copied().map(ContextId).collect();
                    match resolved.get(&component) {
                        Some(list) => {
                            let ids = list.context_ids();
                            prop_assert!(ids.windows(2).all(|w| w[0] < w[1]));
                            prop_assert_eq!(ids.into_iter().collect::<BTreeSet<_>>(), expected);
                            prop_assert_eq!(list.component(), component.as_str());
                        }
                        None => prop_assert!(expected.is_empty()),
                    }
                }

                let union: BTreeSet<ContextId> = holdings.iter().flatten().copied().map(ContextId).collect();
                prop_assert_eq!(
                    resolved.all_contexts().context_ids().into_iter().collect::<BTreeSet<_>>(),
                    union
                );
                Ok(())
            },
        )
        .unwrap();
}

/// Resolving twice gives the same collection, and approving everything keeps it intact.
#[test]
fn test_resolution_is_repeatable() {
    let mut runner = proptest::test_runner::TestRunner::default();
    let rt = runtime();

    runner
        .run(
            &prop::collection::vec(prop::collection::vec(1u64..20, 0..5), 1..4),
            |holdings| {
                let user = UserId(7);
                let manager = manager(&holdings, user);
                let first = rt.block_on(manager.get_contexts_for_user(user)).unwrap();
                let second = rt.block_on(manager.get_contexts_for_user(user)).unwrap();
                prop_assert_eq!(&first, &second);

                let approved = first.approve_all();
                prop_assert_eq!(approved.user(), user);
                prop_assert_eq!(approved.len(), first.len());
                for list in first.iter() {
                    let approved_list = approved.get(list.component()).unwrap();
                    prop_assert_eq!(approved_list.context_ids().to_vec(), list.context_ids());
                }
                Ok(())
            },
        )
        .unwrap();
}

/// The resolved set does not depend on the order providers were registered in.
#[test]
fn test_resolution_ignores_registration_order() {
    let mut runner = proptest::test_runner::TestRunner::default();
    let rt = runtime();

    let strategy = prop::collection::vec(prop::collection::vec(1u64..30, 0..6), 1..6).prop_flat_map(|holdings| {
        let order: Vec<usize> = (0..holdings.len()).collect();
        (Just(holdings), Just(order).prop_shuffle())
    });

    runner
        .run(&strategy, |(holdings, shuffled)| {
            let user = UserId(3);
            let in_order = rt
                .block_on(manager(&holdings, user).get_contexts_for_user(user))
                .unwrap();
            let permuted = rt
                .block_on(manager_in_order(&holdings, &shuffled, user).get_contexts_for_user(user))
                .unwrap();

            prop_assert_eq!(in_order.len(), permuted.len());
            for list in in_order.iter() {
                let other = permuted.get(list.component());
                prop_assert!(other.is_some());
                prop_assert_eq!(other.map(|l| l.context_ids()), Some(list.context_ids()));
            }
            prop_assert_eq!(
                in_order.all_contexts().context_ids(),
                permuted.all_contexts().context_ids()
            );
            Ok(())
        })
        .unwrap();
}

/// Registering the same component twice is refused.
#[test]
fn test_duplicate_component_is_rejected() {
    let mut registry = ProviderRegistry::new();
    registry
        .register(Arc::new(FakeProvider::new("mod_forum")))
        .unwrap();
    let err = registry
        .register(Arc::new(FakeProvider::new("mod_forum")))
        .unwrap_err();
    assert!(matches!(err, dataprivacy::PrivacyError::DuplicateComponent(ref c) if c == "mod_forum"));
}
