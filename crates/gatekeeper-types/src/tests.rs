//! Unit tests for gatekeeper-types

use proptest::prelude::*;
use test_case::test_case;

use crate::{Action, ProfileId, ResourceKind, RuleId, Timestamp, UserId, Verb, derive_id};

// ============================================================================
// Entity ID Tests
// ============================================================================

#[test]
fn derived_ids_are_stable() {
    let first = derive_id(ResourceKind::User, &["John", "User", "john@example.com"]);
    let second = derive_id(ResourceKind::User, &["John", "User", "john@example.com"]);
    assert_eq!(first, second);
}

#[test]
fn derived_ids_separate_kinds() {
    let as_user = derive_id(ResourceKind::User, &["ops", "operators"]);
    let as_profile = derive_id(ResourceKind::Profile, &["ops", "operators"]);
    assert_ne!(as_user, as_profile);
}

#[test]
fn derived_ids_separate_field_boundaries() {
    let a = derive_id(ResourceKind::Rule, &["ab", "c"]);
    let b = derive_id(ResourceKind::Rule, &["a", "bc"]);
    assert_ne!(a, b);
}

#[test]
fn entity_id_zero_and_display() {
    assert!(RuleId::ZERO.is_zero());
    assert!(!RuleId::new(9999).is_zero());
    assert_eq!(UserId::new(42).to_string(), "42");
    assert_eq!(u64::from(ProfileId::from(7)), 7);
}

#[test]
fn entity_id_serializes_transparently() {
    let json = serde_json::to_string(&RuleId::new(9999)).unwrap();
    assert_eq!(json, "9999");
}

// ============================================================================
// ResourceKind Tests
// ============================================================================

#[test_case(ResourceKind::None, ""; "none")]
#[test_case(ResourceKind::Url, "url"; "url")]
#[test_case(ResourceKind::Organization, "organization"; "organization")]
#[test_case(ResourceKind::All, "*"; "all")]
fn resource_kind_display(kind: ResourceKind, expected: &str) {
    assert_eq!(kind.to_string(), expected);
}

#[test]
fn resource_kind_numeric_tags_roundtrip() {
    for value in 0..=9 {
        let kind = ResourceKind::from_u32(value).unwrap();
        assert_eq!(kind.as_u32(), value);
    }
    assert_eq!(ResourceKind::from_u32(10), None);
}

#[test]
fn concrete_kinds_exclude_sentinels() {
    assert!(!ResourceKind::CONCRETE.contains(&ResourceKind::None));
    assert!(!ResourceKind::CONCRETE.contains(&ResourceKind::All));
}

// ============================================================================
// Verb Tests
// ============================================================================

#[test]
fn verb_intersection_grants() {
    let read_list = Verb::READ | Verb::LIST;
    assert!(read_list.grants(Verb::READ));
    assert!(read_list.grants(Verb::LIST));
    assert!(!read_list.grants(Verb::DELETE));
    assert!(Verb::ALL.grants(Verb::EXECUTE));
}

#[test]
fn verb_request_validity() {
    assert!(Verb::READ.is_valid_request());
    assert!(!Verb::empty().is_valid_request());
    assert!(!Verb::from_bits_retain(1 << 6).is_valid_request());
}

#[test_case(Verb::READ, "read"; "single")]
#[test_case(Verb::READ | Verb::LIST, "read|list"; "pair")]
#[test_case(Verb::ALL, "*"; "all")]
#[test_case(Verb::empty(), "none"; "empty")]
fn verb_display(verb: Verb, expected: &str) {
    assert_eq!(verb.to_string(), expected);
}

// ============================================================================
// Action Tests
// ============================================================================

#[test]
fn action_names_and_targets() {
    let forward = Action::AllowAndForward {
        next_rule_id: RuleId::new(9999),
    };
    assert_eq!(Action::Allow.name(), "allow");
    assert_eq!(Action::Deny.name(), "deny");
    assert_eq!(forward.name(), "allow_and_forward");
    assert_eq!(forward.next_rule_id(), Some(RuleId::new(9999)));
    assert_eq!(Action::Allow.next_rule_id(), None);
    assert!(forward.is_allow());
    assert!(Action::Deny.is_deny());
}

#[test]
fn action_serializes_tagged() {
    let forward = Action::AllowAndForward {
        next_rule_id: RuleId::new(5),
    };
    let json = serde_json::to_value(forward).unwrap();
    assert_eq!(json["action"], "allow_and_forward");
    assert_eq!(json["next_rule_id"], 5);
}

// ============================================================================
// Timestamp Tests
// ============================================================================

#[test]
fn monotonic_timestamps_strictly_increase() {
    let far_future = Timestamp::from_nanos(u64::MAX / 2);
    let next = Timestamp::now_monotonic(Some(far_future));
    assert!(next > far_future);
}

#[test]
fn timestamp_display_is_secs_dot_nanos() {
    assert_eq!(Timestamp::from_nanos(1_500_000_000).to_string(), "1.500000000");
}

proptest! {
    /// Property: a derived ID is never the reserved zero value.
    #[test]
    fn prop_derived_id_never_zero(name in ".*", description in ".*") {
        prop_assert_ne!(derive_id(ResourceKind::Rule, &[&name, &description]), 0);
    }

    /// Property: ALL grants any request carrying a valid bit.
    #[test]
    fn prop_all_grants_every_valid_request(bits in 1u8..64) {
        let requested = Verb::from_bits_retain(bits);
        prop_assert!(Verb::ALL.grants(requested));
    }
}
