//! Profiles: named bundles of rules.
//!
//! A profile keeps a rule index keyed by target kind. Within a kind, rules
//! stay in insertion order; that order is the tie-break order the evaluator
//! walks. Every rule remembers the indices it is filed in, so re-targeting a
//! rule moves it to its new bucket in each of them.

use std::collections::HashMap;
use std::fmt::Display;
use std::sync::{Arc, RwLock, Weak};

use gatekeeper_types::{ProfileId, ResourceKind, RuleId, Timestamp, derive_id};
use tracing::{debug, warn};

use crate::record::{ProfileRecord, to_datetime};
use crate::rule::Rule;
use crate::sync;

#[derive(Debug)]
struct ProfileState {
    name: String,
    description: String,
    rules: HashMap<ResourceKind, Vec<Arc<Rule>>>,
    updated_at: Timestamp,
    deleted_at: Option<Timestamp>,
}

impl ProfileState {
    fn touch(&mut self) {
        self.updated_at = Timestamp::now_monotonic(Some(self.updated_at));
    }

    fn contains(&self, rule_id: RuleId) -> bool {
        self.rules
            .values()
            .any(|bucket| bucket.iter().any(|r| r.id() == rule_id))
    }

    fn detach(&mut self, rule_id: RuleId) -> Option<Arc<Rule>> {
        let mut removed = None;
        self.rules.retain(|_, bucket| {
            if let Some(pos) = bucket.iter().position(|r| r.id() == rule_id) {
                removed = Some(bucket.remove(pos));
            }
            !bucket.is_empty()
        });
        removed
    }

    fn refile(&mut self, rule_id: RuleId) -> bool {
        let Some(rule) = self.detach(rule_id) else {
            return false;
        };
        let kind = rule.target_kind();
        self.rules.entry(kind).or_default().push(rule);
        self.touch();
        true
    }
}

/// Weak reference from a rule back to a profile index that files it.
#[derive(Debug, Clone)]
pub(crate) struct IndexHandle {
    profile: ProfileId,
    state: Weak<RwLock<ProfileState>>,
}

impl IndexHandle {
    pub(crate) fn profile_id(&self) -> ProfileId {
        self.profile
    }

    pub(crate) fn is_live(&self) -> bool {
        self.state.strong_count() > 0
    }

    pub(crate) fn same_index(&self, other: &Self) -> bool {
        Weak::ptr_eq(&self.state, &other.state)
    }

    /// Whether the index still holds `rule_id`. Must not be called with that
    /// rule's lock held.
    pub(crate) fn holds(&self, rule_id: RuleId) -> bool {
        self.state
            .upgrade()
            .is_some_and(|state| sync::read(&state).contains(rule_id))
    }

    /// Moves `rule_id` to the bucket of its current kind. Must not be called
    /// with that rule's lock held.
    pub(crate) fn refile(&self, rule_id: RuleId) -> bool {
        self.state
            .upgrade()
            .is_some_and(|state| sync::write(&state).refile(rule_id))
    }
}

/// A named, reusable bundle of rules (a policy).
///
/// Rules are shared, not owned: the same `Arc<Rule>` may sit in several
/// profiles and in the registry at once.
#[derive(Debug)]
pub struct Profile {
    id: ProfileId,
    created_at: Timestamp,
    state: Arc<RwLock<ProfileState>>,
}

impl Profile {
    /// Creates an empty profile. The ID is derived from `name + description`.
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        let name = name.into();
        let description = description.into();
        let id = ProfileId::new(derive_id(ResourceKind::Profile, &[&name, &description]));
        let created_at = Timestamp::now();
        Self {
            id,
            created_at,
            state: Arc::new(RwLock::new(ProfileState {
                name,
                description,
                rules: HashMap::new(),
                updated_at: created_at,
                deleted_at: None,
            })),
        }
    }

    pub fn id(&self) -> ProfileId {
        self.id
    }

    pub fn name(&self) -> String {
        sync::read(&self.state).name.clone()
    }

    pub fn description(&self) -> String {
        sync::read(&self.state).description.clone()
    }

    pub fn created_at(&self) -> Timestamp {
        self.created_at
    }

    pub fn updated_at(&self) -> Timestamp {
        sync::read(&self.state).updated_at
    }

    pub fn deleted_at(&self) -> Option<Timestamp> {
        sync::read(&self.state).deleted_at
    }

    pub fn is_active(&self) -> bool {
        sync::read(&self.state).deleted_at.is_none()
    }

    pub fn rename(&self, name: impl Into<String>) {
        let mut state = sync::write(&self.state);
        state.name = name.into();
        state.touch();
    }

    pub fn set_description(&self, description: impl Into<String>) {
        let mut state = sync::write(&self.state);
        state.description = description.into();
        state.touch();
    }

    pub fn soft_delete(&self) {
        let mut state = sync::write(&self.state);
        state.deleted_at = Some(Timestamp::now_monotonic(Some(state.updated_at)));
    }

    pub fn restore(&self) {
        sync::write(&self.state).deleted_at = None;
    }

    // ------------------------------------------------------------------
    // Rule index
    // ------------------------------------------------------------------

    /// Indexes a rule under its current target kind.
    ///
    /// Returns `false` without indexing when the rule fails validation or is
    /// already indexed here. Callers that need the reason should go through
    /// [`Registry::attach_rule`](crate::Registry::attach_rule).
    pub fn add_rule(&self, rule: Arc<Rule>) -> bool {
        if let Err(e) = rule.validate() {
            warn!(profile = %self.id, rule = %rule.id(), error = %e, "Rule rejected by profile");
            return false;
        }

        let mut state = sync::write(&self.state);
        if state.contains(rule.id()) {
            debug!(profile = %self.id, rule = %rule.id(), "Rule already indexed");
            return false;
        }
        let kind = rule.enroll(IndexHandle {
            profile: self.id,
            state: Arc::downgrade(&self.state),
        });
        state.rules.entry(kind).or_default().push(rule);
        state.touch();
        true
    }

    /// Removes a rule from the index. Returns whether it was present.
    pub fn remove_rule(&self, rule_id: RuleId) -> bool {
        let mut state = sync::write(&self.state);
        let removed = state.detach(rule_id).is_some();
        if removed {
            state.touch();
        }
        removed
    }

    /// Moves a rule to the tail of the bucket of its current target kind.
    ///
    /// [`Rule::set_target`] already does this for every profile indexing the
    /// rule. Returns whether the rule is indexed here.
    pub fn reindex_rule(&self, rule_id: RuleId) -> bool {
        sync::write(&self.state).refile(rule_id)
    }

    /// Rules indexed under exactly `kind`, in insertion order.
    pub fn rules_for(&self, kind: ResourceKind) -> Vec<Arc<Rule>> {
        sync::read(&self.state)
            .rules
            .get(&kind)
            .cloned()
            .unwrap_or_default()
    }

    /// Rules the evaluator considers for a request of `kind`.
    ///
    /// Exact-kind rules first, then the global (`All`) rules. Both are read
    /// under one lock acquisition.
    pub fn applicable_rules(&self, kind: ResourceKind) -> Vec<Arc<Rule>> {
        let state = sync::read(&self.state);
        let exact = state.rules.get(&kind).map(Vec::as_slice).unwrap_or_default();
        let global = if kind.is_wildcard() {
            &[][..]
        } else {
            state
                .rules
                .get(&ResourceKind::All)
                .map(Vec::as_slice)
                .unwrap_or_default()
        };
        exact.iter().chain(global).cloned().collect()
    }

    /// Every indexed rule, ordered by kind tag then insertion order.
    pub fn rules(&self) -> Vec<Arc<Rule>> {
        let state = sync::read(&self.state);
        let mut kinds: Vec<&ResourceKind> = state.rules.keys().collect();
        kinds.sort();
        kinds
            .into_iter()
            .flat_map(|kind| state.rules[kind].iter().cloned())
            .collect()
    }

    /// Snapshot of the profile as a serializable record.
    pub fn to_record(&self) -> ProfileRecord {
        let state = sync::read(&self.state);
        let mut kinds: Vec<&ResourceKind> = state.rules.keys().collect();
        kinds.sort();
        ProfileRecord {
            id: self.id.into(),
            name: state.name.clone(),
            description: state.description.clone(),
            rule_ids: kinds
                .into_iter()
                .flat_map(|kind| state.rules[kind].iter().map(|r| u64::from(r.id())))
                .collect(),
            created_at: to_datetime(self.created_at),
            updated_at: to_datetime(state.updated_at),
            deleted_at: state.deleted_at.map(to_datetime),
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(&self.to_record())
    }

    pub fn contains_rule(&self, rule_id: RuleId) -> bool {
        sync::read(&self.state).contains(rule_id)
    }

    pub fn rule_count(&self) -> usize {
        sync::read(&self.state).rules.values().map(Vec::len).sum()
    }

    /// Drops soft-deleted rules from the index. Returns how many were removed.
    pub fn compact(&self) -> usize {
        let mut state = sync::write(&self.state);
        let mut removed = 0;
        state.rules.retain(|_, bucket| {
            let before = bucket.len();
            bucket.retain(|rule| rule.is_active());
            removed += before - bucket.len();
            !bucket.is_empty()
        });
        if removed > 0 {
            state.touch();
        }
        removed
    }
}

impl Display for Profile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = sync::read(&self.state);
        write!(
            f,
            "profile id={} name={} rules={} active={}",
            self.id,
            state.name,
            state.rules.values().map(Vec::len).sum::<usize>(),
            state.deleted_at.is_none()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gatekeeper_types::{Action, Verb};

    fn rule(name: &str, kind: ResourceKind, target_id: &str) -> Arc<Rule> {
        Arc::new(Rule::new(name, "", kind, target_id, Verb::READ, Action::Allow).unwrap())
    }

    #[test]
    fn test_profile_id_derivation() {
        let a = Profile::new("basic-profile", "test profile");
        let b = Profile::new("basic-profile", "test profile");
        let c = Profile::new("basic-profile", "other");
        assert_eq!(a.id(), b.id());
        assert_ne!(a.id(), c.id());
    }

    #[test]
    fn test_add_rule_indexes_by_kind() {
        let profile = Profile::new("p", "");
        let url = rule("url", ResourceKind::Url, "*");
        let prof = rule("prof", ResourceKind::Profile, "*");

        assert!(profile.add_rule(Arc::clone(&url)));
        assert!(profile.add_rule(Arc::clone(&prof)));

        let urls = profile.rules_for(ResourceKind::Url);
        assert_eq!(urls.len(), 1);
        assert_eq!(urls[0].id(), url.id());
        assert!(profile.rules_for(ResourceKind::Project).is_empty());
        assert_eq!(profile.rule_count(), 2);
    }

    #[test]
    fn test_add_rule_rejects_invalid() {
        let profile = Profile::new("p", "");
        assert!(profile.add_rule(Arc::new(Rule::empty("placeholder"))));

        let invalid = Arc::new(Rule::from_parts(
            RuleId::new(77),
            Timestamp::now(),
            "invalid".to_string(),
            String::new(),
            ResourceKind::All,
            "5".to_string(),
            Verb::READ,
            Action::Allow,
            None,
        ));
        assert!(!profile.add_rule(invalid));
        assert_eq!(profile.rule_count(), 1);
    }

    #[test]
    fn test_add_rule_is_idempotent() {
        let profile = Profile::new("p", "");
        let r = rule("r", ResourceKind::Url, "*");
        assert!(profile.add_rule(Arc::clone(&r)));
        assert!(!profile.add_rule(Arc::clone(&r)));
        assert_eq!(profile.rule_count(), 1);
    }

    #[test]
    fn test_insertion_order_and_global_rules_last() {
        let profile = Profile::new("p", "");
        let global = rule("global", ResourceKind::All, "");
        let first = rule("first", ResourceKind::Url, "*");
        let second = rule("second", ResourceKind::Url, "1");

        profile.add_rule(Arc::clone(&global));
        profile.add_rule(Arc::clone(&first));
        profile.add_rule(Arc::clone(&second));

        let ids: Vec<RuleId> = profile
            .applicable_rules(ResourceKind::Url)
            .iter()
            .map(|r| r.id())
            .collect();
        assert_eq!(ids, vec![first.id(), second.id(), global.id()]);

        let all_only = profile.applicable_rules(ResourceKind::All);
        assert_eq!(all_only.len(), 1);
    }

    #[test]
    fn test_remove_rule() {
        let profile = Profile::new("p", "");
        let r = rule("r", ResourceKind::Url, "*");
        profile.add_rule(Arc::clone(&r));

        assert!(profile.remove_rule(r.id()));
        assert!(!profile.remove_rule(r.id()));
        assert!(!profile.contains_rule(r.id()));
        assert!(profile.rules_for(ResourceKind::Url).is_empty());
    }

    #[test]
    fn test_reindex_after_retarget() {
        let profile = Profile::new("p", "");
        let r = rule("r", ResourceKind::Url, "*");
        profile.add_rule(Arc::clone(&r));

        r.set_target(ResourceKind::Project, "*").unwrap();
        assert!(profile.rules_for(ResourceKind::Url).is_empty());
        assert_eq!(profile.rules_for(ResourceKind::Project).len(), 1);

        assert!(profile.reindex_rule(r.id()));
        assert_eq!(profile.rules_for(ResourceKind::Project).len(), 1);
        assert!(!profile.reindex_rule(RuleId::new(404)));
    }

    #[test]
    fn test_retarget_moves_rule_in_every_profile() {
        let first = Profile::new("first", "");
        let second = Profile::new("second", "");
        let existing = rule("existing", ResourceKind::Project, "*");
        let moved = rule("moved", ResourceKind::Url, "*");
        second.add_rule(Arc::clone(&existing));
        first.add_rule(Arc::clone(&moved));
        second.add_rule(Arc::clone(&moved));

        moved.set_target(ResourceKind::Project, "2").unwrap();

        assert_eq!(first.rules_for(ResourceKind::Project).len(), 1);
        let ids: Vec<RuleId> = second
            .rules_for(ResourceKind::Project)
            .iter()
            .map(|r| r.id())
            .collect();
        assert_eq!(ids, vec![existing.id(), moved.id()]);
        assert!(second.rules_for(ResourceKind::Url).is_empty());
    }

    #[test]
    fn test_indexed_by_tracks_membership() {
        let kept = Profile::new("kept", "");
        let r = rule("r", ResourceKind::Url, "*");
        kept.add_rule(Arc::clone(&r));
        {
            let dropped = Profile::new("dropped", "");
            dropped.add_rule(Arc::clone(&r));
            assert_eq!(r.indexed_by().len(), 2);
        }
        assert_eq!(r.indexed_by(), vec![kept.id()]);

        kept.remove_rule(r.id());
        assert!(r.indexed_by().is_empty());

        // Re-attaching does not duplicate the back-reference.
        kept.add_rule(Arc::clone(&r));
        kept.remove_rule(r.id());
        kept.add_rule(Arc::clone(&r));
        assert_eq!(r.indexed_by(), vec![kept.id()]);
    }

    #[test]
    fn test_compact_drops_soft_deleted_rules() {
        let profile = Profile::new("p", "");
        let keep = rule("keep", ResourceKind::Url, "*");
        let drop = rule("drop", ResourceKind::Url, "1");
        profile.add_rule(Arc::clone(&keep));
        profile.add_rule(Arc::clone(&drop));

        drop.soft_delete();
        assert_eq!(profile.compact(), 1);
        assert_eq!(profile.rule_count(), 1);
        assert!(profile.contains_rule(keep.id()));
        assert_eq!(profile.compact(), 0);
    }

    #[test]
    fn test_soft_delete_and_restore() {
        let profile = Profile::new("p", "");
        profile.soft_delete();
        assert!(!profile.is_active());
        profile.restore();
        assert!(profile.is_active());
    }
}
