//! The registry of every known user, profile, and rule.
//!
//! The registry only guards *presence*: its maps are behind reader/writer
//! locks taken exclusively for insert and purge. Field mutation of an entity
//! goes through that entity's own lock, so administrative churn on one rule
//! never blocks evaluation of unrelated requests.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use gatekeeper_types::{ProfileId, ResourceKind, RuleId, UserId};
use tracing::{debug, info};

use crate::error::{GatekeeperError, Result};
use crate::profile::Profile;
use crate::rule::Rule;
use crate::sync;
use crate::user::User;

/// Resolves a principal's current profile membership.
///
/// [`RequestContext::new`](crate::RequestContext::new) consumes this to take
/// its point-in-time snapshot.
pub trait ProfileDirectory {
    /// Returns the profile IDs attached to `user`, or `None` if the user is unknown.
    fn profile_ids_of(&self, user: UserId) -> Option<Vec<ProfileId>>;
}

/// Process-wide collection of policy entities, passed explicitly to the
/// evaluator and to administrative code.
#[derive(Debug, Default)]
pub struct Registry {
    users: RwLock<BTreeMap<UserId, Arc<User>>>,
    profiles: RwLock<BTreeMap<ProfileId, Arc<Profile>>>,
    rules: RwLock<BTreeMap<RuleId, Arc<Rule>>>,
}

fn insert<K: Ord + Copy + Into<u64>, V>(
    map: &RwLock<BTreeMap<K, Arc<V>>>,
    kind: ResourceKind,
    id: K,
    value: V,
) -> Result<Arc<V>> {
    let mut map = sync::write(map);
    if map.contains_key(&id) {
        return Err(GatekeeperError::AlreadyExists {
            kind,
            id: id.into(),
        });
    }
    let value = Arc::new(value);
    map.insert(id, Arc::clone(&value));
    Ok(value)
}

fn list<K, V>(map: &RwLock<BTreeMap<K, Arc<V>>>) -> Vec<Arc<V>> {
    sync::read(map).values().cloned().collect()
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    // ========================================================================
    // Users
    // ========================================================================

    /// Registers a user. Fails if a user with the same derived ID exists.
    pub fn insert_user(&self, user: User) -> Result<Arc<User>> {
        let id = user.id();
        let user = insert(&self.users, ResourceKind::User, id, user)?;
        info!(user = %id, name = %user.name(), "User created");
        Ok(user)
    }

    pub fn create_user(
        &self,
        name: impl Into<String>,
        description: impl Into<String>,
        email: impl Into<String>,
    ) -> Result<Arc<User>> {
        self.insert_user(User::new(name, description, email))
    }

    pub fn user(&self, id: UserId) -> Option<Arc<User>> {
        sync::read(&self.users).get(&id).cloned()
    }

    pub fn users(&self) -> Vec<Arc<User>> {
        list(&self.users)
    }

    pub fn active_users(&self) -> Vec<Arc<User>> {
        sync::read(&self.users)
            .values()
            .filter(|u| u.is_active())
            .cloned()
            .collect()
    }

    pub fn user_count(&self) -> usize {
        sync::read(&self.users).len()
    }

    pub fn soft_delete_user(&self, id: UserId) -> Result<()> {
        self.user(id).ok_or(GatekeeperError::UserNotFound(id))?.soft_delete();
        info!(user = %id, "User soft-deleted");
        Ok(())
    }

    pub fn restore_user(&self, id: UserId) -> Result<()> {
        self.user(id).ok_or(GatekeeperError::UserNotFound(id))?.restore();
        info!(user = %id, "User restored");
        Ok(())
    }

    /// Attaches a registered profile to a registered user.
    ///
    /// Returns `false` if it was already attached.
    pub fn attach_profile(&self, user: UserId, profile: ProfileId) -> Result<bool> {
        let u = self.user(user).ok_or(GatekeeperError::UserNotFound(user))?;
        let p = self
            .profile(profile)
            .ok_or(GatekeeperError::ProfileNotFound(profile))?;
        let attached = u.add_profile(p);
        debug!(user = %user, profile = %profile, attached, "Profile attach");
        Ok(attached)
    }

    /// Detaches a profile from a user. Returns whether it was attached.
    pub fn detach_profile(&self, user: UserId, profile: ProfileId) -> Result<bool> {
        let u = self.user(user).ok_or(GatekeeperError::UserNotFound(user))?;
        Ok(u.remove_profile(profile))
    }

    // ========================================================================
    // Profiles
    // ========================================================================

    pub fn insert_profile(&self, profile: Profile) -> Result<Arc<Profile>> {
        let id = profile.id();
        let profile = insert(&self.profiles, ResourceKind::Profile, id, profile)?;
        info!(profile = %id, name = %profile.name(), "Profile created");
        Ok(profile)
    }

    pub fn create_profile(
        &self,
        name: impl Into<String>,
        description: impl Into<String>,
    ) -> Result<Arc<Profile>> {
        self.insert_profile(Profile::new(name, description))
    }

    pub fn profile(&self, id: ProfileId) -> Option<Arc<Profile>> {
        sync::read(&self.profiles).get(&id).cloned()
    }

    pub fn profiles(&self) -> Vec<Arc<Profile>> {
        list(&self.profiles)
    }

    pub fn active_profiles(&self) -> Vec<Arc<Profile>> {
        sync::read(&self.profiles)
            .values()
            .filter(|p| p.is_active())
            .cloned()
            .collect()
    }

    pub fn profile_count(&self) -> usize {
        sync::read(&self.profiles).len()
    }

    pub fn soft_delete_profile(&self, id: ProfileId) -> Result<()> {
        self.profile(id)
            .ok_or(GatekeeperError::ProfileNotFound(id))?
            .soft_delete();
        info!(profile = %id, "Profile soft-deleted");
        Ok(())
    }

    pub fn restore_profile(&self, id: ProfileId) -> Result<()> {
        self.profile(id)
            .ok_or(GatekeeperError::ProfileNotFound(id))?
            .restore();
        info!(profile = %id, "Profile restored");
        Ok(())
    }

    /// Indexes a registered rule into a registered profile.
    ///
    /// Unlike [`Profile::add_rule`], a validation failure is reported as
    /// [`GatekeeperError::InvalidRuleSyntax`]. Returns `false` if the rule
    /// was already indexed.
    pub fn attach_rule(&self, profile: ProfileId, rule: RuleId) -> Result<bool> {
        // Lock order: rules map, then profile. `purge_rule` takes the same
        // map exclusively, so it cannot remove the rule mid-attach.
        let rules = sync::read(&self.rules);
        let r = rules.get(&rule).ok_or(GatekeeperError::RuleNotFound(rule))?;
        let p = self
            .profile(profile)
            .ok_or(GatekeeperError::ProfileNotFound(profile))?;
        r.validate()?;
        Ok(p.add_rule(Arc::clone(r)))
    }

    pub fn detach_rule(&self, profile: ProfileId, rule: RuleId) -> Result<bool> {
        let p = self
            .profile(profile)
            .ok_or(GatekeeperError::ProfileNotFound(profile))?;
        Ok(p.remove_rule(rule))
    }

    /// Drops soft-deleted rules from every registered profile's index.
    ///
    /// Returns the number of index entries removed.
    pub fn compact_profiles(&self) -> usize {
        let removed: usize = self.profiles().iter().map(|p| p.compact()).sum();
        if removed > 0 {
            info!(removed, "Compacted profile rule indices");
        }
        removed
    }

    // ========================================================================
    // Rules
    // ========================================================================

    pub fn insert_rule(&self, rule: Rule) -> Result<Arc<Rule>> {
        let id = rule.id();
        let rule = insert(&self.rules, ResourceKind::Rule, id, rule)?;
        info!(rule = %id, dsl = %rule.as_dsl(), "Rule created");
        Ok(rule)
    }

    pub fn rule(&self, id: RuleId) -> Option<Arc<Rule>> {
        sync::read(&self.rules).get(&id).cloned()
    }

    pub fn rules(&self) -> Vec<Arc<Rule>> {
        list(&self.rules)
    }

    pub fn active_rules(&self) -> Vec<Arc<Rule>> {
        sync::read(&self.rules)
            .values()
            .filter(|r| r.is_active())
            .cloned()
            .collect()
    }

    pub fn rule_count(&self) -> usize {
        sync::read(&self.rules).len()
    }

    pub fn soft_delete_rule(&self, id: RuleId) -> Result<()> {
        self.rule(id).ok_or(GatekeeperError::RuleNotFound(id))?.soft_delete();
        info!(rule = %id, "Rule soft-deleted");
        Ok(())
    }

    pub fn restore_rule(&self, id: RuleId) -> Result<()> {
        self.rule(id).ok_or(GatekeeperError::RuleNotFound(id))?.restore();
        info!(rule = %id, "Rule restored");
        Ok(())
    }

    /// Re-targets a rule. Every profile indexing it, registered or not,
    /// refiles it under the new kind.
    pub fn retarget_rule(
        &self,
        id: RuleId,
        kind: ResourceKind,
        target_id: impl Into<String>,
    ) -> Result<()> {
        let rule = self.rule(id).ok_or(GatekeeperError::RuleNotFound(id))?;
        rule.set_target(kind, target_id)?;
        debug!(rule = %id, dsl = %rule.as_dsl(), "Rule re-targeted");
        Ok(())
    }

    /// Removes a rule from the registry for good.
    ///
    /// Refused while any profile, registered or not, still indexes it;
    /// detach it or soft-delete and [`compact_profiles`](Self::compact_profiles)
    /// first.
    pub fn purge_rule(&self, id: RuleId) -> Result<Arc<Rule>> {
        // Rules map stays write-locked across the reference scan.
        let mut rules = sync::write(&self.rules);
        let holders = rules
            .get(&id)
            .ok_or(GatekeeperError::RuleNotFound(id))?
            .indexed_by();
        if let Some(&profile) = holders.first() {
            return Err(GatekeeperError::RuleInUse { rule: id, profile });
        }
        let rule = rules.remove(&id).ok_or(GatekeeperError::RuleNotFound(id))?;
        info!(rule = %id, "Rule purged");
        Ok(rule)
    }
}

impl ProfileDirectory for Registry {
    fn profile_ids_of(&self, user: UserId) -> Option<Vec<ProfileId>> {
        self.user(user).map(|u| u.profile_ids())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gatekeeper_types::{Action, Verb};

    fn registry_with_rule() -> (Registry, Arc<Profile>, Arc<Rule>) {
        let registry = Registry::new();
        let profile = registry.create_profile("p", "").unwrap();
        let rule = registry
            .insert_rule(
                Rule::new("r", "", ResourceKind::Url, "*", Verb::READ, Action::Allow).unwrap(),
            )
            .unwrap();
        (registry, profile, rule)
    }

    #[test]
    fn test_duplicate_insert_rejected() {
        let registry = Registry::new();
        registry.create_user("John", "User", "john@example.com").unwrap();
        let err = registry
            .create_user("John", "User", "john@example.com")
            .unwrap_err();
        assert!(matches!(
            err,
            GatekeeperError::AlreadyExists {
                kind: ResourceKind::User,
                ..
            }
        ));
        assert_eq!(registry.user_count(), 1);
    }

    #[test]
    fn test_soft_delete_and_restore_user() {
        let registry = Registry::new();
        let user = registry.create_user("Jane", "User", "jane@example.com").unwrap();

        registry.soft_delete_user(user.id()).unwrap();
        assert!(registry.active_users().is_empty());
        assert_eq!(registry.users().len(), 1);

        registry.restore_user(user.id()).unwrap();
        assert_eq!(registry.active_users().len(), 1);

        assert_eq!(
            registry.soft_delete_user(UserId::new(1)),
            Err(GatekeeperError::UserNotFound(UserId::new(1)))
        );
    }

    #[test]
    fn test_attach_profile_requires_both() {
        let registry = Registry::new();
        let user = registry.create_user("Bob", "User", "bob@example.com").unwrap();
        assert_eq!(
            registry.attach_profile(user.id(), ProfileId::new(5)),
            Err(GatekeeperError::ProfileNotFound(ProfileId::new(5)))
        );

        let profile = registry.create_profile("p", "").unwrap();
        assert_eq!(registry.attach_profile(user.id(), profile.id()), Ok(true));
        assert_eq!(registry.attach_profile(user.id(), profile.id()), Ok(false));
        assert_eq!(registry.profile_ids_of(user.id()), Some(vec![profile.id()]));

        assert_eq!(registry.detach_profile(user.id(), profile.id()), Ok(true));
        assert_eq!(registry.profile_ids_of(user.id()), Some(vec![]));
        assert_eq!(registry.profile_ids_of(UserId::new(3)), None);
    }

    #[test]
    fn test_attach_rule_surfaces_validation_error() {
        let (registry, profile, _) = registry_with_rule();
        let invalid = registry
            .insert_rule(Rule::from_parts(
                RuleId::new(12),
                gatekeeper_types::Timestamp::now(),
                "bad".to_string(),
                String::new(),
                ResourceKind::None,
                "5".to_string(),
                Verb::READ,
                Action::Allow,
                None,
            ))
            .unwrap();

        let err = registry.attach_rule(profile.id(), invalid.id()).unwrap_err();
        assert!(matches!(err, GatekeeperError::InvalidRuleSyntax(_)));
        assert_eq!(profile.rule_count(), 0);
    }

    #[test]
    fn test_attach_and_detach_rule() {
        let (registry, profile, rule) = registry_with_rule();
        assert_eq!(registry.attach_rule(profile.id(), rule.id()), Ok(true));
        assert_eq!(registry.attach_rule(profile.id(), rule.id()), Ok(false));
        assert_eq!(
            registry.attach_rule(profile.id(), RuleId::new(1)),
            Err(GatekeeperError::RuleNotFound(RuleId::new(1)))
        );
        assert_eq!(registry.detach_rule(profile.id(), rule.id()), Ok(true));
        assert_eq!(profile.rule_count(), 0);
    }

    #[test]
    fn test_retarget_reindexes_profiles() {
        let (registry, profile, rule) = registry_with_rule();
        registry.attach_rule(profile.id(), rule.id()).unwrap();

        registry
            .retarget_rule(rule.id(), ResourceKind::Project, "42")
            .unwrap();
        assert!(profile.rules_for(ResourceKind::Url).is_empty());
        assert_eq!(profile.rules_for(ResourceKind::Project).len(), 1);

        assert!(registry.retarget_rule(rule.id(), ResourceKind::All, "42").is_err());
    }

    #[test]
    fn test_purge_rule_refused_while_referenced() {
        let (registry, profile, rule) = registry_with_rule();
        registry.attach_rule(profile.id(), rule.id()).unwrap();

        assert_eq!(
            registry.purge_rule(rule.id()).unwrap_err(),
            GatekeeperError::RuleInUse {
                rule: rule.id(),
                profile: profile.id(),
            }
        );

        registry.soft_delete_rule(rule.id()).unwrap();
        assert_eq!(registry.compact_profiles(), 1);
        assert!(registry.purge_rule(rule.id()).is_ok());
        assert!(registry.rule(rule.id()).is_none());
        assert_eq!(
            registry.purge_rule(rule.id()).unwrap_err(),
            GatekeeperError::RuleNotFound(rule.id())
        );
    }

    #[test]
    fn test_active_listings() {
        let (registry, profile, rule) = registry_with_rule();
        registry.soft_delete_rule(rule.id()).unwrap();
        registry.soft_delete_profile(profile.id()).unwrap();
        assert!(registry.active_rules().is_empty());
        assert!(registry.active_profiles().is_empty());

        registry.restore_rule(rule.id()).unwrap();
        registry.restore_profile(profile.id()).unwrap();
        assert_eq!(registry.active_rules().len(), 1);
        assert_eq!(registry.active_profiles().len(), 1);
        assert_eq!(registry.rule_count(), 1);
        assert_eq!(registry.profile_count(), 1);
    }
}
