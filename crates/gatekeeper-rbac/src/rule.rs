//! Access-control rules.
//!
//! A [`Rule`] states which verbs on which resources it covers and what
//! happens when it matches. Rules are shared by reference (`Arc<Rule>`)
//! between the registry and every profile that indexes them; field
//! mutation is serialized by the rule's own lock.

use std::fmt::Display;
use std::sync::RwLock;

use gatekeeper_types::{Action, ProfileId, ResourceKind, RuleId, Timestamp, Verb, derive_id};

use crate::error::{GatekeeperError, Result};
use crate::profile::IndexHandle;
use crate::record::{ActionKind, RuleRecord, to_datetime};
use crate::sync;

/// Target ID sentinel matching every resource ID.
pub const WILDCARD_ID: &str = "*";

#[derive(Debug)]
struct RuleState {
    name: String,
    description: String,
    target_kind: ResourceKind,
    target_id: String,
    verbs: Verb,
    action: Action,
    updated_at: Timestamp,
    deleted_at: Option<Timestamp>,
    /// Profile indices this rule has been filed in. Entries may be stale.
    indices: Vec<IndexHandle>,
}

impl RuleState {
    fn touch(&mut self) {
        self.updated_at = Timestamp::now_monotonic(Some(self.updated_at));
    }

    fn matches(&self, kind: ResourceKind, target_id: &str, verb: Verb) -> bool {
        let kind_ok = self.target_kind == kind || self.target_kind.is_wildcard();
        // An `All` rule has no target ID by construction and covers every ID.
        let id_ok = self.target_kind.is_wildcard()
            || self.target_id == WILDCARD_ID
            || self.target_id == target_id;
        kind_ok && id_ok && self.verbs.grants(verb)
    }
}

/// Checks the structural invariants of a rule.
///
/// - `target_kind == All` requires an empty `target_id`
/// - a non-empty `target_id` requires `target_kind != None`
/// - `AllowAndForward` requires a non-zero `next_rule_id`
///
/// The converse of the last one (a forward ID only on a forwarding action)
/// holds by construction of [`Action`]; records are checked for it on import.
pub(crate) fn validate_target(
    target_kind: ResourceKind,
    target_id: &str,
    action: &Action,
) -> Result<()> {
    if target_kind.is_wildcard() && !target_id.is_empty() {
        return Err(GatekeeperError::InvalidRuleSyntax(format!(
            "target id must be empty for kind '*', got '{target_id}'"
        )));
    }

    if !target_id.is_empty() && target_kind.is_none() {
        return Err(GatekeeperError::InvalidRuleSyntax(format!(
            "target kind cannot be none when target id '{target_id}' is set"
        )));
    }

    if let Some(next) = action.next_rule_id() {
        if next.is_zero() {
            return Err(GatekeeperError::InvalidRuleSyntax(
                "allow_and_forward requires a non-zero next rule id".to_string(),
            ));
        }
    }

    Ok(())
}

/// An access-control statement.
///
/// Identity (`id`, `created_at`) is fixed at construction. Everything else
/// lives behind the rule's lock: evaluation takes it shared, updaters take
/// it exclusive and bump `updated_at`.
#[derive(Debug)]
pub struct Rule {
    id: RuleId,
    created_at: Timestamp,
    state: RwLock<RuleState>,
}

impl Rule {
    /// Creates a rule and validates it.
    ///
    /// The ID is derived from `name + description`.
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        target_kind: ResourceKind,
        target_id: impl Into<String>,
        verbs: Verb,
        action: Action,
    ) -> Result<Self> {
        let name = name.into();
        let description = description.into();
        let target_id = target_id.into();
        validate_target(target_kind, &target_id, &action)?;

        let id = RuleId::new(derive_id(ResourceKind::Rule, &[&name, &description]));
        Ok(Self::from_parts(
            id,
            Timestamp::now(),
            name,
            description,
            target_kind,
            target_id,
            verbs,
            action,
            None,
        ))
    }

    /// Creates a rule that targets nothing, grants no verbs, and denies.
    ///
    /// Always valid; configure it through the updaters before attaching.
    pub fn empty(name: impl Into<String>) -> Self {
        let name = name.into();
        let id = RuleId::new(derive_id(ResourceKind::Rule, &[&name, ""]));
        Self::from_parts(
            id,
            Timestamp::now(),
            name,
            String::new(),
            ResourceKind::None,
            String::new(),
            Verb::empty(),
            Action::Deny,
            None,
        )
    }

    pub(crate) fn from_parts(
        id: RuleId,
        created_at: Timestamp,
        name: String,
        description: String,
        target_kind: ResourceKind,
        target_id: String,
        verbs: Verb,
        action: Action,
        deleted_at: Option<Timestamp>,
    ) -> Self {
        Self {
            id,
            created_at,
            state: RwLock::new(RuleState {
                name,
                description,
                target_kind,
                target_id,
                verbs,
                action,
                updated_at: created_at,
                deleted_at,
                indices: Vec::new(),
            }),
        }
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    pub fn id(&self) -> RuleId {
        self.id
    }

    pub fn name(&self) -> String {
        sync::read(&self.state).name.clone()
    }

    pub fn description(&self) -> String {
        sync::read(&self.state).description.clone()
    }

    pub fn target_kind(&self) -> ResourceKind {
        sync::read(&self.state).target_kind
    }

    pub fn target_id(&self) -> String {
        sync::read(&self.state).target_id.clone()
    }

    pub fn verbs(&self) -> Verb {
        sync::read(&self.state).verbs
    }

    pub fn action(&self) -> Action {
        sync::read(&self.state).action
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

    /// Returns whether the rule has not been soft-deleted.
    pub fn is_active(&self) -> bool {
        sync::read(&self.state).deleted_at.is_none()
    }

    // ------------------------------------------------------------------
    // Validation and matching
    // ------------------------------------------------------------------

    /// Checks the rule's invariants. Called before a rule is indexed into a profile.
    pub fn validate(&self) -> Result<()> {
        let state = sync::read(&self.state);
        validate_target(state.target_kind, &state.target_id, &state.action)
    }

    /// Returns whether this rule applies to a request.
    ///
    /// All three checks must pass:
    /// 1. kind: equal, or the rule targets `All`
    /// 2. id: equal, or the rule targets [`WILDCARD_ID`] (or kind `All`)
    /// 3. verb: the rule grants `Verb::ALL`, or the masks intersect
    ///
    /// Soft-deletion is not considered here; see [`Rule::is_active`].
    pub fn matches(&self, kind: ResourceKind, target_id: &str, verb: Verb) -> bool {
        sync::read(&self.state).matches(kind, target_id, verb)
    }

    /// Returns the rule's action if it is active and matches, under one lock acquisition.
    pub(crate) fn applies_to(&self, kind: ResourceKind, target_id: &str, verb: Verb) -> Option<Action> {
        let state = sync::read(&self.state);
        (state.deleted_at.is_none() && state.matches(kind, target_id, verb)).then_some(state.action)
    }

    // ------------------------------------------------------------------
    // Updaters
    // ------------------------------------------------------------------

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

    /// Re-targets the rule. Rejected if the result would be invalid.
    ///
    /// When the kind changes, every profile indexing the rule moves it to the
    /// tail of the bucket for the new kind.
    pub fn set_target(&self, kind: ResourceKind, target_id: impl Into<String>) -> Result<()> {
        let target_id = target_id.into();
        let indices = {
            let mut state = sync::write(&self.state);
            validate_target(kind, &target_id, &state.action)?;
            let kind_changed = state.target_kind != kind;
            state.target_kind = kind;
            state.target_id = target_id;
            state.touch();
            if kind_changed {
                state.indices.retain(IndexHandle::is_live);
                state.indices.clone()
            } else {
                Vec::new()
            }
        };
        // Profile locks are taken with this rule's lock released.
        for index in &indices {
            index.refile(self.id);
        }
        Ok(())
    }

    /// Records that a profile index files this rule. Returns the kind to
    /// file it under.
    ///
    /// Called with the profile's lock held, so a concurrent re-target either
    /// happens before (and the new kind is returned) or sees `index` and
    /// refiles the rule afterwards.
    pub(crate) fn enroll(&self, index: IndexHandle) -> ResourceKind {
        let mut state = sync::write(&self.state);
        state
            .indices
            .retain(|h| h.is_live() && !h.same_index(&index));
        state.indices.push(index);
        state.target_kind
    }

    /// Profiles whose rule index currently holds this rule.
    pub fn indexed_by(&self) -> Vec<ProfileId> {
        let indices = sync::read(&self.state).indices.clone();
        indices
            .iter()
            .filter(|index| index.holds(self.id))
            .map(IndexHandle::profile_id)
            .collect()
    }

    /// Clears the target ID if it equals `target_id`. Returns whether it did.
    pub fn clear_target_id(&self, target_id: &str) -> bool {
        let mut state = sync::write(&self.state);
        if state.target_id != target_id {
            return false;
        }
        state.target_id.clear();
        state.touch();
        true
    }

    pub fn set_verbs(&self, verbs: Verb) {
        let mut state = sync::write(&self.state);
        state.verbs = verbs;
        state.touch();
    }

    pub fn grant_verbs(&self, verbs: Verb) {
        let mut state = sync::write(&self.state);
        state.verbs |= verbs;
        state.touch();
    }

    pub fn revoke_verbs(&self, verbs: Verb) {
        let mut state = sync::write(&self.state);
        state.verbs.remove(verbs);
        state.touch();
    }

    /// Changes the action. A forward to rule 0 is rejected.
    pub fn set_action(&self, action: Action) -> Result<()> {
        let mut state = sync::write(&self.state);
        validate_target(state.target_kind, &state.target_id, &action)?;
        state.action = action;
        state.touch();
        Ok(())
    }

    /// Replaces name, description, target ID, verbs, and action in one step.
    pub fn update(
        &self,
        name: impl Into<String>,
        description: impl Into<String>,
        target_id: impl Into<String>,
        verbs: Verb,
        action: Action,
    ) -> Result<()> {
        let target_id = target_id.into();
        let mut state = sync::write(&self.state);
        validate_target(state.target_kind, &target_id, &action)?;
        state.name = name.into();
        state.description = description.into();
        state.target_id = target_id;
        state.verbs = verbs;
        state.action = action;
        state.touch();
        Ok(())
    }

    /// Marks the rule deleted. Profiles keep it indexed; the evaluator skips it.
    pub fn soft_delete(&self) {
        let mut state = sync::write(&self.state);
        state.deleted_at = Some(Timestamp::now_monotonic(Some(state.updated_at)));
    }

    pub fn restore(&self) {
        sync::write(&self.state).deleted_at = None;
    }

    pub(crate) fn set_updated_at(&self, updated_at: Timestamp) {
        sync::write(&self.state).updated_at = updated_at;
    }

    /// Snapshot of the rule as a serializable record.
    pub fn to_record(&self) -> RuleRecord {
        let state = sync::read(&self.state);
        RuleRecord {
            id: self.id.into(),
            name: state.name.clone(),
            description: state.description.clone(),
            target_kind: state.target_kind,
            target_id: state.target_id.clone(),
            verb_mask: state.verbs,
            action: ActionKind::from(&state.action),
            next_rule_id: state.action.next_rule_id().map(u64::from),
            created_at: to_datetime(self.created_at),
            updated_at: to_datetime(state.updated_at),
            deleted_at: state.deleted_at.map(to_datetime),
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(&self.to_record())
    }

    /// Compact one-line form: `rule <id>:<kind>:<target_id>:<verbs>:<action>`.
    pub fn as_dsl(&self) -> String {
        let state = sync::read(&self.state);
        format!(
            "rule {}:{}:{}:{}:{}",
            self.id, state.target_kind, state.target_id, state.verbs, state.action
        )
    }
}

impl Display for Rule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = sync::read(&self.state);
        write!(
            f,
            "rule id={} name={} target={}:{} verbs={} action={} active={}",
            self.id,
            state.name,
            state.target_kind,
            state.target_id,
            state.verbs,
            state.action,
            state.deleted_at.is_none()
        )
    }
}
