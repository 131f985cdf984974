//! Serializable records of the policy entities.
//!
//! One record type per entity, decoupled from the lock-guarded domain
//! structs. Timestamps are rendered as RFC 3339; an active entity has
//! `deleted_at: null`.

use chrono::{DateTime, Utc};
use gatekeeper_types::{Action, ResourceKind, RuleId, Timestamp, Verb};
use serde::{Deserialize, Serialize};

use crate::error::{GatekeeperError, Result};
use crate::rule::{Rule, validate_target};

pub(crate) fn to_datetime(ts: Timestamp) -> DateTime<Utc> {
    DateTime::from_timestamp_nanos(i64::try_from(ts.as_nanos()).unwrap_or(i64::MAX))
}

fn from_datetime(dt: DateTime<Utc>) -> Result<Timestamp> {
    dt.timestamp_nanos_opt()
        .and_then(|nanos| u64::try_from(nanos).ok())
        .map(Timestamp::from_nanos)
        .ok_or_else(|| {
            GatekeeperError::InvalidRuleSyntax(format!("timestamp out of range: {dt}"))
        })
}

/// Name of a rule's action as it appears in a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Allow,
    Deny,
    AllowAndForward,
}

impl From<&Action> for ActionKind {
    fn from(action: &Action) -> Self {
        match action {
            Action::Allow => ActionKind::Allow,
            Action::Deny => ActionKind::Deny,
            Action::AllowAndForward { .. } => ActionKind::AllowAndForward,
        }
    }
}

/// Rebuilds an [`Action`] from its record form.
///
/// A forward target is required for `AllowAndForward` and forbidden for the
/// other two.
fn action_from_parts(kind: ActionKind, next_rule_id: Option<u64>) -> Result<Action> {
    let next = next_rule_id.filter(|&id| id != 0);
    match (kind, next) {
        (ActionKind::Allow, None) => Ok(Action::Allow),
        (ActionKind::Deny, None) => Ok(Action::Deny),
        (ActionKind::AllowAndForward, Some(id)) => Ok(Action::AllowAndForward {
            next_rule_id: RuleId::new(id),
        }),
        (ActionKind::AllowAndForward, None) => Err(GatekeeperError::InvalidRuleSyntax(
            "allow_and_forward requires a non-zero next rule id".to_string(),
        )),
        (kind, Some(id)) => Err(GatekeeperError::InvalidRuleSyntax(format!(
            "next rule id {id} is only allowed with allow_and_forward, got {kind:?}"
        ))),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleRecord {
    pub id: u64,
    pub name: String,
    pub description: String,
    pub target_kind: ResourceKind,
    pub target_id: String,
    pub verb_mask: Verb,
    pub action: ActionKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_rule_id: Option<u64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl TryFrom<RuleRecord> for Rule {
    type Error = GatekeeperError;

    /// Rebuilds a rule, re-running every structural check.
    fn try_from(record: RuleRecord) -> Result<Self> {
        if record.id == 0 {
            return Err(GatekeeperError::InvalidRuleSyntax(
                "rule id cannot be zero".to_string(),
            ));
        }
        let action = action_from_parts(record.action, record.next_rule_id)?;
        validate_target(record.target_kind, &record.target_id, &action)?;

        let created_at = from_datetime(record.created_at)?;
        let updated_at = from_datetime(record.updated_at)?;
        let deleted_at = record.deleted_at.map(from_datetime).transpose()?;

        let rule = Rule::from_parts(
            RuleId::new(record.id),
            created_at,
            record.name,
            record.description,
            record.target_kind,
            record.target_id,
            record.verb_mask,
            action,
            deleted_at,
        );
        rule.set_updated_at(updated_at.max(created_at));
        Ok(rule)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileRecord {
    pub id: u64,
    pub name: String,
    pub description: String,
    /// Indexed rules, ordered by kind tag then insertion order.
    pub rule_ids: Vec<u64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    pub id: u64,
    pub name: String,
    pub description: String,
    pub email: String,
    /// Attached profiles, in attach order.
    pub profile_ids: Vec<u64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}
