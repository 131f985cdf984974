//! Access queries.

use std::collections::BTreeMap;
use std::fmt::Display;

use gatekeeper_types::{ProfileId, ResourceKind, Timestamp, UserId, Verb};
use serde::Serialize;

use crate::error::{GatekeeperError, Result};
use crate::registry::ProfileDirectory;
use crate::rule::WILDCARD_ID;

/// Opaque key-value bag carried with a request.
pub type Attributes = BTreeMap<String, serde_json::Value>;

/// An immutable, validated access query.
///
/// The principal's profile membership is captured once, at construction.
/// Later attach/detach on the user does not change what an already-built
/// context evaluates against; rule changes inside those profiles still do.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RequestContext {
    principal_id: UserId,
    principal_profile_ids: Vec<ProfileId>,
    target_kind: ResourceKind,
    target_id: String,
    requested_verb: Verb,
    attributes: Attributes,
    created_at: Timestamp,
}

impl RequestContext {
    /// Validates the query and snapshots the principal's profiles.
    ///
    /// # Errors
    ///
    /// Returns [`GatekeeperError::InvalidContext`] when:
    /// - `principal_id` is zero
    /// - `target_kind` is `None`
    /// - `target_id` is empty, `"0"`, or the wildcard `"*"`
    /// - `verb` carries no bit of [`Verb::VALID`]
    ///
    /// An unknown principal is not a construction error; the context gets an
    /// empty profile snapshot and evaluation rejects it with `UserNotFound`.
    pub fn new(
        directory: &impl ProfileDirectory,
        principal_id: UserId,
        target_kind: ResourceKind,
        target_id: impl Into<String>,
        verb: Verb,
        attributes: Attributes,
    ) -> Result<Self> {
        let target_id = target_id.into();

        if principal_id.is_zero() {
            return Err(GatekeeperError::InvalidContext(
                "principal id is required".to_string(),
            ));
        }
        if target_kind.is_none() {
            return Err(GatekeeperError::InvalidContext(
                "target kind cannot be none".to_string(),
            ));
        }
        if target_id.is_empty() || target_id == "0" {
            return Err(GatekeeperError::InvalidContext(
                "target id is required".to_string(),
            ));
        }
        if target_id == WILDCARD_ID {
            return Err(GatekeeperError::InvalidContext(
                "target id cannot be the wildcard".to_string(),
            ));
        }
        if !verb.is_valid_request() {
            return Err(GatekeeperError::InvalidContext(format!(
                "invalid request verb: {verb}"
            )));
        }

        let principal_profile_ids = directory.profile_ids_of(principal_id).unwrap_or_default();

        Ok(Self {
            principal_id,
            principal_profile_ids,
            target_kind,
            target_id,
            requested_verb: verb,
            attributes,
            created_at: Timestamp::now(),
        })
    }

    pub fn principal_id(&self) -> UserId {
        self.principal_id
    }

    /// Profile IDs of the principal at construction time, in attach order.
    pub fn principal_profile_ids(&self) -> &[ProfileId] {
        &self.principal_profile_ids
    }

    pub fn target_kind(&self) -> ResourceKind {
        self.target_kind
    }

    pub fn target_id(&self) -> &str {
        &self.target_id
    }

    pub fn requested_verb(&self) -> Verb {
        self.requested_verb
    }

    pub fn attributes(&self) -> &Attributes {
        &self.attributes
    }

    pub fn attribute(&self, key: &str) -> Option<&serde_json::Value> {
        self.attributes.get(key)
    }

    pub fn created_at(&self) -> Timestamp {
        self.created_at
    }

    #[cfg(test)]
    pub(crate) fn with_target_kind(mut self, kind: ResourceKind) -> Self {
        self.target_kind = kind;
        self
    }
}

impl Display for RequestContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "principal {} -> {}:{} ({})",
            self.principal_id, self.target_kind, self.target_id, self.requested_verb
        )
    }
}
