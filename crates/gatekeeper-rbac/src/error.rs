//! Error type for the decision engine.

use gatekeeper_types::{ProfileId, ResourceKind, RuleId, UserId};
use thiserror::Error;

/// Errors produced by validation, registry administration, and evaluation.
///
/// Evaluation-time variants (`UserNotFound`, `UserInactive`,
/// `NoActiveProfiles`) travel inside a [`Decision`](crate::Decision) as the
/// cause of a rejection rather than aborting the call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GatekeeperError {
    /// A request context is missing a required field or carries an invalid one.
    #[error("Invalid request context: {0}")]
    InvalidContext(String),

    /// A rule violates one of its structural invariants.
    #[error("Invalid rule syntax: {0}")]
    InvalidRuleSyntax(String),

    #[error("User {0} not found")]
    UserNotFound(UserId),

    #[error("User {0} is inactive")]
    UserInactive(UserId),

    /// The principal has no active profile, so nothing can allow the request.
    #[error("User {0} has no active profiles")]
    NoActiveProfiles(UserId),

    #[error("Profile {0} not found")]
    ProfileNotFound(ProfileId),

    #[error("Rule {0} not found")]
    RuleNotFound(RuleId),

    /// An entity with the same derived ID is already registered.
    #[error("{kind} {id} already exists")]
    AlreadyExists { kind: ResourceKind, id: u64 },

    /// A rule cannot be purged while a profile still indexes it.
    #[error("Rule {rule} is still referenced by profile {profile}")]
    RuleInUse { rule: RuleId, profile: ProfileId },
}

/// Result type for decision engine operations.
pub type Result<T> = std::result::Result<T, GatekeeperError>;
