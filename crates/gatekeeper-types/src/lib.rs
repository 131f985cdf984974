//! # gatekeeper-types: Core types for `Gatekeeper`
//!
//! This crate contains the closed vocabularies and identifiers shared by the
//! decision engine:
//! - Resource tags ([`ResourceKind`])
//! - Verb bitmask ([`Verb`])
//! - Rule actions ([`Action`])
//! - Entity IDs ([`UserId`], [`ProfileId`], [`RuleId`]) and their
//!   content-derived construction ([`derive_id`])
//! - Temporal types ([`Timestamp`])

use std::{
    fmt::{Debug, Display},
    time::{SystemTime, UNIX_EPOCH},
};

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

// ============================================================================
// Entity IDs - All Copy (cheap 8-byte values)
// ============================================================================

macro_rules! entity_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
        )]
        #[serde(transparent)]
        pub struct $name(u64);

        impl $name {
            /// The zero ID. Never produced by [`derive_id`]; used as "unset".
            pub const ZERO: $name = $name(0);

            pub fn new(id: u64) -> Self {
                Self(id)
            }

            pub fn is_zero(self) -> bool {
                self.0 == 0
            }
        }

        impl Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<u64> for $name {
            fn from(value: u64) -> Self {
                Self(value)
            }
        }

        impl From<$name> for u64 {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

entity_id!(
    /// Identifier of a principal.
    ///
    /// Derived from `name + description + email`, stable across restarts.
    UserId
);

entity_id!(
    /// Identifier of a profile (a named bundle of rules).
    ///
    /// Derived from `name + description`.
    ProfileId
);

entity_id!(
    /// Identifier of a rule.
    ///
    /// Derived from `name + description`. Also used as the forwarding target
    /// of [`Action::AllowAndForward`].
    RuleId
);

/// Derives a stable 64-bit identifier from an entity's identity fields.
///
/// The kind tag is mixed in first so that a user and a profile sharing a
/// name never collide. Each part is length-prefixed, which keeps
/// `("ab", "c")` and `("a", "bc")` apart.
///
/// The result is the first 8 bytes of the BLAKE3 digest, little-endian.
/// Zero is reserved for "unset" and is never returned.
///
/// # Examples
///
/// ```
/// # use gatekeeper_types::{derive_id, ResourceKind};
/// let a = derive_id(ResourceKind::Rule, &["allow-read", ""]);
/// let b = derive_id(ResourceKind::Rule, &["allow-read", ""]);
/// assert_eq!(a, b);
/// assert_ne!(a, 0);
/// ```
pub fn derive_id(kind: ResourceKind, parts: &[&str]) -> u64 {
    let mut hasher = blake3::Hasher::new();
    hasher.update(&kind.as_u32().to_le_bytes());
    for part in parts {
        hasher.update(&(part.len() as u64).to_le_bytes());
        hasher.update(part.as_bytes());
    }
    let digest = hasher.finalize();

    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest.as_bytes()[..8]);
    match u64::from_le_bytes(bytes) {
        0 => 1,
        id => id,
    }
}

// ============================================================================
// ResourceKind - Copy (closed tag set)
// ============================================================================

/// The kind of resource a rule targets or a request addresses.
///
/// `None` is invalid in any live request or rule target. `All` is the
/// wildcard meaning "every kind".
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "snake_case")]
#[repr(u32)]
pub enum ResourceKind {
    #[default]
    None = 0,
    User = 1,
    Profile = 2,
    Url = 3,
    Organization = 4,
    Project = 5,
    Role = 6,
    Permission = 7,
    Rule = 8,
    All = 9,
}

impl ResourceKind {
    /// Every kind a request may address (excludes `None` and `All`).
    pub const CONCRETE: [ResourceKind; 8] = [
        ResourceKind::User,
        ResourceKind::Profile,
        ResourceKind::Url,
        ResourceKind::Organization,
        ResourceKind::Project,
        ResourceKind::Role,
        ResourceKind::Permission,
        ResourceKind::Rule,
    ];

    /// Returns the stable numeric tag.
    pub fn as_u32(self) -> u32 {
        self as u32
    }

    /// Parses a numeric tag, returning `None` for unknown values.
    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            0 => Some(ResourceKind::None),
            1 => Some(ResourceKind::User),
            2 => Some(ResourceKind::Profile),
            3 => Some(ResourceKind::Url),
            4 => Some(ResourceKind::Organization),
            5 => Some(ResourceKind::Project),
            6 => Some(ResourceKind::Role),
            7 => Some(ResourceKind::Permission),
            8 => Some(ResourceKind::Rule),
            9 => Some(ResourceKind::All),
            _ => None,
        }
    }

    pub fn is_none(self) -> bool {
        self == ResourceKind::None
    }

    pub fn is_wildcard(self) -> bool {
        self == ResourceKind::All
    }
}

impl Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ResourceKind::None => "",
            ResourceKind::User => "user",
            ResourceKind::Profile => "profile",
            ResourceKind::Url => "url",
            ResourceKind::Organization => "organization",
            ResourceKind::Project => "project",
            ResourceKind::Role => "role",
            ResourceKind::Permission => "permission",
            ResourceKind::Rule => "rule",
            ResourceKind::All => "*",
        };
        f.write_str(name)
    }
}

// ============================================================================
// Verb - Copy (bitmask)
// ============================================================================

bitflags! {
    /// Action categories a rule grants or a request asks for.
    ///
    /// Verbs combine with bitwise OR. A rule matches a request when the two
    /// masks intersect, not when they are equal: a rule granting
    /// `READ | LIST` matches a request for `LIST` alone.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct Verb: u8 {
        const READ = 1 << 0;
        const CREATE = 1 << 1;
        const UPDATE = 1 << 2;
        const DELETE = 1 << 3;
        const LIST = 1 << 4;
        const EXECUTE = 1 << 5;

        /// Every verb.
        const ALL = Self::READ.bits()
            | Self::CREATE.bits()
            | Self::UPDATE.bits()
            | Self::DELETE.bits()
            | Self::LIST.bits()
            | Self::EXECUTE.bits();
    }
}

impl Verb {
    /// The set a request verb must intersect to be well-formed.
    pub const VALID: Verb = Verb::ALL;

    const NAMES: [(Verb, &'static str); 6] = [
        (Verb::READ, "read"),
        (Verb::CREATE, "create"),
        (Verb::UPDATE, "update"),
        (Verb::DELETE, "delete"),
        (Verb::LIST, "list"),
        (Verb::EXECUTE, "execute"),
    ];

    /// Returns whether this mask carries at least one known verb bit.
    pub fn is_valid_request(self) -> bool {
        self.intersects(Verb::VALID)
    }

    /// Returns whether a rule granting `self` covers a request for `requested`.
    ///
    /// `ALL` covers everything; otherwise the masks must intersect.
    pub fn grants(self, requested: Verb) -> bool {
        self == Verb::ALL || self.intersects(requested)
    }
}

impl Default for Verb {
    fn default() -> Self {
        Verb::empty()
    }
}

impl Display for Verb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if *self == Verb::ALL {
            return f.write_str("*");
        }
        if self.is_empty() {
            return f.write_str("none");
        }

        let mut first = true;
        for (verb, name) in Verb::NAMES {
            if self.contains(verb) {
                if !first {
                    f.write_str("|")?;
                }
                f.write_str(name)?;
                first = false;
            }
        }
        Ok(())
    }
}

// ============================================================================
// Action - Copy (tagged variant)
// ============================================================================

/// What a matching rule does to the decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Action {
    /// Record a tentative allow; a later `Deny` still overrides it.
    Allow,

    /// Terminate evaluation with a final deny.
    #[default]
    Deny,

    /// Allow, and name the rule a multi-step evaluation would consult next.
    ///
    /// `next_rule_id` must be non-zero. The evaluator treats this exactly like
    /// [`Action::Allow`]; the forward target is not followed.
    AllowAndForward { next_rule_id: RuleId },
}

impl Action {
    /// Short, stable name for logs and records.
    pub fn name(&self) -> &'static str {
        match self {
            Action::Allow => "allow",
            Action::Deny => "deny",
            Action::AllowAndForward { .. } => "allow_and_forward",
        }
    }

    /// Returns the forwarding target, if this is a forwarding action.
    pub fn next_rule_id(&self) -> Option<RuleId> {
        match self {
            Action::AllowAndForward { next_rule_id } => Some(*next_rule_id),
            Action::Allow | Action::Deny => None,
        }
    }

    /// Returns whether a match with this action contributes an allow.
    pub fn is_allow(&self) -> bool {
        matches!(self, Action::Allow | Action::AllowAndForward { .. })
    }

    pub fn is_deny(&self) -> bool {
        matches!(self, Action::Deny)
    }
}

impl Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Action::AllowAndForward { next_rule_id } => {
                write!(f, "{}->{next_rule_id}", self.name())
            }
            Action::Allow | Action::Deny => f.write_str(self.name()),
        }
    }
}

// ============================================================================
// Timestamp - Copy (8-byte value with monotonic guarantee)
// ============================================================================

/// Wall-clock timestamp with monotonic guarantee within the system.
///
/// Audit trails need real-world time; monotonicity keeps `updated_at`
/// ordered when the system clock is adjusted.
///
/// Stored as nanoseconds since Unix epoch (1970-01-01 00:00:00 UTC).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp(u64);

impl Timestamp {
    /// The Unix epoch (1970-01-01 00:00:00 UTC).
    pub const EPOCH: Timestamp = Timestamp(0);

    /// Creates a timestamp from nanoseconds since Unix epoch.
    pub fn from_nanos(nanos: u64) -> Self {
        Self(nanos)
    }

    /// Returns the timestamp as nanoseconds since Unix epoch.
    pub fn as_nanos(&self) -> u64 {
        self.0
    }

    /// Returns the timestamp as seconds since Unix epoch (truncates nanoseconds).
    pub fn as_secs(&self) -> u64 {
        self.0 / 1_000_000_000
    }

    /// Creates a timestamp for the current time.
    ///
    /// # Panics
    ///
    /// Panics if the system clock is before Unix epoch (should never happen).
    pub fn now() -> Self {
        let duration = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system clock is before Unix epoch");
        Self(duration.as_nanos() as u64)
    }

    /// Creates a timestamp ensuring monotonicity: `max(now, last + 1ns)`.
    ///
    /// # Arguments
    ///
    /// * `last` - The previous timestamp, if any. Pass `None` for the first timestamp.
    pub fn now_monotonic(last: Option<Timestamp>) -> Self {
        let now = Self::now();
        match last {
            Some(prev) if now.0 <= prev.0 => Timestamp(prev.0.saturating_add(1)),
            _ => now,
        }
    }
}

impl Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let secs = self.0 / 1_000_000_000;
        let nanos = self.0 % 1_000_000_000;
        write!(f, "{secs}.{nanos:09}")
    }
}

impl Default for Timestamp {
    fn default() -> Self {
        Self::EPOCH
    }
}

impl From<u64> for Timestamp {
    fn from(nanos: u64) -> Self {
        Self(nanos)
    }
}

impl From<Timestamp> for u64 {
    fn from(ts: Timestamp) -> Self {
        ts.0
    }
}

#[cfg(test)]
mod tests;
