//! # gatekeeper-rbac: the access-control decision engine
//!
//! Policy data model and decision algorithm:
//! - **Rules** scoped to a resource kind and ID, granting a verb bitmask,
//!   with an allow / deny / allow-and-forward action
//! - **Profiles** bundling rules, indexed by target kind
//! - **Users** (principals) owning an ordered list of profiles
//! - **Request contexts** snapshotting a principal's profiles per query
//! - the **Gatekeeper** evaluator with deny-overrides-allow precedence
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │  RequestContext::new                         │
//! │  ├─ field validation (InvalidContext)        │
//! │  └─ profile membership snapshot              │
//! └─────────────────┬───────────────────────────┘
//!                   │
//!                   ▼
//! ┌─────────────────────────────────────────────┐
//! │  Gatekeeper::evaluate                        │
//! │  ├─ principal lookup / active check          │
//! │  ├─ active profiles, in attach order         │
//! │  ├─ exact-kind rules, then global rules      │
//! │  └─ first deny wins, else any allow          │
//! └─────────────────┬───────────────────────────┘
//!                   │
//!                   ▼
//! ┌─────────────────────────────────────────────┐
//! │  Decision { allowed, matched_rule, cause }   │
//! └─────────────────────────────────────────────┘
//! ```
//!
//! The [`Registry`] holds every entity behind `Arc`. Presence (insert, purge)
//! is guarded by the registry's maps; field mutation by each entity's own
//! lock. A profile's lock may be held while a rule's lock is taken, never the
//! other way round.
//!
//! ## Example
//!
//! ```
//! use std::sync::Arc;
//! use gatekeeper_rbac::{Attributes, Gatekeeper, Registry, RequestContext, Rule};
//! use gatekeeper_types::{Action, ResourceKind, Verb};
//!
//! let registry = Arc::new(Registry::new());
//! let user = registry.create_user("John", "User", "john@example.com")?;
//! let profile = registry.create_profile("readers", "read-only access")?;
//! let rule = registry.insert_rule(Rule::new(
//!     "read-profiles",
//!     "",
//!     ResourceKind::Profile,
//!     "*",
//!     Verb::READ,
//!     Action::Allow,
//! )?)?;
//! registry.attach_rule(profile.id(), rule.id())?;
//! registry.attach_profile(user.id(), profile.id())?;
//!
//! let gatekeeper = Gatekeeper::new(Arc::clone(&registry));
//! let ctx = RequestContext::new(
//!     registry.as_ref(),
//!     user.id(),
//!     ResourceKind::Profile,
//!     "12345",
//!     Verb::READ,
//!     Attributes::new(),
//! )?;
//! assert!(gatekeeper.evaluate(&ctx).is_allowed());
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod context;
pub mod error;
pub mod gatekeeper;
pub mod profile;
pub mod record;
pub mod registry;
pub mod rule;
mod sync;
pub mod user;

pub use context::{Attributes, RequestContext};
pub use error::{GatekeeperError, Result};
pub use gatekeeper::{Decision, Gatekeeper, GatekeeperStats};
pub use profile::Profile;
pub use record::{ActionKind, ProfileRecord, RuleRecord, UserRecord};
pub use registry::{ProfileDirectory, Registry};
pub use rule::{Rule, WILDCARD_ID};
pub use user::User;
