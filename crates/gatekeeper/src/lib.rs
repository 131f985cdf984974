//! # gatekeeper: embeddable access-control decisions
//!
//! Facade over the decision engine. Bring your own [`Registry`], wrap it in a
//! [`Controller`], and route authorization checks through
//! [`Controller::authorize`].
//!
//! - [`controller`]: explicit bootstrap, administrative API, shutdown drain
//! - [`audit`]: bounded audit queue and its drain thread
//! - [`telemetry`]: tracing subscriber setup
//!
//! ## Example
//!
//! ```
//! use std::sync::Arc;
//! use gatekeeper::{Action, Attributes, Controller, GatekeeperConfig, Registry, ResourceKind, Verb};
//!
//! let controller = Controller::new(Arc::new(Registry::new()), GatekeeperConfig::default())?;
//!
//! let user = controller.create_user("Jane", "Operator", "jane@example.com")?;
//! let profile = controller.create_profile("operators", "")?;
//! let rule = controller.create_rule(
//!     "run-projects",
//!     "",
//!     ResourceKind::Project,
//!     "*",
//!     Verb::EXECUTE,
//!     Action::Allow,
//! )?;
//! controller.attach_rule(profile.id(), rule.id())?;
//! controller.attach_profile(user.id(), profile.id())?;
//!
//! let ctx = controller.context(user.id(), ResourceKind::Project, "7", Verb::EXECUTE, Attributes::new())?;
//! assert!(controller.authorize(&ctx).is_allowed());
//!
//! let audit = controller.stop();
//! assert_eq!(audit.drained, audit.recorded);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod audit;
pub mod controller;
pub mod telemetry;

pub use audit::{AuditEvent, AuditLog, AuditStats};
pub use controller::{Controller, ControllerError, Result};
pub use gatekeeper_config::{ConfigLoader, GatekeeperConfig, LoggingConfig};
pub use gatekeeper_rbac::{
    Attributes, Decision, Gatekeeper, GatekeeperError, GatekeeperStats, Profile, Registry,
    RequestContext, Rule, User,
};
pub use gatekeeper_types::{Action, ProfileId, ResourceKind, RuleId, UserId, Verb};
pub use telemetry::init_tracing;

#[cfg(test)]
mod tests;
