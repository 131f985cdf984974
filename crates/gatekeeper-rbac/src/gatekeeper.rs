//! The decision engine.
//!
//! Turns a [`RequestContext`] plus the live [`Registry`] into a [`Decision`].

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use gatekeeper_types::{Action, RuleId};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::context::RequestContext;
use crate::error::GatekeeperError;
use crate::profile::Profile;
use crate::registry::Registry;

/// Outcome of one evaluation.
///
/// A denial carries a `cause` only when it was not decided by rules at all
/// (bad context, unknown or inactive principal, no active profiles). An
/// explicit deny names the rule that fired; an implicit deny has neither.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    pub allowed: bool,
    /// The deny rule that ended the scan, or the first allow rule that matched.
    pub matched_rule: Option<RuleId>,
    pub cause: Option<GatekeeperError>,
}

impl Decision {
    fn allow(rule: RuleId) -> Self {
        Self {
            allowed: true,
            matched_rule: Some(rule),
            cause: None,
        }
    }

    fn deny(rule: Option<RuleId>) -> Self {
        Self {
            allowed: false,
            matched_rule: rule,
            cause: None,
        }
    }

    fn rejected(cause: GatekeeperError) -> Self {
        Self {
            allowed: false,
            matched_rule: None,
            cause: Some(cause),
        }
    }

    pub fn is_allowed(&self) -> bool {
        self.allowed
    }

    /// Returns whether a rule explicitly denied the request.
    pub fn is_explicit_deny(&self) -> bool {
        !self.allowed && self.matched_rule.is_some()
    }

    /// Splits into the `(allowed, cause)` pair.
    pub fn into_result(self) -> (bool, Option<GatekeeperError>) {
        (self.allowed, self.cause)
    }
}

/// Running accept/reject totals.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct GatekeeperStats {
    pub rejected: u64,
    pub accepted: u64,
}

impl GatekeeperStats {
    pub fn total(&self) -> u64 {
        self.rejected + self.accepted
    }
}

/// Evaluates access requests with deny-overrides-allow precedence.
///
/// Apart from its counters the evaluator is stateless, so one instance can be
/// shared across threads behind an `Arc`.
#[derive(Debug)]
pub struct Gatekeeper {
    registry: Arc<Registry>,
    rejected: AtomicU64,
    accepted: AtomicU64,
    audit_enabled: bool,
}

impl Gatekeeper {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self {
            registry,
            rejected: AtomicU64::new(0),
            accepted: AtomicU64::new(0),
            audit_enabled: true,
        }
    }

    /// Disables per-decision logging.
    pub fn without_audit(mut self) -> Self {
        self.audit_enabled = false;
        self
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Decides a request.
    ///
    /// 1. a context with kind `None` is rejected with `InvalidContext`
    /// 2. the principal must exist (`UserNotFound`) and be active (`UserInactive`)
    /// 3. the profiles snapshotted in `ctx` that are still active are walked in
    ///    order; none left means `NoActiveProfiles`
    /// 4. within a profile, exact-kind rules come first, then global rules;
    ///    soft-deleted rules are skipped
    /// 5. the first matching `Deny` ends the scan; any matching `Allow` or
    ///    `AllowAndForward` records a tentative allow
    ///
    /// `AllowAndForward` is not followed: it counts as a plain allow.
    ///
    /// Exactly one of the two counters is incremented per call.
    pub fn evaluate(&self, ctx: &RequestContext) -> Decision {
        let decision = self.decide(ctx);

        if decision.allowed {
            self.accepted.fetch_add(1, Ordering::Relaxed);
        } else {
            self.rejected.fetch_add(1, Ordering::Relaxed);
        }

        if self.audit_enabled {
            self.log_decision(ctx, &decision);
        }

        decision
    }

    fn decide(&self, ctx: &RequestContext) -> Decision {
        if ctx.target_kind().is_none() {
            return Decision::rejected(GatekeeperError::InvalidContext(
                "target kind cannot be none".to_string(),
            ));
        }

        let principal = ctx.principal_id();
        let Some(user) = self.registry.user(principal) else {
            return Decision::rejected(GatekeeperError::UserNotFound(principal));
        };
        if !user.is_active() {
            return Decision::rejected(GatekeeperError::UserInactive(principal));
        }

        let profiles: Vec<Arc<Profile>> = ctx
            .principal_profile_ids()
            .iter()
            .filter_map(|&id| {
                let profile = self.registry.profile(id).or_else(|| user.profile(id));
                if profile.is_none() {
                    debug!(principal = %principal, profile = %id, "Snapshotted profile no longer resolvable");
                }
                profile
            })
            .filter(|p| p.is_active())
            .collect();

        if profiles.is_empty() {
            return Decision::rejected(GatekeeperError::NoActiveProfiles(principal));
        }

        let kind = ctx.target_kind();
        let target_id = ctx.target_id();
        let verb = ctx.requested_verb();

        let mut first_allow: Option<RuleId> = None;
        for profile in &profiles {
            for rule in profile.applicable_rules(kind) {
                match rule.applies_to(kind, target_id, verb) {
                    Some(Action::Deny) => return Decision::deny(Some(rule.id())),
                    Some(Action::Allow | Action::AllowAndForward { .. }) => {
                        first_allow.get_or_insert(rule.id());
                    }
                    None => {}
                }
            }
        }

        match first_allow {
            Some(rule) => Decision::allow(rule),
            None => Decision::deny(None),
        }
    }

    fn log_decision(&self, ctx: &RequestContext, decision: &Decision) {
        let matched = decision.matched_rule.map(u64::from);
        if decision.allowed {
            info!(
                principal = %ctx.principal_id(),
                kind = %ctx.target_kind(),
                target = %ctx.target_id(),
                verb = %ctx.requested_verb(),
                rule = ?matched,
                "Access granted"
            );
        } else if let Some(cause) = &decision.cause {
            warn!(
                principal = %ctx.principal_id(),
                kind = %ctx.target_kind(),
                target = %ctx.target_id(),
                verb = %ctx.requested_verb(),
                cause = %cause,
                "Access rejected"
            );
        } else {
            warn!(
                principal = %ctx.principal_id(),
                kind = %ctx.target_kind(),
                target = %ctx.target_id(),
                verb = %ctx.requested_verb(),
                rule = ?matched,
                "Access denied"
            );
        }
    }

    /// Returns the counters. Under concurrent evaluation the pair is not a
    /// single atomic snapshot, but each counter is exact once callers quiesce.
    pub fn stats(&self) -> GatekeeperStats {
        GatekeeperStats {
            rejected: self.rejected.load(Ordering::Relaxed),
            accepted: self.accepted.load(Ordering::Relaxed),
        }
    }
}
