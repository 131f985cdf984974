//! Explicit bootstrap of the decision engine.
//!
//! A [`Controller`] owns the evaluator and the audit pipeline for one
//! [`Registry`]. Administrative calls go through it so every change lands in
//! the audit log; [`Controller::stop`] drains that log and joins its thread.

use std::sync::Arc;
use std::time::Duration;

use gatekeeper_config::{ConfigError, GatekeeperConfig};
use gatekeeper_rbac::{
    Attributes, Decision, Gatekeeper, GatekeeperError, GatekeeperStats, Profile, Registry,
    RequestContext, Rule, User,
};
use gatekeeper_types::{Action, ProfileId, ResourceKind, RuleId, UserId, Verb};
use thiserror::Error;
use tracing::info;

use crate::audit::{AuditDrainer, AuditEvent, AuditLog, AuditStats};

/// Error type for controller operations.
#[derive(Debug, Error)]
pub enum ControllerError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Gatekeeper(#[from] GatekeeperError),

    /// The audit drain thread could not be started.
    #[error("Failed to spawn audit thread: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Result type for controller operations.
pub type Result<T> = std::result::Result<T, ControllerError>;

/// Owner of the evaluator and audit pipeline for one registry.
#[derive(Debug)]
pub struct Controller {
    registry: Arc<Registry>,
    gatekeeper: Gatekeeper,
    config: GatekeeperConfig,
    audit: Option<AuditDrainer>,
}

impl Controller {
    /// Validates `config` and, when auditing is enabled, starts the drain thread.
    pub fn new(registry: Arc<Registry>, config: GatekeeperConfig) -> Result<Self> {
        config.validate()?;

        let mut gatekeeper = Gatekeeper::new(Arc::clone(&registry));
        if !config.evaluation.log_decisions {
            gatekeeper = gatekeeper.without_audit();
        }

        let audit = if config.audit.enabled {
            let log = Arc::new(AuditLog::new(config.audit.queue_capacity));
            Some(AuditDrainer::spawn(
                log,
                config.audit.drain_batch,
                Duration::from_millis(config.audit.poll_interval_ms),
            )?)
        } else {
            None
        };

        info!(
            audit = config.audit.enabled,
            queue_capacity = config.audit.queue_capacity,
            log_decisions = config.evaluation.log_decisions,
            "Controller started"
        );

        Ok(Self {
            registry,
            gatekeeper,
            config,
            audit,
        })
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn gatekeeper(&self) -> &Gatekeeper {
        &self.gatekeeper
    }

    pub fn config(&self) -> &GatekeeperConfig {
        &self.config
    }

    fn record(&self, event: AuditEvent) {
        if let Some(audit) = &self.audit {
            audit.log().record(event);
        }
    }

    // ========================================================================
    // Users
    // ========================================================================

    pub fn create_user(
        &self,
        name: impl Into<String>,
        description: impl Into<String>,
        email: impl Into<String>,
    ) -> Result<Arc<User>> {
        let user = self.registry.create_user(name, description, email)?;
        self.record(AuditEvent::UserCreated {
            user: user.id(),
            name: user.name(),
        });
        Ok(user)
    }

    pub fn user(&self, id: UserId) -> Result<Arc<User>> {
        Ok(self
            .registry
            .user(id)
            .ok_or(GatekeeperError::UserNotFound(id))?)
    }

    pub fn list_users(&self) -> Vec<Arc<User>> {
        self.registry.users()
    }

    pub fn list_active_users(&self) -> Vec<Arc<User>> {
        self.registry.active_users()
    }

    pub fn delete_user(&self, id: UserId) -> Result<()> {
        self.registry.soft_delete_user(id)?;
        self.record(AuditEvent::UserDeleted { user: id });
        Ok(())
    }

    pub fn restore_user(&self, id: UserId) -> Result<()> {
        self.registry.restore_user(id)?;
        self.record(AuditEvent::UserRestored { user: id });
        Ok(())
    }

    pub fn attach_profile(&self, user: UserId, profile: ProfileId) -> Result<bool> {
        let attached = self.registry.attach_profile(user, profile)?;
        if attached {
            self.record(AuditEvent::ProfileAttached { user, profile });
        }
        Ok(attached)
    }

    pub fn detach_profile(&self, user: UserId, profile: ProfileId) -> Result<bool> {
        let detached = self.registry.detach_profile(user, profile)?;
        if detached {
            self.record(AuditEvent::ProfileDetached { user, profile });
        }
        Ok(detached)
    }

    // ========================================================================
    // Profiles
    // ========================================================================

    pub fn create_profile(
        &self,
        name: impl Into<String>,
        description: impl Into<String>,
    ) -> Result<Arc<Profile>> {
        let profile = self.registry.create_profile(name, description)?;
        self.record(AuditEvent::ProfileCreated {
            profile: profile.id(),
            name: profile.name(),
        });
        Ok(profile)
    }

    pub fn delete_profile(&self, id: ProfileId) -> Result<()> {
        self.registry.soft_delete_profile(id)?;
        self.record(AuditEvent::ProfileDeleted { profile: id });
        Ok(())
    }

    pub fn restore_profile(&self, id: ProfileId) -> Result<()> {
        self.registry.restore_profile(id)?;
        self.record(AuditEvent::ProfileRestored { profile: id });
        Ok(())
    }

    pub fn attach_rule(&self, profile: ProfileId, rule: RuleId) -> Result<bool> {
        let attached = self.registry.attach_rule(profile, rule)?;
        if attached {
            self.record(AuditEvent::RuleAttached { profile, rule });
        }
        Ok(attached)
    }

    pub fn detach_rule(&self, profile: ProfileId, rule: RuleId) -> Result<bool> {
        let detached = self.registry.detach_rule(profile, rule)?;
        if detached {
            self.record(AuditEvent::RuleDetached { profile, rule });
        }
        Ok(detached)
    }

    // ========================================================================
    // Rules
    // ========================================================================

    pub fn create_rule(
        &self,
        name: impl Into<String>,
        description: impl Into<String>,
        target_kind: ResourceKind,
        target_id: impl Into<String>,
        verbs: Verb,
        action: Action,
    ) -> Result<Arc<Rule>> {
        let rule = Rule::new(name, description, target_kind, target_id, verbs, action)?;
        let rule = self.registry.insert_rule(rule)?;
        self.record(AuditEvent::RuleCreated {
            rule: rule.id(),
            dsl: rule.as_dsl(),
        });
        Ok(rule)
    }

    pub fn delete_rule(&self, id: RuleId) -> Result<()> {
        self.registry.soft_delete_rule(id)?;
        self.record(AuditEvent::RuleDeleted { rule: id });
        Ok(())
    }

    pub fn restore_rule(&self, id: RuleId) -> Result<()> {
        self.registry.restore_rule(id)?;
        self.record(AuditEvent::RuleRestored { rule: id });
        Ok(())
    }

    pub fn retarget_rule(
        &self,
        id: RuleId,
        kind: ResourceKind,
        target_id: impl Into<String>,
    ) -> Result<()> {
        self.registry.retarget_rule(id, kind, target_id)?;
        let dsl = self
            .registry
            .rule(id)
            .map(|r| r.as_dsl())
            .unwrap_or_default();
        self.record(AuditEvent::RuleRetargeted { rule: id, dsl });
        Ok(())
    }

    pub fn purge_rule(&self, id: RuleId) -> Result<()> {
        self.registry.purge_rule(id)?;
        self.record(AuditEvent::RulePurged { rule: id });
        Ok(())
    }

    // ========================================================================
    // Evaluation
    // ========================================================================

    /// Builds a request context against this controller's registry.
    pub fn context(
        &self,
        principal: UserId,
        target_kind: ResourceKind,
        target_id: impl Into<String>,
        verb: Verb,
        attributes: Attributes,
    ) -> Result<RequestContext> {
        Ok(RequestContext::new(
            self.registry.as_ref(),
            principal,
            target_kind,
            target_id,
            verb,
            attributes,
        )?)
    }

    /// Evaluates a request and records the decision in the audit log.
    pub fn authorize(&self, ctx: &RequestContext) -> Decision {
        let decision = self.gatekeeper.evaluate(ctx);
        self.record(AuditEvent::decision(ctx, &decision));
        decision
    }

    pub fn stats(&self) -> GatekeeperStats {
        self.gatekeeper.stats()
    }

    /// Audit counters; all zero when auditing is disabled.
    pub fn audit_stats(&self) -> AuditStats {
        self.audit
            .as_ref()
            .map(|audit| audit.log().stats())
            .unwrap_or_default()
    }

    /// Shuts down: the drainer empties the audit queue and is joined.
    ///
    /// Taking `self` means no call can be in flight on this controller.
    pub fn stop(mut self) -> AuditStats {
        let stats = match self.audit.take() {
            Some(audit) => {
                let log = Arc::clone(audit.log());
                drop(audit);
                log.stats()
            }
            None => AuditStats::default(),
        };
        info!(
            accepted = self.gatekeeper.stats().accepted,
            rejected = self.gatekeeper.stats().rejected,
            audit_drained = stats.drained,
            "Controller stopped"
        );
        stats
    }
}
