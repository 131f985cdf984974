//! Audit event log.
//!
//! Administrative changes and decisions are pushed onto a bounded, lock-free
//! queue (`crossbeam-queue::ArrayQueue`) and written to `tracing` by a
//! dedicated drain thread. A full queue never blocks the caller: the event is
//! dropped and counted instead.
//!
//! # Sizing
//!
//! `capacity = event rate * drain latency`. At 2k events/sec and a 50ms
//! poll interval: `capacity = 2_000 * 0.05 = 100`.

use std::fmt::Display;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread::{self, JoinHandle, Thread};
use std::time::Duration;

use crossbeam_queue::ArrayQueue;
use gatekeeper_rbac::{Decision, RequestContext};
use gatekeeper_types::{ProfileId, ResourceKind, RuleId, UserId, Verb};
use serde::Serialize;
use tracing::{debug, info, warn};

/// One entry in the audit log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum AuditEvent {
    UserCreated { user: UserId, name: String },
    UserDeleted { user: UserId },
    UserRestored { user: UserId },
    ProfileCreated { profile: ProfileId, name: String },
    ProfileDeleted { profile: ProfileId },
    ProfileRestored { profile: ProfileId },
    RuleCreated { rule: RuleId, dsl: String },
    RuleDeleted { rule: RuleId },
    RuleRestored { rule: RuleId },
    RuleRetargeted { rule: RuleId, dsl: String },
    RulePurged { rule: RuleId },
    ProfileAttached { user: UserId, profile: ProfileId },
    ProfileDetached { user: UserId, profile: ProfileId },
    RuleAttached { profile: ProfileId, rule: RuleId },
    RuleDetached { profile: ProfileId, rule: RuleId },
    Decision {
        principal: UserId,
        target_kind: ResourceKind,
        target_id: String,
        verb: Verb,
        allowed: bool,
        matched_rule: Option<RuleId>,
        cause: Option<String>,
    },
}

impl AuditEvent {
    pub fn decision(ctx: &RequestContext, decision: &Decision) -> Self {
        AuditEvent::Decision {
            principal: ctx.principal_id(),
            target_kind: ctx.target_kind(),
            target_id: ctx.target_id().to_string(),
            verb: ctx.requested_verb(),
            allowed: decision.allowed,
            matched_rule: decision.matched_rule,
            cause: decision.cause.as_ref().map(ToString::to_string),
        }
    }
}

impl Display for AuditEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuditEvent::UserCreated { user, name } => write!(f, "User Created: {name} (ID: {user})"),
            AuditEvent::UserDeleted { user } => write!(f, "User Deleted: {user}"),
            AuditEvent::UserRestored { user } => write!(f, "User Restored: {user}"),
            AuditEvent::ProfileCreated { profile, name } => {
                write!(f, "Profile Created: {name} (ID: {profile})")
            }
            AuditEvent::ProfileDeleted { profile } => write!(f, "Profile Deleted: {profile}"),
            AuditEvent::ProfileRestored { profile } => write!(f, "Profile Restored: {profile}"),
            AuditEvent::RuleCreated { dsl, .. } => write!(f, "Rule Created: {dsl}"),
            AuditEvent::RuleDeleted { rule } => write!(f, "Rule Deleted: {rule}"),
            AuditEvent::RuleRestored { rule } => write!(f, "Rule Restored: {rule}"),
            AuditEvent::RuleRetargeted { dsl, .. } => write!(f, "Rule Retargeted: {dsl}"),
            AuditEvent::RulePurged { rule } => write!(f, "Rule Purged: {rule}"),
            AuditEvent::ProfileAttached { user, profile } => {
                write!(f, "Profile {profile} attached to user {user}")
            }
            AuditEvent::ProfileDetached { user, profile } => {
                write!(f, "Profile {profile} detached from user {user}")
            }
            AuditEvent::RuleAttached { profile, rule } => {
                write!(f, "Rule {rule} attached to profile {profile}")
            }
            AuditEvent::RuleDetached { profile, rule } => {
                write!(f, "Rule {rule} detached from profile {profile}")
            }
            AuditEvent::Decision {
                principal,
                target_kind,
                target_id,
                verb,
                allowed,
                ..
            } => {
                let outcome = if *allowed { "allowed" } else { "denied" };
                write!(f, "Request {outcome}: principal {principal} -> {target_kind}:{target_id} ({verb})")
            }
        }
    }
}

/// Audit counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AuditStats {
    /// Events accepted onto the queue.
    pub recorded: u64,
    /// Events dropped because the queue was full.
    pub dropped: u64,
    /// Events written out by the drainer.
    pub drained: u64,
}

/// Bounded audit queue shared by producers and the drain thread.
#[derive(Debug)]
pub struct AuditLog {
    queue: ArrayQueue<AuditEvent>,
    recorded: AtomicU64,
    dropped: AtomicU64,
    drained: AtomicU64,
    drainer: OnceLock<Thread>,
}

impl AuditLog {
    /// Creates an audit log holding at most `capacity` pending events.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is 0.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "audit queue capacity must be positive");
        Self {
            queue: ArrayQueue::new(capacity),
            recorded: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            drained: AtomicU64::new(0),
            drainer: OnceLock::new(),
        }
    }

    /// Enqueues an event and wakes the drainer.
    ///
    /// Returns `false` if the queue was full and the event was dropped.
    pub fn record(&self, event: AuditEvent) -> bool {
        let accepted = match self.queue.push(event) {
            Ok(()) => {
                self.recorded.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(event) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                debug!(event = %event, "Audit queue full, event dropped");
                false
            }
        };
        if let Some(drainer) = self.drainer.get() {
            drainer.unpark();
        }
        accepted
    }

    /// Pops up to `max` events.
    pub fn pop_batch(&self, max: usize) -> Vec<AuditEvent> {
        let mut batch = Vec::with_capacity(max.min(self.queue.len()));
        while batch.len() < max {
            match self.queue.pop() {
                Some(event) => batch.push(event),
                None => break,
            }
        }
        batch
    }

    /// Writes up to `max` pending events to the log. Returns how many.
    pub fn drain(&self, max: usize) -> usize {
        let batch = self.pop_batch(max);
        for event in &batch {
            info!(target: "gatekeeper::audit", "{event}");
        }
        self.drained.fetch_add(batch.len() as u64, Ordering::Relaxed);
        batch.len()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.queue.capacity()
    }

    pub fn stats(&self) -> AuditStats {
        AuditStats {
            recorded: self.recorded.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            drained: self.drained.load(Ordering::Relaxed),
        }
    }
}

/// The drain thread and its shutdown signal.
///
/// Dropping the drainer signals shutdown, lets it empty the queue, and joins.
#[derive(Debug)]
pub(crate) struct AuditDrainer {
    log: Arc<AuditLog>,
    shutdown: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl AuditDrainer {
    pub(crate) fn spawn(
        log: Arc<AuditLog>,
        batch: usize,
        poll_interval: Duration,
    ) -> std::io::Result<Self> {
        let shutdown = Arc::new(AtomicBool::new(false));
        let handle = thread::Builder::new().name("gatekeeper-audit".to_string()).spawn({
            let log = Arc::clone(&log);
            let shutdown = Arc::clone(&shutdown);
            move || drain_loop(&log, &shutdown, batch, poll_interval)
        })?;
        let thread = handle.thread().clone();
        let drainer = Self {
            log,
            shutdown,
            handle: Some(handle),
        };
        // Producers only wake the registered thread. A second drainer on the
        // same log is stopped and joined on return.
        if drainer.log.drainer.set(thread).is_err() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::AlreadyExists,
                "audit log already has a drainer",
            ));
        }
        Ok(drainer)
    }

    pub(crate) fn log(&self) -> &Arc<AuditLog> {
        &self.log
    }
}

impl Drop for AuditDrainer {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            handle.thread().unpark();
            if handle.join().is_err() {
                warn!("Audit drain thread panicked");
            }
        }
    }
}

fn drain_loop(log: &AuditLog, shutdown: &AtomicBool, batch: usize, poll_interval: Duration) {
    debug!(capacity = log.capacity(), batch, "Audit drainer started");
    loop {
        if log.drain(batch) > 0 {
            continue;
        }
        if shutdown.load(Ordering::Acquire) {
            // Producers stopped before the flag was set; finish what is left.
            while log.drain(batch) > 0 {}
            break;
        }
        thread::park_timeout(poll_interval);
    }
    debug!(stats = ?log.stats(), "Audit drainer stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(n: u64) -> AuditEvent {
        AuditEvent::UserDeleted {
            user: UserId::new(n),
        }
    }

    #[test]
    fn test_record_and_pop_in_order() {
        let log = AuditLog::new(3);
        assert!(log.record(event(1)));
        assert!(log.record(event(2)));

        assert_eq!(log.pop_batch(10), vec![event(1), event(2)]);
        assert!(log.is_empty());
    }

    #[test]
    fn test_full_queue_drops_and_counts() {
        let log = AuditLog::new(2);
        assert!(log.record(event(1)));
        assert!(log.record(event(2)));
        assert!(!log.record(event(3)));

        let stats = log.stats();
        assert_eq!(stats.recorded, 2);
        assert_eq!(stats.dropped, 1);
        assert_eq!(log.len(), 2);
    }

    #[test]
    fn test_drain_respects_batch_size() {
        let log = AuditLog::new(10);
        for i in 0..5 {
            log.record(event(i));
        }

        assert_eq!(log.drain(3), 3);
        assert_eq!(log.len(), 2);
        assert_eq!(log.drain(10), 2);
        assert_eq!(log.drain(10), 0);
        assert_eq!(log.stats().drained, 5);
    }

    #[test]
    #[should_panic(expected = "audit queue capacity must be positive")]
    fn test_zero_capacity_panics() {
        let _log = AuditLog::new(0);
    }

    #[test]
    fn test_drainer_empties_queue_on_drop() {
        let log = Arc::new(AuditLog::new(64));
        let drainer =
            AuditDrainer::spawn(Arc::clone(&log), 4, Duration::from_secs(60)).unwrap();
        for i in 0..20 {
            assert!(log.record(event(i)));
        }
        drop(drainer);

        assert!(log.is_empty());
        assert_eq!(log.stats().drained, 20);
    }

    #[test]
    fn test_second_drainer_on_same_log_is_refused() {
        let log = Arc::new(AuditLog::new(16));
        let first = AuditDrainer::spawn(Arc::clone(&log), 4, Duration::from_secs(60)).unwrap();

        let err = AuditDrainer::spawn(Arc::clone(&log), 4, Duration::from_secs(60)).unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::AlreadyExists);

        assert!(log.record(event(1)));
        drop(first);
        assert!(log.is_empty());
        assert_eq!(log.stats().drained, 1);
    }

    #[test]
    fn test_display_matches_log_format() {
        let created = AuditEvent::UserCreated {
            user: UserId::new(7),
            name: "John".to_string(),
        };
        assert_eq!(created.to_string(), "User Created: John (ID: 7)");

        let attached = AuditEvent::RuleAttached {
            profile: ProfileId::new(1),
            rule: RuleId::new(2),
        };
        assert_eq!(attached.to_string(), "Rule 2 attached to profile 1");
    }
}
