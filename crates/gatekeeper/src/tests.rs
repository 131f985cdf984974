//! Controller tests.

use std::sync::Arc;
use std::thread;

use gatekeeper_config::GatekeeperConfig;
use test_case::test_case;

use crate::{
    Action, Attributes, Controller, ControllerError, GatekeeperError, Registry, ResourceKind,
    RuleId, UserId, Verb,
};

fn controller(config: GatekeeperConfig) -> Controller {
    Controller::new(Arc::new(Registry::new()), config).expect("controller starts")
}

fn audited() -> Controller {
    let mut config = GatekeeperConfig::default();
    config.evaluation.log_decisions = false;
    controller(config)
}

#[test]
fn rejects_invalid_config() {
    let mut config = GatekeeperConfig::default();
    config.audit.queue_capacity = 0;

    let err = Controller::new(Arc::new(Registry::new()), config).unwrap_err();
    assert!(matches!(err, ControllerError::Config(_)));
}

#[test]
fn end_to_end_decision_flow() {
    let controller = audited();
    let user = controller
        .create_user("John", "User", "john@example.com")
        .unwrap();
    let profile = controller
        .create_profile("basic-profile", "test profile")
        .unwrap();
    let rule = controller
        .create_rule(
            "allow-read-profiles",
            "",
            ResourceKind::Profile,
            "*",
            Verb::READ,
            Action::Allow,
        )
        .unwrap();
    assert!(controller.attach_rule(profile.id(), rule.id()).unwrap());
    assert!(controller.attach_profile(user.id(), profile.id()).unwrap());

    let ctx = controller
        .context(
            user.id(),
            ResourceKind::Profile,
            "12345",
            Verb::READ,
            Attributes::new(),
        )
        .unwrap();
    let decision = controller.authorize(&ctx);
    assert!(decision.is_allowed());
    assert_eq!(decision.matched_rule, Some(rule.id()));

    let denied = controller
        .context(user.id(), ResourceKind::Url, "1", Verb::READ, Attributes::new())
        .unwrap();
    assert!(!controller.authorize(&denied).is_allowed());

    let stats = controller.stats();
    assert_eq!((stats.accepted, stats.rejected), (1, 1));

    // 3 creates + 2 attaches + 2 decisions
    let audit = controller.stop();
    assert_eq!(audit.recorded, 7);
    assert_eq!(audit.dropped, 0);
    assert_eq!(audit.drained, 7);
}

#[test]
fn duplicate_attach_is_not_audited_twice() {
    let controller = audited();
    let user = controller.create_user("Bob", "User", "bob@example.com").unwrap();
    let profile = controller.create_profile("p", "").unwrap();

    assert!(controller.attach_profile(user.id(), profile.id()).unwrap());
    assert!(!controller.attach_profile(user.id(), profile.id()).unwrap());

    assert_eq!(controller.stop().recorded, 3);
}

#[test]
fn list_users_includes_soft_deleted() {
    let controller = controller(GatekeeperConfig::quiet());
    let alice = controller.create_user("Alice", "", "alice@example.com").unwrap();
    controller.create_user("Bob", "", "bob@example.com").unwrap();

    controller.delete_user(alice.id()).unwrap();
    assert_eq!(controller.list_users().len(), 2);
    assert_eq!(controller.list_active_users().len(), 1);

    controller.restore_user(alice.id()).unwrap();
    assert_eq!(controller.list_active_users().len(), 2);
}

#[test]
fn errors_surface_from_registry() {
    let controller = controller(GatekeeperConfig::quiet());

    let err = controller.user(UserId::new(5)).unwrap_err();
    assert!(matches!(
        err,
        ControllerError::Gatekeeper(GatekeeperError::UserNotFound(_))
    ));

    let err = controller
        .create_rule("bad", "", ResourceKind::All, "5", Verb::READ, Action::Allow)
        .unwrap_err();
    assert!(matches!(
        err,
        ControllerError::Gatekeeper(GatekeeperError::InvalidRuleSyntax(_))
    ));

    let err = controller.purge_rule(RuleId::new(3)).unwrap_err();
    assert!(matches!(
        err,
        ControllerError::Gatekeeper(GatekeeperError::RuleNotFound(_))
    ));
}

#[test_case(GatekeeperConfig::quiet(); "audit disabled")]
#[test_case(GatekeeperConfig::default(); "audit enabled")]
fn stop_after_no_activity(config: GatekeeperConfig) {
    let controller = controller(config);
    let stats = controller.stop();
    assert_eq!(stats.recorded, 0);
    assert_eq!(stats.drained, 0);
}

#[test]
fn small_queue_drops_but_never_blocks() {
    let mut config = GatekeeperConfig::default();
    config.audit.queue_capacity = 1;
    config.audit.poll_interval_ms = 60_000;
    config.evaluation.log_decisions = false;
    let controller = controller(config);

    for i in 0..50 {
        controller
            .create_profile(format!("profile-{i}"), "")
            .unwrap();
    }

    let stats = controller.stop();
    assert_eq!(stats.recorded + stats.dropped, 50);
    assert_eq!(stats.drained, stats.recorded);
}

#[test]
fn concurrent_authorize_and_admin() {
    let controller = Arc::new(audited());
    let user = controller.create_user("Eve", "", "eve@example.com").unwrap();
    let profile = controller.create_profile("shared", "").unwrap();
    let rule = controller
        .create_rule("read-urls", "", ResourceKind::Url, "*", Verb::READ, Action::Allow)
        .unwrap();
    controller.attach_rule(profile.id(), rule.id()).unwrap();
    controller.attach_profile(user.id(), profile.id()).unwrap();

    let handles: Vec<_> = (0..4)
        .map(|t| {
            let controller = Arc::clone(&controller);
            let user = user.id();
            thread::spawn(move || {
                for i in 0..50 {
                    let ctx = controller
                        .context(user, ResourceKind::Url, format!("{t}-{i}"), Verb::READ, Attributes::new())
                        .unwrap();
                    assert!(controller.authorize(&ctx).is_allowed());
                    controller
                        .create_profile(format!("extra-{t}-{i}"), "")
                        .unwrap();
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(controller.stats().accepted, 200);
    let controller = Arc::try_unwrap(controller).expect("all threads joined");
    let audit = controller.stop();
    assert_eq!(audit.drained, audit.recorded);
}

#[test]
fn decision_event_serializes() {
    let controller = controller(GatekeeperConfig::quiet());
    let user = controller.create_user("Zed", "", "zed@example.com").unwrap();
    let ctx = controller
        .context(user.id(), ResourceKind::Url, "9", Verb::LIST, Attributes::new())
        .unwrap();
    let decision = controller.authorize(&ctx);

    let event = crate::AuditEvent::decision(&ctx, &decision);
    let json = serde_json::to_value(&event).unwrap();
    assert_eq!(json["event"], "decision");
    assert_eq!(json["allowed"], false);
    assert_eq!(json["target_kind"], "url");
    assert!(json["cause"].as_str().unwrap().contains("no active profiles"));
}
