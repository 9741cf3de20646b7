//! End-to-end tests for the cost controller over an in-memory database.

// Integration tests use expect/unwrap extensively for clarity -- panicking
// on failure is the correct behavior in test code.
#![allow(
    clippy::expect_used,
    clippy::unwrap_used,
    clippy::missing_panics_doc,
    clippy::indexing_slicing,
    clippy::arithmetic_side_effects
)]

use chrono::{Duration, TimeZone, Utc};
use rust_decimal_macros::dec;
use spendguard_budget::{AlertFilter, BudgetLimit};
use spendguard_core::{
    AuthorizeRequest, CacheBackendKind, Command, CommandOutput, CoreError, CostController,
    LookupRequest, SpendguardConfig, StepAction, UsageReport,
};
use spendguard_db::Database;
use spendguard_tracker::RecordRequest;
use spendguard_types::{
    AlertLevel, AlertType, BudgetPeriod, Clock, Complexity, MatchType, StatsPeriod,
    TaskClassification,
};
use spendguard_workflow::{StepStatus, StepUsage, WorkflowStatus};

fn clock() -> Clock {
    Clock::manual(
        Utc.with_ymd_and_hms(2025, 3, 12, 10, 0, 0)
            .single()
            .unwrap(),
    )
}

async fn controller_with(config: SpendguardConfig, clock: &Clock) -> CostController {
    let db = Database::in_memory().await.expect("in-memory database");
    CostController::new(config, db, clock.clone()).expect("controller")
}

async fn controller(clock: &Clock) -> CostController {
    controller_with(SpendguardConfig::default(), clock).await
}

fn usage(model: &str, input_tokens: u64, output_tokens: u64) -> UsageReport {
    UsageReport {
        usage: RecordRequest {
            model: model.to_owned(),
            input_tokens,
            output_tokens,
            ..RecordRequest::default()
        },
        prompt: None,
        system_prompt: None,
        response: None,
        cache_semantic: true,
        metadata: None,
    }
}

fn lookup(prompt: &str) -> LookupRequest {
    LookupRequest {
        prompt: prompt.to_owned(),
        system_prompt: None,
        model: Some("claude-sonnet-4".to_owned()),
        allow_semantic: true,
        classification: None,
    }
}

// ---------------------------------------------------------------------------
// Request lifecycle
// ---------------------------------------------------------------------------

#[tokio::test]
async fn miss_then_record_then_exact_hit() {
    let clock = clock();
    let controller = controller(&clock).await;

    assert!(controller.lookup("u1", &lookup("What is Rust?")).await.unwrap().is_none());

    let mut report = usage("claude-sonnet-4", 100_000, 2_000);
    report.prompt = Some("What is Rust?".to_owned());
    report.response = Some("A systems language.".to_owned());
    let outcome = controller.record_usage("u1", report).await.unwrap();
    assert_eq!(outcome.metrics.cost, dec!(0.33));
    assert!(outcome.cached);
    assert_eq!(outcome.budget.daily.spent, dec!(0.33));

    let hit = controller
        .lookup("u1", &lookup("What is Rust?"))
        .await
        .unwrap()
        .expect("cached response");
    assert_eq!(hit.match_type, MatchType::Exact);
    assert_eq!(hit.entry.response, "A systems language.");

    let stats = controller.stats("u1", StatsPeriod::Day).unwrap();
    assert_eq!(stats.total_requests, 2);
    assert_eq!(stats.cache_hits, 1);
    assert_eq!(stats.total_cost, dec!(0.33));
    assert_eq!(stats.cost_saved, dec!(0.33));
}

#[tokio::test]
async fn cache_hits_are_never_written_back() {
    let clock = clock();
    let controller = controller(&clock).await;

    let mut report = usage("claude-sonnet-4", 10, 10);
    report.usage.cache_hit = true;
    report.prompt = Some("p".to_owned());
    report.response = Some("r".to_owned());
    let outcome = controller.record_usage("u1", report).await.unwrap();
    assert!(!outcome.cached);
    assert!(controller.lookup("u1", &lookup("p")).await.unwrap().is_none());
}

#[tokio::test]
async fn near_limit_check_warns_once_and_raises_alert() {
    let clock = clock();
    let controller = controller(&clock).await;

    // 128k output tokens on the premium model cost exactly 9.60.
    let outcome = controller
        .record_usage("u1", usage("claude-opus-4", 0, 128_000))
        .await
        .unwrap();
    assert_eq!(outcome.metrics.cost, dec!(9.6));
    assert_eq!(outcome.alerts.len(), 1);
    assert_eq!(outcome.alerts[0].alert_type, AlertType::HighCostRequest);
    assert_eq!(outcome.alerts[0].level, AlertLevel::Critical);

    let request = AuthorizeRequest {
        model: "gpt-4o-mini".to_owned(),
        input_tokens: 1_000,
        output_tokens: Some(100),
        classification: None,
    };
    let first = controller.authorize("u1", &request).await.unwrap();
    assert!(first.check.allowed);
    assert_eq!(first.check.warnings.len(), 1);
    assert_eq!(first.check.warnings[0].level, AlertLevel::Critical);
    assert_eq!(first.check.warnings[0].percent_used, dec!(96));
    assert_eq!(first.alerts.len(), 1);
    assert_eq!(first.alerts[0].alert_type, AlertType::BudgetWarning);

    let second = controller.authorize("u1", &request).await.unwrap();
    assert!(second.check.warnings.is_empty());
    assert!(second.alerts.is_empty());
}

#[tokio::test]
async fn per_request_limit_denies_and_alerts() {
    let clock = clock();
    let controller = controller(&clock).await;

    // 20k output tokens on the premium model: 1.50 against a 1.00 cap.
    let request = AuthorizeRequest {
        model: "claude-opus-4".to_owned(),
        input_tokens: 0,
        output_tokens: Some(20_000),
        classification: None,
    };
    let auth = controller.authorize("u1", &request).await.unwrap();
    assert_eq!(auth.estimated_cost, dec!(1.5));
    assert!(!auth.check.allowed);
    assert_eq!(auth.check.exceeded, Some(BudgetLimit::PerRequest));
    assert!(auth.alerts.iter().any(|a| a.alert_type == AlertType::BudgetExceeded));
}

#[tokio::test]
async fn output_estimate_falls_back_to_classification() {
    let clock = clock();
    let controller = controller(&clock).await;

    let mut request = AuthorizeRequest {
        model: "claude-sonnet-4".to_owned(),
        input_tokens: 0,
        output_tokens: None,
        classification: Some(TaskClassification {
            task_type: "summarize".to_owned(),
            complexity: Complexity::Low,
            estimated_output_tokens: Some(2_000),
        }),
    };
    let auth = controller.authorize("u1", &request).await.unwrap();
    assert_eq!(auth.estimated_output_tokens, 2_000);
    assert_eq!(auth.estimated_cost, dec!(0.03));

    if let Some(c) = request.classification.as_mut() {
        c.estimated_output_tokens = None;
        c.complexity = Complexity::High;
    }
    let auth = controller.authorize("u1", &request).await.unwrap();
    assert_eq!(auth.estimated_output_tokens, 4_096);
}

#[tokio::test]
async fn budgets_are_per_owner() {
    let clock = clock();
    let controller = controller(&clock).await;

    controller
        .record_usage("alice", usage("claude-sonnet-4", 100_000, 2_000))
        .await
        .unwrap();
    let alice = controller.status("alice").await.unwrap();
    let bob = controller.status("bob").await.unwrap();
    assert_eq!(alice.daily.spent, dec!(0.33));
    assert_eq!(bob.daily.spent, dec!(0));
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

#[tokio::test]
async fn set_budget_rejects_bad_input_without_applying_it() {
    let clock = clock();
    let controller = controller(&clock).await;

    for amount in ["ten", "0", "-5"] {
        let result = controller
            .execute(Command::SetBudget {
                owner_id: "u1".to_owned(),
                period: "daily".to_owned(),
                amount: amount.to_owned(),
            })
            .await;
        assert!(matches!(result, Err(CoreError::InvalidCommand(_))), "{amount}");
    }
    let status = controller.status("u1").await.unwrap();
    assert_eq!(status.daily.limit, dec!(10));

    let output = controller
        .execute(Command::SetBudget {
            owner_id: "u1".to_owned(),
            period: "Daily".to_owned(),
            amount: "25".to_owned(),
        })
        .await
        .unwrap();
    assert!(matches!(output, CommandOutput::BudgetUpdated(ref c) if c.daily == dec!(25)));
    let status = controller.status("u1").await.unwrap();
    assert_eq!(status.period(BudgetPeriod::Daily).limit, dec!(25));
}

#[tokio::test]
async fn alerts_can_be_listed_and_acknowledged() {
    let clock = clock();
    let controller = controller(&clock).await;
    controller
        .record_usage("u1", usage("claude-opus-4", 0, 20_000))
        .await
        .unwrap();

    let output = controller
        .execute(Command::Alerts {
            filter: AlertFilter {
                unacknowledged_only: true,
                ..AlertFilter::default()
            },
        })
        .await
        .unwrap();
    let CommandOutput::Alerts(alerts) = output else {
        panic!("expected alerts");
    };
    assert_eq!(alerts.len(), 1);

    let acked = controller
        .execute(Command::AcknowledgeAlert { id: alerts[0].id })
        .await
        .unwrap();
    assert_eq!(acked, CommandOutput::Acknowledged(1));

    let missing = controller
        .execute(Command::AcknowledgeAlert {
            id: spendguard_types::AlertId::new(),
        })
        .await;
    assert!(matches!(missing, Err(CoreError::NotFound(_))));
}

#[tokio::test]
async fn heavy_usage_recommends_a_plan_once() {
    let clock = clock();
    let controller = controller(&clock).await;
    // 10 x 3.75 = 37.50 a month, above the cheapest plan.
    for _ in 0..10 {
        controller
            .record_usage("u1", usage("claude-opus-4", 0, 50_000))
            .await
            .unwrap();
    }

    let analytics = controller.analytics("u1", StatsPeriod::Month).unwrap();
    assert!(analytics.subscription.recommended);
    controller.analytics("u1", StatsPeriod::Month).unwrap();

    let recommendations = controller.alerts().alerts(&AlertFilter {
        alert_type: Some(AlertType::SubscriptionRecommended),
        ..AlertFilter::default()
    });
    assert_eq!(recommendations.len(), 1);
}

// ---------------------------------------------------------------------------
// Workflows
// ---------------------------------------------------------------------------

#[tokio::test]
async fn workflow_steps_persist_through_the_controller() {
    let clock = clock();
    let controller = controller(&clock).await;

    let created = controller
        .create_workflow("u1", "report", vec!["fetch".to_owned(), "write".to_owned()], None)
        .await
        .unwrap();
    controller.apply_step(created.id, StepAction::Start).await.unwrap();
    let after = controller
        .apply_step(
            created.id,
            StepAction::Complete {
                output: Some(serde_json::json!({"rows": 3})),
                usage: StepUsage {
                    model: Some("claude-sonnet-4".to_owned()),
                    input_tokens: 100,
                    output_tokens: 50,
                    cost: dec!(0.01),
                },
            },
        )
        .await
        .unwrap();
    assert_eq!(after.current_step_index, 1);
    assert_eq!(after.steps[0].status, StepStatus::Completed);

    let loaded = controller.workflow(created.id).await.unwrap().unwrap();
    assert_eq!(loaded, after);

    let refused = controller
        .apply_step(created.id, StepAction::Complete { output: None, usage: StepUsage::default() })
        .await;
    assert!(matches!(refused, Err(CoreError::Workflow(_))));

    let missing = controller
        .apply_step(spendguard_types::WorkflowId::new(), StepAction::Start)
        .await;
    assert!(matches!(missing, Err(CoreError::NotFound(_))));
}

#[tokio::test]
async fn workflow_without_steps_is_rejected() {
    let clock = clock();
    let controller = controller(&clock).await;

    let result = controller.create_workflow("u1", "empty", Vec::new(), None).await;
    assert!(matches!(result, Err(CoreError::InvalidCommand(_))));

    let resumable = controller.resume_workflows(Some("u1"), true).await.unwrap();
    assert!(resumable.is_empty());
}

#[tokio::test]
async fn resume_resets_interrupted_steps() {
    let clock = clock();
    let controller = controller(&clock).await;

    let wf = controller
        .create_workflow("u1", "crash", vec!["a".to_owned()], None)
        .await
        .unwrap();
    controller.apply_step(wf.id, StepAction::Start).await.unwrap();

    let resumed = controller.resume_workflows(Some("u1"), false).await.unwrap();
    assert_eq!(resumed.len(), 1);
    assert_eq!(resumed[0].steps[0].status, StepStatus::Pending);

    let stored = controller.workflow(wf.id).await.unwrap().unwrap();
    assert_eq!(stored.steps[0].status, StepStatus::Pending);
    assert_eq!(stored.status, WorkflowStatus::Running);
}

#[tokio::test]
async fn maintenance_prunes_old_state() {
    let clock = clock();
    let mut config = SpendguardConfig::default();
    config.storage.cache_backend = CacheBackendKind::Sqlite;
    let controller = controller_with(config, &clock).await;

    let mut report = usage("claude-sonnet-4", 10, 10);
    report.prompt = Some("old".to_owned());
    report.response = Some("answer".to_owned());
    controller.record_usage("u1", report).await.unwrap();
    let wf = controller
        .create_workflow("u1", "done", vec!["only".to_owned()], None)
        .await
        .unwrap();
    controller.apply_step(wf.id, StepAction::Start).await.unwrap();

    clock.advance(Duration::days(100));
    let output = controller.execute(Command::Maintenance).await.unwrap();
    let CommandOutput::Maintenance(report) = output else {
        panic!("expected maintenance report");
    };
    assert!(report.cache_entries_removed >= 1);
    assert_eq!(report.workflows_pruned, 1);
    assert_eq!(report.metrics_pruned, 1);
    assert!(controller.workflow(wf.id).await.unwrap().is_none());
}
