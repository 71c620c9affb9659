use std::sync::Arc;

use assert_json_diff::assert_json_include;
use chrono::Utc;

use lead_engine::assignment::AssignmentReason;
use lead_engine::audit::{AuditKind, MemoryLedger};
use lead_engine::conflict::Severity;
use lead_engine::customer::{Customer, MemoryDirectory};
use lead_engine::error::EngineError;
use lead_engine::lead::{
    AssignmentMethod, CustomerId, Lead, LeadId, MatchConfidence, TeamId, UserId, ValidationStatus,
    VerificationStatus,
};
use lead_engine::pipeline::{LeadPipeline, PipelineSettings};
use lead_engine::rules::{AssignmentRule, MemoryRuleSource, RuleCondition, RuleId};

struct Harness {
    directory: Arc<MemoryDirectory>,
    rules: Arc<MemoryRuleSource>,
    ledger: Arc<MemoryLedger>,
    pipeline: LeadPipeline,
}

fn harness(fallback_team: Option<TeamId>) -> Harness {
    let directory = Arc::new(MemoryDirectory::new());
    let rules = Arc::new(MemoryRuleSource::new());
    let ledger = Arc::new(MemoryLedger::new());
    let pipeline = LeadPipeline::new(
        directory.clone(),
        rules.clone(),
        ledger.clone(),
        PipelineSettings { fallback_team },
    );
    Harness {
        directory,
        rules,
        ledger,
        pipeline,
    }
}

fn lead() -> Lead {
    Lead {
        id: LeadId::new(),
        company_name: None,
        contact_name: None,
        phone: None,
        mobile: None,
        email: None,
        tax_id: None,
        street: None,
        city: None,
        country: None,
        industry: None,
        customer_type: None,
        linked_customer: None,
        owner: None,
        team: None,
        team_name: None,
        created_at: Utc::now(),
    }
}

fn customer() -> Customer {
    Customer {
        id: CustomerId::new(),
        name: Some("ACME Trading".to_string()),
        contact_name: None,
        tax_id: None,
        phone: None,
        mobile: None,
        email: None,
        street: None,
        city: None,
        owner: None,
        team: None,
        created_at: Utc::now(),
        last_modified_at: None,
    }
}

fn audit_kinds(harness: &Harness, lead_id: LeadId) -> Vec<AuditKind> {
    harness
        .ledger
        .entries_for(lead_id)
        .iter()
        .map(|e| e.kind)
        .collect()
}

#[tokio::test]
async fn test_incomplete_lead_skips_matching_and_routes_to_fallback() {
    // The only identifier is an 8-digit tax id, which normalizes away.
    let fallback = TeamId::new();
    let harness = harness(Some(fallback));
    let mut lead = lead();
    lead.tax_id = Some("12345678".to_string());

    let outcome = harness.pipeline.evaluate(&lead).await.unwrap();

    assert_eq!(outcome.validation_status, ValidationStatus::PendingInfo);
    assert_eq!(outcome.confidence, MatchConfidence::None);
    assert_eq!(outcome.assignment.team, Some(fallback));
    assert_eq!(
        outcome.assignment.reason,
        AssignmentReason::IncompleteLeadFallback
    );
    // No candidate lookup was ever issued.
    assert_eq!(harness.directory.lookup_calls(), 0);
    assert_eq!(audit_kinds(&harness, lead.id), vec![AuditKind::Validation]);
}

#[tokio::test]
async fn test_match_with_owner_assigns_automatically() {
    let harness = harness(None);
    let owner = UserId::new();
    let team = TeamId::new();
    let mut existing = customer();
    existing.tax_id = Some("0123456789".to_string());
    existing.owner = Some(owner);
    existing.team = Some(team);
    let existing_id = existing.id;
    harness.directory.insert_customer(existing);

    let mut lead = lead();
    lead.tax_id = Some("01-234-56789".to_string());
    lead.company_name = Some("ACME Trading".to_string());

    let outcome = harness.pipeline.evaluate(&lead).await.unwrap();

    assert_eq!(outcome.validation_status, ValidationStatus::Complete);
    assert_eq!(outcome.matched_customer, Some(existing_id));
    // Lone tax id scores 60, below every upper band.
    assert_eq!(outcome.confidence, MatchConfidence::Low);
    assert_eq!(outcome.assignment.method, AssignmentMethod::Automatic);
    assert_eq!(outcome.assignment.owner, Some(owner));
    assert_eq!(outcome.assignment.team, Some(team));
    assert_eq!(
        audit_kinds(&harness, lead.id),
        vec![
            AuditKind::Validation,
            AuditKind::DuplicateDetection,
            AuditKind::Assignment,
        ]
    );

    let entries = harness.ledger.entries_for(lead.id);
    assert_eq!(entries[1].outcome, "match_found");
    assert_json_include!(
        actual: entries[1].details.clone(),
        expected: serde_json::json!({
            "match_fields": ["tax_id"],
            "match_reason": "tax_id exact match",
            "conflict_count": 0,
        })
    );
    assert_eq!(entries[2].outcome, "automatic");
}

#[tokio::test]
async fn test_multi_identifier_match_reaches_very_high() {
    let harness = harness(None);
    let mut existing = customer();
    existing.tax_id = Some("0123456789".to_string());
    existing.phone = Some("0912345678".to_string());
    existing.owner = Some(UserId::new());
    harness.directory.insert_customer(existing);

    let mut lead = lead();
    lead.tax_id = Some("0123456789".to_string());
    lead.mobile = Some("+84912345678".to_string());

    let outcome = harness.pipeline.evaluate(&lead).await.unwrap();
    // 60 + 25 + 10 bonus = 95.
    assert_eq!(outcome.confidence, MatchConfidence::VeryHigh);
}

#[tokio::test]
async fn test_company_name_conflict_is_reported() {
    // Same tax id, different company name: exactly one high conflict.
    let harness = harness(None);
    let mut existing = customer();
    existing.tax_id = Some("0123456789".to_string());
    existing.name = Some("Beta Logistics".to_string());
    harness.directory.insert_customer(existing);

    let mut lead = lead();
    lead.tax_id = Some("0123456789".to_string());
    lead.company_name = Some("ACME Trading".to_string());

    let outcome = harness.pipeline.evaluate(&lead).await.unwrap();
    assert_eq!(outcome.conflicts.len(), 1);
    assert_eq!(outcome.conflicts[0].field, "company_name");
    assert_eq!(outcome.conflicts[0].severity, Severity::High);

    let detection = &harness.ledger.entries_for(lead.id)[1];
    assert_eq!(detection.details["conflict_count"], 1);
}

#[tokio::test]
async fn test_no_match_applies_rules() {
    let harness = harness(None);
    let target = UserId::new();
    harness.rules.insert_rule(AssignmentRule {
        id: RuleId::new(),
        name: "North region".to_string(),
        sequence: 10,
        active: true,
        condition: RuleCondition::Region("hanoi".to_string()),
        assign_to_user: target,
        assign_to_team: None,
    });

    let mut lead = lead();
    lead.mobile = Some("0912345678".to_string());
    lead.city = Some("Hanoi".to_string());

    let outcome = harness.pipeline.evaluate(&lead).await.unwrap();
    assert_eq!(outcome.matched_customer, None);
    assert_eq!(outcome.confidence, MatchConfidence::None);
    assert_eq!(outcome.assignment.method, AssignmentMethod::RuleBased);
    assert_eq!(outcome.assignment.owner, Some(target));

    let entries = harness.ledger.entries_for(lead.id);
    assert_eq!(entries[1].outcome, "no_match");
    assert_eq!(entries[2].outcome, "rule_based");
}

#[tokio::test]
async fn test_failing_rule_store_is_treated_as_no_rules() {
    let harness = harness(None);
    let target = UserId::new();
    // A rule that would match, behind a store that cannot be read.
    harness.rules.insert_rule(AssignmentRule {
        id: RuleId::new(),
        name: "North region".to_string(),
        sequence: 10,
        active: true,
        condition: RuleCondition::Region("hanoi".to_string()),
        assign_to_user: target,
        assign_to_team: None,
    });
    harness.rules.fail_listings(true);

    let mut lead = lead();
    lead.mobile = Some("0912345678".to_string());
    lead.city = Some("Hanoi".to_string());

    let outcome = harness.pipeline.evaluate(&lead).await.unwrap();
    assert_eq!(outcome.assignment.method, AssignmentMethod::Manual);
    assert_eq!(outcome.assignment.reason, AssignmentReason::NoMatchingRules);
    assert_eq!(outcome.assignment.owner, None);
}

#[tokio::test]
async fn test_no_rules_routes_to_manual() {
    let harness = harness(None);
    let mut lead = lead();
    lead.mobile = Some("0912345678".to_string());

    let outcome = harness.pipeline.evaluate(&lead).await.unwrap();
    assert_eq!(outcome.assignment.method, AssignmentMethod::Manual);
    assert_eq!(outcome.assignment.reason, AssignmentReason::NoMatchingRules);
}

#[tokio::test]
async fn test_reevaluation_is_idempotent_but_appends_history() {
    let harness = harness(None);
    let mut existing = customer();
    existing.tax_id = Some("0123456789".to_string());
    existing.owner = Some(UserId::new());
    harness.directory.insert_customer(existing);

    let mut lead = lead();
    lead.tax_id = Some("0123456789".to_string());

    let first = harness.pipeline.evaluate(&lead).await.unwrap();
    let second = harness.pipeline.evaluate(&lead).await.unwrap();

    assert_eq!(first.validation_status, second.validation_status);
    assert_eq!(first.matched_customer, second.matched_customer);
    assert_eq!(first.confidence, second.confidence);
    assert_eq!(first.assignment, second.assignment);
    // The ledger is a history, not a cache: both runs are recorded.
    assert_eq!(harness.ledger.entries_for(lead.id).len(), 6);
}

#[tokio::test]
async fn test_audit_append_failure_is_a_hard_failure() {
    let harness = harness(None);
    harness.ledger.fail_appends(true);

    let mut lead = lead();
    lead.mobile = Some("0912345678".to_string());

    match harness.pipeline.evaluate(&lead).await {
        Err(EngineError::AuditWrite { lead_id, .. }) => assert_eq!(lead_id, lead.id),
        other => panic!("expected AuditWrite, got {other:?}"),
    }
    assert!(harness.ledger.is_empty());
}

#[tokio::test]
async fn test_partial_lookup_failure_still_matches() {
    let harness = harness(None);
    let mut existing = customer();
    existing.tax_id = Some("0123456789".to_string());
    existing.phone = Some("0912345678".to_string());
    existing.owner = Some(UserId::new());
    harness.directory.insert_customer(existing);
    harness.directory.fail_phone_lookups(true);

    let mut lead = lead();
    lead.tax_id = Some("0123456789".to_string());
    lead.mobile = Some("0912345678".to_string());

    let outcome = harness.pipeline.evaluate(&lead).await.unwrap();
    // Only the tax id lookup succeeded: 60 points, still a match.
    assert!(outcome.matched_customer.is_some());
    assert_eq!(outcome.confidence, MatchConfidence::Low);
}

#[tokio::test]
async fn test_confirm_match_completes_verification() {
    let harness = harness(None);
    let lead = lead();
    let customer_id = CustomerId::new();

    let outcome = harness
        .pipeline
        .confirm_match(&lead, customer_id, MatchConfidence::High)
        .await
        .unwrap();

    assert_eq!(outcome.verification_status, VerificationStatus::Completed);
    assert_eq!(outcome.matched_customer, Some(customer_id));
    let entries = harness.ledger.entries_for(lead.id);
    assert_eq!(entries[0].kind, AuditKind::Verification);
    assert_eq!(entries[0].outcome, "confirmed_match");
}

#[tokio::test]
async fn test_reject_match_clears_the_match() {
    let harness = harness(None);
    let lead = lead();
    let rejected = CustomerId::new();

    let outcome = harness
        .pipeline
        .reject_match(&lead, Some(rejected))
        .await
        .unwrap();

    assert_eq!(outcome.verification_status, VerificationStatus::Completed);
    assert_eq!(outcome.matched_customer, None);
    assert_eq!(outcome.confidence, MatchConfidence::None);
    let entries = harness.ledger.entries_for(lead.id);
    assert_eq!(entries[0].outcome, "false_positive");
    assert_eq!(entries[0].customer_id, Some(rejected));
}

#[tokio::test]
async fn test_concurrent_evaluations_of_different_leads() {
    let harness = Arc::new(harness(None));

    let mut handles = Vec::new();
    for _ in 0..8 {
        let harness = harness.clone();
        handles.push(tokio::spawn(async move {
            let mut lead = lead();
            lead.mobile = Some("0912345678".to_string());
            (lead.id, harness.pipeline.evaluate(&lead).await)
        }));
    }

    for handle in handles {
        let (lead_id, result) = handle.await.unwrap();
        assert!(result.is_ok());
        assert_eq!(harness.ledger.entries_for(lead_id).len(), 3);
    }
}

#[tokio::test]
async fn test_lock_table_drains_after_evaluations() {
    let harness = Arc::new(harness(None));

    let mut handles = Vec::new();
    for _ in 0..8 {
        let harness = harness.clone();
        handles.push(tokio::spawn(async move {
            let mut lead = lead();
            lead.mobile = Some("0912345678".to_string());
            harness.pipeline.evaluate(&lead).await
        }));
    }
    for handle in handles {
        assert!(handle.await.unwrap().is_ok());
    }

    // Repeated runs of one lead contend on the same slot.
    let mut repeated = lead();
    repeated.mobile = Some("0912345678".to_string());
    harness.pipeline.evaluate(&repeated).await.unwrap();
    harness.pipeline.evaluate(&repeated).await.unwrap();

    // Nothing is in flight, so no per-lead slot survives.
    assert_eq!(harness.pipeline.leads_in_flight(), 0);
}
