//! Lead lifecycle controller: orchestrates normalization, validation,
//! duplicate detection and assignment on every create/edit trigger,
//! and records each decision on the audit ledger.
//!
//! Every step recovers locally except the ledger append: an outcome
//! whose audit entry failed to persist is never handed to the host, so
//! mutation and audit are one atomic unit from the caller's view.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::assignment::{self, Assignment};
use crate::audit::{AuditKind, AuditSink, NewAuditEntry};
use crate::conflict::{detect_conflicts, Conflict};
use crate::customer::CustomerDirectory;
use crate::error::EngineError;
use crate::lead::{
    CustomerId, Lead, LeadId, MatchConfidence, NormalizedIdentifiers, TeamId, ValidationStatus,
    VerificationStatus,
};
use crate::matching::{find_candidates, select_primary, MatchedFields, ScoredCandidate};
use crate::rules::RuleSource;

#[derive(Debug, Clone, Default)]
pub struct PipelineSettings {
    /// Team receiving leads that fail validation. Unconfigured means
    /// incomplete leads keep their current team.
    pub fallback_team: Option<TeamId>,
}

/// Structured result the host persists onto the lead record.
#[derive(Debug, Clone, Serialize)]
pub struct EvaluationOutcome {
    pub lead_id: LeadId,
    pub validation_status: ValidationStatus,
    pub normalized: NormalizedIdentifiers,
    pub matched_customer: Option<CustomerId>,
    pub confidence: MatchConfidence,
    pub assignment: Assignment,
    pub conflicts: Vec<Conflict>,
}

/// Result of a verification decision by a salesperson.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationOutcome {
    pub lead_id: LeadId,
    pub verification_status: VerificationStatus,
    pub matched_customer: Option<CustomerId>,
    pub confidence: MatchConfidence,
}

pub struct LeadPipeline {
    directory: Arc<dyn CustomerDirectory + Send + Sync>,
    rules: Arc<dyn RuleSource + Send + Sync>,
    audit: Arc<dyn AuditSink + Send + Sync>,
    settings: PipelineSettings,
    // At most one in-flight evaluation per lead; different leads run
    // independently. Entries live only while an evaluation holds or
    // awaits the slot.
    locks: Mutex<HashMap<LeadId, Arc<tokio::sync::Mutex<()>>>>,
}

/// Exclusive hold on a lead's evaluation slot. Dropping it releases
/// the slot and removes the map entry unless another evaluation is
/// queued on the same lead.
struct LeadSlot<'a> {
    locks: &'a Mutex<HashMap<LeadId, Arc<tokio::sync::Mutex<()>>>>,
    lead_id: LeadId,
    _permit: tokio::sync::OwnedMutexGuard<()>,
}

impl Drop for LeadSlot<'_> {
    fn drop(&mut self) {
        let mut locks = self.locks.lock().unwrap();
        if let Some(entry) = locks.get(&self.lead_id) {
            // Two clones means only the map and this slot hold the
            // lock; a queued waiter would hold a third.
            if Arc::strong_count(entry) <= 2 {
                locks.remove(&self.lead_id);
            }
        }
    }
}

impl LeadPipeline {
    pub fn new(
        directory: Arc<dyn CustomerDirectory + Send + Sync>,
        rules: Arc<dyn RuleSource + Send + Sync>,
        audit: Arc<dyn AuditSink + Send + Sync>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            directory,
            rules,
            audit,
            settings,
            locks: Mutex::new(HashMap::new()),
        }
    }

    async fn lock_lead(&self, lead_id: LeadId) -> LeadSlot<'_> {
        let lock = self
            .locks
            .lock()
            .unwrap()
            .entry(lead_id)
            .or_default()
            .clone();
        let permit = lock.lock_owned().await;
        LeadSlot {
            locks: &self.locks,
            lead_id,
            _permit: permit,
        }
    }

    /// Leads with an evaluation currently holding or awaiting a slot.
    pub fn leads_in_flight(&self) -> usize {
        self.locks.lock().unwrap().len()
    }

    async fn append_audit(
        &self,
        lead_id: LeadId,
        entry: NewAuditEntry,
    ) -> Result<(), EngineError> {
        self.audit.append(entry).await.map_err(|e| {
            tracing::error!("audit append failed for lead {}: {}", lead_id, e);
            metrics::counter!("lead_audit_append_failures_total").increment(1);
            EngineError::AuditWrite {
                lead_id,
                source: Box::new(e),
            }
        })?;
        Ok(())
    }

    /// Run the full pipeline for one lead. Invoked by the host on lead
    /// creation and on any edit touching phone/mobile/email/tax id.
    ///
    /// Identical inputs always reach the identical terminal state;
    /// each run still appends fresh audit entries, since the ledger is
    /// a history, not a cache.
    #[instrument(skip_all, fields(lead_id = %lead.id))]
    pub async fn evaluate(&self, lead: &Lead) -> Result<EvaluationOutcome, EngineError> {
        let _slot = self.lock_lead(lead.id).await;
        let run_started = Instant::now();

        // Step 1+2: normalize and validate.
        let step_started = Instant::now();
        let normalized = NormalizedIdentifiers::from_lead(lead);
        let validation_status = if normalized.any_present() {
            ValidationStatus::Complete
        } else {
            ValidationStatus::PendingInfo
        };
        self.append_audit(
            lead.id,
            NewAuditEntry {
                lead_id: lead.id,
                customer_id: None,
                kind: AuditKind::Validation,
                outcome: match validation_status {
                    ValidationStatus::Complete => "complete".to_string(),
                    _ => "incomplete".to_string(),
                },
                duration: step_started.elapsed(),
                details: serde_json::json!({
                    "fields_present": normalized.present_labels(),
                    "validation_status": validation_status,
                }),
            },
        )
        .await?;

        if validation_status != ValidationStatus::Complete {
            // No usable identifier: skip matching entirely and route
            // to the fallback team. Terminal for this pass.
            let assignment = assignment::route_incomplete(lead, self.settings.fallback_team);
            metrics::counter!("lead_evaluations_total", "outcome" => "incomplete").increment(1);
            return Ok(EvaluationOutcome {
                lead_id: lead.id,
                validation_status,
                normalized,
                matched_customer: None,
                confidence: MatchConfidence::None,
                assignment,
                conflicts: Vec::new(),
            });
        }

        // Step 3: duplicate detection.
        let step_started = Instant::now();
        let candidates = find_candidates(
            self.directory.as_ref(),
            &normalized,
            lead.linked_customer,
        )
        .await;
        let scored: Vec<ScoredCandidate> =
            candidates.into_iter().map(ScoredCandidate::from).collect();
        let primary = select_primary(&scored).cloned();

        let (confidence, conflicts) = match &primary {
            Some(primary) => {
                let conflicts =
                    detect_conflicts(lead, &normalized, &primary.customer, primary.matched);
                self.append_audit(
                    lead.id,
                    NewAuditEntry {
                        lead_id: lead.id,
                        customer_id: Some(primary.customer.id),
                        kind: AuditKind::DuplicateDetection,
                        outcome: "match_found".to_string(),
                        duration: step_started.elapsed(),
                        details: serde_json::json!({
                            "confidence": primary.confidence,
                            "score": primary.score,
                            "match_fields": primary.matched.labels(),
                            "match_reason": match_reason(primary.matched),
                            "conflicts_detected": conflicts,
                            "conflict_count": conflicts.len(),
                        }),
                    },
                )
                .await?;
                (primary.confidence, conflicts)
            }
            None => {
                self.append_audit(
                    lead.id,
                    NewAuditEntry {
                        lead_id: lead.id,
                        customer_id: None,
                        kind: AuditKind::DuplicateDetection,
                        outcome: "no_match".to_string(),
                        duration: step_started.elapsed(),
                        details: serde_json::json!({ "result": "new_customer" }),
                    },
                )
                .await?;
                (MatchConfidence::None, Vec::new())
            }
        };

        // Step 4: assignment.
        let step_started = Instant::now();
        let assignment = match &primary {
            Some(primary) => {
                assignment::decide_for_match(self.directory.as_ref(), lead, primary).await
            }
            None => {
                // Snapshot the rule list once; concurrent rule edits
                // cannot produce a partial match.
                let rules = match self.rules.list_active_rules_ordered().await {
                    Ok(rules) => rules,
                    Err(e) => {
                        tracing::warn!("rule lookup failed, treating as no rules: {}", e);
                        Vec::new()
                    }
                };
                assignment::decide_by_rules(lead, &rules)
            }
        };
        self.append_audit(
            lead.id,
            NewAuditEntry {
                lead_id: lead.id,
                customer_id: assignment.matched_customer(),
                kind: AuditKind::Assignment,
                outcome: assignment.outcome_label().to_string(),
                duration: step_started.elapsed(),
                details: assignment.audit_details(),
            },
        )
        .await?;

        metrics::counter!("lead_evaluations_total", "outcome" => assignment.outcome_label())
            .increment(1);
        metrics::histogram!("lead_evaluation_duration_seconds")
            .record(run_started.elapsed().as_secs_f64());

        Ok(EvaluationOutcome {
            lead_id: lead.id,
            validation_status,
            normalized,
            matched_customer: primary.as_ref().map(|p| p.customer.id),
            confidence,
            assignment,
            conflicts,
        })
    }

    /// A salesperson confirmed the duplicate match: link the customer
    /// and complete verification.
    #[instrument(skip_all, fields(lead_id = %lead.id))]
    pub async fn confirm_match(
        &self,
        lead: &Lead,
        customer_id: CustomerId,
        confidence: MatchConfidence,
    ) -> Result<VerificationOutcome, EngineError> {
        let _slot = self.lock_lead(lead.id).await;
        let step_started = Instant::now();

        self.append_audit(
            lead.id,
            NewAuditEntry {
                lead_id: lead.id,
                customer_id: Some(customer_id),
                kind: AuditKind::Verification,
                outcome: "confirmed_match".to_string(),
                duration: step_started.elapsed(),
                details: serde_json::json!({ "decision": "confirmed_match" }),
            },
        )
        .await?;

        Ok(VerificationOutcome {
            lead_id: lead.id,
            verification_status: VerificationStatus::Completed,
            matched_customer: Some(customer_id),
            confidence,
        })
    }

    /// A salesperson rejected the match as a false positive: clear it
    /// and complete verification.
    #[instrument(skip_all, fields(lead_id = %lead.id))]
    pub async fn reject_match(
        &self,
        lead: &Lead,
        rejected_customer: Option<CustomerId>,
    ) -> Result<VerificationOutcome, EngineError> {
        let _slot = self.lock_lead(lead.id).await;
        let step_started = Instant::now();

        self.append_audit(
            lead.id,
            NewAuditEntry {
                lead_id: lead.id,
                customer_id: rejected_customer,
                kind: AuditKind::Verification,
                outcome: "false_positive".to_string(),
                duration: step_started.elapsed(),
                details: serde_json::json!({ "decision": "rejected_match" }),
            },
        )
        .await?;

        Ok(VerificationOutcome {
            lead_id: lead.id,
            verification_status: VerificationStatus::Completed,
            matched_customer: None,
            confidence: MatchConfidence::None,
        })
    }
}

fn match_reason(matched: MatchedFields) -> String {
    format!("{} exact match", matched.labels().join(", "))
}
