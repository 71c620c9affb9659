//! Ownership decisions: existing-owner short-circuit, conflict
//! validation, the configured rule interpreter, and the manual
//! fallback. A conflict here is a normal outcome routed to manual
//! review, never an error.

use serde::{Deserialize, Serialize};

use crate::customer::CustomerDirectory;
use crate::lead::{AssignmentMethod, CustomerId, Lead, LeadId, TeamId, UserId};
use crate::matching::ScoredCandidate;
use crate::rules::{first_matching_rule, AssignmentRule, RuleId};

/// Why an assignment decision came out the way it did. Recorded on the
/// audit trail and surfaced to operators for manual cases.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum AssignmentReason {
    ExistingCustomerOwnership {
        customer_id: CustomerId,
    },
    AssignmentConflict {
        customer_id: CustomerId,
        conflicts: Vec<OwnershipConflict>,
    },
    ExistingCustomerNoOwner {
        customer_id: CustomerId,
    },
    RuleMatch {
        rule_id: RuleId,
        rule_name: String,
    },
    NoMatchingRules,
    IncompleteLeadFallback,
}

/// A reason automatic assignment to an existing owner was refused.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OwnershipConflict {
    LeadAlreadyAssigned {
        current_owner: UserId,
        proposed_owner: UserId,
    },
    CustomerHasDifferentSales {
        other_leads: Vec<LeadId>,
        other_owners: Vec<UserId>,
    },
}

/// The terminal assignment outcome of one evaluation pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assignment {
    pub method: AssignmentMethod,
    pub owner: Option<UserId>,
    pub team: Option<TeamId>,
    pub reason: AssignmentReason,
}

/// Pre-conditions for automatically assigning `lead` to
/// `proposed_owner` on behalf of `customer_id`: the lead must not
/// already belong to someone else, and the customer's other leads must
/// not be owned by a different salesperson.
///
/// A failed directory lookup is logged and contributes no conflicts;
/// it never blocks the decision.
pub async fn validate_assignment(
    directory: &(dyn CustomerDirectory + Send + Sync),
    lead: &Lead,
    proposed_owner: UserId,
    customer_id: CustomerId,
) -> Vec<OwnershipConflict> {
    let mut conflicts = Vec::new();

    if let Some(current_owner) = lead.owner {
        if current_owner != proposed_owner {
            conflicts.push(OwnershipConflict::LeadAlreadyAssigned {
                current_owner,
                proposed_owner,
            });
        }
    }

    match directory
        .find_other_leads_owned_by_different_user(customer_id, proposed_owner, lead.id)
        .await
    {
        Ok(other_leads) if !other_leads.is_empty() => {
            let mut other_owners: Vec<UserId> =
                other_leads.iter().map(|l| l.owner).collect();
            other_owners.sort();
            other_owners.dedup();
            conflicts.push(OwnershipConflict::CustomerHasDifferentSales {
                other_leads: other_leads.into_iter().map(|l| l.id).collect(),
                other_owners,
            });
        }
        Ok(_) => (),
        Err(e) => {
            tracing::warn!("ownership-conflict lookup failed, skipping the check: {}", e);
        }
    }

    conflicts
}

/// Decide ownership when duplicate detection selected a primary match.
pub async fn decide_for_match(
    directory: &(dyn CustomerDirectory + Send + Sync),
    lead: &Lead,
    primary: &ScoredCandidate,
) -> Assignment {
    let customer = &primary.customer;

    let Some(owner) = customer.owner else {
        return Assignment {
            method: AssignmentMethod::Manual,
            owner: None,
            team: lead.team,
            reason: AssignmentReason::ExistingCustomerNoOwner {
                customer_id: customer.id,
            },
        };
    };

    let conflicts = validate_assignment(directory, lead, owner, customer.id).await;
    if !conflicts.is_empty() {
        // Never silently overwrite an existing ownership; route to an
        // operator instead.
        return Assignment {
            method: AssignmentMethod::Manual,
            owner: lead.owner,
            team: lead.team,
            reason: AssignmentReason::AssignmentConflict {
                customer_id: customer.id,
                conflicts,
            },
        };
    }

    Assignment {
        method: AssignmentMethod::Automatic,
        owner: Some(owner),
        team: customer.team.or(lead.team),
        reason: AssignmentReason::ExistingCustomerOwnership {
            customer_id: customer.id,
        },
    }
}

/// Decide ownership for a lead with no duplicate: first matching
/// configured rule wins, otherwise manual.
pub fn decide_by_rules(lead: &Lead, rules: &[AssignmentRule]) -> Assignment {
    match first_matching_rule(lead, rules) {
        Some(rule) => Assignment {
            method: AssignmentMethod::RuleBased,
            owner: Some(rule.assign_to_user),
            team: rule.assign_to_team.or(lead.team),
            reason: AssignmentReason::RuleMatch {
                rule_id: rule.id,
                rule_name: rule.name.clone(),
            },
        },
        None => Assignment {
            method: AssignmentMethod::Manual,
            owner: lead.owner,
            team: lead.team,
            reason: AssignmentReason::NoMatchingRules,
        },
    }
}

/// Terminal routing for a lead with no usable identifier: straight to
/// the configured fallback team, bypassing matching entirely. An
/// unconfigured fallback team degrades to leaving the team unchanged.
pub fn route_incomplete(lead: &Lead, fallback_team: Option<TeamId>) -> Assignment {
    Assignment {
        method: AssignmentMethod::Manual,
        owner: lead.owner,
        team: fallback_team.or(lead.team),
        reason: AssignmentReason::IncompleteLeadFallback,
    }
}

impl Assignment {
    /// Audit payload for the assignment step.
    pub fn audit_details(&self) -> serde_json::Value {
        serde_json::json!({
            "method": self.method,
            "owner": self.owner,
            "team": self.team,
            "decision": self.reason,
        })
    }

    /// Outcome label recorded on the audit trail.
    pub fn outcome_label(&self) -> &'static str {
        match &self.reason {
            AssignmentReason::ExistingCustomerOwnership { .. } => "automatic",
            AssignmentReason::AssignmentConflict { .. } => "conflict_detected",
            AssignmentReason::ExistingCustomerNoOwner { .. } => "manual_required",
            AssignmentReason::RuleMatch { .. } => "rule_based",
            AssignmentReason::NoMatchingRules => "no_rule_match",
            AssignmentReason::IncompleteLeadFallback => "fallback_team",
        }
    }

    pub fn matched_customer(&self) -> Option<CustomerId> {
        match &self.reason {
            AssignmentReason::ExistingCustomerOwnership { customer_id }
            | AssignmentReason::AssignmentConflict { customer_id, .. }
            | AssignmentReason::ExistingCustomerNoOwner { customer_id } => Some(*customer_id),
            _ => None,
        }
    }
}
