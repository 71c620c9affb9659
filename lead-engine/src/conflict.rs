//! Field-by-field discrepancy detection between a lead and its matched
//! customer. A missing value on either side suppresses that check, so
//! sparse data never produces false conflicts.

use serde::{Deserialize, Serialize};

use crate::customer::Customer;
use crate::lead::{Lead, NormalizedIdentifiers};
use crate::matching::MatchedFields;
use crate::normalize::normalize_phone;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conflict {
    pub field: &'static str,
    pub lead_value: String,
    pub customer_value: String,
    pub severity: Severity,
}

fn folded(value: &str) -> String {
    value.trim().to_lowercase()
}

/// Compare trimmed, case-folded values when both sides are present.
fn differs(lead_value: Option<&str>, customer_value: Option<&str>) -> bool {
    match (lead_value, customer_value) {
        (Some(l), Some(c)) => {
            let (l, c) = (folded(l), folded(c));
            !l.is_empty() && !c.is_empty() && l != c
        }
        _ => false,
    }
}

/// Detect discrepancies between a lead and its selected match. The
/// company-name check only fires when the match included a tax id hit
/// and the stored tax id equals the lead's normalized one; a different
/// company name behind the same tax id is the one high-severity case.
pub fn detect_conflicts(
    lead: &Lead,
    normalized: &NormalizedIdentifiers,
    customer: &Customer,
    matched: MatchedFields,
) -> Vec<Conflict> {
    let mut conflicts = Vec::new();

    if matched.tax_id
        && normalized.tax_id.is_some()
        && customer.tax_id == normalized.tax_id
        && differs(lead.company_name.as_deref(), customer.name.as_deref())
    {
        conflicts.push(Conflict {
            field: "company_name",
            lead_value: lead.company_name.clone().unwrap_or_default(),
            customer_value: customer.name.clone().unwrap_or_default(),
            severity: Severity::High,
        });
    }

    if differs(lead.contact_name.as_deref(), customer.contact_name.as_deref()) {
        conflicts.push(Conflict {
            field: "contact_name",
            lead_value: lead.contact_name.clone().unwrap_or_default(),
            customer_value: customer.contact_name.clone().unwrap_or_default(),
            severity: Severity::Medium,
        });
    }

    if differs(lead.street.as_deref(), customer.street.as_deref()) {
        conflicts.push(Conflict {
            field: "street",
            lead_value: lead.street.clone().unwrap_or_default(),
            customer_value: customer.street.clone().unwrap_or_default(),
            severity: Severity::Low,
        });
    }

    if differs(lead.city.as_deref(), customer.city.as_deref()) {
        conflicts.push(Conflict {
            field: "city",
            lead_value: lead.city.clone().unwrap_or_default(),
            customer_value: customer.city.clone().unwrap_or_default(),
            severity: Severity::Low,
        });
    }

    // Phone comparison happens on canonical forms; the reported
    // values stay as entered on each side.
    if let (Some(lead_phone), Some(customer_raw)) = (
        normalized.phone.as_deref(),
        customer.phone.as_deref().or(customer.mobile.as_deref()),
    ) {
        let customer_phone = normalize_phone(Some(customer_raw));
        if customer_phone.as_deref() != Some(lead_phone) {
            let lead_raw = lead
                .mobile
                .as_deref()
                .or(lead.phone.as_deref())
                .unwrap_or(lead_phone);
            conflicts.push(Conflict {
                field: "phone",
                lead_value: lead_raw.to_string(),
                customer_value: customer_raw.to_string(),
                severity: Severity::Medium,
            });
        }
    }

    conflicts
}
