use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::normalize::{normalize_email, normalize_phone, normalize_tax_id};

macro_rules! id_type {
    ($name:ident) => {
        #[derive(
            Debug,
            Clone,
            Copy,
            PartialEq,
            Eq,
            Hash,
            PartialOrd,
            Ord,
            Serialize,
            Deserialize,
            sqlx::Type,
        )]
        #[sqlx(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::now_v7())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                self.0.fmt(f)
            }
        }
    };
}

id_type!(LeadId);
id_type!(CustomerId);
id_type!(UserId);
id_type!(TeamId);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationStatus {
    Incomplete,
    PendingInfo,
    Complete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchConfidence {
    None,
    Low,
    Medium,
    High,
    VeryHigh,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssignmentMethod {
    Manual,
    Automatic,
    RuleBased,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationStatus {
    Pending,
    Completed,
}

/// A prospect record under evaluation, as handed to us by the host on
/// creation or on any edit touching an identifier-bearing field. The
/// engine never persists this; the host owns the record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lead {
    pub id: LeadId,
    pub company_name: Option<String>,
    pub contact_name: Option<String>,
    pub phone: Option<String>,
    pub mobile: Option<String>,
    pub email: Option<String>,
    pub tax_id: Option<String>,
    pub street: Option<String>,
    pub city: Option<String>,
    pub country: Option<String>,
    pub industry: Option<String>,
    pub customer_type: Option<String>,
    /// Directory record this lead is already linked to, if any. Used
    /// to self-exclude during candidate lookups.
    pub linked_customer: Option<CustomerId>,
    pub owner: Option<UserId>,
    pub team: Option<TeamId>,
    /// Display name of the current team, for team-conditioned rules.
    pub team_name: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Canonical identifiers derived from a lead's raw contact fields.
///
/// These are a pure function of the raw fields: they are recomputed on
/// every evaluation and never edited independently.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedIdentifiers {
    pub phone: Option<String>,
    pub email: Option<String>,
    pub tax_id: Option<String>,
}

impl NormalizedIdentifiers {
    pub fn from_lead(lead: &Lead) -> Self {
        // Mobile takes precedence over the landline field.
        let phone_source = lead.mobile.as_deref().or(lead.phone.as_deref());
        Self {
            phone: normalize_phone(phone_source),
            email: normalize_email(lead.email.as_deref()),
            tax_id: normalize_tax_id(lead.tax_id.as_deref()),
        }
    }

    /// A lead is processable when at least one identifier survived
    /// normalization.
    pub fn any_present(&self) -> bool {
        self.phone.is_some() || self.email.is_some() || self.tax_id.is_some()
    }

    /// Labels of the present identifiers, for audit payloads.
    pub fn present_labels(&self) -> Vec<&'static str> {
        let mut labels = Vec::new();
        if self.tax_id.is_some() {
            labels.push("tax_id");
        }
        if self.phone.is_some() {
            labels.push("phone");
        }
        if self.email.is_some() {
            labels.push("email");
        }
        labels
    }
}
