//! Externally configured assignment rules and the interpreter over them.
//!
//! Rule evaluation is a pure function over `(lead, ordered rules)`: the
//! engine takes a snapshot of the rule list per evaluation, so edits to
//! the stored rules mid-evaluation can never produce a partial match.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::postgres::{PgPool, PgPoolOptions};
use tokio::time::timeout;
use uuid::Uuid;

use crate::error::EngineError;
use crate::lead::{Lead, TeamId, UserId};

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, sqlx::Type,
)]
#[sqlx(transparent)]
pub struct RuleId(pub Uuid);

impl RuleId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for RuleId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RuleId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// A rule condition: one lead field tested against a configured value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum RuleCondition {
    Industry(String),
    Region(String),
    CustomerType(String),
    Country(String),
    Team(String),
}

impl RuleCondition {
    /// Whether this condition matches the lead. Region is a
    /// case-insensitive substring test against the city; the others
    /// are equality tests on their fields.
    pub fn matches(&self, lead: &Lead) -> bool {
        match self {
            RuleCondition::Industry(value) => lead.industry.as_deref() == Some(value.as_str()),
            RuleCondition::Region(value) => lead
                .city
                .as_deref()
                .is_some_and(|city| city.to_lowercase().contains(&value.to_lowercase())),
            RuleCondition::CustomerType(value) => {
                lead.customer_type.as_deref() == Some(value.to_lowercase().as_str())
            }
            RuleCondition::Country(value) => lead.country.as_deref() == Some(value.as_str()),
            RuleCondition::Team(value) => {
                lead.team_name.as_deref() == Some(value.as_str())
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssignmentRule {
    pub id: RuleId,
    pub name: String,
    /// Ascending evaluation priority; lower sequences win. Equal
    /// sequences fall back to rule id order, which is stable.
    pub sequence: i32,
    pub active: bool,
    pub condition: RuleCondition,
    pub assign_to_user: UserId,
    pub assign_to_team: Option<TeamId>,
}

/// First active rule matching the lead, in ascending `(sequence, id)`
/// order. Pure: no hidden state, no storage access.
pub fn first_matching_rule<'a>(
    lead: &Lead,
    rules: &'a [AssignmentRule],
) -> Option<&'a AssignmentRule> {
    let mut ordered: Vec<&AssignmentRule> = rules.iter().filter(|r| r.active).collect();
    ordered.sort_by_key(|r| (r.sequence, r.id));
    ordered.into_iter().find(|rule| rule.condition.matches(lead))
}

/// Source of configured assignment rules.
#[async_trait]
pub trait RuleSource {
    /// Active rules ordered by ascending sequence (ties by id).
    async fn list_active_rules_ordered(&self) -> Result<Vec<AssignmentRule>, EngineError>;
}

/// Rule store backed by the host's Postgres database.
pub struct PgRuleSource {
    pool: PgPool,
    query_timeout: Duration,
}

#[derive(sqlx::FromRow)]
struct RuleRow {
    id: RuleId,
    name: String,
    sequence: i32,
    active: bool,
    condition_type: String,
    condition_value: String,
    assign_to_user_id: UserId,
    assign_to_team_id: Option<TeamId>,
}

impl RuleRow {
    fn into_rule(self) -> Result<AssignmentRule, EngineError> {
        let condition = match self.condition_type.as_str() {
            "industry" => RuleCondition::Industry(self.condition_value),
            "region" => RuleCondition::Region(self.condition_value),
            "customer_type" => RuleCondition::CustomerType(self.condition_value),
            "country" => RuleCondition::Country(self.condition_value),
            "team" => RuleCondition::Team(self.condition_value),
            other => {
                return Err(EngineError::DataParsingError(format!(
                    "unknown rule condition type {other:?}"
                )))
            }
        };
        Ok(AssignmentRule {
            id: self.id,
            name: self.name,
            sequence: self.sequence,
            active: self.active,
            condition,
            assign_to_user: self.assign_to_user_id,
            assign_to_team: self.assign_to_team_id,
        })
    }
}

impl PgRuleSource {
    pub fn new(database_url: &str, query_timeout: Duration) -> Result<Self, EngineError> {
        let pool = PgPoolOptions::new()
            .connect_lazy(database_url)
            .map_err(|error| EngineError::ConnectionError { error })?;

        Ok(Self {
            pool,
            query_timeout,
        })
    }

    pub fn from_pool(pool: PgPool, query_timeout: Duration) -> Self {
        Self {
            pool,
            query_timeout,
        }
    }
}

#[async_trait]
impl RuleSource for PgRuleSource {
    async fn list_active_rules_ordered(&self) -> Result<Vec<AssignmentRule>, EngineError> {
        let sql = r#"
SELECT id, name, sequence, active, condition_type, condition_value,
       assign_to_user_id, assign_to_team_id
FROM assignment_rules
WHERE active
ORDER BY sequence ASC, id ASC
"#;
        let fut = sqlx::query_as::<_, RuleRow>(sql).fetch_all(&self.pool);
        let rows = match timeout(self.query_timeout, fut).await {
            Ok(Ok(rows)) => rows,
            Ok(Err(error)) => {
                return Err(EngineError::QueryError {
                    command: "list_active_rules_ordered".to_owned(),
                    error,
                })
            }
            Err(_) => {
                return Err(EngineError::QueryTimeout {
                    command: "list_active_rules_ordered".to_owned(),
                    timeout_ms: self.query_timeout.as_millis() as u64,
                })
            }
        };
        rows.into_iter().map(RuleRow::into_rule).collect()
    }
}

/// In-memory rule source for tests and local development. Listings
/// can be toggled to fail to exercise the degraded no-rules path.
#[derive(Default)]
pub struct MemoryRuleSource {
    rules: Mutex<Vec<AssignmentRule>>,
    fail_listings: AtomicBool,
}

impl MemoryRuleSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_rule(&self, rule: AssignmentRule) {
        self.rules.lock().unwrap().push(rule);
    }

    pub fn fail_listings(&self, fail: bool) {
        self.fail_listings.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl RuleSource for MemoryRuleSource {
    async fn list_active_rules_ordered(&self) -> Result<Vec<AssignmentRule>, EngineError> {
        if self.fail_listings.load(Ordering::SeqCst) {
            return Err(EngineError::QueryTimeout {
                command: "list_active_rules_ordered".to_owned(),
                timeout_ms: 0,
            });
        }
        let mut rules: Vec<AssignmentRule> = self
            .rules
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.active)
            .cloned()
            .collect();
        rules.sort_by_key(|r| (r.sequence, r.id));
        Ok(rules)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::lead::LeadId;

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

    fn rule(sequence: i32, condition: RuleCondition) -> AssignmentRule {
        AssignmentRule {
            id: RuleId::new(),
            name: format!("rule-{sequence}"),
            sequence,
            active: true,
            condition,
            assign_to_user: UserId::new(),
            assign_to_team: None,
        }
    }

    #[test]
    fn test_lower_sequence_wins_regardless_of_insertion_order() {
        let mut lead = lead();
        lead.city = Some("Hanoi".to_string());

        let second = rule(20, RuleCondition::Region("hanoi".to_string()));
        let first = rule(10, RuleCondition::Region("ha".to_string()));
        let first_id = first.id;

        // Inserted high-sequence first.
        let rules = vec![second, first];
        let winner = first_matching_rule(&lead, &rules).unwrap();
        assert_eq!(winner.id, first_id);
    }

    #[test]
    fn test_equal_sequences_break_ties_by_id() {
        let mut lead = lead();
        lead.country = Some("Vietnam".to_string());

        let mut a = rule(10, RuleCondition::Country("Vietnam".to_string()));
        let mut b = rule(10, RuleCondition::Country("Vietnam".to_string()));
        // Force a known id ordering.
        a.id = RuleId(Uuid::from_u128(1));
        b.id = RuleId(Uuid::from_u128(2));

        let rules = vec![b.clone(), a.clone()];
        assert_eq!(first_matching_rule(&lead, &rules).unwrap().id, a.id);
    }

    #[test]
    fn test_inactive_rules_are_skipped() {
        let mut lead = lead();
        lead.industry = Some("Technology".to_string());

        let mut inactive = rule(1, RuleCondition::Industry("Technology".to_string()));
        inactive.active = false;
        let active = rule(2, RuleCondition::Industry("Technology".to_string()));
        let active_id = active.id;

        let rules = vec![inactive, active];
        assert_eq!(first_matching_rule(&lead, &rules).unwrap().id, active_id);
    }

    #[test]
    fn test_no_matching_rule_yields_none() {
        let lead = lead();
        let rules = vec![rule(1, RuleCondition::Country("Vietnam".to_string()))];
        assert!(first_matching_rule(&lead, &rules).is_none());
    }

    #[test]
    fn test_region_is_case_insensitive_substring() {
        let mut lead = lead();
        lead.city = Some("Ho Chi Minh City".to_string());
        assert!(RuleCondition::Region("ho chi minh".to_string()).matches(&lead));
        assert!(!RuleCondition::Region("Hanoi".to_string()).matches(&lead));
    }

    #[test]
    fn test_customer_type_folds_configured_value() {
        let mut lead = lead();
        lead.customer_type = Some("merchant".to_string());
        assert!(RuleCondition::CustomerType("Merchant".to_string()).matches(&lead));
    }

    #[tokio::test]
    async fn test_memory_source_orders_by_sequence_then_id() {
        let source = MemoryRuleSource::new();
        let mut a = rule(10, RuleCondition::Country("Vietnam".to_string()));
        a.id = RuleId(Uuid::from_u128(2));
        let mut b = rule(10, RuleCondition::Country("Vietnam".to_string()));
        b.id = RuleId(Uuid::from_u128(1));
        let c = rule(5, RuleCondition::Country("Vietnam".to_string()));
        let c_id = c.id;

        source.insert_rule(a.clone());
        source.insert_rule(b.clone());
        source.insert_rule(c);

        let listed = source.list_active_rules_ordered().await.unwrap();
        assert_eq!(listed[0].id, c_id);
        assert_eq!(listed[1].id, b.id);
        assert_eq!(listed[2].id, a.id);
    }
}
