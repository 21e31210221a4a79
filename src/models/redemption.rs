use chrono::{DateTime, Duration, NaiveDate, Utc};
use rocket::serde::{Deserialize, Serialize};
use schemars::JsonSchema;
use std::collections::BTreeMap;
use uuid::Uuid;
use validator::Validate;

pub const MAX_HISTORY_LIMIT: i64 = 100;

#[derive(Serialize, Deserialize, Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum RedemptionStatus {
    Early,
    Present,
    Late,
    Absent,
}

impl RedemptionStatus {
    pub fn to_db(self) -> &'static str {
        match self {
            RedemptionStatus::Early => "early",
            RedemptionStatus::Present => "present",
            RedemptionStatus::Late => "late",
            RedemptionStatus::Absent => "absent",
        }
    }

    pub fn from_db(value: &str) -> Option<Self> {
        match value {
            "early" => Some(RedemptionStatus::Early),
            "present" => Some(RedemptionStatus::Present),
            "late" => Some(RedemptionStatus::Late),
            "absent" => Some(RedemptionStatus::Absent),
            _ => None,
        }
    }

    /// Classify an observation against a session window `[starts_at, ends_at]`.
    ///
    /// Both boundaries of the on-time window are inclusive: exactly `starts_at + grace`
    /// is still present, exactly `ends_at` is still late. Anything after `ends_at` is
    /// absent even when the grace period reaches past the end of the session.
    pub fn classify(starts_at: DateTime<Utc>, ends_at: DateTime<Utc>, grace: Duration, observed_at: DateTime<Utc>) -> Self {
        if observed_at < starts_at {
            RedemptionStatus::Early
        } else if observed_at > ends_at {
            RedemptionStatus::Absent
        } else if observed_at <= starts_at + grace {
            RedemptionStatus::Present
        } else {
            RedemptionStatus::Late
        }
    }
}

/// Proof that a subject consumed a credential. Immutable once written.
#[derive(Debug, Clone, PartialEq)]
pub struct RedemptionRecord {
    pub id: Uuid,
    pub session_id: Uuid,
    pub subject_id: Uuid,
    pub credential_id: String,
    /// Calendar day the exactly-once key is scoped to.
    pub day: NaiveDate,
    pub redeemed_at: DateTime<Utc>,
    pub status: RedemptionStatus,
    pub location_claim: Option<String>,
}

/// Outcome of the atomic conditional insert.
#[derive(Debug, Clone, PartialEq)]
pub enum RedemptionInsert {
    Inserted(RedemptionRecord),
    /// A record already exists for `(session_id, subject_id, day)`.
    Duplicate,
    /// The credential stopped being usable between validation and insert.
    Rejected(crate::models::credential::InvalidReason),
}

#[derive(Debug, Clone, Default)]
pub struct RedemptionFilter {
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
    pub status: Option<RedemptionStatus>,
    pub limit: i64,
}

impl RedemptionFilter {
    pub fn effective_limit(&self) -> i64 {
        if self.limit <= 0 { MAX_HISTORY_LIMIT } else { self.limit.min(MAX_HISTORY_LIMIT) }
    }

    pub fn matches(&self, record: &RedemptionRecord) -> bool {
        self.from.is_none_or(|from| record.day >= from)
            && self.to.is_none_or(|to| record.day <= to)
            && self.status.is_none_or(|status| record.status == status)
    }
}

#[derive(Deserialize, Debug, Validate, JsonSchema)]
pub struct RedeemRequest {
    #[validate(length(equal = 64))]
    pub credential_id: String,
    pub observed_at: Option<DateTime<Utc>>,
    #[validate(length(max = 200))]
    pub location_claim: Option<String>,
}

#[derive(Serialize, Debug, JsonSchema)]
pub struct RedemptionResponse {
    pub id: Uuid,
    pub session_id: Uuid,
    pub subject_id: Uuid,
    pub credential_id: String,
    pub day: NaiveDate,
    pub redeemed_at: DateTime<Utc>,
    pub status: RedemptionStatus,
    pub location_claim: Option<String>,
}

impl From<&RedemptionRecord> for RedemptionResponse {
    fn from(record: &RedemptionRecord) -> Self {
        RedemptionResponse {
            id: record.id,
            session_id: record.session_id,
            subject_id: record.subject_id,
            credential_id: record.credential_id.clone(),
            day: record.day,
            redeemed_at: record.redeemed_at,
            status: record.status,
            location_claim: record.location_claim.clone(),
        }
    }
}

#[derive(Serialize, Debug, Default, PartialEq, JsonSchema)]
pub struct RedemptionStats {
    pub total: i64,
    pub by_status: BTreeMap<RedemptionStatus, i64>,
}

impl RedemptionStats {
    pub fn from_counts(counts: &[(RedemptionStatus, i64)]) -> Self {
        let mut stats = RedemptionStats::default();
        for (status, count) in counts {
            *stats.by_status.entry(*status).or_default() += count;
            stats.total += count;
        }
        stats
    }
}
