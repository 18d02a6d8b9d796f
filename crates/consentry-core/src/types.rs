use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

// ---------------------------------------------------------------------------
// Timestamp — canonical time representation (seconds + nanoseconds)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp {
    pub seconds_since_epoch: u64,
    pub nanoseconds: u32,
}

impl Timestamp {
    pub fn now() -> Self {
        let now = chrono::Utc::now();
        Self {
            seconds_since_epoch: now.timestamp() as u64,
            nanoseconds: now.timestamp_subsec_nanos(),
        }
    }

    pub fn from_seconds(seconds: u64) -> Self {
        Self {
            seconds_since_epoch: seconds,
            nanoseconds: 0,
        }
    }

    pub fn to_rfc3339(&self) -> String {
        let dt =
            chrono::DateTime::from_timestamp(self.seconds_since_epoch as i64, self.nanoseconds);
        dt.map(|d| d.to_rfc3339())
            .unwrap_or_else(|| "invalid".to_string())
    }

    /// This timestamp shifted forward by whole days.
    pub fn plus_days(&self, days: u32) -> Self {
        Self {
            seconds_since_epoch: self.seconds_since_epoch + u64::from(days) * 86_400,
            nanoseconds: self.nanoseconds,
        }
    }

    pub fn plus_seconds(&self, seconds: u64) -> Self {
        Self {
            seconds_since_epoch: self.seconds_since_epoch + seconds,
            nanoseconds: self.nanoseconds,
        }
    }

    pub fn minus_seconds(&self, seconds: u64) -> Self {
        Self {
            seconds_since_epoch: self.seconds_since_epoch.saturating_sub(seconds),
            nanoseconds: self.nanoseconds,
        }
    }

    pub fn is_past(&self) -> bool {
        *self < Self::now()
    }
}

impl From<chrono::DateTime<chrono::Utc>> for Timestamp {
    fn from(dt: chrono::DateTime<chrono::Utc>) -> Self {
        Self {
            seconds_since_epoch: dt.timestamp() as u64,
            nanoseconds: dt.timestamp_subsec_nanos(),
        }
    }
}

// ---------------------------------------------------------------------------
// Typed identifiers — prevent stringly-typed confusion
// ---------------------------------------------------------------------------

macro_rules! define_id {
    ($name:ident, $doc:expr) => {
        #[doc = $doc]
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }
    };
}

define_id!(StudentId, "Unique identifier for a student (data subject).");
define_id!(ServiceId, "Unique identifier for a registered third-party service.");
define_id!(RequestId, "Unique identifier for a consent request.");
define_id!(GrantId, "Unique identifier for a consent grant.");
define_id!(AuditEntryId, "Unique identifier for an audit trail entry.");

// ---------------------------------------------------------------------------
// RiskCategory — coarse risk classification of a registered service
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RiskCategory {
    Low,
    Medium,
    High,
    Critical,
}

impl fmt::Display for RiskCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RiskCategory::Low => write!(f, "LOW"),
            RiskCategory::Medium => write!(f, "MEDIUM"),
            RiskCategory::High => write!(f, "HIGH"),
            RiskCategory::Critical => write!(f, "CRITICAL"),
        }
    }
}

impl std::str::FromStr for RiskCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "LOW" => Ok(RiskCategory::Low),
            "MEDIUM" => Ok(RiskCategory::Medium),
            "HIGH" => Ok(RiskCategory::High),
            "CRITICAL" => Ok(RiskCategory::Critical),
            other => Err(format!("unknown risk category: {}", other)),
        }
    }
}

// ---------------------------------------------------------------------------
// FieldCategory — domain grouping of a data field
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FieldCategory {
    Contact,
    Academic,
    Financial,
    Personal,
    Identity,
    Behavioral,
}

impl fmt::Display for FieldCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldCategory::Contact => write!(f, "CONTACT"),
            FieldCategory::Academic => write!(f, "ACADEMIC"),
            FieldCategory::Financial => write!(f, "FINANCIAL"),
            FieldCategory::Personal => write!(f, "PERSONAL"),
            FieldCategory::Identity => write!(f, "IDENTITY"),
            FieldCategory::Behavioral => write!(f, "BEHAVIORAL"),
        }
    }
}

// ---------------------------------------------------------------------------
// Service — a registered third-party data consumer
// ---------------------------------------------------------------------------

/// A registered third-party service. Immutable once created except the
/// activation toggle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Service {
    pub id: ServiceId,
    pub name: String,
    pub description: Option<String>,
    pub risk_category: RiskCategory,
    pub active: bool,
    pub created_at: Timestamp,
}

// ---------------------------------------------------------------------------
// DataField — static reference data describing a named attribute
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataField {
    pub name: String,
    pub label: String,
    pub category: FieldCategory,
    /// Sensitivity weight on a 0-100 scale.
    pub sensitivity: u8,
}

impl DataField {
    pub fn new(
        name: impl Into<String>,
        label: impl Into<String>,
        category: FieldCategory,
        sensitivity: u8,
    ) -> Self {
        Self {
            name: name.into(),
            label: label.into(),
            category,
            sensitivity: sensitivity.min(100),
        }
    }
}

/// The built-in field catalog. Callers may request fields outside this set;
/// unknown fields carry a configured default sensitivity.
pub fn default_field_catalog() -> Vec<DataField> {
    vec![
        DataField::new("email", "Email Address", FieldCategory::Contact, 30),
        DataField::new("phone", "Phone Number", FieldCategory::Contact, 40),
        DataField::new("address", "Home Address", FieldCategory::Contact, 55),
        DataField::new("gpa", "Grade Point Average", FieldCategory::Academic, 45),
        DataField::new("transcript", "Academic Transcript", FieldCategory::Academic, 60),
        DataField::new("enrollment_status", "Enrollment Status", FieldCategory::Academic, 25),
        DataField::new("financial_aid", "Financial Aid Details", FieldCategory::Financial, 80),
        DataField::new("tuition_balance", "Tuition Balance", FieldCategory::Financial, 75),
        DataField::new("date_of_birth", "Date of Birth", FieldCategory::Personal, 65),
        DataField::new("ssn", "Social Security Number", FieldCategory::Identity, 100),
        DataField::new("student_id_number", "Student ID Number", FieldCategory::Identity, 70),
        DataField::new("attendance", "Attendance Records", FieldCategory::Behavioral, 35),
        DataField::new("disciplinary_record", "Disciplinary Record", FieldCategory::Behavioral, 85),
    ]
}

// ---------------------------------------------------------------------------
// ConsentRequest — a service's one-shot request for field access
// ---------------------------------------------------------------------------

/// Status of a consent request. A request is a one-shot historical record:
/// it is answered exactly once and never mutated again. Expiry and revocation
/// are states of the grant it spawned, not of the request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "UPPERCASE")]
pub enum RequestStatus {
    Pending,
    Approved {
        approved_duration_days: u32,
        responded_at: Timestamp,
    },
    Denied {
        denied_fields: Vec<String>,
        responded_at: Timestamp,
    },
}

impl RequestStatus {
    pub fn is_pending(&self) -> bool {
        matches!(self, RequestStatus::Pending)
    }

    pub fn label(&self) -> &'static str {
        match self {
            RequestStatus::Pending => "PENDING",
            RequestStatus::Approved { .. } => "APPROVED",
            RequestStatus::Denied { .. } => "DENIED",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsentRequest {
    pub id: RequestId,
    pub student_id: StudentId,
    pub service_id: ServiceId,
    /// De-duplicated, order-independent set of requested field names.
    pub requested_fields: BTreeSet<String>,
    pub purpose: String,
    pub requested_duration_days: u32,
    /// Overall risk score (0-100) computed at creation time.
    pub risk_score: u8,
    pub status: RequestStatus,
    pub created_at: Timestamp,
}

// ---------------------------------------------------------------------------
// ConsentGrant — a time-bounded, field-scoped authorization
// ---------------------------------------------------------------------------

/// Lifecycle state of a grant. Transitions are enforced centrally; there is
/// no path out of Revoked, Superseded, or Expired.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "UPPERCASE")]
pub enum GrantState {
    Active,
    /// Replaced by a newer grant for the same (student, service) pair.
    Superseded { at: Timestamp },
    /// Flipped by the expiry sweep once `expires_at` has passed. A grant past
    /// its `expires_at` but not yet swept is still stored as Active; callers
    /// classify it at query time.
    Expired { noted_at: Timestamp },
    Revoked { at: Timestamp, reason: Option<String> },
}

impl GrantState {
    pub fn is_active(&self) -> bool {
        matches!(self, GrantState::Active)
    }

    pub fn is_revoked(&self) -> bool {
        matches!(self, GrantState::Revoked { .. })
    }

    pub fn label(&self) -> &'static str {
        match self {
            GrantState::Active => "ACTIVE",
            GrantState::Superseded { .. } => "SUPERSEDED",
            GrantState::Expired { .. } => "EXPIRED",
            GrantState::Revoked { .. } => "REVOKED",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsentGrant {
    pub id: GrantId,
    pub student_id: StudentId,
    pub service_id: ServiceId,
    /// The request this grant was issued from (1:1 origin, reference only).
    pub request_id: RequestId,
    pub approved_fields: BTreeSet<String>,
    pub issued_at: Timestamp,
    pub expires_at: Timestamp,
    pub state: GrantState,
}

// ---------------------------------------------------------------------------
// Audit model — append-only record of every lifecycle/access decision
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditAction {
    RequestCreated,
    RequestApproved,
    RequestDenied,
    GrantIssued,
    GrantSuperseded,
    GrantRevoked,
    GrantExpired,
    AccessChecked,
    AccessDenied,
    ServiceRegistered,
    ServiceActivationChanged,
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AuditAction::RequestCreated => "REQUEST_CREATED",
            AuditAction::RequestApproved => "REQUEST_APPROVED",
            AuditAction::RequestDenied => "REQUEST_DENIED",
            AuditAction::GrantIssued => "GRANT_ISSUED",
            AuditAction::GrantSuperseded => "GRANT_SUPERSEDED",
            AuditAction::GrantRevoked => "GRANT_REVOKED",
            AuditAction::GrantExpired => "GRANT_EXPIRED",
            AuditAction::AccessChecked => "ACCESS_CHECKED",
            AuditAction::AccessDenied => "ACCESS_DENIED",
            AuditAction::ServiceRegistered => "SERVICE_REGISTERED",
            AuditAction::ServiceActivationChanged => "SERVICE_ACTIVATION_CHANGED",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: AuditEntryId,
    pub action: AuditAction,
    pub student_id: StudentId,
    pub service_id: Option<ServiceId>,
    pub request_id: Option<RequestId>,
    pub grant_id: Option<GrantId>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub metadata: serde_json::Value,
    pub timestamp: Timestamp,
}

// ---------------------------------------------------------------------------
// RiskEvent — queued signal for the external risk-scoring collaborator
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RiskEventKind {
    ConsentApproved,
    ConsentDenied,
    ConsentRevoked,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskEvent {
    pub kind: RiskEventKind,
    pub student_id: StudentId,
    pub service_id: ServiceId,
    pub request_id: Option<RequestId>,
    pub risk_score: u8,
    pub occurred_at: Timestamp,
}

// ---------------------------------------------------------------------------
// Pagination — page/limit with totals computed from persisted counts
// ---------------------------------------------------------------------------

pub const MAX_PAGE_LIMIT: u32 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRequest {
    /// 1-based page index.
    pub page: u32,
    /// Items per page, 1..=100.
    pub limit: u32,
}

impl PageRequest {
    pub fn new(page: u32, limit: u32) -> Self {
        Self { page, limit }
    }

    pub fn offset(&self) -> u64 {
        u64::from(self.page.saturating_sub(1)) * u64::from(self.limit)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.page < 1 {
            return Err("page must be >= 1".to_string());
        }
        if self.limit < 1 || self.limit > MAX_PAGE_LIMIT {
            return Err(format!("limit must be in 1..={}", MAX_PAGE_LIMIT));
        }
        Ok(())
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self { page: 1, limit: 20 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub page: u32,
    pub limit: u32,
    pub total: u64,
    pub has_more: bool,
}

impl<T> Page<T> {
    pub fn from_items(items: Vec<T>, request: &PageRequest, total: u64) -> Self {
        let has_more = request.offset() + (items.len() as u64) < total;
        Self {
            items,
            page: request.page,
            limit: request.limit,
            total,
            has_more,
        }
    }
}

/// Filter for request-history listings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HistoryFilter {
    /// Match on the request's status label (PENDING/APPROVED/DENIED).
    pub status: Option<String>,
    pub service_id: Option<ServiceId>,
    pub from: Option<Timestamp>,
    pub until: Option<Timestamp>,
}
