//! Unified types for all Rollcall entities.
//!
//! These types are the single source of truth. All interfaces (CLI, dispatch,
//! worker, HTTP contracts) should use these types.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

// ============================================================================
// Job identity
// ============================================================================

/// Opaque identifier for an import job.
///
/// Backed by a UUIDv4 so ids are globally unique and unguessable; they are
/// exposed verbatim on the HTTP surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    /// Mint a fresh random id.
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    pub const fn from_uuid(value: Uuid) -> Self {
        Self(value)
    }

    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for JobId {
    type Err = JobIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim())
            .map(Self)
            .map_err(|_| JobIdError::Parse(s.to_string()))
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum JobIdError {
    #[error("invalid job id: {0}")]
    Parse(String),
}

// ============================================================================
// Statuses
// ============================================================================

/// Status of an import job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "processing" => Some(Self::Processing),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    /// Terminal jobs are never picked up again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Outcome recorded in the idempotency ledger for a processed row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LedgerStatus {
    /// Row was validated and its employee persisted.
    Processed,
    /// Row was superseded by a later in-file duplicate.
    Skipped,
    /// Row was rejected (validation, format, business rule).
    Error,
}

impl LedgerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Processed => "processed",
            Self::Skipped => "skipped",
            Self::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "processed" => Some(Self::Processed),
            "skipped" => Some(Self::Skipped),
            "error" => Some(Self::Error),
            _ => None,
        }
    }
}

impl fmt::Display for LedgerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Event kinds in the resumption observability log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResumptionEventType {
    Attempt,
    Success,
    Failure,
    IntegrityCheck,
    LockRenewal,
}

impl ResumptionEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Attempt => "attempt",
            Self::Success => "success",
            Self::Failure => "failure",
            Self::IntegrityCheck => "integrity_check",
            Self::LockRenewal => "lock_renewal",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "attempt" => Some(Self::Attempt),
            "success" => Some(Self::Success),
            "failure" => Some(Self::Failure),
            "integrity_check" => Some(Self::IntegrityCheck),
            "lock_renewal" => Some(Self::LockRenewal),
            _ => None,
        }
    }
}

// ============================================================================
// Queue classes
// ============================================================================

/// Size class a job is routed to, based on the uploader's reported row count.
///
/// The worker recomputes the exact count while streaming; the class only
/// affects scheduling, never semantics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueClass {
    Small,
    Medium,
    Large,
}

impl QueueClass {
    pub fn for_row_count(rows: u64) -> Self {
        if rows < 1_000 {
            Self::Small
        } else if rows < 10_000 {
            Self::Medium
        } else {
            Self::Large
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Small => "small",
            Self::Medium => "medium",
            Self::Large => "large",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "small" => Some(Self::Small),
            "medium" => Some(Self::Medium),
            "large" => Some(Self::Large),
            _ => None,
        }
    }
}

impl fmt::Display for QueueClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// Fixed code sets
// ============================================================================

/// Supported payout currencies. Process-wide immutable configuration;
/// extending the set requires a release.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Currency {
    KES,
    USD,
    ZAR,
    NGN,
    GHS,
    UGX,
    RWF,
    TZS,
}

impl Currency {
    pub const ALL: [Currency; 8] = [
        Self::KES,
        Self::USD,
        Self::ZAR,
        Self::NGN,
        Self::GHS,
        Self::UGX,
        Self::RWF,
        Self::TZS,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::KES => "KES",
            Self::USD => "USD",
            Self::ZAR => "ZAR",
            Self::NGN => "NGN",
            Self::GHS => "GHS",
            Self::UGX => "UGX",
            Self::RWF => "RWF",
            Self::TZS => "TZS",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_uppercase().as_str() {
            "KES" => Some(Self::KES),
            "USD" => Some(Self::USD),
            "ZAR" => Some(Self::ZAR),
            "NGN" => Some(Self::NGN),
            "GHS" => Some(Self::GHS),
            "UGX" => Some(Self::UGX),
            "RWF" => Some(Self::RWF),
            "TZS" => Some(Self::TZS),
            _ => None,
        }
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Supported ISO country codes. Same immutability rules as [`Currency`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CountryCode {
    KE,
    NG,
    GH,
    UG,
    ZA,
    TZ,
    RW,
}

impl CountryCode {
    pub const ALL: [CountryCode; 7] = [
        Self::KE,
        Self::NG,
        Self::GH,
        Self::UG,
        Self::ZA,
        Self::TZ,
        Self::RW,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::KE => "KE",
            Self::NG => "NG",
            Self::GH => "GH",
            Self::UG => "UG",
            Self::ZA => "ZA",
            Self::TZ => "TZ",
            Self::RW => "RW",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_uppercase().as_str() {
            "KE" => Some(Self::KE),
            "NG" => Some(Self::NG),
            "GH" => Some(Self::GH),
            "UG" => Some(Self::UG),
            "ZA" => Some(Self::ZA),
            "TZ" => Some(Self::TZ),
            "RW" => Some(Self::RW),
            _ => None,
        }
    }
}

impl fmt::Display for CountryCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// Rows and records
// ============================================================================

/// A raw row as produced by a streaming reader, before validation.
///
/// `row_number` is 1-based and excludes the header line. `values` are
/// positional, aligned with the file's header columns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawRow {
    pub row_number: u64,
    pub values: Vec<String>,
}

impl RawRow {
    pub fn new(row_number: u64, values: Vec<String>) -> Self {
        Self { row_number, values }
    }

    /// Capture the row for error reporting.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({ "row": self.row_number, "values": self.values })
    }
}

/// A validated, normalized employee row ready for the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmployeeRecord {
    pub employee_number: String,
    pub first_name: String,
    pub last_name: String,
    /// Stored as entered; uniqueness is checked against [`Self::email_lower`].
    pub email: String,
    pub department: Option<String>,
    pub salary: Option<Decimal>,
    pub currency: Option<Currency>,
    pub country_code: Option<CountryCode>,
    pub start_date: Option<NaiveDate>,
}

impl EmployeeRecord {
    /// Case-folded email used for comparison and uniqueness.
    pub fn email_lower(&self) -> String {
        self.email.to_lowercase()
    }
}

// ============================================================================
// File fingerprint
// ============================================================================

/// Identity of the file contents at upload time.
///
/// Resumption requires an exact match on all three fields; the hash is
/// sha-256 in lowercase hex and the mtime is UTC truncated to the second.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileFingerprint {
    pub file_size: u64,
    pub file_hash: String,
    pub file_last_modified: DateTime<Utc>,
}

impl FileFingerprint {
    /// Names of the fields that differ from `other`, in a stable order.
    /// Empty means the fingerprints match exactly.
    pub fn diff(&self, other: &FileFingerprint) -> Vec<&'static str> {
        let mut fields = Vec::new();
        if self.file_size != other.file_size {
            fields.push("file_size");
        }
        if self.file_hash != other.file_hash {
            fields.push("file_hash");
        }
        if self.file_last_modified != other.file_last_modified {
            fields.push("file_last_modified");
        }
        fields
    }
}

// ============================================================================
// Error taxonomy
// ============================================================================

/// Wire-level error category, used for filtering and histograms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorType {
    Validation,
    Duplicate,
    Format,
    BusinessRule,
    System,
}

impl ErrorType {
    pub const ALL: [ErrorType; 5] = [
        Self::Validation,
        Self::Duplicate,
        Self::Format,
        Self::BusinessRule,
        Self::System,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Validation => "validation",
            Self::Duplicate => "duplicate",
            Self::Format => "format",
            Self::BusinessRule => "business_rule",
            Self::System => "system",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "validation" => Some(Self::Validation),
            "duplicate" => Some(Self::Duplicate),
            "format" => Some(Self::Format),
            "business_rule" => Some(Self::BusinessRule),
            "system" => Some(Self::System),
            _ => None,
        }
    }
}

impl fmt::Display for ErrorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Which key collided when a row is flagged as an in-file duplicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicateKey {
    EmployeeNumber,
    Email,
}

impl DuplicateKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::EmployeeNumber => "employee_number",
            Self::Email => "email",
        }
    }
}

/// A categorized row error. The variant carries the detail; [`Self::error_type`]
/// maps it onto the wire taxonomy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "category", rename_all = "snake_case")]
pub enum ErrorCategory {
    Validation { field: String, message: String },
    Duplicate { key: DuplicateKey, superseded_by_row: u64 },
    Format { message: String },
    BusinessRule { message: String },
    System { message: String },
}

impl ErrorCategory {
    pub fn error_type(&self) -> ErrorType {
        match self {
            Self::Validation { .. } => ErrorType::Validation,
            Self::Duplicate { .. } => ErrorType::Duplicate,
            Self::Format { .. } => ErrorType::Format,
            Self::BusinessRule { .. } => ErrorType::BusinessRule,
            Self::System { .. } => ErrorType::System,
        }
    }

    /// Human-readable message stored alongside the category.
    pub fn message(&self) -> String {
        match self {
            Self::Validation { field, message } => format!("{field}: {message}"),
            Self::Duplicate {
                key,
                superseded_by_row,
            } => format!(
                "duplicate {} superseded by row {}",
                key.as_str(),
                superseded_by_row
            ),
            Self::Format { message }
            | Self::BusinessRule { message }
            | Self::System { message } => message.clone(),
        }
    }
}
