use chrono::{DateTime, Utc};
use diesel::deserialize::{self, FromSql, FromSqlRow};
use diesel::expression::AsExpression;
use diesel::pg::{Pg, PgValue};
use diesel::prelude::*;
use diesel::serialize::{self, IsNull, Output, ToSql};
use diesel::sql_types::SqlType;
use serde::{Deserialize, Serialize};
use std::io::Write;
use uuid::Uuid;

// SQL type definitions for custom enums
// Note: These types use snake_case to match PostgreSQL type names
#[allow(non_camel_case_types)]
#[derive(SqlType, diesel::query_builder::QueryId, Debug, Clone, Copy)]
#[diesel(postgres_type(name = "job_status"))]
pub struct Job_status;

#[allow(non_camel_case_types)]
#[derive(SqlType, diesel::query_builder::QueryId, Debug, Clone, Copy)]
#[diesel(postgres_type(name = "job_kind"))]
pub struct Job_kind;

/// Status of a job in the system.
///
/// Lifecycle: `Pending → Crawling → Classifying → Uploading → Completed`,
/// with `Cancelled` and `Failed` as off-path terminal states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsExpression, FromSqlRow)]
#[serde(rename_all = "lowercase")]
#[diesel(sql_type = Job_status)]
pub enum JobStatus {
    /// Created by the API, waiting for supervisor admission
    Pending,
    /// Worker subprocess running the crawl (or parts-list ingest) phase
    Crawling,
    /// Classifying discovered PDFs
    Classifying,
    /// Transferring allow-listed PDFs to the document store
    Uploading,
    /// All phases finished
    Completed,
    /// Worker exited non-zero or was lost
    Failed,
    /// Cancellation requested and the worker has been reaped
    Cancelled,
}

impl JobStatus {
    /// True for Completed, Failed, or Cancelled. Terminal jobs are never
    /// picked up by the supervisor again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Crawling => "crawling",
            Self::Classifying => "classifying",
            Self::Uploading => "uploading",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Every non-terminal state, in admission order.
    pub fn active_states() -> [JobStatus; 4] {
        [Self::Pending, Self::Crawling, Self::Classifying, Self::Uploading]
    }
}

impl ToSql<Job_status, Pg> for JobStatus {
    fn to_sql<'b>(&'b self, out: &mut Output<'b, '_, Pg>) -> serialize::Result {
        out.write_all(self.as_str().as_bytes())?;
        Ok(IsNull::No)
    }
}

impl FromSql<Job_status, Pg> for JobStatus {
    fn from_sql(bytes: PgValue) -> deserialize::Result<Self> {
        match bytes.as_bytes() {
            b"pending" => Ok(JobStatus::Pending),
            b"crawling" => Ok(JobStatus::Crawling),
            b"classifying" => Ok(JobStatus::Classifying),
            b"uploading" => Ok(JobStatus::Uploading),
            b"completed" => Ok(JobStatus::Completed),
            b"failed" => Ok(JobStatus::Failed),
            b"cancelled" => Ok(JobStatus::Cancelled),
            _ => Err("Unrecognized enum variant".into()),
        }
    }
}

/// Source of a job: a site crawl or a user-provided parts list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsExpression, FromSqlRow)]
#[serde(rename_all = "snake_case")]
#[diesel(sql_type = Job_kind)]
pub enum JobKind {
    Crawl,
    BulkUpload,
}

impl ToSql<Job_kind, Pg> for JobKind {
    fn to_sql<'b>(&'b self, out: &mut Output<'b, '_, Pg>) -> serialize::Result {
        let s = match self {
            JobKind::Crawl => "crawl",
            JobKind::BulkUpload => "bulk_upload",
        };
        out.write_all(s.as_bytes())?;
        Ok(IsNull::No)
    }
}

impl FromSql<Job_kind, Pg> for JobKind {
    fn from_sql(bytes: PgValue) -> deserialize::Result<Self> {
        match bytes.as_bytes() {
            b"crawl" => Ok(JobKind::Crawl),
            b"bulk_upload" => Ok(JobKind::BulkUpload),
            _ => Err("Unrecognized enum variant".into()),
        }
    }
}

/// Document type vocabulary produced by the classifier.
///
/// Stored as text: the vocabulary is expected to grow and a schema change per
/// label is not worth it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DocumentType {
    ProductDataSheet,
    SpecificationSheet,
    SubmittalSheet,
    TechnicalDataSheet,
    InstallationManual,
    OperationMaintenance,
    EngineeringDiagram,
    Marketing,
    Unknown,
}

impl DocumentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ProductDataSheet => "Product Data Sheet",
            Self::SpecificationSheet => "Specification Sheet",
            Self::SubmittalSheet => "Submittal Sheet",
            Self::TechnicalDataSheet => "Technical Data Sheet",
            Self::InstallationManual => "Installation Manual",
            Self::OperationMaintenance => "Operation & Maintenance",
            Self::EngineeringDiagram => "Engineering Diagram",
            Self::Marketing => "Marketing",
            Self::Unknown => "Unknown",
        }
    }

    /// Parse a label produced by the LLM or stored in the database.
    /// Unrecognized labels map to `Unknown` rather than failing; the model
    /// is a best-effort oracle, not a source of truth.
    pub fn parse(label: &str) -> Self {
        match label.trim() {
            "Product Data Sheet" => Self::ProductDataSheet,
            "Specification Sheet" => Self::SpecificationSheet,
            "Submittal Sheet" => Self::SubmittalSheet,
            "Technical Data Sheet" => Self::TechnicalDataSheet,
            "Installation Manual" => Self::InstallationManual,
            "Operation & Maintenance" => Self::OperationMaintenance,
            "Engineering Diagram" => Self::EngineeringDiagram,
            "Marketing" => Self::Marketing,
            _ => Self::Unknown,
        }
    }

    /// The upload allow-list. Everything else is retained in the discovery
    /// record but never transferred. `Installation Manual` is explicitly
    /// excluded.
    pub fn is_technical(&self) -> bool {
        matches!(
            self,
            Self::ProductDataSheet
                | Self::SpecificationSheet
                | Self::SubmittalSheet
                | Self::TechnicalDataSheet
        )
    }
}

impl std::fmt::Display for DocumentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// jobs table model (database representation)
#[derive(Debug, Clone, Queryable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = crate::schema::jobs)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct Job {
    pub id: Uuid,
    pub kind: JobKind,
    pub manufacturer_name: String,
    pub source: String,
    pub product_lines: Vec<String>,
    pub sharepoint_folder: String,
    pub weekly_recrawl: bool,
    pub status: JobStatus,
    pub pdfs_found: i32,
    pub pdfs_classified: i32,
    pub pdfs_uploaded: i32,
    pub pdfs_failed: i32,
    pub error: Option<String>,
    pub worker_pid: Option<i32>,
    pub worker_log_tail: Option<String>,
    pub cancel_requested: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = crate::schema::jobs)]
pub struct NewJob {
    pub id: Uuid,
    pub kind: JobKind,
    pub manufacturer_name: String,
    pub source: String,
    pub product_lines: Vec<String>,
    pub sharepoint_folder: String,
    pub weekly_recrawl: bool,
    pub status: JobStatus,
}

impl NewJob {
    pub fn crawl(
        manufacturer_name: String,
        domain: String,
        product_lines: Vec<String>,
        sharepoint_folder: String,
        weekly_recrawl: bool,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind: JobKind::Crawl,
            manufacturer_name,
            source: domain,
            product_lines,
            sharepoint_folder,
            weekly_recrawl,
            status: JobStatus::Pending,
        }
    }

    pub fn bulk_upload(
        manufacturer_name: String,
        parts_list_path: String,
        sharepoint_folder: String,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind: JobKind::BulkUpload,
            manufacturer_name,
            source: parts_list_path,
            product_lines: Vec::new(),
            sharepoint_folder,
            weekly_recrawl: false,
            status: JobStatus::Pending,
        }
    }
}

// discovered_pdfs table model
#[derive(Debug, Clone, Queryable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = crate::schema::discovered_pdfs)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct DiscoveredPdf {
    pub id: Uuid,
    pub job_id: Uuid,
    pub source_url: String,
    pub filename: String,
    pub file_size: Option<i64>,
    pub document_type: Option<String>,
    pub is_technical: bool,
    pub classification_reason: Option<String>,
    pub sharepoint_uploaded: bool,
    pub part_number: Option<String>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl DiscoveredPdf {
    pub fn document_type(&self) -> DocumentType {
        self.document_type
            .as_deref()
            .map(DocumentType::parse)
            .unwrap_or(DocumentType::Unknown)
    }
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = crate::schema::discovered_pdfs)]
pub struct NewDiscoveredPdf {
    pub id: Uuid,
    pub job_id: Uuid,
    pub source_url: String,
    pub filename: String,
    pub part_number: Option<String>,
}

impl NewDiscoveredPdf {
    /// A crawl discovery: the filename is the terminal segment of the URL
    /// path, URL-decoded.
    pub fn discovered(job_id: Uuid, source_url: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            job_id,
            source_url: source_url.to_string(),
            filename: filename_from_url(source_url),
            part_number: None,
        }
    }

    /// A parts-list row: falls back to `<part_number>.pdf` when the URL path
    /// does not end in a usable filename.
    pub fn from_parts_row(job_id: Uuid, part_number: &str, source_url: &str) -> Self {
        let mut filename = filename_from_url(source_url);
        if !filename.to_lowercase().ends_with(".pdf") {
            filename = format!("{}.pdf", part_number);
        }
        Self {
            id: Uuid::new_v4(),
            job_id,
            source_url: source_url.to_string(),
            filename,
            part_number: Some(part_number.to_string()),
        }
    }
}

/// Derives the destination filename from a source URL: the terminal path
/// segment, percent-decoded, query and fragment stripped.
pub fn filename_from_url(source_url: &str) -> String {
    let path = source_url
        .split(['?', '#'])
        .next()
        .unwrap_or(source_url);
    let segment = path.rsplit('/').next().unwrap_or(path);
    let decoded = percent_decode(segment);
    if decoded.is_empty() {
        "document.pdf".to_string()
    } else {
        decoded
    }
}

fn percent_decode(s: &str) -> String {
    fn hex_val(b: u8) -> Option<u8> {
        match b {
            b'0'..=b'9' => Some(b - b'0'),
            b'a'..=b'f' => Some(b - b'a' + 10),
            b'A'..=b'F' => Some(b - b'A' + 10),
            _ => None,
        }
    }

    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            if let (Some(hi), Some(lo)) = (hex_val(bytes[i + 1]), hex_val(bytes[i + 2])) {
                out.push(hi << 4 | lo);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

// schedules table model
#[derive(Debug, Clone, Queryable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = crate::schema::schedules)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct Schedule {
    pub id: Uuid,
    pub manufacturer_name: String,
    pub domain: String,
    pub product_lines: Vec<String>,
    pub sharepoint_folder: String,
    pub enabled: bool,
    pub last_run: Option<DateTime<Utc>>,
    pub next_run: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = crate::schema::schedules)]
pub struct NewSchedule {
    pub id: Uuid,
    pub manufacturer_name: String,
    pub domain: String,
    pub product_lines: Vec<String>,
    pub sharepoint_folder: String,
    pub enabled: bool,
    pub next_run: DateTime<Utc>,
}

impl NewSchedule {
    pub fn from_job(job: &Job, next_run: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            manufacturer_name: job.manufacturer_name.clone(),
            domain: job.source.clone(),
            product_lines: job.product_lines.clone(),
            sharepoint_folder: job.sharepoint_folder.clone(),
            enabled: true,
            next_run,
        }
    }
}

/// The recrawl cadence is fixed: weekly, Sunday 00:00 UTC.
pub fn next_sunday_midnight(after: DateTime<Utc>) -> DateTime<Utc> {
    use chrono::{Datelike, Duration, NaiveTime, Weekday};

    let mut day = after.date_naive();
    loop {
        day += Duration::days(1);
        if day.weekday() == Weekday::Sun {
            break;
        }
    }
    let midnight = day.and_time(NaiveTime::MIN);
    DateTime::from_naive_utc_and_offset(midnight, Utc)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_status_terminality() {
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(JobStatus::Cancelled.is_terminal());
        for status in JobStatus::active_states() {
            assert!(!status.is_terminal(), "{:?} must be active", status);
        }
    }

    #[test]
    fn test_document_type_round_trip() {
        for ty in [
            DocumentType::ProductDataSheet,
            DocumentType::SpecificationSheet,
            DocumentType::SubmittalSheet,
            DocumentType::TechnicalDataSheet,
            DocumentType::InstallationManual,
            DocumentType::OperationMaintenance,
            DocumentType::EngineeringDiagram,
            DocumentType::Marketing,
            DocumentType::Unknown,
        ] {
            assert_eq!(DocumentType::parse(ty.as_str()), ty);
        }
        assert_eq!(DocumentType::parse("Coloring Book"), DocumentType::Unknown);
    }

    #[test]
    fn test_allow_list_excludes_installation_manual() {
        assert!(DocumentType::ProductDataSheet.is_technical());
        assert!(DocumentType::SpecificationSheet.is_technical());
        assert!(DocumentType::SubmittalSheet.is_technical());
        assert!(DocumentType::TechnicalDataSheet.is_technical());

        assert!(!DocumentType::InstallationManual.is_technical());
        assert!(!DocumentType::OperationMaintenance.is_technical());
        assert!(!DocumentType::EngineeringDiagram.is_technical());
        assert!(!DocumentType::Marketing.is_technical());
        assert!(!DocumentType::Unknown.is_technical());
    }

    #[test]
    fn test_filename_from_url() {
        assert_eq!(
            filename_from_url("https://acme.example.com/docs/AB-100_datasheet.pdf"),
            "AB-100_datasheet.pdf"
        );
        assert_eq!(
            filename_from_url("https://acme.example.com/docs/spec.pdf?rev=3#page=2"),
            "spec.pdf"
        );
        assert_eq!(
            filename_from_url("https://acme.example.com/docs/My%20Submittal.pdf"),
            "My Submittal.pdf"
        );
        // trailing slash leaves no terminal segment
        assert_eq!(filename_from_url("https://acme.example.com/docs/"), "document.pdf");
    }

    #[test]
    fn test_parts_row_filename_fallback() {
        let job_id = Uuid::new_v4();
        let row = NewDiscoveredPdf::from_parts_row(job_id, "PN-42", "https://x.com/view/12345");
        assert_eq!(row.filename, "PN-42.pdf");
        assert_eq!(row.part_number.as_deref(), Some("PN-42"));

        let row = NewDiscoveredPdf::from_parts_row(job_id, "PN-42", "https://x.com/d/a.pdf");
        assert_eq!(row.filename, "a.pdf");
    }

    #[test]
    fn test_next_sunday_midnight() {
        // 2026-07-29 is a Wednesday
        let wed = Utc.with_ymd_and_hms(2026, 7, 29, 15, 30, 0).unwrap();
        let next = next_sunday_midnight(wed);
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 8, 2, 0, 0, 0).unwrap());

        // Firing exactly at a Sunday midnight schedules the following week
        let sun = Utc.with_ymd_and_hms(2026, 8, 2, 0, 0, 0).unwrap();
        let next = next_sunday_midnight(sun);
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 8, 9, 0, 0, 0).unwrap());
    }
}
