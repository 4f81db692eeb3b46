//! Core data models for the document analyzer

use crate::error::{AnalysisError, ErrorBody, ErrorKind};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

//
// ================= Steps =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum StepId {
    Verification,
    FinancialAnalysis,
    InvestmentAdvice,
    RiskAssessment,
}

impl StepId {
    /// Fixed report order.
    pub const ALL: [StepId; 4] = [
        StepId::Verification,
        StepId::FinancialAnalysis,
        StepId::InvestmentAdvice,
        StepId::RiskAssessment,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StepId::Verification => "verification",
            StepId::FinancialAnalysis => "financial_analysis",
            StepId::InvestmentAdvice => "investment_advice",
            StepId::RiskAssessment => "risk_assessment",
        }
    }

    pub fn title(&self) -> &'static str {
        match self {
            StepId::Verification => "Document Verification",
            StepId::FinancialAnalysis => "Financial Analysis",
            StepId::InvestmentAdvice => "Investment Advice",
            StepId::RiskAssessment => "Risk Assessment",
        }
    }
}

impl fmt::Display for StepId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal outcome recorded for a step.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Ok,
    Failed,
    Skipped,
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StepStatus::Ok => "ok",
            StepStatus::Failed => "failed",
            StepStatus::Skipped => "skipped",
        };
        write!(f, "{}", s)
    }
}

/// Output of a successful step.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StepPayload {
    pub body: String,
    #[serde(default)]
    pub findings: serde_json::Value,
    /// Produced without some optional input (e.g. market context).
    #[serde(default)]
    pub degraded: bool,
    #[serde(default)]
    pub notes: Vec<String>,
}

impl StepPayload {
    pub fn new(body: impl Into<String>) -> Self {
        Self {
            body: body.into(),
            findings: serde_json::Value::Null,
            degraded: false,
            notes: Vec::new(),
        }
    }

    pub fn with_findings(mut self, findings: serde_json::Value) -> Self {
        self.findings = findings;
        self
    }

    pub fn degraded(mut self, note: impl Into<String>) -> Self {
        self.degraded = true;
        self.notes.push(note.into());
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StepResult {
    pub step: StepId,
    pub status: StepStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<StepPayload>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<String>,
    pub attempts: u32,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: u64,
}

impl StepResult {
    pub fn succeeded(
        step: StepId,
        payload: StepPayload,
        attempts: u32,
        started_at: DateTime<Utc>,
    ) -> Self {
        let finished_at = Utc::now();
        Self {
            step,
            status: StepStatus::Ok,
            payload: Some(payload),
            error: None,
            skip_reason: None,
            attempts,
            started_at: Some(started_at),
            finished_at,
            duration_ms: elapsed_ms(started_at, finished_at),
        }
    }

    pub fn failed(
        step: StepId,
        error: ErrorBody,
        attempts: u32,
        started_at: DateTime<Utc>,
    ) -> Self {
        let finished_at = Utc::now();
        Self {
            step,
            status: StepStatus::Failed,
            payload: None,
            error: Some(error),
            skip_reason: None,
            attempts,
            started_at: Some(started_at),
            finished_at,
            duration_ms: elapsed_ms(started_at, finished_at),
        }
    }

    pub fn skipped(step: StepId, reason: impl Into<String>) -> Self {
        Self {
            step,
            status: StepStatus::Skipped,
            payload: None,
            error: None,
            skip_reason: Some(reason.into()),
            attempts: 0,
            started_at: None,
            finished_at: Utc::now(),
            duration_ms: 0,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == StepStatus::Ok
    }
}

fn elapsed_ms(start: DateTime<Utc>, end: DateTime<Utc>) -> u64 {
    (end - start).num_milliseconds().max(0) as u64
}

//
// ================= Risk =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    LowMedium,
    Medium,
    High,
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RiskLevel::Low => "Low",
            RiskLevel::LowMedium => "Low-Medium",
            RiskLevel::Medium => "Medium",
            RiskLevel::High => "High",
        };
        write!(f, "{}", s)
    }
}

//
// ================= Report =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ReportStatus {
    Success,
    Partial,
    Error,
}

impl fmt::Display for ReportStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ReportStatus::Success => "success",
            ReportStatus::Partial => "partial",
            ReportStatus::Error => "error",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DocumentSummary {
    pub document_id: Uuid,
    pub filename: String,
    pub size_bytes: usize,
    pub sha256: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Section {
    pub name: StepId,
    pub title: String,
    pub status: StepStatus,
    pub body: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
    #[serde(default)]
    pub degraded: bool,
    pub attempts: u32,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Report {
    pub run_id: Uuid,
    pub query: String,
    pub document: DocumentSummary,
    pub status: ReportStatus,
    /// Set when the run budget expired before every step finished.
    pub partial: bool,
    pub sections: Vec<Section>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: u64,
}

impl Report {
    pub fn section(&self, step: StepId) -> Option<&Section> {
        self.sections.iter().find(|s| s.name == step)
    }
}

//
// ================= Caller Contract =================
//

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AnalysisResponse {
    pub status: ReportStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<Report>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

impl AnalysisResponse {
    pub fn from_report(report: Report) -> Self {
        let error = verification_error(&report);
        Self {
            status: report.status,
            report: Some(report),
            error,
        }
    }

    pub fn from_error(err: AnalysisError) -> Self {
        let error = Some(err.to_body());
        let report = match err {
            AnalysisError::Cancelled { report } => Some(*report),
            _ => None,
        };
        Self {
            status: ReportStatus::Error,
            report,
            error,
        }
    }
}

impl From<crate::Result<Report>> for AnalysisResponse {
    fn from(result: crate::Result<Report>) -> Self {
        match result {
            Ok(report) => AnalysisResponse::from_report(report),
            Err(err) => AnalysisResponse::from_error(err),
        }
    }
}

/// Error body for a report whose verification gate failed.
pub fn verification_error(report: &Report) -> Option<ErrorBody> {
    if report.status != ReportStatus::Error {
        return None;
    }
    let detail = report
        .section(StepId::Verification)
        .and_then(|s| s.error.as_ref())
        .map(|e| e.message.clone())
        .unwrap_or_else(|| "document verification did not pass".to_string());
    Some(ErrorBody::new(ErrorKind::VerificationFailed, detail))
}

//
// ================= Jobs =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Queued,
    Running,
    Succeeded,
    Failed,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Succeeded | JobState::Failed)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobState::Queued => "queued",
            JobState::Running => "running",
            JobState::Succeeded => "succeeded",
            JobState::Failed => "failed",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum JobPriority {
    High,
    #[default]
    Normal,
    Low,
}

impl JobPriority {
    pub fn parse(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "high" => JobPriority::High,
            "low" => JobPriority::Low,
            _ => JobPriority::Normal,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Job {
    pub job_id: Uuid,
    pub state: JobState,
    pub priority: JobPriority,
    pub filename: String,
    pub query: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Report>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

impl Job {
    pub fn queued(job_id: Uuid, priority: JobPriority, filename: String, query: String) -> Self {
        let now = Utc::now();
        Self {
            job_id,
            state: JobState::Queued,
            priority,
            filename,
            query,
            created_at: now,
            updated_at: now,
            started_at: None,
            finished_at: None,
            result: None,
            error: None,
        }
    }
}

//
// ================= Persistence =================
//

/// Write-once record of a finished run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AnalysisRecord {
    pub record_id: Uuid,
    pub job_id: Option<Uuid>,
    pub filename: String,
    pub query: String,
    pub status: ReportStatus,
    pub report: Option<Report>,
    pub error: Option<ErrorBody>,
    pub processing_ms: u64,
    pub created_at: DateTime<Utc>,
}

impl AnalysisRecord {
    pub fn from_response(
        response: &AnalysisResponse,
        job_id: Option<Uuid>,
        filename: &str,
        query: &str,
        processing_ms: u64,
    ) -> Self {
        let record_id = response
            .report
            .as_ref()
            .map(|r| r.run_id)
            .unwrap_or_else(Uuid::new_v4);
        Self {
            record_id,
            job_id,
            filename: filename.to_string(),
            query: query.to_string(),
            status: response.status,
            report: response.report.clone(),
            error: response.error.clone(),
            processing_ms,
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_status_serialization() {
        assert_eq!(serde_json::to_string(&StepStatus::Ok).unwrap(), "\"ok\"");
        assert_eq!(
            serde_json::to_string(&StepStatus::Skipped).unwrap(),
            "\"skipped\""
        );
        assert_eq!(
            serde_json::to_string(&StepId::InvestmentAdvice).unwrap(),
            "\"investment_advice\""
        );
    }

    #[test]
    fn test_priority_parse_defaults_to_normal() {
        assert_eq!(JobPriority::parse("HIGH"), JobPriority::High);
        assert_eq!(JobPriority::parse(" low "), JobPriority::Low);
        assert_eq!(JobPriority::parse("urgent"), JobPriority::Normal);
    }

    #[test]
    fn test_risk_level_ordering() {
        assert!(RiskLevel::High > RiskLevel::Medium);
        assert!(RiskLevel::LowMedium > RiskLevel::Low);
        assert_eq!(RiskLevel::LowMedium.to_string(), "Low-Medium");
    }

    #[test]
    fn test_cancelled_response_keeps_partial_report() {
        let report = Report {
            run_id: Uuid::new_v4(),
            query: "q".into(),
            document: DocumentSummary {
                document_id: Uuid::new_v4(),
                filename: "a.pdf".into(),
                size_bytes: 10,
                sha256: "00".into(),
            },
            status: ReportStatus::Partial,
            partial: false,
            sections: vec![],
            started_at: Utc::now(),
            finished_at: Utc::now(),
            duration_ms: 0,
        };
        let response = AnalysisResponse::from_error(AnalysisError::Cancelled {
            report: Box::new(report.clone()),
        });
        assert_eq!(response.status, ReportStatus::Error);
        assert_eq!(response.error.unwrap().kind, ErrorKind::Cancelled);
        assert_eq!(response.report, Some(report));
    }
}
