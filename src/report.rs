//! Report assembly
//!
//! A report is a read-only view over one run's step log.

use crate::context::AnalysisContext;
use crate::models::{Report, ReportStatus, Section, StepId, StepResult, StepStatus};
use chrono::Utc;

pub async fn assemble(ctx: &AnalysisContext, budget_exhausted: bool) -> Report {
    let log = ctx.snapshot().await;
    let finished_at = Utc::now();

    let sections: Vec<Section> = StepId::ALL
        .iter()
        .map(|step| match log.iter().find(|r| r.step == *step) {
            Some(result) => section(result),
            None => section(&StepResult::skipped(*step, "Step was not scheduled")),
        })
        .collect();

    Report {
        run_id: ctx.run_id,
        query: ctx.query().to_string(),
        document: ctx.document().summary(),
        status: overall_status(&sections, budget_exhausted),
        partial: budget_exhausted,
        sections,
        started_at: ctx.started_at,
        finished_at,
        duration_ms: (finished_at - ctx.started_at).num_milliseconds().max(0) as u64,
    }
}

fn overall_status(sections: &[Section], budget_exhausted: bool) -> ReportStatus {
    let verified = sections
        .iter()
        .any(|s| s.name == StepId::Verification && s.status == StepStatus::Ok);

    if !verified {
        ReportStatus::Error
    } else if budget_exhausted || sections.iter().any(|s| s.status != StepStatus::Ok) {
        ReportStatus::Partial
    } else {
        ReportStatus::Success
    }
}

fn section(result: &StepResult) -> Section {
    let body = match result.status {
        StepStatus::Ok => result
            .payload
            .as_ref()
            .map(|p| p.body.clone())
            .unwrap_or_default(),
        StepStatus::Failed => format!(
            "Not completed: {}",
            result
                .error
                .as_ref()
                .map(|e| e.message.as_str())
                .unwrap_or("unknown failure")
        ),
        StepStatus::Skipped => format!(
            "Not analyzed: {}",
            result.skip_reason.as_deref().unwrap_or("skipped")
        ),
    };

    Section {
        name: result.step,
        title: result.step.title().to_string(),
        status: result.status,
        body,
        error: result.error.clone(),
        degraded: result.payload.as_ref().map(|p| p.degraded).unwrap_or(false),
        attempts: result.attempts,
        duration_ms: result.duration_ms,
    }
}

/// Plain-text rendering for terminals.
pub fn render_text(report: &Report) -> String {
    let mut out = format!(
        "Financial Document Analysis\n\
         File: {}\n\
         Query: {}\n\
         Status: {}{}\n",
        report.document.filename,
        report.query,
        report.status,
        if report.partial { " (run budget exhausted)" } else { "" }
    );

    for section in &report.sections {
        out.push_str(&format!("\n== {} [{}] ==\n", section.title, section.status));
        if section.degraded {
            out.push_str("(produced without market context)\n");
        }
        out.push_str(&section.body);
        out.push('\n');
    }

    out
}
