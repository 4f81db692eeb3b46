//! Financial Document Analyzer
//!
//! Turns an uploaded financial PDF and a free-text question into a
//! structured report:
//! - Verifies the document before any content-dependent analysis
//! - Runs financial analysis, investment advice and risk assessment
//!   over one shared, append-only run context
//! - Degrades to a partial report when a tool fails or the budget runs out
//! - Serves runs inline or through a prioritized job queue with history
//!
//! PIPELINE:
//! DOCUMENT → VERIFY → FINANCIAL ANALYSIS → (INVESTMENT ADVICE | RISK) → REPORT

pub mod api;
pub mod config;
pub mod context;
pub mod document;
pub mod error;
pub mod gemini;
pub mod jobs;
pub mod models;
pub mod pipeline;
pub mod report;
pub mod steps;
pub mod store;
pub mod tools;

pub use error::Result;

// Re-export common types
pub use config::AppConfig;
pub use error::{AnalysisError, ErrorBody, ErrorKind};
pub use jobs::{JobRunner, JobWorker};
pub use models::*;
pub use pipeline::{Pipeline, RunOptions};
