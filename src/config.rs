//! Runtime configuration
//!
//! Built once at process start and passed down explicitly. Nothing below the
//! binaries reads the environment.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

pub const DEFAULT_QUERY: &str = "Provide a comprehensive analysis of this financial document";
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;
/// A step gets its first try plus at most one retry.
pub const MAX_STEP_ATTEMPTS: u32 = 2;
/// Upper bound for `JOB_RETENTION_HOURS` (one year).
pub const MAX_RETENTION_HOURS: u64 = 24 * 365;

/// Credentials and limits for the external tools.
#[derive(Debug, Clone)]
pub struct ToolConfig {
    pub gemini_api_key: Option<String>,
    pub gemini_model: String,
    pub serper_api_key: Option<String>,
    /// Timeout applied to every individual tool call.
    pub call_timeout: Duration,
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            gemini_api_key: None,
            gemini_model: "gemini-2.0-flash".to_string(),
            serper_api_key: None,
            call_timeout: Duration::from_secs(60),
        }
    }
}

impl ToolConfig {
    pub fn with_gemini_api_key(mut self, key: impl Into<String>) -> Self {
        self.gemini_api_key = Some(key.into());
        self
    }

    pub fn with_serper_api_key(mut self, key: impl Into<String>) -> Self {
        self.serper_api_key = Some(key.into());
        self
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Wall-clock budget for one whole run.
    pub budget: Duration,
    /// Attempts per step for transient tool failures, within
    /// `1..=MAX_STEP_ATTEMPTS`.
    pub max_step_attempts: u32,
    pub max_query_chars: usize,
    pub min_document_chars: usize,
    pub min_financial_keywords: usize,
    pub default_query: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            budget: Duration::from_secs(600),
            max_step_attempts: 2,
            max_query_chars: 2000,
            min_document_chars: 100,
            min_financial_keywords: 3,
            default_query: DEFAULT_QUERY.to_string(),
        }
    }
}

impl PipelineConfig {
    pub fn with_budget(mut self, budget: Duration) -> Self {
        self.budget = budget;
        self
    }

    pub fn with_max_step_attempts(mut self, attempts: u32) -> Self {
        self.max_step_attempts = attempts.clamp(1, MAX_STEP_ATTEMPTS);
        self
    }

    pub fn with_min_document_chars(mut self, chars: usize) -> Self {
        self.min_document_chars = chars;
        self
    }

    pub fn with_min_financial_keywords(mut self, count: usize) -> Self {
        self.min_financial_keywords = count;
        self
    }
}

#[derive(Debug, Clone)]
pub struct DocumentConfig {
    pub max_upload_bytes: usize,
    /// Directory holding temporary uploads.
    pub data_dir: PathBuf,
    pub sample_path: PathBuf,
}

impl Default for DocumentConfig {
    fn default() -> Self {
        Self {
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            data_dir: PathBuf::from("data"),
            sample_path: PathBuf::from("data/sample.pdf"),
        }
    }
}

impl DocumentConfig {
    pub fn with_data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.data_dir = dir.into();
        self
    }

    pub fn with_sample_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.sample_path = path.into();
        self
    }

    pub fn with_max_upload_bytes(mut self, bytes: usize) -> Self {
        self.max_upload_bytes = bytes;
        self
    }
}

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub enabled: bool,
    pub max_concurrent_jobs: usize,
    /// How long terminal jobs stay pollable.
    pub retention: Duration,
    pub purge_interval: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_concurrent_jobs: 2,
            retention: Duration::from_secs(24 * 60 * 60),
            purge_interval: Duration::from_secs(300),
        }
    }
}

impl WorkerConfig {
    pub fn with_max_concurrent(mut self, max: usize) -> Self {
        self.max_concurrent_jobs = max.max(1);
        self
    }

    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub database_url: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            database_url: None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct AppConfig {
    pub tools: ToolConfig,
    pub pipeline: PipelineConfig,
    pub documents: DocumentConfig,
    pub worker: WorkerConfig,
    pub server: ServerConfig,
}

impl AppConfig {
    /// Load from environment variables (call `dotenv` first).
    ///
    /// | Variable | Default |
    /// |----------|---------|
    /// | `GEMINI_API_KEY` | unset |
    /// | `GEMINI_MODEL` | `gemini-2.0-flash` |
    /// | `SERPER_API_KEY` | unset |
    /// | `TOOL_TIMEOUT_SECS` | `60` |
    /// | `PIPELINE_BUDGET_SECS` | `600` |
    /// | `STEP_MAX_ATTEMPTS` | `2` |
    /// | `MAX_QUERY_CHARS` | `2000` |
    /// | `MIN_DOCUMENT_CHARS` | `100` |
    /// | `MIN_FINANCIAL_KEYWORDS` | `3` |
    /// | `MAX_UPLOAD_BYTES` | `10485760` |
    /// | `DATA_DIR` | `data` |
    /// | `SAMPLE_DOCUMENT` | `data/sample.pdf` |
    /// | `JOB_WORKER_ENABLED` | `true` |
    /// | `JOB_MAX_CONCURRENT` | `2` |
    /// | `JOB_RETENTION_HOURS` | `24` |
    /// | `JOB_PURGE_INTERVAL_SECS` | `300` |
    /// | `PORT` / `API_PORT` | `8080` |
    /// | `DATABASE_URL` | unset |
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = AppConfig::default();
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let tools = ToolConfig {
            gemini_api_key: non_empty("GEMINI_API_KEY"),
            gemini_model: non_empty("GEMINI_MODEL").unwrap_or(defaults.tools.gemini_model),
            serper_api_key: non_empty("SERPER_API_KEY"),
            call_timeout: Duration::from_secs(parse_or(
                &lookup,
                "TOOL_TIMEOUT_SECS",
                defaults.tools.call_timeout.as_secs(),
            )),
        };

        let pipeline = PipelineConfig {
            budget: Duration::from_secs(parse_or(
                &lookup,
                "PIPELINE_BUDGET_SECS",
                defaults.pipeline.budget.as_secs(),
            )),
            max_step_attempts: parse_or(
                &lookup,
                "STEP_MAX_ATTEMPTS",
                defaults.pipeline.max_step_attempts,
            )
            .clamp(1, MAX_STEP_ATTEMPTS),
            max_query_chars: parse_or(
                &lookup,
                "MAX_QUERY_CHARS",
                defaults.pipeline.max_query_chars,
            ),
            min_document_chars: parse_or(
                &lookup,
                "MIN_DOCUMENT_CHARS",
                defaults.pipeline.min_document_chars,
            ),
            min_financial_keywords: parse_or(
                &lookup,
                "MIN_FINANCIAL_KEYWORDS",
                defaults.pipeline.min_financial_keywords,
            ),
            default_query: defaults.pipeline.default_query,
        };

        let documents = DocumentConfig {
            max_upload_bytes: parse_or(
                &lookup,
                "MAX_UPLOAD_BYTES",
                defaults.documents.max_upload_bytes,
            ),
            data_dir: non_empty("DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.documents.data_dir),
            sample_path: non_empty("SAMPLE_DOCUMENT")
                .map(PathBuf::from)
                .unwrap_or(defaults.documents.sample_path),
        };

        let worker = WorkerConfig {
            enabled: lookup("JOB_WORKER_ENABLED")
                .map(|v| v != "false" && v != "0")
                .unwrap_or(true),
            max_concurrent_jobs: parse_or(
                &lookup,
                "JOB_MAX_CONCURRENT",
                defaults.worker.max_concurrent_jobs,
            )
            .max(1),
            retention: Duration::from_secs(
                parse_or(&lookup, "JOB_RETENTION_HOURS", 24u64).min(MAX_RETENTION_HOURS)
                    * 60
                    * 60,
            ),
            purge_interval: Duration::from_secs(parse_or(
                &lookup,
                "JOB_PURGE_INTERVAL_SECS",
                defaults.worker.purge_interval.as_secs(),
            )),
        };

        let port_key = if lookup("PORT").is_some() { "PORT" } else { "API_PORT" };
        let server = ServerConfig {
            port: parse_or(&lookup, port_key, defaults.server.port),
            database_url: non_empty("DATABASE_URL"),
        };

        Self {
            tools,
            pipeline,
            documents,
            worker,
            server,
        }
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> T
where
    F: Fn(&str) -> Option<String>,
    T: FromStr + Copy,
{
    match lookup(key) {
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!(key, value = %raw, "Invalid configuration value, using default");
            default
        }),
        None => default,
    }
}
