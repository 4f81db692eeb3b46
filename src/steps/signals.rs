//! Deterministic keyword scans over extracted text

use crate::models::RiskLevel;
use serde::Serialize;

pub const FINANCIAL_KEYWORDS: &[&str] = &[
    "revenue",
    "profit",
    "loss",
    "assets",
    "liabilities",
    "cash flow",
    "earnings",
    "balance sheet",
    "income statement",
    "financial",
    "investment",
    "roi",
    "margin",
    "debt",
    "equity",
];

pub const RISK_KEYWORDS: &[&str] = &[
    "debt",
    "liability",
    "risk",
    "uncertainty",
    "volatility",
    "loss",
    "decline",
    "decrease",
    "challenge",
    "threat",
    "exposure",
    "contingency",
    "default",
    "bankruptcy",
];

/// Financial terms present in `text` (case-insensitive), in list order.
pub fn financial_keywords(text: &str) -> Vec<&'static str> {
    let lower = text.to_lowercase();
    FINANCIAL_KEYWORDS
        .iter()
        .copied()
        .filter(|kw| lower.contains(kw))
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RiskSignals {
    pub overall_risk_level: RiskLevel,
    pub risk_indicators_found: Vec<&'static str>,
    pub total_risk_mentions: usize,
}

pub fn risk_signals(text: &str) -> RiskSignals {
    let lower = text.to_lowercase();
    let mut indicators = Vec::new();
    let mut mentions = 0;

    for kw in RISK_KEYWORDS {
        let count = lower.matches(kw).count();
        if count > 0 {
            indicators.push(*kw);
            mentions += count;
        }
    }

    RiskSignals {
        overall_risk_level: risk_level(mentions),
        risk_indicators_found: indicators,
        total_risk_mentions: mentions,
    }
}

pub fn risk_level(mentions: usize) -> RiskLevel {
    match mentions {
        m if m > 20 => RiskLevel::High,
        m if m > 10 => RiskLevel::Medium,
        m if m > 5 => RiskLevel::LowMedium,
        _ => RiskLevel::Low,
    }
}

/// Number of `--- Page N ---` markers.
pub fn page_count(text: &str) -> usize {
    text.matches("--- Page ").count()
}
