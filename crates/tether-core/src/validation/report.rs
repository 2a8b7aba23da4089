//! Aggregation of findings into a report.

use std::fmt::Write as _;

use indexmap::IndexMap;
use serde::Serialize;

use crate::validation::validator::{Finding, FindingStatus};

const CATEGORY_ORDER: &[&str] = &[
    "import",
    "instantiation",
    "method_call",
    "attribute_access",
    "function_call",
];

/// Above this share of unknown findings the report is dominated by code
/// that could not be checked.
const UNKNOWN_DOMINANT_RATIO: f64 = 0.5;

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct CategoryCounts {
    pub total: usize,
    pub valid: usize,
    pub not_found: usize,
    pub unknown: usize,
}

/// One usage the graph says does not exist.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Hallucination {
    pub usage: String,
    pub category: &'static str,
    pub line: usize,
    pub confidence: f64,
    pub message: String,
    pub suggestions: Vec<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct Report {
    /// `None` when nothing could be resolved either way; never reported as
    /// a clean 1.0.
    pub overall_confidence: Option<f64>,
    pub findings_by_category: IndexMap<String, CategoryCounts>,
    pub total: usize,
    pub valid_count: usize,
    pub not_found_count: usize,
    pub unknown_count: usize,
    pub warning_count: usize,
    pub recommendations: Vec<String>,
    pub hallucinations: Vec<Hallucination>,
    /// Validation stopped early; counts cover only the events checked.
    pub partial: bool,
}

impl Report {
    pub fn resolvable_count(&self) -> usize {
        self.valid_count + self.not_found_count
    }

    /// Mark the report as covering only part of the script and refresh the
    /// recommendations accordingly.
    pub fn mark_partial(&mut self) {
        self.partial = true;
        self.recommendations = recommendations(self);
    }
}

pub fn summarize(findings: &[Finding]) -> Report {
    let mut report = Report {
        total: findings.len(),
        ..Report::default()
    };
    for category in CATEGORY_ORDER {
        if findings.iter().any(|f| f.category() == *category) {
            report
                .findings_by_category
                .insert(category.to_string(), CategoryCounts::default());
        }
    }

    let mut not_found_confidence = 0.0;
    for finding in findings {
        let counts = report
            .findings_by_category
            .entry(finding.category().to_string())
            .or_default();
        counts.total += 1;
        match finding.status {
            FindingStatus::Valid => {
                counts.valid += 1;
                report.valid_count += 1;
            }
            FindingStatus::NotFound => {
                counts.not_found += 1;
                report.not_found_count += 1;
                not_found_confidence += finding.confidence;
                report.hallucinations.push(Hallucination {
                    usage: finding.event.describe(),
                    category: finding.category(),
                    line: finding.event.site().line,
                    confidence: finding.confidence,
                    message: finding.message.clone(),
                    suggestions: finding.suggestions.clone(),
                });
            }
            FindingStatus::Unknown => {
                counts.unknown += 1;
                report.unknown_count += 1;
            }
        }
        if !finding.warnings.is_empty() {
            report.warning_count += 1;
        }
    }

    let resolvable = report.resolvable_count();
    if resolvable > 0 {
        let score = 1.0 - not_found_confidence / resolvable as f64;
        report.overall_confidence = Some(score.clamp(0.0, 1.0));
    }
    report.recommendations = recommendations(&report);
    report
}

fn recommendations(report: &Report) -> Vec<String> {
    let mut out = Vec::new();
    if report.partial {
        out.push("Validation was cancelled; only part of the script was checked.".to_string());
    }
    if report.total == 0 {
        out.push("No usages of external code were found in the script.".to_string());
        return out;
    }
    if report.not_found_count > 0 {
        out.push(format!(
            "Review {} usage(s) that do not exist in the indexed repositories.",
            report.not_found_count
        ));
    }
    if report.unknown_count > 0 {
        let ratio = report.unknown_count as f64 / report.total as f64;
        if ratio > UNKNOWN_DOMINANT_RATIO {
            out.push(format!(
                "{} of {} usage(s) could not be checked; the target repositories are likely not indexed.",
                report.unknown_count, report.total
            ));
        } else {
            out.push(format!(
                "{} usage(s) could not be checked; treat the result as incomplete.",
                report.unknown_count
            ));
        }
    }
    if report.warning_count > 0 {
        out.push(format!(
            "Fix {} call(s) whose arguments do not match the indexed signature.",
            report.warning_count
        ));
    }
    if report.not_found_count == 0 && report.unknown_count == 0 && report.warning_count == 0 {
        out.push("All usages resolved against indexed code.".to_string());
    }
    out
}

/// Human-readable rendering of a report.
pub fn render_markdown(report: &Report) -> String {
    let mut md = String::new();
    let _ = writeln!(md, "# Validation report\n");
    if report.partial {
        let _ = writeln!(md, "> Partial result: validation was cancelled.\n");
    }
    match report.overall_confidence {
        Some(score) => {
            let _ = writeln!(md, "**Overall confidence:** {:.0}%\n", score * 100.0);
        }
        None => {
            let _ = writeln!(md, "**Overall confidence:** indeterminate\n");
        }
    }
    let _ = writeln!(
        md,
        "- Total: {}\n- Valid: {}\n- Not found: {}\n- Unknown: {}\n- Signature warnings: {}\n",
        report.total,
        report.valid_count,
        report.not_found_count,
        report.unknown_count,
        report.warning_count
    );

    if !report.findings_by_category.is_empty() {
        let _ = writeln!(md, "## By category\n");
        let _ = writeln!(md, "| Category | Total | Valid | Not found | Unknown |");
        let _ = writeln!(md, "|---|---|---|---|---|");
        for (category, counts) in &report.findings_by_category {
            let _ = writeln!(
                md,
                "| {category} | {} | {} | {} | {} |",
                counts.total, counts.valid, counts.not_found, counts.unknown
            );
        }
        md.push('\n');
    }

    if !report.hallucinations.is_empty() {
        let _ = writeln!(md, "## Not found\n");
        for h in &report.hallucinations {
            let _ = write!(
                md,
                "- line {}: `{}` ({:.0}%) {}",
                h.line,
                h.usage,
                h.confidence * 100.0,
                h.message
            );
            if !h.suggestions.is_empty() {
                let _ = write!(md, "; did you mean {}?", h.suggestions.join(", "));
            }
            md.push('\n');
        }
        md.push('\n');
    }

    if !report.recommendations.is_empty() {
        let _ = writeln!(md, "## Recommendations\n");
        for rec in &report.recommendations {
            let _ = writeln!(md, "- {rec}");
        }
    }
    md
}
