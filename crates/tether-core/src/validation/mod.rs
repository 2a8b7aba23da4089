//! Hallucination checks for candidate scripts.
//!
//! [`analyzer`] turns a script into usage events, [`validator`] resolves them
//! against a [`GraphStore`] and [`report`] aggregates the findings.

pub mod analyzer;
pub mod report;
pub mod suggest;
pub mod validator;

use crate::cancel::CancellationToken;
use crate::config::ValidationConfig;
use crate::errors::TetherResult;
use crate::store::GraphStore;

pub use analyzer::{analyze, ScriptAnalysis, UsageEvent};
pub use report::{render_markdown, summarize, Report};
pub use validator::{validate, Finding, FindingStatus, ValidationOutcome};

/// Analyze, validate and summarize one script.
///
/// An unparsable script is an error, not an empty report.
pub fn check_script(
    store: &dyn GraphStore,
    script_text: &str,
    path: Option<&str>,
    config: &ValidationConfig,
    cancel: &CancellationToken,
) -> TetherResult<Report> {
    let analysis = analyze(script_text, path)?;
    let outcome = validate(&analysis.events, store, config, cancel)?;
    let mut report = summarize(&outcome.findings);
    if outcome.cancelled {
        report.mark_partial();
    }
    Ok(report)
}
