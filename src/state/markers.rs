//! Marker extraction from agent output.
//!
//! Agents report artifacts they produced with lines like
//! `TESTS_FILE: specs/tests.json` anywhere in their output. Each recognised
//! token maps to a state key; the first occurrence in a response wins.

use super::types::PipelineState;
use regex::Regex;
use std::sync::LazyLock;

/// State key and pattern for every recognised marker, in scan order.
pub const MARKER_TABLE: &[(&str, &str)] = &[
    ("testsFile", r"TESTS_FILE:\s*(.+)"),
    ("planFile", r"PLAN_FILE:\s*(.+)"),
    ("branch", r"BRANCH:\s*(.+)"),
    ("baseCommit", r"BASE_COMMIT:\s*(.+)"),
    ("metricsFile", r"REPORT_FILE:\s*(.+)"),
    ("architectureMap", r"ARCHITECTURE_MAP:\s*(.+)"),
    ("styleSystem", r"STYLE_SYSTEM:\s*(.+)"),
    ("tailwindConfig", r"TAILWIND_CONFIG:\s*(.+)"),
    ("bugfinderReport", r"BUGFINDER_REPORT:\s*(.+)"),
    ("criticalIssues", r"CRITICAL_ISSUES:\s*(\d+)"),
    ("highPriority", r"HIGH_PRIORITY:\s*(\d+)"),
    ("bugfixerReport", r"BUGFIXER_REPORT:\s*(.+)"),
    ("issuesFixed", r"ISSUES_FIXED:\s*(\d+)"),
    ("issuesSkipped", r"ISSUES_SKIPPED:\s*(\d+)"),
    ("allCriticalFixed", r"ALL_CRITICAL_FIXED:\s*(yes|no)"),
    ("securityIssues", r"SECURITY_ISSUES:\s*(\d+)"),
    ("typeErrors", r"TYPE_ERRORS:\s*(\d+)"),
    ("errorHandlingIssues", r"ERROR_HANDLING_ISSUES:\s*(\d+)"),
    ("lintErrors", r"LINT_ERRORS:\s*(\d+)"),
    ("codebaseContext", r"CODEBASE_CONTEXT:\s*(.+)"),
    ("documentationAdded", r"DOCUMENTATION_ADDED:\s*(.+)"),
    ("filesDocumented", r"FILES_DOCUMENTED:\s*(\d+)"),
    ("infraConfig", r"INFRA_CONFIG:\s*(.+)"),
    ("complianceReport", r"COMPLIANCE_REPORT:\s*(.+)"),
    ("complianceValidation", r"COMPLIANCE_VALIDATION:\s*(pass|fail)"),
    ("structureReport", r"STRUCTURE_REPORT:\s*(.+)"),
    ("structureValidation", r"STRUCTURE_VALIDATION:\s*(pass|fail)"),
];

// Compile the table once
static MARKERS: LazyLock<Vec<(&'static str, Regex)>> = LazyLock::new(|| {
    MARKER_TABLE
        .iter()
        .map(|(name, pattern)| (*name, Regex::new(&format!("(?m){}", pattern)).unwrap()))
        .collect()
});

/// Scan `text` for markers without touching any state.
///
/// Returns `(state key, trimmed value)` pairs in table order. Markers whose
/// captured value is blank after trimming are omitted.
pub fn scan_markers(text: &str) -> Vec<(&'static str, String)> {
    MARKERS
        .iter()
        .filter_map(|(name, regex)| {
            let value = regex.captures(text)?.get(1)?.as_str().trim();
            (!value.is_empty()).then(|| (*name, value.to_string()))
        })
        .collect()
}

/// Store every marker found in `text` on `state`.
///
/// Markers absent from the text leave existing values alone. Returns whether
/// any stored value changed, so callers only persist when needed.
pub fn extract_markers(text: &str, state: &mut PipelineState) -> bool {
    let mut changed = false;
    for (name, value) in scan_markers(text) {
        if state.marker(name) == Some(value.as_str()) {
            continue;
        }
        tracing::debug!(marker = name, value = %value, "extracted marker");
        state.markers.insert(name.to_string(), value);
        changed = true;
    }
    changed
}
