use crate::constants::MAX_DESCRIPTION_CHARS;
use crate::domain::{violation_id, Severity, StateCode, Violation};
use crate::error::{Result, TrackerError};
use crate::pipeline::run::RunContext;
use crate::types::RawRecord;
use chrono::NaiveDate;
use regex::Regex;

const DATE_FORMATS: [&str; 3] = ["%Y-%m-%d", "%Y%m%d", "%m/%d/%Y"];

/// A raw record turned into a canonical violation
#[derive(Debug, Clone)]
pub struct Normalized {
    pub violation: Violation,
    /// The upstream date was present but could not be parsed
    pub unparsed_date: bool,
}

/// Why a raw record could not become a violation
#[derive(Debug, Clone, PartialEq)]
pub struct Rejection {
    pub reason: &'static str,
    pub message: String,
}

impl Rejection {
    fn new(reason: &'static str, message: impl Into<String>) -> Self {
        Self {
            reason,
            message: message.into(),
        }
    }
}

pub struct Normalizer {
    whitespace: Regex,
}

impl Normalizer {
    pub fn new() -> Result<Self> {
        let whitespace = Regex::new(r"\s+").map_err(|e| TrackerError::Config(e.to_string()))?;
        Ok(Self { whitespace })
    }

    pub fn normalize(
        &self,
        ctx: &RunContext,
        raw: RawRecord,
    ) -> std::result::Result<Normalized, Rejection> {
        let source_id = raw.source_id.trim().to_string();
        if source_id.is_empty() {
            return Err(Rejection::new("missing_source_id", "record has no source id"));
        }
        let facility_name = self.collapse(&raw.facility_name).ok_or_else(|| {
            Rejection::new(
                "missing_facility_name",
                format!("{source_id}: record has no facility name"),
            )
        })?;

        let state = match raw.state.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            None => None,
            Some(value) => Some(StateCode::from_code_or_name(value).ok_or_else(|| {
                Rejection::new(
                    "unmapped_state",
                    format!("{source_id}: '{value}' is not a US state"),
                )
            })?),
        };

        let (date, unparsed_date) = match raw.date.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            None => (None, false),
            Some(text) => match parse_date(text) {
                Some(date) => (Some(date), false),
                None => (None, true),
            },
        };

        let violation = Violation {
            id: violation_id(raw.source, &source_id),
            source: raw.source,
            source_id,
            facility_name,
            location: raw.location.as_deref().and_then(|s| self.collapse(s)),
            state,
            county: raw.county.as_deref().and_then(|s| self.collapse(s)),
            latitude: raw.latitude.filter(|v| v.is_finite() && (-90.0..=90.0).contains(v)),
            longitude: raw.longitude.filter(|v| v.is_finite() && (-180.0..=180.0).contains(v)),
            violation_type: raw.violation_type.as_deref().and_then(|s| self.collapse(s)),
            description: raw.description.as_deref().and_then(truncate_description),
            severity: map_severity(raw.severity.as_deref()),
            date,
            penalty_amount: raw.penalty_amount.filter(|v| v.is_finite() && *v >= 0.0),
            raw_payload: raw.payload,
            first_seen_at: ctx.started_at,
            updated_at: ctx.started_at,
        };
        Ok(Normalized {
            violation,
            unparsed_date,
        })
    }

    fn collapse(&self, text: &str) -> Option<String> {
        let collapsed = self.whitespace.replace_all(text.trim(), " ");
        (!collapsed.is_empty()).then(|| collapsed.into_owned())
    }
}

/// Source severity vocabularies onto the canonical scale; unknown labels are Medium.
pub fn map_severity(label: Option<&str>) -> Severity {
    let Some(label) = label else {
        return Severity::Medium;
    };
    match label.trim().to_ascii_lowercase().as_str() {
        "high" | "class i" => Severity::High,
        "medium" | "class ii" => Severity::Medium,
        "low" | "class iii" => Severity::Low,
        _ => Severity::Medium,
    }
}

pub fn parse_date(text: &str) -> Option<NaiveDate> {
    DATE_FORMATS
        .iter()
        .find_map(|format| NaiveDate::parse_from_str(text, format).ok())
}

fn truncate_description(text: &str) -> Option<String> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }
    if trimmed.chars().count() <= MAX_DESCRIPTION_CHARS {
        return Some(trimmed.to_string());
    }
    let mut cut: String = trimmed.chars().take(MAX_DESCRIPTION_CHARS - 3).collect();
    cut.push_str("...");
    Some(cut)
}
