//! Canonical violation record and the small enums it is built from.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Namespace for stable violation identifiers (UUIDv5 over `"{SOURCE}:{source_id}"`).
pub const VIOLATION_NAMESPACE: Uuid = Uuid::from_bytes([
    0x6f, 0x1c, 0x2a, 0x4e, 0x93, 0x7d, 0x4b, 0x51, 0xa2, 0x0e, 0x58, 0xc4, 0x1f, 0x3b, 0x90, 0xd7,
]);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Source {
    EpaEcho,
    UsdaFsis,
    Seed,
}

impl Source {
    pub fn as_str(&self) -> &'static str {
        match self {
            Source::EpaEcho => "EPA_ECHO",
            Source::UsdaFsis => "USDA_FSIS",
            Source::Seed => "SEED",
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Source {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key: String = s
            .trim()
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect::<String>()
            .to_ascii_uppercase();
        match key.as_str() {
            "EPAECHO" | "EPA" | "ECHO" => Ok(Source::EpaEcho),
            "USDAFSIS" | "FSIS" | "USDA" | "OPENFDA" | "FDA" => Ok(Source::UsdaFsis),
            "SEED" => Ok(Source::Seed),
            _ => Err(format!("unknown source '{}'", s.trim())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Severity {
    High,
    Medium,
    Low,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::High => "High",
            Severity::Medium => "Medium",
            Severity::Low => "Low",
        }
    }

    /// Strict parse used for client filters; ingestion goes through the
    /// normalizer's lenient mapping instead.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "high" => Some(Severity::High),
            "medium" => Some(Severity::Medium),
            "low" => Some(Severity::Low),
            _ => None,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

const STATES: [(&str, &str); 50] = [
    ("AL", "Alabama"),
    ("AK", "Alaska"),
    ("AZ", "Arizona"),
    ("AR", "Arkansas"),
    ("CA", "California"),
    ("CO", "Colorado"),
    ("CT", "Connecticut"),
    ("DE", "Delaware"),
    ("FL", "Florida"),
    ("GA", "Georgia"),
    ("HI", "Hawaii"),
    ("ID", "Idaho"),
    ("IL", "Illinois"),
    ("IN", "Indiana"),
    ("IA", "Iowa"),
    ("KS", "Kansas"),
    ("KY", "Kentucky"),
    ("LA", "Louisiana"),
    ("ME", "Maine"),
    ("MD", "Maryland"),
    ("MA", "Massachusetts"),
    ("MI", "Michigan"),
    ("MN", "Minnesota"),
    ("MS", "Mississippi"),
    ("MO", "Missouri"),
    ("MT", "Montana"),
    ("NE", "Nebraska"),
    ("NV", "Nevada"),
    ("NH", "New Hampshire"),
    ("NJ", "New Jersey"),
    ("NM", "New Mexico"),
    ("NY", "New York"),
    ("NC", "North Carolina"),
    ("ND", "North Dakota"),
    ("OH", "Ohio"),
    ("OK", "Oklahoma"),
    ("OR", "Oregon"),
    ("PA", "Pennsylvania"),
    ("RI", "Rhode Island"),
    ("SC", "South Carolina"),
    ("SD", "South Dakota"),
    ("TN", "Tennessee"),
    ("TX", "Texas"),
    ("UT", "Utah"),
    ("VT", "Vermont"),
    ("VA", "Virginia"),
    ("WA", "Washington"),
    ("WV", "West Virginia"),
    ("WI", "Wisconsin"),
    ("WY", "Wyoming"),
];

/// One of the 50 US state postal codes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct StateCode(String);

impl StateCode {
    /// Accepts a postal code in any case; nothing else.
    pub fn parse(code: &str) -> Option<Self> {
        let upper = code.trim().to_ascii_uppercase();
        STATES
            .iter()
            .find(|(c, _)| *c == upper)
            .map(|(c, _)| StateCode((*c).to_string()))
    }

    /// Accepts a postal code or a full state name ("arkansas", "New  York").
    pub fn from_code_or_name(value: &str) -> Option<Self> {
        if let Some(code) = Self::parse(value) {
            return Some(code);
        }
        let wanted = value.split_whitespace().collect::<Vec<_>>().join(" ");
        STATES
            .iter()
            .find(|(_, name)| name.eq_ignore_ascii_case(&wanted))
            .map(|(c, _)| StateCode((*c).to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StateCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for StateCode {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        StateCode::parse(&value).ok_or_else(|| format!("'{}' is not a US state code", value))
    }
}

impl From<StateCode> for String {
    fn from(code: StateCode) -> Self {
        code.0
    }
}

/// Stable identifier for a `(source, source_id)` pair.
pub fn violation_id(source: Source, source_id: &str) -> Uuid {
    let name = format!("{}:{}", source.as_str(), source_id);
    Uuid::new_v5(&VIOLATION_NAMESPACE, name.as_bytes())
}

/// The canonical record every source is mapped into.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Violation {
    pub id: Uuid,
    pub source: Source,
    pub source_id: String,
    pub facility_name: String,
    pub location: Option<String>,
    pub state: Option<StateCode>,
    pub county: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub violation_type: Option<String>,
    pub description: Option<String>,
    pub severity: Severity,
    pub date: Option<NaiveDate>,
    pub penalty_amount: Option<f64>,
    pub raw_payload: serde_json::Value,
    pub first_seen_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Violation {
    /// SHA-256 over the fields an upstream can change. Timestamps are left out
    /// so re-ingesting identical data reports `Unchanged`.
    pub fn fingerprint(&self) -> String {
        let canonical = serde_json::json!([
            self.source.as_str(),
            self.source_id,
            self.facility_name,
            self.location,
            self.state.as_ref().map(|s| s.as_str()),
            self.county,
            self.latitude,
            self.longitude,
            self.violation_type,
            self.description,
            self.severity.as_str(),
            self.date.map(|d| d.to_string()),
            self.penalty_amount,
            self.raw_payload,
        ]);
        let mut hasher = Sha256::new();
        hasher.update(canonical.to_string().as_bytes());
        hex::encode(hasher.finalize())
    }
}
