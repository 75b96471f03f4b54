//! Source adapters: one per upstream, each mapping typed upstream records
//! into `RawRecord`s.

pub mod epa_echo;
pub mod http;
pub mod openfda;
pub mod rate_limiter;
pub mod seed;

use crate::config::Config;
use crate::constants;
use crate::error::{Result, TrackerError};
use crate::types::SourceAdapter;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use std::sync::Arc;
use tracing::info;

/// Build the enabled adapters. With `only`, restrict to those names
/// (unknown names are an error; disabled-but-named adapters are still built).
pub fn build_adapters(
    config: &Config,
    only: Option<&[String]>,
) -> Result<Vec<Arc<dyn SourceAdapter>>> {
    if let Some(names) = only {
        let supported = constants::get_supported_adapters();
        if let Some(unknown) = names.iter().find(|n| !supported.contains(&n.as_str())) {
            return Err(TrackerError::Config(format!(
                "unknown source '{}'; available: {}",
                unknown,
                supported.join(", ")
            )));
        }
    }
    let wanted = |name: &str, enabled: bool| match only {
        Some(names) => names.iter().any(|n| n == name),
        None => enabled,
    };

    let mut adapters: Vec<Arc<dyn SourceAdapter>> = Vec::new();
    if wanted(constants::SEED_ADAPTER, config.sources.seed.enabled) {
        adapters.push(Arc::new(seed::SeedAdapter::new(&config.sources.seed)?));
    }
    if wanted(constants::OPENFDA_ADAPTER, config.sources.openfda.enabled) {
        adapters.push(Arc::new(openfda::OpenFdaAdapter::new(
            &config.sources.openfda,
            &config.ingest.retry,
        )?));
    }
    if wanted(constants::EPA_ECHO_ADAPTER, config.sources.epa_echo.enabled) {
        adapters.push(Arc::new(epa_echo::EpaEchoAdapter::new(
            &config.sources.epa_echo,
            &config.ingest.retry,
        )?));
    }
    info!(
        adapters = ?adapters.iter().map(|a| a.name()).collect::<Vec<_>>(),
        "adapters configured"
    );
    Ok(adapters)
}

/// Upstream text fields arrive as strings, numbers or null. Blank becomes `None`.
pub(crate) fn lenient_string<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => {
            let trimmed = s.trim();
            Ok((!trimmed.is_empty()).then(|| trimmed.to_string()))
        }
        Some(Value::Number(n)) => Ok(Some(n.to_string())),
        Some(Value::Bool(b)) => Ok(Some(b.to_string())),
        Some(other) => Err(D::Error::custom(format!(
            "expected a string, found {}",
            json_kind(&other)
        ))),
    }
}

/// Numbers that may be quoted. Unparseable text becomes `None`.
pub(crate) fn lenient_f64<'de, D>(deserializer: D) -> std::result::Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => Ok(n.as_f64()),
        Some(Value::String(s)) => Ok(s.trim().parse::<f64>().ok()),
        Some(other) => Err(D::Error::custom(format!(
            "expected a number, found {}",
            json_kind(&other)
        ))),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Join the present parts with `sep`
pub(crate) fn join_present(parts: &[Option<String>], sep: &str) -> Option<String> {
    let joined = parts
        .iter()
        .flatten()
        .map(|s| s.as_str())
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join(sep);
    (!joined.is_empty()).then_some(joined)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Deserialize)]
    struct Probe {
        #[serde(default, deserialize_with = "lenient_string")]
        text: Option<String>,
        #[serde(default, deserialize_with = "lenient_f64")]
        number: Option<f64>,
    }

    #[test]
    fn lenient_fields_accept_mixed_upstream_types() {
        let p: Probe = serde_json::from_value(json!({"text": 42, "number": "35.5"})).unwrap();
        assert_eq!(p.text.as_deref(), Some("42"));
        assert_eq!(p.number, Some(35.5));

        let p: Probe = serde_json::from_value(json!({"text": "  ", "number": "n/a"})).unwrap();
        assert_eq!(p.text, None);
        assert_eq!(p.number, None);

        let p: Probe = serde_json::from_value(json!({})).unwrap();
        assert_eq!(p.text, None);
    }

    #[test]
    fn lenient_string_rejects_structures() {
        let err = serde_json::from_value::<Probe>(json!({"text": {"nested": true}}));
        assert!(err.is_err());
    }

    #[test]
    fn join_present_skips_missing_parts() {
        let parts = [Some("1 Main St".to_string()), None, Some("AR".to_string())];
        assert_eq!(join_present(&parts, ", ").as_deref(), Some("1 Main St, AR"));
        assert_eq!(join_present(&[None, None], ", "), None);
    }

    #[test]
    fn unknown_source_names_are_rejected() {
        let config = Config::default();
        let only = vec!["nope".to_string()];
        assert!(build_adapters(&config, Some(&only)).is_err());
    }
}
