use crate::config::SeedSourceConfig;
use crate::constants;
use crate::domain::Source;
use crate::error::{Result, TrackerError};
use crate::pipeline::run::RunContext;
use crate::types::{RawRecord, RecordPage, SchemaRejection, SourceAdapter};
use jsonschema::JSONSchema;
use serde::Deserialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::path::PathBuf;
use std::sync::OnceLock;
use tracing::{debug, info, instrument};

const SEED_SCHEMA: &str = include_str!("../../schemas/seed_violation.v1.json");

static SCHEMA_JSON: OnceLock<Value> = OnceLock::new();

fn schema_json() -> Result<&'static Value> {
    if let Some(schema) = SCHEMA_JSON.get() {
        return Ok(schema);
    }
    let parsed: Value = serde_json::from_str(SEED_SCHEMA)?;
    Ok(SCHEMA_JSON.get_or_init(|| parsed))
}

/// Curated violations shipped with the service, loaded from a versioned JSON file.
pub struct SeedAdapter {
    path: PathBuf,
    schema: JSONSchema,
}

#[derive(Debug, Deserialize)]
struct SeedFile {
    dataset_version: String,
    violations: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct SeedViolation {
    source_id: String,
    facility_name: String,
    location: Option<String>,
    state: Option<String>,
    county: Option<String>,
    latitude: Option<f64>,
    longitude: Option<f64>,
    violation_type: Option<String>,
    description: Option<String>,
    severity: String,
    date: Option<String>,
    penalty_amount: Option<f64>,
}

impl SeedAdapter {
    pub fn new(config: &SeedSourceConfig) -> Result<Self> {
        let schema = JSONSchema::options()
            .compile(schema_json()?)
            .map_err(|e| TrackerError::Config(format!("seed schema does not compile: {e}")))?;
        Ok(Self {
            path: config.path.clone(),
            schema,
        })
    }

    fn validate_entry(&self, entry: &Value) -> std::result::Result<(), String> {
        if let Err(errors) = self.schema.validate(entry) {
            let messages: Vec<String> = errors
                .map(|e| {
                    let at = e.instance_path.to_string();
                    if at.is_empty() {
                        e.to_string()
                    } else {
                        format!("{e} at {at}")
                    }
                })
                .collect();
            return Err(messages.join("; "));
        }
        Ok(())
    }
}

fn file_digest(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

#[async_trait::async_trait]
impl SourceAdapter for SeedAdapter {
    fn name(&self) -> &'static str {
        constants::SEED_ADAPTER
    }

    fn source(&self) -> Source {
        Source::Seed
    }

    /// The whole file is one page. The checkpoint is the file's SHA-256, so an
    /// unchanged file yields nothing on incremental runs.
    #[instrument(skip(self, _ctx, since, _page), fields(adapter = constants::SEED_ADAPTER, path = %self.path.display()))]
    async fn fetch_page(
        &self,
        _ctx: &RunContext,
        since: Option<&str>,
        _page: Option<&Value>,
    ) -> Result<RecordPage> {
        let bytes = tokio::fs::read(&self.path).await.map_err(|e| {
            TrackerError::fetch(
                constants::SEED_ADAPTER,
                format!("cannot read {}: {}", self.path.display(), e),
            )
        })?;
        let digest = file_digest(&bytes);
        if since == Some(digest.as_str()) {
            debug!("seed file unchanged since last run");
            return Ok(RecordPage {
                checkpoint: Some(digest),
                ..RecordPage::default()
            });
        }

        let file: SeedFile = serde_json::from_slice(&bytes)
            .map_err(|e| TrackerError::schema(constants::SEED_ADAPTER, format!("seed file: {e}")))?;
        info!(
            dataset_version = %file.dataset_version,
            entries = file.violations.len(),
            "loading seed dataset"
        );

        let mut page = RecordPage {
            checkpoint: Some(digest),
            ..RecordPage::default()
        };
        for (index, entry) in file.violations.into_iter().enumerate() {
            let item_ref = entry
                .get("source_id")
                .and_then(|v| v.as_str())
                .map(|s| s.to_string())
                .unwrap_or_else(|| format!("#{index}"));
            if let Err(message) = self.validate_entry(&entry) {
                page.rejected.push(SchemaRejection { item_ref, message });
                continue;
            }
            match serde_json::from_value::<SeedViolation>(entry.clone()) {
                Ok(seed) => page.records.push(seed_to_raw(seed, entry)),
                Err(e) => page.rejected.push(SchemaRejection {
                    item_ref,
                    message: e.to_string(),
                }),
            }
        }
        Ok(page)
    }
}

fn seed_to_raw(seed: SeedViolation, payload: Value) -> RawRecord {
    RawRecord {
        source: Source::Seed,
        source_id: seed.source_id,
        facility_name: seed.facility_name,
        location: seed.location,
        state: seed.state,
        county: seed.county,
        latitude: seed.latitude,
        longitude: seed.longitude,
        violation_type: seed.violation_type,
        description: seed.description,
        severity: Some(seed.severity),
        date: seed.date,
        penalty_amount: seed.penalty_amount,
        payload,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;

    fn adapter_for(content: &str) -> (SeedAdapter, tempfile::NamedTempFile) {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        let config = SeedSourceConfig {
            enabled: true,
            path: file.path().to_path_buf(),
        };
        (SeedAdapter::new(&config).unwrap(), file)
    }

    #[tokio::test]
    async fn invalid_entries_are_rejected_not_fatal() {
        let content = json!({
            "dataset_version": "test",
            "violations": [
                {"source_id": "ok-1", "facility_name": "Farm", "severity": "High", "state": "AR"},
                {"source_id": "bad-1", "facility_name": "Farm", "severity": "Low", "penalty_amount": -5},
                {"facility_name": "No id", "severity": "Low"},
                {"source_id": "ok-2", "facility_name": "Farm", "severity": "Severe", "date": "06/14/2023"}
            ]
        })
        .to_string();
        let (adapter, _file) = adapter_for(&content);
        let ctx = RunContext::new(false);

        let page = adapter.fetch_page(&ctx, None, None).await.unwrap();
        assert_eq!(page.records.len(), 2);
        assert_eq!(page.records[0].source_id, "ok-1");
        // vocabulary and date formats are left to the normalizer
        assert_eq!(page.records[1].severity.as_deref(), Some("Severe"));
        assert_eq!(page.records[1].date.as_deref(), Some("06/14/2023"));
        assert_eq!(page.rejected.len(), 2);
        assert_eq!(page.rejected[0].item_ref, "bad-1");
        assert_eq!(page.rejected[1].item_ref, "#2");
        assert!(page.next_page.is_none());
        assert_eq!(page.checkpoint.as_deref(), Some(file_digest(content.as_bytes()).as_str()));
    }

    #[tokio::test]
    async fn unchanged_file_yields_nothing_incrementally() {
        let content = r#"{"dataset_version":"t","violations":[{"source_id":"a","facility_name":"F","severity":"Low"}]}"#;
        let (adapter, _file) = adapter_for(content);
        let ctx = RunContext::new(false);
        let digest = file_digest(content.as_bytes());

        let page = adapter.fetch_page(&ctx, Some(&digest), None).await.unwrap();
        assert!(page.records.is_empty());
        assert_eq!(page.checkpoint.as_deref(), Some(digest.as_str()));

        let page = adapter.fetch_page(&ctx, Some("stale"), None).await.unwrap();
        assert_eq!(page.records.len(), 1);
    }

    #[tokio::test]
    async fn missing_file_is_a_fetch_error() {
        let config = SeedSourceConfig {
            enabled: true,
            path: PathBuf::from("/nonexistent/seed.json"),
        };
        let adapter = SeedAdapter::new(&config).unwrap();
        let err = adapter
            .fetch_page(&RunContext::new(false), None, None)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "adapter_fetch_error");
    }
}
