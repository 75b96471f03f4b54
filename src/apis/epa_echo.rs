use crate::apis::http::{FetchOutcome, JsonFetcher, RetryPolicy};
use crate::apis::{join_present, lenient_f64, lenient_string};
use crate::config::{EpaEchoSourceConfig, RetryConfig};
use crate::constants;
use crate::domain::Source;
use crate::error::{Result, TrackerError};
use crate::pipeline::run::RunContext;
use crate::types::{RawRecord, RecordPage, SchemaRejection, SourceAdapter};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// Clean Water Act CAFO facilities from EPA ECHO.
///
/// ECHO answers a facility search with a query id (QID) that is then paged
/// through; both calls may answer `"Working"` while the query is still being
/// prepared and have to be polled.
pub struct EpaEchoAdapter {
    fetcher: JsonFetcher,
    base_url: String,
    sic_codes: Vec<String>,
    max_per_sic: u32,
    page_size: u32,
    poll_attempts: u32,
    page_poll_attempts: u32,
    poll_interval: Duration,
    run_timeout: Option<Duration>,
}

/// Position in the SIC code / QID page walk
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct EchoCursor {
    sic_index: usize,
    qid: Option<String>,
    page: u32,
    pages: u32,
}

#[derive(Debug, Deserialize)]
struct EchoEnvelope {
    #[serde(rename = "Results", default)]
    results: EchoResults,
}

#[derive(Debug, Default, Deserialize)]
struct EchoResults {
    #[serde(rename = "Message", default, deserialize_with = "lenient_string")]
    message: Option<String>,
    #[serde(rename = "QueryRows", default, deserialize_with = "lenient_string")]
    query_rows: Option<String>,
    #[serde(rename = "QueryID", default, deserialize_with = "lenient_string")]
    query_id: Option<String>,
    #[serde(rename = "Facilities", default)]
    facilities: Vec<Value>,
}

impl EchoResults {
    fn is_working(&self) -> bool {
        self.message.as_deref() == Some("Working")
    }
}

/// One facility row of a `get_qid` page
#[derive(Debug, Default, Deserialize)]
pub(crate) struct EchoFacility {
    #[serde(rename = "CWPName", default, deserialize_with = "lenient_string")]
    pub name: Option<String>,
    #[serde(rename = "SourceID", default, deserialize_with = "lenient_string")]
    pub source_id: Option<String>,
    #[serde(rename = "CWPStreet", default, deserialize_with = "lenient_string")]
    pub street: Option<String>,
    #[serde(rename = "CWPCity", default, deserialize_with = "lenient_string")]
    pub city: Option<String>,
    #[serde(rename = "CWPState", default, deserialize_with = "lenient_string")]
    pub state: Option<String>,
    #[serde(rename = "CWPCounty", default, deserialize_with = "lenient_string")]
    pub county: Option<String>,
    #[serde(rename = "FacLat", default, deserialize_with = "lenient_f64")]
    pub latitude: Option<f64>,
    #[serde(rename = "FacLong", default, deserialize_with = "lenient_f64")]
    pub longitude: Option<f64>,
    #[serde(rename = "CWPComplianceStatus", default, deserialize_with = "lenient_string")]
    pub compliance_status: Option<String>,
    #[serde(rename = "CWPSNCStatus", default, deserialize_with = "lenient_string")]
    pub snc_status: Option<String>,
    #[serde(rename = "CWPQtrsWithNC", default, deserialize_with = "lenient_string")]
    pub quarters_in_nc: Option<String>,
    #[serde(rename = "CWPPermitStatusDesc", default, deserialize_with = "lenient_string")]
    pub permit_status: Option<String>,
    #[serde(rename = "CWPDateLastInspection", default, deserialize_with = "lenient_string")]
    pub last_inspection: Option<String>,
    #[serde(rename = "CWPDateLastPenalty", default, deserialize_with = "lenient_string")]
    pub last_penalty_date: Option<String>,
    #[serde(rename = "CWPTotalPenalties", default, deserialize_with = "lenient_string")]
    pub total_penalties: Option<String>,
    #[serde(rename = "CWPFormalEaCount", default, deserialize_with = "lenient_string")]
    pub formal_ea_count: Option<String>,
}

impl EpaEchoAdapter {
    pub fn new(config: &EpaEchoSourceConfig, retry: &RetryConfig) -> Result<Self> {
        if config.sic_codes.is_empty() {
            return Err(TrackerError::Config(
                "sources.epa_echo.sic_codes must not be empty".into(),
            ));
        }
        Ok(Self {
            fetcher: JsonFetcher::new(
                constants::EPA_ECHO_ADAPTER,
                Duration::from_secs(config.timeout_seconds),
                config.requests_per_min,
                RetryPolicy::from(retry),
            )?,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            sic_codes: config.sic_codes.clone(),
            max_per_sic: config.max_per_sic,
            page_size: config.page_size,
            poll_attempts: config.poll_attempts,
            page_poll_attempts: config.page_poll_attempts,
            poll_interval: Duration::from_millis(config.poll_interval_ms),
            run_timeout: config.run_timeout_seconds.map(Duration::from_secs),
        })
    }

    async fn get_results(&self, endpoint: &str, query: &[(&str, String)]) -> Result<EchoResults> {
        let url = format!("{}/{}", self.base_url, endpoint);
        match self.fetcher.get_json(&url, query).await? {
            FetchOutcome::Json(body) => {
                let envelope: EchoEnvelope = serde_json::from_value(body).map_err(|e| {
                    TrackerError::schema(constants::EPA_ECHO_ADAPTER, format!("{endpoint}: {e}"))
                })?;
                Ok(envelope.results)
            }
            FetchOutcome::NotFound => Err(TrackerError::fetch(
                constants::EPA_ECHO_ADAPTER,
                format!("{endpoint} returned 404"),
            )),
        }
    }

    /// Start the facility search for one SIC code. Returns `(qid, rows)`, or
    /// `None` when there is nothing to page through.
    async fn start_query(&self, sic_code: &str) -> Result<Option<(String, u64)>> {
        let query = [
            ("output", "JSON".to_string()),
            ("p_sic", sic_code.to_string()),
            ("p_qiv", "V".to_string()),
            ("responseset", "0".to_string()),
        ];
        let mut results = self
            .get_results("cwa_rest_services.get_facilities", &query)
            .await?;

        let mut attempts = 0;
        while results.is_working() && attempts < self.poll_attempts {
            attempts += 1;
            debug!(sic_code, attempts, "ECHO query still working, polling");
            tokio::time::sleep(self.poll_interval).await;
            results = self
                .get_results("cwa_rest_services.get_facilities", &query)
                .await?;
        }
        if results.is_working() {
            warn!(sic_code, attempts, "ECHO query never finished, skipping SIC code");
            return Ok(None);
        }

        let rows = results
            .query_rows
            .as_deref()
            .and_then(|r| r.parse::<u64>().ok())
            .unwrap_or(0);
        match results.query_id {
            Some(qid) if rows > 0 => Ok(Some((qid, rows))),
            _ => Ok(None),
        }
    }

    async fn fetch_qid_page(&self, sic_code: &str, qid: &str, page: u32) -> Result<Vec<Value>> {
        let query = [
            ("qid", qid.to_string()),
            ("output", "JSON".to_string()),
            ("responseset", page.to_string()),
            ("pagesize", self.page_size.to_string()),
        ];
        for attempt in 1..=self.page_poll_attempts.max(1) {
            let results = self.get_results("cwa_rest_services.get_qid", &query).await?;
            if !results.is_working() {
                return Ok(results.facilities);
            }
            debug!(sic_code, page, attempt, "ECHO page still working, polling");
            tokio::time::sleep(self.poll_interval).await;
        }
        warn!(sic_code, page, "ECHO page never finished, skipping it");
        Ok(Vec::new())
    }

    fn pages_for(&self, rows: u64) -> u32 {
        let wanted = rows.min(self.max_per_sic as u64);
        let size = self.page_size.max(1) as u64;
        wanted.div_ceil(size) as u32
    }

    fn advance(&self, sic_index: usize) -> Option<Value> {
        let next = sic_index + 1;
        if next >= self.sic_codes.len() {
            return None;
        }
        serde_json::to_value(EchoCursor {
            sic_index: next,
            ..EchoCursor::default()
        })
        .ok()
    }
}

#[async_trait::async_trait]
impl SourceAdapter for EpaEchoAdapter {
    fn name(&self) -> &'static str {
        constants::EPA_ECHO_ADAPTER
    }

    fn source(&self) -> Source {
        Source::EpaEcho
    }

    fn run_timeout(&self) -> Option<Duration> {
        self.run_timeout
    }

    // ECHO has no modified-since filter, so `since` is ignored
    #[instrument(skip(self, _ctx, _since, page), fields(adapter = constants::EPA_ECHO_ADAPTER))]
    async fn fetch_page(
        &self,
        _ctx: &RunContext,
        _since: Option<&str>,
        page: Option<&Value>,
    ) -> Result<RecordPage> {
        let mut cursor: EchoCursor = match page {
            Some(token) => serde_json::from_value(token.clone()).map_err(|e| {
                TrackerError::schema(constants::EPA_ECHO_ADAPTER, format!("bad page token: {e}"))
            })?,
            None => EchoCursor::default(),
        };
        let Some(sic_code) = self.sic_codes.get(cursor.sic_index) else {
            return Ok(RecordPage::default());
        };

        if cursor.qid.is_none() {
            match self.start_query(sic_code).await? {
                Some((qid, rows)) => {
                    info!(sic_code, rows, "ECHO facilities found for {}", constants::sic_name(sic_code).unwrap_or("unknown SIC"));
                    cursor.qid = Some(qid);
                    cursor.page = 1;
                    cursor.pages = self.pages_for(rows);
                }
                None => {
                    info!(sic_code, "no ECHO facilities in violation");
                    return Ok(RecordPage {
                        next_page: self.advance(cursor.sic_index),
                        ..RecordPage::default()
                    });
                }
            }
        }
        let qid = cursor.qid.clone().unwrap_or_default();

        let facilities = self.fetch_qid_page(sic_code, &qid, cursor.page).await?;
        let already = (cursor.page.saturating_sub(1) as u64) * self.page_size as u64;
        let room = (self.max_per_sic as u64).saturating_sub(already) as usize;

        let mut out = RecordPage::default();
        for (index, item) in facilities.into_iter().take(room).enumerate() {
            let item_ref = item
                .get("SourceID")
                .and_then(|v| v.as_str())
                .map(|s| s.to_string())
                .unwrap_or_else(|| format!("{sic_code}/page{}/#{index}", cursor.page));
            let mapped = serde_json::from_value::<EchoFacility>(item.clone())
                .map_err(|e| TrackerError::schema(constants::EPA_ECHO_ADAPTER, e.to_string()))
                .and_then(|facility| facility_to_raw(facility, sic_code, item));
            match mapped {
                Ok(Some(record)) => out.records.push(record),
                Ok(None) => out.skipped += 1,
                Err(e) => out.rejected.push(SchemaRejection {
                    item_ref,
                    message: e.to_string(),
                }),
            }
        }

        out.next_page = if cursor.page < cursor.pages {
            cursor.page += 1;
            serde_json::to_value(&cursor).ok()
        } else {
            self.advance(cursor.sic_index)
        };
        Ok(out)
    }
}

/// Map an ECHO facility into a raw violation. `Ok(None)` means the facility
/// is not currently a violation and is skipped.
pub(crate) fn facility_to_raw(
    facility: EchoFacility,
    sic_code: &str,
    payload: Value,
) -> Result<Option<RawRecord>> {
    let source_id = facility.source_id.ok_or_else(|| {
        TrackerError::schema(constants::EPA_ECHO_ADAPTER, "facility without SourceID")
    })?;

    let severity = if facility
        .snc_status
        .as_deref()
        .is_some_and(|s| s.to_uppercase().contains('S'))
    {
        "High"
    } else if facility.compliance_status.as_deref().is_some_and(|s| {
        let status = s.to_lowercase();
        status.contains("violation") && !status.starts_with("no violation")
    }) {
        "Medium"
    } else {
        "Low"
    };

    let quarters: u32 = facility
        .quarters_in_nc
        .as_deref()
        .and_then(|q| q.parse().ok())
        .unwrap_or(0);
    if quarters == 0 && severity == "Low" && facility.last_penalty_date.is_none() {
        return Ok(None);
    }

    let formal_actions = facility.formal_ea_count.filter(|c| c != "0");
    let description = join_present(
        &[
            Some(format!(
                "CAFO Type: {}",
                constants::sic_name(sic_code).unwrap_or(sic_code)
            )),
            facility.permit_status.map(|s| format!("Permit Status: {s}")),
            facility.compliance_status.map(|s| format!("Compliance: {s}")),
            (quarters > 0).then(|| format!("Quarters in Non-Compliance: {quarters}")),
            formal_actions.map(|c| format!("Formal Enforcement Actions: {c}")),
        ],
        ". ",
    );

    let penalty_amount = facility
        .total_penalties
        .as_deref()
        .and_then(|p| p.replace(['$', ','], "").trim().parse::<f64>().ok());

    Ok(Some(RawRecord {
        source: Source::EpaEcho,
        source_id: format!("ECHO-CWA-{source_id}"),
        facility_name: facility.name.unwrap_or_else(|| "Unknown".to_string()),
        location: join_present(
            &[facility.street, facility.city, facility.state.clone()],
            ", ",
        ),
        state: facility.state,
        county: facility.county,
        latitude: facility.latitude,
        longitude: facility.longitude,
        violation_type: Some(constants::EPA_ECHO_VIOLATION_TYPE.to_string()),
        description,
        severity: Some(severity.to_string()),
        date: facility.last_penalty_date.or(facility.last_inspection),
        penalty_amount,
        payload,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn facility(value: Value) -> (EchoFacility, Value) {
        (serde_json::from_value(value.clone()).unwrap(), value)
    }

    #[test]
    fn significant_noncompliance_is_high_severity() {
        let (f, payload) = facility(json!({
            "CWPName": "Example Hog Farm",
            "SourceID": "IA0012345",
            "CWPStreet": "100 County Rd",
            "CWPCity": "Ames",
            "CWPState": "IA",
            "CWPCounty": "Story",
            "FacLat": "42.03",
            "FacLong": -93.62,
            "CWPSNCStatus": "S",
            "CWPComplianceStatus": "Violation Identified",
            "CWPQtrsWithNC": "4",
            "CWPPermitStatusDesc": "Effective",
            "CWPDateLastPenalty": "03/15/2023",
            "CWPDateLastInspection": "01/10/2023",
            "CWPTotalPenalties": "$12,500",
            "CWPFormalEaCount": "2"
        }));
        let record = facility_to_raw(f, "0213", payload).unwrap().unwrap();

        assert_eq!(record.source_id, "ECHO-CWA-IA0012345");
        assert_eq!(record.severity.as_deref(), Some("High"));
        assert_eq!(record.location.as_deref(), Some("100 County Rd, Ames, IA"));
        assert_eq!(record.latitude, Some(42.03));
        assert_eq!(record.date.as_deref(), Some("03/15/2023"));
        assert_eq!(record.penalty_amount, Some(12500.0));
        let description = record.description.unwrap();
        assert!(description.starts_with("CAFO Type: Hog Operations. Permit Status: Effective"));
        assert!(description.contains("Quarters in Non-Compliance: 4"));
        assert!(description.ends_with("Formal Enforcement Actions: 2"));
    }

    #[test]
    fn compliant_facilities_are_skipped() {
        let (f, payload) = facility(json!({
            "CWPName": "Quiet Acres",
            "SourceID": "NE0000001",
            "CWPComplianceStatus": "No Violation Identified",
            "CWPQtrsWithNC": "0",
            "CWPDateLastPenalty": ""
        }));
        assert!(facility_to_raw(f, "0211", payload).unwrap().is_none());

        let (f, payload) = facility(json!({
            "CWPName": "Busy Acres",
            "SourceID": "NE0000002",
            "CWPComplianceStatus": "Violation Identified",
            "CWPQtrsWithNC": "0"
        }));
        let record = facility_to_raw(f, "0211", payload).unwrap().unwrap();
        assert_eq!(record.severity.as_deref(), Some("Medium"));
    }

    #[test]
    fn penalty_date_keeps_low_severity_facility() {
        let (f, payload) = facility(json!({
            "SourceID": "TX9999999",
            "CWPState": "TX",
            "CWPDateLastPenalty": "11/02/2021",
            "CWPTotalPenalties": "not reported"
        }));
        let record = facility_to_raw(f, "0211", payload).unwrap().unwrap();
        assert_eq!(record.severity.as_deref(), Some("Low"));
        assert_eq!(record.facility_name, "Unknown");
        assert_eq!(record.penalty_amount, None);
    }

    #[test]
    fn missing_source_id_is_a_schema_error() {
        let (f, payload) = facility(json!({"CWPName": "No Id Farms", "CWPSNCStatus": "S"}));
        let err = facility_to_raw(f, "0251", payload).unwrap_err();
        assert_eq!(err.kind(), "schema_mapping_error");
    }

    #[test]
    fn cursor_page_count_respects_cap() {
        let mut config = EpaEchoSourceConfig::default();
        config.max_per_sic = 250;
        config.page_size = 100;
        let adapter = EpaEchoAdapter::new(&config, &RetryConfig::default()).unwrap();
        assert_eq!(adapter.pages_for(1000), 3);
        assert_eq!(adapter.pages_for(40), 1);
        assert_eq!(adapter.pages_for(0), 0);
        assert!(adapter.advance(4).is_none());
        assert_eq!(adapter.advance(0).unwrap()["sic_index"], 1);
    }
}
