use jsonschema::JSONSchema;
use serde_json::json;

fn compiled_schema() -> JSONSchema {
    let schema = include_str!("../schemas/seed_violation.v1.json");
    let schema_json: serde_json::Value = serde_json::from_str(schema).unwrap();
    let schema_static: &'static serde_json::Value = Box::leak(Box::new(schema_json));
    JSONSchema::options().compile(schema_static).unwrap()
}

fn shipped_entries() -> Vec<serde_json::Value> {
    let file: serde_json::Value =
        serde_json::from_str(include_str!("../data/seed_violations.json")).unwrap();
    file["violations"].as_array().unwrap().clone()
}

#[test]
fn shipped_seed_entries_are_valid() {
    let compiled = compiled_schema();
    let entries = shipped_entries();
    assert!(!entries.is_empty());
    for entry in &entries {
        assert!(compiled.is_valid(entry), "invalid seed entry: {}", entry["source_id"]);
    }
}

#[test]
fn shipped_source_ids_are_unique() {
    let entries = shipped_entries();
    let mut ids: Vec<&str> = entries.iter().map(|e| e["source_id"].as_str().unwrap()).collect();
    ids.sort_unstable();
    ids.dedup();
    assert_eq!(ids.len(), entries.len());
}

#[test]
fn severity_and_date_vocabulary_is_left_to_the_normalizer() {
    let compiled = compiled_schema();
    let mut entry = shipped_entries().remove(0);
    for severity in ["Severe", "high", "Class I"] {
        entry["severity"] = json!(severity);
        assert!(compiled.is_valid(&entry), "{severity}");
    }
    entry["severity"] = json!("");
    assert!(!compiled.is_valid(&entry));

    entry["severity"] = json!("High");
    for date in [json!("06/14/2023"), json!("20230614"), json!("sometime"), json!(null)] {
        entry["date"] = date.clone();
        assert!(compiled.is_valid(&entry), "{date}");
    }
    entry["date"] = json!(20230614);
    assert!(!compiled.is_valid(&entry));
}

#[test]
fn unexpected_fields_and_missing_names_are_rejected() {
    let compiled = compiled_schema();
    let mut extra = shipped_entries().remove(0);
    extra["inspector"] = json!("someone");
    assert!(!compiled.is_valid(&extra));

    let mut unnamed = shipped_entries().remove(0);
    unnamed.as_object_mut().unwrap().remove("facility_name");
    assert!(!compiled.is_valid(&unnamed));

    let mut negative = shipped_entries().remove(0);
    negative["penalty_amount"] = json!(-5);
    assert!(!compiled.is_valid(&negative));
}
