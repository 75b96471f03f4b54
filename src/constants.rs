/// Adapter name constants to ensure consistency across the codebase.
/// These are the names used on the CLI, in run summaries and as cursor keys.
pub const SEED_ADAPTER: &str = "seed";
pub const OPENFDA_ADAPTER: &str = "openfda";
pub const EPA_ECHO_ADAPTER: &str = "epa_echo";

/// Get all supported adapter names, in the order a run starts them
pub fn get_supported_adapters() -> Vec<&'static str> {
    vec![SEED_ADAPTER, OPENFDA_ADAPTER, EPA_ECHO_ADAPTER]
}

/// Accept a few friendlier spellings on the CLI
pub fn adapter_name_to_internal(name: &str) -> String {
    match name.trim().to_lowercase().as_str() {
        "epa" | "echo" | "epa-echo" | "epa_echo" => EPA_ECHO_ADAPTER.to_string(),
        "fda" | "fsis" | "open_fda" | "openfda" => OPENFDA_ADAPTER.to_string(),
        "seed" | "seed_data" => SEED_ADAPTER.to_string(),
        other => other.to_string(),
    }
}

// EPA ECHO (Clean Water Act facility search)
pub const EPA_ECHO_BASE_URL: &str = "https://echodata.epa.gov/echo";
pub const EPA_ECHO_VIOLATION_TYPE: &str = "Clean Water Act - CAFO";

/// SIC codes for livestock operations
pub const CAFO_SIC_CODES: [&str; 5] = ["0211", "0213", "0251", "0252", "0253"];

pub fn sic_name(sic_code: &str) -> Option<&'static str> {
    match sic_code {
        "0211" => Some("Beef Cattle Feedlots"),
        "0213" => Some("Hog Operations"),
        "0251" => Some("Broiler/Fryer Chickens"),
        "0252" => Some("Egg Production"),
        "0253" => Some("Turkey Operations"),
        _ => None,
    }
}

// openFDA food enforcement (FSIS-regulated meat and poultry recalls)
pub const OPENFDA_URL: &str = "https://api.fda.gov/food/enforcement.json";
pub const OPENFDA_VIOLATION_TYPE: &str = "Food Safety Recall - Meat/Poultry";
/// openFDA refuses `limit` above this
pub const OPENFDA_MAX_LIMIT: u32 = 100;

/// Search terms for meat/poultry/livestock products
pub const OPENFDA_SEARCH_QUERIES: [&str; 12] = [
    r#"product_description:"chicken""#,
    r#"product_description:"beef""#,
    r#"product_description:"pork""#,
    r#"product_description:"turkey""#,
    r#"product_description:"poultry""#,
    r#"product_description:"meat""#,
    r#"product_description:"sausage""#,
    r#"product_description:"ground beef""#,
    r#"reason_for_recall:"FSIS""#,
    r#"reason_for_recall:"salmonella""#,
    r#"reason_for_recall:"E. coli""#,
    r#"reason_for_recall:"listeria""#,
];

// Seed dataset
pub const SEED_DATA_PATH: &str = "data/seed_violations.json";

/// Descriptions longer than this are cut and suffixed with "..."
pub const MAX_DESCRIPTION_CHARS: usize = 2000;
