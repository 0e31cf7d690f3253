/// Canonical schema constants shared by the normalizer, the validator and the exporters

// Canonical field names, in export order
pub const FIELD_TYPE: &str = "type";
pub const FIELD_ARTICLE: &str = "article";
pub const FIELD_AMOUNT: &str = "amount";
pub const FIELD_YEAR: &str = "year";

pub const CANONICAL_HEADER: [&str; 4] = [FIELD_TYPE, FIELD_ARTICLE, FIELD_AMOUNT, FIELD_YEAR];

// Sentinel for a year none of the inference rules could resolve
pub const UNKNOWN_YEAR: &str = "UNKNOWN";

// Fallback type when neither the table title nor the oracle supplies one
pub const UNCLASSIFIED_TYPE: &str = "Unclassified";

// Suffix used when an article collapses to a bare period label once its year is lifted out
pub const PERIOD_LABEL_SUFFIX: &str = "Forecast";

// Defaults for the generation service
pub const DEFAULT_ENDPOINT: &str = "https://api.groq.com/openai/v1/chat/completions";
pub const DEFAULT_MODEL: &str = "llama-3.3-70b-versatile";

// Env vars holding provider keys, tried in this order on rate limits
pub const API_KEY_VARS: [&str; 3] = [
    "GENERATION_API_KEY",
    "GENERATION_API_KEY_2",
    "GENERATION_API_KEY_3",
];

/// Returns true when `header` is exactly the canonical export header
pub fn is_canonical_header<S: AsRef<str>>(header: &[S]) -> bool {
    header.len() == CANONICAL_HEADER.len()
        && header
            .iter()
            .zip(CANONICAL_HEADER.iter())
            .all(|(h, c)| h.as_ref().trim() == *c)
}
