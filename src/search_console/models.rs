use serde::{Deserialize, Serialize};

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SiteList {
    #[serde(default)]
    pub site_entry: Vec<SiteEntry>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SiteEntry {
    pub site_url: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchAnalyticsQuery {
    pub start_date: String,
    pub end_date: String,
    pub dimensions: Vec<String>,
    pub row_limit: u32,
    pub start_row: u32,
}

#[derive(Debug, Default, Deserialize)]
pub struct SearchAnalyticsResponse {
    #[serde(default)]
    pub rows: Vec<SearchAnalyticsRow>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SearchAnalyticsRow {
    #[serde(default)]
    pub keys: Vec<String>,
    #[serde(default, deserialize_with = "deserialize_count")]
    pub clicks: u64,
    #[serde(default, deserialize_with = "deserialize_count")]
    pub impressions: u64,
    #[serde(default)]
    pub ctr: f64,
    #[serde(default)]
    pub position: f64,
}

// The API reports counts as JSON doubles ("clicks": 12.0).
fn deserialize_count<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum CountValue {
        Integer(u64),
        Float(f64),
        Text(String),
    }

    match CountValue::deserialize(deserializer)? {
        CountValue::Integer(value) => Ok(value),
        CountValue::Float(value) if value >= 0.0 && value.fract() == 0.0 && value <= u64::MAX as f64 => {
            Ok(value as u64)
        }
        CountValue::Float(value) => Err(serde::de::Error::custom(format!(
            "expected a non-negative whole count, got {value}"
        ))),
        CountValue::Text(value) => value.parse::<u64>().map_err(serde::de::Error::custom),
    }
}
