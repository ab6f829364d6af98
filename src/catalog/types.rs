use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Placeholder for a requirement block the catalog does not provide
pub const NOT_SPECIFIED: &str = "Not specified";

/// One catalog search hit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameRecord {
    #[serde(rename = "appid", deserialize_with = "deserialize_app_id")]
    pub catalog_id: u64,
    pub name: String,
}

/// PC requirements of one game, markup already stripped
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RequirementSet {
    pub game_name: String,
    pub minimum_text: String,
    pub recommended_text: String,
}

impl RequirementSet {
    pub fn has_minimum(&self) -> bool {
        self.minimum_text != NOT_SPECIFIED
    }

    pub fn has_recommended(&self) -> bool {
        self.recommended_text != NOT_SPECIFIED
    }
}

/// The search endpoint sends `"appid": "220"`, other Steam endpoints send numbers.
fn deserialize_app_id<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::Number(n) => n
            .as_u64()
            .ok_or_else(|| serde::de::Error::custom("appid out of range")),
        Value::String(s) => s.trim().parse::<u64>().map_err(serde::de::Error::custom),
        other => Err(serde::de::Error::custom(format!(
            "unexpected appid: {}",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn app_id_as_string_or_number() {
        let records: Vec<GameRecord> = serde_json::from_str(
            r#"[{"appid":"220","name":"Half-Life 2","icon":"x.jpg"},{"appid":620,"name":"Portal 2"}]"#,
        )
        .unwrap();
        assert_eq!(records[0].catalog_id, 220);
        assert_eq!(records[1].catalog_id, 620);
        assert_eq!(records[1].name, "Portal 2");
    }

    #[test]
    fn non_numeric_app_id_is_rejected() {
        let parsed: Result<GameRecord, _> =
            serde_json::from_str(r#"{"appid":"abc","name":"Broken"}"#);
        assert!(parsed.is_err());
    }
}
