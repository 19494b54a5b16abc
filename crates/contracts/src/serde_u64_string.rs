//! Seeds travel as decimal strings so JSON consumers never round them through f64.
//! Reads accept a decimal string, a `0x`-prefixed hex string, or a bare number.

use serde::de::Error;
use serde::{Deserialize, Deserializer, Serializer};

pub fn serialize<S>(value: &u64, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(&value.to_string())
}

pub fn deserialize<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum SeedInput {
        Text(String),
        Number(u64),
    }

    match SeedInput::deserialize(deserializer)? {
        SeedInput::Text(raw) => parse_seed(&raw).map_err(D::Error::custom),
        SeedInput::Number(value) => Ok(value),
    }
}

fn parse_seed(raw: &str) -> Result<u64, String> {
    let trimmed = raw.trim();
    let parsed = match trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
    {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => trimmed.parse::<u64>(),
    };
    parsed.map_err(|err| format!("invalid seed {raw:?}: {err}"))
}

#[cfg(test)]
mod tests {
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
    struct Wrapper {
        #[serde(with = "super")]
        seed: u64,
    }

    #[test]
    fn reads_decimal_hex_and_number() {
        let decimal: Wrapper = serde_json::from_str(r#"{"seed":"1337"}"#).expect("decimal seed");
        let hex: Wrapper = serde_json::from_str(r#"{"seed":"0x539"}"#).expect("hex seed");
        let number: Wrapper = serde_json::from_str(r#"{"seed":1337}"#).expect("numeric seed");
        assert_eq!(decimal.seed, 1337);
        assert_eq!(hex.seed, 1337);
        assert_eq!(number.seed, 1337);
    }

    #[test]
    fn rejects_garbage() {
        assert!(serde_json::from_str::<Wrapper>(r#"{"seed":"twelve"}"#).is_err());
    }

    #[test]
    fn writes_decimal_string() {
        let encoded = serde_json::to_string(&Wrapper { seed: 42 }).expect("serialize");
        assert_eq!(encoded, r#"{"seed":"42"}"#);
    }
}
