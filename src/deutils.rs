// src/deutils.rs
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum DecodeError {
    #[error("not a number: {0:?}")]
    NotANumber(String),
    #[error("missing field {0}")]
    Missing(&'static str),
    #[error("bad document: {0}")]
    Document(String),
}

/// LMS hands back durations as either JSON numbers or numeric strings.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum NumberOrText {
    Number(f64),
    Text(String),
}

impl Default for NumberOrText {
    fn default() -> Self {
        NumberOrText::Number(0.0)
    }
}

impl NumberOrText {
    /// Seconds, an unparsable string is an error rather than zero.
    pub fn seconds(&self) -> Result<f64, DecodeError> {
        match self {
            NumberOrText::Number(n) => Ok(*n),
            NumberOrText::Text(s) => {
                let t = s.trim();
                if t.is_empty() {
                    return Ok(0.0);
                }
                t.parse::<f64>()
                    .map_err(|_| DecodeError::NotANumber(s.clone()))
            }
        }
    }
}

pub fn deserialize_bool_from_anything<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    let v = Value::deserialize(deserializer)?;
    let s = v.to_string().trim_matches('"').trim().to_lowercase();
    match s.as_str() {
        "1" | "true" | "yes" | "y" | "t" => Ok(true),
        "0" | "false" | "no" | "n" | "f" | "" | "null" => Ok(false),
        _ => Err(serde::de::Error::invalid_value(
            serde::de::Unexpected::Str(s.as_str()),
            &"expected boolean representation",
        )),
    }
}

pub fn deserialize_numeric_u8<'de, D>(deserializer: D) -> Result<u8, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error;
    let v = Value::deserialize(deserializer)?;
    let n: i64 = v
        .as_i64()
        .or_else(|| v.as_f64().map(|f| f as i64))
        .or_else(|| v.as_str().and_then(|s| s.trim().parse().ok()))
        .ok_or_else(|| D::Error::custom("non-integer"))?;
    n.try_into().map_err(|_| D::Error::custom("overflow"))
}

/// Numbers or numeric strings to `i32`, empty string is zero.
pub fn deserialize_numeric_i32<'de, D>(deserializer: D) -> Result<i32, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error;
    let v = Value::deserialize(deserializer)?;
    if v.is_null() || v.as_str().is_some_and(|s| s.trim().is_empty()) {
        return Ok(0);
    }
    let n: i64 = v
        .as_i64()
        .or_else(|| v.as_f64().map(|f| f as i64))
        .or_else(|| v.as_str().and_then(|s| s.trim().parse().ok()))
        .ok_or_else(|| D::Error::custom("non-integer"))?;
    n.try_into().map_err(|_| D::Error::custom("overflow"))
}

/// Any scalar as a string, LMS is loose about ids and counters.
pub fn deserialize_string_from_anything<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let v = Value::deserialize(deserializer)?;
    Ok(match v {
        Value::Null => String::new(),
        Value::String(s) => s,
        other => other.to_string(),
    })
}

/// Converts total seconds into "HH:MM:SS" or "MM:SS".
/// If hours is zero, only MM:SS is surfaced.
pub fn seconds_to_hms(total_seconds: f64) -> String {
    let total = total_seconds.max(0.0) as u64;
    let hours = total / 3600;
    let minutes = (total % 3600) / 60;
    let seconds = total % 60;

    if hours > 0 {
        format!("{:02}:{:02}:{:02}", hours, minutes, seconds)
    } else {
        format!("{:02}:{:02}", minutes, seconds)
    }
}

/// All the numbers in a free form string, "63 F 17 C" -> [63, 17].
pub fn scan_numbers(s: &str) -> Vec<f64> {
    s.split(|c: char| !(c.is_ascii_digit() || c == '.' || c == '-'))
        .filter(|t| !t.is_empty() && *t != "-" && *t != ".")
        .filter_map(|t| t.parse().ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Deserialize)]
    struct Probe {
        time: NumberOrText,
        #[serde(deserialize_with = "deserialize_bool_from_anything")]
        flag: bool,
        #[serde(deserialize_with = "deserialize_numeric_u8")]
        vol: u8,
    }

    #[test]
    fn number_or_text_accepts_both() {
        let p: Probe = serde_json::from_str(r#"{"time":"12.5","flag":"1","vol":"40"}"#).unwrap();
        assert_eq!(p.time.seconds().unwrap(), 12.5);
        assert!(p.flag);
        assert_eq!(p.vol, 40);
        let p: Probe = serde_json::from_str(r#"{"time":301,"flag":0,"vol":7}"#).unwrap();
        assert_eq!(p.time.seconds().unwrap(), 301.0);
        assert!(!p.flag);
    }

    #[test]
    fn unparsable_duration_is_an_error() {
        let t = NumberOrText::Text("soon".into());
        assert_eq!(t.seconds(), Err(DecodeError::NotANumber("soon".into())));
    }

    #[test]
    fn hms_formatting() {
        assert_eq!(seconds_to_hms(59.9), "00:59");
        assert_eq!(seconds_to_hms(3725.0), "01:02:05");
    }

    #[test]
    fn scans_numbers_from_text() {
        assert_eq!(scan_numbers("63 F 17 C"), vec![63.0, 17.0]);
        assert_eq!(scan_numbers("-4°F / -20°C"), vec![-4.0, -20.0]);
        assert!(scan_numbers("n/a").is_empty());
    }
}
