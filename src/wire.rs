//! Persisted representation shared with the availability service:
//! times of day as 24-hour `HH:MM`, dates as `YYYY-MM-DD` (chrono's default).

use crate::error::ValidationError;
use chrono::NaiveTime;
use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref HHMM: Regex = Regex::new(r"^([01][0-9]|2[0-3]):[0-5][0-9]$").unwrap();
}

pub fn is_hhmm(raw: &str) -> bool {
    HHMM.is_match(raw)
}

pub fn parse_time(raw: &str) -> Result<NaiveTime, ValidationError> {
    if !is_hhmm(raw) {
        return Err(ValidationError::InvalidTimeFormat(raw.to_string()));
    }
    NaiveTime::parse_from_str(raw, "%H:%M")
        .map_err(|_| ValidationError::InvalidTimeFormat(raw.to_string()))
}

pub fn format_time(time: NaiveTime) -> String {
    time.format("%H:%M").to_string()
}

/// Used by the `validator` derive on HTTP request bodies.
pub fn validate_hhmm(raw: &str) -> Result<(), validator::ValidationError> {
    if is_hhmm(raw) {
        Ok(())
    } else {
        Err(validator::ValidationError::new("hhmm"))
    }
}

pub mod hhmm {
    use chrono::NaiveTime;
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(time: &NaiveTime, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&super::format_time(*time))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<NaiveTime, D::Error> {
        let raw = String::deserialize(deserializer)?;
        super::parse_time(&raw).map_err(D::Error::custom)
    }

    pub mod option {
        use chrono::NaiveTime;
        use serde::{de::Error, Deserialize, Deserializer, Serializer};

        pub fn serialize<S: Serializer>(
            time: &Option<NaiveTime>,
            serializer: S,
        ) -> Result<S::Ok, S::Error> {
            match time {
                Some(time) => serializer.serialize_some(&super::super::format_time(*time)),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> Result<Option<NaiveTime>, D::Error> {
            let raw: Option<String> = Option::deserialize(deserializer)?;
            raw.map(|raw| super::super::parse_time(&raw).map_err(D::Error::custom))
                .transpose()
        }
    }
}
