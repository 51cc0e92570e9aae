//! Structural metadata and observation types exchanged with an SDMX source.

use crate::error::PrismError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Dimension that pins the query to one country or region.
pub const AREA_DIMENSION: &str = "REF_AREA";

/// Dimension carrying the observation period.
pub const TIME_DIMENSION: &str = "TIME_PERIOD";

pub const UNIT_MULT_ATTRIBUTE: &str = "UNIT_MULT";
pub const DECIMALS_ATTRIBUTE: &str = "DECIMALS";

/// Languages the statistical catalog publishes names in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    #[default]
    En,
    Fr,
    Es,
}

impl Language {
    pub fn code(&self) -> &'static str {
        match self {
            Language::En => "en",
            Language::Fr => "fr",
            Language::Es => "es",
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for Language {
    type Err = PrismError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "en" => Ok(Language::En),
            "fr" => Ok(Language::Fr),
            "es" => Ok(Language::Es),
            other => Err(PrismError::Config(format!(
                "Unsupported language '{}', expected one of en, fr, es",
                other
            ))),
        }
    }
}

/// A name published in several languages, keyed by language code.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LocalizedText {
    pub localizations: BTreeMap<String, String>,
}

impl LocalizedText {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, language: Language, text: impl Into<String>) -> Self {
        self.localizations
            .insert(language.code().to_string(), text.into());
        self
    }

    /// Exact lookup for one language.
    pub fn get(&self, language: Language) -> Option<&str> {
        self.localizations.get(language.code()).map(String::as_str)
    }

    /// Lookup falling back to English, which every catalog entry carries.
    pub fn localized(&self, language: Language) -> Option<&str> {
        self.get(language).or_else(|| self.get(Language::En))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Code {
    pub id: String,
    pub name: LocalizedText,
}

impl Code {
    pub fn new(id: impl Into<String>, name: LocalizedText) -> Self {
        Self {
            id: id.into(),
            name,
        }
    }
}

/// Enumerated values of one dimension.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Codelist {
    pub id: String,
    pub name: LocalizedText,
    pub codes: Vec<Code>,
}

impl Codelist {
    pub fn get(&self, id: &str) -> Option<&Code> {
        self.codes.iter().find(|code| code.id == id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dimension {
    pub id: String,
    /// Concept name, used when the dimension has no codelist.
    pub name: LocalizedText,
    pub codelist: Option<Codelist>,
}

impl Dimension {
    pub fn is_time(&self) -> bool {
        self.id == TIME_DIMENSION
    }

    /// Display name: the codelist's name when enumerated, otherwise the concept name.
    pub fn display_name(&self, language: Language) -> Option<&str> {
        self.codelist
            .as_ref()
            .and_then(|cl| cl.name.localized(language))
            .or_else(|| self.name.localized(language))
    }
}

/// Data structure definition of a dataflow: its dimensions in key order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataStructure {
    pub dataflow: String,
    pub dimensions: Vec<Dimension>,
    /// Codes the dataflow actually publishes per dimension, when the source
    /// exposes a content constraint.
    #[serde(default)]
    pub content_constraint: Option<BTreeMap<String, Vec<String>>>,
}

impl DataStructure {
    pub fn dimension(&self, id: &str) -> Option<&Dimension> {
        self.dimensions.iter().find(|d| d.id == id)
    }

    /// Dimensions that make up the series key (everything except time).
    pub fn key_dimensions(&self) -> impl Iterator<Item = &Dimension> {
        self.dimensions.iter().filter(|d| !d.is_time())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyValue {
    pub dimension: String,
    pub value: String,
}

impl KeyValue {
    pub fn new(dimension: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            dimension: dimension.into(),
            value: value.into(),
        }
    }
}

/// One data point as returned by the source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    /// Full key in schema order, including the time dimension.
    pub key: Vec<KeyValue>,
    pub value: Option<f64>,
    /// Attached attributes, raw as published (`UNIT_MULT`, `DECIMALS`, ...).
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

impl Observation {
    pub fn get(&self, dimension: &str) -> Option<&str> {
        self.key
            .iter()
            .find(|kv| kv.dimension == dimension)
            .map(|kv| kv.value.as_str())
    }

    pub fn period(&self) -> Option<&str> {
        self.get(TIME_DIMENSION)
    }

    /// Power of ten the raw value is expressed in. `None` when absent or unparseable.
    pub fn unit_multiplier(&self) -> Option<i32> {
        self.attributes
            .get(UNIT_MULT_ATTRIBUTE)
            .and_then(|v| v.trim().parse().ok())
    }

    /// Number of decimals the value is published with. `None` when absent or unparseable.
    pub fn decimals(&self) -> Option<u32> {
        self.attributes
            .get(DECIMALS_ATTRIBUTE)
            .and_then(|v| v.trim().parse().ok())
    }
}

/// A data call: dataflow, encoded series key and query parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataRequest {
    pub dataflow: String,
    pub key: String,
    pub params: Vec<(String, String)>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataResponse {
    /// Resolved URL the source fetched.
    pub url: String,
    pub observations: Vec<Observation>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn obs(attrs: &[(&str, &str)]) -> Observation {
        Observation {
            key: vec![KeyValue::new(TIME_DIMENSION, "2020")],
            value: Some(1.0),
            attributes: attrs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }

    #[test]
    fn test_language_parsing() {
        assert_eq!("FR".parse::<Language>().unwrap(), Language::Fr);
        assert_eq!(" es ".parse::<Language>().unwrap(), Language::Es);
        assert!("de".parse::<Language>().is_err());
    }

    #[test]
    fn test_localized_falls_back_to_english() {
        let text = LocalizedText::new().with(Language::En, "Sex");
        assert_eq!(text.localized(Language::Fr), Some("Sex"));
        assert_eq!(text.get(Language::Fr), None);
    }

    #[test]
    fn test_attribute_parsing() {
        let o = obs(&[("UNIT_MULT", "3"), ("DECIMALS", "1")]);
        assert_eq!(o.unit_multiplier(), Some(3));
        assert_eq!(o.decimals(), Some(1));
        assert_eq!(o.period(), Some("2020"));

        let bad = obs(&[("UNIT_MULT", "n/a")]);
        assert_eq!(bad.unit_multiplier(), None);
        assert_eq!(bad.decimals(), None);
    }
}
