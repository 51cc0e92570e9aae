//! Query Executor
//!
//! Builds the SDMX series key from a dimension filter, issues the data call and
//! keeps the dataflow structure and resolved URL around for formatting and
//! debugging.

use crate::error::{PrismError, Result};
use crate::sdmx::{DataRequest, DataStructure, Observation, SdmxSource, AREA_DIMENSION};
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info};

lazy_static! {
    static ref CODE_PATTERN: Regex =
        Regex::new(r"^[A-Za-z0-9_@$\-]+$").expect("code pattern is a valid regex");
}

/// Separator for OR-sets within one dimension.
pub const OR_SEPARATOR: char = '+';

/// Selected codes per dimension. Several codes for one dimension are joined with
/// `+` (OR); different dimensions combine with AND.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DimensionFilter {
    selections: BTreeMap<String, String>,
}

impl DimensionFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Select `value` (a single code or a `+`-joined union). Empty values unset the dimension.
    pub fn with(mut self, dimension: impl Into<String>, value: impl Into<String>) -> Self {
        self.set(dimension, value);
        self
    }

    pub fn set(&mut self, dimension: impl Into<String>, value: impl Into<String>) {
        let dimension = dimension.into();
        let value = value.into();
        if value.trim().is_empty() {
            self.selections.remove(&dimension);
        } else {
            self.selections.insert(dimension, value.trim().to_string());
        }
    }

    /// Select any of `codes` for one dimension.
    pub fn set_any<I, C>(&mut self, dimension: impl Into<String>, codes: I)
    where
        I: IntoIterator<Item = C>,
        C: AsRef<str>,
    {
        let joined = codes
            .into_iter()
            .map(|c| c.as_ref().trim().to_string())
            .filter(|c| !c.is_empty())
            .collect::<Vec<_>>()
            .join(&OR_SEPARATOR.to_string());
        self.set(dimension, joined);
    }

    pub fn get(&self, dimension: &str) -> Option<&str> {
        self.selections.get(dimension).map(String::as_str)
    }

    /// Individual codes selected for a dimension.
    pub fn codes(&self, dimension: &str) -> Vec<&str> {
        self.get(dimension)
            .map(|v| v.split(OR_SEPARATOR).collect())
            .unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.selections.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.selections
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Check every selection against the dataflow structure.
    pub fn validate(&self, structure: &DataStructure) -> Result<()> {
        for (dimension, value) in &self.selections {
            let Some(dim) = structure.dimension(dimension) else {
                return Err(PrismError::InvalidFilter(format!(
                    "Dimension '{}' is not part of dataflow {}",
                    dimension, structure.dataflow
                )));
            };
            if dim.is_time() {
                return Err(PrismError::InvalidFilter(format!(
                    "'{}' cannot be filtered by code, use a period range instead",
                    dimension
                )));
            }
            for code in value.split(OR_SEPARATOR) {
                if !CODE_PATTERN.is_match(code) {
                    return Err(PrismError::InvalidFilter(format!(
                        "Malformed code '{}' for dimension '{}'",
                        code, dimension
                    )));
                }
            }
        }
        Ok(())
    }

    /// Encode as an SDMX series key: one position per key dimension in schema
    /// order, joined by `.`, empty positions meaning "all values".
    pub fn encode_key(&self, structure: &DataStructure) -> Result<String> {
        self.validate(structure)?;
        let key = structure
            .key_dimensions()
            .map(|dim| self.get(&dim.id).unwrap_or(""))
            .collect::<Vec<_>>()
            .join(".");
        Ok(key)
    }
}

/// Optional period bounds. A missing bound means no limit on that side.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeriodRange {
    pub start: Option<String>,
    pub end: Option<String>,
}

impl PeriodRange {
    pub fn new(start: Option<&str>, end: Option<&str>) -> Self {
        let clean = |p: Option<&str>| {
            p.map(str::trim)
                .filter(|p| !p.is_empty())
                .map(str::to_string)
        };
        Self {
            start: clean(start),
            end: clean(end),
        }
    }

    pub fn unbounded() -> Self {
        Self::default()
    }

    pub fn validate(&self) -> Result<()> {
        if let (Some(start), Some(end)) = (&self.start, &self.end) {
            if start > end {
                return Err(PrismError::InvalidPeriod(format!(
                    "start period {} is after end period {}",
                    start, end
                )));
            }
        }
        Ok(())
    }

    /// Request parameters, present only for the bounds that are set.
    pub fn params(&self) -> Vec<(String, String)> {
        let mut params = Vec::new();
        if let Some(start) = &self.start {
            params.push(("startPeriod".to_string(), start.clone()));
        }
        if let Some(end) = &self.end {
            params.push(("endPeriod".to_string(), end.clone()));
        }
        params
    }
}

/// A caller's full choice: dimension codes plus period bounds.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuerySelection {
    pub filter: DimensionFilter,
    pub period: PeriodRange,
}

impl QuerySelection {
    pub fn new(filter: DimensionFilter, period: PeriodRange) -> Self {
        Self { filter, period }
    }

    /// Selection pinned to one area and nothing else.
    pub fn for_area(area: &str) -> Self {
        Self {
            filter: DimensionFilter::new().with(AREA_DIMENSION, area),
            period: PeriodRange::unbounded(),
        }
    }

    pub fn with_dimension(mut self, dimension: impl Into<String>, value: impl Into<String>) -> Self {
        self.filter.set(dimension, value);
        self
    }

    pub fn with_period(mut self, period: PeriodRange) -> Self {
        self.period = period;
        self
    }

    /// Pin the area dimension, replacing any previous area selection.
    pub fn pin_area(&mut self, area: &str) {
        self.filter.set(AREA_DIMENSION, area);
    }
}

/// Executes one data query and remembers what it resolved.
pub struct QueryExecutor<'a, S: SdmxSource + ?Sized> {
    source: &'a S,
    structure: Option<DataStructure>,
    url: Option<String>,
}

impl<'a, S: SdmxSource + ?Sized> QueryExecutor<'a, S> {
    pub fn new(source: &'a S) -> Self {
        Self {
            source,
            structure: None,
            url: None,
        }
    }

    /// Fetch the dataflow structure, then the observations matching `filter`
    /// within `period`.
    pub async fn execute(
        &mut self,
        dataflow: &str,
        filter: &DimensionFilter,
        period: &PeriodRange,
    ) -> Result<Vec<Observation>> {
        if !CODE_PATTERN.is_match(dataflow) {
            return Err(PrismError::UnknownDataflow(format!(
                "malformed dataflow id '{}'",
                dataflow
            )));
        }
        period.validate()?;
        self.url = None;
        self.structure = None;

        let structure = self.source.data_structure(dataflow).await?;
        let key = filter.encode_key(&structure)?;
        self.structure = Some(structure);

        let request = DataRequest {
            dataflow: dataflow.to_string(),
            key,
            params: period.params(),
        };
        info!("Querying {} with key '{}'", dataflow, request.key);

        let response = self.source.data(&request).await?;
        debug!("Resolved query URL: {}", response.url);
        info!(
            "Query on {} returned {} observations",
            dataflow,
            response.observations.len()
        );

        self.url = Some(response.url);
        Ok(response.observations)
    }

    /// URL of the last completed query. `None` before execution.
    pub fn url(&self) -> Option<&str> {
        self.url.as_deref()
    }

    /// Structure of the dataflow queried last.
    pub fn structure(&self) -> Option<&DataStructure> {
        self.structure.as_ref()
    }

    pub fn into_structure(self) -> Option<DataStructure> {
        self.structure
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sdmx::{Dimension, LocalizedText};

    fn structure() -> DataStructure {
        let dim = |id: &str| Dimension {
            id: id.to_string(),
            name: LocalizedText::default(),
            codelist: None,
        };
        DataStructure {
            dataflow: "DF_UNE_2EAP_SEX_AGE_RT".to_string(),
            dimensions: vec![
                dim("REF_AREA"),
                dim("FREQ"),
                dim("MEASURE"),
                dim("SEX"),
                dim("AGE"),
                dim("TIME_PERIOD"),
            ],
            content_constraint: None,
        }
    }

    #[test]
    fn test_encode_key_in_schema_order() {
        let filter = DimensionFilter::new()
            .with("SEX", "SEX_M+SEX_F")
            .with("REF_AREA", "ITA")
            .with("FREQ", "A");
        assert_eq!(filter.encode_key(&structure()).unwrap(), "ITA.A..SEX_M+SEX_F.");
    }

    #[test]
    fn test_empty_filter_is_all_wildcards() {
        let key = DimensionFilter::new().encode_key(&structure()).unwrap();
        assert_eq!(key, "....");
    }

    #[test]
    fn test_set_any_joins_codes() {
        let mut filter = DimensionFilter::new();
        filter.set_any("SEX", ["SEX_M", " ", "SEX_F"]);
        assert_eq!(filter.get("SEX"), Some("SEX_M+SEX_F"));
        assert_eq!(filter.codes("SEX"), vec!["SEX_M", "SEX_F"]);
    }

    #[test]
    fn test_empty_value_unsets_dimension() {
        let filter = DimensionFilter::new().with("SEX", "SEX_T").with("SEX", "");
        assert!(filter.is_empty());
    }

    #[test]
    fn test_rejects_unknown_dimension() {
        let filter = DimensionFilter::new().with("CUR", "CUR_TYPE_PPP");
        let err = filter.encode_key(&structure()).unwrap_err();
        assert!(matches!(err, PrismError::InvalidFilter(_)));
    }

    #[test]
    fn test_rejects_malformed_codes() {
        let filter = DimensionFilter::new().with("SEX", "SEX_M++SEX_F");
        assert!(filter.validate(&structure()).is_err());

        let filter = DimensionFilter::new().with("SEX", "SEX.M");
        assert!(filter.validate(&structure()).is_err());
    }

    #[test]
    fn test_rejects_time_dimension_in_filter() {
        let filter = DimensionFilter::new().with("TIME_PERIOD", "2020");
        assert!(filter.validate(&structure()).is_err());
    }

    #[test]
    fn test_period_params() {
        let range = PeriodRange::new(Some("2014"), Some(""));
        assert_eq!(
            range.params(),
            vec![("startPeriod".to_string(), "2014".to_string())]
        );
        assert!(PeriodRange::unbounded().params().is_empty());
    }

    #[test]
    fn test_period_range_order() {
        assert!(PeriodRange::new(Some("2024"), Some("2014")).validate().is_err());
        assert!(PeriodRange::new(Some("2014"), Some("2024")).validate().is_ok());
    }

    #[test]
    fn test_selection_for_area() {
        let mut selection = QuerySelection::for_area("ITA").with_dimension("SEX", "SEX_T");
        assert_eq!(selection.filter.get("REF_AREA"), Some("ITA"));
        selection.pin_area("FRA");
        assert_eq!(selection.filter.get("REF_AREA"), Some("FRA"));
        assert_eq!(selection.filter.get("SEX"), Some("SEX_T"));
    }
}
