//! Dimension Resolver
//!
//! Works out which dimension values a dataflow actually populates for one area:
//! a probe query pinned to the area lists the observed keys, which are then
//! intersected with the dataflow's full dimension metadata.

use crate::error::Result;
use crate::query::{DimensionFilter, QuerySelection};
use crate::sdmx::{
    DataRequest, DataStructure, Language, Observation, SdmxSource, AREA_DIMENSION, TIME_DIMENSION,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info};

/// One selectable value of a dimension.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DimensionValue {
    pub label: String,
    pub code: String,
}

impl DimensionValue {
    pub fn new(label: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            code: code.into(),
        }
    }
}

/// A queryable axis of a dataflow with its ordered values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DimensionSpec {
    pub code: String,
    pub label: String,
    pub values: Vec<DimensionValue>,
}

impl DimensionSpec {
    pub fn is_time(&self) -> bool {
        self.code == TIME_DIMENSION
    }

    pub fn codes(&self) -> impl Iterator<Item = &str> {
        self.values.iter().map(|v| v.code.as_str())
    }

    /// Only dimensions offering at least two values are worth presenting.
    pub fn offers_choice(&self) -> bool {
        self.values.len() >= 2
    }
}

/// The dimensions of a dataflow that are populated for one area.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AreaDimensionSet {
    pub area: String,
    pub dimensions: Vec<DimensionSpec>,
}

impl AreaDimensionSet {
    pub fn empty(area: &str) -> Self {
        Self {
            area: area.to_string(),
            dimensions: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.dimensions.is_empty()
    }

    pub fn get(&self, code: &str) -> Option<&DimensionSpec> {
        self.dimensions.iter().find(|d| d.code == code)
    }

    pub fn time_dimension(&self) -> Option<&DimensionSpec> {
        self.dimensions.iter().find(|d| d.is_time())
    }

    /// Dimensions selectable by code (everything except time).
    pub fn choices(&self) -> impl Iterator<Item = &DimensionSpec> {
        self.dimensions.iter().filter(|d| !d.is_time())
    }

    /// First and last observed period.
    pub fn period_bounds(&self) -> Option<(&str, &str)> {
        let time = self.time_dimension()?;
        let first = time.values.first()?;
        let last = time.values.last()?;
        Some((first.code.as_str(), last.code.as_str()))
    }

    /// Selection picking the first value of every dimension, for the area,
    /// with no period bounds.
    pub fn default_selection(&self) -> QuerySelection {
        let mut selection = QuerySelection::for_area(&self.area);
        for dim in self.choices() {
            if let Some(first) = dim.values.first() {
                selection.filter.set(dim.code.clone(), first.code.clone());
            }
        }
        selection
    }
}

/// All selectable dimensions of a dataflow, localized.
///
/// Values come from each dimension's codelist, restricted to the content
/// constraint when the source publishes one. The area and time dimensions are
/// never part of the result, nor are dimensions with a single value.
pub fn dataflow_dimensions(structure: &DataStructure, language: Language) -> Vec<DimensionSpec> {
    let mut dimensions = Vec::new();

    for dim in structure.key_dimensions() {
        if dim.id == AREA_DIMENSION {
            continue;
        }
        let Some(codelist) = &dim.codelist else {
            continue;
        };

        let codes: Vec<&str> = match &structure.content_constraint {
            Some(constraint) => match constraint.get(&dim.id) {
                Some(allowed) => allowed.iter().map(String::as_str).collect(),
                None => continue,
            },
            None => codelist.codes.iter().map(|c| c.id.as_str()).collect(),
        };

        let values = codes
            .into_iter()
            .map(|code| {
                let label = codelist
                    .get(code)
                    .and_then(|c| c.name.localized(language))
                    .unwrap_or(code);
                DimensionValue::new(label, code)
            })
            .collect();

        let spec = DimensionSpec {
            code: dim.id.clone(),
            label: dim.display_name(language).unwrap_or(&dim.id).to_string(),
            values,
        };
        if spec.offers_choice() {
            dimensions.push(spec);
        }
    }

    dimensions
}

/// Distinct values per dimension across a set of observations, area excluded.
fn observed_values(observations: &[Observation]) -> BTreeMap<String, BTreeSet<String>> {
    let mut observed: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    for observation in observations {
        for kv in &observation.key {
            if kv.dimension == AREA_DIMENSION {
                continue;
            }
            observed
                .entry(kv.dimension.clone())
                .or_default()
                .insert(kv.value.clone());
        }
    }
    observed
}

/// Keep only the dimension values present in `observations`.
///
/// The time dimension is rebuilt from the observed periods (sorted) instead of
/// being intersected, since it has no enumerated codelist.
pub fn intersect(
    area: &str,
    observations: &[Observation],
    all_dimensions: &[DimensionSpec],
) -> AreaDimensionSet {
    let observed = observed_values(observations);
    let mut dimensions = Vec::new();

    for spec in all_dimensions {
        if spec.is_time() || spec.code == AREA_DIMENSION {
            continue;
        }
        let Some(seen) = observed.get(&spec.code) else {
            continue;
        };
        let values: Vec<DimensionValue> = spec
            .values
            .iter()
            .filter(|v| seen.contains(&v.code))
            .cloned()
            .collect();
        let filtered = DimensionSpec {
            code: spec.code.clone(),
            label: spec.label.clone(),
            values,
        };
        if filtered.offers_choice() {
            dimensions.push(filtered);
        }
    }

    if let Some(periods) = observed.get(TIME_DIMENSION) {
        let time = DimensionSpec {
            code: TIME_DIMENSION.to_string(),
            label: TIME_DIMENSION.to_string(),
            values: periods
                .iter()
                .map(|p| DimensionValue::new(p.clone(), p.clone()))
                .collect(),
        };
        if time.offers_choice() {
            dimensions.push(time);
        }
    }

    AreaDimensionSet {
        area: area.to_string(),
        dimensions,
    }
}

pub struct DimensionResolver<'a, S: SdmxSource + ?Sized> {
    source: &'a S,
}

impl<'a, S: SdmxSource + ?Sized> DimensionResolver<'a, S> {
    pub fn new(source: &'a S) -> Self {
        Self { source }
    }

    /// Dimensions of `dataflow` populated for `area`, given the dataflow's
    /// full dimension list.
    pub async fn resolve(
        &self,
        area: &str,
        dataflow: &str,
        all_dimensions: &[DimensionSpec],
    ) -> Result<AreaDimensionSet> {
        let structure = self.source.data_structure(dataflow).await?;
        self.resolve_with(area, &structure, all_dimensions).await
    }

    /// Like [`resolve`](Self::resolve), deriving the full dimension list from
    /// the dataflow structure.
    pub async fn resolve_dataflow(
        &self,
        area: &str,
        dataflow: &str,
        language: Language,
    ) -> Result<AreaDimensionSet> {
        let structure = self.source.data_structure(dataflow).await?;
        let all_dimensions = dataflow_dimensions(&structure, language);
        self.resolve_with(area, &structure, &all_dimensions).await
    }

    async fn resolve_with(
        &self,
        area: &str,
        structure: &DataStructure,
        all_dimensions: &[DimensionSpec],
    ) -> Result<AreaDimensionSet> {
        let observations = self.probe(area, structure).await?;
        if observations.is_empty() {
            info!(
                "Area {} has no observations in {}, no filters apply",
                area, structure.dataflow
            );
            return Ok(AreaDimensionSet::empty(area));
        }

        let set = intersect(area, &observations, all_dimensions);
        info!(
            "Resolved {} dimensions for {} in {}",
            set.dimensions.len(),
            area,
            structure.dataflow
        );
        Ok(set)
    }

    /// One data call with only the area fixed.
    async fn probe(&self, area: &str, structure: &DataStructure) -> Result<Vec<Observation>> {
        let key = DimensionFilter::new()
            .with(AREA_DIMENSION, area)
            .encode_key(structure)?;
        let request = DataRequest {
            dataflow: structure.dataflow.clone(),
            key,
            params: Vec::new(),
        };
        debug!("Probing {} with key '{}'", request.dataflow, request.key);
        let response = self.source.data(&request).await?;
        Ok(response.observations)
    }
}
