//! Request pipeline
//!
//! [`Prism`] wires the stages together for one area/dataflow pair:
//! dimensions → query → table → descriptor → prompt → model. Each call is
//! independent; nothing is cached between requests.

use crate::catalog::Catalog;
use crate::describe::TimeSeriesDescriptor;
use crate::dimensions::{AreaDimensionSet, DimensionResolver};
use crate::error::{PrismError, Result};
use crate::llm::LanguageModel;
use crate::narrative::{NarrativeAssembler, SYSTEM_INSTRUCTION};
use crate::query::{QueryExecutor, QuerySelection};
use crate::sdmx::{DataStructure, Language, SdmxSource, AREA_DIMENSION};
use crate::table::{ResultFormatter, ResultTable};
use crate::translate::CodeTranslator;
use tracing::{info, warn};

/// Dimensions that stay constant within a series and only clutter the table.
pub const BOOKKEEPING_DIMENSIONS: [&str; 2] = ["FREQ", "MEASURE"];

/// A formatted query result with what it took to produce it.
#[derive(Debug, Clone)]
pub struct QueryOutcome {
    pub table: ResultTable,
    pub structure: DataStructure,
    /// URL the source resolved for the data call.
    pub url: Option<String>,
}

/// Everything handed to the language model for one table.
#[derive(Debug, Clone)]
pub struct Brief {
    pub area_label: String,
    pub data_label: String,
    pub description: Option<String>,
    pub descriptor: TimeSeriesDescriptor,
    pub prompt: String,
}

pub struct Prism<S: SdmxSource, C: Catalog> {
    source: S,
    catalog: C,
    language: Language,
    formatter: ResultFormatter,
    reference_year: Option<i32>,
}

impl<S: SdmxSource, C: Catalog> Prism<S, C> {
    pub fn new(source: S, catalog: C, language: Language) -> Self {
        Self {
            source,
            catalog,
            language,
            formatter: ResultFormatter::new().omit(BOOKKEEPING_DIMENSIONS),
            reference_year: None,
        }
    }

    pub fn with_formatter(mut self, formatter: ResultFormatter) -> Self {
        self.formatter = formatter;
        self
    }

    /// Pin the year separating history from projections instead of reading the clock.
    pub fn with_reference_year(mut self, year: i32) -> Self {
        self.reference_year = Some(year);
        self
    }

    pub fn language(&self) -> Language {
        self.language
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn catalog(&self) -> &C {
        &self.catalog
    }

    /// Dimensions of `dataflow` that carry data for `area`.
    pub async fn dimensions(&self, area: &str, dataflow: &str) -> Result<AreaDimensionSet> {
        DimensionResolver::new(&self.source)
            .resolve_dataflow(area, dataflow, self.language)
            .await
    }

    /// Run `selection` against `dataflow`, pinned to `area`, and format the result.
    pub async fn table(
        &self,
        area: &str,
        dataflow: &str,
        selection: &QuerySelection,
    ) -> Result<QueryOutcome> {
        let mut selection = selection.clone();
        selection.pin_area(area);

        let mut executor = QueryExecutor::new(&self.source);
        let observations = executor
            .execute(dataflow, &selection.filter, &selection.period)
            .await?;
        let url = executor.url().map(str::to_string);
        let Some(structure) = executor.into_structure() else {
            return Err(PrismError::Metadata(format!(
                "No structure retained for {}",
                dataflow
            )));
        };

        let table = self
            .formatter
            .format(&observations, &structure, self.language)?;
        info!("Table for {} in {} has {} rows", area, dataflow, table.height());

        Ok(QueryOutcome {
            table,
            structure,
            url,
        })
    }

    /// Describe a query result and assemble the model prompt for it.
    pub fn brief(
        &self,
        area: &str,
        dataflow: &str,
        outcome: &QueryOutcome,
        selection: &QuerySelection,
    ) -> Result<Brief> {
        let area_label = self.label_or_code(area, self.catalog.area_label(area, self.language));
        let data_label =
            self.label_or_code(dataflow, self.catalog.dataflow_label(dataflow, self.language));
        let description = match self.catalog.dataflow_description(dataflow, self.language) {
            Ok(description) => description,
            Err(e) => {
                warn!("No description for {}: {}", dataflow, e);
                None
            }
        };

        let descriptor = match self.reference_year {
            Some(year) => TimeSeriesDescriptor::at_year(&outcome.table, year)?,
            None => TimeSeriesDescriptor::new(&outcome.table)?,
        };

        let mut assembler =
            NarrativeAssembler::new().with_filters(self.filter_labels(&outcome.structure, selection));
        if let Some(description) = &description {
            assembler = assembler.with_description(description.clone());
        }
        let prompt = assembler.assemble(&descriptor, &area_label, &data_label);

        Ok(Brief {
            area_label,
            data_label,
            description,
            descriptor,
            prompt,
        })
    }

    /// Stream a summary of `brief`, reporting the text accumulated so far.
    pub async fn summarize_with(
        &self,
        model: &dyn LanguageModel,
        brief: &Brief,
        on_partial: &mut (dyn for<'s> FnMut(&'s str) + Send),
    ) -> Result<String> {
        model
            .complete_with(SYSTEM_INSTRUCTION, &brief.prompt, on_partial)
            .await
    }

    pub async fn summarize(&self, model: &dyn LanguageModel, brief: &Brief) -> Result<String> {
        model.complete(SYSTEM_INSTRUCTION, &brief.prompt).await
    }

    fn label_or_code(&self, code: &str, found: Result<Option<String>>) -> String {
        match found {
            Ok(Some(label)) => label,
            Ok(None) => code.to_string(),
            Err(e) => {
                warn!("Catalog lookup for {} failed: {}", code, e);
                code.to_string()
            }
        }
    }

    /// (dimension name, value labels) for every selection except the area.
    fn filter_labels(
        &self,
        structure: &DataStructure,
        selection: &QuerySelection,
    ) -> Vec<(String, String)> {
        let translator = CodeTranslator::new(structure, self.language);
        selection
            .filter
            .iter()
            .filter(|(dimension, _)| *dimension != AREA_DIMENSION)
            .map(|(dimension, _)| {
                let name = translator.dimension_name(dimension).unwrap_or(dimension);
                let values = selection
                    .filter
                    .codes(dimension)
                    .into_iter()
                    .map(|code| translator.translate(dimension, code))
                    .collect::<Vec<_>>()
                    .join(", ");
                (name.to_string(), values)
            })
            .collect()
    }
}
