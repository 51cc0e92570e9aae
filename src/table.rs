//! Result Formatter
//!
//! Turns raw observations into a readable table: each value is scaled with its
//! own unit multiplier and decimal precision, coded dimension values are
//! translated to labels, and dimension headers are renamed to their localized
//! names.

use crate::error::Result;
use crate::sdmx::{DataStructure, Language, Observation, TIME_DIMENSION};
use crate::translate::CodeTranslator;
use polars::prelude::*;
use std::collections::HashSet;
use tracing::{debug, warn};

pub const VALUE_COLUMN: &str = "value";

const MAX_DECIMALS: u32 = 15;

/// Scale a raw value by `10^unit_multiplier` and round it to `decimals`,
/// halves to even.
///
/// A missing multiplier leaves the magnitude unchanged; missing decimals keep
/// full precision.
pub fn scale_value(raw: f64, unit_multiplier: Option<i32>, decimals: Option<u32>) -> f64 {
    let scaled = match unit_multiplier {
        Some(power) => raw * 10f64.powi(power),
        None => raw,
    };
    match decimals {
        // past f64 precision rounding is a no-op
        Some(places) if places > MAX_DECIMALS => scaled,
        Some(places) => {
            let factor = 10f64.powi(places as i32);
            (scaled * factor).round_ties_even() / factor
        }
        None => scaled,
    }
}

/// A formatted query result.
///
/// Columns are the dimension columns (localized headers), then the time
/// column, then the value column.
#[derive(Debug, Clone)]
pub struct ResultTable {
    frame: DataFrame,
    dimension_columns: Vec<String>,
    time_column: String,
    value_column: String,
}

impl ResultTable {
    /// A bare time/value table, for series that did not come from a query.
    pub fn from_points<P: AsRef<str>>(points: &[(P, f64)]) -> Result<Self> {
        let periods: Vec<String> = points.iter().map(|(p, _)| p.as_ref().to_string()).collect();
        let values: Vec<Option<f64>> = points.iter().map(|(_, v)| Some(*v)).collect();
        let frame = DataFrame::new(vec![
            Series::new(TIME_DIMENSION, periods),
            Series::new(VALUE_COLUMN, values),
        ])?;
        Ok(Self {
            frame,
            dimension_columns: Vec::new(),
            time_column: TIME_DIMENSION.to_string(),
            value_column: VALUE_COLUMN.to_string(),
        })
    }

    pub fn frame(&self) -> &DataFrame {
        &self.frame
    }

    pub fn height(&self) -> usize {
        self.frame.height()
    }

    pub fn is_empty(&self) -> bool {
        self.frame.height() == 0
    }

    /// Headers of the dimension columns, in schema order.
    pub fn dimension_columns(&self) -> &[String] {
        &self.dimension_columns
    }

    pub fn time_column(&self) -> &str {
        &self.time_column
    }

    pub fn value_column(&self) -> &str {
        &self.value_column
    }

    /// (period, value) for every row, in table order.
    pub fn points(&self) -> Result<Vec<(Option<String>, Option<f64>)>> {
        let periods = self.frame.column(&self.time_column)?.str()?;
        let values = self.frame.column(&self.value_column)?.f64()?;
        Ok(periods
            .into_iter()
            .zip(values.into_iter())
            .map(|(p, v)| (p.map(str::to_string), v))
            .collect())
    }

    /// Pipe-table rendering with one line per row.
    pub fn to_markdown(&self) -> Result<String> {
        let columns = self.frame.get_columns();
        let headers: Vec<&str> = columns.iter().map(|s| s.name()).collect();

        let mut out = format!("| {} |\n", headers.join(" | "));
        out.push_str(&format!(
            "|{}|\n",
            headers.iter().map(|_| " --- ").collect::<Vec<_>>().join("|")
        ));

        for row in 0..self.frame.height() {
            let mut cells = Vec::with_capacity(columns.len());
            for series in columns {
                let cell = match series.get(row)? {
                    AnyValue::Null => String::new(),
                    AnyValue::String(s) => s.to_string(),
                    AnyValue::Float64(v) => v.to_string(),
                    other => other.to_string(),
                };
                cells.push(cell);
            }
            out.push_str(&format!("| {} |\n", cells.join(" | ")));
        }

        Ok(out)
    }
}

/// Builds [`ResultTable`]s from observations.
#[derive(Debug, Clone, Default)]
pub struct ResultFormatter {
    omitted: Vec<String>,
}

impl ResultFormatter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Leave these dimensions out of the table (e.g. constant `FREQ`, `MEASURE`).
    pub fn omit<I, D>(mut self, dimensions: I) -> Self
    where
        I: IntoIterator<Item = D>,
        D: Into<String>,
    {
        self.omitted.extend(dimensions.into_iter().map(Into::into));
        self
    }

    pub fn format(
        &self,
        observations: &[Observation],
        structure: &DataStructure,
        language: Language,
    ) -> Result<ResultTable> {
        let translator = CodeTranslator::new(structure, language);

        let dimension_ids: Vec<&str> = structure
            .key_dimensions()
            .map(|d| d.id.as_str())
            .filter(|id| !self.omitted.iter().any(|o| o == id))
            .collect();

        let mut columns = Vec::with_capacity(dimension_ids.len() + 2);

        // Translation is keyed by code, so it runs while headers are still codes.
        for id in &dimension_ids {
            let cells: Vec<String> = observations
                .iter()
                .map(|o| {
                    let code = o.get(id).unwrap_or("");
                    translator.translate(id, code).to_string()
                })
                .collect();
            columns.push(Series::new(id, cells));
        }

        let periods: Vec<String> = observations
            .iter()
            .map(|o| o.period().unwrap_or("").to_string())
            .collect();
        columns.push(Series::new(TIME_DIMENSION, periods));

        let mut unscaled = 0usize;
        let values: Vec<Option<f64>> = observations
            .iter()
            .map(|o| {
                let multiplier = o.unit_multiplier();
                let decimals = o.decimals();
                if multiplier.is_none() || decimals.is_none() {
                    unscaled += 1;
                }
                o.value.map(|raw| scale_value(raw, multiplier, decimals))
            })
            .collect();
        columns.push(Series::new(VALUE_COLUMN, values));

        if unscaled > 0 {
            warn!(
                "{} of {} observations in {} lack scaling attributes",
                unscaled,
                observations.len(),
                structure.dataflow
            );
        }

        let mut frame = DataFrame::new(columns)?;

        let mut taken: HashSet<String> = [TIME_DIMENSION.to_string(), VALUE_COLUMN.to_string()]
            .into_iter()
            .collect();
        let mut headers = Vec::with_capacity(dimension_ids.len());
        for id in &dimension_ids {
            let header = translator
                .dimension_name(id)
                .filter(|_| translator.has_codelist(id))
                .filter(|name| !taken.contains(*name))
                .unwrap_or(*id)
                .to_string();
            if header != *id {
                frame.rename(id, &header)?;
            }
            taken.insert(header.clone());
            headers.push(header);
        }

        debug!(
            "Formatted {} rows for {} with columns {:?}",
            frame.height(),
            structure.dataflow,
            frame.get_column_names()
        );

        Ok(ResultTable {
            frame,
            dimension_columns: headers,
            time_column: TIME_DIMENSION.to_string(),
            value_column: VALUE_COLUMN.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sdmx::{Code, Codelist, Dimension, KeyValue, LocalizedText};

    fn structure() -> DataStructure {
        DataStructure {
            dataflow: "DF_EAR_4MTH_SEX_CUR_NB".to_string(),
            dimensions: vec![
                Dimension {
                    id: "REF_AREA".to_string(),
                    name: LocalizedText::new().with(Language::En, "Reference area"),
                    codelist: Some(Codelist {
                        id: "CL_AREA".to_string(),
                        name: LocalizedText::new().with(Language::En, "Reference area"),
                        codes: vec![Code::new(
                            "CMR",
                            LocalizedText::new().with(Language::En, "Cameroon"),
                        )],
                    }),
                },
                Dimension {
                    id: "FREQ".to_string(),
                    name: LocalizedText::new().with(Language::En, "Frequency"),
                    codelist: None,
                },
                Dimension {
                    id: "SEX".to_string(),
                    name: LocalizedText::new().with(Language::En, "Sex"),
                    codelist: Some(Codelist {
                        id: "CL_SEX".to_string(),
                        name: LocalizedText::new().with(Language::En, "Sex"),
                        codes: vec![Code::new(
                            "SEX_T",
                            LocalizedText::new().with(Language::En, "Total"),
                        )],
                    }),
                },
                Dimension {
                    id: "TIME_PERIOD".to_string(),
                    name: LocalizedText::new().with(Language::En, "Time"),
                    codelist: None,
                },
            ],
            content_constraint: None,
        }
    }

    fn obs(sex: &str, period: &str, value: f64, attrs: &[(&str, &str)]) -> Observation {
        Observation {
            key: vec![
                KeyValue::new("REF_AREA", "CMR"),
                KeyValue::new("FREQ", "A"),
                KeyValue::new("SEX", sex),
                KeyValue::new("TIME_PERIOD", period),
            ],
            value: Some(value),
            attributes: attrs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }

    #[test]
    fn test_scale_value() {
        assert_eq!(scale_value(1.234, Some(3), Some(0)), 1234.0);
        assert_eq!(scale_value(5.678, Some(0), Some(1)), 5.7);
        assert_eq!(scale_value(5.678, None, None), 5.678);
        assert_eq!(scale_value(12.5, Some(-1), None), 1.25);
    }

    #[test]
    fn test_scale_value_rounds_halves_to_even() {
        assert_eq!(scale_value(2.5, Some(0), Some(0)), 2.0);
        assert_eq!(scale_value(3.5, Some(0), Some(0)), 4.0);
        assert_eq!(scale_value(-2.5, None, Some(0)), -2.0);
        assert_eq!(scale_value(0.125, Some(0), Some(2)), 0.12);
        assert_eq!(scale_value(0.375, None, Some(2)), 0.38);
    }

    #[test]
    fn test_scale_value_with_excessive_decimals() {
        assert_eq!(scale_value(1.5, Some(0), Some(400)), 1.5);
        assert_eq!(scale_value(1.5, None, Some(u32::MAX)), 1.5);
        assert_eq!(scale_value(0.1234, Some(1), Some(16)), 0.1234 * 10.0);
    }

    #[test]
    fn test_scales_each_row_with_its_own_attributes() {
        let observations = vec![
            obs("SEX_T", "2020", 1.234, &[("UNIT_MULT", "3"), ("DECIMALS", "0")]),
            obs("SEX_T", "2021", 1.234, &[("UNIT_MULT", "0"), ("DECIMALS", "2")]),
            obs("SEX_T", "2022", 1.23456, &[]),
        ];
        let table = ResultFormatter::new()
            .format(&observations, &structure(), Language::En)
            .unwrap();

        let values: Vec<Option<f64>> = table.points().unwrap().into_iter().map(|(_, v)| v).collect();
        assert_eq!(values, vec![Some(1234.0), Some(1.23), Some(1.23456)]);
    }

    #[test]
    fn test_column_order_and_headers() {
        let observations = vec![obs("SEX_T", "2020", 1.0, &[])];
        let table = ResultFormatter::new()
            .format(&observations, &structure(), Language::En)
            .unwrap();

        assert_eq!(
            table.frame().get_column_names(),
            vec!["Reference area", "FREQ", "Sex", "TIME_PERIOD", "value"]
        );
        assert_eq!(table.dimension_columns(), &["Reference area", "FREQ", "Sex"]);
    }

    #[test]
    fn test_translates_and_passes_unknown_codes() {
        let observations = vec![
            obs("SEX_T", "2020", 1.0, &[]),
            obs("SEX_Z", "2021", 2.0, &[]),
        ];
        let table = ResultFormatter::new()
            .format(&observations, &structure(), Language::En)
            .unwrap();

        let sex = table.frame().column("Sex").unwrap().str().unwrap();
        assert_eq!(sex.get(0), Some("Total"));
        assert_eq!(sex.get(1), Some("SEX_Z"));
        let area = table.frame().column("Reference area").unwrap().str().unwrap();
        assert_eq!(area.get(0), Some("Cameroon"));
    }

    #[test]
    fn test_omitted_dimensions() {
        let observations = vec![obs("SEX_T", "2020", 1.0, &[])];
        let table = ResultFormatter::new()
            .omit(["FREQ", "REF_AREA"])
            .format(&observations, &structure(), Language::En)
            .unwrap();
        assert_eq!(
            table.frame().get_column_names(),
            vec!["Sex", "TIME_PERIOD", "value"]
        );
    }

    #[test]
    fn test_empty_observations_give_empty_table() {
        let table = ResultFormatter::new()
            .format(&[], &structure(), Language::En)
            .unwrap();
        assert!(table.is_empty());
        assert_eq!(table.frame().width(), 5);
        assert!(table.points().unwrap().is_empty());
    }

    #[test]
    fn test_markdown() {
        let table = ResultTable::from_points(&[("2019", 5.1), ("2020", 5.3)]).unwrap();
        let markdown = table.to_markdown().unwrap();
        let lines: Vec<&str> = markdown.lines().collect();
        assert_eq!(lines[0], "| TIME_PERIOD | value |");
        assert_eq!(lines[2], "| 2019 | 5.1 |");
        assert_eq!(lines.len(), 4);
    }
}
