//! Code Translator
//!
//! Maps coded dimension values to localized labels using the codelists of a
//! dataflow's structure. Lookups never fail: unknown codes come back verbatim.

use crate::sdmx::{DataStructure, Language};
use std::collections::HashMap;

pub struct CodeTranslator {
    language: Language,
    /// dimension id -> code -> label
    labels: HashMap<String, HashMap<String, String>>,
    /// dimension id -> localized dimension name
    names: HashMap<String, String>,
}

impl CodeTranslator {
    pub fn new(structure: &DataStructure, language: Language) -> Self {
        let mut labels = HashMap::new();
        let mut names = HashMap::new();

        for dimension in &structure.dimensions {
            if let Some(name) = dimension.display_name(language) {
                names.insert(dimension.id.clone(), name.to_string());
            }

            let Some(codelist) = &dimension.codelist else {
                continue;
            };

            let codes: HashMap<String, String> = codelist
                .codes
                .iter()
                .filter_map(|code| {
                    code.name
                        .localized(language)
                        .map(|label| (code.id.clone(), label.to_string()))
                })
                .collect();
            labels.insert(dimension.id.clone(), codes);
        }

        Self {
            language,
            labels,
            names,
        }
    }

    pub fn language(&self) -> Language {
        self.language
    }

    /// Whether the dimension is enumerated by a codelist.
    pub fn has_codelist(&self, dimension: &str) -> bool {
        self.labels.contains_key(dimension)
    }

    /// Localized label of `code`, or `code` itself when the codelist has no entry.
    pub fn translate<'a>(&'a self, dimension: &str, code: &'a str) -> &'a str {
        self.labels
            .get(dimension)
            .and_then(|codes| codes.get(code))
            .map(String::as_str)
            .unwrap_or(code)
    }

    /// Localized display name of a dimension.
    pub fn dimension_name(&self, dimension: &str) -> Option<&str> {
        self.names.get(dimension).map(String::as_str)
    }
}
