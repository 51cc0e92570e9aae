//! Narrative Assembler
//!
//! Renders a descriptor into the prompt handed to the language model. The
//! output is deterministic: fixed section order, and a section is left out
//! when the data behind it is empty.

use crate::describe::{Direction, Milestone, TimeSeriesDescriptor};
use std::fmt::Write;

/// System message sent alongside every assembled prompt.
pub const SYSTEM_INSTRUCTION: &str = "Generate a concise summary of the labour statistics data \
retrieved from the International Labour Organization's ILOSTAT database, using a factual and \
objective tone. Focus strictly on patterns, trends, figures, and relationships evident in the \
data, without providing contextual explanations or interpretations beyond the data itself. \
Highlight notable changes in values, any observable trends over time, and relevant statistical \
shifts as presented in the data.";

const INSTRUCTIONS: &str = "**Instructions**:
1. Write a single factual paragraph summarizing the data.
2. Mention the general trend, the key increases and decreases, the highest and lowest values, and any projections.
3. Use clear and concise language suitable for a general audience.
4. Do not add information that is not present above.";

/// Builds the prompt text from a [`TimeSeriesDescriptor`].
#[derive(Debug, Clone, Default)]
pub struct NarrativeAssembler {
    description: Option<String>,
    filters: Vec<(String, String)>,
}

impl NarrativeAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Dataset description shown in the context section.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        let description = description.into();
        if !description.trim().is_empty() {
            self.description = Some(description);
        }
        self
    }

    /// Dimension selections the data was filtered by, as (dimension label, value label).
    pub fn with_filters<I, K, V>(mut self, filters: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.filters
            .extend(filters.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    pub fn assemble(
        &self,
        descriptor: &TimeSeriesDescriptor,
        area_label: &str,
        data_label: &str,
    ) -> String {
        let mut sections = vec![self.context(descriptor, area_label, data_label)];

        if !self.filters.is_empty() {
            let mut section = String::from("**Selected dimensions**:");
            for (dimension, value) in &self.filters {
                let _ = write!(section, "\n- {}: {}", dimension, value);
            }
            sections.push(section);
        }

        if !descriptor.milestones().is_empty() {
            let mut section = String::from("**Key milestones**:");
            for milestone in descriptor.milestones() {
                let _ = write!(section, "\n- {}", milestone_line(descriptor, milestone));
            }
            sections.push(section);
        }

        if !descriptor.projections().is_empty() {
            let mut section = String::from("**Projections**:");
            for projection in descriptor.projections() {
                let _ = write!(
                    section,
                    "\n- {} = {}",
                    projection.point.period, projection.point.value
                );
                if let Some(direction) = projection.direction {
                    let _ = write!(section, " ({})", direction);
                }
            }
            sections.push(section);
        }

        if let Some(trend) = descriptor.trend() {
            sections.push(format!("**Observation**:\n{}", trend.sentence()));
        }

        sections.push(INSTRUCTIONS.to_string());
        sections.join("\n\n")
    }

    fn context(&self, descriptor: &TimeSeriesDescriptor, area_label: &str, data_label: &str) -> String {
        let mut section = String::from(
            "Summarize the following labour statistics retrieved from the International Labour \
Organization's ILOSTAT database.\n\n**Context**:",
        );
        let _ = write!(section, "\n- Geographic area: {}", area_label);
        let _ = write!(section, "\n- Dataset: {}", data_label);
        if let Some(description) = &self.description {
            let _ = write!(section, "\n- Description: {}", description);
        }
        let _ = write!(
            section,
            "\n- Values after {} are projections",
            descriptor.reference_year()
        );
        section
    }
}

fn milestone_line(descriptor: &TimeSeriesDescriptor, milestone: &Milestone) -> String {
    // The earliest milestone has no predecessor and always opens the story.
    let prefix = match milestone.change {
        None => "Start".to_string(),
        Some(change) => match change.direction {
            Direction::NoChange => "No change".to_string(),
            Direction::Increase => format!("{} increase", change.magnitude),
            Direction::Decrease => format!("{} decrease", change.magnitude),
        },
    };

    let mut line = format!("{}: {} = {}", prefix, milestone.point.period, milestone.point.value);
    let period = milestone.point.period.as_str();
    if descriptor.max().is_some_and(|p| p.period == period) {
        line.push_str(" (Highest value)");
    }
    if descriptor.min().is_some_and(|p| p.period == period) {
        line.push_str(" (Lowest value)");
    }
    line
}
