//! Runtime settings read from the environment (and `.env`, when present).

use crate::error::{PrismError, Result};
use crate::sdmx::Language;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;

pub const DEFAULT_CATALOG_PATH: &str = "store/ilo-prism.db";
pub const DEFAULT_LLM_BASE_URL: &str = "https://router.huggingface.co/v1";
pub const DEFAULT_LLM_MODEL: &str = "meta-llama/Llama-3.3-70B-Instruct";
pub const DEFAULT_MAX_TOKENS: u32 = 1000;
pub const DEFAULT_TEMPERATURE: f32 = 0.7;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmSettings {
    pub base_url: String,
    /// Bearer token; `LLM_API_KEY`, else `HUGGING_FACE_TOKEN`.
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_LLM_BASE_URL.to_string(),
            api_key: None,
            model: DEFAULT_LLM_MODEL.to_string(),
            max_tokens: DEFAULT_MAX_TOKENS,
            temperature: DEFAULT_TEMPERATURE,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    pub language: Language,
    pub catalog_path: PathBuf,
    pub llm: LlmSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            language: Language::En,
            catalog_path: PathBuf::from(DEFAULT_CATALOG_PATH),
            llm: LlmSettings::default(),
        }
    }
}

impl Settings {
    /// Load `.env` if there is one, then read the process environment.
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build settings from any key lookup. Blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let defaults = Settings::default();

        let language = match get("PRISM_LANGUAGE") {
            Some(value) => value.parse()?,
            None => defaults.language,
        };

        let llm = LlmSettings {
            base_url: get("LLM_BASE_URL").unwrap_or(defaults.llm.base_url),
            api_key: get("LLM_API_KEY").or_else(|| get("HUGGING_FACE_TOKEN")),
            model: get("LLM_MODEL").unwrap_or(defaults.llm.model),
            max_tokens: parse_or("LLM_MAX_TOKENS", get("LLM_MAX_TOKENS"), defaults.llm.max_tokens)?,
            temperature: parse_or(
                "LLM_TEMPERATURE",
                get("LLM_TEMPERATURE"),
                defaults.llm.temperature,
            )?,
        };

        Ok(Self {
            language,
            catalog_path: get("PRISM_CATALOG_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.catalog_path),
            llm,
        })
    }
}

fn parse_or<T: FromStr>(key: &str, value: Option<String>, default: T) -> Result<T> {
    match value {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| PrismError::Config(format!("{} has an invalid value '{}'", key, raw))),
        None => Ok(default),
    }
}
