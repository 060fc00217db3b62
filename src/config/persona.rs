use log::info;
use serde::{ Deserialize, Serialize };
use std::fs;
use std::path::{ Path, PathBuf };
use std::sync::Arc;
use thiserror::Error;

const BUILTIN_PERSONA: &str = include_str!("../../json/persona.json");

#[derive(Debug, Error)]
pub enum PersonaError {
    #[error("Failed to read persona file '{}': {source}", .path.display())] Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse persona '{origin}': {source}")] Json {
        origin: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("Invalid persona: {0}")] Invalid(String),
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SpeechStyle {
    pub tone: String,
    #[serde(alias = "confidence_level")]
    pub confidence_level: String,
    #[serde(alias = "sentence_style")]
    pub sentence_style: String,
    #[serde(alias = "uses_slang", default)]
    pub uses_slang: bool,
    #[serde(alias = "slang_type", default)]
    pub slang_type: Option<String>,
    #[serde(alias = "emoji_usage")]
    pub emoji_usage: String,
    #[serde(default)]
    pub teasing: bool,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ResponsePatterns {
    #[serde(alias = "when_praised")]
    pub when_praised: String,
    #[serde(alias = "when_corrected")]
    pub when_corrected: String,
    #[serde(alias = "when_asked_for_help")]
    pub when_asked_for_help: String,
    #[serde(alias = "when_confused")]
    pub when_confused: String,
}

/// Static identity the assistant plays. Loaded once at start-up and shared read-only.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Persona {
    pub name: String,
    pub age: u32,
    pub gender: String,
    #[serde(alias = "date_of_birth")]
    pub date_of_birth: String,
    pub role: String,
    pub language: String,
    #[serde(alias = "core_traits", default)]
    pub core_traits: Vec<String>,
    #[serde(default)]
    pub interests: Vec<String>,
    #[serde(alias = "speech_style")]
    pub speech_style: SpeechStyle,
    #[serde(alias = "behavior_rules", default)]
    pub behavior_rules: Vec<String>,
    #[serde(alias = "response_patterns")]
    pub response_patterns: ResponsePatterns,
    #[serde(default)]
    pub limits: Vec<String>,
    #[serde(default)]
    pub greeting: Option<String>,
    #[serde(default)]
    pub suggestions: Vec<String>,
}

impl Persona {
    fn validate(&self) -> Result<(), PersonaError> {
        if self.name.trim().is_empty() {
            return Err(PersonaError::Invalid("name must not be empty".to_string()));
        }
        if self.role.trim().is_empty() {
            return Err(PersonaError::Invalid("role must not be empty".to_string()));
        }
        Ok(())
    }
}

pub fn parse_persona(json: &str, origin: &str) -> Result<Persona, PersonaError> {
    let persona: Persona = serde_json::from_str(json).map_err(|source| PersonaError::Json {
        origin: origin.to_string(),
        source,
    })?;
    persona.validate()?;
    Ok(persona)
}

pub fn builtin_persona() -> Result<Persona, PersonaError> {
    parse_persona(BUILTIN_PERSONA, "built-in")
}

pub fn load_persona_file<P: AsRef<Path>>(path: P) -> Result<Persona, PersonaError> {
    let path = path.as_ref();
    let content = fs::read_to_string(path).map_err(|source| PersonaError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_persona(&content, &path.display().to_string())
}

/// Loads the persona from `path`, or the built-in one when no path is configured.
pub fn load_persona(path: Option<&str>) -> Result<Arc<Persona>, PersonaError> {
    let persona = match path.filter(|p| !p.trim().is_empty()) {
        Some(p) => {
            info!("Loading persona from: {}", p);
            load_persona_file(p)?
        }
        None => {
            info!("No persona path configured, using the built-in persona");
            builtin_persona()?
        }
    };
    info!("Persona loaded: {} ({})", persona.name, persona.role);
    Ok(Arc::new(persona))
}
