pub mod chat;

use crate::error::ChatError;
use serde::{ Deserialize, Serialize };

pub const MIN_TEMPERATURE: f64 = 0.0;
pub const MAX_TEMPERATURE: f64 = 1.0;
pub const DEFAULT_TEMPERATURE: f64 = 0.7;
pub const DEFAULT_CONTEXT_LENGTH: u32 = 4096;
pub const DEFAULT_OLLAMA_HOST: &str = "http://localhost:11434";
pub const DEFAULT_MODEL: &str = "deepseek-r1:14b";

/// Tunable parameters of a generation request.
///
/// Values can only be set through the validating setters, so a stored config
/// is always within range.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    model_name: String,
    temperature: f64,
    context_length: u32,
}

impl ModelConfig {
    pub fn new(
        model_name: impl Into<String>,
        temperature: f64,
        context_length: i64
    ) -> Result<Self, ChatError> {
        Ok(Self {
            model_name: validate_model_name(&model_name.into())?,
            temperature: validate_temperature(temperature)?,
            context_length: validate_context_length(context_length)?,
        })
    }

    pub fn model_name(&self) -> &str {
        &self.model_name
    }

    pub fn temperature(&self) -> f64 {
        self.temperature
    }

    pub fn context_length(&self) -> u32 {
        self.context_length
    }

    pub fn set_model_name(&mut self, name: &str) -> Result<(), ChatError> {
        self.model_name = validate_model_name(name)?;
        Ok(())
    }

    pub fn set_temperature(&mut self, temperature: f64) -> Result<(), ChatError> {
        self.temperature = validate_temperature(temperature)?;
        Ok(())
    }

    pub fn set_context_length(&mut self, context_length: i64) -> Result<(), ChatError> {
        self.context_length = validate_context_length(context_length)?;
        Ok(())
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            model_name: DEFAULT_MODEL.to_string(),
            temperature: DEFAULT_TEMPERATURE,
            context_length: DEFAULT_CONTEXT_LENGTH,
        }
    }
}

pub fn validate_model_name(name: &str) -> Result<String, ChatError> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(ChatError::validation("Model name must not be empty"));
    }
    Ok(trimmed.to_string())
}

pub fn validate_temperature(temperature: f64) -> Result<f64, ChatError> {
    if !temperature.is_finite() || !(MIN_TEMPERATURE..=MAX_TEMPERATURE).contains(&temperature) {
        return Err(
            ChatError::validation(
                format!(
                    "Temperature must be between {:.1} and {:.1}, got {}",
                    MIN_TEMPERATURE,
                    MAX_TEMPERATURE,
                    temperature
                )
            )
        );
    }
    Ok(temperature)
}

pub fn validate_context_length(context_length: i64) -> Result<u32, ChatError> {
    match u32::try_from(context_length) {
        Ok(n) if n > 0 => Ok(n),
        _ =>
            Err(
                ChatError::validation(
                    format!("Context length must be a positive integer, got {}", context_length)
                )
            ),
    }
}
