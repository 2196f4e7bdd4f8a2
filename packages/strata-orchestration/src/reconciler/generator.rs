//! Generative-model port
//!
//! The engine sends one prompt per run and expects raw JSON back. Parsing
//! and validation happen on the engine side ([`super::schema`]).

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::{Result, SyncError};

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a data modeling assistant. \
You receive the current conceptual, logical and physical models of one model family \
as JSON together with a business description. Reply with a single JSON object and \
nothing else, using exactly these top-level keys: summary, assumptions, \
conceptualModel, logicalModel, physicalModel, sql, issues, suggestions. \
Each model block holds entities (name, aliases, description, attributes, action) \
and relationships (source, target, cardinality, sourceAttribute, targetAttribute, \
name, description, action). Attributes carry name, aliases, description, dataType, \
conceptualType, logicalType, physicalType, length, nullable, isPrimaryKey, \
isForeignKey and action. Cardinality is one of 1:1, 1:N, N:1, N:M. \
Use action \"remove\" only for elements that must be deleted.";

/// Everything the generator sees for one run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationPrompt {
    pub system_prompt: String,
    /// Snapshot of the family as JSON
    pub serialized_context: String,
    pub business_description: String,
    pub instructions: Option<String>,
    pub allow_drop: bool,
    pub target_database: String,
}

impl GenerationPrompt {
    /// User message: intent first, then the current state
    pub fn user_message(&self) -> String {
        let mut message = format!(
            "Business description:\n{}\n\nTarget database: {}\n",
            self.business_description.trim(),
            self.target_database
        );
        if let Some(instructions) = self.instructions.as_deref().filter(|i| !i.trim().is_empty()) {
            message.push_str(&format!("\nInstructions:\n{}\n", instructions.trim()));
        }
        if self.allow_drop {
            message.push_str("\nRemovals are allowed.\n");
        } else {
            message.push_str("\nRemovals will not be applied; propose them only if essential.\n");
        }
        message.push_str(&format!("\nCurrent models:\n{}\n", self.serialized_context));
        message
    }
}

/// Structured-output generative model
#[async_trait]
pub trait DesiredStateGenerator: Send + Sync {
    /// Raw JSON answer for `prompt`
    async fn generate(&self, prompt: &GenerationPrompt) -> Result<String>;
}

/// Generator returning a fixed response
///
/// Used to replay recorded runs and in tests. Every prompt it receives is
/// kept for inspection.
pub struct StaticGenerator {
    response: std::result::Result<String, String>,
    prompts: Mutex<Vec<GenerationPrompt>>,
}

impl StaticGenerator {
    pub fn new(response: impl Into<String>) -> Self {
        Self {
            response: Ok(response.into()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn from_json(value: &serde_json::Value) -> Self {
        Self::new(value.to_string())
    }

    /// Generator whose every call fails with `message`
    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            response: Err(message.into()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn prompts(&self) -> Vec<GenerationPrompt> {
        self.prompts.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.prompts.lock().len()
    }
}

#[async_trait]
impl DesiredStateGenerator for StaticGenerator {
    async fn generate(&self, prompt: &GenerationPrompt) -> Result<String> {
        self.prompts.lock().push(prompt.clone());
        self.response.clone().map_err(SyncError::generator)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prompt(allow_drop: bool) -> GenerationPrompt {
        GenerationPrompt {
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            serialized_context: "{\"layers\":[]}".to_string(),
            business_description: "Online shop".to_string(),
            instructions: Some("Keep it small".to_string()),
            allow_drop,
            target_database: "postgresql".to_string(),
        }
    }

    #[tokio::test]
    async fn test_static_generator_records_prompts() {
        let generator = StaticGenerator::new("{}");
        assert_eq!(generator.generate(&prompt(false)).await.unwrap(), "{}");
        assert_eq!(generator.call_count(), 1);
        assert_eq!(generator.prompts()[0].business_description, "Online shop");
    }

    #[tokio::test]
    async fn test_failing_generator() {
        let generator = StaticGenerator::failing("quota exceeded");
        let err = generator.generate(&prompt(false)).await.unwrap_err();
        assert!(matches!(err, SyncError::Generator(ref m) if m == "quota exceeded"));
    }

    #[test]
    fn test_user_message_mentions_drop_policy() {
        let message = prompt(true).user_message();
        assert!(message.contains("Removals are allowed"));
        assert!(message.contains("Keep it small"));
        assert!(message.ends_with("{\"layers\":[]}\n"));

        assert!(prompt(false).user_message().contains("will not be applied"));
    }
}
