//! Local language model via ollama or llama.cpp

use async_trait::async_trait;
use tracing::debug;

use crate::config::{AssistantConfig, LlmEngine};

use super::command::{self, CommandFailure};
use super::{LanguageModel, LlmError};

/// Tokens llama.cpp may generate per answer
const LLAMA_MAX_TOKENS: &str = "256";

/// Queries a local model through its command-line front end
pub struct CommandLanguageModel {
    engine: LlmEngine,
    program: String,
    model: String,
}

impl CommandLanguageModel {
    pub fn new(config: &AssistantConfig) -> Self {
        let default_program = match config.llm_engine {
            LlmEngine::Ollama => "ollama",
            LlmEngine::LlamaCpp => "llama-cli",
        };
        Self {
            engine: config.llm_engine,
            program: config
                .llm_command
                .clone()
                .unwrap_or_else(|| default_program.to_string()),
            model: config.llm_model_name.clone(),
        }
    }
}

#[async_trait]
impl LanguageModel for CommandLanguageModel {
    async fn query(&self, prompt: &str) -> Result<String, LlmError> {
        debug!(engine = ?self.engine, model = %self.model, "querying model");

        let result = match self.engine {
            LlmEngine::Ollama => {
                command::run(&self.program, ["run", self.model.as_str()], Some(prompt)).await
            }
            LlmEngine::LlamaCpp => command::run(
                &self.program,
                [
                    "-m",
                    self.model.as_str(),
                    "-p",
                    prompt,
                    "-n",
                    LLAMA_MAX_TOKENS,
                    "-no-cnv",
                    "--no-display-prompt",
                ],
                None,
            )
            .await,
        };

        let output = result.map_err(|failure| match failure {
            CommandFailure::Spawn(reason) => LlmError::Unavailable(reason),
            CommandFailure::Exit(reason) => LlmError::Engine(reason),
        })?;

        let answer = output.trim();
        if answer.is_empty() {
            return Err(LlmError::Engine("model returned no text".to_string()));
        }
        Ok(answer.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::sample_config;

    #[tokio::test]
    async fn test_llama_cpp_arguments() {
        let mut config = sample_config().assistant;
        config.llm_engine = LlmEngine::LlamaCpp;
        config.llm_command = Some("echo".to_string());
        let llm = CommandLanguageModel::new(&config);

        let answer = llm.query("what is morse").await.unwrap();
        assert_eq!(
            answer,
            "-m llama3.2:1b -p what is morse -n 256 -no-cnv --no-display-prompt"
        );
    }

    #[tokio::test]
    async fn test_empty_answer_is_error() {
        let mut config = sample_config().assistant;
        config.llm_command = Some("true".to_string());
        let err = CommandLanguageModel::new(&config).query("hello").await.unwrap_err();
        assert!(matches!(err, LlmError::Engine(_)));
    }

    #[tokio::test]
    async fn test_missing_engine_is_unavailable() {
        let mut config = sample_config().assistant;
        config.llm_command = Some("/nonexistent/ollama".to_string());
        let err = CommandLanguageModel::new(&config).query("hello").await.unwrap_err();
        assert!(matches!(err, LlmError::Unavailable(_)));
    }
}
