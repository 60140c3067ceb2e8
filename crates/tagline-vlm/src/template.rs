use std::path::Path;

use minijinja::{context, AutoEscape, Environment};
use tagline::prompt::{Line, Message, Role};

use crate::error::VlmError;

/// Renders chat messages into the text prompt fed to the tokenizer.
///
/// Uses the `chat_template` of `tokenizer_config.json` when the checkpoint ships
/// one. Without it the model is taken to be prompted by a task prefix (PaliGemma's
/// `caption zh`), so only the text of the last user message is sent.
pub struct PromptTemplate {
    env: Option<Environment<'static>>,
}

impl PromptTemplate {
    /// Plain-text rendering without a chat template.
    pub fn plain() -> Self {
        Self { env: None }
    }

    pub fn from_template(template: String) -> Result<Self, VlmError> {
        let mut env = Environment::new();
        env.set_auto_escape_callback(|_| AutoEscape::None);
        env.add_template_owned("chat", template)?;
        Ok(Self { env: Some(env) })
    }

    /// Read the chat template from a `tokenizer_config.json`, if it has one.
    pub fn from_tokenizer_config(path: impl AsRef<Path>) -> Result<Self, VlmError> {
        let data = std::fs::read_to_string(path)?;
        let config = serde_json::from_str::<serde_json::Value>(&data)?;
        match config["chat_template"].as_str() {
            Some(template) => Self::from_template(template.to_owned()),
            None => Ok(Self::plain()),
        }
    }

    #[inline]
    pub fn is_chat(&self) -> bool {
        self.env.is_some()
    }

    /// Render `messages`, dropping image lines when `keep_images` is false.
    ///
    /// Backends that inject the image through the vision tower pass `false` so the
    /// template does not emit image placeholder tokens.
    pub fn render(&self, messages: &[Message], keep_images: bool) -> Result<String, VlmError> {
        let messages = messages
            .iter()
            .map(|m| Message {
                role: m.role,
                content: m
                    .content
                    .iter()
                    .filter(|line| keep_images || !matches!(line, Line::Image))
                    .cloned()
                    .collect(),
            })
            .collect::<Vec<_>>();

        let Some(env) = &self.env else {
            let mut prompt = messages
                .iter()
                .rev()
                .find(|m| m.role == Role::User)
                .map(Message::plain_text)
                .unwrap_or_default();
            prompt.push('\n');
            return Ok(prompt);
        };

        let template = env.get_template("chat")?;
        Ok(template.render(context! {
            messages => &messages,
            add_generation_prompt => true,
        })?)
    }
}
