use serde::Serialize;

use crate::config::PromptConfig;

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One item of a message body, shaped like the `content` entries chat templates iterate over.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "type")]
#[serde(rename_all = "lowercase")]
pub enum Line {
    Text { text: String },
    Image,
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub role: Role,
    pub content: Vec<Line>,
}

impl Message {
    pub fn text(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            content: vec![Line::Text { text: text.into() }],
        }
    }

    /// Concatenated text lines, images skipped.
    pub fn plain_text(&self) -> String {
        self.content
            .iter()
            .filter_map(|line| match line {
                Line::Text { text } => Some(text.as_str()),
                Line::Image => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Build the fixed captioning instruction: the ruleset as system message, then the image
/// followed by the short directive as user message.
pub fn caption_prompt(config: &PromptConfig) -> Vec<Message> {
    let mut messages = Vec::with_capacity(2);
    if !config.system.trim().is_empty() {
        messages.push(Message::text(Role::System, config.system.clone()));
    }
    messages.push(Message {
        role: Role::User,
        content: vec![
            Line::Image,
            Line::Text {
                text: config.user.clone(),
            },
        ],
    });
    messages
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn caption_prompt_layout() {
        let config = PromptConfig {
            system: "rules".to_string(),
            user: "describe".to_string(),
        };
        let messages = caption_prompt(&config);

        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0], Message::text(Role::System, "rules"));
        assert_eq!(messages[1].role, Role::User);
        assert_eq!(messages[1].content[0], Line::Image);
        assert_eq!(messages[1].plain_text(), "describe");
    }

    #[test]
    fn empty_system_prompt_is_dropped() {
        let config = PromptConfig {
            system: "  ".to_string(),
            user: "describe".to_string(),
        };
        let messages = caption_prompt(&config);
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].role, Role::User);
    }

    #[test]
    fn serializes_like_chat_template_input() -> Result<(), serde_json::Error> {
        let messages = caption_prompt(&PromptConfig {
            system: "rules".to_string(),
            user: "describe".to_string(),
        });
        let value = serde_json::to_value(&messages)?;

        assert_eq!(value[0]["role"], "system");
        assert_eq!(value[1]["content"][0]["type"], "image");
        assert_eq!(value[1]["content"][1]["type"], "text");
        assert_eq!(value[1]["content"][1]["text"], "describe");
        Ok(())
    }
}
