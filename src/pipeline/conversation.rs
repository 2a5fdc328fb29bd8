//! Conversation builder: one system instruction, one user turn with the image.
//!
//! [`Conversation`] keeps its turns private. The only way to create one is
//! [`build_conversation`], which places the single system turn first, and
//! later additions cannot add another system turn. Every conversation that
//! reaches the extraction client therefore has the shape the service expects.

use serde::Serialize;
use std::sync::Arc;

/// Speaker of a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// Binary image attachment with its declared media type.
///
/// The bytes are reference-counted so a conversation can be cloned (or kept
/// for a follow-up turn) without copying the image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageAttachment {
    pub data: Arc<[u8]>,
    pub media_type: String,
}

/// One content item of a turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentItem {
    Text(String),
    Image(ImageAttachment),
}

/// One turn of the conversation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Turn {
    pub role: Role,
    pub content: Vec<ContentItem>,
}

impl Turn {
    fn text(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            content: vec![ContentItem::Text(text.into())],
        }
    }

    /// Concatenated text items of this turn.
    pub fn text_content(&self) -> String {
        self.content
            .iter()
            .filter_map(|c| match c {
                ContentItem::Text(t) => Some(t.as_str()),
                ContentItem::Image(_) => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn images(&self) -> impl Iterator<Item = &ImageAttachment> {
        self.content.iter().filter_map(|c| match c {
            ContentItem::Image(img) => Some(img),
            ContentItem::Text(_) => None,
        })
    }
}

/// Ordered turns supplied to the model for one extraction request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conversation {
    turns: Vec<Turn>,
}

impl Conversation {
    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    /// The system instruction (always the first turn).
    pub fn system_prompt(&self) -> String {
        self.turns[0].text_content()
    }

    /// Append a follow-up user text turn (e.g. a clarification in a session).
    pub fn push_user_text(&mut self, text: impl Into<String>) {
        self.turns.push(Turn::text(Role::User, text));
    }

    /// Append a prior assistant answer, for sessions that replay history.
    pub fn push_assistant_text(&mut self, text: impl Into<String>) {
        self.turns.push(Turn::text(Role::Assistant, text));
    }

    /// Total attachment bytes across all turns.
    pub fn attachment_bytes(&self) -> usize {
        self.turns
            .iter()
            .flat_map(Turn::images)
            .map(|img| img.data.len())
            .sum()
    }
}

/// Build the extraction conversation for one image.
///
/// The bytes are moved into the attachment untouched; the same bytes,
/// media type and instruction always produce an equal conversation.
pub fn build_conversation(
    image: impl Into<Arc<[u8]>>,
    media_type: impl Into<String>,
    system_prompt: &str,
) -> Conversation {
    let user = Turn {
        role: Role::User,
        content: vec![ContentItem::Image(ImageAttachment {
            data: image.into(),
            media_type: media_type.into(),
        })],
    };

    Conversation {
        turns: vec![Turn::text(Role::System, system_prompt), user],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prompts::DEFAULT_SYSTEM_PROMPT;

    const PNG_MAGIC: [u8; 8] = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];

    #[test]
    fn one_system_turn_then_one_user_image() {
        let conv = build_conversation(PNG_MAGIC.to_vec(), "image/png", DEFAULT_SYSTEM_PROMPT);
        let turns = conv.turns();

        assert_eq!(turns.len(), 2);
        assert_eq!(turns[0].role, Role::System);
        assert_eq!(conv.system_prompt(), DEFAULT_SYSTEM_PROMPT);

        assert_eq!(turns[1].role, Role::User);
        assert_eq!(turns[1].content.len(), 1);
        let images: Vec<_> = turns[1].images().collect();
        assert_eq!(images.len(), 1);
        assert_eq!(&*images[0].data, &PNG_MAGIC);
        assert_eq!(images[0].media_type, "image/png");
    }

    #[test]
    fn deterministic_for_same_input() {
        let a = build_conversation(vec![1, 2, 3], "image/jpeg", "x");
        let b = build_conversation(vec![1, 2, 3], "image/jpeg", "x");
        assert_eq!(a, b);
        assert_eq!(a.attachment_bytes(), 3);
    }

    #[test]
    fn follow_up_turns_keep_system_first() {
        let mut conv = build_conversation(vec![0u8; 16], "image/png", "sys");
        conv.push_assistant_text("{\"name\":null}");
        conv.push_user_text("Look again at the footer.");

        let roles: Vec<Role> = conv.turns().iter().map(|t| t.role).collect();
        assert_eq!(
            roles,
            vec![Role::System, Role::User, Role::Assistant, Role::User]
        );
        assert_eq!(
            conv.turns().iter().filter(|t| t.role == Role::System).count(),
            1
        );
    }
}
