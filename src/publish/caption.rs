//! Caption finalisation for the triggering message.

use crate::transport::{ChatId, DynTransport, MessageId, ParseMode, TransportError};

/// Bold header line of the finalized caption.
pub const CAPTION_HEADER: &str = "HERE IS YOUR LINK 🔗";

fn escape_html(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

/// HTML caption embedding `link` as both the anchor text and its target.
pub fn render_caption(link: &str) -> String {
    let link = escape_html(link);
    format!("<b>{CAPTION_HEADER}</b>\n\n<blockquote><b><a href=\"{link}\">{link}</a></b></blockquote>")
}

/// Rewrites the caption of the triggering message
pub struct CaptionEditor {
    transport: DynTransport,
}

impl CaptionEditor {
    pub fn new(transport: DynTransport) -> Self {
        Self { transport }
    }

    /// Replace the caption of `message_id` in `chat` with the link caption.
    pub async fn finalize(&self, chat: ChatId, message_id: MessageId, issued_link: &str) -> Result<(), TransportError> {
        self.transport
            .edit_message(chat, message_id, &render_caption(issued_link), ParseMode::Html)
            .await?;
        tracing::info!(chat, message_id, link = issued_link, "caption finalized");
        Ok(())
    }
}
