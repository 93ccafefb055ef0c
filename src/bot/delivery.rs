use teloxide::prelude::*;
use teloxide::types::ParseMode;

/// Telegram rejects messages over 4096 characters; stay well under it.
pub const MAX_CHUNK_CHARS: usize = 4000;

/// Split `text` into pieces of at most `max` characters.
///
/// Cuts at the last newline inside the window unless that newline falls in
/// the first half of it, in which case the window is cut hard. The newline
/// starts the next piece, so joining the pieces gives back `text`.
pub fn split_message(text: &str, max: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut rest = text;

    while rest.chars().count() > max {
        let char_start = |n: usize| rest.char_indices().nth(n).map(|(i, _)| i).unwrap_or(rest.len());
        let window_end = char_start(max);
        // A newline right at `max` still leaves a full chunk before it.
        let search = &rest[..char_start(max + 1)];

        let cut = match search.rfind('\n') {
            Some(i) if i > 0 && search[..i].chars().count() >= max / 2 => i,
            _ => window_end,
        };

        chunks.push(rest[..cut].to_string());
        rest = &rest[cut..];
    }

    if !rest.is_empty() {
        chunks.push(rest.to_string());
    }
    chunks
}

/// Send a reply as one or more Markdown messages, in order.
///
/// Delivery failures are logged and stop the remaining chunks.
#[allow(deprecated)]
pub async fn send_reply(bot: &Bot, chat_id: ChatId, text: &str) {
    for chunk in split_message(text, MAX_CHUNK_CHARS) {
        if let Err(e) = bot
            .send_message(chat_id, chunk)
            .parse_mode(ParseMode::Markdown)
            .await
        {
            tracing::error!("[Telegram] sendMessage to chat {} failed: {}", chat_id.0, e);
            return;
        }
    }
}
