//! Turns claimed feedback into the text handed back to the agent.

use sessionlink_protocol::PendingFeedback;

const BATCH_INSTRUCTION: &str = "Please address all feedback above.";

/// `[context] content`, or just `content` without context.
pub fn render_item(item: &PendingFeedback) -> String {
    match item.context.as_deref() {
        Some(context) if !context.is_empty() => format!("[{context}] {}", item.content),
        _ => item.content.clone(),
    }
}

/// One item renders as-is. Several become numbered blocks followed by an
/// instruction to handle all of them. `None` when there is nothing to say.
pub fn format_feedback(items: &[PendingFeedback]) -> Option<String> {
    match items {
        [] => None,
        [item] => Some(render_item(item)),
        items => {
            let blocks: Vec<String> = items
                .iter()
                .enumerate()
                .map(|(i, item)| format!("--- Feedback {} ---\n{}", i + 1, render_item(item)))
                .collect();
            Some(format!("{}\n\n{BATCH_INSTRUCTION}", blocks.join("\n\n")))
        }
    }
}
