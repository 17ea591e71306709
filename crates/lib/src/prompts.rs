//! # Prompt Templates
//!
//! Centralized prompt strings for the answer pipeline. Placeholders use
//! `{name}` syntax and are filled with simple string replacement.

/// System prompt for grounded question answering over retrieved passages.
pub const ANSWER_SYSTEM_PROMPT: &str = r#"You are a technical reference assistant for a library of books and articles. Answer the user's question using only the information in the provided passages. When a passage supports part of your answer, cite the book or article by its title where possible. If the passages do not contain the answer, say so plainly instead of speculating. Preserve code snippets exactly as written."#;

/// User prompt template for grounded question answering.
///
/// Placeholders: `{passages}`, `{question}`.
pub const ANSWER_USER_PROMPT: &str = r#"# Passages

{passages}

# Question

{question}"#;
