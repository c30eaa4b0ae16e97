//! Context assembly and prompt construction for the "stuff" QA strategy.
//!
//! Retrieved chunk texts are concatenated verbatim, in rank order, with
//! [`CONTEXT_SEPARATOR`] between them, then placed after
//! [`QA_INSTRUCTIONS`] together with the question. No summarization or multi-step reduction.
//!
//! # Budget
//!
//! The assembled context never exceeds `max_chars` characters
//! (separators included):
//!
//! 1. Chunks are taken in rank order.
//! 2. The first chunk that would overflow the budget ends the context;
//!    lower-ranked chunks are never used to fill the gap.
//! 3. If the top-ranked chunk alone exceeds the budget, it is cut to
//!    `max_chars` characters so the context is never empty when chunks exist.

/// Separator between concatenated chunk texts.
pub const CONTEXT_SEPARATOR: &str = "\n\n";

/// Instructions that open every prompt.
pub const QA_INSTRUCTIONS: &str = "Use the following pieces of context to answer the question at the end. \
If you don't know the answer, just say that you don't know, don't try to make up an answer.";

/// The result of packing chunk texts into a character budget.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssembledContext {
    pub text: String,
    /// Number of chunks (fully or partially) included.
    pub used: usize,
    /// Number of chunks dropped or cut because of the budget.
    pub truncated: usize,
}

/// Concatenate `texts` in order within `max_chars` characters.
pub fn assemble_context<S: AsRef<str>>(texts: &[S], max_chars: usize) -> AssembledContext {
    let sep_len = CONTEXT_SEPARATOR.chars().count();
    let mut text = String::new();
    let mut chars = 0usize;
    let mut used = 0usize;

    for (i, t) in texts.iter().enumerate() {
        let t = t.as_ref();
        let t_len = t.chars().count();
        let needed = if i == 0 { t_len } else { sep_len + t_len };

        if chars + needed > max_chars {
            if i == 0 && max_chars > 0 {
                text.extend(t.chars().take(max_chars));
                return AssembledContext {
                    text,
                    used: 1,
                    truncated: texts.len(),
                };
            }
            break;
        }

        if i > 0 {
            text.push_str(CONTEXT_SEPARATOR);
        }
        text.push_str(t);
        chars += needed;
        used += 1;
    }

    AssembledContext {
        text,
        used,
        truncated: texts.len() - used,
    }
}

/// Build the single prompt sent to the generative backend.
///
/// ```text
/// <instructions>
///
/// <context>
///
/// Question: <question>
/// Helpful Answer:
/// ```
pub fn build_prompt(context: &str, question: &str) -> String {
    format!("{QA_INSTRUCTIONS}\n\n{context}\n\nQuestion: {question}\nHelpful Answer:")
}
