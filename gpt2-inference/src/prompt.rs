use crate::error::InferenceError;
use anyhow::Result;

/// GPT-2 `<|endoftext|>` id; used as the default prompt and as the stop token.
pub const END_OF_TEXT: usize = 50256;

/// Default upper bound on prompt length.
pub const DEFAULT_MAX_PROMPT_TOKENS: usize = 256;

/// Parses a comma-separated list of token ids.
///
/// An absent prompt becomes `[END_OF_TEXT]`. Whitespace around ids is ignored;
/// empty fields and non-numeric ids are rejected rather than read as zero.
pub fn parse_prompt(input: Option<&str>, max_tokens: usize) -> Result<Vec<usize>> {
    let Some(input) = input else {
        return Ok(vec![END_OF_TEXT]);
    };

    let tokens = input
        .split(',')
        .enumerate()
        .map(|(idx, field)| {
            let field = field.trim();
            field.parse::<usize>().map_err(|_| {
                InferenceError::InvalidPrompt(format!("field {idx} ({field:?}) is not a token id"))
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    if tokens.len() > max_tokens {
        return Err(InferenceError::PromptTooLong { len: tokens.len(), max: max_tokens }.into());
    }

    Ok(tokens)
}
