//! Reshaping of raw command output.
//!
//! Each device result is split into lines, optionally re-split with shell
//! quoting rules, and stripped of empty entries. The `Offline` entry is never
//! touched.
//!
//! Line breaks are the ones Python's `str.splitlines` knows: `\n`, `\r`, `\v`,
//! `\f`, `\x1c`-`\x1e`, `\u{85}`, `\u{2028}` and `\u{2029}`. A `#` in command
//! output is ordinary text, never a comment.

use std::borrow::Cow;

use tracing::trace;

use crate::executor::{RunLog, TaskOutput};

/// Normalize every device result of every task
pub fn normalize(enable_token_split: bool, mut log: RunLog) -> RunLog {
    for entry in log.tasks_mut() {
        for response in &mut entry.data {
            let output = std::mem::take(&mut response.result);
            response.result = normalize_output(enable_token_split, output);
        }
    }
    log
}

/// Normalize one result.
///
/// Already split output only loses its empty entries (and is tokenized when
/// requested), so applying this twice gives the same value as applying it once.
pub fn normalize_output(enable_token_split: bool, output: TaskOutput) -> TaskOutput {
    let lines = match output {
        TaskOutput::Raw(text) => split_lines(&text),
        TaskOutput::Lines(lines) => lines.into_iter().filter(|l| !l.is_empty()).collect(),
        TaskOutput::Tokens(tokens) => {
            return TaskOutput::Tokens(tokens.into_iter().filter(|t| !t.is_empty()).collect())
        }
    };

    if !enable_token_split {
        return TaskOutput::Lines(lines);
    }

    TaskOutput::Tokens(
        lines
            .iter()
            .map(|line| tokenize(line))
            .filter(|tokens| !tokens.is_empty())
            .collect(),
    )
}

/// Split text into non-empty lines
pub fn split_lines(text: &str) -> Vec<String> {
    text.split(is_line_break)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

fn is_line_break(c: char) -> bool {
    matches!(
        c,
        '\n' | '\r'
            | '\u{0b}'
            | '\u{0c}'
            | '\u{1c}'..='\u{1e}'
            | '\u{85}'
            | '\u{2028}'
            | '\u{2029}'
    )
}

/// Split one line with shell quoting rules.
///
/// Lines the lexer rejects (an unbalanced quote, for instance) fall back to
/// plain whitespace splitting.
pub fn tokenize(line: &str) -> Vec<String> {
    match shell_words::split(&escape_hashes(line)) {
        Ok(tokens) => tokens,
        Err(e) => {
            trace!(error = %e, line, "Falling back to whitespace split");
            line.split_whitespace().map(str::to_string).collect()
        }
    }
}

/// Escape every unquoted `#` so the lexer keeps it as text
fn escape_hashes(line: &str) -> Cow<'_, str> {
    if !line.contains('#') {
        return Cow::Borrowed(line);
    }

    let mut escaped = String::with_capacity(line.len() + 4);
    let mut quote: Option<char> = None;
    let mut after_backslash = false;
    for c in line.chars() {
        if after_backslash {
            after_backslash = false;
        } else {
            match (quote, c) {
                (Some('\''), '\'') | (Some('"'), '"') => quote = None,
                (Some('"'), '\\') | (None, '\\') => after_backslash = true,
                (None, '\'' | '"') => quote = Some(c),
                (None, '#') => escaped.push('\\'),
                _ => {}
            }
        }
        escaped.push(c);
    }
    Cow::Owned(escaped)
}
