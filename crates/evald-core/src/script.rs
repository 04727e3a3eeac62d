//! Minimal script surface syntax shared by the capability gate and the
//! built-in interpreter.
//!
//! The language is deliberately small: commands separated by newlines or
//! semicolons, words separated by whitespace, `{...}` brace groups taken
//! literally (nestable, `\{`/`\}` escapes honored). The capability gate only
//! needs command-name positions; the interpreter needs full words.

/// A single word of a command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Word {
    /// Bare word, subject to `$name` substitution at evaluation time.
    Bare(String),
    /// Brace-grouped word, taken literally (outer braces stripped).
    Brace(String),
}

impl Word {
    /// The raw text of the word, without interpretation.
    pub fn text(&self) -> &str {
        match self {
            Word::Bare(s) | Word::Brace(s) => s,
        }
    }
}

/// Validates that braces are balanced.
///
/// Returns `Err` with a positional message when they are not.
pub fn validate_braces(code: &str) -> Result<(), String> {
    let mut depth: i32 = 0;
    let chars: Vec<char> = code.chars().collect();
    let mut pos = 0;

    while pos < chars.len() {
        match chars[pos] {
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth < 0 {
                    return Err(format!("unmatched closing brace at position {}", pos));
                }
            }
            '\\' if pos + 1 < chars.len() => {
                // Skip escaped braces
                if chars[pos + 1] == '{' || chars[pos + 1] == '}' {
                    pos += 1;
                }
            }
            _ => {}
        }
        pos += 1;
    }

    if depth > 0 {
        Err("opening brace unmatched until end of script".to_string())
    } else {
        Ok(())
    }
}

/// Splits a script into commands at top-level newlines and semicolons.
///
/// Separators inside brace groups do not split. Empty commands and comment
/// lines (leading `#`) are dropped.
pub fn split_commands(code: &str) -> Vec<String> {
    let mut commands = Vec::new();
    let mut current = String::new();
    let mut depth: i32 = 0;
    let mut chars = code.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '{' => {
                depth += 1;
                current.push(c);
            }
            '}' => {
                depth -= 1;
                current.push(c);
            }
            '\\' => {
                current.push(c);
                if let Some(&next) = chars.peek() {
                    current.push(next);
                    chars.next();
                }
            }
            '\n' | ';' if depth <= 0 => {
                push_command(&mut commands, &mut current);
            }
            _ => current.push(c),
        }
    }
    push_command(&mut commands, &mut current);

    commands
}

fn push_command(commands: &mut Vec<String>, current: &mut String) {
    let trimmed = current.trim();
    if !trimmed.is_empty() && !trimmed.starts_with('#') {
        commands.push(trimmed.to_string());
    }
    current.clear();
}

/// Splits one command into words.
///
/// Assumes braces are balanced (callers validate the whole script first).
pub fn parse_words(command: &str) -> Vec<Word> {
    let mut words = Vec::new();
    let mut chars = command.chars().peekable();

    while let Some(&c) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
        } else if c == '{' {
            chars.next();
            let mut depth = 1;
            let mut body = String::new();
            while let Some(inner) = chars.next() {
                match inner {
                    '{' => {
                        depth += 1;
                        body.push(inner);
                    }
                    '}' => {
                        depth -= 1;
                        if depth == 0 {
                            break;
                        }
                        body.push(inner);
                    }
                    '\\' => {
                        if let Some(&next) = chars.peek() {
                            if next == '{' || next == '}' {
                                body.push(next);
                                chars.next();
                            } else {
                                body.push(inner);
                            }
                        }
                    }
                    _ => body.push(inner),
                }
            }
            words.push(Word::Brace(body));
        } else {
            let mut word = String::new();
            while let Some(&next) = chars.peek() {
                if next.is_whitespace() || next == '{' {
                    break;
                }
                word.push(next);
                chars.next();
            }
            words.push(Word::Bare(word));
        }
    }

    words
}
