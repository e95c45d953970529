//! Search command compiler.
//!
//! # Syntax
//!
//! ```text
//! command  := "!" command          negation
//!           | "$" entry [op operand]
//!           | text                 free text over every entry
//! entry    := bare-name | "\"" escaped-name "\""
//! op       := ":" (contains) | "=" (is exactly)
//!           | "<" | "@" | ">"      (sort-key comparison)
//! ```
//!
//! A bare entry name runs up to the first operator character. Names that
//! start with `"` or contain an operator must be quoted, with `\"` and `\\`
//! escapes. Compiling returns `None` for anything invalid: an unknown
//! entry, an empty operand, a comparison on an entry that does not sort, or
//! an operand that cannot be encoded.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use tracing::debug;

use kura_core::sorting::encode_text;
use kura_core::{EntryConfiguration, EntryDefinition};

use crate::node::{CompareOp, SearchNode};

/// Characters with a meaning after an entry name.
pub const OPERATORS: [char; 5] = ['=', ':', '>', '<', '@'];

static ENCLOSED: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"^"((?:[^\\"]|\\"|\\\\)+?)""#).expect("enclosed-string pattern is valid")
});

/// A quoted entry name and the text after its closing quote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Enclosed<'a> {
    pub enclosed: String,
    pub remainder: &'a str,
}

/// Split a leading quoted string off `text`, unescaping it.
///
/// Returns `None` when `text` does not start with a complete, non-empty
/// quoted string.
pub fn extract_enclosed_string(text: &str) -> Option<Enclosed<'_>> {
    let captures = ENCLOSED.captures(text)?;
    let whole = captures.get(0)?;
    let inner = captures.get(1)?;
    Some(Enclosed {
        enclosed: inner.as_str().replace("\\\"", "\"").replace("\\\\", "\\"),
        remainder: &text[whole.end()..],
    })
}

/// Quote `name` if it would otherwise be misread as an entry name.
pub fn to_enclosed_string(name: &str) -> String {
    if name.starts_with('"') || name.contains(OPERATORS) {
        format!("\"{}\"", name.replace('\\', "\\\\").replace('"', "\\\""))
    } else {
        name.to_string()
    }
}

/// Byte offset of the first operator character in `command`.
pub fn operator_index(command: &str) -> Option<usize> {
    command.find(OPERATORS)
}

/// An operator offered for an entry, with a short description.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct OperatorInfo {
    pub operator: char,
    pub explanation: &'static str,
}

/// Operators usable after `$<entry>`.
pub fn available_operators(entry: &EntryDefinition) -> Vec<OperatorInfo> {
    let mut operators = vec![
        OperatorInfo {
            operator: ':',
            explanation: "contains",
        },
        OperatorInfo {
            operator: '=',
            explanation: "is exactly",
        },
    ];
    if entry.sorting_method.is_active() {
        operators.extend([
            OperatorInfo {
                operator: '<',
                explanation: "sorts before",
            },
            OperatorInfo {
                operator: '@',
                explanation: "sorts equal to",
            },
            OperatorInfo {
                operator: '>',
                explanation: "sorts after",
            },
        ]);
    }
    operators
}

/// Compile one line of search syntax against `config`.
pub fn compile(command: &str, config: &EntryConfiguration) -> Option<SearchNode> {
    if command.is_empty() {
        return None;
    }
    if let Some(rest) = command.strip_prefix('!') {
        return compile(rest, config).map(SearchNode::negate);
    }
    if let Some(rest) = command.strip_prefix('$') {
        return compile_entry_query(rest, config);
    }
    debug!(text = command, "Compiled free-text query");
    Some(SearchNode::GeneralText(command.to_string()))
}

/// Compile several lines, combining them with `And` (or `Or` when `any`).
///
/// Any invalid line makes the whole result `None`.
pub fn compile_all<S: AsRef<str>>(
    commands: &[S],
    config: &EntryConfiguration,
    any: bool,
) -> Option<SearchNode> {
    let children = commands
        .iter()
        .map(|command| compile(command.as_ref(), config))
        .collect::<Option<Vec<_>>>()?;
    Some(if any {
        SearchNode::or(children)
    } else {
        SearchNode::and(children)
    })
}

fn compile_entry_query(command: &str, config: &EntryConfiguration) -> Option<SearchNode> {
    if command.is_empty() {
        return None;
    }

    let (name, remainder) = if command.starts_with('"') {
        let Enclosed {
            enclosed,
            remainder,
        } = extract_enclosed_string(command)?;
        (enclosed, remainder)
    } else {
        match operator_index(command) {
            Some(position) => (command[..position].to_string(), &command[position..]),
            None => (command.to_string(), ""),
        }
    };

    let Some(entry) = config.find(&name) else {
        debug!(entry = %name, "Query names an unknown entry");
        return None;
    };

    let mut chars = remainder.chars();
    let Some(operator) = chars.next() else {
        return Some(SearchNode::HasEntry(entry.clone()));
    };
    let operand = chars.as_str();
    if operand.is_empty() {
        debug!(entry = %name, "Query has an empty operand");
        return None;
    }

    match operator {
        ':' => Some(SearchNode::PartialMatch {
            entry: entry.clone(),
            text: operand.to_string(),
        }),
        '=' => Some(SearchNode::ExactMatch {
            entry: entry.clone(),
            text: operand.to_string(),
        }),
        symbol => {
            let op = CompareOp::from_symbol(symbol)?;
            if !entry.sorting_method.is_active() {
                debug!(entry = %name, method = %entry.sorting_method, "Comparison on an unsorted entry");
                return None;
            }
            let Some(target) = encode_text(entry.sorting_method, operand) else {
                debug!(entry = %name, operand, "Comparison operand does not encode");
                return None;
            };
            Some(SearchNode::Compare {
                entry: entry.clone(),
                op,
                target,
                operand: operand.to_string(),
            })
        }
    }
}
