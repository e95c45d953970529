//! Compiled search expressions and their evaluation.
//!
//! A [`SearchNode`] is built once per query and evaluated against many
//! records. Evaluation is pure: it reads the record, the entry
//! configuration and the tag pool through a [`SearchContext`] and never
//! mutates anything.

use std::fmt;

use kura_core::{sort_key, EntryConfiguration, EntryDefinition, Record, TagPool};

use crate::matcher::{entry_matches, MatchMode};

/// What a node is evaluated against besides the record.
#[derive(Debug, Clone, Copy)]
pub struct SearchContext<'a> {
    pub config: &'a EntryConfiguration,
    pub tags: &'a TagPool,
}

impl<'a> SearchContext<'a> {
    pub fn new(config: &'a EntryConfiguration, tags: &'a TagPool) -> Self {
        Self { config, tags }
    }
}

/// Sort-key comparison operators (`<`, `@`, `>` in queries).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Less,
    Equal,
    Greater,
}

impl CompareOp {
    pub fn from_symbol(symbol: char) -> Option<Self> {
        match symbol {
            '<' => Some(Self::Less),
            '@' => Some(Self::Equal),
            '>' => Some(Self::Greater),
            _ => None,
        }
    }

    pub fn symbol(self) -> char {
        match self {
            Self::Less => '<',
            Self::Equal => '@',
            Self::Greater => '>',
        }
    }

    fn holds(self, key: &str, target: &str) -> bool {
        match self {
            Self::Less => key < target,
            Self::Equal => key == target,
            Self::Greater => key > target,
        }
    }
}

/// One node of a compiled query.
#[derive(Debug, Clone, PartialEq)]
pub enum SearchNode {
    /// All children hold; true when empty.
    And(Vec<SearchNode>),
    /// Any child holds; false when empty.
    Or(Vec<SearchNode>),
    Not(Box<SearchNode>),
    /// Some configured entry partially matches the text.
    GeneralText(String),
    /// The record has a value for the entry.
    HasEntry(EntryDefinition),
    PartialMatch {
        entry: EntryDefinition,
        text: String,
    },
    ExactMatch {
        entry: EntryDefinition,
        text: String,
    },
    /// The record's sort key for `entry` compares to `target` by `op`.
    Compare {
        entry: EntryDefinition,
        op: CompareOp,
        /// Encoded form of `operand`.
        target: String,
        /// Operand as typed, for display.
        operand: String,
    },
}

impl SearchNode {
    pub fn and(children: Vec<SearchNode>) -> Self {
        Self::And(children)
    }

    pub fn or(children: Vec<SearchNode>) -> Self {
        Self::Or(children)
    }

    pub fn negate(child: SearchNode) -> Self {
        Self::Not(Box::new(child))
    }

    /// Append a child to an `And`/`Or` node. Returns `false` for other nodes.
    pub fn push_child(&mut self, child: SearchNode) -> bool {
        match self {
            Self::And(children) | Self::Or(children) => {
                children.push(child);
                true
            }
            _ => false,
        }
    }

    /// Remove every child equal to `child` from an `And`/`Or` node.
    ///
    /// Returns whether anything was removed.
    pub fn remove_child(&mut self, child: &SearchNode) -> bool {
        match self {
            Self::And(children) | Self::Or(children) => {
                let before = children.len();
                children.retain(|existing| existing != child);
                children.len() != before
            }
            _ => false,
        }
    }

    pub fn children(&self) -> &[SearchNode] {
        match self {
            Self::And(children) | Self::Or(children) => children,
            _ => &[],
        }
    }

    /// Whether `record` satisfies this node.
    pub fn evaluate(&self, record: &Record, ctx: &SearchContext<'_>) -> bool {
        match self {
            // Iterator::all/any short-circuit and give the identity on empty input
            Self::And(children) => children.iter().all(|child| child.evaluate(record, ctx)),
            Self::Or(children) => children.iter().any(|child| child.evaluate(record, ctx)),
            Self::Not(child) => !child.evaluate(record, ctx),
            Self::GeneralText(text) => ctx.config.entries.iter().any(|entry| {
                record.get(&entry.name).is_some_and(|value| {
                    entry_matches(entry, value, ctx.tags, text, MatchMode::Partial)
                })
            }),
            Self::HasEntry(entry) => record.has_entry(&entry.name),
            Self::PartialMatch { entry, text } => {
                match_entry(record, ctx, entry, text, MatchMode::Partial)
            }
            Self::ExactMatch { entry, text } => {
                match_entry(record, ctx, entry, text, MatchMode::Exact)
            }
            Self::Compare {
                entry, op, target, ..
            } => {
                if !record.has_entry(&entry.name) {
                    return false;
                }
                record
                    .get(&entry.name)
                    .and_then(|value| sort_key(entry, value, ctx.tags))
                    .is_some_and(|key| op.holds(&key, target))
            }
        }
    }

    /// English description of the query.
    pub fn explain(&self) -> String {
        match self {
            Self::And(children) => explain_joined(children, " and ", "anything"),
            Self::Or(children) => explain_joined(children, " or ", "nothing"),
            Self::Not(child) => format!("not {}", explain_nested(child)),
            Self::GeneralText(text) => format!("includes \"{}\"", text),
            Self::HasEntry(entry) => format!("has entry \"{}\"", entry.name),
            Self::PartialMatch { entry, text } => {
                format!("entry \"{}\" includes \"{}\"", entry.name, text)
            }
            Self::ExactMatch { entry, text } => {
                format!("entry \"{}\" is exactly \"{}\"", entry.name, text)
            }
            Self::Compare {
                entry, op, operand, ..
            } => {
                let relation = match op {
                    CompareOp::Less => "is less than",
                    CompareOp::Equal => "equals",
                    CompareOp::Greater => "is greater than",
                };
                format!("entry \"{}\" {} \"{}\"", entry.name, relation, operand)
            }
        }
    }
}

impl fmt::Display for SearchNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.explain())
    }
}

fn match_entry(
    record: &Record,
    ctx: &SearchContext<'_>,
    entry: &EntryDefinition,
    text: &str,
    mode: MatchMode,
) -> bool {
    if !record.has_entry(&entry.name) {
        return false;
    }
    record
        .get(&entry.name)
        .is_some_and(|value| entry_matches(entry, value, ctx.tags, text, mode))
}

fn explain_nested(node: &SearchNode) -> String {
    match node {
        SearchNode::And(children) | SearchNode::Or(children) if children.len() > 1 => {
            format!("({})", node.explain())
        }
        _ => node.explain(),
    }
}

fn explain_joined(children: &[SearchNode], separator: &str, empty: &str) -> String {
    if children.is_empty() {
        return empty.to_string();
    }
    children
        .iter()
        .map(explain_nested)
        .collect::<Vec<_>>()
        .join(separator)
}

#[cfg(test)]
mod tests {
    use super::*;
    use kura_core::{EntryValue, SortingMethod};

    fn config() -> EntryConfiguration {
        EntryConfiguration::new(vec![
            EntryDefinition::string("title", SortingMethod::AsString),
            EntryDefinition::tag("genre", SortingMethod::Disabled, false),
            EntryDefinition::rating("score", 10),
        ])
    }

    fn pool() -> TagPool {
        TagPool::from_entries([("genre", vec!["jazz", "soul"])])
    }

    fn record() -> Record {
        Record::new()
            .with_entry("title", EntryValue::string("this is foo bar"))
            .with_entry("genre", EntryValue::tags(vec![1]))
            .with_entry("score", EntryValue::rating(7, None))
    }

    fn title() -> EntryDefinition {
        EntryDefinition::string("title", SortingMethod::AsString)
    }

    fn eval(node: &SearchNode, record: &Record) -> bool {
        let (config, tags) = (config(), pool());
        node.evaluate(record, &SearchContext::new(&config, &tags))
    }

    #[test]
    fn test_empty_logical_nodes_use_identity() {
        assert!(eval(&SearchNode::and(vec![]), &record()));
        assert!(!eval(&SearchNode::or(vec![]), &record()));
    }

    #[test]
    fn test_and_or_not() {
        let yes = SearchNode::HasEntry(title());
        let no = SearchNode::GeneralText("absent".to_string());

        assert!(!eval(&SearchNode::and(vec![yes.clone(), no.clone()]), &record()));
        assert!(eval(&SearchNode::or(vec![no.clone(), yes.clone()]), &record()));
        assert!(eval(&SearchNode::negate(no), &record()));
        assert!(!eval(&SearchNode::negate(yes), &record()));
    }

    #[test]
    fn test_general_text_scans_all_entries() {
        assert!(eval(&SearchNode::GeneralText("foo".to_string()), &record()));
        assert!(eval(&SearchNode::GeneralText("sou".to_string()), &record()));
        assert!(!eval(&SearchNode::GeneralText("jazz".to_string()), &record()));
    }

    #[test]
    fn test_has_entry_ignores_empty_value() {
        let record = Record::new().with_entry("title", EntryValue::string(""));
        assert!(!eval(&SearchNode::HasEntry(title()), &record));
    }

    #[test]
    fn test_partial_and_exact_match() {
        let partial = SearchNode::PartialMatch {
            entry: title(),
            text: "foo".to_string(),
        };
        let exact = SearchNode::ExactMatch {
            entry: title(),
            text: "foo".to_string(),
        };
        assert!(eval(&partial, &record()));
        assert!(!eval(&exact, &record()));
        assert!(!eval(&partial, &Record::new()));
    }

    #[test]
    fn test_compare_on_missing_entry_fails() {
        let node = SearchNode::Compare {
            entry: EntryDefinition::rating("score", 10),
            op: CompareOp::Less,
            target: kura_core::sorting::pack_integer(100),
            operand: "100".to_string(),
        };
        assert!(eval(&node, &record()));
        assert!(!eval(&node, &Record::new()));
        assert!(eval(&SearchNode::negate(node), &Record::new()));
    }

    #[test]
    fn test_push_and_remove_child() {
        let mut node = SearchNode::and(vec![]);
        let child = SearchNode::GeneralText("x".to_string());
        assert!(node.push_child(child.clone()));
        assert_eq!(node.children().len(), 1);
        assert!(node.remove_child(&child));
        assert!(!node.remove_child(&child));
        assert!(node.children().is_empty());

        let mut leaf = SearchNode::GeneralText("y".to_string());
        assert!(!leaf.push_child(child));
    }

    #[test]
    fn test_explain() {
        let node = SearchNode::and(vec![
            SearchNode::negate(SearchNode::HasEntry(EntryDefinition::rating("score", 10))),
            SearchNode::or(vec![
                SearchNode::GeneralText("foo".to_string()),
                SearchNode::PartialMatch {
                    entry: title(),
                    text: "bar".to_string(),
                },
            ]),
        ]);
        assert_eq!(
            node.explain(),
            "not has entry \"score\" and (includes \"foo\" or entry \"title\" includes \"bar\")"
        );
        assert_eq!(node.to_string(), node.explain());
    }

    #[test]
    fn test_compare_op_symbols() {
        for symbol in ['<', '@', '>'] {
            assert_eq!(CompareOp::from_symbol(symbol).unwrap().symbol(), symbol);
        }
        assert!(CompareOp::from_symbol('=').is_none());
    }
}
