//! # kura-search
//!
//! One-line search commands over a kura catalog.
//!
//! This crate provides:
//! - A compiler from query text to a [`SearchNode`] tree
//! - Evaluation of that tree against records, given the entry configuration
//!   and tag pool
//! - Per-entry-type text matchers
//!
//! ## Example
//!
//! ```
//! use kura_core::{CatalogData, EntryConfiguration, EntryDefinition, EntryValue, Record, SortingMethod};
//! use kura_search::{compile, search};
//!
//! let config = EntryConfiguration::new(vec![
//!     EntryDefinition::string("title", SortingMethod::AsString),
//!     EntryDefinition::rating("score", 10),
//! ]);
//! let data = CatalogData::new(config.clone())
//!     .with_record("a", Record::new()
//!         .with_entry("title", EntryValue::string("Blue Train"))
//!         .with_entry("score", EntryValue::rating(9, None)))
//!     .with_record("b", Record::new()
//!         .with_entry("title", EntryValue::string("Giant Steps"))
//!         .with_entry("score", EntryValue::rating(4, None)));
//!
//! let node = compile("$score>5", &config).unwrap();
//! assert_eq!(search(&data, &node), vec!["a".to_string()]);
//! ```

pub mod compiler;
pub mod matcher;
pub mod node;

use std::collections::BTreeMap;

use kura_core::{CatalogData, Record};
use tracing::debug;

pub use compiler::{
    available_operators, compile, compile_all, extract_enclosed_string, operator_index,
    to_enclosed_string, Enclosed, OperatorInfo, OPERATORS,
};
pub use matcher::{entry_matches, MatchMode};
pub use node::{CompareOp, SearchContext, SearchNode};

/// Ids of the records in `records` matching `node`, in id order.
pub fn search_records(
    records: &BTreeMap<String, Record>,
    node: &SearchNode,
    ctx: &SearchContext<'_>,
) -> Vec<String> {
    let matched: Vec<String> = records
        .iter()
        .filter(|(_, record)| node.evaluate(record, ctx))
        .map(|(id, _)| id.clone())
        .collect();
    debug!(
        total = records.len(),
        matched = matched.len(),
        query = %node,
        "Search evaluated"
    );
    matched
}

/// Ids of the catalog's records matching `node`, in id order.
pub fn search(data: &CatalogData, node: &SearchNode) -> Vec<String> {
    let tags = data.tag_pool();
    let ctx = SearchContext::new(data.entry_configuration(), &tags);
    search_records(&data.data, node, &ctx)
}
