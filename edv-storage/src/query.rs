//! Attribute-equality queries over indexed document metadata.
//!
//! A query is a list of name/value constraints. Constraints that share a name
//! are alternatives for that name; distinct names must all be satisfied:
//!
//! ```text
//! [(color, red), (color, blue), (size, L)]
//!   => (color = red OR color = blue) AND size = L
//! ```
//!
//! Backends with a native index translate [`Query::clauses`] into their own
//! lookup. Backends without one fall back to [`Query::matches`] over a full
//! scan; both paths must return the same ids.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::models::EncryptedDocument;

/// One required name/value pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryAttribute {
    pub name: String,
    pub value: String,
}

/// A conjunction-of-disjunctions attribute filter.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Query {
    #[serde(default)]
    pub attributes: Vec<QueryAttribute>,
}

impl Query {
    /// Query for a single name/value pair.
    pub fn equals(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self::default().or_equals(name, value)
    }

    /// Add another constraint. Reusing a name widens that name's accepted values.
    pub fn or_equals(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.push(QueryAttribute {
            name: name.into(),
            value: value.into(),
        });
        self
    }

    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty()
    }

    /// Constraints grouped by attribute name, each with its set of accepted values.
    pub fn clauses(&self) -> BTreeMap<&str, BTreeSet<&str>> {
        let mut clauses: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
        for attr in &self.attributes {
            clauses
                .entry(attr.name.as_str())
                .or_default()
                .insert(attr.value.as_str());
        }
        clauses
    }

    /// Evaluate the query against one document's indexed attributes.
    ///
    /// An empty query matches nothing.
    pub fn matches(&self, document: &EncryptedDocument) -> bool {
        let clauses = self.clauses();
        if clauses.is_empty() {
            return false;
        }

        clauses.iter().all(|(name, values)| {
            document
                .attributes()
                .any(|attr| attr.name == *name && values.contains(attr.value.as_str()))
        })
    }
}
