//! Exact-match resolution over fuzzy backend filters
//!
//! Vendor filter operators are often substring or prefix matches. The
//! server-side filter only narrows candidates; equality is asserted here.

use crate::client::{Filter, Queryable, RemoteItem, value_text};
use crate::error::{CloudError, Result};
use serde_json::Value;

/// Field that must equal a value exactly
#[derive(Debug, Clone, PartialEq)]
pub struct Constraint {
    pub field: String,
    pub value: Value,
}

impl Constraint {
    pub fn new(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            field: field.into(),
            value: value.into(),
        }
    }

    /// Values compare by their textual form, so a revision of `0` matches
    /// `"0"`. Anything else (prefixes, case differences, missing fields)
    /// is rejected.
    pub fn matches(&self, item: &RemoteItem) -> bool {
        match item.field(&self.field) {
            Some(actual) if actual == &self.value => true,
            Some(actual) if !actual.is_null() => value_text(actual) == value_text(&self.value),
            _ => false,
        }
    }
}

/// `name==web, revision==0`
pub fn describe(constraints: &[Constraint]) -> String {
    constraints
        .iter()
        .map(|c| format!("{}=={}", c.field, value_text(&c.value)))
        .collect::<Vec<_>>()
        .join(", ")
}

/// First item whose every constrained field equals the requested value.
///
/// Duplicate exact matches are not an error: the first one the backend
/// returned wins.
pub async fn find_exact<Q>(collection: &Q, constraints: &[Constraint]) -> Result<Option<RemoteItem>>
where
    Q: Queryable + ?Sized,
{
    let filters: Vec<Filter> = constraints
        .iter()
        .map(|c| Filter::eq(c.field.clone(), c.value.clone()))
        .collect();

    let candidates = collection.query(&filters).await?;
    let total = candidates.len();
    let found = candidates
        .into_iter()
        .find(|item| constraints.iter().all(|c| c.matches(item)));

    tracing::debug!(
        collection = collection.name(),
        constraints = %describe(constraints),
        candidates = total,
        matched = found.is_some(),
        "Exact-match lookup"
    );
    Ok(found)
}

/// Like [`find_exact`], but a missing match is a reference resolution
/// failure.
pub async fn require_exact<Q>(collection: &Q, constraints: &[Constraint]) -> Result<RemoteItem>
where
    Q: Queryable + ?Sized,
{
    find_exact(collection, constraints)
        .await?
        .ok_or_else(|| CloudError::ReferenceNotFound {
            collection: collection.name().to_string(),
            constraints: describe(constraints),
        })
}
