//! Read, query and paging options

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use rowmap_core::{StoreError, TimestampBound};

fn property_set<I, S>(properties: I) -> BTreeSet<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    properties.into_iter().map(Into::into).collect()
}

/// Options of a keyed read. `None` fields fall back to the template config.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReadOptions {
    pub timestamp_bound: Option<TimestampBound>,
    pub include_properties: Option<BTreeSet<String>>,
    pub exclude_properties: Option<BTreeSet<String>>,
    /// Secondary index to read through. Only the direct read path can use one.
    pub index: Option<String>,
    pub limit: Option<u64>,
    pub allow_partial_read: bool,
    pub request_tag: Option<String>,
}

impl ReadOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn timestamp_bound(mut self, bound: TimestampBound) -> Self {
        self.timestamp_bound = Some(bound);
        self
    }

    pub fn include<I: IntoIterator<Item = S>, S: Into<String>>(mut self, properties: I) -> Self {
        self.include_properties = Some(property_set(properties));
        self
    }

    pub fn exclude<I: IntoIterator<Item = S>, S: Into<String>>(mut self, properties: I) -> Self {
        self.exclude_properties = Some(property_set(properties));
        self
    }

    pub fn index(mut self, index: impl Into<String>) -> Self {
        self.index = Some(index.into());
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn allow_partial_read(mut self, allow: bool) -> Self {
        self.allow_partial_read = allow;
        self
    }

    pub fn request_tag(mut self, tag: impl Into<String>) -> Self {
        self.request_tag = Some(tag.into());
        self
    }

    /// Query-shaped view of these options. A secondary index has no query
    /// equivalent, so its presence is an error.
    pub fn to_query_options(&self) -> Result<QueryOptions, StoreError> {
        if let Some(index) = &self.index {
            return Err(StoreError::InvalidArgument(format!(
                "read through index {index} cannot be combined with a query-driven read"
            )));
        }
        Ok(QueryOptions {
            timestamp_bound: self.timestamp_bound,
            include_properties: self.include_properties.clone(),
            exclude_properties: self.exclude_properties.clone(),
            allow_partial_read: self.allow_partial_read,
            request_tag: self.request_tag.clone(),
        })
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryOptions {
    pub timestamp_bound: Option<TimestampBound>,
    pub include_properties: Option<BTreeSet<String>>,
    pub exclude_properties: Option<BTreeSet<String>>,
    pub allow_partial_read: bool,
    pub request_tag: Option<String>,
}

impl QueryOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn timestamp_bound(mut self, bound: TimestampBound) -> Self {
        self.timestamp_bound = Some(bound);
        self
    }

    pub fn include<I: IntoIterator<Item = S>, S: Into<String>>(mut self, properties: I) -> Self {
        self.include_properties = Some(property_set(properties));
        self
    }

    pub fn exclude<I: IntoIterator<Item = S>, S: Into<String>>(mut self, properties: I) -> Self {
        self.exclude_properties = Some(property_set(properties));
        self
    }

    pub fn allow_partial_read(mut self, allow: bool) -> Self {
        self.allow_partial_read = allow;
        self
    }

    pub fn request_tag(mut self, tag: impl Into<String>) -> Self {
        self.request_tag = Some(tag.into());
        self
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    #[default]
    Asc,
    Desc,
}

/// Sort order on an entity property.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sort {
    pub property: String,
    #[serde(default)]
    pub direction: Direction,
}

impl Sort {
    pub fn asc(property: impl Into<String>) -> Self {
        Self { property: property.into(), direction: Direction::Asc }
    }

    pub fn desc(property: impl Into<String>) -> Self {
        Self { property: property.into(), direction: Direction::Desc }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PageableQueryOptions {
    pub query: QueryOptions,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
    pub sort: Vec<Sort>,
}

impl PageableQueryOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Zero-based page `number` of `size` rows.
    pub fn page(number: u64, size: u64) -> Self {
        Self { limit: Some(size), offset: Some(number.saturating_mul(size)), ..Self::default() }
    }

    pub fn query(mut self, query: QueryOptions) -> Self {
        self.query = query;
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }

    pub fn sort(mut self, sort: Sort) -> Self {
        self.sort.push(sort);
        self
    }
}
