//! Tenant isolation filter.
//!
//! The engine is shared by every tenant in the process, so a query must name
//! exactly one tenant before it may touch any record. [`TenantFilter`] can only
//! be built with both scoping fields present and non-blank; holding one is the
//! proof that validation happened.

use std::collections::{BTreeMap, HashMap};

use serde::Serialize;
use studyvault_core::IsolationError;

use crate::types::{Metadata, ROLL_NO_KEY, SOURCE_KEY, UNIVERSITY_KEY};

/// A validated, tenant-scoped metadata filter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TenantFilter {
    university: String,
    roll_no: String,
    extra: BTreeMap<String, String>,
}

impl TenantFilter {
    /// Scope a filter to one tenant.
    pub fn new(
        university: impl Into<String>,
        roll_no: impl Into<String>,
    ) -> Result<Self, IsolationError> {
        let university = university.into();
        let roll_no = roll_no.into();

        if university.trim().is_empty() {
            return Err(IsolationError::EmptyTenantField(UNIVERSITY_KEY));
        }
        if roll_no.trim().is_empty() {
            return Err(IsolationError::EmptyTenantField(ROLL_NO_KEY));
        }

        Ok(Self {
            university,
            roll_no,
            extra: BTreeMap::new(),
        })
    }

    /// Add an extra equality constraint.
    ///
    /// The scoping keys cannot be overridden through here.
    pub fn with_extra(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let key = key.into();
        if key != UNIVERSITY_KEY && key != ROLL_NO_KEY {
            self.extra.insert(key, value.into());
        }
        self
    }

    pub fn university(&self) -> &str {
        &self.university
    }

    pub fn roll_no(&self) -> &str {
        &self.roll_no
    }

    pub fn extra(&self) -> &BTreeMap<String, String> {
        &self.extra
    }

    /// Whether a record's metadata satisfies every constraint.
    pub fn matches(&self, metadata: &Metadata) -> bool {
        field_equals(metadata, UNIVERSITY_KEY, &self.university)
            && field_equals(metadata, ROLL_NO_KEY, &self.roll_no)
            && self
                .extra
                .iter()
                .all(|(key, value)| field_equals(metadata, key, value))
    }
}

fn field_equals(metadata: &Metadata, key: &str, expected: &str) -> bool {
    metadata
        .get(key)
        .is_some_and(|value| value.matches_str(expected))
}

/// Validate an ad hoc filter map.
///
/// Both `university` and `roll_no` are mandatory; all other keys become
/// extra equality constraints.
pub fn validate(filters: &HashMap<String, String>) -> Result<TenantFilter, IsolationError> {
    let university = filters
        .get(UNIVERSITY_KEY)
        .ok_or(IsolationError::MissingTenantScope(UNIVERSITY_KEY))?;
    let roll_no = filters
        .get(ROLL_NO_KEY)
        .ok_or(IsolationError::MissingTenantScope(ROLL_NO_KEY))?;

    let mut filter = TenantFilter::new(university.as_str(), roll_no.as_str())?;
    for (key, value) in filters {
        filter = filter.with_extra(key.as_str(), value.as_str());
    }

    Ok(filter)
}

/// Per-record predicate used by the query pipeline.
///
/// `allowed_sources = Some(&[])` admits nothing. An empty allow-list is not
/// treated as "no restriction"; pass `None` for that.
pub fn apply(metadata: &Metadata, filter: &TenantFilter, allowed_sources: Option<&[String]>) -> bool {
    if let Some(sources) = allowed_sources {
        let Some(source) = metadata.get(SOURCE_KEY) else {
            return false;
        };
        if !sources.iter().any(|allowed| source.matches_str(allowed)) {
            return false;
        }
    }

    filter.matches(metadata)
}
