use crate::error::ValidationError;
use chrono::{DateTime, Utc};
use resq_types::Identity;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::rc::Rc;

/// Validates and parses one raw field value.
///
/// Validators must not touch anything but their input and the
/// [`ConstructionContext`] they are handed. Closures with the matching
/// signature implement this trait.
pub trait FieldValidator {
    fn validate(&self, raw: &Value, ctx: &mut ConstructionContext)
    -> Result<Value, ValidationError>;
}

impl<F> FieldValidator for F
where
    F: Fn(&Value, &mut ConstructionContext) -> Result<Value, ValidationError>,
{
    fn validate(
        &self,
        raw: &Value,
        ctx: &mut ConstructionContext,
    ) -> Result<Value, ValidationError> {
        self(raw, ctx)
    }
}

/// Per-construction scratch state threaded through every validator.
///
/// The identity validator records the entity's identity here before the rest
/// of the entity exists; `updated_on` records the source timestamp used by
/// [`MergeStrategy::LastWriterWins`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConstructionContext {
    identity: Option<Identity>,
    updated_on: Option<DateTime<Utc>>,
}

impl ConstructionContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn capture_identity(&mut self, identity: Identity) {
        self.identity = Some(identity);
    }

    pub fn identity(&self) -> Option<&Identity> {
        self.identity.as_ref()
    }

    pub fn capture_updated_on(&mut self, at: DateTime<Utc>) {
        self.updated_on = Some(at);
    }

    pub fn updated_on(&self) -> Option<DateTime<Utc>> {
        self.updated_on
    }

    pub(crate) fn into_parts(self) -> (Option<Identity>, Option<DateTime<Utc>>) {
        (self.identity, self.updated_on)
    }
}

/// Ordered field name → validator mapping describing an entity class.
#[derive(Clone, Default)]
pub struct Shape {
    fields: Vec<(String, Rc<dyn FieldValidator>)>,
}

impl fmt::Debug for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

impl Shape {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares a field. Redeclaring a name replaces its validator in place.
    #[must_use]
    pub fn field(
        mut self,
        name: impl Into<String>,
        validator: impl FieldValidator + 'static,
    ) -> Self {
        self.insert(name.into(), Rc::new(validator));
        self
    }

    fn insert(&mut self, name: String, validator: Rc<dyn FieldValidator>) {
        match self.fields.iter_mut().find(|(n, _)| *n == name) {
            Some(slot) => slot.1 = validator,
            None => self.fields.push((name, validator)),
        }
    }

    /// Union of both shapes; `other` wins on name collisions.
    #[must_use]
    pub fn extend(&self, other: &Shape) -> Shape {
        let mut merged = self.clone();
        for (name, validator) in &other.fields {
            merged.insert(name.clone(), Rc::clone(validator));
        }
        merged
    }

    pub fn get(&self, name: &str) -> Option<&Rc<dyn FieldValidator>> {
        self.fields.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Field names in declaration order.
    pub fn names(&self) -> impl Iterator<Item = &str> + '_ {
        self.fields.iter().map(|(n, _)| n.as_str())
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = (&str, &Rc<dyn FieldValidator>)> + '_ {
        self.fields.iter().map(|(n, v)| (n.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// How a construction that hits an existing record is applied.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeStrategy {
    /// Every construction writes its validated fields (default).
    #[default]
    Overwrite,
    /// Constructions whose `updated_on` is older than the record's are
    /// ignored. Constructions without a timestamp always apply.
    LastWriterWins,
}
