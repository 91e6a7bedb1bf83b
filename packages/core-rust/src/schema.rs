//! Index mapping schema: field definitions, additive merge, and validation.
//!
//! A [`MapSchema`] is the typed shape of an index's documents. Mappings evolve
//! only additively: new fields may be introduced, but an existing field's type
//! can never change underneath it. [`MapSchema::merge`] implements that rule
//! and is the core of dynamic mapping updates.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Supported field types. Kept intentionally small — the analyzer/tokenizer
/// configuration a real field mapper carries is an external collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    Text,
    Keyword,
    Long,
    Double,
    Boolean,
    Date,
    Object,
}

/// Single field definition within a schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDef {
    /// Name of the field.
    pub name: String,
    /// Whether the field must be present in every record.
    pub required: bool,
    /// Declared type of the field.
    pub field_type: FieldType,
}

/// Schema definition for a map/index: a flat, ordered set of field definitions.
///
/// Fields are kept sorted by name so two schemas with the same fields always
/// serialize identically, which is what byte-equality mapping-update checks
/// depend on.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MapSchema {
    /// Schema version for migrations and compatibility checks.
    pub version: u32,
    /// Field definitions, sorted by name.
    pub fields: Vec<FieldDef>,
}

/// Result of validating a value against a schema, or of a dynamic mapping merge.
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationResult {
    /// The value (or merge) conforms to the schema.
    Valid,
    /// The value (or merge) violates one or more constraints.
    Invalid {
        /// Human-readable descriptions of each validation failure.
        errors: Vec<String>,
    },
}

impl ValidationResult {
    pub fn is_valid(&self) -> bool {
        matches!(self, Self::Valid)
    }
}

impl MapSchema {
    /// Builds a schema from field definitions, sorting them by name for
    /// canonical serialization.
    pub fn new(version: u32, mut fields: Vec<FieldDef>) -> Self {
        fields.sort_by(|a, b| a.name.cmp(&b.name));
        Self { version, fields }
    }

    fn field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Canonical content hash used for byte-equality short-circuits during
    /// mapping updates: two schemas with the same hash are treated as
    /// identical without a field-by-field comparison.
    pub fn content_hash(&self) -> [u8; 32] {
        let bytes = rmp_serde::to_vec_named(self).expect("MapSchema always serializes");
        blake3::hash(&bytes).into()
    }

    /// Validates that `incoming` can be merged additively into `self`:
    /// every field present in both must agree on type; fields present only in
    /// `incoming` are new and always accepted. Does not mutate `self`.
    pub fn validate_merge(&self, incoming: &MapSchema) -> ValidationResult {
        let mut errors = Vec::new();
        for field in &incoming.fields {
            if let Some(existing) = self.field(&field.name) {
                if existing.field_type != field.field_type {
                    errors.push(format!(
                        "field '{}' cannot change type from {:?} to {:?}",
                        field.name, existing.field_type, field.field_type
                    ));
                }
            }
        }
        if errors.is_empty() {
            ValidationResult::Valid
        } else {
            ValidationResult::Invalid { errors }
        }
    }

    /// Merges `incoming` additively into `self`, returning the merged schema.
    ///
    /// Callers must call [`MapSchema::validate_merge`] first; this method
    /// assumes the merge is valid and will panic on a type conflict, since a
    /// conflicting merge should never reach this point in the pipeline.
    pub fn merge(&self, incoming: &MapSchema) -> MapSchema {
        let mut by_name: BTreeMap<String, FieldDef> = self
            .fields
            .iter()
            .cloned()
            .map(|f| (f.name.clone(), f))
            .collect();

        for field in &incoming.fields {
            if let Some(existing) = by_name.get(&field.name) {
                assert_eq!(
                    existing.field_type, field.field_type,
                    "validate_merge must be called before merge"
                );
            }
            by_name
                .entry(field.name.clone())
                .and_modify(|f| f.required = f.required || field.required)
                .or_insert_with(|| field.clone());
        }

        MapSchema {
            version: self.version,
            fields: by_name.into_values().collect(),
        }
    }
}

/// Row-level filter predicate for sync shapes.
/// Placeholder: will become an expression tree when query filtering is built.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Predicate {
    /// String representation of the filter expression.
    pub expression: String,
}

/// Defines what subset of a map's data a client receives.
/// Used for partial replication (shapes).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncShape {
    /// Name of the map this shape applies to.
    pub map_name: String,
    /// Optional row-level filter to restrict which records are synced.
    pub filter: Option<Predicate>,
    /// Optional column projection to restrict which fields are synced.
    pub fields: Option<Vec<String>>,
    /// Optional maximum number of records to sync.
    pub limit: Option<usize>,
}
