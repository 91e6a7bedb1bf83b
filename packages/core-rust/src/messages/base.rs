//! Base message types shared across all message domains.
//!
//! These types correspond to the TypeScript Zod schemas in
//! `packages/core/src/schemas/base-schemas.ts`. All structs use
//! `#[serde(rename_all = "camelCase")]` to produce wire-compatible
//! `MsgPack` output via `rmp_serde::to_vec_named()`.

use std::collections::HashMap;

use serde::{Deserialize, Deserializer, Serialize};

use crate::hlc::{LWWRecord, ORMapRecord};

// ---------------------------------------------------------------------------
// Double-Option helper for nullable + optional fields
// ---------------------------------------------------------------------------

/// Deserializes a field that is both optional (can be absent) and nullable (can be null).
///
/// This maps to the TS pattern `.nullable().optional()`:
/// - Absent field -> `None` (outer Option)
/// - Present field with null -> `Some(None)` (inner Option)
/// - Present field with value -> `Some(Some(value))`
///
/// Without this, serde collapses `null` into the outer `None`, losing the
/// distinction between "field absent" and "field explicitly null".
#[allow(clippy::option_option)]
fn deserialize_double_option<'de, T, D>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    Ok(Some(Option::deserialize(deserializer)?))
}

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Write concern level defining when an operation is considered acknowledged.
///
/// Maps to `WriteConcernSchema` in `base-schemas.ts`.
/// Variant names use `SCREAMING_CASE` to match TS wire format exactly.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[allow(non_camel_case_types)]
pub enum WriteConcern {
    FIRE_AND_FORGET,
    MEMORY,
    APPLIED,
    REPLICATED,
    PERSISTED,
}

/// Unified change event type for query, search, and cluster subscription updates.
///
/// Maps to `ChangeEventTypeSchema` in `base-schemas.ts`.
/// `SearchUpdateTypeSchema` in `search-schemas.ts` is an alias for this enum.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChangeEventType {
    ENTER,
    UPDATE,
    LEAVE,
}

/// Predicate operators for query filtering.
///
/// Maps to `PredicateOpSchema` in `base-schemas.ts`.
/// Lowercase variants match the TS enum values exactly.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PredicateOp {
    Eq,
    Neq,
    Gt,
    Gte,
    Lt,
    Lte,
    Like,
    Regex,
    And,
    Or,
    Not,
}

/// Sort direction for query ordering.
///
/// Maps to `z.enum(['asc', 'desc'])` in `QuerySchema.sort` in `base-schemas.ts`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    Asc,
    Desc,
}

// ---------------------------------------------------------------------------
// Structs
// ---------------------------------------------------------------------------

/// A recursive predicate node for query filtering.
///
/// Maps to `PredicateNodeSchema` in `base-schemas.ts`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PredicateNode {
    pub op: PredicateOp,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub attribute: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub value: Option<rmpv::Value>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub children: Option<Vec<PredicateNode>>,
}

/// Query parameters for filtering, sorting, and pagination.
///
/// Maps to `QuerySchema` in `base-schemas.ts`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Query {
    /// Key-value filter conditions. `where` is a Rust keyword, so we use raw identifier syntax.
    #[serde(rename = "where")]
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub r#where: Option<HashMap<String, rmpv::Value>>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub predicate: Option<PredicateNode>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub sort: Option<HashMap<String, SortDirection>>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub limit: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub cursor: Option<String>,
}

/// A client operation message containing CRDT data.
///
/// Maps to `ClientOpSchema` in `base-schemas.ts`.
///
/// Note: `Default` produces empty `map_name`/`key` -- for test convenience only.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[allow(clippy::option_option)]
pub struct ClientOp {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub id: Option<String>,
    pub map_name: String,
    pub key: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub op_type: Option<String>,
    #[serde(
        skip_serializing_if = "Option::is_none",
        default,
        deserialize_with = "deserialize_double_option"
    )]
    pub record: Option<Option<LWWRecord<rmpv::Value>>>,
    #[serde(
        skip_serializing_if = "Option::is_none",
        default,
        deserialize_with = "deserialize_double_option"
    )]
    pub or_record: Option<Option<ORMapRecord<rmpv::Value>>>,
    #[serde(
        skip_serializing_if = "Option::is_none",
        default,
        deserialize_with = "deserialize_double_option"
    )]
    pub or_tag: Option<Option<String>>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub write_concern: Option<WriteConcern>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub timeout: Option<u64>,
}

/// Authentication message sent by client to server.
///
/// Maps to `AuthMessageSchema` in `base-schemas.ts`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthMessage {
    pub token: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub protocol_version: Option<u32>,
}

/// Authentication required message sent by server to client.
///
/// Maps to `AuthRequiredMessageSchema` in `base-schemas.ts`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthRequiredMessage {}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
