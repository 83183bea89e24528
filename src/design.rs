//! Compiling design documents into spatial index group definitions.
//!
//! A design document names one or more spatial views, each with the source of
//! the function that extracts spatial keys from documents. Views that share a
//! source share one index, so the compiler groups them by source, numbers the
//! groups deterministically and computes a content signature for the whole
//! definition. The signature names the index files on disk; any change to the
//! definition changes it and forces a rebuild.

use crate::error::{Result, SpatialError};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

const DEFAULT_LANGUAGE: &str = "javascript";

/// SHA-256 content signature of an index group definition.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Signature([u8; 32]);

impl Signature {
    /// Hashes arbitrary bytes.
    pub fn digest(bytes: impl AsRef<[u8]>) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(bytes.as_ref());
        let mut out = [0u8; 32];
        out.copy_from_slice(&hasher.finalize());
        Self(out)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Lowercase hex rendering, as used in index file names.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Signature({})", self.to_hex())
    }
}

/// Source of a spatial key extraction function.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SpatialKeySource(pub String);

impl SpatialKeySource {
    pub fn new(source: impl Into<String>) -> Self {
        Self(source.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// One index within a group: a key source and every view name that uses it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexDescriptor {
    pub source: SpatialKeySource,
    pub view_names: BTreeSet<String>,
    /// Position of `source` among the sorted distinct sources of the group.
    pub id_num: usize,
}

impl IndexDescriptor {
    pub fn has_view(&self, name: &str) -> bool {
        self.view_names.contains(name)
    }
}

/// A design document: its id plus the JSON body.
#[derive(Debug, Clone, PartialEq)]
pub struct DesignDocument {
    pub id: String,
    pub body: Value,
}

impl DesignDocument {
    pub fn new(id: impl Into<String>, body: Value) -> Self {
        Self {
            id: id.into(),
            body,
        }
    }
}

#[derive(Debug, Deserialize)]
struct DesignBody {
    #[serde(default)]
    language: Option<String>,
    #[serde(default)]
    options: Map<String, Value>,
    #[serde(default)]
    spatial: BTreeMap<String, Value>,
    #[serde(default)]
    views: Map<String, Value>,
}

/// Compiled definition of an index group, without any open handles.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupDefinition {
    pub db_name: String,
    pub group_name: String,
    pub signature: Signature,
    pub language: String,
    pub design_options: Map<String, Value>,
    /// Shared code fragment (`views.lib`), canonicalized.
    pub lib: Value,
    pub descriptors: Vec<IndexDescriptor>,
}

impl GroupDefinition {
    /// Finds the index serving the view called `name`.
    pub fn descriptor_for(&self, name: &str) -> Option<&IndexDescriptor> {
        self.descriptors.iter().find(|d| d.has_view(name))
    }
}

/// Compiles a design document into its group definition.
///
/// Views are grouped by key source; groups are ordered by source and numbered
/// from zero. Identical document content always yields identical numbering
/// and signature.
///
/// # Examples
///
/// ```
/// use geoview::design::{DesignDocument, compile};
/// use serde_json::json;
///
/// let ddoc = DesignDocument::new(
///     "_design/geo",
///     json!({"spatial": {"a": "S1", "b": "S1", "c": "S2"}}),
/// );
/// let group = compile("places", &ddoc)?;
///
/// assert_eq!(group.descriptors.len(), 2);
/// assert_eq!(group.descriptors[0].id_num, 0);
/// assert!(group.descriptors[0].has_view("a") && group.descriptors[0].has_view("b"));
/// assert!(group.descriptors[1].has_view("c"));
/// # Ok::<(), geoview::SpatialError>(())
/// ```
pub fn compile(db_name: &str, ddoc: &DesignDocument) -> Result<GroupDefinition> {
    let body: DesignBody = serde_json::from_value(ddoc.body.clone())
        .map_err(|e| SpatialError::InvalidDesignDoc(format!("{}: {}", ddoc.id, e)))?;

    let mut by_source: BTreeMap<SpatialKeySource, BTreeSet<String>> = BTreeMap::new();
    for (name, source) in body.spatial {
        let Value::String(source) = source else {
            return Err(SpatialError::InvalidDesignDoc(format!(
                "{}: spatial view `{}` must be a function source string",
                ddoc.id, name
            )));
        };
        by_source
            .entry(SpatialKeySource(source))
            .or_default()
            .insert(name);
    }

    let descriptors: Vec<IndexDescriptor> = by_source
        .into_iter()
        .enumerate()
        .map(|(id_num, (source, view_names))| IndexDescriptor {
            source,
            view_names,
            id_num,
        })
        .collect();

    let language = body
        .language
        .unwrap_or_else(|| DEFAULT_LANGUAGE.to_string());
    let design_options = match canonicalize(Value::Object(body.options)) {
        Value::Object(map) => map,
        _ => Map::new(),
    };
    let lib = canonicalize(body.views.get("lib").cloned().unwrap_or(Value::Null));

    let signature = group_signature(&descriptors, &language, &design_options, &lib)?;
    log::debug!(
        "compiled {} in {}: {} index(es), signature {}",
        ddoc.id,
        db_name,
        descriptors.len(),
        signature
    );

    Ok(GroupDefinition {
        db_name: db_name.to_string(),
        group_name: ddoc.id.clone(),
        signature,
        language,
        design_options,
        lib,
        descriptors,
    })
}

fn group_signature(
    descriptors: &[IndexDescriptor],
    language: &str,
    design_options: &Map<String, Value>,
    lib: &Value,
) -> Result<Signature> {
    let encoded = serde_json::to_vec(&serde_json::json!([
        descriptors,
        language,
        design_options,
        lib
    ]))?;
    Ok(Signature::digest(encoded))
}

/// Rebuilds every object in `value` with its keys in sorted order.
pub fn canonicalize(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let sorted: BTreeMap<String, Value> = map
                .into_iter()
                .map(|(k, v)| (k, canonicalize(v)))
                .collect();
            Value::Object(sorted.into_iter().collect())
        }
        Value::Array(items) => Value::Array(items.into_iter().map(canonicalize).collect()),
        other => other,
    }
}
