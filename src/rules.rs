//! Rule store (C2). Holds the three keyed tables loaded from a user-supplied
//! rule document (spec.md §3, §6) and implements last-write-wins, with
//! column-qualified keys taking precedence over bare-type keys (§8 invariant 3).

use std::collections::HashMap;

use serde::Deserialize;

use crate::error::IngestError;

#[derive(Debug, Clone, Deserialize)]
pub struct DatatypeRule {
    pub translate_from: String,
    #[serde(default)]
    pub translate_from_autoinc: bool,
    pub translate_to: String,
    /// -1 means "keep the incoming length".
    #[serde(default = "default_keep_length")]
    pub translate_to_size: i32,
}

fn default_keep_length() -> i32 {
    -1
}

#[derive(Debug, Clone, Deserialize)]
pub struct ObjectNameRule {
    pub object_type: String,
    pub source_object: String,
    pub destination_object: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExpressionRule {
    pub transform_from: String,
    pub transform_expression: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct RuleDocument {
    #[serde(default)]
    pub transform_datatype_rules: Vec<DatatypeRule>,
    #[serde(default)]
    pub transform_objectname_rules: Vec<ObjectNameRule>,
    #[serde(default)]
    pub transform_expression_rules: Vec<ExpressionRule>,
}

/// A target type mapping: name plus replacement length (-1 = keep incoming).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetType {
    pub name: String,
    pub length: i32,
}

#[derive(Debug, Default)]
pub struct RuleStore {
    /// Keyed by `(key, autoincremented)` where `key` is either the bare
    /// source type name or `qualifiedColumnId.sourceTypeName`.
    type_map: HashMap<(String, bool), TargetType>,
    /// Keyed by `(sourceObjectId, objectType)`.
    object_name_map: HashMap<(String, String), String>,
    /// Keyed by `qualifiedColumnId`.
    expression_map: HashMap<String, String>,
}

impl RuleStore {
    pub fn load(doc: &RuleDocument) -> Self {
        let mut store = Self::default();
        for r in &doc.transform_datatype_rules {
            store.type_map.insert(
                (r.translate_from.clone(), r.translate_from_autoinc),
                TargetType {
                    name: r.translate_to.clone(),
                    length: r.translate_to_size,
                },
            );
        }
        for r in &doc.transform_objectname_rules {
            store.object_name_map.insert(
                (r.source_object.clone(), r.object_type.clone()),
                r.destination_object.clone(),
            );
        }
        for r in &doc.transform_expression_rules {
            store
                .expression_map
                .insert(r.transform_from.clone(), r.transform_expression.clone());
        }
        store
    }

    pub fn from_json(text: &str) -> Result<Self, IngestError> {
        let doc: RuleDocument =
            serde_json::from_str(text).map_err(|e| IngestError::RuleFileMalformed(e.to_string()))?;
        Ok(Self::load(&doc))
    }

    /// Type lookup: column-qualified key first, then bare-type key (§8
    /// invariant 3). `qualified_key` is e.g. `"inventory.orders.qty"`.
    pub fn lookup_type(
        &self,
        qualified_key: &str,
        bare_type: &str,
        auto_incremented: bool,
    ) -> Option<&TargetType> {
        let qualified_lookup_key = format!("{qualified_key}.{bare_type}");
        self.type_map
            .get(&(qualified_lookup_key, auto_incremented))
            .or_else(|| self.type_map.get(&(bare_type.to_string(), auto_incremented)))
    }

    pub fn lookup_object_name(&self, source_object_id: &str, object_type: &str) -> Option<&str> {
        self.object_name_map
            .get(&(source_object_id.to_string(), object_type.to_string()))
            .map(|s| s.as_str())
    }

    pub fn lookup_expression(&self, qualified_column_id: &str) -> Option<&str> {
        self.expression_map
            .get(qualified_column_id)
            .map(|s| s.as_str())
    }
}
