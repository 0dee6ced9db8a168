//! Envelope reader (C1). Decodes one JSON change event and provides
//! path-addressed scalar and subtree access over it.

use serde_json::Value;

/// Sentinel returned by [`EnvelopeReader::get_string`] when the addressed
/// path is absent or JSON null (spec.md §8 invariant 2).
pub const NULL_SENTINEL: &str = "NULL";

pub struct EnvelopeReader {
    root: Value,
}

impl EnvelopeReader {
    pub fn parse(doc: &str) -> Result<Self, serde_json::Error> {
        Ok(Self {
            root: serde_json::from_str(doc)?,
        })
    }

    pub fn from_value(root: Value) -> Self {
        Self { root }
    }

    /// Resolve a dotted path into the document. Numeric path segments index
    /// into arrays (`tableChanges.0.id`); all others index into objects.
    fn resolve<'a>(&'a self, dotted_path: &str) -> Option<&'a Value> {
        let mut cur = &self.root;
        for segment in dotted_path.split('.') {
            cur = match cur {
                Value::Object(map) => map.get(segment)?,
                Value::Array(arr) => {
                    let idx: usize = segment.parse().ok()?;
                    arr.get(idx)?
                }
                _ => return None,
            };
        }
        Some(cur)
    }

    /// Returns the value at `dotted_path` rendered as text, or the
    /// [`NULL_SENTINEL`] if the path is absent or JSON null.
    ///
    /// When `unquote` is true, a JSON string value is returned as its bare
    /// content (no surrounding quotes, escapes resolved); other JSON scalars
    /// are rendered as their natural text form either way.
    pub fn get_string(&self, dotted_path: &str, unquote: bool) -> String {
        match self.resolve(dotted_path) {
            None | Some(Value::Null) => NULL_SENTINEL.to_string(),
            Some(Value::String(s)) => {
                if unquote {
                    s.clone()
                } else {
                    serde_json::to_string(s).unwrap_or_else(|_| s.clone())
                }
            }
            Some(Value::Object(_)) | Some(Value::Array(_)) => {
                // Nested subtree under a scalar-access call is re-serialized
                // as a JSON string, matching the wkb/srid geometry case.
                serde_json::to_string(self.resolve(dotted_path).unwrap())
                    .unwrap_or_else(|_| NULL_SENTINEL.to_string())
            }
            Some(other) => other.to_string(),
        }
    }

    /// Returns the subtree for further iteration, or `None` if absent.
    pub fn get_subtree(&self, dotted_path: &str) -> Option<&Value> {
        self.resolve(dotted_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_sentinel_on_absent_path() {
        let r = EnvelopeReader::parse(r#"{"a":{"b":1}}"#).unwrap();
        assert_eq!(r.get_string("a.c", false), "NULL");
    }

    #[test]
    fn null_sentinel_on_json_null() {
        let r = EnvelopeReader::parse(r#"{"a":null}"#).unwrap();
        assert_eq!(r.get_string("a", false), "NULL");
    }

    #[test]
    fn unquote_strips_quoting() {
        let r = EnvelopeReader::parse(r#"{"a":"hello \"world\""}"#).unwrap();
        assert_eq!(r.get_string("a", true), "hello \"world\"");
        assert_eq!(r.get_string("a", false), "\"hello \\\"world\\\"\"");
    }

    #[test]
    fn array_index_resolution() {
        let r = EnvelopeReader::parse(r#"{"tableChanges":[{"id":"db.t"}]}"#).unwrap();
        assert_eq!(r.get_string("tableChanges.0.id", true), "db.t");
    }

    #[test]
    fn nested_object_reserialized_as_string() {
        let r = EnvelopeReader::parse(r#"{"geo":{"wkb":"AA==","srid":4326}}"#).unwrap();
        let s = r.get_string("geo", false);
        assert!(s.contains("wkb"));
        assert!(s.contains("4326"));
    }

    #[test]
    fn get_subtree_returns_value() {
        let r = EnvelopeReader::parse(r#"{"payload":{"after":{"id":1}}}"#).unwrap();
        let sub = r.get_subtree("payload.after").unwrap();
        assert_eq!(sub.get("id").unwrap(), 1);
    }
}
