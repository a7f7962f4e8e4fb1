//! Session-scoped helpers: model selection and id-to-file-name encoding.

use serde::{Deserialize, Serialize};

/// Which provider/model a turn should use. Both fields fall back to config defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelSelection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

/// Encode an opaque id as a file name.
///
/// ASCII alphanumerics and `-` pass through; every other byte, `_` included,
/// becomes `_XX` (uppercase hex). The mapping is injective, so distinct ids
/// never share a file. The empty id maps to `_`, which no other id produces.
pub fn sanitize_id(id: &str) -> String {
    if id.is_empty() {
        return "_".into();
    }
    let mut out = String::with_capacity(id.len());
    for b in id.bytes() {
        if b.is_ascii_alphanumeric() || b == b'-' {
            out.push(b as char);
        } else {
            out.push_str(&format!("_{b:02X}"));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_id() {
        assert_eq!(sanitize_id("abc-123"), "abc-123");
        assert_eq!(sanitize_id("../etc/passwd"), "_2E_2E_2Fetc_2Fpasswd");
        assert_eq!(sanitize_id(""), "_");
        assert_eq!(sanitize_id("é"), "_C3_A9");
    }

    #[test]
    fn test_sanitize_id_keeps_distinct_ids_distinct() {
        let ids = ["canvas.1", "canvas_1", "canvas_2E1", "canvas 1", "_", "", "_5F"];
        let encoded: std::collections::HashSet<String> =
            ids.iter().map(|id| sanitize_id(id)).collect();
        assert_eq!(encoded.len(), ids.len());
    }

    #[test]
    fn test_model_selection_defaults_empty() {
        let sel: ModelSelection = serde_json::from_str("{}").unwrap();
        assert!(sel.provider.is_none());
        assert!(sel.model.is_none());
    }
}
