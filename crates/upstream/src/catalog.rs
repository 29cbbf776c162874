use serde::{Deserialize, Serialize};

/// A tool as advertised by an upstream's `tools/list`, before the gateway's
/// prefix is applied.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tool {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default, rename = "inputSchema")]
    pub input_schema: serde_json::Value,
    #[serde(default)]
    pub annotations: ToolAnnotations,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolAnnotations {
    #[serde(default, rename = "readOnlyHint")]
    pub read_only_hint: Option<bool>,
    #[serde(default, rename = "destructiveHint")]
    pub destructive_hint: Option<bool>,
    #[serde(default, rename = "idempotentHint")]
    pub idempotent_hint: Option<bool>,
    #[serde(default, rename = "openWorldHint")]
    pub open_world_hint: Option<bool>,
}

impl ToolAnnotations {
    /// The `x-mcp-annotation-hints` header value: a stable comma-separated
    /// `key=value` list, `unspecified` standing in for an absent hint.
    pub fn to_header_value(self) -> String {
        fn fmt(hint: Option<bool>) -> &'static str {
            match hint {
                Some(true) => "true",
                Some(false) => "false",
                None => "unspecified",
            }
        }
        format!(
            "readOnly={},destructive={},idempotent={},openWorld={}",
            fmt(self.read_only_hint),
            fmt(self.destructive_hint),
            fmt(self.idempotent_hint),
            fmt(self.open_world_hint),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_value_uses_unspecified_for_absent_hints() {
        let annotations = ToolAnnotations {
            read_only_hint: Some(true),
            ..Default::default()
        };
        assert_eq!(
            annotations.to_header_value(),
            "readOnly=true,destructive=unspecified,idempotent=unspecified,openWorld=unspecified"
        );
    }
}
