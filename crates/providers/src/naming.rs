//! Provider-safe tool name aliasing.
//!
//! Providers restrict tool/function names to `[A-Za-z0-9_-]`. The adapter
//! sanitizes outbound names and keeps an alias map so inbound tool-call
//! events (which carry only the sanitized name) can be mapped back to the
//! original name before they reach the turn controller.

use std::collections::HashMap;

/// Sanitize `name` to a provider-safe identifier: keep `[A-Za-z0-9_-]`,
/// map `.` to `_`, drop everything else; empty results become `"tool"`.
pub fn sanitize_provider_tool_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for c in name.chars() {
        if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
            out.push(c);
        } else if c == '.' {
            out.push('_');
        }
    }
    if out.is_empty() {
        "tool".to_string()
    } else {
        out
    }
}

/// Bidirectional map from sanitized name back to the original tool name,
/// built once per turn from the active tool set.
#[derive(Debug, Clone, Default)]
pub struct ToolNameAliasMap {
    alias_to_real: HashMap<String, String>,
}

impl ToolNameAliasMap {
    pub fn build(real_names: impl IntoIterator<Item = impl Into<String>>) -> Self {
        let mut alias_to_real = HashMap::new();
        for real in real_names {
            let real = real.into();
            let alias = sanitize_provider_tool_name(&real);
            alias_to_real.insert(alias, real);
        }
        Self { alias_to_real }
    }

    /// Map a sanitized name back to its original. Falls back to `alias`
    /// itself if it was never registered (defensive against a provider
    /// echoing back an unrecognized name).
    pub fn resolve(&self, alias: &str) -> String {
        self.alias_to_real
            .get(alias)
            .cloned()
            .unwrap_or_else(|| alias.to_string())
    }
}
