//! `{key}` placeholder rendering for agent instructions.

use serde_json::Value;

use triad_core::session::SessionState;

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Replace `{key}` and `{key?}` with values from session state.
///
/// Strings are inserted verbatim, other JSON values in their compact JSON
/// form. A key missing from state renders as empty text. Braces that do not
/// enclose an identifier are left alone.
pub fn render_instruction(template: &str, state: &SessionState) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let Some(close) = after.find('}') else {
            out.push_str(&rest[open..]);
            return out;
        };
        let inner = &after[..close];
        let key = inner.strip_suffix('?').unwrap_or(inner);
        if is_identifier(key) {
            match state.get(key) {
                Some(Value::String(s)) => out.push_str(s),
                Some(Value::Null) | None => {}
                Some(other) => out.push_str(&other.to_string()),
            }
            rest = &after[close + 1..];
        } else {
            out.push('{');
            rest = after;
        }
    }
    out.push_str(rest);
    out
}
