//! Placeholder substitution for verification templates.

use noderoll_core::campaign::{CHECK_ID_TOKEN, NODE_NAME_TOKEN};

/// Render `template` for one node.
///
/// Only the node-name and check-id tokens are replaced, in a single left to
/// right pass, so substituted text is never scanned again. Any other
/// `{{...}}` sequence is copied through untouched.
pub fn render(template: &str, hostname: &str, check_id: &str) -> String {
    let mut out = String::with_capacity(template.len() + hostname.len());
    let mut rest = template;

    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let tail = &rest[start..];
        if let Some(after) = tail.strip_prefix(NODE_NAME_TOKEN) {
            out.push_str(hostname);
            rest = after;
        } else if let Some(after) = tail.strip_prefix(CHECK_ID_TOKEN) {
            out.push_str(check_id);
            rest = after;
        } else {
            out.push_str("{{");
            rest = &tail[2..];
        }
    }
    out.push_str(rest);
    out
}
