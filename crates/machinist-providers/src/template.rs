use std::collections::BTreeMap;

use crate::error::ProviderError;

/// Substitutes `{{name}}` placeholders in `body` using `bindings`. Pure, no I/O.
///
/// This is deliberately not a general templating language (§4.2): no
/// conditionals, loops, or filters, only plain name substitution. Every
/// placeholder encountered must have a binding; an unbound one is an error
/// rather than being left in place or silently dropped.
pub fn render(body: &str, bindings: &BTreeMap<&str, String>) -> Result<String, ProviderError> {
    let mut out = String::with_capacity(body.len());
    let mut rest = body;

    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after_open = &rest[start + 2..];
        let Some(end) = after_open.find("}}") else {
            out.push_str(&rest[start..]);
            rest = "";
            break;
        };
        let name = after_open[..end].trim();
        match bindings.get(name) {
            Some(value) => out.push_str(value),
            None => return Err(ProviderError::UnboundPlaceholder(name.to_string())),
        }
        rest = &after_open[end + 2..];
    }
    out.push_str(rest);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn substitutes_bound_names() {
        let mut bindings = BTreeMap::new();
        bindings.insert("container_name", "web-1".to_string());
        bindings.insert("proxy", "http://proxy.test:3128".to_string());

        let rendered = render("Host={{container_name}}\nHTTPProxy={{proxy}}\n", &bindings).unwrap();
        assert_eq!(rendered, "Host=web-1\nHTTPProxy=http://proxy.test:3128\n");
    }

    #[test]
    fn unbound_placeholder_is_an_error() {
        let bindings = BTreeMap::new();
        let err = render("{{missing}}", &bindings).unwrap_err();
        assert!(matches!(err, ProviderError::UnboundPlaceholder(name) if name == "missing"));
    }

    #[test]
    fn body_without_placeholders_passes_through() {
        let bindings = BTreeMap::new();
        assert_eq!(render("plain text", &bindings).unwrap(), "plain text");
    }
}
