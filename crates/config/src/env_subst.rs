/// Replace `${VAR}` and `${VAR:-fallback}` placeholders using the process environment.
///
/// Unresolvable variables without a fallback are left as-is.
pub fn substitute_env(input: &str) -> String {
    substitute_with(input, |name| std::env::var(name).ok())
}

/// Placeholder substitution with an injectable variable lookup.
pub fn substitute_with(input: &str, lookup: impl Fn(&str) -> Option<String>) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find('}') else {
            // Unterminated placeholder: emit the remainder literally.
            out.push_str(&rest[start..]);
            return out;
        };

        let body = &after[..end];
        let (name, fallback) = match body.split_once(":-") {
            Some((name, fallback)) => (name, Some(fallback)),
            None => (body, None),
        };

        match (name.is_empty(), lookup(name), fallback) {
            (false, Some(value), _) => out.push_str(&value),
            (false, None, Some(fallback)) => out.push_str(fallback),
            _ => {
                out.push_str("${");
                out.push_str(body);
                out.push('}');
            },
        }
        rest = &after[end + 1..];
    }

    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(name: &str) -> Option<String> {
        match name {
            "SB_PORT" => Some("9000".into()),
            "SB_HOST" => Some("0.0.0.0".into()),
            _ => None,
        }
    }

    #[test]
    fn substitutes_known_var() {
        assert_eq!(substitute_with("port = ${SB_PORT}", vars), "port = 9000");
        assert_eq!(
            substitute_with("${SB_HOST}:${SB_PORT}", vars),
            "0.0.0.0:9000"
        );
    }

    #[test]
    fn leaves_unknown_var() {
        assert_eq!(substitute_with("${SB_MISSING}", vars), "${SB_MISSING}");
    }

    #[test]
    fn uses_fallback_for_unknown_var() {
        assert_eq!(substitute_with("${SB_MISSING:-8001}", vars), "8001");
        assert_eq!(substitute_with("${SB_PORT:-8001}", vars), "9000");
    }

    #[test]
    fn unterminated_placeholder_is_literal() {
        assert_eq!(substitute_with("a ${SB_PORT", vars), "a ${SB_PORT");
    }

    #[test]
    fn no_placeholders() {
        assert_eq!(substitute_with("plain text", vars), "plain text");
    }
}
