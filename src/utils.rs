/// Quotes `name` as an SQL identifier.
pub(crate) fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Quotes `value` as an SQL string literal.
pub(crate) fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Strips one level of SQL quoting from a module argument.
pub(crate) fn dequote(arg: &str) -> String {
    let arg = arg.trim();
    let mut chars = arg.chars();
    match (chars.next(), chars.next_back()) {
        (Some(q @ ('\'' | '"')), Some(end)) if end == q && arg.len() >= 2 => {
            let doubled = format!("{q}{q}");
            arg[1..arg.len() - 1].replace(&doubled, &q.to_string())
        }
        _ => arg.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quoting() {
        assert_eq!(quote_identifier("a\"b"), "\"a\"\"b\"");
        assert_eq!(quote_literal("it's"), "'it''s'");
        assert_eq!(dequote(&quote_literal("it's")), "it's");
        assert_eq!(dequote(" \"x\" "), "x");
        assert_eq!(dequote("plain"), "plain");
        assert_eq!(dequote("'"), "'");
    }
}
