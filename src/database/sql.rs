//! Quoting for the one utility statement that cannot take bind parameters.
//!
//! `ALTER ROLE ... PASSWORD` is not a plannable statement, so PostgreSQL
//! rejects `$1` placeholders in it. Both values are quoted with the same
//! rules as the server's `quote_ident` / `quote_literal`.

/// Always-quoted identifier; embedded `"` doubled. Case is preserved.
pub fn quote_ident(ident: &str) -> String {
    let mut out = String::with_capacity(ident.len() + 2);
    out.push('"');
    for c in ident.chars() {
        if c == '"' {
            out.push('"');
        }
        out.push(c);
    }
    out.push('"');
    out
}

/// String literal; embedded `'` doubled. When a backslash is present the
/// escape-string form `E'...'` is used with backslashes doubled, which is
/// correct regardless of `standard_conforming_strings`.
pub fn quote_literal(value: &str) -> String {
    let has_backslash = value.contains('\\');
    let mut out = String::with_capacity(value.len() + 3);
    if has_backslash {
        out.push('E');
    }
    out.push('\'');
    for c in value.chars() {
        match c {
            '\'' => out.push_str("''"),
            '\\' if has_backslash => out.push_str("\\\\"),
            _ => out.push(c),
        }
    }
    out.push('\'');
    out
}

pub fn alter_password_statement(username: &str, password: &str) -> String {
    format!(
        "ALTER ROLE {} WITH PASSWORD {}",
        quote_ident(username),
        quote_literal(password)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::password::PasswordGenerator;

    /// Minimal reader for the statement shape above, following the
    /// server's lexing rules for quoted identifiers and literals.
    fn parse_statement(stmt: &str) -> Option<(String, String)> {
        let rest = stmt.strip_prefix("ALTER ROLE ")?;
        let (ident, rest) = read_ident(rest)?;
        let rest = rest.strip_prefix(" WITH PASSWORD ")?;
        let (literal, rest) = read_literal(rest)?;
        if !rest.is_empty() {
            return None;
        }
        Some((ident, literal))
    }

    fn read_ident(s: &str) -> Option<(String, &str)> {
        let mut chars = s.char_indices();
        if chars.next()?.1 != '"' {
            return None;
        }
        let mut out = String::new();
        let bytes = s.as_bytes();
        let mut i = 1;
        while i < s.len() {
            let c = s[i..].chars().next()?;
            if c == '"' {
                if bytes.get(i + 1) == Some(&b'"') {
                    out.push('"');
                    i += 2;
                    continue;
                }
                return Some((out, &s[i + 1..]));
            }
            out.push(c);
            i += c.len_utf8();
        }
        None
    }

    fn read_literal(s: &str) -> Option<(String, &str)> {
        let (escaped, body) = match s.strip_prefix('E') {
            Some(rest) => (true, rest),
            None => (false, s),
        };
        let body = body.strip_prefix('\'')?;
        let bytes = body.as_bytes();
        let mut out = String::new();
        let mut i = 0;
        while i < body.len() {
            let c = body[i..].chars().next()?;
            match c {
                '\'' if bytes.get(i + 1) == Some(&b'\'') => {
                    out.push('\'');
                    i += 2;
                }
                '\'' => return Some((out, &body[i + 1..])),
                '\\' if escaped => {
                    let next = body[i + 1..].chars().next()?;
                    out.push(next);
                    i += 1 + next.len_utf8();
                }
                _ => {
                    out.push(c);
                    i += c.len_utf8();
                }
            }
        }
        None
    }

    #[test]
    fn test_plain_values() {
        assert_eq!(
            alter_password_statement("svc", "p2"),
            r#"ALTER ROLE "svc" WITH PASSWORD 'p2'"#
        );
    }

    #[test]
    fn test_single_quote_cannot_terminate_literal() {
        let hostile = "x'; DROP ROLE admin; --";
        let stmt = alter_password_statement("svc", hostile);
        assert_eq!(stmt, r#"ALTER ROLE "svc" WITH PASSWORD 'x''; DROP ROLE admin; --'"#);
        assert_eq!(parse_statement(&stmt), Some(("svc".into(), hostile.into())));
    }

    #[test]
    fn test_backslash_uses_escape_string_form() {
        let stmt = alter_password_statement("svc", r"a\'b");
        assert_eq!(stmt, r#"ALTER ROLE "svc" WITH PASSWORD E'a\\''b'"#);
        assert_eq!(parse_statement(&stmt), Some(("svc".into(), r"a\'b".into())));
    }

    #[test]
    fn test_identifier_with_quote_and_case() {
        let stmt = alter_password_statement(r#"App"User"#, "pw");
        assert_eq!(
            parse_statement(&stmt),
            Some((r#"App"User"#.to_string(), "pw".to_string()))
        );
    }

    #[test]
    fn test_every_printable_password_round_trips() {
        let all_printable: String = (' '..='~').collect();
        let stmt = alter_password_statement("svc", &all_printable);
        assert_eq!(parse_statement(&stmt).unwrap().1, all_printable);

        for c in ' '..='~' {
            let pw = format!("{c}{c}pw{c}");
            let stmt = alter_password_statement("svc", &pw);
            assert_eq!(parse_statement(&stmt), Some(("svc".into(), pw)), "char {:?}", c);
        }
    }

    #[test]
    fn test_generated_passwords_round_trip() {
        let gen = PasswordGenerator::default();
        for _ in 0..200 {
            let pw = gen.generate();
            let stmt = alter_password_statement("svc", &pw);
            assert_eq!(parse_statement(&stmt), Some(("svc".into(), pw)));
        }
    }
}
