//! `token(;name=value)*` codec shared by `Sec-WebSocket-Extensions` and
//! other structured header values. Generalized out of the teacher's
//! extension-specific parser so both `extensions.rs`'s job and ad hoc
//! header formatting can reuse it.

/// One `token(;name=value)*` item, e.g. `permessage-deflate;client_max_window_bits=15`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenParams {
    pub name: String,
    pub params: Vec<(String, Option<String>)>,
}

impl TokenParams {
    pub fn get(&self, key: &str) -> Option<Option<&str>> {
        self.params
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_deref())
    }
}

fn is_token_char(c: char) -> bool {
    c.is_ascii_graphic()
        && !matches!(
            c,
            '(' | ')'
                | '<'
                | '>'
                | '@'
                | ','
                | ';'
                | ':'
                | '\\'
                | '"'
                | '/'
                | '['
                | ']'
                | '?'
                | '='
                | '{'
                | '}'
        )
}

/// Parses a comma-separated list of `token(;name[=value])*` items, e.g. a
/// full `Sec-WebSocket-Extensions` header value.
pub fn parse_list(input: &str) -> Vec<TokenParams> {
    input
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .filter_map(parse_one)
        .collect()
}

fn parse_one(item: &str) -> Option<TokenParams> {
    let mut parts = item.split(';').map(str::trim);
    let name = parts.next()?;
    if name.is_empty() || !name.chars().all(is_token_char) {
        return None;
    }
    let mut params = Vec::new();
    for part in parts {
        if part.is_empty() {
            continue;
        }
        match part.split_once('=') {
            Some((k, v)) => {
                let k = k.trim();
                let v = v.trim();
                let value = if v.starts_with('"') && v.ends_with('"') && v.len() >= 2 {
                    unquote(&v[1..v.len() - 1])
                } else {
                    v.to_string()
                };
                params.push((k.to_string(), Some(value)));
            }
            None => params.push((part.to_string(), None)),
        }
    }
    Some(TokenParams {
        name: name.to_string(),
        params,
    })
}

fn unquote(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(next) = chars.next() {
                out.push(next);
            }
        } else {
            out.push(c);
        }
    }
    out
}

fn needs_quoting(value: &str) -> bool {
    value.is_empty() || !value.chars().all(is_token_char)
}

fn quote(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for c in value.chars() {
        if c == '"' || c == '\\' {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('"');
    out
}

/// Formats a single `token(;name=value)*` item back to wire form, quoting
/// parameter values only when required.
pub fn format_one(item: &TokenParams) -> String {
    let mut out = item.name.clone();
    for (name, value) in &item.params {
        out.push(';');
        out.push_str(name);
        if let Some(v) = value {
            out.push('=');
            if needs_quoting(v) {
                out.push_str(&quote(v));
            } else {
                out.push_str(v);
            }
        }
    }
    out
}

pub fn format_list(items: &[TokenParams]) -> String {
    items.iter().map(format_one).collect::<Vec<_>>().join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bare_token() {
        let parsed = parse_list("permessage-deflate");
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].name, "permessage-deflate");
        assert!(parsed[0].params.is_empty());
    }

    #[test]
    fn parses_params_with_and_without_values() {
        let parsed = parse_list(
            "permessage-deflate; client_no_context_takeover; server_max_window_bits=10",
        );
        let item = &parsed[0];
        assert_eq!(item.get("client_no_context_takeover"), Some(None));
        assert_eq!(item.get("server_max_window_bits"), Some(Some("10")));
    }

    #[test]
    fn round_trips_quoted_value() {
        let parsed = parse_one(r#"foo;bar="a,b""#).unwrap();
        assert_eq!(parsed.get("bar"), Some(Some("a,b")));
        let formatted = format_one(&parsed);
        assert_eq!(formatted, r#"foo;bar="a,b""#);
    }

    #[test]
    fn multiple_offers_split_on_comma() {
        let parsed = parse_list("permessage-deflate, permessage-deflate;client_max_window_bits");
        assert_eq!(parsed.len(), 2);
    }
}
