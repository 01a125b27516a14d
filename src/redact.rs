use std::borrow::Cow;

const SECRET_JSON_FIELDS: [&str; 4] = ["\"token\"", "\"password\"", "\"accessToken\"", "\"access_token\""];

fn find_ascii_case_insensitive(haystack: &str, needle: &str) -> Option<usize> {
    let hay = haystack.as_bytes();
    let nee = needle.as_bytes();
    if nee.is_empty() {
        return Some(0);
    }
    if nee.len() > hay.len() {
        return None;
    }

    (0..=hay.len() - nee.len()).find(|&i| {
        hay[i..i + nee.len()]
            .iter()
            .zip(nee)
            .all(|(a, b)| a.to_ascii_lowercase() == b.to_ascii_lowercase())
    })
}

fn is_token_char(ch: char) -> bool {
    ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_' | '.' | '~' | '+' | '/' | '=')
}

/// Plain words after "Bearer" ("token", "authentication") are prose, not
/// credentials. Real tokens carry digits or separators, or are long.
fn looks_like_credential(word: &str) -> bool {
    word.len() >= 24
        || word
            .chars()
            .any(|ch| ch.is_ascii_digit() || matches!(ch, '-' | '_' | '.' | '~' | '+' | '/' | '='))
}

fn redact_header_line(text: String, header: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text.as_str();
    loop {
        let Some(idx) = find_ascii_case_insensitive(rest, header) else {
            out.push_str(rest);
            break;
        };
        out.push_str(&rest[..idx + header.len()]);
        rest = &rest[idx + header.len()..];

        if let Some(stripped) = rest.strip_prefix(' ') {
            out.push(' ');
            rest = stripped;
        }

        let end = rest.find(['\n', '\r']).unwrap_or(rest.len());
        out.push_str("REDACTED");
        rest = &rest[end..];
    }
    out
}

fn redact_bearer_fragments(text: String) -> String {
    const PREFIX: &str = "bearer ";
    let mut out = String::with_capacity(text.len());
    let mut rest = text.as_str();
    while let Some(idx) = find_ascii_case_insensitive(rest, PREFIX) {
        out.push_str(&rest[..idx + PREFIX.len()]);
        rest = &rest[idx + PREFIX.len()..];

        let consumed: usize = rest
            .chars()
            .take_while(|ch| is_token_char(*ch))
            .map(char::len_utf8)
            .sum();
        let word = &rest[..consumed];
        if looks_like_credential(word) {
            out.push_str("REDACTED");
        } else {
            out.push_str(word);
        }
        rest = &rest[consumed..];
    }
    out.push_str(rest);
    out
}

fn redact_json_field(text: String, field: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text.as_str();
    while let Some(idx) = rest.find(field) {
        out.push_str(&rest[..idx + field.len()]);
        rest = &rest[idx + field.len()..];

        let after_ws = rest.trim_start();
        let Some(after_colon) = after_ws.strip_prefix(':') else {
            continue;
        };
        let value = after_colon.trim_start();
        let Some(body) = value.strip_prefix('"') else {
            continue;
        };

        let mut escaped = false;
        let mut end = None;
        for (i, ch) in body.char_indices() {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                end = Some(i);
                break;
            }
        }
        let Some(end) = end else {
            continue;
        };

        out.push_str(&rest[..rest.len() - body.len()]);
        out.push_str("REDACTED");
        rest = &body[end..];
    }
    out.push_str(rest);
    out
}

/// Scrubs bearer tokens and credential fields from free text before it is
/// logged or handed back to a caller.
pub fn redact_secrets(input: &str) -> Cow<'_, str> {
    let mut value = input.to_string();
    value = redact_header_line(value, "Authorization:");
    value = redact_bearer_fragments(value);
    for field in SECRET_JSON_FIELDS {
        value = redact_json_field(value, field);
    }

    if value == input {
        Cow::Borrowed(input)
    } else {
        Cow::Owned(value)
    }
}
