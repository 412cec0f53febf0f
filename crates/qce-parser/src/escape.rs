use std::borrow::Cow;

fn needs_escape(c: char) -> bool {
    matches!(c, '&' | '<' | '>' | '"' | '\'')
}

/// HTML-escape user-supplied text.
///
/// The common case is no special characters at all, so the input is scanned
/// once and borrowed back untouched unless an escapable byte is found; only
/// then is a new string built (prefix copied as one slice).
pub fn escape_html(input: &str) -> Cow<'_, str> {
    match input.find(needs_escape) {
        None => Cow::Borrowed(input),
        Some(idx) => {
            let mut out = String::with_capacity(input.len() + 8);
            out.push_str(&input[..idx]);
            for c in input[idx..].chars() {
                match c {
                    '&' => out.push_str("&amp;"),
                    '<' => out.push_str("&lt;"),
                    '>' => out.push_str("&gt;"),
                    '"' => out.push_str("&quot;"),
                    '\'' => out.push_str("&#39;"),
                    other => out.push(other),
                }
            }
            Cow::Owned(out)
        }
    }
}
