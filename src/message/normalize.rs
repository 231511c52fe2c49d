//! Text normalization for streamed assistant output.
//!
//! Models sometimes echo agent control markup (`<command>…</command>` and
//! friends) into their prose. Those blocks are stripped before text reaches a
//! part, including a block that is still streaming and has not closed yet.

/// Tag names treated as control markup.
const CONTROL_TAGS: &[&str] = &[
    "command",
    "execute",
    "tool_call",
    "function_call",
    "sandbox",
    "system",
];

/// Strip control markup and collapse runs of blank lines.
pub fn normalize_text(input: &str) -> String {
    collapse_blank_lines(&strip_control_markup(input))
}

/// What a `<` at the current position starts.
#[derive(Debug, PartialEq, Eq)]
enum Markup<'a> {
    /// Ordinary text; keep the `<`.
    NotControl,
    /// A control tag whose header has not finished streaming.
    Partial,
    /// `<name ...>`; `len` covers the header.
    Open { name: &'a str, len: usize },
    /// `</name>` or `<name/>`; `len` covers the marker.
    Marker { len: usize },
}

/// Remove complete and unterminated control blocks.
pub fn strip_control_markup(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;
    while let Some(pos) = rest.find('<') {
        out.push_str(&rest[..pos]);
        let tail = &rest[pos..];
        match classify(tail) {
            Markup::NotControl => {
                out.push('<');
                rest = &tail[1..];
            }
            Markup::Partial => {
                rest = "";
            }
            Markup::Marker { len } => {
                rest = &tail[len..];
            }
            Markup::Open { name, len } => {
                let body = &tail[len..];
                let close = format!("</{name}>");
                match find_ascii_case_insensitive(body, &close) {
                    Some(idx) => rest = &body[idx + close.len()..],
                    // Block still streaming: drop everything from its `<`.
                    None => rest = "",
                }
            }
        }
    }
    out.push_str(rest);
    out
}

fn classify(tail: &str) -> Markup<'_> {
    let after = &tail[1..];
    let (closing, name_start) = match after.strip_prefix('/') {
        Some(stripped) => (true, stripped),
        None => (false, after),
    };
    let name_len = name_start
        .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
        .unwrap_or(name_start.len());
    let name = &name_start[..name_len];

    if name_len == name_start.len() {
        // Tag name runs to the end of the buffer; it may still become one.
        if !name.is_empty() && is_control_prefix(name) {
            return Markup::Partial;
        }
        return Markup::NotControl;
    }
    if !is_control_tag(name) {
        return Markup::NotControl;
    }
    let next = name_start[name_len..].chars().next();
    if !matches!(next, Some(c) if c == '>' || c == '/' || c.is_whitespace()) {
        return Markup::NotControl;
    }

    let header_offset = 1 + usize::from(closing) + name_len;
    let Some(gt) = tail[header_offset..].find('>') else {
        return Markup::Partial;
    };
    let len = header_offset + gt + 1;
    if closing || tail[..len].ends_with("/>") {
        Markup::Marker { len }
    } else {
        Markup::Open { name, len }
    }
}

fn is_control_tag(name: &str) -> bool {
    CONTROL_TAGS
        .iter()
        .any(|tag| tag.eq_ignore_ascii_case(name))
}

fn is_control_prefix(partial: &str) -> bool {
    let lower = partial.to_ascii_lowercase();
    CONTROL_TAGS.iter().any(|tag| tag.starts_with(&lower))
}

fn find_ascii_case_insensitive(haystack: &str, needle: &str) -> Option<usize> {
    let hay = haystack.as_bytes();
    let pat = needle.as_bytes();
    if pat.is_empty() || hay.len() < pat.len() {
        return None;
    }
    (0..=hay.len() - pat.len()).find(|&start| hay[start..start + pat.len()].eq_ignore_ascii_case(pat))
}

/// Collapse three or more consecutive newlines to exactly two.
pub fn collapse_blank_lines(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut newlines = 0usize;
    for ch in input.chars() {
        if ch == '\n' {
            newlines += 1;
            if newlines <= 2 {
                out.push(ch);
            }
        } else {
            newlines = 0;
            out.push(ch);
        }
    }
    out
}
