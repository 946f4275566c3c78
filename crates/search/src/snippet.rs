//! Context snippets around the first matching query term.

const CONTEXT_CHARS: usize = 200;
const ELLIPSIS: &str = "...";

/// Returns roughly `CONTEXT_CHARS` characters of `text` centred on the first
/// query term found (case-insensitive). Works on chars, never splitting UTF-8.
pub(crate) fn context_snippet(text: &str, query: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    if chars.len() <= CONTEXT_CHARS {
        return text.trim().to_string();
    }

    let lowered: Vec<char> = chars.iter().map(|c| lower(*c)).collect();
    let hit = query
        .split(|c: char| !c.is_alphanumeric())
        .filter(|term| !term.is_empty())
        .find_map(|term| {
            let needle: Vec<char> = term.chars().map(lower).collect();
            find(&lowered, &needle)
        });

    let (start, end) = match hit {
        Some(pos) => {
            let start = pos.saturating_sub(CONTEXT_CHARS / 2);
            let end = (start + CONTEXT_CHARS).min(chars.len());
            (end.saturating_sub(CONTEXT_CHARS), end)
        }
        None => (0, CONTEXT_CHARS),
    };

    let mut out = String::new();
    if start > 0 {
        out.push_str(ELLIPSIS);
    }
    out.extend(&chars[start..end]);
    if end < chars.len() {
        out.push_str(ELLIPSIS);
    }
    out
}

fn lower(c: char) -> char {
    c.to_lowercase().next().unwrap_or(c)
}

fn find(haystack: &[char], needle: &[char]) -> Option<usize> {
    if needle.is_empty() || needle.len() > haystack.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}
