//! Display-name sanitization.
//!
//! File names come from the host environment and end up in UI surfaces, so
//! they are sanitized before display: control bytes stripped, path
//! components (including traversal sequences) collapsed, HTML
//! metacharacters escaped, and over-long names truncated with an ellipsis.
//!
//! The function is pure and idempotent: feeding its output back in returns
//! the same string. Escaping is entity-aware (an existing `&lt;` is not
//! re-escaped) and truncation counts rendered characters, treating one
//! entity as one character.

/// Maximum rendered length of a sanitized display name, in characters.
pub const MAX_DISPLAY_CHARS: usize = 80;

const ELLIPSIS: char = '\u{2026}';

/// Entities the escaper emits; recognized on input to stay idempotent.
const ENTITIES: [&str; 5] = ["&amp;", "&lt;", "&gt;", "&quot;", "&#x27;"];

/// Sanitizes a file name for display.
pub fn sanitize_display_name(name: &str) -> String {
    let stripped: String = name.chars().filter(|c| !c.is_control()).collect();

    // Collapse path structure: drop empty, `.` and `..` components so
    // traversal sequences cannot survive into the display string.
    let parts: Vec<&str> = stripped
        .split(['/', '\\'])
        .filter(|p| !p.is_empty() && *p != "." && *p != "..")
        .collect();
    let joined = parts.join("/");

    let units = escape_units(&joined);
    if units.len() > MAX_DISPLAY_CHARS {
        let mut out: String = units[..MAX_DISPLAY_CHARS - 1].concat();
        out.push(ELLIPSIS);
        out
    } else {
        units.concat()
    }
}

/// Splits `s` into display units: each unit renders as one character.
/// HTML metacharacters become entities; existing entities pass through.
fn escape_units(s: &str) -> Vec<String> {
    let chars: Vec<char> = s.chars().collect();
    let mut units = Vec::with_capacity(chars.len());
    let mut i = 0;
    while i < chars.len() {
        match chars[i] {
            '<' => units.push("&lt;".to_string()),
            '>' => units.push("&gt;".to_string()),
            '"' => units.push("&quot;".to_string()),
            '\'' => units.push("&#x27;".to_string()),
            '&' => {
                if let Some(entity) = ENTITIES.iter().find(|e| tail_starts_with(&chars[i..], e)) {
                    units.push((*entity).to_string());
                    i += entity.chars().count();
                    continue;
                }
                units.push("&amp;".to_string());
            }
            c => units.push(c.to_string()),
        }
        i += 1;
    }
    units
}

fn tail_starts_with(tail: &[char], needle: &str) -> bool {
    let mut it = tail.iter();
    needle.chars().all(|n| it.next() == Some(&n))
}
