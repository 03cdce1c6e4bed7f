//! Positional message template rendering.
//!
//! Event message templates carry `%1`, `%2`, ... placeholders that refer to
//! the event's string inserts by position. Rendering never fails: a template
//! whose placeholders cannot all be satisfied comes back with every
//! placeholder replaced by `?`.

/// Replacement used for every placeholder when substitution fails.
pub const UNRESOLVED_PLACEHOLDER: &str = "?";

#[derive(Debug, PartialEq, Eq)]
enum Segment<'a> {
    Literal(&'a str),
    /// One-based insert index as written in the template.
    Placeholder(usize),
    /// Placeholder digits that do not fit a usize.
    Overflow(&'a str),
}

/// Split a template into literal runs and `%<digits>` placeholders.
fn segments(template: &str) -> Vec<Segment<'_>> {
    let bytes = template.as_bytes();
    let mut out = Vec::new();
    let mut literal_start = 0;
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] == b'%' {
            let digits_start = i + 1;
            let mut j = digits_start;
            while j < bytes.len() && bytes[j].is_ascii_digit() {
                j += 1;
            }
            if j > digits_start {
                if literal_start < i {
                    out.push(Segment::Literal(&template[literal_start..i]));
                }
                let digits = &template[digits_start..j];
                match digits.parse::<usize>() {
                    Ok(n) => out.push(Segment::Placeholder(n)),
                    Err(_) => out.push(Segment::Overflow(digits)),
                }
                literal_start = j;
                i = j;
                continue;
            }
        }
        i += 1;
    }

    if literal_start < bytes.len() {
        out.push(Segment::Literal(&template[literal_start..]));
    }
    out
}

/// Substitute placeholders, or `None` when any placeholder is unsatisfiable.
pub fn try_render_message<S: AsRef<str>>(template: &str, inserts: &[S]) -> Option<String> {
    let mut rendered = String::with_capacity(template.len());
    for segment in segments(template) {
        match segment {
            Segment::Literal(text) => rendered.push_str(text),
            Segment::Placeholder(n) if n >= 1 && n <= inserts.len() => {
                rendered.push_str(inserts[n - 1].as_ref())
            }
            Segment::Placeholder(_) | Segment::Overflow(_) => return None,
        }
    }
    Some(rendered)
}

/// Template with every placeholder replaced by [`UNRESOLVED_PLACEHOLDER`].
pub fn mask_placeholders(template: &str) -> String {
    let mut masked = String::with_capacity(template.len());
    for segment in segments(template) {
        match segment {
            Segment::Literal(text) => masked.push_str(text),
            Segment::Placeholder(_) | Segment::Overflow(_) => {
                masked.push_str(UNRESOLVED_PLACEHOLDER)
            }
        }
    }
    masked
}

/// Render a message template against its string inserts.
///
/// ```
/// use evtlog::render_message;
///
/// assert_eq!(render_message("Error %1 at %2", &["404", "/index"]), "Error 404 at /index");
/// assert_eq!(render_message("%1", &[] as &[&str]), "?");
/// ```
pub fn render_message<S: AsRef<str>>(template: &str, inserts: &[S]) -> String {
    match try_render_message(template, inserts) {
        Some(rendered) => rendered,
        None => {
            tracing::trace!(
                inserts = inserts.len(),
                "message template placeholders unresolved, masking"
            );
            mask_placeholders(template)
        }
    }
}
