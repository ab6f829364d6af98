//! HTML-to-text for catalog requirement fragments
//!
//! Catalog requirement blocks are small HTML snippets such as
//! `<strong>Minimum:</strong><br><ul class="bb_ul"><li><strong>OS:</strong> Windows 10<br></li></ul>`.
//! Tags are dropped, block-level tags become line breaks and common entities
//! are decoded. Output has one trimmed, whitespace-collapsed line per block
//! and no empty lines.

/// Tags that end a line of text.
const BLOCK_TAGS: &[&str] = &[
    "br", "p", "div", "li", "ul", "ol", "tr", "table", "h1", "h2", "h3", "h4", "h5", "h6",
];

/// Tags whose body is never text.
const OPAQUE_TAGS: &[&str] = &["script", "style"];

/// Convert an HTML fragment to plain text.
///
/// Idempotent: decoding can expose new markup (`&lt;b&gt;` becomes `<b>`), so the
/// single pass is repeated until the text stops changing. Every pass that changes
/// anything makes the text shorter, so this always terminates.
pub fn clean_markup(html: &str) -> String {
    let mut current = clean_pass(html);
    loop {
        let next = clean_pass(&current);
        if next == current {
            return current;
        }
        current = next;
    }
}

fn clean_pass(html: &str) -> String {
    let mut out = String::with_capacity(html.len());
    let mut pos = 0;

    while pos < html.len() {
        let rest = &html[pos..];
        let Some(ch) = rest.chars().next() else {
            break;
        };

        if rest.starts_with("<!--") {
            // Comments run to `-->`; an unterminated one swallows the rest.
            match rest[4..].find("-->") {
                Some(offset) => pos += 4 + offset + 3,
                None => break,
            }
            continue;
        }

        if ch == '<' && opens_tag(rest) {
            // Unterminated tag: drop the remainder.
            let Some(end) = rest.find('>') else {
                break;
            };
            let inner = &rest[1..end];
            let name = tag_name(inner);
            pos += end + 1;

            if !inner.starts_with('/') && OPAQUE_TAGS.contains(&name.as_str()) {
                let closing = format!("</{}", name);
                match html[pos..].to_ascii_lowercase().find(&closing) {
                    Some(offset) => pos += offset,
                    None => break,
                }
                continue;
            }

            if BLOCK_TAGS.contains(&name.as_str()) {
                out.push('\n');
            }
            continue;
        }

        if ch == '&' {
            if let Some((decoded, len)) = decode_entity(rest) {
                out.push(decoded);
                pos += len;
                continue;
            }
        }

        out.push(ch);
        pos += ch.len_utf8();
    }

    normalize_lines(&out)
}

/// `<` only starts a tag when followed by a name, `/` or `!` ("a < b" is text).
fn opens_tag(rest: &str) -> bool {
    rest[1..]
        .chars()
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '/' || c == '!')
}

fn tag_name(inner: &str) -> String {
    inner
        .trim_start_matches('/')
        .chars()
        .take_while(|c| c.is_ascii_alphanumeric())
        .collect::<String>()
        .to_ascii_lowercase()
}

/// Decode the entity at the start of `rest`; returns the char and bytes consumed.
fn decode_entity(rest: &str) -> Option<(char, usize)> {
    let (end, _) = rest
        .char_indices()
        .take(12)
        .find(|(_, c)| *c == ';')?;
    let body = &rest[1..end];

    let decoded = match body {
        "amp" => '&',
        "lt" => '<',
        "gt" => '>',
        "quot" => '"',
        "apos" => '\'',
        "nbsp" => ' ',
        "reg" => '®',
        "trade" => '™',
        "copy" => '©',
        _ => {
            let numeric = body.strip_prefix('#')?;
            let hex = numeric
                .strip_prefix('x')
                .or_else(|| numeric.strip_prefix('X'));
            let code = match hex {
                Some(hex) => u32::from_str_radix(hex, 16).ok()?,
                None => numeric.parse::<u32>().ok()?,
            };
            char::from_u32(code)?
        }
    };

    Some((decoded, end + 1))
}

fn normalize_lines(text: &str) -> String {
    text.lines()
        .map(|line| line.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}
