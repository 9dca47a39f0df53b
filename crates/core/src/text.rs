use scraper::{Html, Node};

const BLOCK_ELEMENTS: [&str; 16] = [
    "p", "br", "div", "li", "ul", "ol", "tr", "h1", "h2", "h3", "h4", "h5", "h6", "section",
    "article", "table",
];

pub fn normalize_whitespace(text: &str) -> String {
    text.replace('\u{a0}', " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Lower-cased, whitespace-collapsed form used for every vocabulary term.
pub fn normalize_term(term: &str) -> String {
    normalize_whitespace(term).to_lowercase()
}

/// Keyword match on word boundaries. Both arguments must already be lower-cased.
///
/// "ui" matches "ui/ux designer" but not "build"; multi-word and punctuated
/// terms ("ci/cd", "on-call") match as written.
pub fn contains_term(haystack: &str, term: &str) -> bool {
    if term.is_empty() {
        return false;
    }

    let mut offset = 0;
    while let Some(found) = haystack[offset..].find(term) {
        let start = offset + found;
        let end = start + term.len();

        let before_ok = haystack[..start]
            .chars()
            .next_back()
            .map_or(true, |ch| !ch.is_alphanumeric());
        let after_ok = haystack[end..]
            .chars()
            .next()
            .map_or(true, |ch| !ch.is_alphanumeric());

        if before_ok && after_ok {
            return true;
        }

        offset = start
            + haystack[start..]
                .chars()
                .next()
                .map_or(1, char::len_utf8);
    }

    false
}

pub fn looks_like_html(text: &str) -> bool {
    let trimmed = text.trim_start();
    trimmed.starts_with('<') || (text.contains("</") && text.contains('>'))
}

/// Flattens an HTML fragment to plain text, one line per block element.
pub fn html_to_text(html: &str) -> String {
    let fragment = Html::parse_fragment(html);
    let mut output = String::new();

    for node in fragment.root_element().descendants() {
        match node.value() {
            Node::Element(element) => {
                if BLOCK_ELEMENTS.contains(&element.name()) {
                    output.push('\n');
                }
            }
            Node::Text(text) => {
                let hidden = node.ancestors().any(|ancestor| {
                    ancestor
                        .value()
                        .as_element()
                        .is_some_and(|element| matches!(element.name(), "script" | "style"))
                });
                if !hidden {
                    output.push_str(text);
                }
            }
            _ => {}
        }
    }

    output
        .lines()
        .map(normalize_whitespace)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Plain text for either an HTML or an already-plain description.
pub fn description_text(raw: &str) -> String {
    if looks_like_html(raw) {
        html_to_text(raw)
    } else {
        raw.lines()
            .map(normalize_whitespace)
            .filter(|line| !line.is_empty())
            .collect::<Vec<_>>()
            .join("\n")
    }
}
