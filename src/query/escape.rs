//! Escaping for user input that lands in a pattern position.

/// Escape character used in every `LIKE ... ESCAPE` clause.
pub const LIKE_ESCAPE: char = '\\';

/// Escapes `%`, `_` and the escape character itself for a `LIKE` pattern.
pub fn escape_like(input: &str) -> String {
    let mut out = String::with_capacity(input.len() + 4);
    for c in input.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push(LIKE_ESCAPE);
        }
        out.push(c);
    }
    out
}

/// Escapes every PCRE metacharacter so the input matches literally.
pub fn escape_regex(input: &str) -> String {
    let mut out = String::with_capacity(input.len() + 4);
    for c in input.chars() {
        if matches!(
            c,
            '\\' | '.' | '+' | '*' | '?' | '(' | ')' | '|' | '[' | ']' | '{' | '}' | '^' | '$'
                | '/' | '#' | '-'
        ) {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Splits free text into search terms, dropping characters that carry
/// operator meaning in full-text syntaxes.
pub fn search_terms(input: &str) -> Vec<String> {
    input
        .split_whitespace()
        .map(|word| {
            word.chars()
                .filter(|c| !matches!(c, '+' | '-' | '<' | '>' | '(' | ')' | '~' | '*' | '"' | '@' | '\''))
                .collect::<String>()
        })
        .filter(|word| !word.is_empty())
        .collect()
}

/// MariaDB/MySQL boolean-mode value: a quoted phrase is kept as a phrase,
/// otherwise each term gets a trailing prefix wildcard.
pub fn boolean_mode_value(input: &str) -> String {
    let trimmed = input.trim();
    if trimmed.len() >= 2 && trimmed.starts_with('"') && trimmed.ends_with('"') {
        let phrase = search_terms(&trimmed[1..trimmed.len() - 1]).join(" ");
        return format!("\"{phrase}\"");
    }
    search_terms(trimmed)
        .into_iter()
        .map(|term| format!("{term}*"))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn like_wildcards_are_escaped() {
        assert_eq!(escape_like("50%_off\\"), "50\\%\\_off\\\\");
        assert_eq!(escape_like("plain"), "plain");
    }

    #[test]
    fn regex_escape_matches_literally() {
        let hostile = "a.b*c$(d)|[e]{2}^\\/";
        let pattern = format!("^{}$", escape_regex(hostile));
        let re = regex::Regex::new(&pattern).unwrap();
        assert!(re.is_match(hostile));
        assert!(!re.is_match("aXb*c$(d)|[e]{2}^\\/"));
    }

    #[test]
    fn search_terms_strip_operators() {
        assert_eq!(search_terms("+foo -bar* (baz)"), vec!["foo", "bar", "baz"]);
        assert_eq!(boolean_mode_value("foo bar"), "foo* bar*");
        assert_eq!(boolean_mode_value("\"exact phrase\""), "\"exact phrase\"");
    }
}
