//! Text utilities shared by the speech engines.

/// Split text into sentences at `.`, `!`, `?` followed by whitespace (or
/// end of input). Each returned sentence keeps its terminator and is
/// trimmed of surrounding whitespace; empty pieces are dropped.
#[must_use]
pub fn split_sentences(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut current = String::new();
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        current.push(c);
        if matches!(c, '.' | '!' | '?') {
            let at_boundary = chars.peek().is_none_or(|next| next.is_whitespace());
            if at_boundary {
                push_trimmed(&mut sentences, &mut current);
            }
        }
    }
    push_trimmed(&mut sentences, &mut current);

    sentences
}

fn push_trimmed(sentences: &mut Vec<String>, current: &mut String) {
    let trimmed = current.trim();
    if !trimmed.is_empty() {
        sentences.push(trimmed.to_string());
    }
    current.clear();
}

/// Normalize text for phrase-cache keying: lowercase, trim, collapse
/// internal whitespace runs to single spaces.
#[must_use]
pub fn normalize_for_cache(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut last_was_space = true;
    for c in text.trim().chars() {
        if c.is_whitespace() {
            if !last_was_space {
                out.push(' ');
                last_was_space = true;
            }
        } else {
            out.extend(c.to_lowercase());
            last_was_space = false;
        }
    }
    if out.ends_with(' ') {
        out.pop();
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_on_terminators_followed_by_whitespace() {
        let sentences = split_sentences("We have them in stock. Would you like to order? Great!");
        assert_eq!(
            sentences,
            vec![
                "We have them in stock.",
                "Would you like to order?",
                "Great!"
            ]
        );
    }

    #[test]
    fn keeps_decimal_points_inside_a_sentence() {
        let sentences = split_sentences("The price is 2450.50 hryvnias per tyre.");
        assert_eq!(sentences, vec!["The price is 2450.50 hryvnias per tyre."]);
    }

    #[test]
    fn trailing_text_without_terminator_is_a_sentence() {
        let sentences = split_sentences("First. And then some");
        assert_eq!(sentences, vec!["First.", "And then some"]);
    }

    #[test]
    fn empty_input_yields_no_sentences() {
        assert!(split_sentences("   ").is_empty());
    }

    #[test]
    fn normalization_is_stable_under_whitespace_and_case() {
        let a = normalize_for_cache("  Good   Afternoon!\n");
        let b = normalize_for_cache("good afternoon!");
        assert_eq!(a, b);
        assert_eq!(a, "good afternoon!");
    }
}
