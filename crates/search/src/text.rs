/// Collapse whitespace and truncate `text` at a word boundary so the result
/// (including `placeholder`) fits in `width` characters.
///
/// Text that already fits is returned with whitespace collapsed only. When not
/// even the first word fits, the placeholder alone is returned.
pub fn shorten(text: &str, width: usize, placeholder: &str) -> String {
    let words: Vec<&str> = text.split_whitespace().collect();
    let collapsed = words.join(" ");
    if collapsed.chars().count() <= width {
        return collapsed;
    }

    let budget = width.saturating_sub(placeholder.chars().count());
    let mut out = String::new();
    let mut used = 0usize;
    for word in words {
        let len = word.chars().count();
        let extra = if out.is_empty() { len } else { len + 1 };
        if used + extra > budget {
            break;
        }
        if !out.is_empty() {
            out.push(' ');
        }
        out.push_str(word);
        used += extra;
    }

    out.push_str(placeholder);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_text_is_only_collapsed() {
        assert_eq!(shorten("  hello \n world ", 280, "..."), "hello world");
    }

    #[test]
    fn long_text_is_cut_at_a_word_boundary() {
        assert_eq!(shorten("Hello world, how are you", 15, "..."), "Hello world,...");
    }

    #[test]
    fn oversized_first_word_yields_placeholder() {
        assert_eq!(shorten("supercalifragilistic", 5, "..."), "...");
    }

    #[test]
    fn counts_characters_not_bytes() {
        assert_eq!(shorten("héllo wörld", 11, "..."), "héllo wörld");
    }
}
