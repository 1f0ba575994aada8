//! Bounding captured process output before it lands in a status message.
//!
//! Keeps the head and the tail and drops the middle, so both the first
//! lines of output and the final error survive.

/// Shorten `text` to `max_chars` characters plus an omission marker.
///
/// Counts characters, not bytes, so multi-byte sequences are never split.
pub fn truncate_middle(text: &str, max_chars: usize) -> String {
    let total = text.chars().count();
    if total <= max_chars {
        return text.to_owned();
    }

    let keep_head = max_chars / 2;
    let keep_tail = max_chars - keep_head;
    let omitted = total - max_chars;

    let head_end = text
        .char_indices()
        .nth(keep_head)
        .map_or(text.len(), |(i, _)| i);
    let tail_start = text
        .char_indices()
        .nth(total - keep_tail)
        .map_or(text.len(), |(i, _)| i);

    format!(
        "{}\n... [{omitted} chars omitted] ...\n{}",
        &text[..head_end],
        &text[tail_start..]
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fits_unchanged() {
        assert_eq!(truncate_middle("", 10), "");
        assert_eq!(truncate_middle("exactly10!", 10), "exactly10!");
    }

    #[test]
    fn keeps_both_ends() {
        let text = format!("{}{}{}", "A".repeat(50), "B".repeat(100), "C".repeat(50));
        let out = truncate_middle(&text, 100);
        assert!(out.starts_with(&"A".repeat(50)));
        assert!(out.ends_with(&"C".repeat(50)));
        assert!(out.contains("[100 chars omitted]"));
        assert!(!out.contains('B'));
    }

    #[test]
    fn odd_budget_favours_tail() {
        let out = truncate_middle("abcdefghij", 5);
        assert_eq!(out, "ab\n... [5 chars omitted] ...\nhij");
    }

    #[test]
    fn multibyte_is_counted_by_char() {
        let text = "€".repeat(30);
        assert_eq!(truncate_middle(&text, 30), text);

        let out = truncate_middle(&text, 10);
        assert!(out.starts_with("€€€€€\n"));
        assert!(out.contains("[20 chars omitted]"));
    }

    #[test]
    fn zero_budget_keeps_only_marker() {
        assert_eq!(truncate_middle("abc", 0), "\n... [3 chars omitted] ...\n");
    }
}
