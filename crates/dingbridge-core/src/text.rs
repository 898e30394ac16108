pub fn floor_char_boundary(s: &str, mut index: usize) -> usize {
    if index >= s.len() {
        return s.len();
    }
    while index > 0 && !s.is_char_boundary(index) {
        index -= 1;
    }
    index
}

/// Cut `text` to at most `max_len` bytes on a char boundary, marking the cut with "...".
pub fn truncate_for_display(text: &str, max_len: usize) -> String {
    let text = text.trim();
    if text.len() <= max_len {
        return text.to_string();
    }
    let boundary = floor_char_boundary(text, max_len);
    format!("{}...", &text[..boundary])
}
