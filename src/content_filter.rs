/// Substring blocklist applied to user text before it leaves the bridge.
#[derive(Debug, Clone, Default)]
pub struct ContentFilter {
    words: Vec<String>,
}

impl ContentFilter {
    pub fn new<I, S>(words: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let words = words
            .into_iter()
            .map(|w| w.as_ref().trim().to_string())
            .filter(|w| !w.is_empty())
            .collect();
        ContentFilter { words }
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    /// First configured term contained in `text`. Matching is case-sensitive.
    pub fn find_blocked(&self, text: &str) -> Option<&str> {
        self.words
            .iter()
            .find(|w| text.contains(w.as_str()))
            .map(String::as_str)
    }
}
