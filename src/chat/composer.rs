use tracing::debug;

/// Caps input at a number of characters. Longer input is cut, never rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LengthFilter {
    limit: usize,
}

impl LengthFilter {
    pub fn new(limit: usize) -> Self {
        Self { limit }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// The longest prefix of `input` that fits, cut on a character boundary.
    pub fn apply<'a>(&self, input: &'a str) -> &'a str {
        match input.char_indices().nth(self.limit) {
            Some((end, _)) => &input[..end],
            None => input,
        }
    }
}

/// The text being typed, filtered on entry.
#[derive(Debug, Clone)]
pub struct MessageComposer {
    text: String,
    filter: LengthFilter,
}

impl MessageComposer {
    pub fn new(limit: usize) -> Self {
        Self {
            text: String::new(),
            filter: LengthFilter::new(limit),
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn limit(&self) -> usize {
        self.filter.limit()
    }

    /// Replaces the input. Returns `true` when characters beyond the limit were dropped.
    pub fn set_text(&mut self, input: &str) -> bool {
        let kept = self.filter.apply(input);
        let truncated = kept.len() < input.len();
        self.text = kept.to_string();
        truncated
    }

    /// Installs a new limit and re-filters whatever is already typed.
    pub fn set_limit(&mut self, limit: usize) {
        self.filter = LengthFilter::new(limit);
        let kept = self.filter.apply(&self.text).len();
        if kept < self.text.len() {
            debug!(limit, "input truncated to the new length limit");
            self.text.truncate(kept);
        }
    }

    /// Whether the send control is enabled.
    pub fn can_send(&self) -> bool {
        !self.text.trim().is_empty()
    }

    /// Hands out the current text and leaves the input empty.
    pub fn take(&mut self) -> String {
        std::mem::take(&mut self.text)
    }
}
