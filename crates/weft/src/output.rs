//! The output accumulator: an append-only token vector with a watermark
//! protocol.
//!
//! Writers observe the length before a speculative call and truncate back to
//! it on failure; a step only keeps output it appended if its continuation
//! ultimately succeeded. The difference between two watermarks yields the
//! token run produced by one successful path, which combinators replay after
//! the search has moved past it.

use std::rc::Rc;

use smallvec::SmallVec;

/// Buffer length observed before a speculative step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Watermark(usize);

/// The token run between two watermarks, cheap to capture and replay.
#[derive(Debug, Clone, Default)]
pub(crate) struct OutputSlice(SmallVec<[Rc<str>; 8]>);

/// Append-only token vector for one top-level call.
#[derive(Debug, Default)]
pub(crate) struct OutputBuffer {
    tokens: Vec<Rc<str>>,
}

/// Single-character tokens that attach to the preceding word.
const NO_SPACE_BEFORE: &str = ".,;:!?)]}'";
/// Single-character tokens that attach to the following word.
const NO_SPACE_AFTER: &str = "([{";

impl OutputBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn watermark(&self) -> Watermark {
        Watermark(self.tokens.len())
    }

    pub fn push(&mut self, token: Rc<str>) {
        self.tokens.push(token);
    }

    pub fn extend(&mut self, tokens: impl IntoIterator<Item = Rc<str>>) {
        self.tokens.extend(tokens);
    }

    /// Rolls the buffer back to a previously observed watermark.
    pub fn truncate(&mut self, mark: Watermark) {
        debug_assert!(mark.0 <= self.tokens.len());
        self.tokens.truncate(mark.0);
    }

    /// The tokens appended since `mark`.
    pub fn difference(&self, mark: Watermark) -> OutputSlice {
        OutputSlice(self.tokens[mark.0..].iter().cloned().collect())
    }

    /// Replays a previously captured run.
    pub fn append_slice(&mut self, slice: &OutputSlice) {
        self.tokens.extend(slice.0.iter().cloned());
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    /// Formats the accumulated tokens as text: single spaces between tokens,
    /// none around attaching punctuation, newline tokens as line breaks.
    pub fn render(&self) -> String {
        let mut out = String::new();
        let mut suppress_space = true;
        for token in &self.tokens {
            let token: &str = token;
            if token == "\n" {
                out.push('\n');
                suppress_space = true;
                continue;
            }
            let attaches_back = is_single(token, NO_SPACE_BEFORE);
            if !suppress_space && !attaches_back {
                out.push(' ');
            }
            out.push_str(token);
            suppress_space = is_single(token, NO_SPACE_AFTER);
        }
        out
    }
}

fn is_single(token: &str, set: &str) -> bool {
    let mut chars = token.chars();
    matches!((chars.next(), chars.next()), (Some(c), None) if set.contains(c))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buffer(tokens: &[&str]) -> OutputBuffer {
        let mut buf = OutputBuffer::new();
        buf.extend(tokens.iter().map(|t| Rc::from(*t)));
        buf
    }

    #[test]
    fn render_spaces_words_and_attaches_punctuation() {
        let buf = buffer(&["hello", ",", "world", "!"]);
        assert_eq!(buf.render(), "hello, world!");
    }

    #[test]
    fn render_newline_token_breaks_line() {
        let buf = buffer(&["one", "\n", "two"]);
        assert_eq!(buf.render(), "one\ntwo");
    }

    #[test]
    fn render_brackets_attach_forward() {
        let buf = buffer(&["a", "(", "b", ")"]);
        assert_eq!(buf.render(), "a (b)");
    }

    /// difference/append_slice must replay a run token for token.
    #[test]
    fn difference_round_trips() {
        let mut buf = buffer(&["kept"]);
        let mark = buf.watermark();
        buf.extend(["solution", "tokens"].map(Rc::from));
        let slice = buf.difference(mark);
        buf.truncate(mark);
        assert_eq!(buf.len(), 1);
        buf.append_slice(&slice);
        assert_eq!(buf.render(), "kept solution tokens");
    }
}
