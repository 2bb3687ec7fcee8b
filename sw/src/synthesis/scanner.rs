//! Incremental tag scanner
//!
//! Extracts the text between an open and a close marker from a token stream
//! without rescanning the accumulated buffer. Only a suffix that could still
//! grow into a marker is held back between chunks.

use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanState {
    /// Open marker not seen yet
    Outside,
    /// Between the markers
    Inside,
    /// Close marker seen; everything after it is trailing text
    Closed,
}

/// Streaming extractor for `open ... close` spans
#[derive(Debug, Clone)]
pub struct TagScanner {
    open: String,
    close: String,
    state: ScanState,
    /// Held-back tail that may be the start of the next marker
    pending: String,
    content: String,
    trailing: String,
}

impl TagScanner {
    pub fn new(open: impl Into<String>, close: impl Into<String>) -> Self {
        let open = open.into();
        let close = close.into();
        debug!(%open, %close, "TagScanner::new: called");
        Self {
            open,
            close,
            state: ScanState::Outside,
            pending: String::new(),
            content: String::new(),
            trailing: String::new(),
        }
    }

    pub fn state(&self) -> ScanState {
        self.state
    }

    /// Open marker seen
    pub fn is_open(&self) -> bool {
        self.state != ScanState::Outside
    }

    /// Close marker seen
    pub fn is_closed(&self) -> bool {
        self.state == ScanState::Closed
    }

    /// Inner content confirmed so far (excludes any held-back partial marker)
    pub fn content(&self) -> &str {
        &self.content
    }

    /// Text after the close marker
    pub fn trailing(&self) -> &str {
        &self.trailing
    }

    /// Feed the next chunk; returns true when this chunk changed the content
    pub fn push(&mut self, chunk: &str) -> bool {
        let before = self.content.len();
        let mut input = std::mem::take(&mut self.pending);
        input.push_str(chunk);

        if self.state == ScanState::Outside {
            match input.find(&self.open) {
                Some(at) => {
                    debug!("TagScanner::push: open marker found");
                    self.state = ScanState::Inside;
                    input = input.split_off(at + self.open.len());
                }
                None => {
                    let keep = partial_suffix(&input, &self.open);
                    self.pending = input.split_off(input.len() - keep);
                    return false;
                }
            }
        }

        if self.state == ScanState::Inside {
            match input.find(&self.close) {
                Some(at) => {
                    debug!("TagScanner::push: close marker found");
                    self.state = ScanState::Closed;
                    self.content.push_str(&input[..at]);
                    self.trailing.push_str(&input[at + self.close.len()..]);
                }
                None => {
                    let keep = partial_suffix(&input, &self.close);
                    self.pending = input.split_off(input.len() - keep);
                    self.content.push_str(&input);
                }
            }
            return self.content.len() != before;
        }

        self.trailing.push_str(&input);
        false
    }

    /// Whatever text was captured inside the markers, closed or not
    ///
    /// Includes a held-back partial close marker, since the stream ended.
    pub fn into_partial(self) -> String {
        match self.state {
            ScanState::Outside => String::new(),
            ScanState::Inside => self.content + &self.pending,
            ScanState::Closed => self.content,
        }
    }
}

/// Length of the longest proper suffix of `text` that is a prefix of `marker`
fn partial_suffix(text: &str, marker: &str) -> usize {
    let max = marker.len().saturating_sub(1).min(text.len());
    (1..=max)
        .rev()
        .find(|&k| {
            let start = text.len() - k;
            text.is_char_boundary(start) && marker.starts_with(&text[start..])
        })
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const OPEN: &str = "<final_answer>";
    const CLOSE: &str = "</final_answer>";

    #[test]
    fn test_single_chunk() {
        let mut scanner = TagScanner::new(OPEN, CLOSE);
        scanner.push("thinking... <final_answer>42</final_answer> bye");
        assert!(scanner.is_closed());
        assert_eq!(scanner.content(), "42");
        assert_eq!(scanner.trailing(), " bye");
    }

    #[test]
    fn test_split_markers() {
        let mut scanner = TagScanner::new(OPEN, CLOSE);
        for chunk in ["pre <fin", "al_ans", "wer>The ", "answer</fi", "nal_answer>", "tail"] {
            scanner.push(chunk);
        }
        assert_eq!(scanner.content(), "The answer");
        assert_eq!(scanner.trailing(), "tail");
    }

    #[test]
    fn test_partial_close_is_held_back() {
        let mut scanner = TagScanner::new(OPEN, CLOSE);
        scanner.push("<final_answer>Hello </final");
        assert!(scanner.is_open());
        assert!(!scanner.is_closed());
        assert_eq!(scanner.content(), "Hello ");

        scanner.push("ly done");
        assert_eq!(scanner.content(), "Hello </finally done");
        assert!(!scanner.is_closed());
    }

    #[test]
    fn test_never_opened() {
        let mut scanner = TagScanner::new(OPEN, CLOSE);
        assert!(!scanner.push("no markers here"));
        assert!(!scanner.is_open());
        assert_eq!(scanner.into_partial(), "");
    }

    #[test]
    fn test_into_partial_keeps_tail() {
        let mut scanner = TagScanner::new("<content>", "</content>");
        scanner.push("<content>body </cont");
        assert_eq!(scanner.into_partial(), "body </cont");
    }

    #[test]
    fn test_multibyte_boundaries() {
        let mut scanner = TagScanner::new("«", "»");
        for chunk in ["é«", "über", "»ü"] {
            scanner.push(chunk);
        }
        assert_eq!(scanner.content(), "über");
        assert_eq!(scanner.trailing(), "ü");
    }

    fn split_at_points(text: &str, mut points: Vec<usize>) -> Vec<&str> {
        points.retain(|p| text.is_char_boundary(*p));
        points.sort_unstable();
        points.dedup();
        let mut chunks = Vec::new();
        let mut last = 0;
        for p in points {
            chunks.push(&text[last..p]);
            last = p;
        }
        chunks.push(&text[last..]);
        chunks
    }

    proptest! {
        #[test]
        fn prop_chunking_never_finalizes_early(
            pre in "[a-z <>/_]{0,20}",
            body in "[a-z <>/_]{0,40}",
            post in "[a-z <>/_]{0,20}",
            cuts in proptest::collection::vec(0usize..120, 0..12),
        ) {
            // markers first occur where they were inserted
            prop_assume!(!format!("{pre}{OPEN}")[..pre.len() + OPEN.len() - 1].contains(OPEN));
            prop_assume!(!format!("{body}{CLOSE}")[..body.len() + CLOSE.len() - 1].contains(CLOSE));

            let text = format!("{pre}{OPEN}{body}{CLOSE}{post}");
            let close_end = pre.len() + OPEN.len() + body.len() + CLOSE.len();
            let points: Vec<usize> = cuts.into_iter().map(|c| c.min(text.len())).collect();

            let mut scanner = TagScanner::new(OPEN, CLOSE);
            let mut consumed = 0;
            for chunk in split_at_points(&text, points) {
                scanner.push(chunk);
                consumed += chunk.len();
                prop_assert_eq!(scanner.is_closed(), consumed >= close_end);
                prop_assert!(body.starts_with(scanner.content()));
            }
            prop_assert_eq!(scanner.content(), body.as_str());
            prop_assert_eq!(scanner.trailing(), post.as_str());
        }
    }
}
