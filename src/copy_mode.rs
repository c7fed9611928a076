//! Copy/scroll mode.
//!
//! Entering copy mode materializes the pane's scrollback plus visible screen
//! into a plain-text document with per-line styled runs. Input is then
//! diverted to a cursor over that document until the mode is left.

use crate::screen::{Attrs, Color, Screen};

/// A frozen snapshot of a pane's content, with the index position that
/// corresponds to the live cursor.
#[derive(Clone, Debug, Default)]
pub struct CopyDocument {
    pub text: String,
    pub cursor_position: usize,
    /// Styled runs per line, for the renderer.
    pub line_tokens: Vec<Vec<(Attrs, String)>>,
}

#[derive(Clone, Debug)]
pub struct SearchState {
    pub text: String,
    pub forward: bool,
    pub ignore_case: bool,
}

impl Default for SearchState {
    fn default() -> Self {
        SearchState { text: String::new(), forward: true, ignore_case: false }
    }
}

/// Per-pane copy mode state: the snapshot, a movable cursor (byte index into
/// `document.text`), an optional selection anchor and the search state.
pub struct ScrollBuffer {
    pub document: CopyDocument,
    pub cursor: usize,
    pub anchor: Option<usize>,
    pub search: SearchState,
    /// Query being typed after `/` or `?`, before it is committed.
    pub search_input: Option<String>,
    pub title: String,
}

impl ScrollBuffer {
    pub fn new(document: CopyDocument, title: String) -> Self {
        let cursor = document.cursor_position;
        ScrollBuffer {
            document,
            cursor,
            anchor: None,
            search: SearchState::default(),
            search_input: None,
            title,
        }
    }

    fn line_starts(&self) -> Vec<usize> {
        let mut starts = vec![0];
        for (i, b) in self.document.text.bytes().enumerate() {
            if b == b'\n' {
                starts.push(i + 1);
            }
        }
        starts
    }

    /// (row, col) of the cursor in the document.
    pub fn cursor_row_col(&self) -> (usize, usize) {
        let starts = self.line_starts();
        let row = match starts.binary_search(&self.cursor) {
            Ok(r) => r,
            Err(r) => r - 1,
        };
        (row, self.cursor - starts[row])
    }

    fn move_to_row_col(&mut self, row: usize, col: usize) {
        let starts = self.line_starts();
        let row = row.min(starts.len().saturating_sub(1));
        let start = starts[row];
        let end = self.document.text[start..]
            .find('\n')
            .map(|n| start + n)
            .unwrap_or(self.document.text.len());
        self.cursor = (start + col).min(end);
    }

    pub fn move_up(&mut self, count: usize) {
        let (row, col) = self.cursor_row_col();
        self.move_to_row_col(row.saturating_sub(count), col);
    }

    pub fn move_down(&mut self, count: usize) {
        let (row, col) = self.cursor_row_col();
        self.move_to_row_col(row + count, col);
    }

    pub fn move_left(&mut self, count: usize) {
        let (row, col) = self.cursor_row_col();
        self.move_to_row_col(row, col.saturating_sub(count));
    }

    pub fn move_right(&mut self, count: usize) {
        let (row, col) = self.cursor_row_col();
        self.move_to_row_col(row, col + count);
    }

    pub fn move_to_start_of_line(&mut self) {
        let (row, _) = self.cursor_row_col();
        self.move_to_row_col(row, 0);
    }

    pub fn move_to_end_of_line(&mut self) {
        let (row, _) = self.cursor_row_col();
        self.move_to_row_col(row, usize::MAX);
    }

    pub fn move_to_top(&mut self) {
        self.cursor = 0;
    }

    pub fn move_to_bottom(&mut self) {
        self.cursor = self.document.text.len();
    }

    /// Find the next match for the current search query. Returns true when
    /// the cursor moved.
    pub fn search_next(&mut self, forward: bool) -> bool {
        if self.search.text.is_empty() {
            return false;
        }
        let (haystack, needle) = if self.search.ignore_case {
            (self.document.text.to_lowercase(), self.search.text.to_lowercase())
        } else {
            (self.document.text.clone(), self.search.text.clone())
        };

        let found = if forward {
            let from = (self.cursor + 1).min(haystack.len());
            haystack[from..].find(&needle).map(|i| from + i)
        } else {
            haystack[..self.cursor.min(haystack.len())].rfind(&needle)
        };

        match found {
            Some(i) => {
                self.cursor = i;
                true
            }
            None => false,
        }
    }

    /// Text between the anchor and the cursor, for yanking.
    pub fn selection_text(&self) -> Option<String> {
        let anchor = self.anchor?;
        let (from, to) =
            if anchor <= self.cursor { (anchor, self.cursor) } else { (self.cursor, anchor) };
        let to = to.min(self.document.text.len());
        Some(self.document.text[from..to].to_string())
    }
}

fn has_transparent_background(attrs: &Attrs) -> bool {
    attrs.bg == Color::Default
}

/// Build a copy document from the screen's scrollback plus visible area.
/// Trailing whitespace on transparent-background runs is trimmed; filler
/// cells of wide graphemes are skipped.
pub fn create_copy_document(screen: &Screen) -> CopyDocument {
    let mut text = String::new();
    let mut line_tokens: Vec<Vec<(Attrs, String)>> = Vec::new();

    let first_row = screen.data_buffer.keys().next().copied().unwrap_or(0);
    let last_row = screen.data_buffer.keys().next_back().copied().unwrap_or(0);

    let mut line_start_indexes = Vec::new();

    for lineno in first_row..=last_row {
        line_start_indexes.push(text.len());
        let mut tokens: Vec<(Attrs, String)> = Vec::new();

        if let Some(row) = screen.data_buffer.get(&lineno) {
            let max_column = row.keys().next_back().copied().unwrap_or(0);

            let mut cells: Vec<(String, Attrs)> = (0..=max_column)
                .map(|x| match row.get(&x) {
                    Some(cell) => (cell.text.clone(), cell.attrs),
                    None => (" ".to_string(), Attrs::default()),
                })
                .collect();

            while cells
                .last()
                .map_or(false, |(t, a)| t.trim().is_empty() && !t.is_empty() && has_transparent_background(a))
            {
                cells.pop();
            }

            for (t, attrs) in cells {
                if t.is_empty() {
                    // Filler of a double-width grapheme.
                    continue;
                }
                text.push_str(&t);
                match tokens.last_mut() {
                    Some((last_attrs, run)) if *last_attrs == attrs => run.push_str(&t),
                    _ => tokens.push((attrs, t)),
                }
            }
        }

        line_tokens.push(tokens);
        text.push('\n');
    }

    // Translate the live cursor into an index position.
    let cursor_row = screen.cursor.y.saturating_sub(first_row);
    let cursor_position = match line_start_indexes.get(cursor_row) {
        Some(start) => {
            let line_end = text[*start..].find('\n').map(|n| start + n).unwrap_or(text.len());
            (start + screen.cursor.x).min(line_end)
        }
        None => text.len(),
    };

    CopyDocument { text, cursor_position, line_tokens }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::screen::tests::test_screen;
    use crate::stream::Stream;

    #[test]
    fn copy_document_round_trip() {
        let (mut screen, _rx) = test_screen(24, 80);
        let mut stream = Stream::new();
        stream.feed("hello\r\nworld\r\n", &mut screen);

        let doc = create_copy_document(&screen);
        assert_eq!(doc.text, "hello\nworld\n");
        // The live cursor sits on row 2 col 0, which is the end of the text.
        assert_eq!(doc.cursor_position, doc.text.len());
    }

    #[test]
    fn cursor_position_mid_line() {
        let (mut screen, _rx) = test_screen(24, 80);
        let mut stream = Stream::new();
        stream.feed("abc\r\ndef\x1b[2;2H", &mut screen);

        let doc = create_copy_document(&screen);
        assert_eq!(doc.text, "abc\ndef\n");
        // Cursor at row 1, col 1 -> index of 'e'.
        assert_eq!(doc.cursor_position, 5);
    }

    #[test]
    fn trailing_whitespace_trimmed_only_when_transparent() {
        let (mut screen, _rx) = test_screen(24, 80);
        let mut stream = Stream::new();
        stream.feed("a  \r\n\x1b[41mb \x1b[0m\r\n", &mut screen);

        let doc = create_copy_document(&screen);
        // First line loses its spaces; the colored space on line 2 stays.
        assert_eq!(doc.text, "a\nb \n");
    }

    #[test]
    fn wide_grapheme_filler_skipped() {
        let (mut screen, _rx) = test_screen(24, 80);
        let mut stream = Stream::new();
        stream.feed("中x", &mut screen);

        let doc = create_copy_document(&screen);
        assert_eq!(doc.text, "中x\n");
    }

    #[test]
    fn styled_runs_coalesce() {
        let (mut screen, _rx) = test_screen(24, 80);
        let mut stream = Stream::new();
        stream.feed("ab\x1b[1mcd", &mut screen);

        let doc = create_copy_document(&screen);
        assert_eq!(doc.line_tokens[0].len(), 2);
        assert_eq!(doc.line_tokens[0][0].1, "ab");
        assert_eq!(doc.line_tokens[0][1].1, "cd");
        assert!(doc.line_tokens[0][1].0.bold);
    }

    #[test]
    fn scroll_buffer_movement() {
        let doc = CopyDocument {
            text: "first\nsecond\nthird\n".to_string(),
            cursor_position: 0,
            line_tokens: vec![],
        };
        let mut buffer = ScrollBuffer::new(doc, "copy".into());

        buffer.move_down(1);
        assert_eq!(buffer.cursor_row_col(), (1, 0));
        buffer.move_right(3);
        assert_eq!(buffer.cursor_row_col(), (1, 3));
        buffer.move_up(1);
        assert_eq!(buffer.cursor_row_col(), (0, 3));
        // Column clamps at end of a short line.
        buffer.move_right(99);
        assert_eq!(buffer.cursor_row_col(), (0, 5));
        buffer.move_to_bottom();
        assert_eq!(buffer.cursor, buffer.document.text.len());
    }

    #[test]
    fn scroll_buffer_search() {
        let doc = CopyDocument {
            text: "alpha\nbeta\nalpha again\n".to_string(),
            cursor_position: 0,
            line_tokens: vec![],
        };
        let mut buffer = ScrollBuffer::new(doc, "copy".into());
        buffer.search.text = "alpha".into();

        assert!(buffer.search_next(true));
        assert_eq!(buffer.cursor, 11);
        assert!(!buffer.search_next(true));
        assert!(buffer.search_next(false));
        assert_eq!(buffer.cursor, 0);
    }

    #[test]
    fn selection_yank() {
        let doc = CopyDocument {
            text: "hello world\n".to_string(),
            cursor_position: 0,
            line_tokens: vec![],
        };
        let mut buffer = ScrollBuffer::new(doc, "copy".into());
        buffer.anchor = Some(0);
        buffer.move_right(5);
        assert_eq!(buffer.selection_text().unwrap(), "hello");
    }
}
