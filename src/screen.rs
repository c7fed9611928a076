//! The in-memory terminal screen model.
//!
//! A `Screen` is a sparse grid of styled cells mutated by the VT100 parser in
//! `stream.rs`. Rows live in a `BTreeMap` keyed by an unbounded row index:
//! rows above `line_offset` are scrollback, the visible window is
//! `line_offset..line_offset + lines`. Keeping the buffer sparse lets
//! `clear_history` and history pruning drop whole rows without touching
//! cells, and costs nothing for mostly-empty screens.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use unicode_segmentation::UnicodeSegmentation;
use unicode_width::UnicodeWidthStr;

use crate::charsets::{self, Charset};

/// Terminal mode constants. DEC private modes are stored shifted by 5 so they
/// never collide with ANSI mode numbers.
pub mod modes {
    pub const IRM: u32 = 4;
    pub const LNM: u32 = 20;

    pub const DECCKM: u32 = 1 << 5;
    pub const DECCOLM: u32 = 3 << 5;
    pub const DECSCNM: u32 = 5 << 5;
    pub const DECOM: u32 = 6 << 5;
    pub const DECAWM: u32 = 7 << 5;
    pub const DECTCEM: u32 = 25 << 5;
    pub const MOUSE_CLICK: u32 = 1000 << 5;
    pub const MOUSE_SGR: u32 = 1006 << 5;
    pub const MOUSE_URXVT: u32 = 1015 << 5;
    pub const ALTERNATE_SCREEN: u32 = 1049 << 5;
    pub const BRACKETED_PASTE: u32 = 2004 << 5;

    pub const PRIVATE_SHIFT: u32 = 5;
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Default)]
pub enum Color {
    #[default]
    Default,
    Idx(u8),
    Rgb(u8, u8, u8),
}

/// Text attributes accumulated by SGR sequences and stamped on every cell.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Default)]
pub struct Attrs {
    pub fg: Color,
    pub bg: Color,
    pub bold: bool,
    pub dim: bool,
    pub italic: bool,
    pub underline: bool,
    pub blink: bool,
    pub reverse: bool,
    pub hidden: bool,
}

/// One screen position: a grapheme (0, 1 or 2 columns wide) plus attributes.
/// The second column of a wide grapheme holds a filler cell with empty text.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Cell {
    pub text: String,
    pub attrs: Attrs,
}

impl Cell {
    pub fn width(&self) -> usize {
        UnicodeWidthStr::width(self.text.as_str())
    }

    pub fn is_filler(&self) -> bool {
        self.text.is_empty()
    }
}

/// Bounded cell cache. Cell creation is the hottest allocation in the whole
/// emulator; identical (text, attrs) pairs share one allocation.
struct CellCache {
    map: HashMap<(String, Attrs), Arc<Cell>>,
    order: VecDeque<(String, Attrs)>,
    capacity: usize,
}

impl CellCache {
    fn new(capacity: usize) -> Self {
        CellCache { map: HashMap::new(), order: VecDeque::new(), capacity }
    }

    fn get(&mut self, text: &str, attrs: Attrs) -> Arc<Cell> {
        if let Some(cell) = self.map.get(&(text.to_string(), attrs)) {
            return cell.clone();
        }
        if self.map.len() >= self.capacity {
            if let Some(old) = self.order.pop_front() {
                self.map.remove(&old);
            }
        }
        let cell = Arc::new(Cell { text: text.to_string(), attrs });
        self.map.insert((text.to_string(), attrs), cell.clone());
        self.order.push_back((text.to_string(), attrs));
        cell
    }
}

pub type Row = BTreeMap<usize, Arc<Cell>>;
pub type DataBuffer = BTreeMap<usize, Row>;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Margins {
    pub top: usize,
    pub bottom: usize,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub struct CursorPosition {
    pub x: usize,
    pub y: usize,
}

/// Cursor state pushed by DECSC and popped by DECRC.
#[derive(Clone)]
struct Savepoint {
    cursor: CursorPosition,
    g0_charset: Charset,
    g1_charset: Charset,
    charset: usize,
    origin: bool,
    wrap: bool,
    attrs: Attrs,
}

/// Everything that swaps when entering/leaving the alternate screen (1049).
struct SavedScreen {
    mode: HashSet<u32>,
    margins: Option<Margins>,
    charset: usize,
    g0_charset: Charset,
    g1_charset: Charset,
    tabstops: BTreeSet<usize>,
    line_offset: usize,
    data_buffer: DataBuffer,
    max_y: usize,
    cursor: CursorPosition,
    show_cursor: bool,
    attrs: Attrs,
}

pub struct Screen {
    pub lines: usize,
    pub columns: usize,

    pub data_buffer: DataBuffer,
    pub cursor: CursorPosition,
    pub show_cursor: bool,

    /// Index of the line currently displayed on top.
    pub line_offset: usize,
    /// Largest row index ever written; bounds history pruning.
    pub max_y: usize,

    pub mode: HashSet<u32>,
    pub margins: Option<Margins>,
    pub title: String,
    pub icon_name: String,

    tabstops: BTreeSet<usize>,
    charset: usize,
    g0_charset: Charset,
    g1_charset: Charset,
    attrs: Attrs,
    savepoints: Vec<Savepoint>,
    original_screen: Option<Box<SavedScreen>>,

    cache: CellCache,
    history_cleanup_counter: u32,

    write_process_input: Box<dyn FnMut(&str) + Send>,
    bell_func: Box<dyn FnMut() + Send>,
    history_limit: Arc<AtomicUsize>,
}

impl Screen {
    pub fn new(
        lines: usize,
        columns: usize,
        write_process_input: Box<dyn FnMut(&str) + Send>,
        bell_func: Box<dyn FnMut() + Send>,
        history_limit: Arc<AtomicUsize>,
    ) -> Self {
        let mut screen = Screen {
            lines: lines.max(1),
            columns: columns.max(1),
            data_buffer: BTreeMap::new(),
            cursor: CursorPosition::default(),
            show_cursor: true,
            line_offset: 0,
            max_y: 0,
            mode: HashSet::new(),
            margins: None,
            title: String::new(),
            icon_name: String::new(),
            tabstops: BTreeSet::new(),
            charset: 0,
            g0_charset: Charset::Latin1,
            g1_charset: Charset::Vt100Graphics,
            attrs: Attrs::default(),
            savepoints: Vec::new(),
            original_screen: None,
            cache: CellCache::new(1_000_000),
            history_cleanup_counter: 0,
            write_process_input,
            bell_func,
            history_limit,
        };
        screen.reset();
        screen
    }

    /// Reset the terminal to its initial state: modes, charsets, tab stops,
    /// buffer, cursor.
    pub fn reset(&mut self) {
        self.reset_screen();

        self.title.clear();
        self.icon_name.clear();

        self.mode = HashSet::from([modes::DECAWM, modes::DECTCEM]);

        self.charset = 0;
        self.g0_charset = Charset::Latin1;
        self.g1_charset = Charset::Vt100Graphics;

        // Tab stops every 8 columns, pre-created up to column 1000 so that
        // they survive the screen growing.
        self.tabstops = (8..1000).step_by(8).collect();

        self.original_screen = None;
    }

    fn reset_screen(&mut self) {
        self.data_buffer = BTreeMap::new();
        self.cursor = CursorPosition::default();
        self.show_cursor = true;
        self.attrs = Attrs::default();
        self.margins = None;
        self.line_offset = 0;
        self.max_y = 0;
    }

    fn effective_margins(&self) -> Margins {
        self.margins.unwrap_or(Margins { top: 0, bottom: self.lines.saturating_sub(1) })
    }

    pub fn in_alternate_screen(&self) -> bool {
        self.original_screen.is_some()
    }

    /// True when the process expects application cursor key sequences.
    pub fn in_application_mode(&self) -> bool {
        self.mode.contains(&modes::DECCKM)
    }

    pub fn mouse_support_enabled(&self) -> bool {
        self.mode.contains(&modes::MOUSE_CLICK)
    }

    pub fn sgr_mouse_support_enabled(&self) -> bool {
        self.mode.contains(&modes::MOUSE_SGR)
    }

    pub fn urxvt_mouse_support_enabled(&self) -> bool {
        self.mode.contains(&modes::MOUSE_URXVT)
    }

    pub fn bracketed_paste_enabled(&self) -> bool {
        self.mode.contains(&modes::BRACKETED_PASTE)
    }

    /// The whole screen is set to reverse video.
    pub fn has_reverse_video(&self) -> bool {
        self.mode.contains(&modes::DECSCNM)
    }

    pub fn resize(&mut self, lines: usize, columns: usize) {
        let lines = lines.max(1);
        let columns = columns.max(1);

        if self.lines != lines || self.columns != columns {
            if lines < self.lines {
                // Cap max_y so the cursor cannot end up hidden below the
                // visible window after a shrink; scrollback above survives.
                self.max_y = self.max_y.min(self.cursor.y + lines - 1);
            }
            self.lines = lines;
            self.columns = columns;
            self.reset_offset();
        }
    }

    /// Recalculate `line_offset` so the bottom of the content is visible.
    /// Explicitly set margins are left alone; the default full-window margins
    /// are derived, so nothing needs re-homing.
    fn reset_offset(&mut self) {
        if self.in_alternate_screen() {
            self.line_offset = 0;
        } else if !self.data_buffer.is_empty() {
            self.line_offset = (self.max_y + 1).saturating_sub(self.lines);
        }
    }

    /// DECSTBM. Arguments are 1-based; 0 selects the default for that edge.
    pub fn set_margins(&mut self, top: u32, bottom: u32) {
        let top = if top == 0 { 0 } else { (top - 1) as usize };
        let bottom = if bottom == 0 {
            self.lines.saturating_sub(1)
        } else {
            (bottom - 1) as usize
        };

        let top = top.min(self.lines.saturating_sub(1));
        let bottom = bottom.min(self.lines.saturating_sub(1));

        // Regions of height < 2 are ignored per DECSTBM, but a full-window
        // region is still recorded so aptitude-style programs behave.
        if bottom > top {
            self.margins = Some(Margins { top, bottom });
            // DECSTBM homes the cursor.
            self.cursor_position(0, 0);
        }
    }

    pub fn set_charset(&mut self, code: char, mode: char) {
        if let Some(charset) = charsets::charset_for_code(code) {
            match mode {
                '(' => self.g0_charset = charset,
                ')' => self.g1_charset = charset,
                _ => {}
            }
        }
    }

    /// Activate G0.
    pub fn shift_in(&mut self) {
        self.charset = 0;
    }

    /// Activate G1.
    pub fn shift_out(&mut self) {
        self.charset = 1;
    }

    pub fn set_mode(&mut self, codes: &[u32], private: bool) {
        let codes: Vec<u32> = if private {
            codes.iter().map(|m| m << modes::PRIVATE_SHIFT).collect()
        } else {
            codes.to_vec()
        };

        self.mode.extend(codes.iter().copied());

        if codes.contains(&modes::DECCOLM) {
            self.resize(self.lines, 132);
            self.erase_in_display(2);
            self.cursor_position(0, 0);
        }
        if codes.contains(&modes::DECOM) {
            self.cursor_position(0, 0);
        }
        if codes.contains(&modes::DECTCEM) {
            self.show_cursor = true;
        }

        // Enter the alternate screen: push the current screen state and
        // present a fresh one.
        if codes.contains(&modes::ALTERNATE_SCREEN) && !self.in_alternate_screen() {
            let saved = SavedScreen {
                mode: self.mode.clone(),
                margins: self.margins,
                charset: self.charset,
                g0_charset: self.g0_charset,
                g1_charset: self.g1_charset,
                tabstops: self.tabstops.clone(),
                line_offset: self.line_offset,
                data_buffer: std::mem::take(&mut self.data_buffer),
                max_y: self.max_y,
                cursor: self.cursor,
                show_cursor: self.show_cursor,
                attrs: self.attrs,
            };
            self.reset_screen();
            self.original_screen = Some(Box::new(saved));
            self.reset_offset();
        }
    }

    pub fn reset_mode(&mut self, codes: &[u32], private: bool) {
        let codes: Vec<u32> = if private {
            codes.iter().map(|m| m << modes::PRIVATE_SHIFT).collect()
        } else {
            codes.to_vec()
        };

        for code in &codes {
            self.mode.remove(code);
        }

        if codes.contains(&modes::DECCOLM) {
            self.resize(self.lines, 80);
            self.erase_in_display(2);
            self.cursor_position(0, 0);
        }
        if codes.contains(&modes::DECOM) {
            self.cursor_position(0, 0);
        }
        if codes.contains(&modes::DECTCEM) {
            self.show_cursor = false;
        }

        if codes.contains(&modes::ALTERNATE_SCREEN) {
            if let Some(saved) = self.original_screen.take() {
                let saved = *saved;
                self.mode = saved.mode;
                self.margins = saved.margins;
                self.charset = saved.charset;
                self.g0_charset = saved.g0_charset;
                self.g1_charset = saved.g1_charset;
                self.tabstops = saved.tabstops;
                self.line_offset = saved.line_offset;
                self.data_buffer = saved.data_buffer;
                self.max_y = saved.max_y;
                self.cursor = saved.cursor;
                self.show_cursor = saved.show_cursor;
                self.attrs = saved.attrs;
                self.reset_offset();
            }
        }
    }

    /// Write a run of printable text at the cursor, honoring autowrap,
    /// insert mode and the current attributes.
    pub fn draw(&mut self, input: &str) {
        for grapheme in input.graphemes(true) {
            let translated = self.translate_grapheme(grapheme);
            let text = translated.as_str();
            let width = UnicodeWidthStr::width(text);

            if width == 0 {
                self.merge_zero_width(text);
                continue;
            }

            if self.cursor.x >= self.columns {
                if self.mode.contains(&modes::DECAWM) {
                    self.carriage_return();
                    self.linefeed();
                } else {
                    self.cursor.x = self.cursor.x.saturating_sub(width);
                }
            }

            if self.mode.contains(&modes::IRM) {
                self.insert_characters(width as u32);
            }

            let cell = self.cache.get(text, self.attrs);
            let filler = if width > 1 { Some(self.cache.get("", self.attrs)) } else { None };

            let y = self.cursor.y;
            let x = self.cursor.x;
            let row = self.data_buffer.entry(y).or_default();
            row.insert(x, cell);
            if let Some(filler) = filler {
                row.insert(x + 1, filler);
            }

            self.cursor.x += width;
            if y > self.max_y {
                self.max_y = y;
            }
        }
    }

    fn translate_grapheme(&self, grapheme: &str) -> String {
        let active = if self.charset == 1 { self.g1_charset } else { self.g0_charset };
        if active == Charset::Latin1 {
            return grapheme.to_string();
        }
        let mut chars = grapheme.chars();
        match (chars.next(), chars.next()) {
            (Some(ch), None) => charsets::translate(active, ch).to_string(),
            _ => grapheme.to_string(),
        }
    }

    /// Combining characters attach to the previously drawn cell.
    fn merge_zero_width(&mut self, text: &str) {
        if self.cursor.x == 0 {
            return;
        }
        let y = self.cursor.y;
        let mut x = self.cursor.x.min(self.columns) - 1;
        let Some(row) = self.data_buffer.get_mut(&y) else { return };
        if row.get(&x).map_or(false, |c| c.is_filler()) && x > 0 {
            x -= 1;
        }
        if let Some(cell) = row.get(&x) {
            let mut merged = (**cell).clone();
            merged.text.push_str(text);
            row.insert(x, Arc::new(merged));
        }
    }

    pub fn carriage_return(&mut self) {
        self.cursor.x = 0;
    }

    /// Move the cursor down one line in the same column; scroll when at the
    /// bottom of the scrolling region.
    pub fn index(&mut self) {
        let Margins { top, bottom } = self.effective_margins();

        if top == 0 && bottom >= self.lines.saturating_sub(1) {
            // Scrolling over the full height keeps history.
            if self.cursor.y >= self.line_offset + self.lines - 1 {
                self.line_offset += 1;
            }
            self.cursor_down(1);
        } else if self.cursor.y.saturating_sub(self.line_offset) == bottom {
            for line in top..bottom {
                match self.data_buffer.remove(&(line + self.line_offset + 1)) {
                    Some(row) => {
                        self.data_buffer.insert(line + self.line_offset, row);
                    }
                    None => {
                        self.data_buffer.remove(&(line + self.line_offset));
                    }
                }
            }
        } else {
            self.cursor_down(1);
        }

        // Prune old history every 100 calls.
        self.history_cleanup_counter += 1;
        if self.history_cleanup_counter == 100 {
            self.remove_old_lines_from_history();
            self.history_cleanup_counter = 0;
        }
    }

    fn remove_old_lines_from_history(&mut self) {
        let limit = self.history_limit.load(Ordering::Relaxed);
        let remove_above = self.cursor.y.saturating_sub(limit);
        if remove_above > 0 {
            self.data_buffer = self.data_buffer.split_off(&remove_above);
        }
    }

    /// Delete all history above the visible window.
    pub fn clear_history(&mut self) {
        if self.line_offset > 0 {
            self.data_buffer = self.data_buffer.split_off(&self.line_offset);
        }
    }

    pub fn reverse_index(&mut self) {
        let Margins { top, bottom } = self.effective_margins();
        let line_offset = self.line_offset;

        if self.cursor.y.saturating_sub(line_offset) == top {
            let mut i = bottom;
            while i > top {
                let src = i - 1 + line_offset;
                match self.data_buffer.remove(&src) {
                    Some(row) => {
                        self.data_buffer.insert(src + 1, row);
                    }
                    None => {
                        self.data_buffer.remove(&(src + 1));
                    }
                }
                i -= 1;
            }
        } else {
            self.cursor_up(1);
        }
    }

    pub fn linefeed(&mut self) {
        self.index();
        if self.mode.contains(&modes::LNM) {
            self.carriage_return();
        }
        self.ensure_bounds(false);
    }

    /// `ESC E`: go to the next line at column 0, regardless of LNM.
    pub fn next_line(&mut self) {
        self.index();
        self.carriage_return();
        self.ensure_bounds(false);
    }

    pub fn tab(&mut self) {
        let column = self
            .tabstops
            .range(self.cursor.x + 1..)
            .next()
            .copied()
            .unwrap_or(self.columns.saturating_sub(1));
        self.cursor.x = column;
    }

    pub fn backspace(&mut self) {
        self.cursor_back(1);
    }

    /// DECSC.
    pub fn save_cursor(&mut self) {
        self.savepoints.push(Savepoint {
            cursor: self.cursor,
            g0_charset: self.g0_charset,
            g1_charset: self.g1_charset,
            charset: self.charset,
            origin: self.mode.contains(&modes::DECOM),
            wrap: self.mode.contains(&modes::DECAWM),
            attrs: self.attrs,
        });
    }

    /// DECRC. With an empty stack the cursor homes and origin mode resets.
    pub fn restore_cursor(&mut self) {
        if let Some(savepoint) = self.savepoints.pop() {
            self.g0_charset = savepoint.g0_charset;
            self.g1_charset = savepoint.g1_charset;
            self.charset = savepoint.charset;
            self.attrs = savepoint.attrs;

            if savepoint.origin {
                self.mode.insert(modes::DECOM);
            }
            if savepoint.wrap {
                self.mode.insert(modes::DECAWM);
            }

            self.cursor = savepoint.cursor;
            self.ensure_bounds(true);
        } else {
            self.mode.remove(&modes::DECOM);
            self.cursor_position(0, 0);
        }
    }

    pub fn insert_lines(&mut self, count: u32) {
        let count = count.max(1) as usize;
        let Margins { top, bottom } = self.effective_margins();
        let offset = self.line_offset;
        let cursor_rel = self.cursor.y.saturating_sub(offset);

        if cursor_rel < top || cursor_rel > bottom {
            return;
        }

        let mut line = bottom;
        while line > cursor_rel {
            if line < top + count {
                self.data_buffer.remove(&(line + offset));
            } else {
                match self.data_buffer.remove(&(line + offset - count)) {
                    Some(row) => {
                        self.data_buffer.insert(line + offset, row);
                    }
                    None => {
                        self.data_buffer.remove(&(line + offset));
                    }
                }
            }
            line -= 1;
        }

        self.carriage_return();
    }

    pub fn delete_lines(&mut self, count: u32) {
        let count = count.max(1) as usize;
        let Margins { top, bottom } = self.effective_margins();
        let offset = self.line_offset;
        let cursor_rel = self.cursor.y.saturating_sub(offset);

        if cursor_rel < top || cursor_rel > bottom {
            return;
        }

        for line in cursor_rel..=bottom {
            if line + count > bottom {
                self.data_buffer.remove(&(line + offset));
            } else {
                match self.data_buffer.get(&(line + count + offset)).cloned() {
                    Some(row) => {
                        self.data_buffer.insert(line + offset, row);
                    }
                    None => {
                        self.data_buffer.remove(&(line + offset));
                    }
                }
            }
        }
    }

    /// Shift cells at and after the cursor to the right; the cursor stays.
    pub fn insert_characters(&mut self, count: u32) {
        let count = count.max(1) as usize;
        let x = self.cursor.x;
        let Some(row) = self.data_buffer.get_mut(&self.cursor.y) else { return };

        let columns: Vec<usize> = row.range(x..).map(|(c, _)| *c).collect();
        for &col in columns.iter().rev() {
            if let Some(cell) = row.remove(&col) {
                row.insert(col + count, cell);
            }
        }
    }

    pub fn delete_characters(&mut self, count: u32) {
        let count = count.max(1) as usize;
        let x = self.cursor.x;
        let Some(row) = self.data_buffer.get_mut(&self.cursor.y) else { return };

        let columns: Vec<usize> = row.range(x..).map(|(c, _)| *c).collect();
        for &col in &columns {
            let cell = row.remove(&col);
            if col >= x + count {
                if let Some(cell) = cell {
                    row.insert(col - count, cell);
                }
            }
        }
    }

    /// Blank `count` cells starting at the cursor, keeping attributes.
    pub fn erase_characters(&mut self, count: u32) {
        let count = count.max(1) as usize;
        let y = self.cursor.y;
        let from = self.cursor.x;
        let to = (from + count).min(self.columns);

        for column in from..to {
            let attrs = self
                .data_buffer
                .get(&y)
                .and_then(|row| row.get(&column))
                .map(|c| c.attrs)
                .unwrap_or_default();
            let cell = self.cache.get(" ", attrs);
            self.data_buffer.entry(y).or_default().insert(column, cell);
        }
    }

    /// Mode 0: cursor to EOL. 1: BOL to cursor. 2: whole line.
    pub fn erase_in_line(&mut self, kind: u32) {
        let y = self.cursor.y;
        let x = self.cursor.x;
        match kind {
            2 => {
                self.data_buffer.remove(&y);
            }
            0 => {
                if let Some(row) = self.data_buffer.get_mut(&y) {
                    let _ = row.split_off(&x);
                }
            }
            1 => {
                if let Some(row) = self.data_buffer.get_mut(&y) {
                    let kept = row.split_off(&(x + 1));
                    *row = kept;
                }
            }
            _ => {}
        }
    }

    /// Mode 0: cursor to end. 1: start to cursor. 2: whole display.
    /// 3: clear history (xterm).
    pub fn erase_in_display(&mut self, kind: u32) {
        match kind {
            3 => {
                self.data_buffer.clear();
                self.cursor.y = self.cursor.y.saturating_sub(self.line_offset);
                self.line_offset = 0;
            }
            0 => {
                let from = self.cursor.y + 1;
                let to = self.line_offset + self.lines;
                for line in from..to {
                    self.data_buffer.remove(&line);
                }
                self.erase_in_line(0);
            }
            1 => {
                for line in self.line_offset..self.cursor.y {
                    self.data_buffer.remove(&line);
                }
                self.erase_in_line(1);
            }
            2 => {
                let from = self.line_offset;
                let to = self.line_offset + self.lines;
                for line in from..to {
                    self.data_buffer.remove(&line);
                }
            }
            _ => {}
        }
    }

    /// CUP. `line` and `column` are 1-based; 0 means 1.
    pub fn cursor_position(&mut self, line: u32, column: u32) {
        let column = (column.max(1) - 1) as usize;
        let mut line = (line.max(1) - 1) as usize;

        if self.mode.contains(&modes::DECOM) {
            let margins = self.effective_margins();
            line += margins.top;
            if line < margins.top || line > margins.bottom {
                return;
            }
        }

        self.cursor.x = column;
        self.cursor.y = line + self.line_offset;
        self.ensure_bounds(false);
    }

    pub fn cursor_to_column(&mut self, column: u32) {
        self.cursor.x = (column.max(1) - 1) as usize;
        self.ensure_bounds(false);
    }

    pub fn cursor_to_line(&mut self, line: u32) {
        self.cursor.y = (line.max(1) - 1) as usize + self.line_offset;

        if self.mode.contains(&modes::DECOM) {
            self.cursor.y += self.effective_margins().top;
        }

        self.ensure_bounds(false);
    }

    pub fn cursor_down(&mut self, count: u32) {
        self.cursor.y += count.max(1) as usize;
        self.ensure_bounds(true);
    }

    pub fn cursor_down1(&mut self, count: u32) {
        self.cursor_down(count);
        self.carriage_return();
    }

    pub fn cursor_up(&mut self, count: u32) {
        self.cursor.y = self.cursor.y.saturating_sub(count.max(1) as usize);
        self.ensure_bounds(true);
    }

    pub fn cursor_up1(&mut self, count: u32) {
        self.cursor_up(count);
        self.carriage_return();
    }

    pub fn cursor_back(&mut self, count: u32) {
        self.cursor.x = self.cursor.x.saturating_sub(count.max(1) as usize);
        self.ensure_bounds(false);
    }

    pub fn cursor_forward(&mut self, count: u32) {
        self.cursor.x += count.max(1) as usize;
        self.ensure_bounds(false);
    }

    pub fn bell(&mut self) {
        (self.bell_func)();
    }

    pub fn set_tab_stop(&mut self) {
        self.tabstops.insert(self.cursor.x);
    }

    /// 0: clear the stop at the cursor. 3: clear all stops.
    pub fn clear_tab_stop(&mut self, kind: u32) {
        match kind {
            0 => {
                self.tabstops.remove(&self.cursor.x);
            }
            3 => {
                self.tabstops.clear();
            }
            _ => {}
        }
    }

    /// Clamp the cursor into the screen, or into the scrolling region when
    /// `use_margins` is set or origin mode is active.
    pub fn ensure_bounds(&mut self, use_margins: bool) {
        let (top, bottom) = if use_margins || self.mode.contains(&modes::DECOM) {
            let margins = self.effective_margins();
            (margins.top, margins.bottom)
        } else {
            (0, self.lines.saturating_sub(1))
        };

        self.cursor.x = self.cursor.x.min(self.columns.saturating_sub(1));
        self.cursor.y = self
            .cursor
            .y
            .clamp(top + self.line_offset, bottom + self.line_offset + 1);
    }

    /// `ESC # 8`: fill the visible screen with 'E'.
    pub fn alignment_display(&mut self) {
        for y in 0..self.lines {
            let cell = self.cache.get("E", Attrs::default());
            let row = self.data_buffer.entry(y + self.line_offset).or_default();
            for x in 0..self.columns {
                row.insert(x, cell.clone());
            }
        }
        self.max_y = self.max_y.max(self.line_offset + self.lines - 1);
    }

    /// SGR: accumulate display attributes, including 256-color and
    /// true-color extensions.
    pub fn select_graphic_rendition(&mut self, attrs: &[u32]) {
        let attrs: Vec<u32> = if attrs.is_empty() { vec![0] } else { attrs.to_vec() };
        let mut iter = attrs.into_iter();

        while let Some(attr) = iter.next() {
            match attr {
                0 => self.attrs = Attrs::default(),
                1 => self.attrs.bold = true,
                2 => self.attrs.dim = true,
                3 => self.attrs.italic = true,
                4 => self.attrs.underline = true,
                5 | 6 => self.attrs.blink = true,
                7 => self.attrs.reverse = true,
                8 => self.attrs.hidden = true,
                21 | 22 => {
                    self.attrs.bold = false;
                    self.attrs.dim = false;
                }
                23 => self.attrs.italic = false,
                24 => self.attrs.underline = false,
                25 => self.attrs.blink = false,
                27 => self.attrs.reverse = false,
                28 => self.attrs.hidden = false,
                30..=37 => self.attrs.fg = Color::Idx((attr - 30) as u8),
                39 => self.attrs.fg = Color::Default,
                40..=47 => self.attrs.bg = Color::Idx((attr - 40) as u8),
                49 => self.attrs.bg = Color::Default,
                90..=97 => self.attrs.fg = Color::Idx((attr - 90 + 8) as u8),
                100..=107 => self.attrs.bg = Color::Idx((attr - 100 + 8) as u8),
                38 | 48 => {
                    let color = match iter.next() {
                        Some(5) => iter.next().map(|n| Color::Idx(n as u8)),
                        Some(2) => {
                            match (iter.next(), iter.next(), iter.next()) {
                                (Some(r), Some(g), Some(b)) => {
                                    Some(Color::Rgb(r as u8, g as u8, b as u8))
                                }
                                _ => None,
                            }
                        }
                        _ => None,
                    };
                    if let Some(color) = color {
                        if attr == 38 {
                            self.attrs.fg = color;
                        } else {
                            self.attrs.bg = color;
                        }
                    }
                }
                _ => {}
            }
        }
    }

    /// OSC terminator: xterm title and icon name.
    pub fn square_close(&mut self, data: &str) {
        if let Some(rest) = data.strip_prefix("0;").or_else(|| data.strip_prefix("2;")) {
            self.title = rest.to_string();
        } else if let Some(rest) = data.strip_prefix("1;") {
            self.icon_name = rest.to_string();
        }
    }

    /// DSR 6: cursor position report, written back into the process.
    pub fn report_device_status(&mut self, data: u32) {
        if data == 6 {
            let y = self.cursor.y - self.line_offset + 1;
            let x = self.cursor.x + 1;
            let response = format!("\x1b[{};{}R", y, x);
            (self.write_process_input)(&response);
        }
    }

    pub fn report_device_attributes(&mut self) {
        (self.write_process_input)("\x1b[>84;0;0c");
    }

    /// Plain text of the visible row, for tests and the fallback renderer.
    pub fn visible_row_text(&self, row: usize) -> String {
        let mut out = String::new();
        if let Some(cells) = self.data_buffer.get(&(self.line_offset + row)) {
            let max = cells.keys().next_back().copied().unwrap_or(0);
            for x in 0..=max {
                match cells.get(&x) {
                    Some(cell) if cell.is_filler() => {}
                    Some(cell) => out.push_str(&cell.text),
                    None => out.push(' '),
                }
            }
        }
        out.trim_end().to_string()
    }
}

impl std::fmt::Debug for Screen {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Screen")
            .field("lines", &self.lines)
            .field("columns", &self.columns)
            .field("cursor", &self.cursor)
            .field("line_offset", &self.line_offset)
            .field("max_y", &self.max_y)
            .finish()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::mpsc;

    pub fn test_screen(lines: usize, columns: usize) -> (Screen, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel();
        let screen = Screen::new(
            lines,
            columns,
            Box::new(move |s| {
                let _ = tx.send(s.to_string());
            }),
            Box::new(|| {}),
            Arc::new(AtomicUsize::new(2000)),
        );
        (screen, rx)
    }

    #[test]
    fn draw_advances_cursor_and_touches_one_row() {
        let (mut screen, _) = test_screen(24, 80);
        screen.draw("hello");
        assert_eq!(screen.cursor, CursorPosition { x: 5, y: 0 });
        assert_eq!(screen.data_buffer.len(), 1);
        assert_eq!(screen.visible_row_text(0), "hello");
    }

    #[test]
    fn autowrap_wraps_at_right_edge() {
        let (mut screen, _) = test_screen(24, 5);
        screen.draw("abcdefg");
        assert_eq!(screen.visible_row_text(0), "abcde");
        assert_eq!(screen.visible_row_text(1), "fg");
        assert_eq!(screen.cursor, CursorPosition { x: 2, y: 1 });
    }

    #[test]
    fn no_autowrap_overwrites_last_column() {
        let (mut screen, _) = test_screen(24, 5);
        screen.reset_mode(&[7], true); // DECAWM off
        screen.draw("abcdefg");
        assert_eq!(screen.visible_row_text(0), "abcdg");
        assert_eq!(screen.cursor.y, 0);
    }

    #[test]
    fn wide_grapheme_writes_filler() {
        let (mut screen, _) = test_screen(24, 80);
        screen.draw("中");
        assert_eq!(screen.cursor.x, 2);
        let row = screen.data_buffer.get(&0).unwrap();
        assert_eq!(row.get(&0).unwrap().text, "中");
        assert!(row.get(&1).unwrap().is_filler());
    }

    #[test]
    fn zero_width_merges_into_previous_cell() {
        let (mut screen, _) = test_screen(24, 80);
        screen.draw("e");
        screen.draw("\u{0301}"); // combining acute accent
        assert_eq!(screen.cursor.x, 1);
        let row = screen.data_buffer.get(&0).unwrap();
        assert_eq!(row.get(&0).unwrap().text, "e\u{0301}");
    }

    #[test]
    fn insert_mode_shifts_right() {
        let (mut screen, _) = test_screen(24, 80);
        screen.draw("abc");
        screen.carriage_return();
        screen.set_mode(&[modes::IRM], false);
        screen.draw("X");
        assert_eq!(screen.visible_row_text(0), "Xabc");
    }

    #[test]
    fn sgr_colors() {
        let (mut screen, _) = test_screen(24, 80);
        screen.select_graphic_rendition(&[1, 31]);
        screen.draw("x");
        let cell = screen.data_buffer.get(&0).unwrap().get(&0).unwrap();
        assert!(cell.attrs.bold);
        assert_eq!(cell.attrs.fg, Color::Idx(1));

        screen.select_graphic_rendition(&[38, 5, 220]);
        screen.draw("y");
        let cell = screen.data_buffer.get(&0).unwrap().get(&1).unwrap();
        assert_eq!(cell.attrs.fg, Color::Idx(220));

        screen.select_graphic_rendition(&[48, 2, 10, 20, 30]);
        screen.draw("z");
        let cell = screen.data_buffer.get(&0).unwrap().get(&2).unwrap();
        assert_eq!(cell.attrs.bg, Color::Rgb(10, 20, 30));

        screen.select_graphic_rendition(&[0]);
        screen.draw("w");
        let cell = screen.data_buffer.get(&0).unwrap().get(&3).unwrap();
        assert_eq!(cell.attrs, Attrs::default());
    }

    #[test]
    fn cursor_movement_is_invertible_on_cells() {
        let (mut screen, _) = test_screen(24, 80);
        screen.draw("hello");
        let before: Vec<(usize, usize)> = screen
            .data_buffer
            .iter()
            .flat_map(|(y, row)| row.keys().map(move |x| (*y, *x)))
            .collect();
        screen.cursor_down(3);
        screen.cursor_forward(10);
        screen.cursor_up(3);
        screen.cursor_back(10);
        let after: Vec<(usize, usize)> = screen
            .data_buffer
            .iter()
            .flat_map(|(y, row)| row.keys().map(move |x| (*y, *x)))
            .collect();
        assert_eq!(before, after);
    }

    #[test]
    fn alternate_screen_round_trip() {
        let (mut screen, _) = test_screen(24, 80);
        screen.draw("before");
        screen.set_margins(2, 10);
        let saved_cursor = screen.cursor;
        let saved_margins = screen.margins;
        let saved_max_y = screen.max_y;

        screen.set_mode(&[1049], true);
        assert!(screen.in_alternate_screen());
        assert!(screen.data_buffer.is_empty());
        screen.draw("alt content");
        screen.cursor_position(10, 10);
        screen.set_margins(3, 5);

        screen.reset_mode(&[1049], true);
        assert!(!screen.in_alternate_screen());
        assert_eq!(screen.cursor, saved_cursor);
        assert_eq!(screen.margins, saved_margins);
        assert_eq!(screen.max_y, saved_max_y);
        assert_eq!(screen.visible_row_text(0), "before");
    }

    #[test]
    fn erase_in_display_two_then_draw() {
        let (mut screen, _) = test_screen(24, 80);
        for _ in 0..5 {
            screen.draw("xxxxxxxx");
            screen.carriage_return();
            screen.linefeed();
        }
        screen.erase_in_display(2);
        let non_empty: usize = screen.data_buffer.values().map(|r| r.len()).sum();
        assert_eq!(non_empty, 0);

        screen.draw("abc");
        let count: usize = screen.data_buffer.values().map(|r| r.len()).sum();
        assert_eq!(count, 3);
        let row = screen.data_buffer.get(&screen.cursor.y).unwrap();
        assert_eq!(row.len(), 3);
    }

    #[test]
    fn cpr_reports_cursor() {
        let (mut screen, rx) = test_screen(24, 80);
        screen.draw("ab");
        screen.report_device_status(6);
        assert_eq!(rx.try_recv().unwrap(), "\x1b[1;3R");
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn device_attributes_report() {
        let (mut screen, rx) = test_screen(24, 80);
        screen.report_device_attributes();
        assert_eq!(rx.try_recv().unwrap(), "\x1b[>84;0;0c");
    }

    #[test]
    fn scroll_keeps_history_and_line_offset() {
        let (mut screen, _) = test_screen(3, 10);
        for i in 0..5 {
            screen.draw(&format!("line{}", i));
            screen.carriage_return();
            screen.linefeed();
        }
        assert_eq!(screen.line_offset, 3);
        // Scrollback rows are still present.
        assert_eq!(screen.data_buffer.get(&0).unwrap().get(&0).unwrap().text, "l");
        assert_eq!(screen.visible_row_text(0), "line3");
    }

    #[test]
    fn margin_scroll_discards_top_of_region() {
        let (mut screen, _) = test_screen(10, 20);
        screen.draw("top");
        screen.set_margins(2, 5);
        // Cursor homed by DECSTBM; move to the bottom margin.
        screen.cursor_position(5, 1);
        screen.draw("bottom");
        screen.cursor_position(5, 1);
        screen.index();
        // Row 4 (margin bottom) scrolled up into row 3.
        assert_eq!(screen.visible_row_text(3), "bottom");
        // Content outside the region is untouched.
        assert_eq!(screen.visible_row_text(0), "top");
    }

    #[test]
    fn resize_shrink_caps_max_y() {
        let (mut screen, _) = test_screen(10, 20);
        for _ in 0..8 {
            screen.linefeed();
        }
        assert_eq!(screen.cursor.y, 8);
        screen.draw("x");
        assert_eq!(screen.max_y, 8);
        screen.resize(4, 20);
        assert!(screen.max_y <= screen.cursor.y + 4 - 1);
        // Cursor still visible.
        assert!(screen.cursor.y >= screen.line_offset);
        assert!(screen.cursor.y <= screen.line_offset + screen.lines);
    }

    #[test]
    fn explicit_margins_survive_resize() {
        let (mut screen, _) = test_screen(10, 20);
        screen.set_margins(2, 5);
        screen.resize(12, 20);
        assert_eq!(screen.margins, Some(Margins { top: 1, bottom: 4 }));
    }

    #[test]
    fn tab_stops() {
        let (mut screen, _) = test_screen(24, 80);
        screen.tab();
        assert_eq!(screen.cursor.x, 8);
        screen.tab();
        assert_eq!(screen.cursor.x, 16);
        screen.clear_tab_stop(3);
        screen.tab();
        assert_eq!(screen.cursor.x, 79);
    }

    #[test]
    fn save_restore_cursor_with_empty_stack_homes() {
        let (mut screen, _) = test_screen(24, 80);
        screen.cursor_position(5, 5);
        screen.save_cursor();
        screen.cursor_position(10, 10);
        screen.restore_cursor();
        assert_eq!(screen.cursor, CursorPosition { x: 4, y: 4 });

        screen.set_mode(&[6], true); // DECOM
        screen.restore_cursor(); // empty stack
        assert!(!screen.mode.contains(&modes::DECOM));
        assert_eq!(screen.cursor, CursorPosition { x: 0, y: 0 });
    }

    #[test]
    fn clear_history_drops_scrollback_only() {
        let (mut screen, _) = test_screen(3, 10);
        for i in 0..6 {
            screen.draw(&format!("l{}", i));
            screen.carriage_return();
            screen.linefeed();
        }
        assert!(screen.line_offset > 0);
        screen.clear_history();
        assert!(screen.data_buffer.keys().all(|y| *y >= screen.line_offset));
    }

    #[test]
    fn insert_and_delete_lines() {
        let (mut screen, _) = test_screen(5, 10);
        for i in 0..4 {
            screen.draw(&format!("r{}", i));
            screen.carriage_return();
            screen.linefeed();
        }
        screen.cursor_position(2, 1);
        screen.insert_lines(1);
        assert_eq!(screen.visible_row_text(0), "r0");
        assert_eq!(screen.visible_row_text(1), "");
        assert_eq!(screen.visible_row_text(2), "r1");

        screen.delete_lines(1);
        assert_eq!(screen.visible_row_text(1), "r1");
    }

    #[test]
    fn delete_and_erase_characters() {
        let (mut screen, _) = test_screen(5, 20);
        screen.draw("abcdef");
        screen.carriage_return();
        screen.cursor_forward(1);
        screen.delete_characters(2);
        assert_eq!(screen.visible_row_text(0), "adef");

        screen.erase_characters(2);
        assert_eq!(screen.visible_row_text(0), "a  f");
    }

    #[test]
    fn erase_in_line_variants() {
        let (mut screen, _) = test_screen(5, 20);
        screen.draw("abcdef");
        screen.carriage_return();
        screen.cursor_forward(3);
        screen.erase_in_line(0);
        assert_eq!(screen.visible_row_text(0), "abc");

        screen.erase_in_line(1);
        assert_eq!(screen.visible_row_text(0), "");
    }

    #[test]
    fn deccolm_resizes_and_clears() {
        let (mut screen, _) = test_screen(24, 80);
        screen.draw("data");
        screen.set_mode(&[3], true);
        assert_eq!(screen.columns, 132);
        assert!(screen.data_buffer.values().all(|r| r.is_empty()) || screen.data_buffer.is_empty());
        screen.reset_mode(&[3], true);
        assert_eq!(screen.columns, 80);
    }

    #[test]
    fn charset_shift_draws_graphics() {
        let (mut screen, _) = test_screen(5, 20);
        screen.shift_out();
        screen.draw("q");
        assert_eq!(screen.visible_row_text(0), "─");
        screen.shift_in();
        screen.draw("q");
        assert_eq!(screen.visible_row_text(0), "─q");
    }

    #[test]
    fn osc_sets_title_and_icon() {
        let (mut screen, _) = test_screen(5, 20);
        screen.square_close("0;my title");
        assert_eq!(screen.title, "my title");
        screen.square_close("1;icon");
        assert_eq!(screen.icon_name, "icon");
        screen.square_close("2;other");
        assert_eq!(screen.title, "other");
    }

    #[test]
    fn history_pruning_respects_limit() {
        let (tx, _rx) = mpsc::channel::<String>();
        let limit = Arc::new(AtomicUsize::new(10));
        let mut screen = Screen::new(
            3,
            10,
            Box::new(move |s| {
                let _ = tx.send(s.to_string());
            }),
            Box::new(|| {}),
            limit,
        );
        for i in 0..300 {
            screen.draw(&format!("{}", i));
            screen.carriage_return();
            screen.linefeed();
        }
        let first = *screen.data_buffer.keys().next().unwrap();
        assert!(first >= screen.cursor.y.saturating_sub(10 + 100));
    }

    #[test]
    fn bracketed_paste_mode_flag() {
        let (mut screen, _) = test_screen(5, 20);
        assert!(!screen.bracketed_paste_enabled());
        screen.set_mode(&[2004], true);
        assert!(screen.bracketed_paste_enabled());
        screen.reset_mode(&[2004], true);
        assert!(!screen.bracketed_paste_enabled());
    }

    #[test]
    fn origin_mode_clamps_to_region() {
        let (mut screen, _) = test_screen(10, 20);
        screen.set_margins(3, 6);
        screen.set_mode(&[6], true); // DECOM homes to margin top
        assert_eq!(screen.cursor.y, 2);
        screen.cursor_position(2, 1);
        assert_eq!(screen.cursor.y, 3);
        // A target outside the region is refused.
        screen.cursor_position(9, 1);
        assert_eq!(screen.cursor.y, 3);
    }
}
