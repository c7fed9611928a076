//! Streaming VT100/ANSI parser.
//!
//! Converts a decoded character stream into `Screen` operations. The parser
//! is a plain state machine that keeps only the minimum state needed across
//! `feed` calls (current state, parameter accumulator, OSC buffer), so a
//! control sequence may be split across chunks at any byte boundary without
//! changing the result.
//!
//! In the ground state, runs of printable characters are located with a
//! single scan and handed to `Screen::draw` in one call. The per-character
//! dispatch loop only runs for control bytes and escape sequences; this fast
//! path is what keeps full-screen redraws from dominating the frame budget.

use crate::screen::Screen;

const ESC: char = '\x1b';
const CSI: char = '\u{9b}';
const NUL: char = '\0';
const DEL: char = '\x7f';

const BEL: char = '\x07';
const BS: char = '\x08';
const HT: char = '\x09';
const LF: char = '\x0a';
const VT: char = '\x0b';
const FF: char = '\x0c';
const CR: char = '\x0d';
const SO: char = '\x0e';
const SI: char = '\x0f';

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum State {
    Ground,
    Escape,
    CsiEntry,
    Osc,
    CharsetG0,
    CharsetG1,
    Sharp,
    Percent,
}

pub struct Stream {
    state: State,
    params: Vec<u32>,
    current: String,
    private: bool,
    osc: String,
}

impl Default for Stream {
    fn default() -> Self {
        Stream::new()
    }
}

impl Stream {
    pub fn new() -> Self {
        Stream {
            state: State::Ground,
            params: Vec::new(),
            current: String::new(),
            private: false,
            osc: String::new(),
        }
    }

    /// Feed a chunk of decoded output into the screen. Never blocks; any
    /// partial escape sequence is carried over to the next call.
    pub fn feed(&mut self, input: &str, screen: &mut Screen) {
        let mut chars = input.char_indices();

        while let Some((pos, ch)) = chars.next() {
            if self.state == State::Ground {
                if is_special(ch) {
                    self.handle_ground_special(ch, screen);
                } else {
                    // Longest run of drawable characters in one draw call.
                    let rest = &input[pos..];
                    let end = rest.find(is_special).unwrap_or(rest.len());
                    screen.draw(&rest[..end]);
                    // Skip what was just drawn.
                    let mut consumed = ch.len_utf8();
                    while consumed < end {
                        match chars.next() {
                            Some((_, c)) => consumed += c.len_utf8(),
                            None => break,
                        }
                    }
                }
                continue;
            }

            match self.state {
                State::Ground => unreachable!(),
                State::Escape => self.handle_escape(ch, screen),
                State::CsiEntry => self.handle_csi(ch, screen),
                State::Osc => {
                    if ch == BEL {
                        let data = std::mem::take(&mut self.osc);
                        screen.square_close(&data);
                        self.state = State::Ground;
                    } else {
                        self.osc.push(ch);
                    }
                }
                State::CharsetG0 => {
                    screen.set_charset(ch, '(');
                    self.state = State::Ground;
                }
                State::CharsetG1 => {
                    screen.set_charset(ch, ')');
                    self.state = State::Ground;
                }
                State::Sharp => {
                    if ch == '8' {
                        screen.alignment_display();
                    }
                    self.state = State::Ground;
                }
                State::Percent => {
                    // Character set selection for UTF-8/default; a no-op.
                    self.state = State::Ground;
                }
            }
        }
    }

    fn handle_ground_special(&mut self, ch: char, screen: &mut Screen) {
        match ch {
            ESC => self.state = State::Escape,
            CSI => self.enter_csi(),
            NUL | DEL => {}
            _ => dispatch_basic(ch, screen),
        }
    }

    fn enter_csi(&mut self) {
        self.state = State::CsiEntry;
        self.params.clear();
        self.current.clear();
        self.private = false;
    }

    fn handle_escape(&mut self, ch: char, screen: &mut Screen) {
        match ch {
            '[' => self.enter_csi(),
            ']' => {
                self.state = State::Osc;
                self.osc.clear();
            }
            '#' => self.state = State::Sharp,
            '%' => self.state = State::Percent,
            '(' => self.state = State::CharsetG0,
            ')' => self.state = State::CharsetG1,
            _ => {
                match ch {
                    'D' => screen.index(),
                    'M' => screen.reverse_index(),
                    'E' => screen.next_line(),
                    '7' => screen.save_cursor(),
                    '8' => screen.restore_cursor(),
                    'c' => screen.reset(),
                    'H' => screen.set_tab_stop(),
                    _ => {}
                }
                self.state = State::Ground;
            }
        }
    }

    fn handle_csi(&mut self, ch: char, screen: &mut Screen) {
        match ch {
            '?' => self.private = true,
            BEL | BS | HT | LF | VT | FF | CR => dispatch_basic(ch, screen),
            ' ' | '>' => {} // '>' appears in 'ESC[>c' (device attributes)
            '0'..='9' => self.current.push(ch),
            ';' => {
                self.push_param();
            }
            '\u{20}'..='\u{2f}' => {} // other intermediates
            '\u{40}'..='\u{7e}' => {
                self.push_param();
                let params = std::mem::take(&mut self.params);
                let private = self.private;
                self.state = State::Ground;
                dispatch_csi(ch, &params, private, screen);
            }
            NUL | DEL => {}
            _ => {
                // Unrecognized byte: drop the sequence.
                self.state = State::Ground;
            }
        }
    }

    fn push_param(&mut self) {
        let value = self.current.parse::<u32>().unwrap_or(0).min(9999);
        self.params.push(value);
        self.current.clear();
    }
}

fn is_special(ch: char) -> bool {
    matches!(ch, ESC | CSI | NUL | DEL | BEL | BS | HT | LF | VT | FF | CR | SO | SI)
}

fn dispatch_basic(ch: char, screen: &mut Screen) {
    match ch {
        BS => screen.backspace(),
        HT => screen.tab(),
        LF | VT | FF => screen.linefeed(),
        CR => screen.carriage_return(),
        SO => screen.shift_out(),
        SI => screen.shift_in(),
        BEL => screen.bell(),
        _ => {}
    }
}

fn dispatch_csi(final_byte: char, params: &[u32], private: bool, screen: &mut Screen) {
    let arg = |i: usize| params.get(i).copied().unwrap_or(0);

    match final_byte {
        'A' => screen.cursor_up(arg(0)),
        'B' => screen.cursor_down(arg(0)),
        'C' => screen.cursor_forward(arg(0)),
        'D' => screen.cursor_back(arg(0)),
        'E' => screen.cursor_down1(arg(0)),
        'F' => screen.cursor_up1(arg(0)),
        'G' | '`' => screen.cursor_to_column(arg(0)),
        'H' | 'f' => screen.cursor_position(arg(0), arg(1)),
        'J' => screen.erase_in_display(arg(0)),
        'K' => screen.erase_in_line(arg(0)),
        'L' => screen.insert_lines(arg(0)),
        'M' => screen.delete_lines(arg(0)),
        'P' => screen.delete_characters(arg(0)),
        'X' => screen.erase_characters(arg(0)),
        '@' => screen.insert_characters(arg(0)),
        'd' => screen.cursor_to_line(arg(0)),
        'g' => screen.clear_tab_stop(arg(0)),
        'h' => screen.set_mode(params, private),
        'l' => screen.reset_mode(params, private),
        'm' => screen.select_graphic_rendition(params),
        'r' => screen.set_margins(arg(0), arg(1)),
        's' => screen.save_cursor(),
        'u' => screen.restore_cursor(),
        'n' => screen.report_device_status(arg(0)),
        'c' => screen.report_device_attributes(),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::screen::tests::test_screen;
    use crate::screen::{Color, CursorPosition};

    fn feed_all(input: &str) -> crate::screen::Screen {
        let (mut screen, _rx) = test_screen(24, 80);
        let mut stream = Stream::new();
        stream.feed(input, &mut screen);
        screen
    }

    #[test]
    fn plain_text_draws() {
        let screen = feed_all("hello world");
        assert_eq!(screen.visible_row_text(0), "hello world");
    }

    #[test]
    fn newlines_and_carriage_returns() {
        let screen = feed_all("one\r\ntwo\r\nthree");
        assert_eq!(screen.visible_row_text(0), "one");
        assert_eq!(screen.visible_row_text(1), "two");
        assert_eq!(screen.visible_row_text(2), "three");
    }

    #[test]
    fn cursor_movement_sequences() {
        let screen = feed_all("\x1b[5;10Habc");
        assert_eq!(screen.cursor, CursorPosition { x: 12, y: 4 });
    }

    #[test]
    fn sgr_sequence_applies_attrs() {
        let screen = feed_all("\x1b[1;38;5;196mred");
        let cell = screen.data_buffer.get(&0).unwrap().get(&0).unwrap();
        assert!(cell.attrs.bold);
        assert_eq!(cell.attrs.fg, Color::Idx(196));
    }

    #[test]
    fn truecolor_sgr() {
        let screen = feed_all("\x1b[48;2;1;2;3mx");
        let cell = screen.data_buffer.get(&0).unwrap().get(&0).unwrap();
        assert_eq!(cell.attrs.bg, Color::Rgb(1, 2, 3));
    }

    #[test]
    fn chunked_feed_equals_single_feed() {
        let input = "abc\x1b[1;31mred\x1b[0m\r\n\x1b]0;title\x07\x1b[2Jmore \x1b[5Ctext\x1b(0qq\x1b(B.";
        let (mut all_at_once, _rx1) = test_screen(24, 80);
        let mut stream = Stream::new();
        stream.feed(input, &mut all_at_once);

        // Split at every position; screens must end up identical.
        for split in 1..input.len() {
            if !input.is_char_boundary(split) {
                continue;
            }
            let (mut chunked, _rx2) = test_screen(24, 80);
            let mut stream = Stream::new();
            stream.feed(&input[..split], &mut chunked);
            stream.feed(&input[split..], &mut chunked);

            assert_eq!(chunked.cursor, all_at_once.cursor, "split at {}", split);
            assert_eq!(chunked.title, all_at_once.title, "split at {}", split);
            assert_eq!(
                chunked.data_buffer, all_at_once.data_buffer,
                "split at {}",
                split
            );
        }
    }

    #[test]
    fn osc_title() {
        let screen = feed_all("\x1b]2;window title\x07after");
        assert_eq!(screen.title, "window title");
        assert_eq!(screen.visible_row_text(0), "after");
    }

    #[test]
    fn cpr_request_round_trip() {
        let (mut screen, rx) = test_screen(24, 80);
        let mut stream = Stream::new();
        stream.feed("ab\x1b[6n", &mut screen);
        assert_eq!(rx.try_recv().unwrap(), "\x1b[1;3R");
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn device_attributes_request() {
        let (mut screen, rx) = test_screen(24, 80);
        let mut stream = Stream::new();
        stream.feed("\x1b[>c", &mut screen);
        assert_eq!(rx.try_recv().unwrap(), "\x1b[>84;0;0c");
    }

    #[test]
    fn private_modes() {
        let screen = feed_all("\x1b[?2004h\x1b[?1h");
        assert!(screen.bracketed_paste_enabled());
        assert!(screen.in_application_mode());
    }

    #[test]
    fn alternate_screen_via_stream() {
        let screen = feed_all("before\x1b[?1049halt");
        assert!(screen.in_alternate_screen());
        assert_eq!(screen.visible_row_text(0), "alt");
    }

    #[test]
    fn param_capped_at_9999() {
        let screen = feed_all("\x1b[99999999Cx");
        // Forward clamped by screen bounds, no panic and no overflow.
        assert_eq!(screen.cursor.x, 80);
    }

    #[test]
    fn unknown_final_byte_dropped() {
        // '}' is a valid final byte with no handler; the sequence vanishes.
        let screen = feed_all("a\x1b[1;2}b");
        assert_eq!(screen.visible_row_text(0), "ab");
    }

    #[test]
    fn control_chars_inside_csi() {
        // A BEL inside a CSI sequence is dispatched without aborting the
        // sequence.
        let screen = feed_all("\x1b[2\x07;3Hx");
        assert_eq!(screen.cursor, CursorPosition { x: 3, y: 1 });
    }

    #[test]
    fn charset_selection_sequences() {
        let screen = feed_all("\x1b(0q\x1b(Bq");
        assert_eq!(screen.visible_row_text(0), "─q");
    }

    #[test]
    fn nul_and_del_ignored() {
        let screen = feed_all("a\0\x7fb");
        assert_eq!(screen.visible_row_text(0), "ab");
    }

    #[test]
    fn scroll_region_sequence() {
        let screen = feed_all("\x1b[2;10r");
        assert_eq!(
            screen.margins,
            Some(crate::screen::Margins { top: 1, bottom: 9 })
        );
    }

    #[test]
    fn nel_goes_to_left_margin() {
        let screen = feed_all("abc\x1bEdef");
        assert_eq!(screen.visible_row_text(0), "abc");
        assert_eq!(screen.visible_row_text(1), "def");
    }
}
