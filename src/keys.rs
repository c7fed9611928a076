//! Key name vocabulary and VT100 key translation.
//!
//! Three mappings live here, all kept compatible with tmux naming:
//!   - `parse_key`: "C-a", "M-x", "S-Left", "F5", "BSpace", ... into a
//!     `(KeyCode, KeyModifiers)` pair,
//!   - `key_to_vt100`: a key press into the byte sequence a child process
//!     expects, honoring application cursor mode,
//!   - `InputParser`: raw client input bytes back into key presses.

use crossterm::event::{KeyCode, KeyModifiers};

pub type KeyPress = (KeyCode, KeyModifiers);

/// Parse a tmux-style key name. Returns an error string suitable for the
/// client message area when the name is not known.
pub fn parse_key(name: &str) -> Result<KeyPress, String> {
    let mut modifiers = KeyModifiers::NONE;
    let mut rest = name;

    loop {
        let lower = rest.to_ascii_lowercase();
        if lower.starts_with("c-") {
            modifiers |= KeyModifiers::CONTROL;
            rest = &rest[2..];
        } else if lower.starts_with("m-") {
            modifiers |= KeyModifiers::ALT;
            rest = &rest[2..];
        } else if lower.starts_with("s-") {
            modifiers |= KeyModifiers::SHIFT;
            rest = &rest[2..];
        } else {
            break;
        }
    }

    let code = match rest {
        "Space" | "space" => KeyCode::Char(' '),
        "Enter" | "enter" => KeyCode::Enter,
        "Tab" | "tab" => KeyCode::Tab,
        "BTab" | "btab" => KeyCode::BackTab,
        "BSpace" | "bspace" => KeyCode::Backspace,
        "Escape" | "escape" => KeyCode::Esc,
        "Up" | "up" => KeyCode::Up,
        "Down" | "down" => KeyCode::Down,
        "Left" | "left" => KeyCode::Left,
        "Right" | "right" => KeyCode::Right,
        "Home" | "home" => KeyCode::Home,
        "End" | "end" => KeyCode::End,
        "DC" | "dc" => KeyCode::Delete,
        "IC" | "ic" => KeyCode::Insert,
        "PPage" | "PageUp" | "PgUp" | "pageup" => KeyCode::PageUp,
        "NPage" | "PageDown" | "PgDn" | "pagedown" => KeyCode::PageDown,
        _ => {
            if let Some(n) = rest.strip_prefix('F').and_then(|n| n.parse::<u8>().ok()) {
                if (1..=20).contains(&n) {
                    KeyCode::F(n)
                } else {
                    return Err(format!("Unknown key: {}", name));
                }
            } else {
                let mut chars = rest.chars();
                match (chars.next(), chars.next()) {
                    (Some(c), None) => KeyCode::Char(c),
                    _ => return Err(format!("Unknown key: {}", name)),
                }
            }
        }
    };

    Ok((code, modifiers))
}

/// Render a key press back into its tmux name, for `list-keys` output.
pub fn key_name(key: KeyPress) -> String {
    let (code, modifiers) = key;
    let mut name = String::new();
    if modifiers.contains(KeyModifiers::CONTROL) {
        name.push_str("C-");
    }
    if modifiers.contains(KeyModifiers::ALT) {
        name.push_str("M-");
    }
    if modifiers.contains(KeyModifiers::SHIFT) && !matches!(code, KeyCode::Char(_)) {
        name.push_str("S-");
    }
    let base = match code {
        KeyCode::Char(' ') => "Space".to_string(),
        KeyCode::Char(c) => c.to_string(),
        KeyCode::Enter => "Enter".to_string(),
        KeyCode::Tab => "Tab".to_string(),
        KeyCode::BackTab => "BTab".to_string(),
        KeyCode::Backspace => "BSpace".to_string(),
        KeyCode::Esc => "Escape".to_string(),
        KeyCode::Up => "Up".to_string(),
        KeyCode::Down => "Down".to_string(),
        KeyCode::Left => "Left".to_string(),
        KeyCode::Right => "Right".to_string(),
        KeyCode::Home => "Home".to_string(),
        KeyCode::End => "End".to_string(),
        KeyCode::Delete => "DC".to_string(),
        KeyCode::Insert => "IC".to_string(),
        KeyCode::PageUp => "PPage".to_string(),
        KeyCode::PageDown => "NPage".to_string(),
        KeyCode::F(n) => format!("F{}", n),
        _ => "?".to_string(),
    };
    name.push_str(&base);
    name
}

/// Translate a key press into the VT100 sequence to write into a child PTY.
/// Arrow keys switch between CSI and SS3 forms with application cursor mode.
pub fn key_to_vt100(key: KeyPress, application_mode: bool) -> String {
    let (code, modifiers) = key;
    let ctrl = modifiers.contains(KeyModifiers::CONTROL);
    let alt = modifiers.contains(KeyModifiers::ALT);
    let shift = modifiers.contains(KeyModifiers::SHIFT);

    if alt {
        let inner = key_to_vt100((code, modifiers - KeyModifiers::ALT), application_mode);
        return format!("\x1b{}", inner);
    }

    match code {
        KeyCode::Char(c) if ctrl => {
            let c = c.to_ascii_lowercase();
            if c.is_ascii_lowercase() {
                ((c as u8 - b'a' + 1) as char).to_string()
            } else if c == ' ' || c == '@' {
                "\0".to_string()
            } else {
                c.to_string()
            }
        }
        KeyCode::Char(c) => c.to_string(),
        KeyCode::Enter => "\r".to_string(),
        KeyCode::Tab => "\t".to_string(),
        KeyCode::BackTab => "\x1b[Z".to_string(),
        KeyCode::Backspace => "\x7f".to_string(),
        KeyCode::Esc => "\x1b".to_string(),
        KeyCode::Up | KeyCode::Down | KeyCode::Left | KeyCode::Right => {
            let letter = match code {
                KeyCode::Up => 'A',
                KeyCode::Down => 'B',
                KeyCode::Right => 'C',
                _ => 'D',
            };
            if ctrl {
                format!("\x1b[1;5{}", letter)
            } else if shift {
                format!("\x1b[1;2{}", letter)
            } else if application_mode {
                format!("\x1bO{}", letter)
            } else {
                format!("\x1b[{}", letter)
            }
        }
        KeyCode::Home => "\x1b[H".to_string(),
        KeyCode::End => "\x1b[F".to_string(),
        KeyCode::PageUp => "\x1b[5~".to_string(),
        KeyCode::PageDown => "\x1b[6~".to_string(),
        KeyCode::Insert => "\x1b[2~".to_string(),
        KeyCode::Delete => "\x1b[3~".to_string(),
        KeyCode::F(n) => match n {
            1 => "\x1bOP".to_string(),
            2 => "\x1bOQ".to_string(),
            3 => "\x1bOR".to_string(),
            4 => "\x1bOS".to_string(),
            5 => "\x1b[15~".to_string(),
            6 => "\x1b[17~".to_string(),
            7 => "\x1b[18~".to_string(),
            8 => "\x1b[19~".to_string(),
            9 => "\x1b[20~".to_string(),
            10 => "\x1b[21~".to_string(),
            11 => "\x1b[23~".to_string(),
            12 => "\x1b[24~".to_string(),
            13 => "\x1b[25~".to_string(),
            14 => "\x1b[26~".to_string(),
            15 => "\x1b[28~".to_string(),
            16 => "\x1b[29~".to_string(),
            17 => "\x1b[31~".to_string(),
            18 => "\x1b[32~".to_string(),
            19 => "\x1b[33~".to_string(),
            20 => "\x1b[34~".to_string(),
            _ => String::new(),
        },
        _ => String::new(),
    }
}

/// Incremental VT100 *input* parser: turns the byte stream a client forwards
/// from its stdin into key presses. State is one pending escape prefix, so
/// sequences split across packets reassemble correctly.
#[derive(Default)]
pub struct InputParser {
    pending: String,
}

impl InputParser {
    pub fn new() -> Self {
        InputParser::default()
    }

    pub fn feed(&mut self, data: &str, out: &mut Vec<KeyPress>) {
        self.pending.push_str(data);

        loop {
            let buf = std::mem::take(&mut self.pending);
            let (key, consumed) = match parse_one(&buf) {
                ParseResult::Key(key, n) => (Some(key), n),
                ParseResult::Incomplete => {
                    self.pending = buf;
                    return;
                }
                ParseResult::Skip(n) => (None, n),
                ParseResult::Empty => return,
            };
            self.pending = buf[consumed..].to_string();
            if let Some(key) = key {
                out.push(key);
            }
        }
    }

    /// A lone ESC with no continuation is a real Escape press.
    pub fn flush(&mut self, out: &mut Vec<KeyPress>) {
        if self.pending == "\x1b" {
            out.push((KeyCode::Esc, KeyModifiers::NONE));
            self.pending.clear();
        }
    }
}

enum ParseResult {
    Key(KeyPress, usize),
    Incomplete,
    Skip(usize),
    Empty,
}

fn parse_one(buf: &str) -> ParseResult {
    let mut chars = buf.chars();
    let Some(first) = chars.next() else { return ParseResult::Empty };

    if first != '\x1b' {
        return ParseResult::Key(plain_key(first), first.len_utf8());
    }

    let Some(second) = chars.next() else { return ParseResult::Incomplete };

    match second {
        '[' => parse_csi(buf),
        'O' => match chars.next() {
            None => ParseResult::Incomplete,
            Some(c) => {
                let key = match c {
                    'A' => Some(KeyCode::Up),
                    'B' => Some(KeyCode::Down),
                    'C' => Some(KeyCode::Right),
                    'D' => Some(KeyCode::Left),
                    'H' => Some(KeyCode::Home),
                    'F' => Some(KeyCode::End),
                    'P' => Some(KeyCode::F(1)),
                    'Q' => Some(KeyCode::F(2)),
                    'R' => Some(KeyCode::F(3)),
                    'S' => Some(KeyCode::F(4)),
                    _ => None,
                };
                match key {
                    Some(code) => ParseResult::Key((code, KeyModifiers::NONE), 3),
                    None => ParseResult::Skip(2 + c.len_utf8()),
                }
            }
        },
        '\x1b' => ParseResult::Key((KeyCode::Esc, KeyModifiers::NONE), 1),
        c => {
            // Meta-prefixed key.
            let (code, mut modifiers) = plain_key(c);
            modifiers |= KeyModifiers::ALT;
            ParseResult::Key((code, modifiers), 1 + c.len_utf8())
        }
    }
}

fn plain_key(c: char) -> KeyPress {
    match c {
        '\r' | '\n' => (KeyCode::Enter, KeyModifiers::NONE),
        '\t' => (KeyCode::Tab, KeyModifiers::NONE),
        '\x7f' => (KeyCode::Backspace, KeyModifiers::NONE),
        '\0' => (KeyCode::Char(' '), KeyModifiers::CONTROL),
        c if (c as u32) < 0x1b => {
            let letter = (b'a' + (c as u8) - 1) as char;
            (KeyCode::Char(letter), KeyModifiers::CONTROL)
        }
        '\x1c'..='\x1f' => (KeyCode::Char(c), KeyModifiers::CONTROL),
        c => (KeyCode::Char(c), KeyModifiers::NONE),
    }
}

fn parse_csi(buf: &str) -> ParseResult {
    // buf starts with ESC [. Collect parameter bytes until a final byte.
    let body = &buf[2..];
    let mut params = String::new();
    let mut final_byte = None;
    let mut consumed = 2;

    for c in body.chars() {
        consumed += c.len_utf8();
        if c.is_ascii_digit() || c == ';' || c == '<' || c == '?' {
            params.push(c);
        } else {
            final_byte = Some(c);
            break;
        }
    }

    let Some(final_byte) = final_byte else { return ParseResult::Incomplete };

    let parts: Vec<u32> = params
        .trim_start_matches(['<', '?'])
        .split(';')
        .filter_map(|p| p.parse().ok())
        .collect();
    let modifiers = match parts.get(1).copied() {
        Some(2) => KeyModifiers::SHIFT,
        Some(3) => KeyModifiers::ALT,
        Some(5) => KeyModifiers::CONTROL,
        _ => KeyModifiers::NONE,
    };

    let code = match final_byte {
        'A' => Some(KeyCode::Up),
        'B' => Some(KeyCode::Down),
        'C' => Some(KeyCode::Right),
        'D' => Some(KeyCode::Left),
        'H' => Some(KeyCode::Home),
        'F' => Some(KeyCode::End),
        'Z' => Some(KeyCode::BackTab),
        '~' => match parts.first().copied() {
            Some(2) => Some(KeyCode::Insert),
            Some(3) => Some(KeyCode::Delete),
            Some(5) => Some(KeyCode::PageUp),
            Some(6) => Some(KeyCode::PageDown),
            Some(1) | Some(7) => Some(KeyCode::Home),
            Some(4) | Some(8) => Some(KeyCode::End),
            Some(15) => Some(KeyCode::F(5)),
            Some(17) => Some(KeyCode::F(6)),
            Some(18) => Some(KeyCode::F(7)),
            Some(19) => Some(KeyCode::F(8)),
            Some(20) => Some(KeyCode::F(9)),
            Some(21) => Some(KeyCode::F(10)),
            Some(23) => Some(KeyCode::F(11)),
            Some(24) => Some(KeyCode::F(12)),
            Some(25) => Some(KeyCode::F(13)),
            Some(26) => Some(KeyCode::F(14)),
            Some(28) => Some(KeyCode::F(15)),
            Some(29) => Some(KeyCode::F(16)),
            Some(31) => Some(KeyCode::F(17)),
            Some(32) => Some(KeyCode::F(18)),
            Some(33) => Some(KeyCode::F(19)),
            Some(34) => Some(KeyCode::F(20)),
            _ => None,
        },
        _ => None,
    };

    match code {
        Some(code) => ParseResult::Key((code, modifiers), consumed),
        // Mouse reports and other unhandled CSI input are swallowed.
        None => ParseResult::Skip(consumed),
    }
}
