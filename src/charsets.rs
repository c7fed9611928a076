//! G0/G1 character set translation tables.
//!
//! Only the Latin-1 (identity) and DEC special graphics sets are mapped;
//! everything else a program may select degrades to Latin-1, which matches
//! what xterm does for unsupported designators.

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Charset {
    Latin1,
    Vt100Graphics,
}

/// Map an `ESC (` / `ESC )` designator to a charset. Unknown codes are
/// ignored by the caller.
pub fn charset_for_code(code: char) -> Option<Charset> {
    match code {
        'B' | 'U' | 'K' => Some(Charset::Latin1),
        '0' => Some(Charset::Vt100Graphics),
        _ => None,
    }
}

/// Translate a single character through the given charset.
pub fn translate(charset: Charset, ch: char) -> char {
    match charset {
        Charset::Latin1 => ch,
        Charset::Vt100Graphics => vt100_graphics(ch),
    }
}

// DEC special graphics: the 0x5f-0x7e range maps to line drawing glyphs.
fn vt100_graphics(ch: char) -> char {
    match ch {
        '_' => ' ',
        '`' => '\u{25c6}', // ◆
        'a' => '\u{2592}', // ▒
        'b' => '\u{2409}', // ␉
        'c' => '\u{240c}', // ␌
        'd' => '\u{240d}', // ␍
        'e' => '\u{240a}', // ␊
        'f' => '\u{00b0}', // °
        'g' => '\u{00b1}', // ±
        'h' => '\u{2424}', // ␤
        'i' => '\u{240b}', // ␋
        'j' => '\u{2518}', // ┘
        'k' => '\u{2510}', // ┐
        'l' => '\u{250c}', // ┌
        'm' => '\u{2514}', // └
        'n' => '\u{253c}', // ┼
        'o' => '\u{23ba}', // ⎺
        'p' => '\u{23bb}', // ⎻
        'q' => '\u{2500}', // ─
        'r' => '\u{23bc}', // ⎼
        's' => '\u{23bd}', // ⎽
        't' => '\u{251c}', // ├
        'u' => '\u{2524}', // ┤
        'v' => '\u{2534}', // ┴
        'w' => '\u{252c}', // ┬
        'x' => '\u{2502}', // │
        'y' => '\u{2264}', // ≤
        'z' => '\u{2265}', // ≥
        '{' => '\u{03c0}', // π
        '|' => '\u{2260}', // ≠
        '}' => '\u{00a3}', // £
        '~' => '\u{00b7}', // ·
        _ => ch,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn latin1_is_identity() {
        assert_eq!(translate(Charset::Latin1, 'q'), 'q');
        assert_eq!(translate(Charset::Latin1, 'é'), 'é');
    }

    #[test]
    fn graphics_maps_line_drawing() {
        assert_eq!(translate(Charset::Vt100Graphics, 'q'), '─');
        assert_eq!(translate(Charset::Vt100Graphics, 'x'), '│');
        assert_eq!(translate(Charset::Vt100Graphics, 'l'), '┌');
        // Characters outside the graphics range pass through.
        assert_eq!(translate(Charset::Vt100Graphics, 'A'), 'A');
    }

    #[test]
    fn designators() {
        assert_eq!(charset_for_code('B'), Some(Charset::Latin1));
        assert_eq!(charset_for_code('0'), Some(Charset::Vt100Graphics));
        assert_eq!(charset_for_code('Z'), None);
    }
}
