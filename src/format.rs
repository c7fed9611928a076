//! Status and message string expansion.
//!
//! `#S` session name, `#I` window index, `#W` window name, `#P` pane index,
//! `#T` pane title, `##` a literal `#`. After the `#` pass, `%` strftime
//! codes are expanded against the current local time, so the defaults like
//! `%H:%M %d-%b-%y` work in status strings and prompts.

use chrono::Local;

use crate::arrangement::ClientId;
use crate::server::Pymux;

pub fn format_pymux_string(pymux: &mut Pymux, client: ClientId, input: &str) -> String {
    let session_name = pymux.session_name.clone();

    let (window_index, window_name, pane_index, pane_title) =
        match pymux.arrangement.get_active_window(client) {
            Some(window) => {
                let index = window.index;
                let name = window.name();
                let pane_index = window
                    .active_pane_id()
                    .and_then(|id| window.get_pane_index(id))
                    .unwrap_or(0);
                let title = window
                    .active_pane()
                    .and_then(|p| p.process.terminal.lock().ok().map(|t| t.screen.title.clone()))
                    .unwrap_or_default();
                (index, name, pane_index, title)
            }
            None => (0, String::new(), 0, String::new()),
        };

    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '#' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('#') => out.push('#'),
            Some('S') => out.push_str(&session_name),
            Some('I') => out.push_str(&window_index.to_string()),
            Some('W') => out.push_str(&window_name),
            Some('P') => out.push_str(&pane_index.to_string()),
            Some('T') => out.push_str(&pane_title),
            Some(other) => {
                out.push('#');
                out.push(other);
            }
            None => out.push('#'),
        }
    }

    expand_strftime(&out)
}

/// Expand the strftime codes that appear in tmux status strings. Unknown
/// codes are left as-is rather than erroring.
fn expand_strftime(input: &str) -> String {
    if !input.contains('%') {
        return input.to_string();
    }
    let now = Local::now();

    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        match chars.peek().copied() {
            Some(code @ ('H' | 'M' | 'S' | 'd' | 'm' | 'y' | 'Y' | 'b' | 'a' | 'A' | 'p')) => {
                chars.next();
                let formatted = now.format(&format!("%{}", code)).to_string();
                out.push_str(&formatted);
            }
            Some('%') => {
                chars.next();
                out.push('%');
            }
            _ => out.push('%'),
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strftime_expansion() {
        let out = expand_strftime("%H:%M");
        assert_eq!(out.len(), 5);
        assert!(out.chars().nth(2) == Some(':'));
        assert!(out.chars().next().unwrap().is_ascii_digit());
    }

    #[test]
    fn unknown_percent_codes_kept() {
        assert_eq!(expand_strftime("100%x"), "100%x");
        assert_eq!(expand_strftime("50%%"), "50%");
    }

    #[test]
    fn plain_text_untouched() {
        assert_eq!(expand_strftime("no codes here"), "no codes here");
    }
}
