//! Renderer interface.
//!
//! Turning the screen model into terminal bytes is the job of an external
//! renderer; the core only defines the contract it consumes: the screen's
//! data buffer, cursor and line offset, the window's split tree with its
//! weights, the per-client state, and `Window::invalidation_hash` for layout
//! caching.
//!
//! `BasicRenderer` is the built-in fallback: a plain redraw of the active
//! window's panes with a one-line status area, enough to attach and work
//! when no richer renderer is installed.

use crate::arrangement::ClientId;
use crate::layout;
use crate::server::Pymux;

pub trait Renderer: Send {
    /// Produce the bytes that bring this client's terminal up to date.
    fn render(&mut self, pymux: &mut Pymux, client: ClientId) -> String;
}

pub struct BasicRenderer {
    /// Last rendered window hash; a change forces a full clear.
    last_hash: String,
}

impl BasicRenderer {
    pub fn new() -> BasicRenderer {
        BasicRenderer { last_hash: String::new() }
    }
}

impl Default for BasicRenderer {
    fn default() -> Self {
        BasicRenderer::new()
    }
}

impl Renderer for BasicRenderer {
    fn render(&mut self, pymux: &mut Pymux, client: ClientId) -> String {
        let (rows, columns) = pymux.get_client_state(client).size;
        let status_enabled = pymux.enable_status;
        let body_rows = if status_enabled { rows.saturating_sub(1) } else { rows };

        let mut out = String::new();

        let hash = pymux.arrangement.invalidation_hash(client);
        if hash != self.last_hash {
            out.push_str("\x1b[2J");
            self.last_hash = hash;
        }
        out.push_str("\x1b[H\x1b[?25l");

        let mut cursor: Option<(u16, u16)> = None;

        let status_line = status_line(pymux, client, columns);

        if let Some(window) = pymux.arrangement.get_active_window(client) {
            let active = window.active_pane_id();
            let rects = layout::compute_pane_rects(window, body_rows, columns);
            for (pane_id, rect) in rects {
                let Some(pane) = window.pane(pane_id) else { continue };
                let Ok(terminal) = pane.process.terminal.lock() else { continue };
                let screen = &terminal.screen;
                for row in 0..rect.height.min(screen.lines as u16) {
                    let mut text = screen.visible_row_text(row as usize);
                    text.truncate(rect.width as usize);
                    out.push_str(&format!(
                        "\x1b[{};{}H\x1b[K{}",
                        rect.y + row + 1,
                        rect.x + 1,
                        text
                    ));
                }
                if active == Some(pane_id) && screen.show_cursor {
                    let x = rect.x as usize + screen.cursor.x;
                    let y = rect.y as usize + screen.cursor.y.saturating_sub(screen.line_offset);
                    cursor = Some((y as u16 + 1, x as u16 + 1));
                }
            }
        }

        if status_enabled {
            out.push_str(&format!("\x1b[{};1H\x1b[K\x1b[7m{}\x1b[0m", rows, status_line));
        }

        if let Some((y, x)) = cursor {
            out.push_str(&format!("\x1b[{};{}H\x1b[?25h", y, x));
        }

        out
    }
}

fn status_line(pymux: &mut Pymux, client: ClientId, columns: u16) -> String {
    let state = pymux.get_client_state(client);

    // Messages, prompts and confirmations take over the status line.
    if let Some(message) = state.message.clone() {
        return clip(&message, columns);
    }
    if let Some(confirm) = state.confirm_text.clone() {
        return clip(&format!("{} (y/n)", confirm), columns);
    }
    if state.prompt_command.is_some() {
        let prompt = state.prompt_text.clone().unwrap_or_default();
        let buffer = state.prompt_buffer.clone();
        return clip(&format!("{} {}", prompt, buffer), columns);
    }
    if state.command_mode {
        let buffer = state.command_buffer.clone();
        return clip(&format!(":{}", buffer), columns);
    }

    let session = pymux.session_name.clone();
    let windows: Vec<String> = {
        let mut parts = Vec::new();
        let active = pymux.arrangement.active_window_id(client);
        for window in &pymux.arrangement.windows {
            let marker = if Some(window.window_id) == active { "*" } else { "" };
            parts.push(format!("{}:{}{}", window.index, window.name(), marker));
        }
        parts
    };
    clip(&format!("[{}] {}", session, windows.join(" ")), columns)
}

fn clip(text: &str, columns: u16) -> String {
    text.chars().take(columns as usize).collect()
}
