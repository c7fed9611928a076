//! Key bindings and input routing.
//!
//! A key press from a client walks the routing cascade: confirmation prompt,
//! popup, pane-number overlay, clock, copy mode, command/prompt buffers,
//! then the prefix state machine and the custom binding table, and finally
//! falls through to the focused pane's PTY.

use std::collections::HashMap;

use crossterm::event::{KeyCode, KeyModifiers};

use crate::arrangement::ClientId;
use crate::commands;
use crate::keys::{self, KeyPress};
use crate::server::Pymux;

#[derive(Clone, Debug)]
pub struct CustomBinding {
    pub key: KeyPress,
    pub command: String,
    pub arguments: Vec<String>,
}

pub struct KeyBindings {
    prefix: KeyPress,
    /// (needs_prefix, normalized key name) -> binding.
    pub custom_bindings: HashMap<(bool, String), CustomBinding>,
}

impl Default for KeyBindings {
    fn default() -> Self {
        KeyBindings::new()
    }
}

impl KeyBindings {
    pub fn new() -> KeyBindings {
        KeyBindings {
            prefix: (KeyCode::Char('b'), KeyModifiers::CONTROL),
            custom_bindings: HashMap::new(),
        }
    }

    pub fn prefix(&self) -> KeyPress {
        self.prefix
    }

    /// Replace the prefix key atomically.
    pub fn set_prefix(&mut self, key: KeyPress) {
        self.prefix = key;
    }

    /// Register a binding for `bind-key`. The previous binding for the same
    /// key is removed first. Fails with a user-visible message on an
    /// invalid key name.
    pub fn add_custom_binding(
        &mut self,
        key_name: &str,
        command: String,
        arguments: Vec<String>,
        needs_prefix: bool,
    ) -> Result<(), String> {
        let key = keys::parse_key(key_name)?;
        let normalized = keys::key_name(key);
        self.custom_bindings.remove(&(needs_prefix, normalized.clone()));
        self.custom_bindings
            .insert((needs_prefix, normalized), CustomBinding { key, command, arguments });
        Ok(())
    }

    pub fn remove_custom_binding(&mut self, key_name: &str, needs_prefix: bool) {
        if let Ok(key) = keys::parse_key(key_name) {
            self.custom_bindings.remove(&(needs_prefix, keys::key_name(key)));
        }
    }

    pub fn lookup(&self, needs_prefix: bool, key: KeyPress) -> Option<&CustomBinding> {
        self.custom_bindings.get(&(needs_prefix, keys::key_name(key)))
    }

    /// Sorted `bind-key` lines for `list-keys`.
    pub fn describe(&self) -> Vec<String> {
        let mut lines: Vec<String> = self
            .custom_bindings
            .iter()
            .map(|((needs_prefix, key_name), binding)| {
                format!(
                    "bind-key {:>3} {:<10} {} {}",
                    if *needs_prefix { "" } else { "-n" },
                    key_name,
                    binding.command,
                    binding.arguments.join(" ")
                )
                .trim_end()
                .to_string()
            })
            .collect();
        lines.sort();
        lines
    }
}

fn is_key(key: KeyPress, ch: char) -> bool {
    key == (KeyCode::Char(ch), KeyModifiers::NONE)
}

fn is_ctrl(key: KeyPress, ch: char) -> bool {
    key == (KeyCode::Char(ch), KeyModifiers::CONTROL)
}

/// Route one key press from a client.
pub fn handle_key(pymux: &mut Pymux, client: ClientId, key: KeyPress) {
    // A key press hides any transient message.
    pymux.get_client_state(client).message = None;

    // Confirmation pending: only y/Y and n/N/C-c are accepted.
    if pymux.get_client_state(client).confirm_command.is_some() {
        if is_key(key, 'y') || is_key(key, 'Y') {
            let state = pymux.get_client_state(client);
            let command = state.confirm_command.take();
            state.confirm_text = None;
            if let Some(command) = command {
                commands::handle_command(pymux, client, &command);
            }
        } else if is_key(key, 'n') || is_key(key, 'N') || is_ctrl(key, 'c') {
            let state = pymux.get_client_state(client);
            state.confirm_command = None;
            state.confirm_text = None;
        }
        pymux.invalidate();
        return;
    }

    // Popup visible: q closes it.
    if pymux.get_client_state(client).display_popup.is_some() {
        if is_key(key, 'q') {
            pymux.get_client_state(client).display_popup = None;
            pymux.invalidate();
        }
        return;
    }

    // Pane numbers overlay: any key hides it.
    if pymux.get_client_state(client).display_pane_numbers {
        pymux.get_client_state(client).display_pane_numbers = false;
        pymux.invalidate();
        return;
    }

    // Clock mode: any key leaves it.
    let clock_active = pymux
        .arrangement
        .get_active_window(client)
        .and_then(|w| w.active_pane())
        .map(|p| p.clock_mode)
        .unwrap_or(false);
    if clock_active {
        if let Some(pane) = pymux
            .arrangement
            .get_active_window(client)
            .and_then(|w| w.active_pane_mut())
        {
            pane.clock_mode = false;
        }
        pymux.invalidate();
        return;
    }

    // Copy/scroll mode.
    let in_copy_mode = pymux
        .arrangement
        .get_active_window(client)
        .and_then(|w| w.active_pane())
        .map(|p| p.display_scroll_buffer())
        .unwrap_or(false);
    if in_copy_mode {
        handle_copy_mode_key(pymux, client, key);
        pymux.invalidate();
        return;
    }

    // Command or prompt buffer focused.
    let state = pymux.get_client_state(client);
    if state.command_mode || state.prompt_command.is_some() {
        handle_edit_key(pymux, client, key);
        pymux.invalidate();
        return;
    }

    // Prefix was pressed: one shot at the prefix binding table.
    if pymux.get_client_state(client).has_prefix {
        pymux.get_client_state(client).has_prefix = false;
        if let Some(binding) = pymux.key_bindings.lookup(true, key).cloned() {
            commands::call_command_handler(pymux, client, &binding.command, binding.arguments);
        }
        pymux.invalidate();
        return;
    }

    // The prefix key arms the prefix state.
    if key == pymux.key_bindings.prefix() {
        pymux.get_client_state(client).has_prefix = true;
        return;
    }

    // Custom bindings that work without the prefix.
    if let Some(binding) = pymux.key_bindings.lookup(false, key).cloned() {
        commands::call_command_handler(pymux, client, &binding.command, binding.arguments);
        pymux.invalidate();
        return;
    }

    // Everything else goes to the focused pane; with synchronize-panes set,
    // to every pane in the window.
    if let Some(window) = pymux.arrangement.get_active_window(client) {
        if window.synchronize_panes {
            for pane_id in window.pane_ids() {
                if let Some(pane) = window.pane(pane_id) {
                    pane.process.write_key(key);
                }
            }
        } else if let Some(pane) = window.active_pane() {
            pane.process.write_key(key);
        }
    }
}

fn handle_edit_key(pymux: &mut Pymux, client: ClientId, key: KeyPress) {
    let state = pymux.get_client_state(client);
    let prompt = state.prompt_command.is_some();

    if is_ctrl(key, 'c') || is_ctrl(key, 'g') {
        pymux.leave_command_mode(client, false);
        return;
    }

    match key {
        (KeyCode::Enter, _) => {
            let command = if prompt {
                let state = pymux.get_client_state(client);
                let template = state.prompt_command.clone().unwrap_or_default();
                let text = state.prompt_buffer.clone();
                template.replace("%%", &text)
            } else {
                pymux.get_client_state(client).command_buffer.clone()
            };
            pymux.leave_command_mode(client, true);
            if !command.trim().is_empty() {
                commands::handle_command(pymux, client, &command);
            }
        }
        (KeyCode::Backspace, _) => {
            let state = pymux.get_client_state(client);
            let buffer = if prompt { &mut state.prompt_buffer } else { &mut state.command_buffer };
            buffer.pop();
        }
        (KeyCode::Char('u'), KeyModifiers::CONTROL) => {
            let state = pymux.get_client_state(client);
            let buffer = if prompt { &mut state.prompt_buffer } else { &mut state.command_buffer };
            buffer.clear();
        }
        (KeyCode::Char(c), modifiers)
            if modifiers == KeyModifiers::NONE || modifiers == KeyModifiers::SHIFT =>
        {
            let state = pymux.get_client_state(client);
            let buffer = if prompt { &mut state.prompt_buffer } else { &mut state.command_buffer };
            buffer.push(c);
        }
        _ => {}
    }
}

fn handle_copy_mode_key(pymux: &mut Pymux, client: ClientId, key: KeyPress) {
    let page = pymux
        .arrangement
        .get_active_window(client)
        .and_then(|w| w.active_pane())
        .map(|p| p.process.size().1 as usize)
        .unwrap_or(24);

    let Some(pane) = pymux
        .arrangement
        .get_active_window(client)
        .and_then(|w| w.active_pane_mut())
    else {
        return;
    };
    let Some(buffer) = pane.scroll_buffer.as_mut() else { return };

    // Typing a search query.
    if let Some(input) = buffer.search_input.as_mut() {
        match key {
            (KeyCode::Enter, _) => {
                let query = buffer.search_input.take().unwrap_or_default();
                buffer.search.text = query;
                let forward = buffer.search.forward;
                buffer.search_next(forward);
            }
            (KeyCode::Esc, _) => buffer.search_input = None,
            (KeyCode::Char('c'), KeyModifiers::CONTROL) => buffer.search_input = None,
            (KeyCode::Backspace, _) => {
                input.pop();
            }
            (KeyCode::Char(c), m) if m == KeyModifiers::NONE || m == KeyModifiers::SHIFT => {
                input.push(c);
            }
            _ => {}
        }
        return;
    }

    match key {
        (KeyCode::Up, _) | (KeyCode::Char('k'), KeyModifiers::NONE) => buffer.move_up(1),
        (KeyCode::Down, _) | (KeyCode::Char('j'), KeyModifiers::NONE) => buffer.move_down(1),
        (KeyCode::Left, _) | (KeyCode::Char('h'), KeyModifiers::NONE) => buffer.move_left(1),
        (KeyCode::Right, _) | (KeyCode::Char('l'), KeyModifiers::NONE) => buffer.move_right(1),
        (KeyCode::PageUp, _) | (KeyCode::Char('b'), KeyModifiers::CONTROL) => {
            buffer.move_up(page)
        }
        (KeyCode::PageDown, _) | (KeyCode::Char('f'), KeyModifiers::CONTROL) => {
            buffer.move_down(page)
        }
        (KeyCode::Char('g'), KeyModifiers::NONE) => buffer.move_to_top(),
        (KeyCode::Char('G'), _) => buffer.move_to_bottom(),
        (KeyCode::Char('0'), KeyModifiers::NONE) => buffer.move_to_start_of_line(),
        (KeyCode::Char('$'), _) => buffer.move_to_end_of_line(),
        (KeyCode::Char('/'), _) => {
            buffer.search.forward = true;
            buffer.search_input = Some(String::new());
        }
        (KeyCode::Char('?'), _) => {
            buffer.search.forward = false;
            buffer.search_input = Some(String::new());
        }
        (KeyCode::Char('n'), KeyModifiers::NONE) => {
            let forward = buffer.search.forward;
            buffer.search_next(forward);
        }
        (KeyCode::Char('N'), _) => {
            let forward = buffer.search.forward;
            buffer.search_next(!forward);
        }
        (KeyCode::Char(' '), KeyModifiers::NONE) => buffer.anchor = Some(buffer.cursor),
        (KeyCode::Enter, _) => {
            // With a selection: yank and leave. Without: just leave.
            let selection = buffer.selection_text();
            pane.exit_scroll_buffer();
            if let Some(text) = selection {
                pymux.clipboard = text;
            }
        }
        (KeyCode::Char('q'), KeyModifiers::NONE) => pane.exit_scroll_buffer(),
        (KeyCode::Char('c'), KeyModifiers::CONTROL) => pane.exit_scroll_buffer(),
        (KeyCode::Esc, _) => pane.exit_scroll_buffer(),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn custom_bindings_register_and_lookup() {
        let mut bindings = KeyBindings::new();
        bindings
            .add_custom_binding("C-a", "new-window".into(), vec![], true)
            .unwrap();

        let key = keys::parse_key("C-a").unwrap();
        let binding = bindings.lookup(true, key).unwrap();
        assert_eq!(binding.command, "new-window");
        assert!(bindings.lookup(false, key).is_none());

        // Re-binding the same key replaces the entry.
        bindings
            .add_custom_binding("C-a", "kill-pane".into(), vec![], true)
            .unwrap();
        assert_eq!(bindings.lookup(true, key).unwrap().command, "kill-pane");

        bindings.remove_custom_binding("C-a", true);
        assert!(bindings.lookup(true, key).is_none());
    }

    #[test]
    fn invalid_key_is_an_error() {
        let mut bindings = KeyBindings::new();
        assert!(bindings
            .add_custom_binding("NotAKey", "new-window".into(), vec![], true)
            .is_err());
    }

    #[test]
    fn prefix_replacement() {
        let mut bindings = KeyBindings::new();
        assert_eq!(bindings.prefix(), (KeyCode::Char('b'), KeyModifiers::CONTROL));
        bindings.set_prefix(keys::parse_key("C-a").unwrap());
        assert_eq!(bindings.prefix(), (KeyCode::Char('a'), KeyModifiers::CONTROL));
    }

    #[test]
    fn describe_is_sorted_bind_key_lines() {
        let mut bindings = KeyBindings::new();
        bindings
            .add_custom_binding("z", "resize-pane".into(), vec!["-Z".into()], true)
            .unwrap();
        bindings
            .add_custom_binding("C-a", "new-window".into(), vec![], false)
            .unwrap();
        let lines = bindings.describe();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("bind-key"));
        assert!(lines.iter().any(|l| l.contains("-n") && l.contains("C-a")));
        assert!(lines.iter().any(|l| l.contains("resize-pane -Z")));
    }
}
