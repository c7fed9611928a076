//! The command language.
//!
//! A global registry maps canonical command names to handlers. Input lines
//! are shell-tokenized, aliases resolved, and the remaining tokens parsed
//! against the command's usage grammar. Handler errors surface in the
//! calling client's message area; success invalidates every client.

use std::collections::{HashMap, HashSet};
use std::sync::OnceLock;

use regex::Regex;
use tracing::debug;

use crate::arrangement::{ClientId, LayoutType};
use crate::format::format_pymux_string;
use crate::keys;
use crate::layout;
use crate::options;
use crate::server::Pymux;

#[derive(Debug)]
pub struct CommandError {
    pub message: String,
}

impl CommandError {
    pub fn new(message: impl Into<String>) -> CommandError {
        CommandError { message: message.into() }
    }
}

type Handler = fn(&mut Pymux, ClientId, &ParsedArgs) -> Result<(), CommandError>;

pub struct CommandSpec {
    pub name: &'static str,
    pub usage: &'static str,
    /// Flags that consume the following token as their value.
    value_flags: &'static [&'static str],
    handler: Handler,
}

/// Aliases, kept compatible with tmux.
pub static ALIASES: &[(&str, &str)] = &[
    ("bind", "bind-key"),
    ("breakp", "break-pane"),
    ("clearhist", "clear-history"),
    ("confirm", "confirm-before"),
    ("detach", "detach-client"),
    ("display", "display-message"),
    ("displayp", "display-panes"),
    ("killp", "kill-pane"),
    ("killw", "kill-window"),
    ("last", "last-window"),
    ("lastp", "last-pane"),
    ("lextl", "next-layout"),
    ("lsk", "list-keys"),
    ("lsp", "list-panes"),
    ("movew", "move-window"),
    ("neww", "new-window"),
    ("next", "next-window"),
    ("pasteb", "paste-buffer"),
    ("prev", "previous-window"),
    ("prevl", "previous-layout"),
    ("rename", "rename-session"),
    ("renamew", "rename-window"),
    ("resizep", "resize-pane"),
    ("rotatew", "rotate-window"),
    ("selectl", "select-layout"),
    ("selectp", "select-pane"),
    ("selectw", "select-window"),
    ("send", "send-keys"),
    ("set", "set-option"),
    ("setw", "set-window-option"),
    ("source", "source-file"),
    ("splitw", "split-window"),
    ("suspendc", "suspend-client"),
    ("swapp", "swap-pane"),
    ("unbind", "unbind-key"),
];

pub fn resolve_alias(command: &str) -> &str {
    ALIASES
        .iter()
        .find(|(alias, _)| *alias == command)
        .map(|(_, canonical)| *canonical)
        .unwrap_or(command)
}

static COMMANDS: &[CommandSpec] = &[
    CommandSpec { name: "bind-key", usage: "[-n] <key> [--] <command> [<arguments>...]", value_flags: &[], handler: cmd_bind_key },
    CommandSpec { name: "break-pane", usage: "[-d]", value_flags: &[], handler: cmd_break_pane },
    CommandSpec { name: "clear-history", usage: "", value_flags: &[], handler: cmd_clear_history },
    CommandSpec { name: "clock-mode", usage: "", value_flags: &[], handler: cmd_clock_mode },
    CommandSpec { name: "command-prompt", usage: "[(-p <message>)] [(-I <default>)] [<command>]", value_flags: &["-p", "-I"], handler: cmd_command_prompt },
    CommandSpec { name: "confirm-before", usage: "[(-p <message>)] <command>", value_flags: &["-p"], handler: cmd_confirm_before },
    CommandSpec { name: "copy-mode", usage: "[-u]", value_flags: &[], handler: cmd_copy_mode },
    CommandSpec { name: "detach-client", usage: "", value_flags: &[], handler: cmd_detach_client },
    CommandSpec { name: "display-message", usage: "<message>", value_flags: &[], handler: cmd_display_message },
    CommandSpec { name: "display-panes", usage: "", value_flags: &[], handler: cmd_display_panes },
    CommandSpec { name: "kill-pane", usage: "", value_flags: &[], handler: cmd_kill_pane },
    CommandSpec { name: "kill-server", usage: "", value_flags: &[], handler: cmd_kill_server },
    CommandSpec { name: "kill-window", usage: "", value_flags: &[], handler: cmd_kill_window },
    CommandSpec { name: "last-pane", usage: "", value_flags: &[], handler: cmd_last_pane },
    CommandSpec { name: "last-window", usage: "", value_flags: &[], handler: cmd_last_window },
    CommandSpec { name: "list-keys", usage: "", value_flags: &[], handler: cmd_list_keys },
    CommandSpec { name: "list-panes", usage: "", value_flags: &[], handler: cmd_list_panes },
    CommandSpec { name: "move-window", usage: "(-t <dst-window>)", value_flags: &["-t"], handler: cmd_move_window },
    CommandSpec { name: "new-window", usage: "[(-n <name>)] [(-c <start-directory>)] [<executable>]", value_flags: &["-n", "-c"], handler: cmd_new_window },
    CommandSpec { name: "next-layout", usage: "", value_flags: &[], handler: cmd_next_layout },
    CommandSpec { name: "next-window", usage: "", value_flags: &[], handler: cmd_next_window },
    CommandSpec { name: "paste-buffer", usage: "", value_flags: &[], handler: cmd_paste_buffer },
    CommandSpec { name: "previous-layout", usage: "", value_flags: &[], handler: cmd_previous_layout },
    CommandSpec { name: "previous-window", usage: "", value_flags: &[], handler: cmd_previous_window },
    CommandSpec { name: "rename-pane", usage: "<name>", value_flags: &[], handler: cmd_rename_pane },
    CommandSpec { name: "rename-session", usage: "<name>", value_flags: &[], handler: cmd_rename_session },
    CommandSpec { name: "rename-window", usage: "<name>", value_flags: &[], handler: cmd_rename_window },
    CommandSpec { name: "resize-pane", usage: "[(-L <left>)] [(-U <up>)] [(-D <down>)] [(-R <right>)] [-Z]", value_flags: &["-L", "-U", "-D", "-R"], handler: cmd_resize_pane },
    CommandSpec { name: "rotate-window", usage: "[-D|-U]", value_flags: &[], handler: cmd_rotate_window },
    CommandSpec { name: "select-layout", usage: "<layout-type>", value_flags: &[], handler: cmd_select_layout },
    CommandSpec { name: "select-pane", usage: "(-L|-R|-U|-D|-t <pane-id>)", value_flags: &["-t"], handler: cmd_select_pane },
    CommandSpec { name: "select-window", usage: "(-t <target-window>)", value_flags: &["-t"], handler: cmd_select_window },
    CommandSpec { name: "send-keys", usage: "<keys>...", value_flags: &[], handler: cmd_send_keys },
    CommandSpec { name: "send-prefix", usage: "", value_flags: &[], handler: cmd_send_prefix },
    CommandSpec { name: "set-option", usage: "<option> <value>", value_flags: &[], handler: cmd_set_option },
    CommandSpec { name: "set-window-option", usage: "<option> <value>", value_flags: &[], handler: cmd_set_window_option },
    CommandSpec { name: "show-buffer", usage: "", value_flags: &[], handler: cmd_show_buffer },
    CommandSpec { name: "source-file", usage: "<filename>", value_flags: &[], handler: cmd_source_file },
    CommandSpec { name: "split-window", usage: "[-v|-h] [(-c <start-directory>)] [<executable>]", value_flags: &["-c"], handler: cmd_split_window },
    CommandSpec { name: "suspend-client", usage: "", value_flags: &[], handler: cmd_suspend_client },
    CommandSpec { name: "swap-pane", usage: "(-D|-U)", value_flags: &[], handler: cmd_swap_pane },
    CommandSpec { name: "unbind-key", usage: "[-n] <key>", value_flags: &[], handler: cmd_unbind_key },
];

pub fn has_command_handler(command: &str) -> bool {
    COMMANDS.iter().any(|spec| spec.name == command)
}

pub fn find_command(command: &str) -> Option<&'static CommandSpec> {
    COMMANDS.iter().find(|spec| spec.name == command)
}

pub fn get_documentation_for_command(command: &str) -> Option<String> {
    find_command(command).map(|spec| format!("Usage: {} {}", spec.name, spec.usage))
}

/// The `-x` flags a command accepts, for the completion UI.
pub fn get_option_flags_for_command(command: &str) -> Vec<String> {
    static FLAG_RE: OnceLock<Regex> = OnceLock::new();
    let re = FLAG_RE.get_or_init(|| Regex::new(r"-[a-zA-Z0-9]\b").unwrap());
    match find_command(command) {
        Some(spec) => re.find_iter(spec.usage).map(|m| m.as_str().to_string()).collect(),
        None => Vec::new(),
    }
}

/// Shell-style tokenizer: double and single quotes, backslash escapes.
/// An unterminated quote is an error surfaced to the user.
pub fn split_command_line(input: &str) -> Result<Vec<String>, String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_token = false;
    let mut quote: Option<char> = None;
    let mut chars = input.chars();

    while let Some(c) = chars.next() {
        match quote {
            Some('\'') => {
                if c == '\'' {
                    quote = None;
                } else {
                    current.push(c);
                }
            }
            Some('"') => match c {
                '"' => quote = None,
                '\\' => match chars.next() {
                    Some(escaped) => current.push(escaped),
                    None => return Err("No escaped character".to_string()),
                },
                _ => current.push(c),
            },
            _ => match c {
                '\'' | '"' => {
                    quote = Some(c);
                    in_token = true;
                }
                '\\' => match chars.next() {
                    Some(escaped) => {
                        current.push(escaped);
                        in_token = true;
                    }
                    None => return Err("No escaped character".to_string()),
                },
                c if c.is_whitespace() => {
                    if in_token {
                        tokens.push(std::mem::take(&mut current));
                        in_token = false;
                    }
                }
                _ => {
                    current.push(c);
                    in_token = true;
                }
            },
        }
    }

    if quote.is_some() {
        return Err("No closing quotation".to_string());
    }
    if in_token {
        tokens.push(current);
    }
    Ok(tokens)
}

#[derive(Default, Debug)]
pub struct ParsedArgs {
    flags: HashSet<String>,
    values: HashMap<String, String>,
    positionals: Vec<String>,
}

impl ParsedArgs {
    pub fn flag(&self, name: &str) -> bool {
        self.flags.contains(name)
    }

    pub fn value(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(|s| s.as_str())
    }

    pub fn positional(&self, index: usize) -> Option<&str> {
        self.positionals.get(index).map(|s| s.as_str())
    }

    pub fn positionals(&self) -> &[String] {
        &self.positionals
    }
}

fn parse_args(spec: &CommandSpec, arguments: &[String]) -> Result<ParsedArgs, CommandError> {
    let usage_error = || CommandError::new(format!("Usage: {} {}", spec.name, spec.usage));
    let known_flags = get_option_flags_for_command(spec.name);

    let mut parsed = ParsedArgs::default();
    let mut after_double_dash = false;
    let mut iter = arguments.iter();

    while let Some(token) = iter.next() {
        if after_double_dash {
            parsed.positionals.push(token.clone());
            continue;
        }
        if token == "--" {
            after_double_dash = true;
            continue;
        }
        if token.starts_with('-') && token.len() > 1 && !token[1..].starts_with(|c: char| c.is_ascii_digit()) {
            if spec.value_flags.contains(&token.as_str()) {
                let value = iter.next().ok_or_else(usage_error)?;
                parsed.values.insert(token.clone(), value.clone());
            } else if known_flags.iter().any(|f| f == token) {
                parsed.flags.insert(token.clone());
            } else {
                return Err(usage_error());
            }
        } else {
            parsed.positionals.push(token.clone());
        }
    }

    Ok(parsed)
}

/// Parse one input line and dispatch it. Comment lines are ignored;
/// tokenizer failures surface in the client's message area.
pub fn handle_command(pymux: &mut Pymux, client: ClientId, input: &str) {
    let input = input.trim();
    debug!(command = input, "handle command");

    if input.is_empty() || input.starts_with('#') {
        return;
    }

    match split_command_line(input) {
        Err(e) => pymux.show_message(client, format!("Invalid command {}: {}", input, e)),
        Ok(parts) => {
            if let Some((command, arguments)) = parts.split_first() {
                call_command_handler(pymux, client, command, arguments.to_vec());
            }
        }
    }
}

pub fn call_command_handler(
    pymux: &mut Pymux,
    client: ClientId,
    command: &str,
    mut arguments: Vec<String>,
) {
    let command = resolve_alias(command);

    let Some(spec) = find_command(command) else {
        pymux.show_message(client, format!("Invalid command: {}", command));
        return;
    };

    // bind-key takes a variable trailing command: insert a double dash after
    // the first non-flag argument so the command and its arguments survive
    // the grammar untouched.
    if command == "bind-key" && !arguments.iter().any(|a| a == "--") {
        if let Some(i) = arguments.iter().position(|a| !a.starts_with('-')) {
            arguments.insert(i + 1, "--".to_string());
        }
    }

    match parse_args(spec, &arguments) {
        Err(e) => pymux.show_message(client, e.message),
        Ok(parsed) => match (spec.handler)(pymux, client, &parsed) {
            Err(e) => pymux.show_message(client, e.message),
            Ok(()) => pymux.invalidate(),
        },
    }
}

//
// Handlers.
//

fn active_pane_id(pymux: &mut Pymux, client: ClientId) -> Result<usize, CommandError> {
    pymux
        .arrangement
        .get_active_pane_id(client)
        .ok_or_else(|| CommandError::new("No active pane"))
}

fn cmd_break_pane(pymux: &mut Pymux, client: ClientId, args: &ParsedArgs) -> Result<(), CommandError> {
    let dont_focus_window = args.flag("-d");
    pymux.arrangement.break_pane(client, !dont_focus_window);
    Ok(())
}

fn cmd_select_pane(pymux: &mut Pymux, client: ClientId, args: &ParsedArgs) -> Result<(), CommandError> {
    if let Some(target) = args.value("-t") {
        let window = pymux
            .arrangement
            .get_active_window(client)
            .ok_or_else(|| CommandError::new("No active window"))?;
        match target {
            ":.+" => window.focus_next(1),
            ":.-" => window.focus_previous(),
            _ => {
                let index: usize = target
                    .strip_prefix(':')
                    .unwrap_or(target)
                    .parse()
                    .map_err(|_| CommandError::new("Invalid pane."))?;
                let ids = window.pane_ids();
                let id = *ids.get(index).ok_or_else(|| CommandError::new("Invalid pane."))?;
                window.set_active_pane(id);
            }
        }
        return Ok(());
    }

    let (dx, dy) = if args.flag("-L") {
        (-1, 0)
    } else if args.flag("-R") {
        (1, 0)
    } else if args.flag("-U") {
        (0, -1)
    } else if args.flag("-D") {
        (0, 1)
    } else {
        return Err(CommandError::new(
            "Usage: select-pane (-L|-R|-U|-D|-t <pane-id>)",
        ));
    };
    focus_direction(pymux, client, dx, dy);
    Ok(())
}

/// Geometric focus movement: the nearest pane strictly on the requested
/// side of the active pane's rectangle.
fn focus_direction(pymux: &mut Pymux, client: ClientId, dx: i32, dy: i32) {
    let Some(window_id) = pymux.arrangement.active_window_id(client) else { return };
    let (rows, columns) = pymux.window_size_for_window(window_id).unwrap_or((23, 80));
    let Some(window) = pymux.arrangement.window_by_id_mut(window_id) else { return };
    let rects = layout::compute_pane_rects(window, rows, columns);
    let Some(active) = window.active_pane_id() else { return };
    let Some(&(_, active_rect)) = rects.iter().find(|(id, _)| *id == active) else { return };

    let mut best: Option<(usize, u32)> = None;
    for (id, r) in &rects {
        if *id == active {
            continue;
        }
        let distance = match (dx, dy) {
            (-1, 0) if r.x + r.width <= active_rect.x => {
                Some((active_rect.x - (r.x + r.width)) as u32)
            }
            (1, 0) if r.x >= active_rect.x + active_rect.width => {
                Some((r.x - (active_rect.x + active_rect.width)) as u32)
            }
            (0, -1) if r.y + r.height <= active_rect.y => {
                Some((active_rect.y - (r.y + r.height)) as u32)
            }
            (0, 1) if r.y >= active_rect.y + active_rect.height => {
                Some((r.y - (active_rect.y + active_rect.height)) as u32)
            }
            _ => None,
        };
        if let Some(d) = distance {
            if best.map_or(true, |(_, bd)| d < bd) {
                best = Some((*id, d));
            }
        }
    }
    if let Some((id, _)) = best {
        window.set_active_pane(id);
    }
}

fn cmd_select_window(pymux: &mut Pymux, client: ClientId, args: &ParsedArgs) -> Result<(), CommandError> {
    let target = args
        .value("-t")
        .ok_or_else(|| CommandError::new("Usage: select-window (-t <target-window>)"))?;
    let invalid = || CommandError::new(format!("Invalid window: {}", target));

    let number: usize = target
        .strip_prefix(':')
        .ok_or_else(invalid)?
        .parse()
        .map_err(|_| invalid())?;

    let window_id = pymux
        .arrangement
        .get_window_by_index(number)
        .map(|w| w.window_id)
        .ok_or_else(invalid)?;
    pymux.arrangement.set_active_window(client, window_id);
    Ok(())
}

fn cmd_move_window(pymux: &mut Pymux, client: ClientId, args: &ParsedArgs) -> Result<(), CommandError> {
    let target = args
        .value("-t")
        .ok_or_else(|| CommandError::new("Usage: move-window (-t <dst-window>)"))?;
    let new_index: usize = target
        .strip_prefix(':')
        .unwrap_or(target)
        .parse()
        .map_err(|_| CommandError::new(format!("Invalid window index: {}", target)))?;

    if pymux.arrangement.get_window_by_index(new_index).is_some() {
        return Err(CommandError::new("Can't move window: index in use."));
    }

    let window_id = pymux
        .arrangement
        .active_window_id(client)
        .ok_or_else(|| CommandError::new("No active window"))?;
    pymux.arrangement.move_window(window_id, new_index);
    Ok(())
}

fn cmd_rotate_window(pymux: &mut Pymux, client: ClientId, args: &ParsedArgs) -> Result<(), CommandError> {
    let count = if args.flag("-D") { -1 } else { 1 };
    pymux.arrangement.rotate_window(client, count);
    Ok(())
}

fn cmd_swap_pane(pymux: &mut Pymux, client: ClientId, args: &ParsedArgs) -> Result<(), CommandError> {
    let up = args.flag("-U");
    if let Some(window) = pymux.arrangement.get_active_window(client) {
        if up {
            window.rotate(1, true, false);
        } else {
            window.rotate(1, false, true);
        }
    }
    Ok(())
}

fn cmd_kill_pane(pymux: &mut Pymux, client: ClientId, _args: &ParsedArgs) -> Result<(), CommandError> {
    let pane_id = active_pane_id(pymux, client)?;
    pymux.kill_pane(pane_id);
    Ok(())
}

fn cmd_kill_window(pymux: &mut Pymux, client: ClientId, _args: &ParsedArgs) -> Result<(), CommandError> {
    let pane_ids = pymux
        .arrangement
        .get_active_window(client)
        .map(|w| w.pane_ids())
        .unwrap_or_default();
    for pane_id in pane_ids {
        pymux.kill_pane(pane_id);
    }
    Ok(())
}

fn cmd_kill_server(pymux: &mut Pymux, _client: ClientId, _args: &ParsedArgs) -> Result<(), CommandError> {
    let pane_ids: Vec<usize> = pymux
        .arrangement
        .windows
        .iter()
        .flat_map(|w| w.pane_ids())
        .collect();
    for pane_id in pane_ids {
        pymux.kill_pane(pane_id);
    }
    Ok(())
}

fn cmd_suspend_client(pymux: &mut Pymux, client: ClientId, _args: &ParsedArgs) -> Result<(), CommandError> {
    pymux.suspend_client(client);
    Ok(())
}

fn cmd_clock_mode(pymux: &mut Pymux, client: ClientId, _args: &ParsedArgs) -> Result<(), CommandError> {
    if let Some(pane) = pymux
        .arrangement
        .get_active_window(client)
        .and_then(|w| w.active_pane_mut())
    {
        pane.clock_mode = !pane.clock_mode;
    }
    Ok(())
}

fn cmd_last_pane(pymux: &mut Pymux, client: ClientId, _args: &ParsedArgs) -> Result<(), CommandError> {
    if let Some(window) = pymux.arrangement.get_active_window(client) {
        if let Some(previous) = window.previous_active_pane_id() {
            window.set_active_pane(previous);
        }
    }
    Ok(())
}

fn cmd_next_layout(pymux: &mut Pymux, client: ClientId, _args: &ParsedArgs) -> Result<(), CommandError> {
    if let Some(window) = pymux.arrangement.get_active_window(client) {
        window.select_next_layout(1);
    }
    Ok(())
}

fn cmd_previous_layout(pymux: &mut Pymux, client: ClientId, _args: &ParsedArgs) -> Result<(), CommandError> {
    if let Some(window) = pymux.arrangement.get_active_window(client) {
        window.select_previous_layout();
    }
    Ok(())
}

fn cmd_new_window(pymux: &mut Pymux, client: ClientId, args: &ParsedArgs) -> Result<(), CommandError> {
    let executable = match args.positionals() {
        [] => None,
        parts => Some(parts.join(" ")),
    };
    let start_directory = args.value("-c").map(std::path::PathBuf::from);
    let name = args.value("-n").map(|s| s.to_string());

    pymux
        .create_window(Some(client), executable, start_directory, name)
        .map_err(|e| CommandError::new(format!("{}", e)))
}

fn cmd_next_window(pymux: &mut Pymux, client: ClientId, _args: &ParsedArgs) -> Result<(), CommandError> {
    pymux.arrangement.focus_next_window(client);
    Ok(())
}

fn cmd_previous_window(pymux: &mut Pymux, client: ClientId, _args: &ParsedArgs) -> Result<(), CommandError> {
    pymux.arrangement.focus_previous_window(client);
    Ok(())
}

fn cmd_last_window(pymux: &mut Pymux, client: ClientId, _args: &ParsedArgs) -> Result<(), CommandError> {
    if let Some(window_id) = pymux.arrangement.get_previous_active_window_id(client) {
        pymux.arrangement.set_active_window(client, window_id);
    }
    Ok(())
}

fn cmd_select_layout(pymux: &mut Pymux, client: ClientId, args: &ParsedArgs) -> Result<(), CommandError> {
    let name = args
        .positional(0)
        .ok_or_else(|| CommandError::new("Usage: select-layout <layout-type>"))?;
    let layout = LayoutType::from_name(name)
        .ok_or_else(|| CommandError::new("Invalid layout type."))?;
    if let Some(window) = pymux.arrangement.get_active_window(client) {
        window.select_layout(layout);
    }
    Ok(())
}

fn cmd_rename_window(pymux: &mut Pymux, client: ClientId, args: &ParsedArgs) -> Result<(), CommandError> {
    let name = args
        .positional(0)
        .ok_or_else(|| CommandError::new("Usage: rename-window <name>"))?
        .to_string();
    if let Some(window) = pymux.arrangement.get_active_window(client) {
        window.chosen_name = Some(name);
    }
    Ok(())
}

fn cmd_rename_pane(pymux: &mut Pymux, client: ClientId, args: &ParsedArgs) -> Result<(), CommandError> {
    let name = args
        .positional(0)
        .ok_or_else(|| CommandError::new("Usage: rename-pane <name>"))?
        .to_string();
    if let Some(pane) = pymux
        .arrangement
        .get_active_window(client)
        .and_then(|w| w.active_pane_mut())
    {
        pane.chosen_name = Some(name);
    }
    Ok(())
}

fn cmd_rename_session(pymux: &mut Pymux, _client: ClientId, args: &ParsedArgs) -> Result<(), CommandError> {
    let name = args
        .positional(0)
        .ok_or_else(|| CommandError::new("Usage: rename-session <name>"))?;
    pymux.session_name = name.to_string();
    Ok(())
}

fn cmd_split_window(pymux: &mut Pymux, client: ClientId, args: &ParsedArgs) -> Result<(), CommandError> {
    let executable = match args.positionals() {
        [] => None,
        parts => Some(parts.join(" ")),
    };
    let start_directory = args.value("-c").map(std::path::PathBuf::from);

    // tmux -h splits side by side, which is a vertical split here.
    let vsplit = args.flag("-h");
    pymux
        .add_process(client, executable, vsplit, start_directory)
        .map_err(|e| CommandError::new(format!("{}", e)))
}

fn cmd_resize_pane(pymux: &mut Pymux, client: ClientId, args: &ParsedArgs) -> Result<(), CommandError> {
    let amount = |flag: &str| -> Result<i32, CommandError> {
        match args.value(flag) {
            Some(value) => value
                .parse::<i32>()
                .map_err(|_| CommandError::new("Expecting an integer.")),
            None => Ok(0),
        }
    };
    let left = amount("-L")?;
    let up = amount("-U")?;
    let down = amount("-D")?;
    let right = amount("-R")?;

    if let Some(window) = pymux.arrangement.get_active_window(client) {
        window.change_size_for_active_pane(up, right, down, left);
        if args.flag("-Z") {
            window.zoom = !window.zoom;
        }
    }
    Ok(())
}

fn cmd_detach_client(pymux: &mut Pymux, client: ClientId, _args: &ParsedArgs) -> Result<(), CommandError> {
    pymux.detach_client(client);
    Ok(())
}

fn cmd_confirm_before(pymux: &mut Pymux, client: ClientId, args: &ParsedArgs) -> Result<(), CommandError> {
    let command = args
        .positional(0)
        .ok_or_else(|| CommandError::new("Usage: confirm-before [(-p <message>)] <command>"))?
        .to_string();
    let message = args.value("-p").unwrap_or("").to_string();
    let message = format_pymux_string(pymux, client, &message);

    let state = pymux.get_client_state(client);
    state.confirm_text = Some(message);
    state.confirm_command = Some(command);
    Ok(())
}

fn cmd_command_prompt(pymux: &mut Pymux, client: ClientId, args: &ParsedArgs) -> Result<(), CommandError> {
    let command = args.positional(0).map(|s| s.to_string());
    let message = args.value("-p").map(|s| s.to_string());
    let default = args.value("-I").unwrap_or("").to_string();
    let default = format_pymux_string(pymux, client, &default);

    let state = pymux.get_client_state(client);
    match command {
        Some(command) => {
            let prompt = message.unwrap_or_else(|| {
                format!("({})", command.split_whitespace().next().unwrap_or(""))
            });
            state.prompt_text = Some(prompt);
            state.prompt_command = Some(command);
            state.prompt_buffer = default;
        }
        None => {
            state.command_mode = true;
            state.command_buffer.clear();
        }
    }
    Ok(())
}

fn cmd_send_prefix(pymux: &mut Pymux, client: ClientId, _args: &ParsedArgs) -> Result<(), CommandError> {
    let prefix = pymux.key_bindings.prefix();
    let pane_id = active_pane_id(pymux, client)?;
    if let Some(pane) = pymux.arrangement.pane(pane_id) {
        pane.process.write_key(prefix);
    }
    Ok(())
}

fn cmd_bind_key(pymux: &mut Pymux, _client: ClientId, args: &ParsedArgs) -> Result<(), CommandError> {
    let key = args
        .positional(0)
        .ok_or_else(|| CommandError::new("Usage: bind-key [-n] <key> [--] <command> [<arguments>...]"))?;
    let command = args
        .positional(1)
        .ok_or_else(|| CommandError::new("Usage: bind-key [-n] <key> [--] <command> [<arguments>...]"))?
        .to_string();
    let arguments: Vec<String> = args.positionals()[2..].to_vec();
    let needs_prefix = !args.flag("-n");

    pymux
        .key_bindings
        .add_custom_binding(key, command, arguments, needs_prefix)
        .map_err(|_| CommandError::new(format!("Invalid key: {}", key)))
}

fn cmd_unbind_key(pymux: &mut Pymux, _client: ClientId, args: &ParsedArgs) -> Result<(), CommandError> {
    let key = args
        .positional(0)
        .ok_or_else(|| CommandError::new("Usage: unbind-key [-n] <key>"))?;
    let needs_prefix = !args.flag("-n");
    pymux.key_bindings.remove_custom_binding(key, needs_prefix);
    Ok(())
}

fn cmd_send_keys(pymux: &mut Pymux, client: ClientId, args: &ParsedArgs) -> Result<(), CommandError> {
    let pane_id = active_pane_id(pymux, client)?;
    let in_copy_mode = pymux
        .arrangement
        .pane(pane_id)
        .map(|p| p.display_scroll_buffer())
        .unwrap_or(false);
    if in_copy_mode {
        return Err(CommandError::new("Cannot send keys. Pane is in copy mode."));
    }

    for key_name in args.positionals() {
        let key = keys::parse_key(key_name)
            .map_err(|_| CommandError::new(format!("Invalid key: {}", key_name)))?;
        if let Some(pane) = pymux.arrangement.pane(pane_id) {
            pane.process.write_key(key);
        }
    }
    Ok(())
}

fn cmd_copy_mode(pymux: &mut Pymux, client: ClientId, args: &ParsedArgs) -> Result<(), CommandError> {
    let scroll_up = args.flag("-u");
    if let Some(pane) = pymux
        .arrangement
        .get_active_window(client)
        .and_then(|w| w.active_pane_mut())
    {
        pane.enter_copy_mode(scroll_up);
    }
    Ok(())
}

fn cmd_paste_buffer(pymux: &mut Pymux, client: ClientId, _args: &ParsedArgs) -> Result<(), CommandError> {
    let pane_id = active_pane_id(pymux, client)?;
    let text = pymux.clipboard.clone();
    if let Some(pane) = pymux.arrangement.pane(pane_id) {
        pane.process.write_input(&text, true);
    }
    Ok(())
}

fn cmd_source_file(pymux: &mut Pymux, client: ClientId, args: &ParsedArgs) -> Result<(), CommandError> {
    let filename = args
        .positional(0)
        .ok_or_else(|| CommandError::new("Usage: source-file <filename>"))?;
    let expanded = if let Some(rest) = filename.strip_prefix("~/") {
        match std::env::var("HOME") {
            Ok(home) => format!("{}/{}", home, rest),
            Err(_) => filename.to_string(),
        }
    } else {
        filename.to_string()
    };

    let content = std::fs::read_to_string(&expanded)
        .map_err(|e| CommandError::new(format!("IOError: {}", e)))?;
    for line in content.lines() {
        handle_command(pymux, client, line);
    }
    Ok(())
}

fn cmd_set_option(pymux: &mut Pymux, _client: ClientId, args: &ParsedArgs) -> Result<(), CommandError> {
    let name = args
        .positional(0)
        .ok_or_else(|| CommandError::new("Usage: set-option <option> <value>"))?
        .to_string();
    let value = args
        .positional(1)
        .ok_or_else(|| CommandError::new("Usage: set-option <option> <value>"))?
        .to_string();
    options::set_option(pymux, &name, &value).map_err(|e| CommandError::new(e.message))
}

fn cmd_set_window_option(pymux: &mut Pymux, client: ClientId, args: &ParsedArgs) -> Result<(), CommandError> {
    let name = args
        .positional(0)
        .ok_or_else(|| CommandError::new("Usage: set-window-option <option> <value>"))?
        .to_string();
    let value = args
        .positional(1)
        .ok_or_else(|| CommandError::new("Usage: set-window-option <option> <value>"))?
        .to_string();
    let window = pymux
        .arrangement
        .get_active_window(client)
        .ok_or_else(|| CommandError::new("No active window"))?;
    options::set_window_option(window, &name, &value).map_err(|e| CommandError::new(e.message))
}

fn cmd_display_panes(pymux: &mut Pymux, client: ClientId, _args: &ParsedArgs) -> Result<(), CommandError> {
    pymux.get_client_state(client).display_pane_numbers = true;
    Ok(())
}

fn cmd_display_message(pymux: &mut Pymux, client: ClientId, args: &ParsedArgs) -> Result<(), CommandError> {
    let message = args.positionals().join(" ");
    let message = format_pymux_string(pymux, client, &message);
    pymux.get_client_state(client).message = Some(message);
    Ok(())
}

fn cmd_clear_history(pymux: &mut Pymux, client: ClientId, _args: &ParsedArgs) -> Result<(), CommandError> {
    let pane_id = active_pane_id(pymux, client)?;
    let pane = pymux
        .arrangement
        .pane(pane_id)
        .ok_or_else(|| CommandError::new("No active pane"))?;
    if pane.display_scroll_buffer() {
        return Err(CommandError::new("Not available in copy mode"));
    }
    if let Ok(mut terminal) = pane.process.terminal.lock() {
        terminal.screen.clear_history();
    }
    Ok(())
}

fn cmd_list_keys(pymux: &mut Pymux, client: ClientId, _args: &ParsedArgs) -> Result<(), CommandError> {
    let body = pymux.key_bindings.describe().join("\n");
    pymux.display_popup(client, "list-keys", body);
    Ok(())
}

fn cmd_list_panes(pymux: &mut Pymux, client: ClientId, _args: &ParsedArgs) -> Result<(), CommandError> {
    let history_limit = pymux.history_limit.load(std::sync::atomic::Ordering::Relaxed);
    let mut lines = Vec::new();
    if let Some(window) = pymux.arrangement.get_active_window(client) {
        let active = window.active_pane_id();
        for (i, pane_id) in window.pane_ids().into_iter().enumerate() {
            if let Some(pane) = window.pane(pane_id) {
                let (columns, rows) = pane.process.size();
                let history = pane
                    .process
                    .terminal
                    .lock()
                    .map(|t| t.screen.line_offset + rows as usize)
                    .unwrap_or(0);
                lines.push(format!(
                    "{}: [{}x{}] [history {}/{}] {}",
                    i,
                    columns,
                    rows,
                    history.min(history_limit),
                    history_limit,
                    if active == Some(pane_id) { "(active)" } else { "" }
                ));
            }
        }
    }
    lines.sort();
    pymux.display_popup(client, "list-panes", lines.join("\n"));
    Ok(())
}

fn cmd_show_buffer(pymux: &mut Pymux, client: ClientId, _args: &ParsedArgs) -> Result<(), CommandError> {
    let text = pymux.clipboard.clone();
    pymux.display_popup(client, "show-buffer", text);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokenizer_handles_quotes_and_escapes() {
        assert_eq!(
            split_command_line("new-window -n \"my shell\" vim").unwrap(),
            vec!["new-window", "-n", "my shell", "vim"]
        );
        assert_eq!(
            split_command_line("display-message 'hello world'").unwrap(),
            vec!["display-message", "hello world"]
        );
        assert_eq!(
            split_command_line(r#"bind-key x confirm-before -p "kill?" kill-window"#).unwrap(),
            vec!["bind-key", "x", "confirm-before", "-p", "kill?", "kill-window"]
        );
        assert_eq!(split_command_line(r"a\ b").unwrap(), vec!["a b"]);
        assert!(split_command_line("unterminated \"quote").is_err());
    }

    #[test]
    fn empty_and_quoted_empty_tokens() {
        assert_eq!(split_command_line("").unwrap(), Vec::<String>::new());
        assert_eq!(split_command_line("   ").unwrap(), Vec::<String>::new());
        assert_eq!(split_command_line("cmd ''").unwrap(), vec!["cmd", ""]);
    }

    #[test]
    fn aliases_resolve_to_known_commands() {
        assert_eq!(resolve_alias("splitw"), "split-window");
        assert_eq!(resolve_alias("bind"), "bind-key");
        assert_eq!(resolve_alias("not-an-alias"), "not-an-alias");

        // Every alias must point at a registered command.
        for (_, canonical) in ALIASES {
            assert!(has_command_handler(canonical), "missing handler: {}", canonical);
        }
    }

    #[test]
    fn option_flags_extracted_from_usage() {
        let flags = get_option_flags_for_command("resize-pane");
        assert!(flags.contains(&"-L".to_string()));
        assert!(flags.contains(&"-Z".to_string()));
        assert_eq!(get_option_flags_for_command("kill-pane"), Vec::<String>::new());
    }

    #[test]
    fn parse_args_flags_values_positionals() {
        let spec = find_command("new-window").unwrap();
        let args: Vec<String> = ["-n", "editor", "-c", "/tmp", "vim", "notes.txt"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let parsed = parse_args(spec, &args).unwrap();
        assert_eq!(parsed.value("-n"), Some("editor"));
        assert_eq!(parsed.value("-c"), Some("/tmp"));
        assert_eq!(parsed.positionals(), &["vim".to_string(), "notes.txt".to_string()]);
    }

    #[test]
    fn parse_args_rejects_unknown_flags() {
        let spec = find_command("kill-pane").unwrap();
        let args = vec!["-x".to_string()];
        assert!(parse_args(spec, &args).is_err());
    }

    #[test]
    fn parse_args_value_flag_requires_value() {
        let spec = find_command("confirm-before").unwrap();
        let args = vec!["-p".to_string()];
        assert!(parse_args(spec, &args).is_err());
    }

    #[test]
    fn double_dash_stops_flag_parsing() {
        let spec = find_command("bind-key").unwrap();
        let args: Vec<String> = ["x", "--", "resize-pane", "-L", "2"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let parsed = parse_args(spec, &args).unwrap();
        assert_eq!(
            parsed.positionals(),
            &["x".to_string(), "resize-pane".to_string(), "-L".to_string(), "2".to_string()]
        );
    }

    #[test]
    fn negative_numbers_are_not_flags() {
        let spec = find_command("resize-pane").unwrap();
        let args: Vec<String> = ["-L", "-2"].iter().map(|s| s.to_string()).collect();
        let parsed = parse_args(spec, &args).unwrap();
        assert_eq!(parsed.value("-L"), Some("-2"));
    }

    #[test]
    fn documentation_strings() {
        assert_eq!(
            get_documentation_for_command("break-pane").unwrap(),
            "Usage: break-pane [-d]"
        );
        assert!(get_documentation_for_command("nope").is_none());
    }
}
