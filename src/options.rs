//! Configurable options, changed through `set-option` and
//! `set-window-option`. Each option validates its value and applies it to
//! the server or the active window.

use std::sync::atomic::Ordering;

use crate::arrangement::Window;
use crate::keys;
use crate::server::Pymux;

#[derive(Debug)]
pub struct SetOptionError {
    pub message: String,
}

impl SetOptionError {
    fn new(message: impl Into<String>) -> SetOptionError {
        SetOptionError { message: message.into() }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Justify {
    Left,
    Centre,
    Right,
}

impl Justify {
    pub const ALL: [&'static str; 3] = ["left", "centre", "right"];

    fn from_name(name: &str) -> Option<Justify> {
        match name {
            "left" => Some(Justify::Left),
            "centre" | "center" => Some(Justify::Centre),
            "right" => Some(Justify::Right),
            _ => None,
        }
    }
}

enum OptionKind {
    OnOff(fn(&mut Pymux, bool)),
    PositiveInt(fn(&mut Pymux, usize)),
    Str(fn(&mut Pymux, String)),
    /// "emacs" or "vi".
    Keys(fn(&mut Pymux, bool)),
    Justify,
    Prefix,
    BaseIndex,
}

pub struct OptionDef {
    pub name: &'static str,
    kind: OptionKind,
    /// Suggested values, surfaced to the completion UI.
    pub values: &'static [&'static str],
}

static SESSION_OPTIONS: &[OptionDef] = &[
    OptionDef { name: "base-index", kind: OptionKind::BaseIndex, values: &["0", "1"] },
    OptionDef {
        name: "bell",
        kind: OptionKind::OnOff(|p, v| p.enable_bell = v),
        values: &["on", "off"],
    },
    OptionDef {
        name: "history-limit",
        kind: OptionKind::PositiveInt(|p, v| p.history_limit.store(v, Ordering::Relaxed)),
        values: &["200", "500", "1000", "2000", "5000", "10000"],
    },
    OptionDef {
        name: "mouse",
        kind: OptionKind::OnOff(|p, v| p.enable_mouse_support = v),
        values: &["on", "off"],
    },
    OptionDef { name: "prefix", kind: OptionKind::Prefix, values: &[] },
    OptionDef {
        name: "remain-on-exit",
        kind: OptionKind::OnOff(|p, v| p.remain_on_exit = v),
        values: &["on", "off"],
    },
    OptionDef {
        name: "status",
        kind: OptionKind::OnOff(|p, v| p.enable_status = v),
        values: &["on", "off"],
    },
    OptionDef {
        name: "status-interval",
        kind: OptionKind::PositiveInt(|p, v| p.status_interval.store(v as u64, Ordering::Relaxed)),
        values: &["1", "2", "4", "8", "16", "30", "60"],
    },
    OptionDef {
        name: "status-keys",
        kind: OptionKind::Keys(|p, v| p.status_keys_vi_mode = v),
        values: &["emacs", "vi"],
    },
    OptionDef {
        name: "mode-keys",
        kind: OptionKind::Keys(|p, v| p.mode_keys_vi_mode = v),
        values: &["emacs", "vi"],
    },
    OptionDef {
        name: "default-terminal",
        kind: OptionKind::Str(|p, v| p.default_terminal = v),
        values: &["xterm", "xterm-256color", "screen"],
    },
    OptionDef {
        name: "default-shell",
        kind: OptionKind::Str(|p, v| p.default_shell = v),
        values: &[],
    },
    OptionDef {
        name: "status-left",
        kind: OptionKind::Str(|p, v| p.status_left = v),
        values: &[],
    },
    OptionDef {
        name: "status-right",
        kind: OptionKind::Str(|p, v| p.status_right = v),
        values: &[],
    },
    OptionDef {
        name: "status-left-length",
        kind: OptionKind::PositiveInt(|p, v| p.status_left_length = v),
        values: &["20"],
    },
    OptionDef {
        name: "status-right-length",
        kind: OptionKind::PositiveInt(|p, v| p.status_right_length = v),
        values: &["20"],
    },
    OptionDef { name: "status-justify", kind: OptionKind::Justify, values: &["left", "centre", "right"] },
    OptionDef {
        name: "window-status-format",
        kind: OptionKind::Str(|p, v| p.window_status_format = v),
        values: &[],
    },
    OptionDef {
        name: "window-status-current-format",
        kind: OptionKind::Str(|p, v| p.window_status_current_format = v),
        values: &[],
    },
];

enum WindowOptionKind {
    OnOff(fn(&mut Window, bool)),
}

pub struct WindowOptionDef {
    pub name: &'static str,
    kind: WindowOptionKind,
    pub values: &'static [&'static str],
}

static WINDOW_OPTIONS: &[WindowOptionDef] = &[WindowOptionDef {
    name: "synchronize-panes",
    kind: WindowOptionKind::OnOff(|w, v| w.synchronize_panes = v),
    values: &["on", "off"],
}];

pub fn session_option_names() -> Vec<&'static str> {
    SESSION_OPTIONS.iter().map(|o| o.name).collect()
}

pub fn window_option_names() -> Vec<&'static str> {
    WINDOW_OPTIONS.iter().map(|o| o.name).collect()
}

pub fn lookup(name: &str) -> Option<&'static OptionDef> {
    SESSION_OPTIONS.iter().find(|o| o.name == name)
}

pub fn lookup_window_option(name: &str) -> Option<&'static WindowOptionDef> {
    WINDOW_OPTIONS.iter().find(|o| o.name == name)
}

fn parse_on_off(value: &str) -> Result<bool, SetOptionError> {
    match value.to_ascii_lowercase().as_str() {
        "on" => Ok(true),
        "off" => Ok(false),
        _ => Err(SetOptionError::new("Expecting 'on' or 'off'.")),
    }
}

fn parse_positive_int(value: &str) -> Result<usize, SetOptionError> {
    value
        .parse::<usize>()
        .map_err(|_| SetOptionError::new("Expecting an integer."))
}

/// Apply a session option. The caller surfaces the error message in the
/// client's message area.
pub fn set_option(pymux: &mut Pymux, name: &str, value: &str) -> Result<(), SetOptionError> {
    let option = lookup(name)
        .ok_or_else(|| SetOptionError::new(format!("Invalid option: {}", name)))?;

    match &option.kind {
        OptionKind::OnOff(apply) => apply(pymux, parse_on_off(value)?),
        OptionKind::PositiveInt(apply) => apply(pymux, parse_positive_int(value)?),
        OptionKind::Str(apply) => apply(pymux, value.to_string()),
        OptionKind::Keys(apply) => match value {
            "emacs" => apply(pymux, false),
            "vi" => apply(pymux, true),
            _ => return Err(SetOptionError::new("Expecting 'vi' or 'emacs'.")),
        },
        OptionKind::Justify => {
            let justify = Justify::from_name(value)
                .ok_or_else(|| SetOptionError::new("Invalid justify option."))?;
            pymux.status_justify = justify;
        }
        OptionKind::Prefix => {
            let key = keys::parse_key(value)
                .map_err(|_| SetOptionError::new(format!("Invalid key: {}", value)))?;
            pymux.key_bindings.set_prefix(key);
        }
        OptionKind::BaseIndex => {
            pymux.arrangement.base_index = parse_positive_int(value)?;
        }
    }

    Ok(())
}

/// Apply a per-window option to the given window.
pub fn set_window_option(
    window: &mut Window,
    name: &str,
    value: &str,
) -> Result<(), SetOptionError> {
    let option = lookup_window_option(name)
        .ok_or_else(|| SetOptionError::new(format!("Invalid option: {}", name)))?;

    match &option.kind {
        WindowOptionKind::OnOff(apply) => apply(window, parse_on_off(value)?),
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn on_off_parsing() {
        assert!(parse_on_off("on").unwrap());
        assert!(!parse_on_off("OFF").unwrap());
        assert!(parse_on_off("yes").is_err());
    }

    #[test]
    fn positive_int_parsing() {
        assert_eq!(parse_positive_int("2000").unwrap(), 2000);
        assert!(parse_positive_int("-1").is_err());
        assert!(parse_positive_int("abc").is_err());
    }

    #[test]
    fn lookup_known_options() {
        assert!(lookup("history-limit").is_some());
        assert!(lookup("prefix").is_some());
        assert!(lookup("no-such-option").is_none());
        assert!(lookup_window_option("synchronize-panes").is_some());
    }

    #[test]
    fn window_option_applies() {
        let mut window = crate::arrangement::tests::test_window();
        assert!(!window.synchronize_panes);
        set_window_option(&mut window, "synchronize-panes", "on").unwrap();
        assert!(window.synchronize_panes);
        assert!(set_window_option(&mut window, "synchronize-panes", "maybe").is_err());
    }

    #[test]
    fn justify_names() {
        assert_eq!(Justify::from_name("centre"), Some(Justify::Centre));
        assert_eq!(Justify::from_name("center"), Some(Justify::Centre));
        assert_eq!(Justify::from_name("up"), None);
    }
}
