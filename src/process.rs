//! The child process behind a pane.
//!
//! Owns the PTY pair, the spawned child, the reader thread that pumps output
//! through the VT100 stream into the screen, and the wait thread that posts
//! termination back to the server loop.

use std::io::{self, Read, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use portable_pty::{native_pty_system, ChildKiller, CommandBuilder, PtySize};
use tracing::debug;

use crate::copy_mode::{self, CopyDocument};
use crate::keys::{key_to_vt100, KeyPress};
use crate::screen::Screen;
use crate::stream::Stream;

/// How long a non-focused pane's output may postpone redraw signalling.
const MAX_POSTPONE: Duration = Duration::from_secs(1);

/// Incremental UTF-8 decoder with a replacement policy, carrying partial
/// sequences across read boundaries.
#[derive(Default)]
struct Utf8Decoder {
    incomplete: Vec<u8>,
}

impl Utf8Decoder {
    fn decode(&mut self, input: &[u8]) -> String {
        let mut bytes = std::mem::take(&mut self.incomplete);
        bytes.extend_from_slice(input);

        let mut out = String::with_capacity(bytes.len());
        let mut rest = bytes.as_slice();

        loop {
            match std::str::from_utf8(rest) {
                Ok(s) => {
                    out.push_str(s);
                    break;
                }
                Err(e) => {
                    let (valid, after) = rest.split_at(e.valid_up_to());
                    out.push_str(unsafe { std::str::from_utf8_unchecked(valid) });
                    match e.error_len() {
                        Some(n) => {
                            out.push('\u{fffd}');
                            rest = &after[n..];
                        }
                        None => {
                            // Incomplete sequence at the end of the chunk.
                            self.incomplete = after.to_vec();
                            break;
                        }
                    }
                }
            }
        }
        out
    }
}

/// The parser pair: a restartable VT100 stream feeding a screen.
pub struct Terminal {
    pub screen: Screen,
    stream: Stream,
    decoder: Utf8Decoder,
}

impl Terminal {
    pub fn new(screen: Screen) -> Self {
        Terminal { screen, stream: Stream::new(), decoder: Utf8Decoder::default() }
    }

    pub fn feed(&mut self, bytes: &[u8]) {
        let text = self.decoder.decode(bytes);
        self.stream.feed(&text, &mut self.screen);
    }
}

pub struct ProcessOptions {
    pub command: Option<String>,
    pub start_directory: Option<PathBuf>,
    pub fallback_directory: PathBuf,
    pub term: String,
    /// Value for the PYMUX variable in the child: "<socket>,<pane_id>".
    pub pymux_env: Option<String>,
    pub default_shell: String,
}

pub struct Process {
    master: Box<dyn portable_pty::MasterPty + Send>,
    writer: Arc<Mutex<Box<dyn Write + Send>>>,
    killer: Option<Box<dyn ChildKiller + Send + Sync>>,
    pub pid: Option<u32>,
    pub terminal: Arc<Mutex<Terminal>>,
    terminated: Arc<AtomicBool>,
    has_priority: Arc<AtomicBool>,
    pub data_version: Arc<AtomicU64>,
    sx: u16,
    sy: u16,
}

impl Process {
    /// Open a PTY, spawn the command (or the default shell) on its slave end
    /// and start the output reader and wait threads.
    ///
    /// `output_ready` is set whenever fresh output has been parsed, so the
    /// server loop knows a redraw is due. `done_callback` runs on the wait
    /// thread once the child exits.
    pub fn spawn(
        options: ProcessOptions,
        history_limit: Arc<AtomicUsize>,
        output_ready: Arc<AtomicBool>,
        bell_func: Box<dyn FnMut() + Send>,
        done_callback: Box<dyn FnOnce() + Send>,
    ) -> io::Result<Process> {
        let pty_system = native_pty_system();
        let size = PtySize { rows: 24, cols: 120, pixel_width: 0, pixel_height: 0 };
        let pair = pty_system
            .openpty(size)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, format!("openpty error: {e}")))?;

        let mut cmd = match &options.command {
            Some(command) => {
                let mut parts = command.split_whitespace();
                let program = parts.next().unwrap_or(options.default_shell.as_str());
                let mut builder = CommandBuilder::new(program);
                builder.args(parts);
                builder
            }
            None => CommandBuilder::new(&options.default_shell),
        };
        cmd.env("TERM", &options.term);
        if let Some(pymux) = &options.pymux_env {
            cmd.env("PYMUX", pymux);
        }
        let cwd = options.start_directory.clone().unwrap_or(options.fallback_directory.clone());
        if cwd.is_dir() {
            cmd.cwd(cwd);
        }

        let mut child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, format!("spawn error: {e}")))?;
        drop(pair.slave);

        // Give the child a moment to finish its setup before the first
        // resize signal reaches it.
        thread::sleep(Duration::from_millis(100));

        let pid = child.process_id();
        let killer = child.clone_killer();

        let writer = pair
            .master
            .take_writer()
            .map_err(|e| io::Error::new(io::ErrorKind::Other, format!("pty writer error: {e}")))?;
        let writer = Arc::new(Mutex::new(writer));

        // CPR and device-attribute responses write straight back into the
        // process.
        let response_writer = writer.clone();
        let write_process_input: Box<dyn FnMut(&str) + Send> = Box::new(move |data: &str| {
            if let Ok(mut w) = response_writer.lock() {
                let _ = w.write_all(data.as_bytes());
                let _ = w.flush();
            }
        });

        let screen = Screen::new(
            size.rows as usize,
            size.cols as usize,
            write_process_input,
            bell_func,
            history_limit,
        );
        let terminal = Arc::new(Mutex::new(Terminal::new(screen)));

        let terminated = Arc::new(AtomicBool::new(false));
        let has_priority = Arc::new(AtomicBool::new(true));
        let data_version = Arc::new(AtomicU64::new(0));

        let mut reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| io::Error::new(io::ErrorKind::Other, format!("pty reader error: {e}")))?;

        {
            let terminal = terminal.clone();
            let data_version = data_version.clone();
            let has_priority = has_priority.clone();
            let output_ready = output_ready.clone();
            thread::spawn(move || {
                let mut buf = [0u8; 4096];
                // For a non-focused pane, redraw signalling is coalesced so a
                // flooding background process cannot starve interactive
                // latency. Parsing itself is never delayed past MAX_POSTPONE.
                let mut last_signal = Instant::now();
                let mut signal_pending = false;
                loop {
                    match reader.read(&mut buf) {
                        Ok(0) => break,
                        Ok(n) => {
                            if let Ok(mut term) = terminal.lock() {
                                term.feed(&buf[..n]);
                            }
                            data_version.fetch_add(1, Ordering::Release);
                            if has_priority.load(Ordering::Acquire)
                                || last_signal.elapsed() >= MAX_POSTPONE
                            {
                                output_ready.store(true, Ordering::Release);
                                last_signal = Instant::now();
                                signal_pending = false;
                            } else {
                                signal_pending = true;
                                thread::sleep(Duration::from_millis(10));
                            }
                        }
                        Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                        Err(_) => break,
                    }
                }
                if signal_pending {
                    output_ready.store(true, Ordering::Release);
                }
                debug!("pane output reader finished");
            });
        }

        {
            let terminated = terminated.clone();
            thread::spawn(move || {
                let _ = child.wait();
                terminated.store(true, Ordering::Release);
                done_callback();
            });
        }

        Ok(Process {
            master: pair.master,
            writer,
            killer: Some(killer),
            pid,
            terminal,
            terminated,
            has_priority,
            data_version,
            sx: size.cols,
            sy: size.rows,
        })
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::Acquire)
    }

    pub fn set_has_priority(&self, priority: bool) {
        self.has_priority.store(priority, Ordering::Release);
    }

    /// Current PTY size as (columns, rows).
    pub fn size(&self) -> (u16, u16) {
        (self.sx, self.sy)
    }

    /// Resize the PTY and the screen model together.
    pub fn set_size(&mut self, columns: u16, rows: u16) {
        if (self.sx, self.sy) != (columns, rows) {
            let _ = self.master.resize(PtySize {
                rows,
                cols: columns,
                pixel_width: 0,
                pixel_height: 0,
            });
            if let Ok(mut term) = self.terminal.lock() {
                term.screen.resize(rows as usize, columns as usize);
            }
            self.sx = columns;
            self.sy = rows;
        }
    }

    /// Write user input. With `paste` set and bracketed paste enabled in the
    /// screen, the text is wrapped in the paste markers.
    pub fn write_input(&self, data: &str, paste: bool) {
        let bracketed = paste
            && self
                .terminal
                .lock()
                .map(|t| t.screen.bracketed_paste_enabled())
                .unwrap_or(false);
        if bracketed {
            self.write_bytes(format!("\x1b[200~{}\x1b[201~", data).as_bytes());
        } else {
            self.write_bytes(data.as_bytes());
        }
    }

    pub fn write_bytes(&self, data: &[u8]) {
        if let Ok(mut writer) = self.writer.lock() {
            // write_all retries interrupted writes (SIGWINCH during resize).
            let _ = writer.write_all(data);
            let _ = writer.flush();
        }
    }

    /// Translate an abstract key press into VT100 bytes, honoring the
    /// application cursor mode of this pane's screen.
    pub fn write_key(&self, key: KeyPress) {
        let application_mode = self
            .terminal
            .lock()
            .map(|t| t.screen.in_application_mode())
            .unwrap_or(false);
        let data = key_to_vt100(key, application_mode);
        if !data.is_empty() {
            self.write_input(&data, false);
        }
    }

    /// Send SIGKILL (via the platform child-killer) to the process.
    pub fn kill(&mut self) {
        if let Some(killer) = self.killer.as_mut() {
            let _ = killer.kill();
        }
    }

    /// A PTY with no child attached, for exercising the layout tree in
    /// tests without spawning real shells.
    #[cfg(test)]
    pub(crate) fn open_for_tests() -> Process {
        let pty_system = native_pty_system();
        let size = PtySize { rows: 24, cols: 80, pixel_width: 0, pixel_height: 0 };
        let pair = pty_system.openpty(size).expect("openpty");
        let writer = pair.master.take_writer().expect("pty writer");
        let screen = Screen::new(
            size.rows as usize,
            size.cols as usize,
            Box::new(|_| {}),
            Box::new(|| {}),
            Arc::new(AtomicUsize::new(2000)),
        );
        Process {
            master: pair.master,
            writer: Arc::new(Mutex::new(writer)),
            killer: None,
            pid: None,
            terminal: Arc::new(Mutex::new(Terminal::new(screen))),
            terminated: Arc::new(AtomicBool::new(false)),
            has_priority: Arc::new(AtomicBool::new(true)),
            data_version: Arc::new(AtomicU64::new(0)),
            sx: size.cols,
            sy: size.rows,
        }
    }

    /// Snapshot the scrollback plus visible screen for copy mode.
    pub fn create_copy_document(&self) -> CopyDocument {
        match self.terminal.lock() {
            Ok(term) => copy_mode::create_copy_document(&term.screen),
            Err(_) => CopyDocument::default(),
        }
    }

    /// Name of the foreground process in this PTY, or None when unknown.
    pub fn get_name(&self) -> Option<String> {
        #[cfg(target_os = "linux")]
        {
            let pgrp = self.master.process_group_leader()?;
            let cmdline = std::fs::read(format!("/proc/{}/cmdline", pgrp)).ok()?;
            let first = cmdline.split(|b| *b == 0).next()?;
            if first.is_empty() {
                return None;
            }
            let name = String::from_utf8_lossy(first).to_string();
            Some(
                std::path::Path::new(&name)
                    .file_name()
                    .map(|f| f.to_string_lossy().into_owned())
                    .unwrap_or(name),
            )
        }
        #[cfg(not(target_os = "linux"))]
        {
            None
        }
    }

    /// Working directory of the child, used to start new panes in the same
    /// place.
    pub fn get_cwd(&self) -> Option<PathBuf> {
        #[cfg(target_os = "linux")]
        {
            let pid = self.pid?;
            std::fs::read_link(format!("/proc/{}/cwd", pid)).ok()
        }
        #[cfg(not(target_os = "linux"))]
        {
            None
        }
    }
}

impl std::fmt::Debug for Process {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Process")
            .field("pid", &self.pid)
            .field("terminated", &self.is_terminated())
            .field("size", &(self.sx, self.sy))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn utf8_decoder_carries_partial_sequences() {
        let mut decoder = Utf8Decoder::default();
        let bytes = "héllo".as_bytes();
        // Split inside the two-byte 'é'.
        let first = decoder.decode(&bytes[..2]);
        let second = decoder.decode(&bytes[2..]);
        assert_eq!(format!("{}{}", first, second), "héllo");
    }

    #[test]
    fn utf8_decoder_replaces_invalid_bytes() {
        let mut decoder = Utf8Decoder::default();
        let out = decoder.decode(&[b'a', 0xff, b'b']);
        assert_eq!(out, "a\u{fffd}b");
    }

    #[test]
    fn bracketed_paste_wraps_pasted_input() {
        let dir = tempfile::tempdir().unwrap();
        let out_path = dir.path().join("paste.txt");

        let mut process = Process::spawn(
            ProcessOptions {
                command: Some(format!("tee {}", out_path.display())),
                start_directory: None,
                fallback_directory: std::env::temp_dir(),
                term: "xterm-256color".to_string(),
                pymux_env: None,
                default_shell: "/bin/sh".to_string(),
            },
            Arc::new(AtomicUsize::new(2000)),
            Arc::new(AtomicBool::new(false)),
            Box::new(|| {}),
            Box::new(|| {}),
        )
        .unwrap();

        // The child asked for bracketed paste.
        process
            .terminal
            .lock()
            .unwrap()
            .screen
            .set_mode(&[2004], true);

        process.write_input("abc\n", true);
        // A trailing newline pushes the close marker through the canonical
        // line discipline.
        process.write_bytes(b"\n");

        let deadline = Instant::now() + Duration::from_secs(5);
        let text = loop {
            let content = std::fs::read(&out_path).unwrap_or_default();
            let text = String::from_utf8_lossy(&content).into_owned();
            if text.contains("\x1b[201~") || Instant::now() > deadline {
                break text;
            }
            thread::sleep(Duration::from_millis(50));
        };

        assert!(text.contains("\x1b[200~abc"), "missing open marker in {:?}", text);
        assert!(text.contains("\x1b[201~"), "missing close marker in {:?}", text);

        process.kill();
    }

    #[test]
    fn paste_without_bracketed_mode_is_plain() {
        let process = Process::open_for_tests();
        // The mode is off by default; write_input must not wrap.
        assert!(!process
            .terminal
            .lock()
            .unwrap()
            .screen
            .bracketed_paste_enabled());
        // No child is attached, so this only checks that the write path
        // doesn't panic.
        process.write_input("abc", true);
    }

    #[test]
    fn terminal_feed_handles_split_escape() {
        let (screen, _rx) = crate::screen::tests::test_screen(24, 80);
        let mut terminal = Terminal::new(screen);
        terminal.feed(b"ab\x1b[");
        terminal.feed(b"1;31mc");
        assert_eq!(terminal.screen.visible_row_text(0), "abc");
        let cell = terminal.screen.data_buffer.get(&0).unwrap().get(&2).unwrap();
        assert_eq!(cell.attrs.fg, crate::screen::Color::Idx(1));
    }
}
