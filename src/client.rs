//! The interactive client.
//!
//! `attach` connects to a server socket, reports its terminal size, puts the
//! terminal into raw mode on the server's request, and multiplexes between
//! its own stdin (forwarded in small `in` packets) and the socket (rendered
//! output, mode transitions, suspend requests). `run_command` dispatches a
//! single command over the same socket and exits without attaching.

use std::io::{self, Read, Write};
use std::os::unix::net::UnixStream;
use std::path::Path;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use crossterm::terminal;
use tracing::debug;

use crate::transport::{
    send_message, ClientMessage, ColorDepth, FrameReader, ServerMessage, TtyMode,
};

/// Input is forwarded in chunks of at most this size.
const INPUT_CHUNK: usize = 4056;

enum Event {
    Server(ServerMessage),
    Stdin(String),
    ServerClosed,
    StdinClosed,
}

fn send_size(stream: &mut UnixStream) -> io::Result<()> {
    let (columns, rows) = terminal::size().unwrap_or((80, 24));
    send_message(stream, &ClientMessage::Size { data: (rows, columns) })
}

/// Attach to the server at `socket_path` and run until detached.
pub fn attach(socket_path: &Path, detach_others: bool, color_depth: ColorDepth) -> io::Result<()> {
    let mut stream = UnixStream::connect(socket_path)?;

    send_size(&mut stream)?;
    send_message(
        &mut stream,
        &ClientMessage::StartGui {
            detach_others,
            color_depth,
            term: std::env::var("TERM").unwrap_or_default(),
        },
    )?;

    let (tx, rx) = mpsc::channel::<Event>();

    // Socket reader thread.
    {
        let mut reader_stream = stream.try_clone()?;
        let tx = tx.clone();
        thread::spawn(move || {
            let mut reader = FrameReader::new();
            loop {
                match reader.read_frames(&mut reader_stream) {
                    Ok(Some(frames)) => {
                        for frame in frames {
                            if let Ok(message) = serde_json::from_slice::<ServerMessage>(&frame) {
                                if tx.send(Event::Server(message)).is_err() {
                                    return;
                                }
                            }
                        }
                    }
                    Ok(None) | Err(_) => {
                        let _ = tx.send(Event::ServerClosed);
                        return;
                    }
                }
            }
        });
    }

    // Stdin reader thread. Raw bytes, decoded with replacement; binary junk
    // inside escape sequences must not break the stream.
    {
        let tx = tx.clone();
        thread::spawn(move || {
            let mut stdin = io::stdin();
            let mut buf = [0u8; INPUT_CHUNK];
            loop {
                match stdin.read(&mut buf) {
                    Ok(0) => {
                        let _ = tx.send(Event::StdinClosed);
                        return;
                    }
                    Ok(n) => {
                        let text = String::from_utf8_lossy(&buf[..n]).into_owned();
                        if tx.send(Event::Stdin(text)).is_err() {
                            return;
                        }
                    }
                    Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    Err(_) => {
                        let _ = tx.send(Event::StdinClosed);
                        return;
                    }
                }
            }
        });
    }

    let result = event_loop(&mut stream, &rx);

    // Leave the terminal usable no matter how the session ended.
    let _ = terminal::disable_raw_mode();
    let mut stdout = io::stdout();
    let _ = stdout.write_all(b"\x1b[?1049l\x1b[?25h\x1b[0m\r\n");
    let _ = stdout.flush();

    debug!("detached");
    result
}

fn event_loop(stream: &mut UnixStream, rx: &mpsc::Receiver<Event>) -> io::Result<()> {
    let mut raw_depth: usize = 0;
    let mut last_size = terminal::size().unwrap_or((80, 24));
    loop {
        // The terminal size is polled between events; a change is reported
        // to the server like a SIGWINCH would be.
        match rx.recv_timeout(Duration::from_millis(200)) {
            Ok(Event::Server(ServerMessage::Out { data })) => {
                let mut stdout = io::stdout();
                stdout.write_all(data.as_bytes())?;
                stdout.flush()?;
            }
            Ok(Event::Server(ServerMessage::Mode { data })) => match data {
                TtyMode::Raw => {
                    terminal::enable_raw_mode()?;
                    raw_depth += 1;
                }
                TtyMode::Cooked => {
                    terminal::disable_raw_mode()?;
                }
                TtyMode::Restore => {
                    if raw_depth > 0 {
                        raw_depth -= 1;
                    }
                    if raw_depth == 0 {
                        terminal::disable_raw_mode()?;
                    }
                }
            },
            Ok(Event::Server(ServerMessage::Suspend)) => {
                terminal::disable_raw_mode()?;
                unsafe {
                    libc::raise(libc::SIGTSTP);
                }
                terminal::enable_raw_mode()?;
                send_size(stream)?;
            }
            Ok(Event::Stdin(text)) => {
                let mut start = 0;
                while start < text.len() {
                    let mut end = (start + INPUT_CHUNK).min(text.len());
                    while !text.is_char_boundary(end) {
                        end -= 1;
                    }
                    send_message(
                        stream,
                        &ClientMessage::Input { data: text[start..end].to_string() },
                    )?;
                    start = end;
                }
            }
            Ok(Event::ServerClosed) | Ok(Event::StdinClosed) => break Ok(()),
            Err(mpsc::RecvTimeoutError::Timeout) => {}
            Err(mpsc::RecvTimeoutError::Disconnected) => break Ok(()),
        }

        let size = terminal::size().unwrap_or(last_size);
        if size != last_size {
            last_size = size;
            send_size(stream)?;
        }
    }
}

/// Ask the server to run one command, print anything it sends back, and
/// disconnect without entering the attach loop.
pub fn run_command(socket_path: &Path, command: &str, pane_id: Option<usize>) -> io::Result<()> {
    let mut stream = UnixStream::connect(socket_path)?;
    send_message(
        &mut stream,
        &ClientMessage::RunCommand { data: command.to_string(), pane_id },
    )?;
    // Half-close our side so the server sees EOF once it is done.
    stream.shutdown(std::net::Shutdown::Write)?;

    let mut reader = FrameReader::new();
    loop {
        match reader.read_frames(&mut stream) {
            Ok(Some(frames)) => {
                for frame in frames {
                    if let Ok(ServerMessage::Out { data }) =
                        serde_json::from_slice::<ServerMessage>(&frame)
                    {
                        print!("{}", data);
                    }
                }
            }
            Ok(None) | Err(_) => break,
        }
    }
    io::stdout().flush()?;
    Ok(())
}
