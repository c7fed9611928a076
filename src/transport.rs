//! Client/server transport.
//!
//! A local stream socket carries UTF-8 JSON objects, each terminated by a
//! single NUL byte. The receiver buffers and splits on NUL; a malformed
//! frame is logged and dropped without killing the connection.

use std::io::{self, Read, Write};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::info;

#[derive(Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Debug, Default)]
pub enum ColorDepth {
    #[serde(rename = "4bit")]
    Ansi,
    #[serde(rename = "8bit")]
    #[default]
    Default,
    #[serde(rename = "24bit")]
    True,
}

#[derive(Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Debug)]
#[serde(rename_all = "lowercase")]
pub enum TtyMode {
    Raw,
    Cooked,
    Restore,
}

/// Packets a client sends to the server.
#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(tag = "cmd")]
pub enum ClientMessage {
    /// The client's terminal size: [rows, cols].
    #[serde(rename = "size")]
    Size { data: (u16, u16) },
    /// Raw keystrokes from the client's stdin.
    #[serde(rename = "in")]
    Input { data: String },
    /// Begin an attached session.
    #[serde(rename = "start-gui")]
    StartGui {
        #[serde(rename = "detach-others")]
        detach_others: bool,
        #[serde(rename = "color-depth")]
        color_depth: ColorDepth,
        term: String,
    },
    /// Execute one command, then disconnect.
    #[serde(rename = "run-command")]
    RunCommand {
        data: String,
        #[serde(default)]
        pane_id: Option<usize>,
    },
}

/// Packets the server sends to a client.
#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(tag = "cmd")]
pub enum ServerMessage {
    /// Bytes to write to the client's terminal.
    #[serde(rename = "out")]
    Out { data: String },
    /// Request a TTY mode transition on the client.
    #[serde(rename = "mode")]
    Mode { data: TtyMode },
    /// The client should SIGTSTP itself.
    #[serde(rename = "suspend")]
    Suspend,
}

/// Serialize a message and write it with the NUL terminator.
pub fn send_message<T: Serialize>(stream: &mut UnixStream, message: &T) -> io::Result<()> {
    let mut bytes = serde_json::to_vec(message)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    bytes.push(0);
    stream.write_all(&bytes)
}

/// Incremental frame splitter for the NUL-delimited protocol.
#[derive(Default)]
pub struct FrameReader {
    buffer: Vec<u8>,
}

impl FrameReader {
    pub fn new() -> Self {
        FrameReader::default()
    }

    /// Read once from the stream and return all complete frames. `None`
    /// signals a closed connection.
    pub fn read_frames(&mut self, stream: &mut UnixStream) -> io::Result<Option<Vec<Vec<u8>>>> {
        let mut chunk = [0u8; 4096];
        let n = stream.read(&mut chunk)?;
        if n == 0 {
            return Ok(None);
        }
        self.buffer.extend_from_slice(&chunk[..n]);
        Ok(Some(self.take_frames()))
    }

    /// Split off every complete NUL-terminated frame from the buffer.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<Vec<u8>> {
        self.buffer.extend_from_slice(bytes);
        self.take_frames()
    }

    fn take_frames(&mut self) -> Vec<Vec<u8>> {
        let mut frames = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == 0) {
            let mut frame: Vec<u8> = self.buffer.drain(..=pos).collect();
            frame.pop(); // the NUL
            frames.push(frame);
        }
        frames
    }
}

fn username() -> String {
    std::env::var("USER")
        .or_else(|_| std::env::var("LOGNAME"))
        .unwrap_or_else(|_| "unknown".to_string())
}

/// Default socket path for the given instance index.
pub fn socket_path(index: usize) -> PathBuf {
    std::env::temp_dir().join(format!("pymux.sock.{}.{}", username(), index))
}

/// Bind the server socket. With an explicit path, bind exactly there;
/// otherwise probe `pymux.sock.<user>.<n>` for the first free index, up to
/// 100 attempts (leftover sockets from crashed servers occupy slots).
/// The socket file is created with umask 0027.
pub fn bind_socket(socket_name: Option<&str>) -> io::Result<(String, UnixListener)> {
    let old_umask = unsafe { libc::umask(0o027) };
    let result = bind_socket_inner(socket_name);
    unsafe { libc::umask(old_umask) };
    result
}

fn bind_socket_inner(socket_name: Option<&str>) -> io::Result<(String, UnixListener)> {
    if let Some(name) = socket_name {
        let listener = UnixListener::bind(name)?;
        info!(socket = name, "listening");
        return Ok((name.to_string(), listener));
    }

    for index in 0..100 {
        let path = socket_path(index);
        match UnixListener::bind(&path) {
            Ok(listener) => {
                let name = path.to_string_lossy().into_owned();
                info!(socket = %name, "listening");
                return Ok((name, listener));
            }
            Err(e) if e.kind() == io::ErrorKind::AddrInUse => continue,
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
            Err(e) => return Err(e),
        }
    }

    Err(io::Error::new(io::ErrorKind::AddrInUse, "no free pymux socket slot"))
}

/// All pymux sockets of the current user, for `attach` without `-S` and for
/// `list-sessions`.
pub fn discover_sockets() -> Vec<PathBuf> {
    let pattern = std::env::temp_dir().join(format!("pymux.sock.{}.*", username()));
    let mut out = Vec::new();
    if let Ok(paths) = glob::glob(&pattern.to_string_lossy()) {
        for path in paths.flatten() {
            out.push(path);
        }
    }
    out.sort();
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_reader_splits_on_nul() {
        let mut reader = FrameReader::new();
        let frames = reader.feed(b"{\"a\":1}\0{\"b\":2}\0");
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0], b"{\"a\":1}");
        assert_eq!(frames[1], b"{\"b\":2}");
    }

    #[test]
    fn frame_reader_handles_partial_frames() {
        let mut reader = FrameReader::new();
        assert!(reader.feed(b"{\"cmd\":").is_empty());
        let frames = reader.feed(b"\"size\",\"data\":[24,80]}\0{");
        assert_eq!(frames.len(), 1);

        let message: ClientMessage = serde_json::from_slice(&frames[0]).unwrap();
        match message {
            ClientMessage::Size { data } => assert_eq!(data, (24, 80)),
            _ => panic!("wrong message type"),
        }
    }

    #[test]
    fn messages_round_trip() {
        let messages = vec![
            ClientMessage::Size { data: (30, 100) },
            ClientMessage::Input { data: "ls\r".into() },
            ClientMessage::StartGui {
                detach_others: true,
                color_depth: ColorDepth::True,
                term: "xterm-256color".into(),
            },
            ClientMessage::RunCommand { data: "new-window -n foo".into(), pane_id: Some(1001) },
        ];
        for message in messages {
            let json = serde_json::to_string(&message).unwrap();
            let back: ClientMessage = serde_json::from_str(&json).unwrap();
            assert_eq!(
                serde_json::to_string(&back).unwrap(),
                json,
                "round trip mismatch for {}",
                json
            );
        }
    }

    #[test]
    fn server_messages_use_cmd_tag() {
        let json = serde_json::to_string(&ServerMessage::Out { data: "x".into() }).unwrap();
        assert!(json.contains("\"cmd\":\"out\""));
        let json = serde_json::to_string(&ServerMessage::Mode { data: TtyMode::Raw }).unwrap();
        assert!(json.contains("\"mode\""));
        assert!(json.contains("\"raw\""));
    }

    #[test]
    fn malformed_json_is_detectable_not_fatal() {
        let mut reader = FrameReader::new();
        let frames = reader.feed(b"not json\0{\"cmd\":\"suspend\"}\0");
        assert_eq!(frames.len(), 2);
        assert!(serde_json::from_slice::<ClientMessage>(&frames[0]).is_err());
        let ok: ServerMessage = serde_json::from_slice(&frames[1]).unwrap();
        assert!(matches!(ok, ServerMessage::Suspend));
    }
}
