//! Per-client connection reader.
//!
//! Each accepted connection gets a thread that splits the NUL-framed JSON
//! stream into packets and forwards them to the server loop. Malformed JSON
//! is logged and dropped; the connection stays alive.

use std::os::unix::net::UnixStream;
use std::sync::mpsc;

use tracing::{debug, warn};

use crate::arrangement::ClientId;
use crate::transport::{ClientMessage, FrameReader};

use super::ServerRequest;

pub(crate) fn handle_connection(
    mut stream: UnixStream,
    client: ClientId,
    tx: mpsc::Sender<ServerRequest>,
) {
    let writer = match stream.try_clone() {
        Ok(writer) => writer,
        Err(_) => return,
    };
    if tx.send(ServerRequest::ClientConnected(client, writer)).is_err() {
        return;
    }
    debug!(client, "client connected");

    let mut reader = FrameReader::new();
    loop {
        match reader.read_frames(&mut stream) {
            Ok(Some(frames)) => {
                for frame in frames {
                    match serde_json::from_slice::<ClientMessage>(&frame) {
                        Ok(message) => {
                            if tx.send(ServerRequest::ClientPacket(client, message)).is_err() {
                                return;
                            }
                        }
                        Err(e) => {
                            warn!(client, error = %e, "received invalid JSON from client, ignoring");
                        }
                    }
                }
            }
            Ok(None) | Err(_) => break,
        }
    }

    debug!(client, "client disconnected");
    let _ = tx.send(ServerRequest::ClientGone(client));
}
