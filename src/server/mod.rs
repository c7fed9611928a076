//! The server core.
//!
//! One `Pymux` instance owns the arrangement, the per-client states, the
//! options and the key binding table. All mutations happen on the server
//! loop thread, which drains a channel fed by the accept loop, the
//! per-connection readers, the per-process wait threads and the auto-refresh
//! tick.

mod connection;

use std::collections::HashMap;
use std::io;
use std::os::unix::net::UnixStream;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::arrangement::{self, Arrangement, ClientId, Pane};
use crate::commands;
use crate::keybind::{self, KeyBindings};
use crate::keys::InputParser;
use crate::layout;
use crate::options::Justify;
use crate::process::{Process, ProcessOptions};
use crate::rc::STARTUP_COMMANDS;
use crate::render::{BasicRenderer, Renderer};
use crate::transport::{self, ClientMessage, ColorDepth, ServerMessage, TtyMode};

/// Minimum gap between audible bells forwarded to clients.
const BELL_INTERVAL: Duration = Duration::from_millis(100);

pub enum ServerRequest {
    ClientConnected(ClientId, UnixStream),
    ClientPacket(ClientId, ClientMessage),
    ClientGone(ClientId),
    ProcessExited(usize),
    Bell,
    Invalidate,
}

/// State that is independent for each client.
pub struct ClientState {
    pub client_id: ClientId,
    /// (rows, columns) as last reported by the client.
    pub size: (u16, u16),
    pub color_depth: ColorDepth,
    pub term: String,
    /// False for the transient state of a run-command connection.
    pub attached: bool,

    /// True right after the prefix key was pressed.
    pub has_prefix: bool,
    /// Transient status message.
    pub message: Option<String>,

    pub command_mode: bool,
    pub command_buffer: String,

    /// Prompt text and the command template with `%%` substitution.
    pub prompt_text: Option<String>,
    pub prompt_command: Option<String>,
    pub prompt_buffer: String,

    /// Confirmation prompt and the command to run on 'y'.
    pub confirm_text: Option<String>,
    pub confirm_command: Option<String>,

    /// (title, body) of a visible popup.
    pub display_popup: Option<(String, String)>,
    pub display_pane_numbers: bool,

    pub input_parser: InputParser,
    pub needs_redraw: bool,

    writer: Option<UnixStream>,
    renderer: Option<Box<dyn Renderer>>,
}

impl ClientState {
    fn new(client_id: ClientId) -> ClientState {
        ClientState {
            client_id,
            size: (24, 80),
            color_depth: ColorDepth::default(),
            term: "xterm".to_string(),
            attached: false,
            has_prefix: false,
            message: None,
            command_mode: false,
            command_buffer: String::new(),
            prompt_text: None,
            prompt_command: None,
            prompt_buffer: String::new(),
            confirm_text: None,
            confirm_command: None,
            display_popup: None,
            display_pane_numbers: false,
            input_parser: InputParser::new(),
            needs_redraw: false,
            writer: None,
            renderer: None,
        }
    }
}

type RendererFactory = Box<dyn Fn(ColorDepth, &str) -> Box<dyn Renderer> + Send>;

pub struct Pymux {
    pub arrangement: Arrangement,
    pub key_bindings: KeyBindings,
    /// The paste buffer, filled by copy-mode yanks.
    pub clipboard: String,
    pub session_name: String,

    // Options.
    pub enable_mouse_support: bool,
    pub enable_status: bool,
    pub enable_bell: bool,
    pub remain_on_exit: bool,
    pub status_keys_vi_mode: bool,
    pub mode_keys_vi_mode: bool,
    pub history_limit: Arc<AtomicUsize>,
    pub status_interval: Arc<AtomicU64>,
    pub default_terminal: String,
    pub default_shell: String,
    pub status_left: String,
    pub status_left_length: usize,
    pub status_right: String,
    pub status_right_length: usize,
    pub status_justify: Justify,
    pub window_status_format: String,
    pub window_status_current_format: String,

    /// CWD for panes when nothing better is known.
    pub original_cwd: PathBuf,
    pub socket_name: Option<String>,
    pub source_file: Option<PathBuf>,
    pub startup_command: Option<String>,

    client_states: HashMap<ClientId, ClientState>,
    renderer_factory: RendererFactory,
    startup_done: bool,
    exit_requested: bool,
    last_bell: Option<Instant>,

    tx: mpsc::Sender<ServerRequest>,
    output_ready: Arc<AtomicBool>,
}

fn get_default_shell() -> String {
    if let Ok(shell) = std::env::var("SHELL") {
        if !shell.is_empty() {
            return shell;
        }
    }
    which::which("bash")
        .or_else(|_| which::which("sh"))
        .map(|p| p.to_string_lossy().into_owned())
        .unwrap_or_else(|_| "/bin/sh".to_string())
}

impl Pymux {
    pub fn new(tx: mpsc::Sender<ServerRequest>) -> Pymux {
        Pymux {
            arrangement: Arrangement::new(),
            key_bindings: KeyBindings::new(),
            clipboard: String::new(),
            session_name: "0".to_string(),
            enable_mouse_support: true,
            enable_status: true,
            enable_bell: true,
            remain_on_exit: false,
            status_keys_vi_mode: false,
            mode_keys_vi_mode: false,
            history_limit: Arc::new(AtomicUsize::new(2000)),
            status_interval: Arc::new(AtomicU64::new(4)),
            default_terminal: "xterm-256color".to_string(),
            default_shell: get_default_shell(),
            status_left: "[#S] ".to_string(),
            status_left_length: 20,
            status_right: " %H:%M %d-%b-%y ".to_string(),
            status_right_length: 20,
            status_justify: Justify::Left,
            window_status_format: "#I:#W".to_string(),
            window_status_current_format: "#I:#W".to_string(),
            original_cwd: std::env::current_dir().unwrap_or_else(|_| PathBuf::from("/")),
            socket_name: None,
            source_file: None,
            startup_command: None,
            client_states: HashMap::new(),
            renderer_factory: Box::new(|_, _| Box::new(BasicRenderer::new())),
            startup_done: false,
            exit_requested: false,
            last_bell: None,
            tx,
            output_ready: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Install the renderer used for attaching clients. The default is the
    /// built-in plain-text renderer.
    pub fn set_renderer_factory(&mut self, factory: RendererFactory) {
        self.renderer_factory = factory;
    }

    pub fn get_client_state(&mut self, client: ClientId) -> &mut ClientState {
        self.client_states
            .entry(client)
            .or_insert_with(|| ClientState::new(client))
    }

    pub fn client_ids(&self) -> Vec<ClientId> {
        self.client_states.keys().copied().collect()
    }

    /// Set a transient message shown at the bottom until a key is pressed.
    pub fn show_message(&mut self, client: ClientId, message: String) {
        self.get_client_state(client).message = Some(message);
        self.invalidate();
    }

    pub fn display_popup(&mut self, client: ClientId, title: &str, body: String) {
        self.get_client_state(client).display_popup = Some((title.to_string(), body));
        self.invalidate();
    }

    /// Flag every attached client for redraw. Rendering happens at the end
    /// of the loop iteration, so repeated invalidations coalesce.
    pub fn invalidate(&mut self) {
        for state in self.client_states.values_mut() {
            state.needs_redraw = true;
        }
    }

    pub fn handle_command(&mut self, client: ClientId, input: &str) {
        commands::handle_command(self, client, input);
    }

    /// Leave the command/prompt mode and clear the associated buffers.
    pub fn leave_command_mode(&mut self, client: ClientId, _append_to_history: bool) {
        let state = self.get_client_state(client);
        state.command_mode = false;
        state.command_buffer.clear();
        state.prompt_text = None;
        state.prompt_command = None;
        state.prompt_buffer.clear();
        state.confirm_text = None;
        state.confirm_command = None;
    }

    fn create_pane(
        &mut self,
        client: Option<ClientId>,
        command: Option<String>,
        start_directory: Option<PathBuf>,
    ) -> io::Result<Pane> {
        let pane_id = arrangement::reserve_pane_id();

        // Start where the active process lives, unless told otherwise.
        let start_directory = start_directory.or_else(|| {
            client
                .and_then(|c| self.arrangement.get_active_window(c))
                .and_then(|w| w.active_pane())
                .and_then(|p| p.process.get_cwd())
        });

        let pymux_env = self
            .socket_name
            .as_ref()
            .map(|socket| format!("{},{}", socket, pane_id));

        let options = ProcessOptions {
            command,
            start_directory,
            fallback_directory: self.original_cwd.clone(),
            term: self.default_terminal.clone(),
            pymux_env,
            default_shell: self.default_shell.clone(),
        };

        let bell_tx = self.tx.clone();
        let done_tx = self.tx.clone();
        let process = Process::spawn(
            options,
            self.history_limit.clone(),
            self.output_ready.clone(),
            Box::new(move || {
                let _ = bell_tx.send(ServerRequest::Bell);
            }),
            Box::new(move || {
                let _ = done_tx.send(ServerRequest::ProcessExited(pane_id));
            }),
        )?;

        info!(pane_id, "created process");
        Ok(Pane::with_id(pane_id, process))
    }

    /// Create a new window running `command` (or the default shell).
    pub fn create_window(
        &mut self,
        client: Option<ClientId>,
        command: Option<String>,
        start_directory: Option<PathBuf>,
        name: Option<String>,
    ) -> io::Result<()> {
        let pane = self.create_pane(client, command, start_directory)?;
        self.arrangement.create_window(client, pane, name, true);
        self.invalidate();
        Ok(())
    }

    /// Add a pane to the client's active window.
    pub fn add_process(
        &mut self,
        client: ClientId,
        command: Option<String>,
        vsplit: bool,
        start_directory: Option<PathBuf>,
    ) -> io::Result<()> {
        let pane = self.create_pane(Some(client), command, start_directory)?;
        match self.arrangement.get_active_window(client) {
            Some(window) => window.add_pane(pane, vsplit),
            None => {
                self.arrangement.create_window(Some(client), pane, None, true);
            }
        }
        self.invalidate();
        Ok(())
    }

    /// Kill a pane's process and remove it from the arrangement.
    pub fn kill_pane(&mut self, pane_id: usize) {
        if let Some(pane) = self.arrangement.pane_mut(pane_id) {
            pane.process.kill();
        }
        self.arrangement.remove_pane(pane_id);
        if self.startup_done && !self.arrangement.has_panes() {
            self.exit_requested = true;
        }
        self.invalidate();
    }

    pub fn detach_client(&mut self, client: ClientId) {
        self.send_to_client(client, &ServerMessage::Mode { data: TtyMode::Restore });
        self.remove_connection(client);
    }

    pub fn suspend_client(&mut self, client: ClientId) {
        self.send_to_client(client, &ServerMessage::Suspend);
    }

    fn send_to_client(&mut self, client: ClientId, message: &ServerMessage) {
        let Some(state) = self.client_states.get_mut(&client) else { return };
        let Some(writer) = state.writer.as_mut() else { return };
        if transport::send_message(writer, message).is_err() {
            // A dead connection: drop it from the active set.
            state.writer = None;
            self.remove_connection(client);
        }
    }

    fn remove_connection(&mut self, client: ClientId) {
        self.client_states.remove(&client);
        self.arrangement.remove_client(client);
        self.update_priorities();
        self.invalidate();
    }

    /// The size for a window: the per-dimension minimum over all attached
    /// clients focusing it, minus the status line. None when nobody watches.
    pub fn window_size_for_window(&self, window_id: usize) -> Option<(u16, u16)> {
        let sizes: Vec<(u16, u16)> = self
            .arrangement
            .clients_watching(window_id)
            .into_iter()
            .filter_map(|c| self.client_states.get(&c))
            .filter(|s| s.attached)
            .map(|s| s.size)
            .collect();
        if sizes.is_empty() {
            return None;
        }
        let rows = sizes.iter().map(|s| s.0).min().unwrap_or(24);
        let columns = sizes.iter().map(|s| s.1).min().unwrap_or(80);
        let status = if self.enable_status { 1 } else { 0 };
        Some((rows.saturating_sub(status), columns))
    }

    /// Push window sizes down into pane PTYs, and sync the split weights to
    /// cell counts so resize commands move borders one cell per unit.
    fn apply_window_sizes(&mut self) {
        let window_ids: Vec<usize> = self.arrangement.windows.iter().map(|w| w.window_id).collect();
        for window_id in window_ids {
            let Some((rows, columns)) = self.window_size_for_window(window_id) else { continue };
            let Some(window) = self.arrangement.window_by_id_mut(window_id) else { continue };
            layout::sync_weights_to_sizes(window, rows, columns);
            for (pane_id, rect) in layout::compute_pane_rects(window, rows, columns) {
                if let Some(pane) = window.pane_mut(pane_id) {
                    pane.process.set_size(rect.width, rect.height);
                }
            }
        }
    }

    fn update_priorities(&mut self) {
        let pane_ids: Vec<usize> = self
            .arrangement
            .windows
            .iter()
            .flat_map(|w| w.pane_ids())
            .collect();
        for pane_id in pane_ids {
            let priority = self.arrangement.pane_has_priority(pane_id);
            if let Some(pane) = self.arrangement.pane(pane_id) {
                pane.process.set_has_priority(priority);
            }
        }
    }

    /// Run the startup commands once the first client is there: default key
    /// bindings, the sourced config file, and the initial window.
    fn startup(&mut self, client: ClientId) {
        if self.startup_done {
            return;
        }
        self.startup_done = true;

        for line in STARTUP_COMMANDS.lines() {
            self.handle_command(client, line);
        }

        if let Some(source_file) = self.source_file.clone() {
            commands::call_command_handler(
                self,
                client,
                "source-file",
                vec![source_file.to_string_lossy().into_owned()],
            );
        }

        if !self.arrangement.has_panes() {
            let command = self.startup_command.clone();
            if let Err(e) = self.create_window(Some(client), command, None, None) {
                warn!(error = %e, "could not create the initial window");
            }
        }
    }

    pub fn handle_request(&mut self, request: ServerRequest) {
        match request {
            ServerRequest::ClientConnected(client, writer) => {
                let state = self.get_client_state(client);
                state.writer = Some(writer);
            }
            ServerRequest::ClientPacket(client, message) => {
                self.handle_packet(client, message);
            }
            ServerRequest::ClientGone(client) => {
                self.remove_connection(client);
            }
            ServerRequest::ProcessExited(pane_id) => {
                debug!(pane_id, "process terminated");
                if self.remain_on_exit {
                    // The pane stays visible with its terminated flag set.
                    self.invalidate();
                } else {
                    self.arrangement.remove_pane(pane_id);
                    if self.startup_done && !self.arrangement.has_panes() {
                        self.exit_requested = true;
                    }
                    self.invalidate();
                }
            }
            ServerRequest::Bell => {
                if !self.enable_bell {
                    return;
                }
                let now = Instant::now();
                if self.last_bell.map_or(false, |t| now.duration_since(t) < BELL_INTERVAL) {
                    return;
                }
                self.last_bell = Some(now);
                for client in self.client_ids() {
                    if self.client_states.get(&client).map_or(false, |s| s.attached) {
                        self.send_to_client(
                            client,
                            &ServerMessage::Out { data: "\x07".to_string() },
                        );
                    }
                }
            }
            ServerRequest::Invalidate => {
                self.invalidate();
            }
        }
    }

    pub fn handle_packet(&mut self, client: ClientId, message: ClientMessage) {
        match message {
            ClientMessage::Size { data } => {
                self.get_client_state(client).size = data;
                self.invalidate();
            }
            ClientMessage::Input { data } => {
                let mut keys = Vec::new();
                {
                    let state = self.get_client_state(client);
                    let mut parser = std::mem::take(&mut state.input_parser);
                    parser.feed(&data, &mut keys);
                    parser.flush(&mut keys);
                    self.get_client_state(client).input_parser = parser;
                }
                for key in keys {
                    keybind::handle_key(self, client, key);
                }
            }
            ClientMessage::StartGui { detach_others, color_depth, term } => {
                if detach_others {
                    for other in self.client_ids() {
                        if other != client {
                            let attached =
                                self.client_states.get(&other).map_or(false, |s| s.attached);
                            if attached {
                                self.detach_client(other);
                            }
                        }
                    }
                }

                let renderer = (self.renderer_factory)(color_depth, &term);
                {
                    let state = self.get_client_state(client);
                    state.attached = true;
                    state.color_depth = color_depth;
                    state.term = term;
                    state.renderer = Some(renderer);
                }
                self.send_to_client(client, &ServerMessage::Mode { data: TtyMode::Raw });

                self.startup(client);
                // Make sure the client has a window focused.
                let _ = self.arrangement.active_window_id(client);
                self.invalidate();
            }
            ClientMessage::RunCommand { data, pane_id } => {
                // A transient client: execute in the context of the window
                // holding the given pane, then close the connection without
                // entering the attach loop.
                self.startup(client);
                if let Some(pane_id) = pane_id {
                    self.arrangement.set_active_window_from_pane_id(client, pane_id);
                }
                self.handle_command(client, &data);

                // Anything a popup-producing command generated goes back as
                // plain output.
                let state = self.get_client_state(client);
                let mut output = String::new();
                if let Some((_, body)) = state.display_popup.take() {
                    output.push_str(&body);
                    output.push('\n');
                }
                if let Some(message) = state.message.take() {
                    output.push_str(&message);
                    output.push('\n');
                }
                if !output.is_empty() {
                    self.send_to_client(client, &ServerMessage::Out { data: output });
                }
                self.remove_connection(client);
            }
        }
    }

    fn render_pass(&mut self) {
        for client in self.client_ids() {
            let due = self
                .client_states
                .get(&client)
                .map_or(false, |s| s.attached && s.needs_redraw && s.renderer.is_some());
            if !due {
                continue;
            }
            let Some(mut renderer) = self
                .client_states
                .get_mut(&client)
                .and_then(|s| s.renderer.take())
            else {
                continue;
            };
            let output = renderer.render(self, client);
            if let Some(state) = self.client_states.get_mut(&client) {
                state.renderer = Some(renderer);
                state.needs_redraw = false;
            }
            if !output.is_empty() {
                self.send_to_client(client, &ServerMessage::Out { data: output });
            }
        }
    }

    /// The server loop: drain requests, push sizes and priorities, render.
    /// Returns when the last pane is gone.
    pub fn run_loop(&mut self, rx: &mpsc::Receiver<ServerRequest>) {
        loop {
            match rx.recv_timeout(Duration::from_millis(50)) {
                Ok(request) => {
                    self.handle_request(request);
                    while let Ok(more) = rx.try_recv() {
                        self.handle_request(more);
                    }
                }
                Err(mpsc::RecvTimeoutError::Timeout) => {}
                Err(mpsc::RecvTimeoutError::Disconnected) => break,
            }

            if self.output_ready.swap(false, Ordering::AcqRel) {
                self.invalidate();
            }

            self.apply_window_sizes();
            self.update_priorities();
            self.render_pass();

            if self.exit_requested || (self.startup_done && !self.arrangement.has_panes()) {
                break;
            }
        }

        // Let every attached client restore its terminal before the socket
        // goes away.
        for client in self.client_ids() {
            self.send_to_client(client, &ServerMessage::Mode { data: TtyMode::Restore });
        }
        info!("server loop finished");
    }
}

/// Write the panic to a crash file in the temp directory; a daemonized
/// server has no stderr anyone could read.
fn install_crash_hook() {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        let path = std::env::temp_dir().join(format!("pymux.crash-{}", std::process::id()));
        let backtrace = std::backtrace::Backtrace::force_capture();
        let _ = std::fs::write(&path, format!("{panic_info}\n\nBacktrace:\n{backtrace}"));
        default_hook(panic_info);
    }));
}

/// Bind the socket and run the server until the last pane closes. The
/// socket file is removed on the way out.
pub fn run_server(
    socket_name: Option<String>,
    source_file: Option<PathBuf>,
    startup_command: Option<String>,
) -> io::Result<()> {
    install_crash_hook();

    // The server only exits when the last pane closes; Ctrl-C at a stray
    // controlling terminal must not kill it.
    unsafe {
        libc::signal(libc::SIGINT, libc::SIG_IGN);
    }

    let (socket_path, listener) = transport::bind_socket(socket_name.as_deref())?;
    let (tx, rx) = mpsc::channel();

    spawn_accept_loop(listener, tx.clone());

    let mut pymux = Pymux::new(tx.clone());
    pymux.socket_name = Some(socket_path.clone());
    pymux.source_file = source_file;
    pymux.startup_command = startup_command;
    if let Some(suffix) = socket_path.rsplit('.').next() {
        pymux.session_name = suffix.to_string();
    }

    spawn_auto_refresh(tx, pymux.status_interval.clone());

    pymux.run_loop(&rx);

    let _ = std::fs::remove_file(&socket_path);
    Ok(())
}

/// Standalone mode: the server runs on a background thread in this process
/// and a single client attaches to it directly.
pub fn run_standalone(
    color_depth: ColorDepth,
    source_file: Option<PathBuf>,
    startup_command: Option<String>,
) -> io::Result<()> {
    install_crash_hook();

    let (socket_path, listener) = transport::bind_socket(None)?;
    let (tx, rx) = mpsc::channel();

    spawn_accept_loop(listener, tx.clone());

    let mut pymux = Pymux::new(tx.clone());
    pymux.socket_name = Some(socket_path.clone());
    pymux.source_file = source_file;
    pymux.startup_command = startup_command;

    spawn_auto_refresh(tx, pymux.status_interval.clone());

    let server_socket = socket_path.clone();
    let server = thread::spawn(move || {
        pymux.run_loop(&rx);
        let _ = std::fs::remove_file(&server_socket);
    });

    let result = crate::client::attach(PathBuf::from(&socket_path).as_path(), false, color_depth);
    let _ = server.join();
    result
}

fn spawn_accept_loop(listener: std::os::unix::net::UnixListener, tx: mpsc::Sender<ServerRequest>) {
    thread::spawn(move || {
        let mut next_client: ClientId = 0;
        for stream in listener.incoming() {
            let Ok(stream) = stream else { continue };
            next_client += 1;
            let client = next_client;
            let tx = tx.clone();
            thread::spawn(move || connection::handle_connection(stream, client, tx));
        }
    });
}

fn spawn_auto_refresh(tx: mpsc::Sender<ServerRequest>, interval: Arc<AtomicU64>) {
    thread::spawn(move || loop {
        let seconds = interval.load(Ordering::Relaxed).max(1);
        thread::sleep(Duration::from_secs(seconds));
        if tx.send(ServerRequest::Invalidate).is_err() {
            break;
        }
    });
}
