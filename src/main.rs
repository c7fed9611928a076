mod arrangement;
mod charsets;
mod client;
mod commands;
mod copy_mode;
mod format;
mod keybind;
mod keys;
mod layout;
mod options;
mod process;
mod rc;
mod render;
mod screen;
mod server;
mod stream;
mod transport;

use std::env;
use std::io;
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};

use transport::ColorDepth;

const USAGE: &str = "\
Usage:
    pymux [standalone|start-server|attach] [-d]
          [--truecolor] [--ansicolor] [-S <socket>] [-f <file>]
          [--log <logfile>] [--] [<command>]
    pymux list-sessions
    pymux <command>";

fn main() {
    let code = match run() {
        Ok(()) => 0,
        Err(e) => {
            eprintln!("pymux: {}", e);
            1
        }
    };
    std::process::exit(code);
}

struct Options {
    subcommand: Option<String>,
    detach_others: bool,
    color_depth: ColorDepth,
    socket: Option<String>,
    source_file: Option<PathBuf>,
    log_file: Option<PathBuf>,
    rest: Vec<String>,
}

fn usage_error() -> io::Error {
    io::Error::new(io::ErrorKind::InvalidInput, USAGE)
}

fn parse_options(args: &[String]) -> io::Result<Options> {
    let mut options = Options {
        subcommand: None,
        detach_others: false,
        color_depth: ColorDepth::Default,
        socket: None,
        source_file: None,
        log_file: None,
        rest: Vec::new(),
    };

    let mut i = 0;
    while i < args.len() {
        // Once a command started, everything belongs to it.
        if !options.rest.is_empty() {
            options.rest.push(args[i].clone());
            i += 1;
            continue;
        }
        match args[i].as_str() {
            "-d" => options.detach_others = true,
            "--truecolor" => options.color_depth = ColorDepth::True,
            "--ansicolor" => options.color_depth = ColorDepth::Ansi,
            "-S" => {
                options.socket = Some(args.get(i + 1).ok_or_else(usage_error)?.clone());
                i += 1;
            }
            "-f" => {
                options.source_file =
                    Some(PathBuf::from(args.get(i + 1).ok_or_else(usage_error)?));
                i += 1;
            }
            "--log" => {
                options.log_file = Some(PathBuf::from(args.get(i + 1).ok_or_else(usage_error)?));
                i += 1;
            }
            "--" => {
                options.rest.extend(args[i + 1..].iter().cloned());
                break;
            }
            "standalone" | "start-server" | "attach" | "list-sessions"
                if options.subcommand.is_none() =>
            {
                options.subcommand = Some(args[i].clone());
            }
            arg if arg.starts_with('-') => return Err(usage_error()),
            arg => options.rest.push(arg.to_string()),
        }
        i += 1;
    }

    Ok(options)
}

fn init_logging(log_file: &Path) {
    use tracing_subscriber::EnvFilter;

    let directory = log_file.parent().unwrap_or(Path::new("."));
    let filename = log_file.file_name().unwrap_or_default();
    let appender = tracing_appender::rolling::never(directory, filename);
    let (writer, guard) = tracing_appender::non_blocking(appender);
    // The guard flushes on process exit.
    Box::leak(Box::new(guard));

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug")))
        .with_writer(writer)
        .with_ansi(false)
        .init();
}

/// The PYMUX variable set inside panes: "<socket>,<pane_id>".
fn pymux_env() -> Option<(String, Option<usize>)> {
    let value = env::var("PYMUX").ok()?;
    let mut parts = value.splitn(2, ',');
    let socket = parts.next()?.to_string();
    let pane_id = parts.next().and_then(|p| p.parse().ok());
    Some((socket, pane_id))
}

fn refuse_nesting() -> io::Result<()> {
    if env::var("PYMUX").is_ok() {
        return Err(io::Error::new(
            io::ErrorKind::Other,
            "refusing to start pymux inside a pymux pane",
        ));
    }
    Ok(())
}

/// Classic double fork, detaching the server from the invoking terminal.
fn daemonize() -> io::Result<()> {
    unsafe {
        match libc::fork() {
            -1 => return Err(io::Error::last_os_error()),
            0 => {}
            _ => libc::_exit(0),
        }
        if libc::setsid() == -1 {
            return Err(io::Error::last_os_error());
        }
        match libc::fork() {
            -1 => return Err(io::Error::last_os_error()),
            0 => {}
            _ => libc::_exit(0),
        }
    }

    let devnull = std::fs::OpenOptions::new().read(true).write(true).open("/dev/null")?;
    let fd = devnull.as_raw_fd();
    unsafe {
        libc::dup2(fd, 0);
        libc::dup2(fd, 1);
        libc::dup2(fd, 2);
    }
    Ok(())
}

fn first_socket() -> io::Result<PathBuf> {
    transport::discover_sockets()
        .into_iter()
        .next()
        .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no pymux server found"))
}

fn run() -> io::Result<()> {
    let args: Vec<String> = env::args().skip(1).collect();
    let options = parse_options(&args)?;

    let startup_command = if options.rest.is_empty() {
        None
    } else {
        Some(options.rest.join(" "))
    };

    match options.subcommand.as_deref() {
        Some("list-sessions") => {
            for socket in transport::discover_sockets() {
                println!("{}", socket.display());
            }
            Ok(())
        }
        Some("start-server") => {
            refuse_nesting()?;
            daemonize()?;
            if let Some(log_file) = &options.log_file {
                init_logging(log_file);
            }
            server::run_server(options.socket, options.source_file, startup_command)
        }
        Some("attach") => {
            refuse_nesting()?;
            if let Some(log_file) = &options.log_file {
                init_logging(log_file);
            }
            let socket = match &options.socket {
                Some(socket) => PathBuf::from(socket),
                None => first_socket()?,
            };
            client::attach(&socket, options.detach_others, options.color_depth)
        }
        None if startup_command.is_some() => {
            // A bare command: dispatch it to a running server, then exit.
            let command = startup_command.unwrap_or_default();
            let (socket, pane_id) = match &options.socket {
                Some(socket) => (socket.clone(), None),
                None => pymux_env().ok_or_else(|| {
                    io::Error::new(
                        io::ErrorKind::NotFound,
                        "no server socket: pass -S or run inside pymux",
                    )
                })?,
            };
            client::run_command(Path::new(&socket), &command, pane_id)
        }
        Some("standalone") | None => {
            if let Some(log_file) = &options.log_file {
                init_logging(log_file);
            }
            server::run_standalone(options.color_depth, options.source_file, startup_command)
        }
        Some(_) => Err(usage_error()),
    }
}
