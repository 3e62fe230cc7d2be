use std::io;
use std::path::PathBuf;

use crossterm::terminal;
use rd_core::app::{run_chat, run_shell, ChatOptions, ShellOptions};
use rd_core::config::Config;
use rd_core::context::DeckContext;
use rd_core::logging;

struct TerminalGuard {
    was_raw: bool,
}

impl TerminalGuard {
    fn new() -> io::Result<Self> {
        let was_raw = terminal::is_raw_mode_enabled()?;
        if !was_raw {
            terminal::enable_raw_mode()?;
        }
        Ok(Self { was_raw })
    }
}

impl Drop for TerminalGuard {
    fn drop(&mut self) {
        if !self.was_raw {
            let _ = terminal::disable_raw_mode();
        }
    }
}

fn print_help() {
    println!("relaydeck: terminal client for the RelayDeck agent dashboard");
    println!();
    println!("Usage:");
    println!("  relaydeck shell [--inject FILE]     Attach to the remote shell");
    println!("  relaydeck chat [OPTIONS] [MESSAGE]  Chat with the agent");
    println!();
    println!("Chat options:");
    println!("  --session ID   Resume a stored session");
    println!("  --attach FILE  Upload FILE and attach it to the next message (repeatable)");
    println!();
    println!("In chat, `/attach PATH` uploads a file and `/quit` exits.");
    println!("In the shell, Ctrl-] detaches.");
    println!();
    println!("Options:");
    println!("  --version      Print version");
    println!("  --help         Print this help");
}

enum Command {
    Shell(ShellOptions),
    Chat(ChatOptions),
}

fn parse_args(args: &[String]) -> Result<Command, String> {
    let mut iter = args.iter();
    let sub = iter.next().map(String::as_str).unwrap_or("shell");
    match sub {
        "shell" => {
            let mut options = ShellOptions::default();
            while let Some(arg) = iter.next() {
                match arg.as_str() {
                    "--inject" => {
                        let path = iter.next().ok_or("--inject needs a file")?;
                        options.inject = Some(PathBuf::from(path));
                    }
                    other => return Err(format!("unknown shell argument: {other}")),
                }
            }
            Ok(Command::Shell(options))
        }
        "chat" => {
            let mut options = ChatOptions::default();
            let mut words = Vec::new();
            while let Some(arg) = iter.next() {
                match arg.as_str() {
                    "--session" => {
                        let id = iter.next().ok_or("--session needs an id")?;
                        options.session = Some(id.clone());
                    }
                    "--attach" => {
                        let path = iter.next().ok_or("--attach needs a file")?;
                        options.attach.push(PathBuf::from(path));
                    }
                    flag if flag.starts_with("--") => {
                        return Err(format!("unknown chat argument: {flag}"))
                    }
                    word => words.push(word.to_string()),
                }
            }
            if !words.is_empty() {
                options.message = Some(words.join(" "));
            }
            Ok(Command::Chat(options))
        }
        other => Err(format!("unknown command: {other}")),
    }
}

fn main() {
    // Install panic handler that restores terminal
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let _ = terminal::disable_raw_mode();
        default_hook(info);
    }));

    let args: Vec<String> = std::env::args().skip(1).collect();

    if args.iter().any(|a| a == "--help" || a == "-h") {
        print_help();
        return;
    }

    if args.iter().any(|a| a == "--version" || a == "-V") {
        println!("relaydeck {}", env!("CARGO_PKG_VERSION"));
        return;
    }

    let command = match parse_args(&args) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("error: {e}");
            eprintln!("run `relaydeck --help` for usage");
            std::process::exit(2);
        }
    };

    let config = Config::load_or_default();
    if let Err(e) = logging::init(&config.log) {
        eprintln!("warning: logging disabled: {e}");
    }

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("error: failed to create async runtime: {e}");
            std::process::exit(1);
        }
    };

    let ctx = match DeckContext::from_config(config) {
        Ok(ctx) => ctx,
        Err(e) => {
            eprintln!("error: {e}");
            std::process::exit(1);
        }
    };

    let result = match command {
        Command::Shell(options) => {
            let guard = match TerminalGuard::new() {
                Ok(g) => g,
                Err(e) => {
                    eprintln!("error: failed to configure terminal: {e}");
                    std::process::exit(1);
                }
            };
            let result = runtime.block_on(run_shell(&ctx, options));
            drop(guard);
            result
        }
        Command::Chat(options) => runtime.block_on(run_chat(&ctx, options)),
    };

    // Stdin reader threads may still be blocked in read().
    runtime.shutdown_background();

    if let Err(e) = result {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}
