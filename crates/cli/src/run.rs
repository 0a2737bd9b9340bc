//! Interactive host loop: stdin lines become events, the chat buffer is
//! stdout.
//!
//! - `/name args` runs a command
//! - `!signal data` broadcasts a signal
//! - `=key value` sets an option (`=key` alone removes it)
//! - `//text` is the chat line `/text`; anything else is a chat line as is

use std::{
    collections::HashMap,
    path::Path,
    sync::{Arc, Mutex},
};

use {
    anyhow::Result,
    chathook_common::{BufferRef, EventKind},
    chathook_plugins::{ChatEngine, PluginHost, bundled},
    tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader},
    tracing::{debug, info, warn},
};

const MAX_BUFFER_LINES: usize = 1000;

#[derive(Debug, PartialEq, Eq)]
enum Input<'a> {
    Empty,
    Command { name: &'a str, args: &'a str },
    Signal { name: &'a str, data: &'a str },
    SetOption { key: &'a str, value: Option<&'a str> },
    Text(&'a str),
}

fn parse_input(line: &str) -> Input<'_> {
    let line = line.trim_end_matches(['\r', '\n']);
    if line.trim().is_empty() {
        return Input::Empty;
    }
    // `//text` escapes a leading slash: the line is `/text`.
    if let Some(text) = line.strip_prefix('/').filter(|rest| rest.starts_with('/')) {
        return Input::Text(text);
    }
    if let Some(rest) = line.strip_prefix('/') {
        let (name, args) = split_word(rest);
        return Input::Command { name, args };
    }
    if let Some(rest) = line.strip_prefix('!') {
        let (name, data) = split_word(rest);
        return Input::Signal { name, data };
    }
    if let Some(rest) = line.strip_prefix('=') {
        let (key, value) = split_word(rest);
        let value = (!value.is_empty()).then_some(value);
        return Input::SetOption { key, value };
    }
    Input::Text(line)
}

/// First word and the rest, leading whitespace of the rest removed.
fn split_word(rest: &str) -> (&str, &str) {
    match rest.split_once(char::is_whitespace) {
        Some((head, tail)) => (head, tail.trim_start()),
        None => (rest, ""),
    }
}

// ── Engine ──────────────────────────────────────────────────────────────────

struct Buffers {
    current: BufferRef,
    lines: HashMap<BufferRef, Vec<String>>,
}

impl Buffers {
    fn push(&mut self, buffer: &BufferRef, line: String) {
        let lines = self.lines.entry(buffer.clone()).or_default();
        lines.push(line);
        if lines.len() > MAX_BUFFER_LINES {
            lines.remove(0);
        }
    }
}

/// Chat engine printing to stdout and remembering buffer contents.
#[derive(Clone)]
struct StdoutEngine(Arc<Mutex<Buffers>>);

impl StdoutEngine {
    fn new() -> Self {
        Self(Arc::new(Mutex::new(Buffers {
            current: BufferRef::core(),
            lines: HashMap::new(),
        })))
    }

    fn buffers(&self) -> std::sync::MutexGuard<'_, Buffers> {
        self.0.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn say(&self, text: &str) {
        let mut buffers = self.buffers();
        let current = buffers.current.clone();
        println!("[{current}] <me> {text}");
        buffers.push(&current, format!("<me> {text}"));
    }

    fn switch(&self, name: &str) {
        let mut buffers = self.buffers();
        buffers.current = BufferRef::new(name);
        println!("-- now in buffer {name}");
    }
}

impl ChatEngine for StdoutEngine {
    fn print_line(&mut self, buffer: &BufferRef, text: &str) {
        println!("[{buffer}] -- {text}");
    }

    fn send_command(&mut self, buffer: &BufferRef, command: &str) {
        let line = match command.strip_prefix("/me ") {
            Some(action) => format!("* me {action}"),
            None => format!("<me> {command}"),
        };
        println!("[{buffer}] {line}");
        self.buffers().push(buffer, line);
    }

    fn current_buffer(&self) -> BufferRef {
        self.buffers().current.clone()
    }

    fn buffer_lines(&self, buffer: &BufferRef) -> Vec<String> {
        self.buffers().lines.get(buffer).cloned().unwrap_or_default()
    }
}

// ── Loop ────────────────────────────────────────────────────────────────────

#[derive(Debug, PartialEq, Eq)]
enum Flow {
    Continue,
    Quit,
}

pub async fn run(config: Option<&Path>) -> Result<()> {
    let (config, path) = crate::config_commands::load(config)?;
    let engine = StdoutEngine::new();
    let mut host = PluginHost::new(config, engine.clone()).with_config_path(path);
    let loaded = bundled::load_enabled(&mut host)?;
    info!(plugins = loaded.len(), "bundled plugins loaded");
    serve(host, &engine, BufReader::new(tokio::io::stdin())).await
}

/// Feed `input` lines to the host until EOF, `/quit` or a read error, then
/// shut it down.
async fn serve<R>(mut host: PluginHost, engine: &StdoutEngine, input: R) -> Result<()>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = input.lines();
    let outcome = loop {
        tokio::select! {
            line = lines.next_line() => {
                let line = match line {
                    Ok(Some(line)) => line,
                    Ok(None) => break Ok(()),
                    Err(e) => {
                        warn!(error = %e, "failed to read stdin");
                        break Err(e);
                    },
                };
                if handle_line(&mut host, engine, &line) == Flow::Quit {
                    break Ok(());
                }
            },
            delivered = host.next_delivery() => {
                if let Some(delivered) = delivered {
                    debug!(kind = %delivered.event.kind(), subject = delivered.event.subject(), invoked = delivered.dispatch.invoked, "delivery dispatched");
                }
            },
        }
    };

    // Unloading cancels whatever is still running; a read error still
    // unloads and saves first.
    host.shutdown()?;
    let stats = host.bus_stats();
    info!(
        published = stats.published,
        dropped = stats.dropped,
        failures = stats.failures,
        "chathook stopped"
    );
    Ok(outcome?)
}

fn handle_line(host: &mut PluginHost, engine: &StdoutEngine, line: &str) -> Flow {
    match parse_input(line) {
        Input::Empty => {},
        Input::Text(text) => engine.say(text),
        Input::Command { name, args } => return command(host, engine, name, args),
        Input::Signal { name, data } => {
            let dispatch = if data.is_empty() {
                host.notify(EventKind::Signal, name, Vec::<String>::new())
            } else {
                host.notify(EventKind::Signal, name, [data])
            };
            debug!(signal = name, invoked = dispatch.invoked, "signal sent");
        },
        Input::SetOption { key, value: Some(value) } => {
            host.set_config(key, value);
            println!("-- {key} = {value}");
        },
        Input::SetOption { key, value: None } => {
            if host.unset_config(key) {
                println!("-- {key} unset");
            } else {
                println!("-- {key} is not set");
            }
        },
    }
    Flow::Continue
}

fn command(host: &mut PluginHost, engine: &StdoutEngine, name: &str, args: &str) -> Flow {
    match name {
        "quit" => return Flow::Quit,
        "help" => {
            for c in host.commands() {
                println!("  /{} {}  {}", c.name, c.args, c.description);
            }
            println!("  /buffer <name>  switch buffer");
            println!("  /save  write options to the config file");
            println!("  /quit  leave");
        },
        "buffer" if !args.is_empty() => engine.switch(args),
        "save" => match host.save_config() {
            Ok(path) => println!("-- options saved to {}", path.display()),
            Err(e) => println!("-- {e}"),
        },
        _ => {
            let dispatch = host.notify(EventKind::Command, name, [args]);
            if dispatch.matched == 0 {
                println!("-- unknown command /{name}, try /help");
            }
        },
    }
    Flow::Continue
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, rstest::rstest};

    #[rstest]
    #[case("", Input::Empty)]
    #[case("   ", Input::Empty)]
    #[case("/browse", Input::Command { name: "browse", args: "" })]
    #[case("/browse -2", Input::Command { name: "browse", args: "-2" })]
    #[case("/uptime   -o", Input::Command { name: "uptime", args: "-o" })]
    #[case("!buffer_opened libera.#rust", Input::Signal { name: "buffer_opened", data: "libera.#rust" })]
    #[case("!quit", Input::Signal { name: "quit", data: "" })]
    #[case("=webbrowser firefox --new-tab", Input::SetOption { key: "webbrowser", value: Some("firefox --new-tab") })]
    #[case("=webbrowser", Input::SetOption { key: "webbrowser", value: None })]
    #[case("//etc/hosts is a file", Input::Text("/etc/hosts is a file"))]
    #[case("//", Input::Text("/"))]
    #[case("///", Input::Text("//"))]
    #[case("see http://example.com", Input::Text("see http://example.com"))]
    fn parses_input_lines(#[case] line: &str, #[case] expected: Input<'static>) {
        assert_eq!(parse_input(line), expected);
    }

    #[test]
    fn engine_keeps_buffer_history() {
        let engine = StdoutEngine::new();
        engine.say("see http://example.com");
        let mut sink = engine.clone();
        sink.send_command(&BufferRef::core(), "/me is listening to x");
        assert_eq!(engine.buffer_lines(&BufferRef::core()), vec![
            "<me> see http://example.com",
            "* me is listening to x",
        ]);

        engine.switch("libera.#rust");
        assert_eq!(engine.current_buffer(), BufferRef::new("libera.#rust"));
        assert!(engine.buffer_lines(&engine.current_buffer()).is_empty());
    }

    struct BrokenInput;

    impl tokio::io::AsyncRead for BrokenInput {
        fn poll_read(
            self: std::pin::Pin<&mut Self>,
            _: &mut std::task::Context<'_>,
            _: &mut tokio::io::ReadBuf<'_>,
        ) -> std::task::Poll<std::io::Result<()>> {
            std::task::Poll::Ready(Err(std::io::Error::other("terminal went away")))
        }
    }

    #[tokio::test]
    async fn read_error_still_saves_options() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chathook.toml");
        let engine = StdoutEngine::new();
        let mut host =
            PluginHost::new(Default::default(), engine.clone()).with_config_path(path.clone());
        host.set_config("webbrowser", "lynx");

        let err = serve(host, &engine, BufReader::new(BrokenInput)).await.unwrap_err();
        assert!(err.to_string().contains("terminal went away"));
        let saved = chathook_config::load_config(&path).unwrap();
        assert_eq!(saved.options.get("webbrowser").map(String::as_str), Some("lynx"));
    }

    #[tokio::test]
    async fn quit_saves_options_set_from_input() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chathook.toml");
        let engine = StdoutEngine::new();
        let host =
            PluginHost::new(Default::default(), engine.clone()).with_config_path(path.clone());

        let input: &[u8] = b"=webbrowser firefox\n/quit\n=webbrowser ignored\n";
        serve(host, &engine, input).await.unwrap();
        let saved = chathook_config::load_config(&path).unwrap();
        assert_eq!(saved.options.get("webbrowser").map(String::as_str), Some("firefox"));
    }

    #[test]
    fn quit_and_unknown_commands() {
        let engine = StdoutEngine::new();
        let mut host = PluginHost::new(Default::default(), engine.clone());
        assert_eq!(handle_line(&mut host, &engine, "/quit"), Flow::Quit);
        assert_eq!(handle_line(&mut host, &engine, "/nope"), Flow::Continue);
        assert_eq!(handle_line(&mut host, &engine, "=webbrowser lynx"), Flow::Continue);
        assert_eq!(host.get_config("webbrowser"), Some("lynx"));
    }
}
