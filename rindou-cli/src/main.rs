//! Rindou CLI - コマンドラインインターフェース
//!
//! 停止中プロセスの調査用REPLです。アタッチしたプロセスの全スレッドの
//! スタックと変数を閲覧できます。

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use rindou_core::{command, Command, Debugger, Frame};
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;

/// Rindou - Process Inspector
#[derive(Parser)]
#[command(name = "rindou")]
#[command(version = "0.1.0")]
#[command(about = "Debug-information based inspector for stopped processes", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: DebugCommand,
}

#[derive(Subcommand)]
enum DebugCommand {
    /// Attach to an existing process
    Attach {
        /// Path to the executable binary
        binary: String,

        /// Process ID to attach to
        #[arg(short, long)]
        pid: i32,
    },
}

/// 現在選択中のスレッドとフレーム
struct Selection {
    thread: usize,
    frame: usize,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    println!("Rindou - Process Inspector");
    println!("Version 0.1.0");
    println!();

    let cli = Cli::parse();
    let mut debugger = init_debugger(cli.command)?;
    run_repl(&mut debugger)?;

    Ok(())
}

/// デバッガを初期化してプロセスにアタッチする
///
/// アタッチで全スレッドが停止した後にデバッグ情報を読み込み、
/// スナップショットを採取します。
fn init_debugger(command: DebugCommand) -> Result<Debugger> {
    let mut debugger = Debugger::new();

    match command {
        DebugCommand::Attach { binary, pid } => {
            println!("Attaching to process: {}", pid);
            debugger.attach(pid)?;
            println!("Attached to process {}", pid);

            println!("Loading binary: {}", binary);
            debugger.load_binary(&binary)?;
            println!("Loaded debug information from {}", binary);

            debugger.snapshot_threads()?;
            let count = debugger.threads()?.len();
            println!("Captured {} thread(s)", count);
            println!();
        }
    }

    Ok(debugger)
}

/// REPLループを実行する
fn run_repl(debugger: &mut Debugger) -> Result<()> {
    println!("Type 'help' for available commands, 'quit' to exit.");
    println!();

    let mut rl = DefaultEditor::new()?;
    let mut selection = Selection {
        thread: 0,
        frame: 0,
    };

    loop {
        let readline = rl.readline("(rindou) ");
        match readline {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }

                rl.add_history_entry(line)?;

                if let Err(e) = handle_command(debugger, &mut selection, line) {
                    eprintln!("Error: {}", e);
                }
            }
            Err(ReadlineError::Interrupted) => {
                println!("CTRL-C");
                break;
            }
            Err(ReadlineError::Eof) => {
                println!("CTRL-D");
                break;
            }
            Err(err) => {
                eprintln!("Error: {:?}", err);
                break;
            }
        }
    }

    Ok(())
}

fn handle_command(debugger: &mut Debugger, sel: &mut Selection, line: &str) -> Result<()> {
    match command::parse(line)? {
        Command::Help => print_help(),
        Command::Quit => handle_quit(),
        Command::Threads => handle_threads(debugger, sel)?,
        Command::Thread(index) => handle_thread(debugger, sel, index)?,
        Command::Backtrace => handle_backtrace(debugger, sel)?,
        Command::Frame(index) => handle_frame(debugger, sel, index)?,
        Command::Up => handle_up_down(debugger, sel, true)?,
        Command::Down => handle_up_down(debugger, sel, false)?,
        Command::Info => handle_info(debugger, sel)?,
        Command::Vars => handle_vars(debugger, sel)?,
        Command::Print(expr) => handle_print(debugger, sel, &expr)?,
        Command::Find(pattern) => handle_find(debugger, &pattern)?,
    }

    Ok(())
}

/// Quitコマンドを処理する
fn handle_quit() {
    println!("Goodbye!");
    std::process::exit(0);
}

/// 選択中のフレームを取得する
fn current_frame(debugger: &mut Debugger, sel: &Selection) -> Result<Frame> {
    debugger.threads()?.get(sel.thread)?.frame(sel.frame)
}

/// Threadsコマンド: スレッド一覧を表示する
fn handle_threads(debugger: &mut Debugger, sel: &Selection) -> Result<()> {
    let current = sel.thread;
    let threads = debugger.threads()?;

    let mut index = 0;
    while let Some(thread) = threads.next() {
        let marker = if index == current { "*" } else { " " };
        println!("{} [{}] {}", marker, index, thread);
        index += 1;
    }
    Ok(())
}

/// Threadコマンド: スレッドを選択する
fn handle_thread(debugger: &mut Debugger, sel: &mut Selection, index: usize) -> Result<()> {
    let thread = debugger.threads()?.get(index)?;
    sel.thread = index;
    sel.frame = 0;
    println!("Selected {}", thread);
    Ok(())
}

/// Backtraceコマンド: 現在スレッドの全フレームを表示する
fn handle_backtrace(debugger: &mut Debugger, sel: &Selection) -> Result<()> {
    let thread = debugger.threads()?.get(sel.thread)?;
    let insp = debugger.inspector()?;

    for index in 0..thread.frame_count() {
        let frame = thread.frame(index)?;
        let marker = if index == sel.frame { "*" } else { " " };
        let label = frame
            .label(insp)
            .unwrap_or_else(|| "<unknown>".to_string());
        match frame.source(insp) {
            Some((file, line)) => {
                println!(
                    "{} #{} 0x{:016x} {} at {}:{}",
                    marker,
                    index,
                    frame.pc(),
                    label,
                    file,
                    line
                );
            }
            None => {
                println!("{} #{} 0x{:016x} {}", marker, index, frame.pc(), label);
            }
        }
    }
    Ok(())
}

/// Frameコマンド: フレームを選択する
fn handle_frame(debugger: &mut Debugger, sel: &mut Selection, index: usize) -> Result<()> {
    let frame = debugger.threads()?.get(sel.thread)?.frame(index)?;
    sel.frame = index;
    println!("Selected {}", frame);
    Ok(())
}

/// Up/Downコマンド: フレームを1つ移動する
fn handle_up_down(debugger: &mut Debugger, sel: &mut Selection, up: bool) -> Result<()> {
    let frame = current_frame(debugger, sel)?;
    let next = if up { frame.up() } else { frame.down() };

    match next {
        Some(frame) => {
            sel.frame = frame.index();
            println!("Selected {}", frame);
        }
        None if up => println!("Already at outermost frame"),
        None => println!("Already at innermost frame"),
    }
    Ok(())
}

/// Infoコマンド: 現在フレームの詳細を表示する
fn handle_info(debugger: &mut Debugger, sel: &Selection) -> Result<()> {
    let frame = current_frame(debugger, sel)?;
    let insp = debugger.inspector()?;

    println!("{}", frame);
    println!("  pc: 0x{:016x}", frame.pc());
    if let Some(label) = frame.label(insp) {
        println!("  in: {}", label);
    }
    if let Some((file, line)) = frame.source(insp) {
        println!("  at: {}:{}", file, line);
    }
    if frame.is_signal() {
        let signo = frame.signo().unwrap_or(0);
        println!(
            "  stopped by signal {} ({})",
            signo,
            frame.signame().unwrap_or("?")
        );
    }
    Ok(())
}

/// Varsコマンド: 現在フレームの変数を一覧表示する
fn handle_vars(debugger: &mut Debugger, sel: &Selection) -> Result<()> {
    let frame = current_frame(debugger, sel)?;
    let insp = debugger.inspector()?;

    let mut scope = frame.scope(insp);
    if !scope.is_resolved() {
        println!("No scope information for pc 0x{:x}", frame.pc());
        return Ok(());
    }

    let mut count = 0;
    while let Some((name, is_param, var)) = scope.next_var(insp) {
        let mut value = var.value();
        let rendered = value
            .render(insp)
            .unwrap_or_else(|e| format!("<error: {}>", e));
        let kind = if is_param { " (param)" } else { "" };
        println!(
            "  {}{}: {} = {}",
            name.as_deref().unwrap_or("<anonymous>"),
            kind,
            var.display_type(insp),
            rendered
        );
        count += 1;
    }
    if count == 0 {
        println!("No variables in scope");
    }
    Ok(())
}

/// Printコマンド: "var.member.member" / "*ptr" 形式の式を評価する
fn handle_print(debugger: &mut Debugger, sel: &Selection, expr: &str) -> Result<()> {
    let frame = current_frame(debugger, sel)?;
    let insp = debugger.inspector()?;

    let (path, deref) = match expr.strip_prefix('*') {
        Some(rest) => (rest, true),
        None => (expr, false),
    };
    let mut parts = path.split('.');
    let name = parts
        .next()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| anyhow!("empty expression"))?;

    let scope = frame.scope(insp);
    let mut var = scope
        .lookup(insp, name)
        .ok_or_else(|| anyhow!("no variable named '{}' in scope", name))?;
    if deref {
        var = var.deref(insp)?;
    }

    let mut value = var.value();
    for part in parts {
        value = value.member(insp, part)?;
    }

    let rendered = value.render(insp)?;
    println!("{} = {}", expr, rendered);
    println!("  type: {}", value.var().display_type(insp));
    println!("  addr: 0x{:x}", value.var().addr());
    Ok(())
}

/// Findコマンド: シンボルを検索する
fn handle_find(debugger: &mut Debugger, pattern: &str) -> Result<()> {
    let insp = debugger.inspector()?;
    let symbols = insp.find_symbols(pattern);
    let title = format!("Symbols matching '{}'", pattern);
    print_symbol_list(&title, &symbols, Some(10));
    Ok(())
}

/// シンボルリストを表示するヘルパー関数
fn print_symbol_list(title: &str, symbols: &[rindou_dwarf::Symbol], limit: Option<usize>) {
    if symbols.is_empty() {
        println!("No {} found", title);
        return;
    }

    let display_limit = limit.unwrap_or(symbols.len());
    println!("{} ({} found):", title, symbols.len());

    for (i, sym) in symbols.iter().take(display_limit).enumerate() {
        if sym.size > 0 {
            println!(
                "  {}. {} @ 0x{:x} (size: {})",
                i + 1,
                sym.display_name(),
                sym.address,
                sym.size
            );
        } else {
            println!("  {}. {} @ 0x{:x}", i + 1, sym.display_name(), sym.address);
        }
    }

    if symbols.len() > display_limit {
        println!("  ... and {} more", symbols.len() - display_limit);
    }
}

fn print_help() {
    println!("Available commands:");
    println!();
    println!("  help             - Show this help message");
    println!("  quit/exit/q      - Exit the inspector");
    println!();
    println!("Navigation:");
    println!("  threads          - List all threads");
    println!("  thread <n> (t)   - Select a thread");
    println!("  bt               - Show backtrace of the current thread");
    println!("  frame <n> (f)    - Select a frame");
    println!("  up / down        - Move one frame towards caller/callee");
    println!();
    println!("Inspection:");
    println!("  info (i)         - Show details of the current frame");
    println!("  vars (v)         - List variables in the current scope");
    println!("  print <expr> (p) - Print a variable ('p counter.value', 'p *ptr')");
    println!("  find <pattern>   - Find symbols matching pattern");
    println!();
    println!("Examples:");
    println!("  thread 1");
    println!("  frame 2");
    println!("  print req.header.len");
    println!("  print *conn");
}
