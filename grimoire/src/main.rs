use std::{
    io::{self, BufRead, Write},
    path::PathBuf,
};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use grimoire::config::Config;
use grimoire::format;
use grimoire::logging;
use grimoire::records;
use grimoire::session::Session;
use grimoire::storage::{FlatFileStorage, Storage};
use log::info;

#[derive(Debug, Parser)]
#[command(
    name = "grimoire",
    about = "Task list and trivia quizzer driven by typed commands",
    version
)]
struct Cli {
    /// Also log debug output to stderr.
    #[arg(long, global = true)]
    verbose: bool,
    /// Config file to use instead of the per-user one.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Directory holding tasks.txt and trivia/ (overrides the config file).
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Read commands from stdin until `bye` (the default).
    Repl,

    /// Handle each argument as one input line, then exit.
    Run(RunArgs),

    /// Print the saved task list.
    Export(ExportArgs),
}

#[derive(Debug, Args)]
struct RunArgs {
    /// Input lines, e.g. `grimoire run "todo buy milk" list`.
    #[arg(required = true)]
    lines: Vec<String>,
}

#[derive(Debug, Args)]
struct ExportArgs {
    /// Emit JSON instead of the task file format.
    #[arg(long)]
    json: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(data_dir) = cli.data_dir {
        config = config.with_data_dir(data_dir);
    }
    logging::init(&config, cli.verbose)?;
    info!("using data directory {}", config.data_dir.display());

    match cli.command.unwrap_or(Commands::Repl) {
        Commands::Repl => handle_repl(&config),
        Commands::Run(args) => handle_run(args, &config),
        Commands::Export(args) => handle_export(args, &config),
    }
}

fn open_session(config: &Config) -> Session<FlatFileStorage> {
    Session::open(
        FlatFileStorage::new(&config.data_dir),
        config.default_category.clone(),
    )
}

fn handle_repl(config: &Config) -> Result<()> {
    let mut session = open_session(config);
    let stdin = io::stdin();
    let stdout = io::stdout();
    converse(&mut session, stdin.lock(), stdout.lock())
}

fn handle_run(args: RunArgs, config: &Config) -> Result<()> {
    let mut session = open_session(config);
    let mut out = io::stdout().lock();
    print_notices(&session, &mut out)?;
    for line in &args.lines {
        writeln!(out, "{}", session.handle(line))?;
        if session.has_exited() {
            break;
        }
    }
    Ok(())
}

fn handle_export(args: ExportArgs, config: &Config) -> Result<()> {
    let storage = FlatFileStorage::new(&config.data_dir);
    let tasks = storage
        .load_tasks()
        .with_context(|| format!("loading {}", storage.tasks_path().display()))?;
    let mut out = io::stdout().lock();
    write!(out, "{}", export_tasks(&tasks, args.json)?)?;
    Ok(())
}

fn export_tasks(tasks: &[grimoire::core::Task], json: bool) -> Result<String> {
    if json {
        let mut text = serde_json::to_string_pretty(tasks).context("serializing tasks")?;
        text.push('\n');
        Ok(text)
    } else {
        Ok(records::encode_tasks(tasks))
    }
}

/// Greets, reports startup notices, then answers line by line until `bye`
/// or end of input.
fn converse<S, R, W>(session: &mut Session<S>, input: R, mut out: W) -> Result<()>
where
    S: Storage,
    R: BufRead,
    W: Write,
{
    writeln!(out, "{}", Session::<S>::welcome_text())?;
    print_notices(session, &mut out)?;
    for line in input.lines() {
        let line = line.context("reading input")?;
        writeln!(out, "{}", session.handle(&line))?;
        out.flush()?;
        if session.has_exited() {
            break;
        }
    }
    Ok(())
}

fn print_notices<S: Storage, W: Write>(session: &Session<S>, out: &mut W) -> Result<()> {
    for notice in session.startup_notices() {
        writeln!(out, "{}", format::render_error(notice))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use grimoire::core::Task;
    use grimoire::storage::MemoryStorage;
    use std::fs;
    use std::io::Cursor;

    fn transcript(session: &mut Session<MemoryStorage>, input: &str) -> String {
        let mut out = Vec::new();
        converse(session, Cursor::new(input), &mut out).expect("converse");
        String::from_utf8(out).expect("utf8")
    }

    #[test]
    fn conversation_stops_at_bye() {
        let mut session = Session::open(MemoryStorage::new(), "default");
        let text = transcript(&mut session, "todo a\nbye\ntodo never\n");

        assert!(text.starts_with(format::WELCOME));
        assert!(text.contains("Now you have 1 task in the list."));
        assert!(text.trim_end().ends_with("Bye. Hope to see you again soon!"));
        assert_eq!(session.tasks().len(), 1);
    }

    #[test]
    fn conversation_ends_quietly_at_eof() {
        let mut session = Session::open(MemoryStorage::new(), "default");
        let text = transcript(&mut session, "list\n");
        assert!(text.contains("Your list is empty."));
        assert!(!session.has_exited());
    }

    #[test]
    fn startup_notices_follow_the_greeting() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let storage = FlatFileStorage::new(tmp.path());
        fs::write(storage.tasks_path(), "T | ? | broken\n").expect("write");
        let mut session = Session::open(storage, "default");

        let mut out = Vec::new();
        converse(&mut session, Cursor::new("bye\n"), &mut out).expect("converse");
        let text = String::from_utf8(out).expect("utf8");
        let second_line = text.lines().nth(2).expect("notice line");
        assert!(second_line.starts_with(format::ERROR_MARKER), "{text}");
        assert!(second_line.contains("corrupted"), "{text}");
    }

    #[test]
    fn export_formats() {
        let mut done = Task::todo("ship it").expect("todo");
        done.mark_done();
        let tasks = vec![done];

        assert_eq!(export_tasks(&tasks, false).expect("text"), "T | 1 | ship it\n");

        let json: serde_json::Value =
            serde_json::from_str(&export_tasks(&tasks, true).expect("json")).expect("parse");
        assert_eq!(json[0]["description"], "ship it");
        assert_eq!(json[0]["type"], "todo");
        assert_eq!(json[0]["done"], true);
    }

    #[test]
    fn cli_defaults_to_repl() {
        let cli = Cli::try_parse_from(["grimoire"]).expect("parse");
        assert!(cli.command.is_none());

        let cli = Cli::try_parse_from(["grimoire", "--data-dir", "/tmp/x", "run", "list", "bye"])
            .expect("parse");
        assert_eq!(cli.data_dir, Some(PathBuf::from("/tmp/x")));
        match cli.command {
            Some(Commands::Run(args)) => assert_eq!(args.lines, vec!["list", "bye"]),
            other => panic!("expected run, got {other:?}"),
        }
    }
}
