mod cli;

use clap::Parser;
use cli::Cli;
use colored::*;
use cowork::agent::{Agent, ControlFlags};
use cowork::config::{self, Config};
use cowork::error::Result;
use cowork::events::{AgentEvent, EventReceiver, TurnOutcome};
use cowork::executor::{extract_python_block, CodeExecutor};
use cowork::gate::{ConfirmationGate, Decision};
use cowork::models::{Conversation, Message};
use cowork::provider::create_backend;
use cowork::security::SecurityPolicy;
use cowork::skills::registry::SkillRegistry;
use cowork::storage::ChatStorage;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        eprintln!("{} {}", "Error:".red().bold(), e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let mut config = Config::load()?;
    if cli.god_mode {
        config.god_mode = true;
    }
    if cli.verbose {
        config.verbose = true;
    }
    if let Some(dir) = &cli.workspace {
        config.workspace_dir = Some(dir.clone());
    }

    let mut storage = ChatStorage::open(&config::app_data_dir().join("chat.db"))?;

    if cli.list {
        return list_conversations(&storage);
    }
    if let Some(query) = &cli.search {
        return search_conversations(&storage, query);
    }
    if cli.clear {
        storage.clear()?;
        println!("All conversations deleted.");
        return Ok(());
    }

    let workspace = config
        .workspace_dir
        .clone()
        .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));

    let mut conversation = match &cli.resume {
        Some(id) if !cli.new => storage
            .get_conversation(id)?
            .ok_or_else(|| format!("No conversation with id {}", id))?,
        _ => Conversation::new(),
    };

    let gate = Arc::new(ConfirmationGate::new());
    let flags = ControlFlags::new();
    let (events, mut rx) = cowork::events::event_channel();

    let backend = create_backend(&config);
    let registry = SkillRegistry::new(&config);
    let mut agent = Agent::new(
        backend,
        registry,
        gate.clone(),
        events.clone(),
        flags.clone(),
        Some(workspace.clone()),
        config.verbose,
    );

    // Optional standing notes, kept next to the config file.
    if let Ok(notes) = std::fs::read_to_string(config::app_data_dir().join("notes.md")) {
        if !notes.trim().is_empty() {
            agent.set_notes(Some(notes));
        }
    }

    let policy = SecurityPolicy::new(&workspace, config.god_mode);
    let executor = CodeExecutor::new(policy, &workspace);

    let one_shot = !cli.prompt.is_empty();
    let mut pending_prompt = if one_shot {
        Some(cli.prompt.join(" "))
    } else {
        println!(
            "{} {} (model {}). Type /exit to quit.",
            "cowork".cyan().bold(),
            env!("CARGO_PKG_VERSION"),
            config.model
        );
        None
    };

    loop {
        let input = match pending_prompt.take() {
            Some(prompt) => prompt,
            None => {
                let line = prompt_line(&format!("{} ", ">".green().bold()))?;
                match line {
                    Some(line) => line,
                    None => break, // EOF
                }
            }
        };
        let input = input.trim().to_string();
        if input.is_empty() {
            continue;
        }
        if matches!(input.as_str(), "/exit" | "/quit" | "exit" | "quit") {
            break;
        }

        conversation.messages.push(Message::user(input));

        let outcome = run_turn(&mut agent, &mut conversation.messages, &mut rx, &gate, &flags).await;

        if let TurnOutcome::Finished { content, .. } = &outcome {
            if let Some(code) = extract_python_block(content) {
                maybe_execute(&executor, &code, &events, &mut rx, &gate, &flags).await?;
            }
        }

        conversation.derive_title();
        storage.save_conversation(&conversation)?;

        if one_shot {
            break;
        }
    }

    Ok(())
}

/// Drive one turn while rendering its events. Ctrl-C flips the stop flag
/// instead of killing the process.
async fn run_turn(
    agent: &mut Agent,
    history: &mut Vec<Message>,
    rx: &mut EventReceiver,
    gate: &Arc<ConfirmationGate>,
    flags: &ControlFlags,
) -> TurnOutcome {
    let mut printer = Printer::new();
    let turn = agent.run_turn(history);
    tokio::pin!(turn);

    let outcome = loop {
        tokio::select! {
            outcome = &mut turn => break outcome,
            Some(event) = rx.recv() => printer.handle(event, gate),
            _ = tokio::signal::ctrl_c() => {
                eprintln!("\n{}", "[stopping]".yellow());
                flags.stop();
            }
        }
    };

    while let Ok(event) = rx.try_recv() {
        printer.handle(event, gate);
    }
    printer.finish();
    outcome
}

/// Offer to run a fenced code block the model produced.
async fn maybe_execute(
    executor: &CodeExecutor,
    code: &str,
    events: &cowork::events::EventSender,
    rx: &mut EventReceiver,
    gate: &Arc<ConfirmationGate>,
    flags: &ControlFlags,
) -> Result<()> {
    eprint!("{} ", "Run this code block? [y/N]".yellow().bold());
    io::stderr().flush()?;
    let answer = prompt_line("")?.unwrap_or_default();
    if !matches!(answer.trim().to_lowercase().as_str(), "y" | "yes") {
        return Ok(());
    }

    flags.reset();
    let mut printer = Printer::new();
    let run = executor.run(code, events, gate, flags);
    tokio::pin!(run);

    let report = loop {
        tokio::select! {
            report = &mut run => break report,
            Some(event) = rx.recv() => printer.handle(event, gate),
            _ = tokio::signal::ctrl_c() => {
                eprintln!("\n{}", "[stopping]".yellow());
                flags.stop();
            }
        }
    };

    while let Ok(event) = rx.try_recv() {
        printer.handle(event, gate);
    }
    printer.finish();

    match report {
        Ok(report) if report.killed => eprintln!("{}", "[execution stopped]".yellow()),
        Ok(report) => match report.exit_code {
            Some(0) | None => {}
            Some(code) => eprintln!("{}", format!("[exited with status {}]", code).red()),
        },
        Err(e) => eprintln!("{} {}", "Execution rejected:".red().bold(), e),
    }
    Ok(())
}

/// Streams events to the terminal and answers gate requests from stdin.
struct Printer {
    in_reasoning: bool,
    printed_any: bool,
}

impl Printer {
    fn new() -> Self {
        Printer {
            in_reasoning: false,
            printed_any: false,
        }
    }

    fn handle(&mut self, event: AgentEvent, gate: &ConfirmationGate) {
        match event {
            AgentEvent::Step(text) => {
                self.break_stream();
                eprintln!("{}", format!("· {}", text).dimmed());
            }
            AgentEvent::Reasoning(text) => {
                self.in_reasoning = true;
                self.printed_any = true;
                print!("{}", text.dimmed());
                let _ = io::stdout().flush();
            }
            AgentEvent::Content(text) => {
                if self.in_reasoning {
                    println!();
                    self.in_reasoning = false;
                }
                self.printed_any = true;
                print!("{}", text);
                let _ = io::stdout().flush();
            }
            AgentEvent::SkillUsed(skill) => {
                self.break_stream();
                eprintln!("{}", format!("· skill: {}", skill).dimmed());
            }
            AgentEvent::ToolCall { name, arguments } => {
                self.break_stream();
                eprintln!("{} {}({})", "→".yellow().bold(), name.yellow(), arguments.dimmed());
            }
            AgentEvent::ToolResult { name, result } => {
                self.break_stream();
                let shortened: String = result.chars().take(200).collect();
                eprintln!("{}", format!("← {}: {}", name, shortened).dimmed());
            }
            AgentEvent::ConfirmationRequested(prompt) => {
                self.break_stream();
                eprint!("{} {} [y/N or reply] ", "?".cyan().bold(), prompt.cyan());
                let _ = io::stderr().flush();
                let answer = read_stdin_line().unwrap_or_default();
                gate.respond(parse_decision(&answer));
            }
            AgentEvent::InputRequested(prompt) => {
                self.break_stream();
                eprint!("{} {} ", "?".cyan().bold(), prompt.cyan());
                let _ = io::stderr().flush();
                let answer = read_stdin_line().unwrap_or_default();
                gate.respond(Decision::Reply(answer.trim_end().to_string()));
            }
            AgentEvent::ExecOutput(line) => {
                self.break_stream();
                println!("{}", line);
            }
            AgentEvent::Finished(outcome) => {
                self.break_stream();
                match outcome {
                    TurnOutcome::Finished { .. } => {}
                    TurnOutcome::Stopped => eprintln!("{}", "[stopped]".yellow()),
                    TurnOutcome::LoopDetected => eprintln!(
                        "{}",
                        "[stopped: the model kept repeating the same tool calls]".red()
                    ),
                    TurnOutcome::BackendError(message) => {
                        eprintln!("{} {}", "Backend error:".red().bold(), message)
                    }
                }
            }
        }
    }

    /// End a streaming line before printing a standalone one.
    fn break_stream(&mut self) {
        if self.printed_any {
            println!();
            self.printed_any = false;
            self.in_reasoning = false;
        }
    }

    fn finish(&mut self) {
        self.break_stream();
    }
}

fn parse_decision(answer: &str) -> Decision {
    match answer.trim().to_lowercase().as_str() {
        "y" | "yes" => Decision::Approved,
        "" | "n" | "no" => Decision::Denied,
        _ => Decision::Reply(answer.trim().to_string()),
    }
}

fn list_conversations(storage: &ChatStorage) -> Result<()> {
    let summaries = storage.list_conversations()?;
    if summaries.is_empty() {
        println!("No stored conversations.");
        return Ok(());
    }
    for summary in summaries {
        println!(
            "{}  {}  {}  ({} messages, {})",
            summary.id.dimmed(),
            summary.updated_at.dimmed(),
            summary.title.bold(),
            summary.message_count,
            summary.status
        );
    }
    Ok(())
}

fn search_conversations(storage: &ChatStorage, query: &str) -> Result<()> {
    let hits = storage.search(query)?;
    if hits.is_empty() {
        println!("No matches for '{}'.", query);
        return Ok(());
    }
    for hit in hits {
        println!(
            "{}  {}\n    {}",
            hit.conversation_id.dimmed(),
            hit.title.bold(),
            hit.snippet.dimmed()
        );
    }
    Ok(())
}

fn prompt_line(prompt: &str) -> Result<Option<String>> {
    if !prompt.is_empty() {
        print!("{}", prompt);
        io::stdout().flush()?;
    }
    let mut line = String::new();
    let read = io::stdin().lock().read_line(&mut line)?;
    if read == 0 {
        return Ok(None);
    }
    Ok(Some(line.trim_end().to_string()))
}

fn read_stdin_line() -> Option<String> {
    let mut line = String::new();
    io::stdin().lock().read_line(&mut line).ok()?;
    Some(line)
}
