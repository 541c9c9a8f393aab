use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "cowork",
    about = "Interactive AI coworker with skills, code execution and persistent chats",
    version
)]
pub struct Cli {
    /// Initial prompt; without one an interactive session starts
    pub prompt: Vec<String>,

    /// Start a new conversation even if one could be resumed
    #[arg(long)]
    pub new: bool,

    /// Resume a stored conversation by id
    #[arg(long, value_name = "ID")]
    pub resume: Option<String>,

    /// List stored conversations and exit
    #[arg(long)]
    pub list: bool,

    /// Search stored conversations and exit
    #[arg(long, value_name = "QUERY")]
    pub search: Option<String>,

    /// Delete all stored conversations and exit
    #[arg(long)]
    pub clear: bool,

    /// Workspace directory code and skills may touch
    #[arg(long, value_name = "DIR")]
    pub workspace: Option<PathBuf>,

    /// Disable all static code-safety checks for this session
    #[arg(long)]
    pub god_mode: bool,

    /// Show progress steps
    #[arg(short, long)]
    pub verbose: bool,
}
