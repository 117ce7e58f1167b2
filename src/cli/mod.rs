//! Command-line interface for kestrel.

use clap::{Parser, Subcommand};

/// System instruction for `kestrel pipe`: output goes straight into a shell pipe.
pub const PIPE_SYSTEM_INSTRUCTION: &str = "The user provides an instruction and the content it applies to.
Your output is sent to a bash pipe, so it must NOT contain explanations or anything else, only the result.
If you are asked to update something, you most likely need to output the same data structure, updated, in the same format.
Do not show HOW to update the data structure; update it and output the result.
You are used like this: cat file | kestrel pipe -p \"prompt\" >> result";

/// Kestrel CLI
#[derive(Parser, Debug)]
#[command(name = "kestrel", version, about = "Drive Gemini conversations from the shell")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Send one prompt and print the answer
    Chat(ChatArgs),
    /// Apply a prompt to stdin and print only the result
    Pipe(PipeArgs),
}

/// Arguments for the `chat` subcommand.
#[derive(Parser, Debug)]
pub struct ChatArgs {
    /// Model id (defaults to KESTREL_MODEL or the configured default)
    #[arg(short, long)]
    pub model: Option<String>,

    /// System instruction
    #[arg(short, long)]
    pub system: Option<String>,

    /// Temperature (0.0 - 2.0)
    #[arg(short, long)]
    pub temperature: Option<f64>,

    /// Max tokens
    #[arg(long)]
    pub max_tokens: Option<u32>,

    /// User prompt
    pub prompt: String,
}

/// Arguments for the `pipe` subcommand.
#[derive(Parser, Debug)]
pub struct PipeArgs {
    /// Instruction applied to the piped content
    #[arg(short, long)]
    pub prompt: String,

    /// Model id (defaults to KESTREL_MODEL or the configured default)
    #[arg(short, long)]
    pub model: Option<String>,
}

/// Message sent for `kestrel pipe`.
pub fn pipe_message(prompt: &str, content: &str) -> String {
    format!("User provided prompt: {prompt}\n---\nUser provided content:\n{content}")
}
