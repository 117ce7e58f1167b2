//! Kestrel: conversation engines and step pipelines over hosted language models.
//!
//! A [`ConversationEngine`](engine::ConversationEngine) drives one chat
//! session, dispatching the tool calls the model requests until it answers
//! in text. A [`Pipeline`](pipeline::Pipeline) or
//! [`Chain`](pipeline::Chain) composes engine calls into multi-step
//! workflows with typed results and branching. A
//! [`Scheduler`](scheduler::Scheduler) runs stored prompts on a cron cadence.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use kestrel::prelude::*;
//!
//! # async fn example() -> kestrel::error::Result<()> {
//! let config = KestrelConfig::from_env()?;
//! let service = Arc::new(GeminiService::from_config(&config)?);
//! let engine = ConversationEngine::builder(service).build()?;
//! let reply = engine.send("Hello!", None).await?;
//! println!("{}", reply.text);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod engine;
pub mod error;
pub mod history;
pub mod pipeline;
pub mod prelude;
pub mod provider;
pub mod scheduler;
pub mod tools;
pub mod types;
pub mod util;

#[cfg(feature = "cli")]
pub mod cli;
