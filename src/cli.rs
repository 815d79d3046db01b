// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(
    name = "convoy",
    version,
    about = "LLM agent orchestrator: supervises JSON-RPC tool-provider subprocesses and drives a verified conversation loop"
)]
pub struct Cli {
    /// Explicit config file, merged over the discovered layers.
    #[arg(short, long, env = "CONVOY_CONFIG")]
    pub config: Option<PathBuf>,

    /// Named provider from the AI config (defaults to ai.default_provider).
    #[arg(short, long)]
    pub model: Option<String>,

    /// Verbose logging to stderr (RUST_LOG overrides when set).
    #[arg(short, long)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Print the merged configuration and exit.
    ShowConfig,
    /// List the registered model drivers.
    ListProviders,
}
