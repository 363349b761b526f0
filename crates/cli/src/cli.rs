use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Resilient chat channel client for the admin dashboard backend.
#[derive(Debug, Parser)]
#[command(name = "chatwire", version, about)]
pub struct Cli {
	/// Origin the dashboard backend is served from (http(s) or ws(s)).
	#[arg(
		long,
		global = true,
		env = "CHATWIRE_ORIGIN",
		default_value = "http://127.0.0.1:8000"
	)]
	pub origin: String,

	/// Bearer token (JWT) identifying the admin session.
	#[arg(long, global = true, env = "CHATWIRE_TOKEN")]
	pub token: Option<String>,

	/// Read the bearer token from a file instead (re-read on reconnect).
	#[arg(long, global = true, conflicts_with = "token")]
	pub token_file: Option<PathBuf>,

	/// Increase log verbosity (-v info, -vv debug).
	#[arg(short, long, global = true, action = clap::ArgAction::Count)]
	pub verbose: u8,

	#[command(subcommand)]
	pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
	/// Connect and print every application frame until Ctrl-C.
	Tail {
		/// Pretty-print frames instead of one JSON object per line.
		#[arg(long)]
		pretty: bool,
	},
	/// Send one raw JSON frame and exit.
	Send {
		/// Frame payload, e.g. '{"type":"chat_message","text":"hi"}'.
		json: String,
	},
	/// Send a typing presence signal and exit.
	Typing {
		/// Telegram identity the signal is attributed to.
		#[arg(long)]
		telegram_id: i64,
	},
}
