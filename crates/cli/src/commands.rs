use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context as _, Result, bail};
use chatwire_client::{
	ChannelConfig, ChatChannel, CredentialProvider, FileCredentials, MessageHandler,
	StaticCredentials,
};
use chatwire_protocol::OutboundFrame;
use colored::Colorize as _;
use serde_json::Value;

use crate::cli::{Cli, Command};

/// How long the one-shot commands wait for the channel to open.
const OPEN_DEADLINE: Duration = Duration::from_secs(10);

pub async fn dispatch(cli: Cli) -> Result<()> {
	let credentials = credentials_from(&cli)?;
	let config = ChannelConfig::new(&cli.origin);

	match cli.command {
		Command::Tail { pretty } => tail(config, credentials, pretty).await,
		Command::Send { json } => {
			let frame: Value = serde_json::from_str(&json)
				.context("frame payload is not valid JSON")?;
			send_one(config, credentials, &frame).await
		}
		Command::Typing { telegram_id } => {
			send_one(config, credentials, &OutboundFrame::Typing { telegram_id }).await
		}
	}
}

fn credentials_from(cli: &Cli) -> Result<Arc<dyn CredentialProvider>> {
	if let Some(path) = &cli.token_file {
		return Ok(Arc::new(FileCredentials::new(path)));
	}
	if let Some(token) = &cli.token {
		return Ok(Arc::new(StaticCredentials::new(token.clone())));
	}
	bail!("no credential configured; pass --token, --token-file, or set CHATWIRE_TOKEN")
}

async fn tail(
	config: ChannelConfig,
	credentials: Arc<dyn CredentialProvider>,
	pretty: bool,
) -> Result<()> {
	let handler: MessageHandler = Arc::new(move |frame| {
		let rendered = if pretty {
			serde_json::to_string_pretty(&frame)
		} else {
			serde_json::to_string(&frame)
		};
		match rendered {
			Ok(text) => println!("{text}"),
			Err(e) => tracing::error!(error = %e, "failed to render inbound frame"),
		}
	});

	let channel = ChatChannel::new(config, credentials, handler);
	channel.connect().await?;
	if !channel.wait_connected(OPEN_DEADLINE).await {
		bail!("chat channel did not open within {OPEN_DEADLINE:?}");
	}

	eprintln!(
		"{}",
		"connected; streaming chat frames (Ctrl-C to stop)".dimmed()
	);
	tokio::signal::ctrl_c().await?;
	channel.disconnect().await;
	Ok(())
}

async fn send_one<T: serde::Serialize>(
	config: ChannelConfig,
	credentials: Arc<dyn CredentialProvider>,
	frame: &T,
) -> Result<()> {
	let channel = ChatChannel::new(config, credentials, Arc::new(|_frame| {}));
	channel.connect().await?;
	if !channel.wait_connected(OPEN_DEADLINE).await {
		bail!("chat channel did not open within {OPEN_DEADLINE:?}");
	}

	if !channel.send(frame) {
		channel.disconnect().await;
		bail!("frame was not sent; channel closed while sending");
	}
	// disconnect() drains the writer, so the frame is flushed before the
	// close frame goes out.
	channel.disconnect().await;
	eprintln!("{}", "sent".green());
	Ok(())
}
