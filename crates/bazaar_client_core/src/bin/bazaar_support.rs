#![forbid(unsafe_code)]

use std::sync::Arc;

use bazaar_client_core::{ChatDeps, ChatEvent, ClientConfig, start_chat};
use bazaar_domain::{RoomName, UserId};
use bazaar_platform::feed::{FeedClient, FeedConfig};
use bazaar_platform::memory::MemoryBackend;
use bazaar_platform::rest::{RestBackend, RestConfig};
use bazaar_platform::watermark::{FileWatermarks, default_watermark_path};
use bazaar_platform::SecretString;
use bazaar_util::endpoint::BaseEndpoint;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;

fn usage_and_exit() -> ! {
	eprintln!(
		"Usage: bazaar_support --endpoint https://host[:port] [--feed wss://host/feed] [--operator id]...\n\
\n\
Options:\n\
	--endpoint  Platform base endpoint (https://host[:port])\n\
	--feed      Change-feed websocket URL (default: derived from --endpoint)\n\
	--operator  User id treated as support staff (repeatable)\n\
	--demo      Run against an in-memory backend, no network\n\
	--help      Show this help\n\
\n\
Environment:\n\
	BAZAAR_ANON_KEY      Public anon key (required unless --demo)\n\
	BAZAAR_ACCESS_TOKEN  User access token from the login flow\n\
\n\
Commands on stdin:\n\
	/open               Open the chat panel\n\
	/room <name>        Open a room by name\n\
	/dm <user-id>       Open a direct conversation\n\
	/new <name>         Create a named room (operators only)\n\
	/inbox              Refresh the inbox (operators only)\n\
	/close              Close the panel\n\
	<anything else>     Send it as a message\n"
	);
	std::process::exit(2)
}

fn init_tracing() {
	let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info,bazaar_client_core=debug".to_string());
	tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();
}

struct Args {
	endpoint: Option<BaseEndpoint>,
	feed_url: Option<String>,
	operators: Vec<UserId>,
	demo: bool,
}

fn parse_args() -> Args {
	let mut args = Args {
		endpoint: None,
		feed_url: None,
		operators: Vec::new(),
		demo: false,
	};

	let mut it = std::env::args().skip(1);
	while let Some(arg) = it.next() {
		match arg.as_str() {
			"--help" | "-h" => usage_and_exit(),
			"--endpoint" => {
				let v = it.next().unwrap_or_else(|| usage_and_exit());
				let parsed = BaseEndpoint::parse(&v).unwrap_or_else(|e| {
					eprintln!("Invalid --endpoint value: {v}\n{e}");
					usage_and_exit()
				});
				args.endpoint = Some(parsed);
			}
			"--feed" => {
				let v = it.next().unwrap_or_else(|| usage_and_exit());
				if v.trim().is_empty() {
					eprintln!("--feed must be non-empty");
					usage_and_exit();
				}
				args.feed_url = Some(v);
			}
			"--operator" => {
				let v = it.next().unwrap_or_else(|| usage_and_exit());
				let id = v.parse().unwrap_or_else(|e| {
					eprintln!("Invalid --operator value: {v}\n{e}");
					usage_and_exit()
				});
				args.operators.push(id);
			}
			"--demo" => args.demo = true,
			other => {
				eprintln!("Unknown argument: {other}");
				usage_and_exit();
			}
		}
	}

	if !args.demo && args.endpoint.is_none() {
		eprintln!("--endpoint is required unless --demo is set");
		usage_and_exit();
	}
	args
}

fn demo_deps(config: ClientConfig) -> ChatDeps {
	let backend = MemoryBackend::new();
	let me = UserId::new("demo-user").unwrap_or_else(|_| usage_and_exit());
	backend.sign_in(&me);
	ChatDeps {
		auth: Arc::new(backend.clone()),
		store: Arc::new(backend.clone()),
		feed: Arc::new(backend.clone()),
		relay: Arc::new(backend.clone()),
		watermarks: Arc::new(backend),
		config,
	}
}

fn rest_deps(args: &Args, config: ClientConfig) -> anyhow::Result<ChatDeps> {
	let endpoint = args.endpoint.clone().ok_or_else(|| anyhow::anyhow!("missing endpoint"))?;
	let anon_key = std::env::var("BAZAAR_ANON_KEY").map_err(|_| anyhow::anyhow!("BAZAAR_ANON_KEY is not set"))?;

	let backend = Arc::new(RestBackend::new(RestConfig {
		endpoint: endpoint.clone(),
		anon_key: SecretString::new(anon_key),
	}));
	if let Ok(token) = std::env::var("BAZAAR_ACCESS_TOKEN")
		&& !token.trim().is_empty()
	{
		backend.set_access_token(SecretString::new(token.trim().to_string()));
	}

	let feed_url = args
		.feed_url
		.clone()
		.unwrap_or_else(|| format!("wss://{}/realtime/v1", endpoint.host));
	let feed = FeedClient::spawn(FeedConfig::new(feed_url));
	let watermarks = FileWatermarks::open(default_watermark_path()?)?;

	Ok(ChatDeps {
		auth: backend.clone(),
		store: backend.clone(),
		feed: Arc::new(feed),
		relay: backend,
		watermarks: Arc::new(watermarks),
		config,
	})
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	init_tracing();
	let args = parse_args();

	let config = ClientConfig {
		operator_ids: args.operators.iter().cloned().collect(),
		..ClientConfig::default()
	};

	let deps = if args.demo { demo_deps(config) } else { rest_deps(&args, config)? };
	let mut control = start_chat(deps);
	control.open()?;
	info!("chat panel opening; type /help-less commands or a message");

	let mut lines = BufReader::new(tokio::io::stdin()).lines();
	loop {
		tokio::select! {
			event = control.recv_event() => {
				let Some(event) = event else {
					break;
				};
				print_event(event);
			}

			line = lines.next_line() => {
				let Ok(Some(line)) = line else {
					break;
				};
				if let Err(e) = dispatch_line(&control, line.trim()) {
					eprintln!("{e}");
					break;
				}
			}
		}
	}

	Ok(())
}

fn dispatch_line(control: &bazaar_client_core::ChatController, line: &str) -> anyhow::Result<()> {
	if line.is_empty() {
		return Ok(());
	}

	match line.split_once(' ') {
		Some(("/room", name)) => control.open_by_name(name.trim().parse::<RoomName>()?)?,
		Some(("/dm", other)) => control.open_direct(other.trim().parse::<UserId>()?)?,
		Some(("/new", name)) => control.create_room(name.trim().parse::<RoomName>()?)?,
		None if line == "/open" => control.open()?,
		None if line == "/inbox" => control.refresh_inbox()?,
		None if line == "/close" => control.close()?,
		_ => control.send_message(line)?,
	}
	Ok(())
}

fn print_event(event: ChatEvent) {
	match event {
		ChatEvent::SessionRequired => println!("* sign in first (set BAZAAR_ACCESS_TOKEN)"),
		ChatEvent::RoomOpened(room) => println!("* opened {} ({})", room.name, room.id),
		ChatEvent::TranscriptLoaded { messages, .. } => {
			for msg in messages {
				println!("{}: {}", msg.author_label, msg.message.text);
			}
		}
		ChatEvent::MessageAppended { message, .. } => {
			println!("{}: {}", message.author_label, message.message.text);
		}
		ChatEvent::InboxUpdated(entries) => {
			for entry in entries {
				let marker = match &entry.meta {
					Some(meta) if meta.unread => "*",
					_ => " ",
				};
				let preview = entry.meta.as_ref().map(|m| m.preview.as_str()).unwrap_or("(no messages yet)");
				println!("{marker} {}  {preview}", entry.room.name);
			}
		}
		ChatEvent::UnreadBadge(n) if n > 0 => println!("* {n} unread"),
		ChatEvent::UnreadBadge(_) => {}
		ChatEvent::Notice(text) => println!("* {text}"),
		ChatEvent::Warning(text) => eprintln!("! {text}"),
		ChatEvent::AuthChanged(change) => println!("* auth changed: {change:?}"),
	}
}
