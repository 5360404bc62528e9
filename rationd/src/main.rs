mod config;
mod net;

use std::{process, sync::Arc};

use config::Config;
use ration::{reputation::RedisReputation, store::MySqlStore, Engine};
use tokio::{net::TcpListener, sync::watch};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
	let config = match Config::get() {
		Ok(Some(config)) => config,
		Ok(None) => return,
		Err(err) => {
			eprintln!("{}", err);
			process::exit(1);
		}
	};

	let default_level = if config.debug { "debug" } else { "info" };
	tracing_subscriber::fmt()
		.with_ansi(std::io::IsTerminal::is_terminal(&std::io::stderr()))
		.with_env_filter(
			EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
		)
		.init();

	if config.debug {
		info!("starting in debug mode");
	}

	let listener = match TcpListener::bind(config.socket_address()).await {
		Ok(listener) => listener,
		Err(err) => {
			error!(address = %config.socket_address(), "failed to listen: {}", err);
			process::exit(1);
		}
	};

	let store = match MySqlStore::connect(config.database.connect_options(), config.tables.clone()).await {
		Ok(store) => store,
		Err(err) => {
			error!(host = %config.database.host, "failed to connect to the policy store: {}", err);
			process::exit(1);
		}
	};

	let reputation = match &config.reputation_address {
		None => None,
		Some(address) => match RedisReputation::open(address) {
			Ok(reputation) => {
				info!(address = %address, "reputation checks enabled");
				Some(reputation)
			}
			Err(err) => {
				error!(address = %address, "bad reputation cache address: {}", err);
				process::exit(1);
			}
		},
	};

	let engine = Arc::new(Engine::new(store, reputation, config.engine.clone()));

	let (tx, rx) = watch::channel(false);
	let signal_listener = tokio::spawn(async move {
		use tokio::signal::unix::{signal, SignalKind};

		let terminate = async {
			match signal(SignalKind::terminate()) {
				Ok(mut terminate) => {
					terminate.recv().await;
				}
				Err(err) => {
					error!("failed to install the SIGTERM handler: {}", err);
					std::future::pending::<()>().await;
				}
			}
		};

		tokio::select! {
			_ = tokio::signal::ctrl_c() => (),
			_ = terminate => (),
		};

		info!("received shutdown signal, no longer accepting connections");
		let _ = tx.send(true);
	});

	info!(address = %config.socket_address(), limit = ?config.connection_limit, "accepting policy requests");

	let result = net::listen(listener, engine, config.connection_limit, rx).await;
	signal_listener.abort();

	if let Err(err) = result {
		error!("error accepting connection: {}", err);
		process::exit(1);
	}
}
