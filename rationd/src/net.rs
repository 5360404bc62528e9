use std::sync::Arc;

use ration::{
	net::serve,
	reputation::Reputation,
	store::{Blocklist, QuotaStore},
	Engine,
};
use tokio::{
	io,
	net::TcpListener,
	sync::{watch, Semaphore},
};
use tracing::debug;

/// How many connections may be served at once.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ConnectionLimit {
	/// Spawn a task for every connection as soon as it's accepted
	#[default]
	Unbounded,
	/// Stop accepting while this many connections are being served
	Limited(usize),
}

impl ConnectionLimit {
	/// Zero means no limit
	pub fn from_count(count: usize) -> Self {
		match count {
			0 => Self::Unbounded,
			n => Self::Limited(n),
		}
	}
}

// Accepts until told to shut down, one task per connection. An accept error
// ends the loop and is handed back to the caller.
pub async fn listen<S, R>(
	listener: TcpListener,
	engine: Arc<Engine<S, R>>,
	limit: ConnectionLimit,
	mut rx: watch::Receiver<bool>,
) -> io::Result<()>
where
	S: QuotaStore + Blocklist + 'static,
	R: Reputation + 'static,
{
	let permits = match limit {
		ConnectionLimit::Unbounded => None,
		ConnectionLimit::Limited(n) => Some(Arc::new(Semaphore::new(n))),
	};

	loop {
		let permit = match &permits {
			None => None,
			Some(permits) => tokio::select! {
				_ = rx.changed() => break,
				permit = permits.clone().acquire_owned() => match permit {
					Ok(permit) => Some(permit),
					Err(_) => break,
				},
			},
		};

		let (stream, clientaddr) = tokio::select! {
			_ = rx.changed() => break,
			accepted = listener.accept() => accepted?,
		};

		debug!(client = %clientaddr, "connection");

		let engine = engine.clone();
		tokio::spawn(async move {
			if let Err(err) = serve(stream, &engine).await {
				debug!(client = %clientaddr, "connection ended early: {}", err);
			}

			drop(permit);
		});
	}

	Ok(())
}
