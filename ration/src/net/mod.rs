use tokio::io::{self, AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::debug;

use crate::{
	engine::Engine,
	protocol::{LineStatus, PolicyRequest, Response},
	reputation::Reputation,
	store::{Blocklist, QuotaStore},
};

/// Reads attribute lines until the blank line that ends a request. A read
/// error or EOF ends the request early; whatever was parsed so far is kept.
/// Bytes that aren't UTF-8 are replaced rather than failing the line, MTAs
/// pass client supplied values like the HELO name through untouched.
pub async fn read_request<R: AsyncRead + Unpin>(stream: R) -> PolicyRequest {
	let mut reader = BufReader::new(stream);
	let mut request = PolicyRequest::new();
	let mut buffer = Vec::new();

	loop {
		buffer.clear();
		match reader.read_until(b'\n', &mut buffer).await {
			Ok(0) => {
				debug!("connection closed before the end of the request");
				break;
			}
			Ok(_) => {}
			Err(err) => {
				debug!("error reading request: {}", err);
				break;
			}
		}

		let line = String::from_utf8_lossy(&buffer);
		match request.push_line(&line) {
			LineStatus::End => break,
			LineStatus::Malformed => debug!(line = line.trim_end(), "skipping malformed line"),
			LineStatus::Attribute | LineStatus::Ignored => {}
		}
	}

	request
}

/// Handles one connection: one request in, one verdict out, then the stream
/// is shut down.
pub async fn serve<T, S, R>(mut stream: T, engine: &Engine<S, R>) -> io::Result<()>
where
	T: AsyncRead + AsyncWrite + Unpin,
	S: QuotaStore + Blocklist,
	R: Reputation,
{
	let request = read_request(&mut stream).await;
	let verdict = engine.decide(&request).await;

	stream
		.write_all(Response::new(verdict).as_string().as_bytes())
		.await?;
	stream.shutdown().await
}
