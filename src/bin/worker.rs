//! Worker executable: connects to a coordinator and processes batches until
//! the coordinator has nothing left.
//!
//! ```text
//! streamweave-worker --id=<id> (--host=<host> --port=<port> | --socket=<path>) [--serializer=json|base64_json]
//! ```

use std::process::ExitCode;
use streamweave_pool::config::WorkerArgs;
use streamweave_pool::processor::Processor;
use streamweave_pool::worker::{ClientProtocol, SocketClient};
use tracing::{error, info};

#[tokio::main]
async fn main() -> ExitCode {
  // The launcher forwards stdout lines into the coordinator's log.
  tracing_subscriber::fmt()
    .with_writer(std::io::stdout)
    .with_ansi(false)
    .init();

  let args = match WorkerArgs::parse_from(std::env::args().skip(1)) {
    Ok(args) => args,
    Err(e) => {
      eprintln!("streamweave-worker: {}", e);
      return ExitCode::from(2);
    }
  };

  let client = SocketClient::new().with_serializer(args.serializer.build());
  let protocol = ClientProtocol::new(Processor::new(args.id.clone()));
  match client.connect(args.address(), protocol).await {
    Ok(protocol) => {
      info!(worker = %args.id, processed = protocol.processed(), "Worker finished");
      ExitCode::SUCCESS
    }
    Err(e) => {
      error!(worker = %args.id, error = %e, "Worker failed");
      ExitCode::FAILURE
    }
  }
}
