//! Canvas server binary.
//!
//! ```text
//! scrawl-collab-server [bind_addr]
//! ```
//!
//! Logging is configured through `RUST_LOG` (env_logger).

use scrawl_collab::{CanvasServer, ServerConfig};

#[tokio::main]
async fn main() {
    env_logger::init();

    let mut config = ServerConfig::default();
    if let Some(addr) = std::env::args().nth(1) {
        config.bind_addr = addr;
    }

    let server = CanvasServer::new(config);
    log::info!("starting canvas server on {}", server.bind_addr());

    if let Err(e) = server.run().await {
        log::error!("server exited with error: {e}");
        std::process::exit(1);
    }
}
