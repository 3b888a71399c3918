use std::{error::Error, net::SocketAddr, process};

use clap::Parser;
use log::info;
use seqlink::{Server, services};

#[derive(Debug, Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Listen for new connections at address
    address: SocketAddr,
    /// Number of sessions served concurrently
    #[arg(short, long, default_value_t = 15)]
    workers: usize,
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();

    let cli = Cli::parse();
    if cli.workers == 0 {
        return Err("at least one worker is required".into());
    }

    ctrlc::set_handler(|| {
        info!("interrupted, shutting down");
        process::exit(0);
    })?;

    let registry = services::registry();
    info!("services: {registry:?}");
    let server = Server::new(cli.address, cli.workers, registry);

    server.listen()?;
    Ok(())
}
