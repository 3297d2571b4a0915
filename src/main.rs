#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

use anyhow::Result;
use clap::Parser;
use failover_proxy::server;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "failover-proxy", about = "Ordered failover reverse proxy core")]
struct Cli {
    /// Path to the route config file
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// Listen address
    #[arg(short, long, default_value = "0.0.0.0:8080")]
    listen: String,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    server::init_tracing();

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    rt.block_on(server::run(server::BootstrapArgs {
        config_path: cli.config,
        listen: cli.listen,
    }))
}
