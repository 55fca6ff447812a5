use anyhow::Context;
use notice_logger::Logger;
use notice_server::{Server, load_config};
use std::path::PathBuf;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let path = std::env::args_os().nth(1).map(PathBuf::from);
    let cfg = load_config(path.as_deref()).context("Critical: Configuration is malformed")?;

    let _log = Logger::from_config(&cfg.logging)?;

    Server::builder().config(cfg).build()?.run().await
}
