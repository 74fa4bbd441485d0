use tokio_util::sync::CancellationToken;

use crate::bridge::Bridge;
use crate::cli::Mode;

mod api;
mod bridge;
mod cli;
mod config;
mod pattern;
mod snapshot;

fn init_logging() {
    env_logger::Builder::new()
        .filter_level(log::LevelFilter::Info)
        .filter_module("stream_bridge", log::LevelFilter::Debug)
        .filter_module("ffmpeg_engine", log::LevelFilter::Debug)
        .parse_default_env()
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging();
    let cli = cli::parse()?;
    ffmpeg_engine::init()?;

    if let Mode::Probe { address, timeout } = cli.mode {
        let info =
            tokio::task::spawn_blocking(move || ffmpeg_engine::probe(&address, timeout)).await??;
        println!("{}", info);
        return Ok(());
    }

    let cancel = CancellationToken::new();
    log::info!("starting {}", cli.mode.name());
    let bridge = Bridge::start(cli.mode, cancel.clone()).await?;

    let state = bridge.state();
    if let Some(path) = cli.snapshot {
        tokio::spawn(snapshot::write_periodically(
            state.snapshot.clone(),
            path,
            cancel.clone(),
        ));
    }
    if let Some(duration) = cli.duration {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {},
                _ = tokio::time::sleep(duration) => {
                    log::info!("ran for {:?}, stopping", duration);
                    cancel.cancel();
                },
            }
        });
    }

    let api = match cli.api {
        Some(addr) => Some(api::start_api_server(addr, state, cancel.clone()).await?),
        None => None,
    };

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                break;
            },
            _ = tokio::signal::ctrl_c() => {
                log::info!("interrupted");
                cancel.cancel();
            },
        }
    }

    bridge.shutdown().await;
    if let Some(api) = api {
        let _ = api.await;
    }
    Ok(())
}
