use tokio_util::sync::CancellationToken;

mod config;
mod decode;
mod recorder;
mod source;

fn init_logging() {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .filter_module("ffmpeg_writer", log::LevelFilter::Info)
        .filter_module("nvr_recorder", log::LevelFilter::Debug)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging();
    ffmpeg_writer::init()?;
    let config = config::RecorderConfig::load(std::env::args().nth(1).as_deref())?;

    let cancel = CancellationToken::new();
    let recorder = recorder::Recorder::new(config, cancel.clone());
    let mut handle = tokio::task::spawn_blocking(move || recorder.run());

    tokio::select! {
        result = &mut handle => {
            let segments = result??;
            log::info!("input finished after {} segment(s)", segments);
            return Ok(());
        },
        _ = tokio::signal::ctrl_c() => {
            log::info!("stopping recorder");
            cancel.cancel();
        },
    }

    let segments = handle.await??;
    log::info!("recorder stopped after {} segment(s)", segments);
    Ok(())
}
