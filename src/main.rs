#[macro_use]
extern crate log;

use std::process::ExitCode;

use anyhow::Context;
use vsock_proxy::config::Config;

fn main() -> anyhow::Result<ExitCode> {
    let config = Config::from_args().with_context(|| "Failed to read config")?;
    init_logger(&config)?;
    debug!("Parsed arguments: {:?}", config);

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_io()
        .build()
        .with_context(|| "Failed to create runtime")?;

    let state = runtime.block_on(vsock_proxy::run(config))?;
    let code = state.exit_code().unwrap_or(1);
    debug!("Exiting with status {} ({})", code, state);
    Ok(ExitCode::from(code))
}

fn init_logger(config: &Config) -> anyhow::Result<()> {
    let mut builder = pretty_env_logger::formatted_timed_builder();
    builder.parse_filters(&config.log);
    builder
        .try_init()
        .with_context(|| "Failed to initialize logger")
}
