//! The game-control + invoice-delivery host process.

use anyhow::Context;

mod cli;
mod run;

fn main() -> anyhow::Result<()> {
    let args = argh::from_env::<cli::Args>();
    pobox_logger::init();

    let config = args.into_config()?;
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("could not build tokio runtime")?;
    runtime.block_on(run::run(config))
}
