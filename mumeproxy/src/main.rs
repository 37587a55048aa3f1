use std::process::exit;

use clap::Parser;
use tokio::runtime;
use tracing::{error, info, instrument};

use mumeproxy::config::GlobalConfig;
use mumeproxy::error::Error;
use mumeproxy::{cli, logging, proxy};

fn main() -> Result<(), Error> {
    #[instrument(skip(args))]
    async fn main(args: cli::Args) -> Result<(), Error> {
        info!(args = ?args, "starting proxy");

        let config = GlobalConfig::new(&args)?;
        proxy::run(&config).await
    }

    let args = cli::Args::parse();
    logging::init(&args)?;

    let runtime = runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(Error::from)?;

    match runtime.block_on(main(args)) {
        Ok(()) => Ok(()),
        Err(e) => {
            error!("{e}");
            eprintln!("{e}");
            exit(1);
        }
    }
}
