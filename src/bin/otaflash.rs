use clap::{Parser, Subcommand};
use log::{debug, LevelFilter};
use miette::Result;
use otaflash::{
    cli::{self, config::Config, DownloadArgs, EraseArgs},
    logging::initialize_logger,
};

#[derive(Debug, Parser)]
#[command(about, max_term_width = 100, propagate_version = true, version)]
struct Cli {
    #[command(subcommand)]
    subcommand: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Download a firmware image into the target region
    ///
    /// The image is streamed from the source directory in chunks and written
    /// to the region in whole blocks. The download fails if the number of
    /// bytes received or written does not match the length declared by the
    /// source.
    Download(DownloadArgs),
    /// Erase the target region
    Erase(EraseArgs),
}

fn main() -> Result<()> {
    miette::set_panic_hook();
    initialize_logger(LevelFilter::Info);

    // Attempt to parse any provided command-line arguments, or print the help
    // message and terminate if the invocation is not correct.
    let args = Cli::parse().subcommand;
    debug!("{:#?}", args);

    // Load any user configuration, if present.
    let config = Config::load()?;

    // Execute the correct action based on the provided subcommand and its
    // associated arguments.
    match args {
        Commands::Download(args) => cli::download(args, &config).map(|_| ()),
        Commands::Erase(args) => cli::erase(args, &config),
    }
}
