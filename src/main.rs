use clap::Parser;

use relaymark::cli::{self, Cli, Command, ConfigCommand};
use relaymark::config;
use relaymark::logging;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Cli::parse();
    let config_path = config::get_config_path(args.config.as_deref());

    // Logging follows the config when it loads; otherwise the defaults apply
    // and the command reports the load error itself.
    let logging_config = config::load_config(&config_path)
        .map(|cfg| cfg.logging)
        .unwrap_or_default();
    logging::init(&logging_config)?;

    match args.command {
        Command::Watermark {
            input,
            output,
            seed,
        } => cli::handle_watermark(&config_path, &input, &output, seed).await,
        Command::Probe { file } => cli::handle_probe(&config_path, &file).await,
        Command::Config(ConfigCommand::Show) => cli::handle_config_show(&config_path),
        Command::Config(ConfigCommand::Path) => {
            cli::handle_config_path(&config_path);
            Ok(())
        }
        Command::Config(ConfigCommand::Validate) => cli::handle_config_validate(&config_path),
        Command::Version => {
            cli::handle_version();
            Ok(())
        }
    }
}
