//! CLI subcommand definitions and handlers.
//!
//! Uses clap derive to define the subcommand hierarchy:
//! - `watermark <input> <output>` -- stamp a local file
//! - `probe <file>` -- print stream dimensions and duration
//! - `config show|path|validate` -- inspect configuration
//! - `version` -- print build/version info

use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Watermarking media relay.
#[derive(Parser, Debug)]
#[command(
    name = "relaymark",
    version = env!("CARGO_PKG_VERSION"),
    about = "relaymark - watermarks agent-delivered media and negotiates share links"
)]
pub struct Cli {
    /// Configuration file (default: $RELAYMARK_CONFIG_PATH or the user config dir).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Apply the watermark to a local image or video.
    Watermark {
        /// Source file; never modified.
        input: PathBuf,

        /// Destination of the watermarked file.
        output: PathBuf,

        /// Seed for placement and motion, for reproducible output.
        #[arg(long)]
        seed: Option<u64>,
    },

    /// Print the probe result of a media file as JSON.
    Probe {
        file: PathBuf,
    },

    /// Inspect configuration.
    #[command(subcommand)]
    Config(ConfigCommand),

    /// Print version, build date, and git commit information.
    Version,
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Print the fully loaded configuration as JSON.
    Show,

    /// Print the resolved configuration file path.
    Path,

    /// Load and validate the configuration.
    Validate,
}

// ---------------------------------------------------------------------------
// Subcommand handlers
// ---------------------------------------------------------------------------

use crate::config::{self, Config};
use crate::media::{classify, Classification, MediaInspector, SeededRandom, TokioProcessRunner, WatermarkEngine};

fn load(config_path: &Path) -> Result<Config, Box<dyn std::error::Error>> {
    Ok(config::load_config(config_path)?)
}

/// Run the `watermark` subcommand.
pub async fn handle_watermark(
    config_path: &Path,
    input: &Path,
    output: &Path,
    seed: Option<u64>,
) -> Result<(), Box<dyn std::error::Error>> {
    let cfg = load(config_path)?;
    let mut engine = WatermarkEngine::from_config(&cfg, Arc::new(TokioProcessRunner));
    if let Some(seed) = seed {
        engine = engine.with_random_source(Box::new(SeededRandom::from_seed(seed)));
    }

    let result = match classify(input, None) {
        Classification::Image => engine.apply_image_watermark(input, output).await,
        Classification::Video | Classification::AnimatedImage => {
            engine.apply_video_watermark(input, output).await
        }
    };

    if result == input {
        eprintln!("Watermark not applied; original left at {}", input.display());
        std::process::exit(1);
    }
    println!("{}", result.display());
    Ok(())
}

/// Run the `probe` subcommand.
pub async fn handle_probe(config_path: &Path, file: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let cfg = load(config_path)?;
    let inspector = MediaInspector::new(
        Arc::new(TokioProcessRunner),
        cfg.media.ffprobe_path.clone(),
        cfg.media.process_timeout(),
    );
    let info = inspector.inspect(file).await?;
    println!("{}", serde_json::to_string_pretty(&info)?);
    Ok(())
}

/// Run the `config show` subcommand.
pub fn handle_config_show(config_path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let cfg = load(config_path)?;
    println!("{}", serde_json::to_string_pretty(&cfg)?);
    Ok(())
}

/// Run the `config path` subcommand.
pub fn handle_config_path(config_path: &Path) {
    println!("{}", config_path.display());
}

/// Run the `config validate` subcommand.
pub fn handle_config_validate(config_path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let cfg = load(config_path)?;
    if cfg.channel.target_channel_id.is_none() {
        eprintln!("Warning: channel.targetChannelId is not set; the relay cannot run");
    }
    println!("Configuration OK: {}", config_path.display());
    Ok(())
}

/// Run the `version` subcommand.
pub fn handle_version() {
    println!("relaymark {}", env!("CARGO_PKG_VERSION"));
    println!("  Build date: {}", env!("RELAYMARK_BUILD_DATE"));
    println!("  Git commit: {}", env!("RELAYMARK_GIT_HASH"));
    println!(
        "  Platform:   {} ({})",
        std::env::consts::OS,
        std::env::consts::ARCH
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_version_subcommand() {
        let cli = Cli::try_parse_from(["relaymark", "version"]).unwrap();
        assert!(matches!(cli.command, Command::Version));
        assert!(cli.config.is_none());
    }

    #[test]
    fn test_cli_requires_subcommand() {
        assert!(Cli::try_parse_from(["relaymark"]).is_err());
    }

    #[test]
    fn test_cli_watermark_with_seed() {
        let cli = Cli::try_parse_from(["relaymark", "watermark", "in.mp4", "out.mp4", "--seed", "7"]).unwrap();
        match cli.command {
            Command::Watermark { input, output, seed } => {
                assert_eq!(input, PathBuf::from("in.mp4"));
                assert_eq!(output, PathBuf::from("out.mp4"));
                assert_eq!(seed, Some(7));
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_cli_watermark_requires_output() {
        assert!(Cli::try_parse_from(["relaymark", "watermark", "in.mp4"]).is_err());
    }

    #[test]
    fn test_cli_probe() {
        let cli = Cli::try_parse_from(["relaymark", "probe", "clip.mkv"]).unwrap();
        assert!(matches!(cli.command, Command::Probe { file } if file == Path::new("clip.mkv")));
    }

    #[test]
    fn test_cli_config_subcommands() {
        let cli = Cli::try_parse_from(["relaymark", "config", "show"]).unwrap();
        assert!(matches!(cli.command, Command::Config(ConfigCommand::Show)));
        let cli = Cli::try_parse_from(["relaymark", "config", "path"]).unwrap();
        assert!(matches!(cli.command, Command::Config(ConfigCommand::Path)));
        let cli = Cli::try_parse_from(["relaymark", "config", "validate"]).unwrap();
        assert!(matches!(cli.command, Command::Config(ConfigCommand::Validate)));
    }

    #[test]
    fn test_cli_global_config_flag() {
        let cli = Cli::try_parse_from(["relaymark", "config", "path", "--config", "/tmp/r.json5"]).unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/r.json5")));
    }

    #[test]
    fn test_config_validate_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        assert!(handle_config_validate(&dir.path().join("absent.json5")).is_ok());
    }

    #[test]
    fn test_config_validate_rejects_bad_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json5");
        std::fs::write(&path, "{ watermark: { jpegQuality: 0 } }").unwrap();
        assert!(handle_config_validate(&path).is_err());
    }
}
