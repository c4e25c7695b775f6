//! Command-line interface for voxlink
//!
//! Provides argument parsing using clap derive macros.

use crate::codec::CodecKind;
use crate::gate::strategy::GateMode;
use clap::{Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;
use std::time::Duration;

/// Voice-assistant audio streaming core, simulated on the host
#[derive(Parser, Debug)]
#[command(
    name = "voxlink",
    version,
    about = "Voice-assistant audio streaming core, simulated on the host"
)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Path to configuration file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Suppress event output (quiet mode)
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Verbose logging (-v: debug, -vv: trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

/// Parse a duration string.
///
/// Supports any duration format accepted by `humantime`: bare numbers (seconds),
/// single-unit (`30s`, `5m`, `2h`), and compound (`1m30s`).
fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    if let Ok(secs) = s.parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }
    humantime::parse_duration(s).map_err(|e| e.to_string())
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Stream a WAV file through the pipeline against a loopback chat service
    Run {
        /// WAV file replayed as the microphone
        #[arg(long, short = 'i', value_name = "FILE")]
        input: PathBuf,

        /// WAV file receiving everything the speaker plays
        #[arg(long, short = 'o', value_name = "FILE")]
        output: Option<PathBuf>,

        /// Gate mode override
        #[arg(long, value_enum)]
        mode: Option<GateMode>,

        /// Downlink codec override (opus needs the `opus` feature)
        #[arg(long, value_enum)]
        codec: Option<CodecKind>,

        /// Stop after this long even if the input has not run out (e.g. 30s, 2m)
        #[arg(long, short = 'd', value_name = "DURATION", value_parser = parse_duration)]
        duration: Option<Duration>,

        /// WAV clip played as a local prompt once the pipeline is up
        #[arg(long, value_name = "FILE")]
        prompt: Option<PathBuf>,

        /// Do not echo recorded utterances back through the downlink
        #[arg(long)]
        no_reply: bool,

        /// Print pipeline counters on exit
        #[arg(long)]
        stats: bool,
    },

    /// View and create configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        shell: Shell,
    },
}

/// Configuration management actions
#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Print the effective configuration as TOML
    Show,
    /// Write the default configuration to the config path
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
    /// Print the default configuration file path
    Path,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_run_minimal() {
        let cli = Cli::try_parse_from(["voxlink", "run", "--input", "in.wav"]).unwrap();
        match cli.command {
            Commands::Run {
                input,
                output,
                mode,
                codec,
                duration,
                prompt,
                no_reply,
                stats,
            } => {
                assert_eq!(input, PathBuf::from("in.wav"));
                assert!(output.is_none());
                assert!(mode.is_none());
                assert!(codec.is_none());
                assert!(duration.is_none());
                assert!(prompt.is_none());
                assert!(!no_reply);
                assert!(!stats);
            }
            other => panic!("expected run, got {:?}", other),
        }
        assert!(!cli.quiet);
        assert_eq!(cli.verbose, 0);
        assert!(cli.config.is_none());
    }

    #[test]
    fn test_parse_run_with_options() {
        let cli = Cli::try_parse_from([
            "voxlink",
            "run",
            "-i",
            "in.wav",
            "-o",
            "out.wav",
            "--mode",
            "voice-activity",
            "--codec",
            "opus",
            "--duration",
            "1m30s",
            "--stats",
        ])
        .unwrap();
        match cli.command {
            Commands::Run {
                output,
                mode,
                codec,
                duration,
                stats,
                ..
            } => {
                assert_eq!(output, Some(PathBuf::from("out.wav")));
                assert_eq!(mode, Some(GateMode::VoiceActivity));
                assert_eq!(codec, Some(CodecKind::Opus));
                assert_eq!(duration, Some(Duration::from_secs(90)));
                assert!(stats);
            }
            other => panic!("expected run, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_run_requires_input() {
        assert!(Cli::try_parse_from(["voxlink", "run"]).is_err());
    }

    #[test]
    fn test_parse_rejects_unknown_mode() {
        assert!(
            Cli::try_parse_from(["voxlink", "run", "-i", "a.wav", "--mode", "telepathy"]).is_err()
        );
    }

    #[test]
    fn test_parse_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["voxlink", "config", "show", "-vv", "--config", "x.toml"])
            .unwrap();
        assert_eq!(cli.verbose, 2);
        assert_eq!(cli.config, Some(PathBuf::from("x.toml")));
        assert!(matches!(
            cli.command,
            Commands::Config {
                action: ConfigAction::Show
            }
        ));
    }

    #[test]
    fn test_parse_config_init_force() {
        let cli = Cli::try_parse_from(["voxlink", "config", "init", "--force"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Config {
                action: ConfigAction::Init { force: true }
            }
        ));
    }

    #[test]
    fn test_parse_completions() {
        let cli = Cli::try_parse_from(["voxlink", "completions", "bash"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Completions { shell: Shell::Bash }
        ));
    }

    #[test]
    fn test_parse_duration_forms() {
        assert_eq!(parse_duration("45"), Ok(Duration::from_secs(45)));
        assert_eq!(parse_duration("250ms"), Ok(Duration::from_millis(250)));
        assert!(parse_duration("soon").is_err());
    }

    #[test]
    fn test_command_definition_is_valid() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
