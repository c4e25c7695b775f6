use anyhow::{Context, Result, anyhow};
use clap::{CommandFactory, Parser};
use crossbeam_channel::{Receiver, bounded, select};
use owo_colors::OwoColorize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;
use voxlink::audio::{NullSpeaker, Speaker, WavMicrophone, WavSpeaker};
use voxlink::chat::{ChatEvent, EchoChannel};
use voxlink::cli::{Cli, Commands, ConfigAction};
use voxlink::codec;
use voxlink::config::Config;
use voxlink::conversation::{
    ConversationEvent, ConversationMachine, ConversationState, StateChange,
};
use voxlink::defaults;
use voxlink::gate::detector::{EnergyDetector, EnergyDetectorConfig, FrontEndDetector};
use voxlink::gate::event::FrontEndEvent;
use voxlink::gate::strategy::{GateMode, PushToTalk};
use voxlink::output;
use voxlink::pipeline::{Pipeline, PipelineConfig, PipelineParts};
use voxlink::supervisor::{Supervisor, SupervisorInputs};

const ECHO_PACKET: Duration = Duration::from_millis(20);
const ECHO_MAX_UTTERANCE: Duration = Duration::from_secs(30);
const MAIN_POLL: Duration = Duration::from_millis(50);

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet);

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
            let mut config = load_config(cli.config.as_deref())?;
            if let Some(mode) = mode {
                config.gate.mode = mode;
            }
            if let Some(codec) = codec {
                config.downlink.codec = codec;
            }
            config.validate()?;
            run_simulation(
                &config,
                RunOptions {
                    input,
                    output,
                    duration,
                    prompt,
                    reply: !no_reply,
                    stats,
                    quiet: cli.quiet,
                },
            )?;
        }
        Commands::Config { action } => handle_config_command(action, cli.config.as_deref())?,
        Commands::Completions { shell } => {
            clap_complete::generate(shell, &mut Cli::command(), "voxlink", &mut std::io::stdout());
        }
    }

    Ok(())
}

/// Logs go to stderr. `RUST_LOG` wins over the verbosity flags.
fn init_tracing(verbose: u8, quiet: bool) {
    let level = match (quiet, verbose) {
        (true, _) => "warn",
        (false, 0) => "voxlink=info,warn",
        (false, 1) => "voxlink=debug,info",
        (false, _) => "voxlink=trace,debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

/// Load configuration from file or use defaults.
///
/// Priority order:
/// 1. Custom config path from CLI (--config), which must exist
/// 2. Default config path (~/.config/voxlink/config.toml) if present
/// 3. Built-in defaults with environment variable overrides
fn load_config(custom_path: Option<&Path>) -> Result<Config> {
    let config = match custom_path {
        Some(path) => Config::load(path)?,
        None => Config::load_or_default(&Config::default_path()?)?,
    };
    Ok(config.with_env_overrides())
}

fn handle_config_command(action: ConfigAction, custom_path: Option<&Path>) -> Result<()> {
    match action {
        ConfigAction::Show => {
            let config = load_config(custom_path)?;
            print!("{}", config.to_toml()?);
        }
        ConfigAction::Path => {
            let path = config_path(custom_path)?;
            let note = if path.exists() { "" } else { " (not created)" };
            println!("{}{}", path.display(), note.dimmed());
        }
        ConfigAction::Init { force } => {
            let path = config_path(custom_path)?;
            if path.exists() && !force {
                return Err(anyhow!(
                    "{} already exists (use --force to overwrite)",
                    path.display()
                ));
            }
            if let Some(dir) = path.parent() {
                std::fs::create_dir_all(dir)
                    .with_context(|| format!("creating {}", dir.display()))?;
            }
            std::fs::write(&path, Config::default().to_toml()?)
                .with_context(|| format!("writing {}", path.display()))?;
            println!("{} {}", "Wrote".green(), path.display());
        }
    }
    Ok(())
}

fn config_path(custom_path: Option<&Path>) -> Result<PathBuf> {
    match custom_path {
        Some(path) => Ok(path.to_path_buf()),
        None => Ok(Config::default_path()?),
    }
}

struct RunOptions {
    input: PathBuf,
    output: Option<PathBuf>,
    duration: Option<Duration>,
    prompt: Option<PathBuf>,
    reply: bool,
    stats: bool,
    quiet: bool,
}

/// Receivers the run loop renders and reacts to.
struct Monitors {
    states: Receiver<StateChange>,
    events: Receiver<FrontEndEvent>,
    chat: Receiver<ChatEvent>,
}

/// Streams the input file through the whole pipeline with an echoing chat
/// service on the other end, until the input is exhausted and the last reply
/// has played out, or the duration elapses.
fn run_simulation(config: &Config, options: RunOptions) -> Result<()> {
    let format = config.audio_format();
    let mode = config.gate.mode;

    let microphone = WavMicrophone::open(&options.input, &format)?;
    let speaker: Box<dyn Speaker> = match &options.output {
        Some(path) => Box::new(WavSpeaker::create(path, &format)?),
        None => Box::new(NullSpeaker),
    };
    let detector: Option<Box<dyn FrontEndDetector>> = if mode.uses_detector() {
        Some(Box::new(EnergyDetector::new(EnergyDetectorConfig::from(config))))
    } else {
        None
    };
    let packet_bytes = format
        .bytes_for(ECHO_PACKET)
        .min(config.downlink.max_packet_size);
    let mut echo = EchoChannel::new(packet_bytes, ECHO_PACKET)
        .with_max_pending(format.bytes_for(ECHO_MAX_UTTERANCE));
    if let Some(encoder) = codec::open_encoder(config.downlink.codec, format, ECHO_PACKET)? {
        echo = echo.with_encoder(encoder);
    }
    let echo = Arc::new(echo);
    let decoder = codec::open_decoder(config.downlink.codec, format)?;

    let (state_tx, state_rx) = bounded(defaults::EVENT_CHANNEL_CAPACITY);
    let conversation = ConversationMachine::new(config.conversation.queue_capacity)
        .with_listener(state_tx)
        .start()?;
    for event in [
        ConversationEvent::InitDone,
        ConversationEvent::ConfigDone,
        ConversationEvent::WifiConnected,
    ] {
        conversation
            .post(event)
            .map_err(|e| anyhow!("posting {}: {}", event, e))?;
    }

    let (event_tx, event_rx) = bounded(defaults::EVENT_CHANNEL_CAPACITY);
    let (display_tx, display_rx) = bounded(defaults::EVENT_CHANNEL_CAPACITY);
    let (chat_tx, chat_rx) = bounded(defaults::EVENT_CHANNEL_CAPACITY);
    let (forward_tx, forward_rx) = bounded(defaults::EVENT_CHANNEL_CAPACITY);
    let (health_tx, health_rx) = bounded(defaults::EVENT_CHANNEL_CAPACITY);

    let push_to_talk = PushToTalk::new();
    let handle = Pipeline::new(PipelineConfig::from(config))
        .with_event_sender(event_tx)
        .with_event_sender(display_tx)
        .with_chat_event_sender(chat_tx)
        .with_uplink_health_sender(health_tx)
        .with_push_to_talk(push_to_talk.clone())
        .open(PipelineParts {
            microphone: Box::new(microphone),
            speaker,
            detector,
            decoder,
            channel: echo.clone(),
        })?;

    let supervisor = Supervisor::new(conversation.handle(), mode)
        .with_error_threshold(config.conversation.channel_error_threshold)
        .with_chat_forward(forward_tx)
        .spawn(SupervisorInputs {
            events: event_rx,
            chat: chat_rx,
            health: health_rx,
        })?;

    // A file has no key to press: hold it for the whole input
    if mode == GateMode::KeyPress {
        push_to_talk.press();
    }
    if let Some(prompt) = &options.prompt {
        handle.prompt().play_file(prompt)?;
    }

    info!(
        input = %options.input.display(),
        %mode,
        codec = %config.downlink.codec,
        sample_rate = format.sample_rate,
        channels = format.channels,
        "simulation started"
    );

    let origin = Instant::now();
    let deadline = options.duration.map(|d| origin + d);
    let monitors = Monitors {
        states: state_rx,
        events: display_rx,
        chat: forward_rx,
    };
    let mut reply: Option<JoinHandle<usize>> = None;

    loop {
        select! {
            recv(monitors.states) -> msg => if let Ok(change) = msg {
                if !options.quiet {
                    output::render_state_change(origin, &change);
                }
                if change.to == ConversationState::Processing && options.reply {
                    let echo = echo.clone();
                    reply = Some(thread::spawn(move || echo.reply()));
                }
            },
            recv(monitors.events) -> msg => if let Ok(event) = msg
                && !options.quiet
            {
                output::render_front_end_event(origin, &event);
            },
            recv(monitors.chat) -> msg => if let Ok(event) = msg
                && !options.quiet
            {
                output::render_chat_event(origin, &event);
            },
            default(MAIN_POLL) => {}
        }

        if deadline.is_some_and(|d| Instant::now() >= d) {
            info!("duration elapsed");
            break;
        }

        let reply_done = reply.as_ref().is_none_or(|r| r.is_finished());
        let dialog_settled = match conversation.state() {
            ConversationState::Processing => !options.reply,
            ConversationState::Speaking => false,
            _ => true,
        };
        if handle.capture_finished() && reply_done && dialog_settled && handle.is_idle() {
            debug!("input exhausted and output drained");
            break;
        }
    }

    push_to_talk.release();
    if let Some(reply) = reply.take() {
        match reply.join() {
            Ok(bytes) => debug!(bytes, "last reply finished"),
            Err(_) => warn!("echo reply thread panicked"),
        }
    }

    let stats = handle.stats();
    let final_state = conversation.state();
    supervisor.stop().map_err(|e| anyhow!(e))?;
    handle.close()?;
    conversation.stop().map_err(|e| anyhow!(e))?;

    info!(state = %final_state, "simulation finished");
    if options.stats {
        output::render_stats(&stats);
    }
    Ok(())
}
