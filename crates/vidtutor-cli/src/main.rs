use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use vidtutor_core::{
    load_config, missing_credentials, Conversation, RelayEvent, RelayMode, TurnState, VideoInfo,
    VidtutorConfig, ViewerSession, CANCELLED_NOTICE,
};
use vidtutor_schema::{find_segment_at_time, format_time, ChatContext};
use vidtutor_server::state::AppState;

#[derive(Parser)]
#[command(name = "vidtutor", version, about = "AI tutor for YouTube videos")]
struct Cli {
    #[arg(long, default_value = ".", help = "Root directory (contains config/ and logs/)")]
    config_root: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Start the HTTP API")]
    Serve {
        #[arg(long, help = "Override server.bind")]
        bind: Option<String>,
    },
    #[command(about = "Search YouTube videos")]
    Search {
        #[arg(help = "Search terms")]
        query: String,
    },
    #[command(about = "Print a video transcript")]
    Transcript {
        #[arg(help = "YouTube video id")]
        video_id: String,
        #[arg(long, help = "Only print the line spoken at this second")]
        at: Option<f64>,
    },
    #[command(about = "Ask one question about a video")]
    Ask {
        #[arg(help = "YouTube video id")]
        video_id: String,
        #[arg(help = "Question")]
        question: String,
        #[arg(long, default_value_t = 0.0, help = "Playback position in seconds")]
        at: f64,
        #[arg(long, value_enum, default_value_t = ModeArg::Streaming)]
        mode: ModeArg,
    },
    #[command(about = "Interactive tutor REPL for one video")]
    Chat {
        #[arg(help = "YouTube video id")]
        video_id: String,
        #[arg(long, default_value_t = 0.0, help = "Starting playback position in seconds")]
        at: f64,
    },
    #[command(about = "Validate the config file")]
    Validate,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum ModeArg {
    Simple,
    Streaming,
    Tools,
}

impl From<ModeArg> for RelayMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Simple => RelayMode::Simple,
            ModeArg::Streaming => RelayMode::Streaming,
            ModeArg::Tools => RelayMode::ToolAugmented,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let _guard = init_tracing(&cli.config_root)?;

    match cli.command {
        Commands::Validate => {
            let config = load_config(&cli.config_root)?;
            println!(
                "Config valid. chat model {}, gate threshold {}, bind {}.",
                config.llm.chat_model, config.frame_gate.similarity_threshold, config.server.bind
            );
            for key in missing_credentials(&config) {
                println!("Warning: {key} is not set.");
            }
        }
        Commands::Serve { bind } => {
            let mut config = bootstrap(&cli.config_root)?;
            if let Some(bind) = bind {
                config.server.bind = bind;
            }
            let addr = config.server.bind.clone();
            vidtutor_server::serve(AppState::from_config(config), &addr).await?;
        }
        Commands::Search { query } => {
            let state = AppState::from_config(bootstrap(&cli.config_root)?);
            let results = state.youtube.search(&query).await;
            if results.is_empty() {
                println!("No videos found.");
            }
            for video in results {
                println!(
                    "{:<13} {:>7}  {}  ({}, {})",
                    video.id, video.view_count, video.title, video.channel_title, video.published_at
                );
            }
        }
        Commands::Transcript { video_id, at } => {
            let state = AppState::from_config(bootstrap(&cli.config_root)?);
            let transcript = state.transcripts.get_or_fetch(&video_id).await;
            match at {
                Some(t) => match find_segment_at_time(&transcript, t) {
                    Some(seg) => println!("[{}] {}", format_time(seg.start_seconds()), seg.text),
                    None => println!("No transcript line at {}.", format_time(t)),
                },
                None => {
                    if transcript.is_empty() {
                        println!("No transcript available.");
                    }
                    for seg in transcript.iter() {
                        println!("[{}] {}", format_time(seg.start_seconds()), seg.text);
                    }
                }
            }
        }
        Commands::Ask {
            video_id,
            question,
            at,
            mode,
        } => {
            let state = AppState::from_config(bootstrap(&cli.config_root)?);
            let session = open_session(&state, &video_id).await;
            session.seek(at).await?;
            ask_once(&state, &session, &question, mode.into()).await?;
        }
        Commands::Chat { video_id, at } => {
            let state = AppState::from_config(bootstrap(&cli.config_root)?);
            run_repl(&state, &video_id, at).await?;
        }
    }

    Ok(())
}

fn init_tracing(root: &Path) -> Result<tracing_appender::non_blocking::WorkerGuard> {
    let log_dir = root.join("logs");
    std::fs::create_dir_all(&log_dir)?;
    let file_appender = tracing_appender::rolling::daily(&log_dir, "vidtutor.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("vidtutor=info,tower_http=debug"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(tracing_subscriber::fmt::layer().with_ansi(false).with_writer(non_blocking))
        .init();

    Ok(guard)
}

fn bootstrap(root: &Path) -> Result<VidtutorConfig> {
    let config = load_config(root)?;
    for key in missing_credentials(&config) {
        tracing::warn!("{key} is not set; requests that need it will fail");
    }
    Ok(config)
}

async fn open_session(state: &AppState, video_id: &str) -> Arc<ViewerSession> {
    let details = state.youtube.video_details(video_id).await;
    let transcript = state.transcripts.get_or_fetch(video_id).await;
    let video = VideoInfo {
        video_id: video_id.to_string(),
        title: details.as_ref().map(|d| d.title.clone()),
        duration_seconds: details.and_then(|d| d.duration_seconds),
    };
    state.sessions.create(video, transcript).await
}

async fn ask_once(
    state: &AppState,
    session: &ViewerSession,
    question: &str,
    mode: RelayMode,
) -> Result<()> {
    let ctx = session.fill_context(ChatContext::default()).await;
    let mut convo = Conversation::new();
    convo.submit(question)?;

    if mode != RelayMode::Streaming {
        let text = state
            .relay
            .respond(mode, convo.messages(), &ctx)
            .await
            .map_err(|e| anyhow!(e.user_message()))?;
        println!("{text}");
        return Ok(());
    }

    let mut events = state.relay.stream(convo.messages(), &ctx)?;
    let mut stdout = std::io::stdout();
    while let Some(event) = events.next().await {
        if let RelayEvent::Fragment(text) = &event {
            print!("{text}");
            stdout.flush()?;
        }
        convo.apply(&event)?;
    }
    println!();
    if convo.turn_state() == TurnState::Failed {
        let message = convo
            .messages()
            .last()
            .map(|m| m.content.clone())
            .unwrap_or_default();
        return Err(anyhow!(message));
    }
    Ok(())
}

async fn run_repl(state: &AppState, video_id: &str, start_at: f64) -> Result<()> {
    let session = open_session(state, video_id).await;
    let mut position = start_at;
    session.seek(position).await?;

    println!(
        "vidtutor REPL for {} ({} transcript lines).",
        session.video.title.as_deref().unwrap_or(video_id),
        session.transcript.len()
    );
    println!("Type ':seek <seconds>' to move the playhead, Ctrl-C to stop an answer, 'quit' to exit.");
    println!("---");

    let mut convo = Conversation::new();
    let stdin = std::io::stdin();
    loop {
        print!("[{}] > ", format_time(position));
        std::io::stdout().flush()?;
        let mut input = String::new();
        if stdin.read_line(&mut input)? == 0 {
            break;
        }
        let input = input.trim();
        if input == "quit" || input == "exit" {
            break;
        }
        if input.is_empty() {
            continue;
        }
        if let Some(arg) = input.strip_prefix(":seek") {
            match arg.trim().parse::<f64>() {
                Ok(seconds) => match session.seek(seconds).await {
                    Ok(_) => position = seconds,
                    Err(err) => eprintln!("Error: {err}"),
                },
                Err(_) => eprintln!("Usage: :seek <seconds>"),
            }
            continue;
        }

        let ctx = session.fill_context(ChatContext::default()).await;
        convo.submit(input)?;
        stream_turn(state, &mut convo, &ctx).await?;
    }

    state.sessions.remove(&session.id).await;
    Ok(())
}

async fn stream_turn(state: &AppState, convo: &mut Conversation, ctx: &ChatContext) -> Result<()> {
    let mut events = match state.relay.stream(convo.messages(), ctx) {
        Ok(events) => events,
        Err(err) => {
            convo.apply(&RelayEvent::Error(err.user_message()))?;
            eprintln!("{}", err.user_message());
            return Ok(());
        }
    };

    let cancel = CancellationToken::new();
    let watcher = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        })
    };

    let mut stdout = std::io::stdout();
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                // Dropping `events` closes the upstream connection.
                convo.cancel();
                println!();
                println!("({CANCELLED_NOTICE})");
                break;
            }
            event = events.next() => {
                let Some(event) = event else { break };
                match &event {
                    RelayEvent::Fragment(text) => {
                        print!("{text}");
                        stdout.flush()?;
                    }
                    RelayEvent::Error(message) => {
                        println!();
                        eprintln!("{message}");
                    }
                    RelayEvent::Done => println!(),
                }
                convo.apply(&event)?;
            }
        }
    }

    watcher.abort();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn parses_serve_with_bind() {
        let cli = Cli::try_parse_from(["vidtutor", "serve", "--bind", "0.0.0.0:8080"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Serve { bind: Some(ref b) } if b == "0.0.0.0:8080"
        ));
    }

    #[test]
    fn parses_ask_with_mode() {
        let cli = Cli::try_parse_from([
            "vidtutor", "ask", "abc", "why?", "--at", "65", "--mode", "tools",
        ])
        .unwrap();
        match cli.command {
            Commands::Ask { video_id, at, mode, .. } => {
                assert_eq!(video_id, "abc");
                assert_eq!(at, 65.0);
                assert_eq!(RelayMode::from(mode), RelayMode::ToolAugmented);
            }
            _ => panic!("expected ask"),
        }
    }

    #[test]
    fn ask_defaults_to_streaming() {
        let cli = Cli::try_parse_from(["vidtutor", "ask", "abc", "why?"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Ask { mode: ModeArg::Streaming, .. }
        ));
    }

    #[test]
    fn parses_transcript_at() {
        let cli = Cli::try_parse_from(["vidtutor", "transcript", "abc", "--at", "12.5"]).unwrap();
        assert!(matches!(cli.command, Commands::Transcript { at: Some(t), .. } if t == 12.5));
    }

    #[test]
    fn bootstrap_loads_defaults_without_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = bootstrap(dir.path()).unwrap();
        assert_eq!(config.frame_gate.min_interval_ms, 1000);
    }
}
