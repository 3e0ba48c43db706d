//! landmark CLI: send tracking calls from the shell, or run the echo fixture.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use landmark_rs::config::{Mode, Options};
use landmark_rs::cookie::FileJar;
use landmark_rs::engine::{Identify, Landmark, Track};
use landmark_rs::model::{Location, Properties};
use landmark_rs::telemetry::{TelemetryConfig, init_telemetry};
use landmark_rs::transport::{RecordingTransport, Reply};

#[derive(Parser)]
#[command(name = "landmark", version = landmark_rs::VERSION, about = "Client-side event tracking")]
struct Cli {
    /// TOML options file (defaults to LANDMARK_* environment variables)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Cookie jar file, so identities persist between runs
    #[arg(long, global = true, default_value = ".landmark/cookies.json")]
    jar: PathBuf,
    /// Page URL the calls are made from
    #[arg(long, global = true, default_value = "http://localhost/")]
    page: String,
    /// Record requests and print them instead of sending
    #[arg(long, global = true)]
    test: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Track an action
    Track {
        action: String,
        /// JSON object of event properties
        #[arg(long)]
        properties: Option<String>,
    },
    /// Track a page view of --page
    Pageview,
    /// Identify the user
    Identify {
        /// User id (omit to add traits to the current user)
        id: Option<String>,
        /// JSON object of user traits
        #[arg(long)]
        traits: Option<String>,
    },
    /// Forget the persisted user
    Logout,
    /// Show the persisted identity
    Whoami,
    /// Serve the echo fixture
    Echo {
        #[arg(long, default_value = "127.0.0.1:8000")]
        addr: SocketAddr,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let guard = init_telemetry(TelemetryConfig::from_env("landmark"))?;

    if let Command::Echo { addr } = cli.command {
        let (local, server) = landmark_rs::echo::spawn(addr).await?;
        println!("echo server on http://{local}/echo");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = server => {}
        }
        return Ok(());
    }

    let mut options = match &cli.config {
        Some(path) => Options::load(path)?,
        None => Options::from_env()?,
    };
    if cli.test {
        options.mode = Mode::Test;
    }

    let recorder = RecordingTransport::new();
    let mut builder = Landmark::builder()
        .jar(Arc::new(FileJar::open(&cli.jar)?))
        .location(Location::parse(&cli.page)?);
    if options.mode == Mode::Test {
        builder = builder.transport(Arc::new(recorder.clone()));
    }
    let client = builder.spawn();

    let whoami = matches!(cli.command, Command::Whoami);
    match cli.command {
        Command::Track { action, properties } => {
            let track = Track::new(action)
                .properties(parse_object(properties.as_deref())?)
                .on_complete(report);
            client.track(track);
        }
        Command::Pageview => client.track(Track::pageview().on_complete(report)),
        Command::Identify { id, traits } => {
            let identify = match id {
                Some(id) => Identify::user(id),
                None => Identify::current(),
            };
            client.identify(
                identify
                    .traits(parse_object(traits.as_deref())?)
                    .on_complete(report),
            );
        }
        Command::Logout => client.logout(),
        Command::Whoami | Command::Echo { .. } => {}
    }

    client.initialize(options);
    client.flush().await?;

    if whoami {
        println!("user:   {}", client.user_id().await?.as_deref().unwrap_or("-"));
        println!("device: {}", client.device_id().await?.as_deref().unwrap_or("-"));
    }
    for url in recorder.requests() {
        println!("GET {url}");
    }

    client.shutdown().await?;
    guard.force_flush();
    Ok(())
}

fn parse_object(json: Option<&str>) -> anyhow::Result<Properties> {
    match json {
        Some(json) => match serde_json::from_str::<serde_json::Value>(json)? {
            serde_json::Value::Object(map) => Ok(map),
            other => anyhow::bail!("expected a JSON object, got {other}"),
        },
        None => Ok(Properties::new()),
    }
}

fn report(success: bool, reply: Reply) {
    let status = if success { "ok" } else { "failed" };
    match reply {
        Reply::Body(body) => println!("{status}: {body}"),
        Reply::Url(url) => println!("{status}: {url}"),
        Reply::Coalesced => println!("{status}: sent with queued event"),
        Reply::Empty => println!("{status}: nothing to send"),
    }
}
