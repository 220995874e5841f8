use clap::{Parser, Subcommand};
use mediastream::{HttpConnector, InputMediaStream, SeekSupport, Server, SessionRegistry, StreamerConfig};
use std::io;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser)]
#[command(
    name = "mediastream",
    about = "HTTP/DLNA media relay with trick-play support"
)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Relay client requests to an upstream media server
    Serve {
        /// Bind address (host:port)
        #[arg(long, short, default_value = "0.0.0.0:8080")]
        bind: String,

        /// Upstream base URL; the client request path is appended
        #[arg(long, short)]
        upstream: String,

        /// DLNA profile advertised in contentFeatures.dlna.org
        #[arg(long)]
        profile: Option<String>,

        /// Seek domains advertised to clients
        #[arg(long, value_enum, default_value = "byte")]
        seek: Seek,

        /// Upstream connect timeout in seconds
        #[arg(long, default_value_t = 5)]
        connect_timeout: u64,
    },
    /// Send a HEAD request and print the upstream response head
    Head {
        /// Media URL
        url: String,
    },
}

#[derive(Clone, Copy, clap::ValueEnum)]
enum Seek {
    None,
    Time,
    Byte,
    Both,
}

impl From<Seek> for SeekSupport {
    fn from(seek: Seek) -> Self {
        match seek {
            Seek::None => SeekSupport::None,
            Seek::Time => SeekSupport::Time,
            Seek::Byte => SeekSupport::Byte,
            Seek::Both => SeekSupport::Both,
        }
    }
}

fn main() -> ExitCode {
    tracing_subscriber::fmt::init();

    let args = Args::parse();

    match args.command {
        Command::Serve {
            bind,
            upstream,
            profile,
            seek,
            connect_timeout,
        } => {
            let defaults = StreamerConfig::default();
            let config = StreamerConfig {
                dlna_profile: profile.or(defaults.dlna_profile.clone()),
                seek_support: seek.into(),
                connect_timeout: Duration::from_secs(connect_timeout),
                ..defaults
            };
            serve(&bind, &upstream, config)
        }
        Command::Head { url } => head(&url),
    }
}

fn serve(bind: &str, upstream: &str, config: StreamerConfig) -> ExitCode {
    let mut server = Server::with_config(bind, upstream, config);

    if let Err(e) = server.start() {
        eprintln!("Failed to start server: {}", e);
        return ExitCode::FAILURE;
    }

    println!("Relaying {} -> {}, press Enter to stop", bind, upstream);
    let mut input = String::new();
    if let Err(e) = io::stdin().read_line(&mut input) {
        eprintln!("Failed to read stdin: {}", e);
    }

    server.stop();
    ExitCode::SUCCESS
}

fn head(url: &str) -> ExitCode {
    let registry = SessionRegistry::new();
    let result = HttpConnector::new(&StreamerConfig::default())
        .and_then(|connector| InputMediaStream::new(&registry, url, Arc::new(connector)))
        .and_then(|stream| stream.open_head_request(url));

    match result {
        Ok(head) => {
            println!("{} {}", head.status_code, head.reason);
            for (name, value) in &head.headers {
                println!("{}: {}", name, value);
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("HEAD request failed: {}", e);
            ExitCode::FAILURE
        }
    }
}
