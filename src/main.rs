use clap::{ArgAction, Parser, Subcommand};
use peerlog::{
    client::console,
    config::Config,
    peer::Peer,
    server::Server,
};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "peerlog", about = "Replicated chat log with voted edits", version)]
struct CliOpts {
    /// Logging verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    /// TOML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the rendezvous server
    Server {
        /// Address to accept peers on
        #[arg(long)]
        listen: Option<String>,
    },
    /// Join as a peer
    Peer {
        /// Server address
        #[arg(long)]
        server: Option<String>,

        /// Directory for the log snapshot
        #[arg(long)]
        data_dir: Option<PathBuf>,

        /// Give up on an edit when votes are missing after this many milliseconds
        #[arg(long)]
        vote_timeout_ms: Option<u64>,

        /// Reload the log snapshot left by a previous run
        #[arg(long)]
        resume: bool,
    },
}

#[actix_rt::main]
async fn main() -> anyhow::Result<()> {
    let opts = CliOpts::parse();

    let level = match opts.verbose {
        0 => tracing::Level::INFO,
        1 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();

    let mut config = match &opts.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };

    match opts.command {
        Command::Server { listen } => {
            if let Some(listen) = listen {
                config.server.listen_addr = listen;
            }
            run_server(config).await
        }
        Command::Peer {
            server,
            data_dir,
            vote_timeout_ms,
            resume,
        } => {
            if let Some(server) = server {
                config.peer.server_addr = server;
            }
            if let Some(data_dir) = data_dir {
                config.peer.data_dir = data_dir;
            }
            if vote_timeout_ms.is_some() {
                config.peer.vote_timeout_ms = vote_timeout_ms;
            }
            config.peer.resume_log |= resume;
            run_peer(config).await
        }
    }
}

async fn run_server(config: Config) -> anyhow::Result<()> {
    let server = Server::bind(&config.server).await?;
    println!("Server listening on {}", server.local_addr()?);

    tokio::select! {
        result = server.run() => result?,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutting down server");
        }
    }
    Ok(())
}

async fn run_peer(config: Config) -> anyhow::Result<()> {
    let (peer, events) = Peer::connect(config.peer).await?;

    tokio::spawn(async {
        while tokio::signal::ctrl_c().await.is_ok() {
            println!("Type /exit in order to disconnect.");
        }
    });

    console::run(peer, events).await?;
    Ok(())
}
