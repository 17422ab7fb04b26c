mod config;
mod seed;
mod serve;

use std::path::PathBuf;
use std::process;

use clap::{Args, Parser, Subcommand};
use lastmile_auth::{Claims, Role, TokenCodec};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::config::ServerConfig;

/// Delivery tracking and dispatch server.
#[derive(Parser)]
#[command(name = "lastmile", version, about = "Delivery tracking and dispatch server")]
struct Cli {
    /// Log filter (e.g. `info`, `lastmile_auth=debug`); RUST_LOG wins when set
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP API server
    Serve(ServeArgs),

    /// Print a signed access token
    Token {
        /// Subject id (user id)
        #[arg(long)]
        subject: String,
        /// Role: admin, dispatcher, support or driver
        #[arg(long)]
        role: String,
        /// Driver id claim (drivers default to the subject)
        #[arg(long)]
        driver_id: Option<String>,
        /// Lifetime in seconds
        #[arg(long, default_value = "3600")]
        ttl_secs: i64,
        /// Signing secret; falls back to LASTMILE_JWT_SECRET
        #[arg(long)]
        secret: Option<String>,
    },
}

#[derive(Args)]
struct ServeArgs {
    /// TOML config file; environment and flags override it
    #[arg(long)]
    config: Option<PathBuf>,
    /// Port to listen on
    #[arg(long)]
    port: Option<u16>,
    /// Identity enrichment endpoint
    #[arg(long)]
    decrypt_url: Option<String>,
    /// Route vendor endpoint
    #[arg(long)]
    route_vendor_url: Option<String>,
    /// Base URL used in tracking links
    #[arg(long)]
    public_base_url: Option<String>,
    /// Seconds between SSE heartbeats
    #[arg(long)]
    heartbeat_secs: Option<u64>,
    /// Refuse unauthenticated requests on driver routes instead of using the
    /// sandbox principal
    #[arg(long)]
    no_demo_fallback: bool,
    /// JSON file of drivers and orders to pre-load
    #[arg(long)]
    seed: Option<PathBuf>,
    /// Path to TLS certificate PEM file (requires --tls-key)
    #[arg(long)]
    tls_cert: Option<PathBuf>,
    /// Path to TLS private key PEM file (requires --tls-cert)
    #[arg(long)]
    tls_key: Option<PathBuf>,
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();
}

fn main() {
    let cli = Cli::parse();
    init_logging(&cli.log_level);

    match cli.command {
        Commands::Serve(args) => cmd_serve(args),
        Commands::Token {
            subject,
            role,
            driver_id,
            ttl_secs,
            secret,
        } => cmd_token(&subject, &role, driver_id, ttl_secs, secret),
    }
}

fn cmd_serve(args: ServeArgs) {
    // Validate TLS flags: both must be provided or neither
    if args.tls_cert.is_some() != args.tls_key.is_some() {
        eprintln!("error: --tls-cert and --tls-key must both be provided");
        process::exit(1);
    }

    let mut config = match ServerConfig::load(args.config.as_deref()) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("error: {}", e);
            process::exit(1);
        }
    };
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(url) = args.decrypt_url {
        config.decrypt_url = Some(url);
    }
    if let Some(url) = args.route_vendor_url {
        config.route_vendor_url = Some(url);
    }
    if let Some(url) = args.public_base_url {
        config.public_base_url = Some(url);
    }
    if let Some(secs) = args.heartbeat_secs {
        config.heartbeat_secs = secs;
    }
    if args.no_demo_fallback {
        config.demo_fallback = false;
    }

    let seed = match args.seed.as_deref().map(seed::read_seed).transpose() {
        Ok(s) => s,
        Err(e) => {
            eprintln!("error: {}", e);
            process::exit(1);
        }
    };

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("error: failed to create tokio runtime: {}", e);
            process::exit(1);
        }
    };
    if let Err(e) = rt.block_on(serve::start_server(config, seed, args.tls_cert, args.tls_key)) {
        eprintln!("Server error: {}", e);
        process::exit(1);
    }
}

fn cmd_token(
    subject: &str,
    role: &str,
    driver_id: Option<String>,
    ttl_secs: i64,
    secret: Option<String>,
) {
    let Some(role) = Role::parse(role) else {
        eprintln!(
            "error: unknown role '{}' (expected admin, dispatcher, support or driver)",
            role
        );
        process::exit(1);
    };
    if ttl_secs <= 0 {
        eprintln!("error: --ttl-secs must be positive");
        process::exit(1);
    }
    let Some(secret) = secret
        .or_else(|| std::env::var("LASTMILE_JWT_SECRET").ok())
        .filter(|s| !s.is_empty())
    else {
        eprintln!("error: --secret or LASTMILE_JWT_SECRET is required");
        process::exit(1);
    };

    let mut claims = Claims::new(subject, role.as_str(), ttl_secs);
    claims.driver_id = match role {
        Role::Driver => Some(driver_id.unwrap_or_else(|| subject.to_string())),
        _ => driver_id,
    };
    if role == Role::Admin {
        claims.admin_id = Some(subject.to_string());
    }

    println!("{}", TokenCodec::new(secret).sign(&claims));
}
