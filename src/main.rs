use clap::Parser;
use presenced::config::{self, Config};
use presenced::network::server::PresenceServer;
use presenced::shutdown::ShutdownManager;
use presenced::SessionRegistry;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(name = "presenced")]
#[command(about = "Friend list and presence daemon", long_about = None)]
struct Args {
    #[arg(short, long, default_value = "presenced.toml")]
    config: String,

    #[arg(long)]
    listen_addr: Option<String>,

    #[arg(short, long)]
    verbose: bool,

    #[arg(long)]
    generate_config: bool,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    if args.generate_config {
        match Config::default().save_to_file(&args.config) {
            Ok(()) => {
                println!("✓ Wrote default configuration to {}", args.config);
                std::process::exit(0);
            }
            Err(e) => {
                eprintln!("❌ Failed to write {}: {}", args.config, e);
                std::process::exit(1);
            }
        }
    }

    let mut config = match Config::load_or_create(&args.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("❌ Failed to load {}: {}", args.config, e);
            std::process::exit(1);
        }
    };
    if let Some(listen_addr) = args.listen_addr {
        config.server.listen_address = listen_addr;
    }

    setup_logging(&config.logging, args.verbose);
    tracing::info!("🚀 presenced {} starting", env!("CARGO_PKG_VERSION"));

    let registry = Arc::new(SessionRegistry::new(config.presence.clone()));
    let bind_addr = config.server.full_listen_address();
    let server = match PresenceServer::bind(&bind_addr, registry.clone(), &config).await {
        Ok(server) => server,
        Err(e) => {
            tracing::error!("❌ Failed to listen on {}: {}", bind_addr, e);
            std::process::exit(1);
        }
    };
    tracing::info!("👂 Listening on {}", bind_addr);

    let mut shutdown = ShutdownManager::new();
    let token = shutdown.token();
    shutdown.register_task(tokio::spawn(async move {
        if let Err(e) = server.run(token.clone()).await {
            tracing::error!("❌ Server stopped: {}", e);
        }
        // Take the rest of the daemon down with the listener
        token.cancel();
    }));

    let clean = shutdown.wait_for_shutdown().await;
    tracing::info!("👋 Stopped with {} sessions online", registry.online_count());
    if !clean {
        std::process::exit(1);
    }
}

fn setup_logging(config: &config::LoggingConfig, verbose: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let level = if verbose { "trace" } else { &config.level };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    // journald adds its own timestamp and hostname
    let is_systemd =
        std::env::var("JOURNAL_STREAM").is_ok() || std::env::var("INVOCATION_ID").is_ok();

    let hostname = hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown".to_string());
    let short_hostname = hostname.split('.').next().unwrap_or(&hostname).to_string();

    match config.format.as_str() {
        "json" => {
            fmt()
                .json()
                .with_env_filter(filter)
                .with_thread_ids(false)
                .init();
        }
        _ if is_systemd => {
            fmt()
                .with_env_filter(filter)
                .with_target(false)
                .with_thread_ids(false)
                .with_thread_names(false)
                .without_time()
                .compact()
                .init();
        }
        _ => {
            fmt()
                .with_env_filter(filter)
                .with_target(false)
                .with_thread_ids(false)
                .with_thread_names(false)
                .with_timer(CustomTimer {
                    hostname: short_hostname,
                })
                .compact()
                .init();
        }
    }
}

/// UTC time plus the short hostname: `2025-12-10 18:09:43.150 [server1]`.
struct CustomTimer {
    hostname: String,
}

impl tracing_subscriber::fmt::time::FormatTime for CustomTimer {
    fn format_time(&self, w: &mut tracing_subscriber::fmt::format::Writer<'_>) -> std::fmt::Result {
        let now = chrono::Utc::now();
        write!(
            w,
            "{}.{:03} [{}]",
            now.format("%Y-%m-%d %H:%M:%S"),
            now.timestamp_subsec_millis(),
            self.hostname
        )
    }
}
