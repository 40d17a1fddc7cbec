use std::{net::SocketAddr, path::Path, sync::Arc};

use clap::Parser;
use color_eyre::{
    Result,
    eyre::{WrapErr, eyre},
};
use hactl::{
    ConfigStore, ControlPlane, GracefulShutdown, ProxyRuntime, ReloadOrchestrator, Renderer,
    SocketNamer, StatsStreamer, UnixControlSocket, WorkDir,
    adapters::{PidFileStatus, http_api},
    config::{Settings, SettingsValidator, load_settings},
    tracing_setup,
    utils::ShutdownReason,
};
use tracing::Instrument;

#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    #[clap(subcommand)]
    command: Option<Commands>,

    #[clap(short, long, default_value = "hactl.toml")]
    config: String,
}

#[derive(Parser, Debug)]
enum Commands {
    /// Validate a settings file
    Validate {
        /// Settings file to validate
        #[clap(short, long, default_value = "hactl.toml")]
        config: String,
    },
    /// Write a default settings file
    Init {
        /// Output path for the new settings file
        #[clap(short, long, default_value = "hactl.toml")]
        config: String,
    },
    /// Start the control plane (default)
    Serve {
        /// Settings file to use
        #[clap(short, long, default_value = "hactl.toml")]
        config: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let args = Args::parse();

    match args.command {
        Some(Commands::Validate { config }) => validate_command(&config),
        Some(Commands::Init { config }) => init_command(&config).await,
        Some(Commands::Serve { config }) => serve(&config).await,
        None => serve(&args.config).await,
    }
}

async fn serve(config_path: &str) -> Result<()> {
    let settings = load_settings(config_path)?;
    SettingsValidator::validate(&settings).wrap_err("Invalid settings")?;

    tracing_setup::init_tracing_with_config(&settings.logging.level, settings.logging.json)
        .map_err(|e| eyre!("Failed to initialize tracing: {}", e))?;

    tracing::info!("Loaded settings from {config_path}");

    let plane = Arc::new(build_control_plane(&settings).await?);

    match plane
        .bootstrap()
        .await
        .wrap_err("Failed to start the proxy")?
    {
        PidFileStatus::Created => tracing::info!("Started proxy from a fresh pid file"),
        PidFileStatus::Existing => tracing::info!("Took over the running proxy"),
    }

    // Create graceful shutdown manager
    let graceful_shutdown = Arc::new(GracefulShutdown::new());

    // Start signal handler for graceful shutdown
    let signal_handler_shutdown = graceful_shutdown.clone();
    tokio::spawn(async move {
        signal_handler_shutdown.run_signal_handler().await;
    });

    let streamer_handle = if settings.stats.enabled {
        let streamer = plane.streamer().clone();
        let token = graceful_shutdown.shutdown_token();
        Some(tokio::spawn(
            streamer
                .run(token)
                .instrument(tracing_setup::configure_component_tracing("stats_streamer")),
        ))
    } else {
        tracing::info!("Stats streaming disabled");
        None
    };

    let addr: SocketAddr = settings
        .listen_addr
        .parse()
        .wrap_err_with(|| format!("Invalid listen address {}", settings.listen_addr))?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .wrap_err_with(|| format!("Failed to bind management API to {addr}"))?;
    tracing::info!("Management API listening on {}", addr);

    let app = http_api::router(plane.clone());
    let mut shutdown_token = graceful_shutdown.shutdown_token();
    let server_result = axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let reason = shutdown_token.wait_for_shutdown().await;
            tracing::info!("Shutdown signal received: {:?}", reason);
        })
        .await
        .wrap_err("Server error");

    // the API may also stop on its own, make sure background tasks follow
    graceful_shutdown.trigger_shutdown(ShutdownReason::Requested);
    if let Some(handle) = streamer_handle {
        if let Err(e) = handle.await {
            tracing::error!("Stats streamer task failed: {}", e);
        }
    }

    tracing::info!("Graceful shutdown completed");
    server_result
}

async fn build_control_plane(settings: &Settings) -> Result<ControlPlane> {
    let work_dir = WorkDir::create(&settings.work_dir).await?;
    let config_file = work_dir.resolve(&settings.proxy.config_file);
    let control_socket = work_dir.resolve(&settings.proxy.control_socket);

    let renderer = Renderer::new(
        &settings.proxy.template_path,
        &config_file,
        work_dir.resolve(&settings.proxy.snapshot_file),
        control_socket.display().to_string(),
    );
    let config = renderer.load_or_example().await;

    let channel = Arc::new(UnixControlSocket::new(
        control_socket,
        settings.proxy.control_timeout()?,
    ));
    let runtime = ProxyRuntime::new(channel);
    let streamer = Arc::new(StatsStreamer::new(
        runtime.clone(),
        settings.stats.poll_interval()?,
        settings.stats.heartbeat_interval()?,
    ));

    let plane = ControlPlane::new(
        ConfigStore::new(config, SocketNamer::new(work_dir.sockets_dir())),
        renderer,
        ReloadOrchestrator::new(
            &settings.proxy.binary,
            config_file,
            work_dir.resolve(&settings.proxy.pid_file),
        ),
        runtime,
        streamer,
    )
    .with_write_timeout(settings.api.write_lock_timeout()?)
    .with_subscriber_buffer(settings.stats.subscriber_buffer);
    Ok(plane)
}

/// Validate settings file and exit
fn validate_command(config_path: &str) -> Result<()> {
    println!("🔍 Validating settings file: {config_path}");

    if !Path::new(config_path).exists() {
        eprintln!("❌ Error: Settings file '{config_path}' not found");
        std::process::exit(1);
    }

    let settings = match load_settings(config_path) {
        Ok(settings) => {
            println!("✅ Settings parsing: OK");
            settings
        }
        Err(e) => {
            eprintln!("❌ Settings parsing failed:");
            eprintln!("   {e:#}");
            std::process::exit(1);
        }
    };

    match SettingsValidator::validate(&settings) {
        Ok(()) => {
            println!("✅ Settings validation: OK");
            println!();
            println!("📋 Settings Summary:");
            println!("   • Listen Address: {}", settings.listen_addr);
            println!("   • Working Directory: {}", settings.work_dir.display());
            println!("   • Proxy Binary: {}", settings.proxy.binary);
            println!("   • Template: {}", settings.proxy.template_path.display());
            println!("   • Stats Streaming: {}", settings.stats.enabled);
            println!();
            println!("🎉 Settings are valid and ready to use!");
            Ok(())
        }
        Err(e) => {
            eprintln!("❌ Settings validation failed:");
            eprintln!("{e}");
            println!();
            println!("💡 Common fixes:");
            println!("   • Verify listen address format (e.g., '127.0.0.1:10001')");
            println!("   • Use humantime durations such as '500ms', '2s' or '1m'");
            println!("   • Shorten work_dir if the control socket path is too long");
            std::process::exit(1);
        }
    }
}

/// Write a default settings file
async fn init_command(config_path: &str) -> Result<()> {
    let path = Path::new(config_path);
    if path.exists() {
        eprintln!("❌ Error: Settings file '{config_path}' already exists");
        std::process::exit(1);
    }

    let default_settings = r#"# hactl settings
#
# Every value can be overridden from the environment, e.g.
# HACTL__PROXY__BINARY=/usr/sbin/haproxy

# Management API address
listen_addr = "0.0.0.0:10001"

# Rendered config, snapshot, pid file and service sockets live here
work_dir = ".hactl"

[proxy]
binary = "haproxy"
template_path = "resources/haproxy.cfg.j2"
config_file = "haproxy.cfg"
snapshot_file = "haproxy.json"
pid_file = "haproxy.pid"
control_socket = "haproxy.sock"
control_timeout = "2s"

[stats]
enabled = true
poll_interval = "1s"
heartbeat_interval = "60s"
subscriber_buffer = 1024

[api]
write_lock_timeout = "10s"

[logging]
level = "info"
json = false
"#;

    tokio::fs::write(path, default_settings)
        .await
        .wrap_err("Failed to write settings file")?;
    println!("✅ Created default settings at: {config_path}");
    println!("   Run 'hactl serve --config {config_path}' to start the control plane");
    Ok(())
}
