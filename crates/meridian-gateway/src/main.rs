//! Meridian gateway entry point.

use std::path::PathBuf;

use tracing::{error, info, warn};

use meridian_gateway::{Gateway, GatewayConfig, GatewayResult, GatewayServer, ShutdownSignal};
use meridian_telemetry::LogConfig;

/// Command-line arguments.
struct Args {
    /// Path to configuration file.
    config: Option<PathBuf>,
}

impl Args {
    fn parse() -> Self {
        let mut args = std::env::args().skip(1);
        let mut config = None;

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--config" | "-c" => {
                    config = args.next().map(PathBuf::from);
                }
                "--help" | "-h" => {
                    print_help();
                    std::process::exit(0);
                }
                "--version" | "-v" => {
                    println!("meridian-gateway {}", meridian_gateway::VERSION);
                    std::process::exit(0);
                }
                other => {
                    eprintln!("Unknown argument: {other}");
                    eprintln!("Use --help for usage information");
                    std::process::exit(1);
                }
            }
        }

        Self { config }
    }
}

fn print_help() {
    println!(
        r"Meridian Gateway - API gateway for the business directory services

USAGE:
    meridian-gateway [OPTIONS]

OPTIONS:
    -c, --config <PATH>    Path to configuration file (TOML or JSON)
    -h, --help             Print help information
    -v, --version          Print version information

ENVIRONMENT VARIABLES:
    JWT_SECRET                 Shared HS256 signing secret
    JWT_ISSUER                 Expected token issuer (optional)
    AUTH_SERVICE_URL           Auth upstream (default: http://auth-service:8084)
    BUSINESS_SERVICE_URL       Business upstream (default: http://business-service:8081)
    REVIEW_SERVICE_URL         Review upstream (default: http://review-service:8082)
    LOGGING_SERVICE_URL        Logging upstream (default: http://logging-service:8083)
    PORT                       Listen port (default: 8080)
    GATEWAY_LISTEN_ADDR        Listen address (default: 0.0.0.0)
    GATEWAY_UPSTREAM_TIMEOUT   Per-request upstream timeout (default: 30s)
    GATEWAY_CONNECT_TIMEOUT    Upstream connect timeout (default: 5s)
    GATEWAY_MAX_BODY_SIZE      Maximum request body in bytes (default: 10485760)
    GATEWAY_LOG_LEVEL          Log filter (default: info)
    GATEWAY_LOG_FORMAT         json or pretty (default: json)

EXAMPLES:
    meridian-gateway --config /etc/meridian/gateway.toml
    JWT_SECRET=change-me PORT=9000 meridian-gateway
"
    );
}

fn load_config(path: Option<PathBuf>) -> GatewayResult<GatewayConfig> {
    let config = match path {
        Some(path) => GatewayConfig::from_file(path)?,
        None => GatewayConfig::default(),
    };
    let config = config.with_env_overrides()?;
    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    let config_path = args.config.clone();

    let config = match load_config(args.config) {
        Ok(config) => config,
        Err(e) => {
            // Logging settings come from the config, so fall back to defaults to report this.
            let _ = meridian_telemetry::init_logging(&LogConfig::default());
            error!(error = %e, "Invalid configuration");
            std::process::exit(1);
        }
    };

    let metrics = match meridian_telemetry::init_telemetry(&config.telemetry) {
        Ok(metrics) => metrics,
        Err(e) => {
            eprintln!("Failed to initialize telemetry: {e}");
            std::process::exit(1);
        }
    };

    info!(version = meridian_gateway::VERSION, config = ?config_path, "Starting Meridian gateway");
    if config.uses_default_secret() {
        warn!("JWT_SECRET not set, using the built-in development secret");
    }
    for (name, url) in &config.upstreams {
        info!(upstream = %name, url = %url, "Upstream configured");
    }

    let addr = match config.server.socket_addr() {
        Ok(addr) => addr,
        Err(e) => {
            error!(error = %e, "Invalid listen address");
            std::process::exit(1);
        }
    };
    let shutdown_timeout = config.server.shutdown_timeout;

    let mut builder = Gateway::builder(config);
    if let Some(metrics) = metrics {
        builder = builder.metrics(metrics);
    }
    let gateway = match builder.build() {
        Ok(gateway) => gateway,
        Err(e) => {
            error!(error = %e, "Failed to build gateway");
            std::process::exit(1);
        }
    };

    let server = GatewayServer::new(gateway, shutdown_timeout);
    if let Err(e) = server.run(addr, ShutdownSignal::with_os_signals()).await {
        error!(error = %e, "Server error");
        std::process::exit(1);
    }
}
