//! Protocol Acceptor command line tool
//!
//! Serves two line-oriented demo protocols on one port: `echo` returns the
//! line as sent, `uppercase` returns it upper-cased.

use clap::Parser;
use log::{error, info, warn};
use std::io::{BufRead, BufReader, Write};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use protocol_acceptor::common::{init_logger, parse_socket_addr, Result};
use protocol_acceptor::config::{duration_from_secs, ClientCertMode, ConfigLoader, ServerConfig, TlsConfig};
use protocol_acceptor::tls::{get_cert_fingerprint, get_cert_subject};
use protocol_acceptor::{create_tls_acceptor, Acceptor, AcceptorHandle, Connection, PrefixDetector, APP_NAME, VERSION};

/// Multi-protocol connection acceptor
#[derive(Parser, Debug)]
#[clap(author, version = VERSION, about, long_about = None)]
struct Args {
    /// Listen address
    #[clap(short, long)]
    listen: Option<String>,

    /// Load configuration from a JSON file
    #[clap(long)]
    config_file: Option<PathBuf>,

    /// Apply PROTOCOL_ACCEPTOR_* environment variables
    #[clap(long)]
    from_env: bool,

    /// Log level (error, warn, info, debug, trace)
    #[clap(long)]
    log_level: Option<String>,

    /// Server certificate path; enables TLS together with --key
    #[clap(long, requires = "key")]
    cert: Option<PathBuf>,

    /// Server private key path
    #[clap(long, requires = "cert")]
    key: Option<PathBuf>,

    /// CA certificate path (for client certificate validation)
    #[clap(long)]
    ca_cert: Option<PathBuf>,

    /// Client certificate verification mode (required, optional, none)
    #[clap(long)]
    client_cert_mode: Option<ClientCertMode>,

    /// Seconds a connection may stay unidentified
    #[clap(long)]
    detection_timeout: Option<f64>,
}

fn load_config(args: &Args) -> Result<ServerConfig> {
    let mut config = match &args.config_file {
        Some(path) => ServerConfig::from_file(path)?,
        None => ServerConfig::default(),
    };

    if args.from_env {
        config = config.with_env_overrides()?;
    }

    if let Some(listen) = &args.listen {
        config.listen = parse_socket_addr(listen)?;
    }

    if let Some(log_level) = &args.log_level {
        config.log_level = log_level.clone();
    }

    if let Some(secs) = args.detection_timeout {
        config.detection.timeout = duration_from_secs(secs)?;
    }

    if let (Some(cert), Some(key)) = (&args.cert, &args.key) {
        config.tls = Some(TlsConfig::new(cert, key));
    }

    if let Some(tls) = config.tls.as_mut() {
        if let Some(ca_cert) = &args.ca_cert {
            tls.ca_cert_path = Some(ca_cert.clone());
        }
        if let Some(mode) = args.client_cert_mode {
            tls.client_cert_mode = mode;
        }
    }

    config.validate()?;
    Ok(config)
}

/// Read one line (the replayed prefix included) and answer with `transform(line)`
fn serve_line<F>(mut conn: Connection, peer: SocketAddr, transform: F)
where
    F: Fn(&str) -> String,
{
    if let Err(e) = conn.set_read_timeout(Some(Duration::from_secs(30))) {
        warn!("Unable to set read timeout for {}: {}", peer, e);
    }

    let mut line = String::new();
    if let Err(e) = BufReader::new(&mut conn).read_line(&mut line) {
        warn!("Failed to read from {}: {}", peer, e);
        return;
    }

    if let Err(e) = conn.write_all(transform(&line).as_bytes()) {
        warn!("Failed to reply to {}: {}", peer, e);
    }
    let _ = conn.shutdown();
}

/// Stop the acceptor on Ctrl+C
fn install_ctrl_c(handle: AcceptorHandle) -> std::io::Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    thread::Builder::new().name("ctrl-c".into()).spawn(move || {
        runtime.block_on(async {
            match tokio::signal::ctrl_c().await {
                Ok(()) => info!("Received Ctrl+C, shutting down"),
                Err(e) => error!("Unable to listen for Ctrl+C: {}", e),
            }
        });
        handle.stop();
    })?;

    Ok(())
}

fn main() -> Result<()> {
    let args = Args::parse();
    let config = load_config(&args)?;

    init_logger(&config.log_level);
    info!("Starting {} v{}", APP_NAME, VERSION);

    if let Some(path) = &args.config_file {
        info!("Loaded configuration from file: {}", path.display());
    }
    if args.from_env {
        info!("Applied environment overrides");
    }
    if config.tls.is_none() && (args.ca_cert.is_some() || args.client_cert_mode.is_some()) {
        warn!("--ca-cert and --client-cert-mode are ignored without TLS");
    }

    let mut builder = Acceptor::builder().detection_config(config.detection.clone());

    if let Some(tls) = &config.tls {
        info!("Using certificate: {}", tls.cert_path.display());

        match get_cert_subject(&tls.cert_path) {
            Ok(subject) => info!("Certificate subject: {}", subject),
            Err(e) => warn!("Unable to get certificate subject: {}", e),
        }

        match get_cert_fingerprint(&tls.cert_path) {
            Ok(fingerprint) => info!("Certificate fingerprint: {}", fingerprint),
            Err(e) => warn!("Unable to get certificate fingerprint: {}", e),
        }

        builder = builder.tls(create_tls_acceptor(tls)?);
        info!("Client certificate mode: {}", tls.client_cert_mode);
    }

    let mut acceptor = builder.bind(&config.listen.ip().to_string(), config.listen.port())?;

    acceptor.add_detector(PrefixDetector::new("echo", |conn, peer| {
        serve_line(conn, peer, |line| line.to_string())
    }))?;
    acceptor.add_detector(PrefixDetector::new("uppercase", |conn, peer| {
        serve_line(conn, peer, |line| line.to_uppercase())
    }))?;

    install_ctrl_c(acceptor.handle())?;

    info!("Listening on {}, press Ctrl+C to stop", acceptor.local_addr());
    acceptor.serve_forever()?;

    let stats = acceptor.stats();
    info!(
        "Served {} connections ({} handed off, {} timed out, {} handshake failures)",
        stats.accepted, stats.handed_off, stats.timed_out, stats.handshake_failures
    );

    Ok(())
}
