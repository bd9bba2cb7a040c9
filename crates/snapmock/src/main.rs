//! snapmock CLI
//!
//! Usage:
//!   snapmock record --name checkout --port 8888
//!   snapmock convert --session latest --format yaml -o mocks.yaml

use anyhow::Context;
use clap::{Args, Parser, Subcommand, ValueEnum};
use snapmock::ca::CertificateAuthority;
use snapmock::config::{CaConfig, Config};
use snapmock::convert::{
    ConversionResult, ConvertOptions, Converter, DuplicateStrategy, FilterOptions,
    SessionConvertOptions, StatusFilter,
};
use snapmock::recording::{
    read_recordings_file, CaptureMode, RecordingFilter, SessionManager,
};
use snapmock::ProxySession;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "snapmock")]
#[command(
    author,
    version,
    about = "Record API traffic through an intercepting proxy and turn it into mocks"
)]
struct Cli {
    /// YAML configuration file
    #[arg(short, long, global = true, env = "SNAPMOCK_CONFIG")]
    config: Option<PathBuf>,

    /// Directory holding capture sessions
    #[arg(long, global = true, env = "SNAPMOCK_SESSIONS_DIR")]
    sessions_dir: Option<PathBuf>,

    /// Directory holding the root CA certificate and key
    #[arg(long, global = true, env = "SNAPMOCK_CA_DIR")]
    ca_dir: Option<PathBuf>,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    log_json: bool,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the capture proxy until interrupted
    Record(RecordArgs),
    /// List capture sessions
    Sessions {
        #[arg(long)]
        json: bool,
    },
    /// List recordings of a session
    Recordings(RecordingsArgs),
    /// Export a session's recordings to a JSON array
    Export {
        #[arg(short, long, default_value = "latest")]
        session: String,
        /// Output file (stdout when omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Import a JSON array of recordings as a new session
    Import {
        file: PathBuf,
        #[arg(short, long, default_value = "imported")]
        name: String,
    },
    /// Delete a session
    Delete { session: String },
    /// Delete every session
    Clear,
    /// Convert recordings into mock definitions
    Convert(ConvertArgs),
    /// Manage the root CA
    Ca {
        #[command(subcommand)]
        command: CaCommand,
    },
}

#[derive(Args, Debug)]
struct RecordArgs {
    #[arg(short, long)]
    port: Option<u16>,
    #[arg(long)]
    bind: Option<String>,
    /// Session name
    #[arg(short, long)]
    name: Option<String>,
    #[arg(long, value_enum)]
    mode: Option<ModeArg>,
    #[arg(long = "include-host")]
    include_hosts: Vec<String>,
    #[arg(long = "exclude-host")]
    exclude_hosts: Vec<String>,
    #[arg(long = "include-path")]
    include_paths: Vec<String>,
    #[arg(long = "exclude-path")]
    exclude_paths: Vec<String>,
    /// Skip upstream certificate verification
    #[arg(long)]
    insecure: bool,
    #[arg(long)]
    grace_period_secs: Option<u64>,
}

#[derive(Args, Debug)]
struct RecordingsArgs {
    #[arg(short, long, default_value = "latest")]
    session: String,
    #[arg(short, long)]
    method: Option<String>,
    #[arg(long)]
    host: Option<String>,
    /// Path glob
    #[arg(long)]
    path: Option<String>,
    #[arg(long)]
    limit: Option<usize>,
    #[arg(long, default_value_t = 0)]
    offset: usize,
    #[arg(long)]
    json: bool,
}

#[derive(Args, Debug)]
struct ConvertArgs {
    #[arg(short, long, default_value = "latest")]
    session: String,
    /// Convert one recording of the session verbatim
    #[arg(long, conflicts_with = "input")]
    id: Option<String>,
    /// Convert an exported recordings file instead of a session
    #[arg(short, long)]
    input: Option<PathBuf>,
    /// Fold request headers into matchers
    #[arg(long)]
    include_headers: bool,
    /// Keep concrete paths instead of inferring parameters
    #[arg(long)]
    no_smart_match: bool,
    #[arg(long, default_value = "first")]
    duplicates: DuplicateStrategy,
    /// Path glob
    #[arg(long)]
    path: Option<String>,
    #[arg(long = "method")]
    methods: Vec<String>,
    /// Status codes, classes or ranges, e.g. `2xx,404`
    #[arg(long)]
    status: Option<StatusFilter>,
    #[arg(long, value_enum, default_value = "json")]
    format: OutputFormat,
    /// Output file (stdout when omitted)
    #[arg(short, long)]
    output: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum CaCommand {
    /// Create a new root CA, replacing any existing one
    Generate {
        #[arg(long)]
        force: bool,
    },
    /// Print or write the root certificate (PEM)
    Export {
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Show where the CA files live
    Path,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum ModeArg {
    Record,
    Passthrough,
}

impl From<ModeArg> for CaptureMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Record => CaptureMode::Record,
            ModeArg::Passthrough => CaptureMode::Passthrough,
        }
    }
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum OutputFormat {
    Json,
    Yaml,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.log_json);

    let mut config = match &cli.config {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };
    if let Some(dir) = &cli.sessions_dir {
        config.capture.sessions_dir = dir.clone();
    }
    if let Some(dir) = &cli.ca_dir {
        let leaf_cache_dir = config.ca.leaf_cache_dir.take();
        config.ca = CaConfig {
            leaf_cache_dir,
            ..CaConfig::in_dir(dir)
        };
    }

    match cli.command {
        Command::Record(args) => record(config, args).await,
        Command::Sessions { json } => list_sessions(&config, json),
        Command::Recordings(args) => list_recordings(&config, args),
        Command::Export { session, output } => export(&config, &session, output.as_deref()),
        Command::Import { file, name } => import(&config, &file, &name).await,
        Command::Delete { session } => delete(&config, &session),
        Command::Clear => {
            let removed = manager(&config)?.clear()?;
            println!("Removed {removed} session(s)");
            Ok(())
        }
        Command::Convert(args) => convert(&config, args),
        Command::Ca { command } => ca(&config, command),
    }
}

fn init_tracing(verbose: u8, json: bool) {
    let base = match verbose {
        0 => "snapmock=info",
        1 => "snapmock=debug",
        _ => "snapmock=trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(base));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn manager(config: &Config) -> anyhow::Result<SessionManager> {
    Ok(SessionManager::new(&config.capture.sessions_dir)?)
}

async fn record(mut config: Config, args: RecordArgs) -> anyhow::Result<()> {
    let capture = &mut config.capture;
    if let Some(port) = args.port {
        capture.port = port;
    }
    if let Some(bind) = args.bind {
        capture.bind = bind;
    }
    if let Some(name) = args.name {
        capture.session_name = name;
    }
    if let Some(mode) = args.mode {
        capture.mode = mode.into();
    }
    if let Some(grace) = args.grace_period_secs {
        capture.grace_period_secs = grace;
    }
    config.filter.include_hosts.extend(args.include_hosts);
    config.filter.exclude_hosts.extend(args.exclude_hosts);
    config.filter.include_paths.extend(args.include_paths);
    config.filter.exclude_paths.extend(args.exclude_paths);
    config.upstream.insecure_skip_verify |= args.insecure;
    config.validate()?;

    let cert_path = config.ca.cert_path.clone();
    let handle = ProxySession::new(config)?.start().await?;
    println!("Proxy running at {}", handle.proxy_url());
    println!("Root certificate: {}", cert_path.display());
    println!("Press Ctrl+C to stop");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl+C")?;
    println!("Stopping capture...");

    let summary = handle.shutdown().await?;
    println!(
        "Session '{}' saved to {}",
        summary.name,
        summary.path.display()
    );
    println!(
        "  {} recording(s), {} host(s), {}s",
        summary.recording_count,
        summary.hosts.len(),
        summary.duration_secs
    );
    for host in &summary.hosts {
        println!("  - {host}");
    }
    Ok(())
}

fn list_sessions(config: &Config, json: bool) -> anyhow::Result<()> {
    let manager = manager(config)?;
    let sessions = manager.list_sessions()?;
    if json {
        let metas: Vec<_> = sessions.iter().map(|s| &s.meta).collect();
        println!("{}", serde_json::to_string_pretty(&metas)?);
        return Ok(());
    }
    if sessions.is_empty() {
        println!("No sessions in {}", config.capture.sessions_dir.display());
        return Ok(());
    }
    let latest = manager.latest()?;
    for entry in &sessions {
        let meta = &entry.meta;
        let marker = if latest.as_deref() == Some(meta.dir_name.as_str()) {
            "*"
        } else {
            " "
        };
        let state = if meta.end_time.is_some() {
            "done"
        } else {
            "open"
        };
        println!(
            "{marker} {:<40} {:>6} recording(s)  {:<11} {}  {}",
            meta.dir_name,
            meta.recording_count,
            meta.mode,
            state,
            meta.start_time.format("%Y-%m-%d %H:%M:%S")
        );
    }
    Ok(())
}

fn list_recordings(config: &Config, args: RecordingsArgs) -> anyhow::Result<()> {
    let filter = RecordingFilter {
        session: Some(args.session),
        method: args.method,
        host: args.host,
        path: args.path,
        limit: args.limit,
        offset: args.offset,
    };
    let page = manager(config)?.list_recordings(&filter)?;
    if args.json {
        println!("{}", serde_json::to_string_pretty(&page)?);
        return Ok(());
    }
    for rec in &page.items {
        println!(
            "{}  {:<7} {:>3}  {}{}",
            rec.id,
            rec.request.method,
            rec.response.status_code,
            rec.request.host,
            rec.path_and_query()
        );
    }
    println!("Showing {} of {}", page.items.len(), page.total);
    Ok(())
}

fn export(config: &Config, session: &str, output: Option<&Path>) -> anyhow::Result<()> {
    let store = manager(config)?.open(session)?;
    match output {
        Some(path) => {
            let count = store.export_to(path)?;
            eprintln!("Exported {count} recording(s) to {}", path.display());
        }
        None => println!("{}", store.export_json()?),
    }
    Ok(())
}

async fn import(config: &Config, file: &Path, name: &str) -> anyhow::Result<()> {
    let recordings = read_recordings_file(file)?;
    if recordings.is_empty() {
        anyhow::bail!("{} contains no recordings", file.display());
    }
    let store = manager(config)?.import(name, recordings).await?;
    println!(
        "Imported {} recording(s) into {}",
        store.len(),
        store.dir().display()
    );
    Ok(())
}

fn delete(config: &Config, session: &str) -> anyhow::Result<()> {
    let manager = manager(config)?;
    let dir = match manager.resolve(session) {
        Ok(dir) => dir,
        Err(e) if e.is_not_found() => {
            println!("Session '{session}' does not exist");
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    };
    let dir_name = dir
        .file_name()
        .and_then(|n| n.to_str())
        .with_context(|| format!("unexpected session path {}", dir.display()))?;
    manager.delete_session(dir_name)?;
    println!("Deleted {dir_name}");
    Ok(())
}

fn convert(config: &Config, args: ConvertArgs) -> anyhow::Result<()> {
    let options = ConvertOptions {
        include_headers: args.include_headers,
        smart_match: !args.no_smart_match,
        duplicates: args.duplicates,
        filter: FilterOptions {
            path: args.path,
            methods: args.methods,
            status: args.status,
        },
        ..Default::default()
    };
    let converter = Converter::new(config.scanner.clone());

    let result = if let Some(input) = &args.input {
        let recordings = read_recordings_file(input)?;
        converter.convert(&recordings, &options)?
    } else if let Some(id) = &args.id {
        let store = manager(config)?.open(&args.session)?;
        converter.convert_one(&store, id, &options)?
    } else {
        converter.convert_session(
            &manager(config)?,
            &SessionConvertOptions {
                session: args.session,
                options,
            },
        )?
    };

    report(&result);
    let document = result.document();
    let rendered = match args.format {
        OutputFormat::Json => document.to_json()?,
        OutputFormat::Yaml => document.to_yaml()?,
    };
    match &args.output {
        Some(path) => {
            std::fs::write(path, rendered)
                .with_context(|| format!("failed to write {}", path.display()))?;
            eprintln!("Wrote {} mock(s) to {}", result.mocks.len(), path.display());
        }
        None => println!("{rendered}"),
    }
    Ok(())
}

fn report(result: &ConversionResult) {
    eprintln!(
        "Converted {} recording(s) into {} mock(s) ({} filtered, {} duplicate(s))",
        result.total,
        result.mocks.len(),
        result.filtered,
        result.deduplicated
    );
    for skipped in &result.skipped {
        eprintln!("skipped {}: {}", skipped.source, skipped.reason);
    }
    for warning in &result.warnings {
        eprintln!(
            "warning [{}] {} in {}: {}",
            warning.kind.as_str(),
            warning.location,
            warning.recording_id.as_deref().unwrap_or("-"),
            warning.message
        );
    }
}

fn ca(config: &Config, command: CaCommand) -> anyhow::Result<()> {
    let ca = CertificateAuthority::new(config.ca.clone());
    match command {
        CaCommand::Generate { force } => {
            if config.ca.cert_path.exists() && !force {
                anyhow::bail!(
                    "a root CA already exists at {}; pass --force to replace it",
                    config.ca.cert_path.display()
                );
            }
            ca.generate()?;
            println!("Root CA written to {}", config.ca.cert_path.display());
            println!("Install it in the client's trust store to intercept HTTPS");
        }
        CaCommand::Export { output } => {
            ca.load()?;
            let pem = ca.ca_cert_pem()?;
            match output {
                Some(path) => {
                    std::fs::write(&path, pem)
                        .with_context(|| format!("failed to write {}", path.display()))?;
                    eprintln!("Root certificate written to {}", path.display());
                }
                None => print!("{pem}"),
            }
        }
        CaCommand::Path => {
            println!("certificate: {}", config.ca.cert_path.display());
            println!("key:         {}", config.ca.key_path.display());
            if let Some(dir) = &config.ca.leaf_cache_dir {
                println!("leaf cache:  {}", dir.display());
            }
        }
    }
    Ok(())
}
