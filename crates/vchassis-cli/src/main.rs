mod commands;

use clap::{Parser, ValueEnum};
use commands::{Invocation, EXIT_FAILURE, EXIT_INVALID_ARGS, EXIT_TOPOLOGY_ERROR};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use vchassis_core::{install_signal_handler, Settings, TopologyContext};
use vchassis_runtime::select_runner;
use vchassis_schema::load_topology;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Action {
    /// Build the topology (idempotent).
    Create,
    /// Tear the topology down (idempotent).
    Delete,
    /// Run read-only health checks against a built topology.
    Verify,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Backend {
    Host,
    Mock,
}

impl Backend {
    fn as_str(self) -> &'static str {
        match self {
            Backend::Host => "host",
            Backend::Mock => "mock",
        }
    }
}

#[derive(Debug, Parser)]
#[command(
    name = "vchassis",
    version,
    about = "Virtual chassis topology provisioner for switch control-plane tests"
)]
struct Cli {
    /// Topology file naming chassis instances, neighbors, and edges.
    topology: PathBuf,

    /// What to do with the topology.
    #[arg(value_enum)]
    action: Action,

    /// Unique name of this topology on the host.
    name: String,

    /// Host directory mounted into every instance.
    #[arg(long)]
    mount: Option<PathBuf>,

    /// Instance image (overrides the settings file).
    #[arg(long)]
    image: Option<String>,

    /// Docker-compatible container engine binary (overrides the settings file).
    #[arg(long)]
    engine: Option<String>,

    /// Settings file to use instead of ~/.config/vchassis/config.toml.
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long, value_enum, default_value_t = Backend::Host, hide = true)]
    backend: Backend,

    /// Output results as structured JSON.
    #[arg(long, default_value_t = false)]
    json: bool,

    /// Enable verbose (debug) logging output.
    #[arg(short, long, default_value_t = false)]
    verbose: bool,

    /// Enable trace-level logging (more detailed than --verbose).
    #[arg(long, default_value_t = false)]
    trace: bool,
}

fn main() -> ExitCode {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let msg = info.to_string();
        if msg.contains("Broken pipe")
            || msg.contains("broken pipe")
            || msg.contains("os error 32")
            || msg.contains("failed printing to stdout")
        {
            std::process::exit(0);
        }
        default_hook(info);
    }));

    let cli = Cli::parse();

    let default_level = if cli.trace {
        "trace"
    } else if cli.verbose {
        "debug"
    } else {
        "warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("VCHASSIS_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_target(false)
        .without_time()
        .init();

    install_signal_handler();

    let result = prepare(cli).and_then(|(action, invocation)| match action {
        Action::Create => commands::create::run(&invocation),
        Action::Delete => commands::delete::run(&invocation),
        Action::Verify => commands::verify::run(&invocation),
    });

    match result {
        Ok(code) => ExitCode::from(code),
        Err(msg) => {
            eprintln!("error: {msg}");
            let code = if msg.starts_with("topology error:") {
                EXIT_TOPOLOGY_ERROR
            } else if msg.starts_with("invalid arguments:") || msg.starts_with("topology lock:") {
                EXIT_INVALID_ARGS
            } else {
                EXIT_FAILURE
            };
            ExitCode::from(code)
        }
    }
}

fn prepare(cli: Cli) -> Result<(Action, Invocation), String> {
    let mut settings = Settings::load_or_default(cli.config.as_deref())
        .map_err(|e| format!("invalid arguments: {e}"))?;
    if let Some(image) = cli.image {
        settings.image = image;
    }
    if let Some(engine) = cli.engine {
        settings.engine = engine;
    }
    if cli.mount.is_some() {
        settings.source_mount = cli.mount;
    }

    let ctx = TopologyContext::new(&cli.name)
        .map_err(|e| format!("invalid arguments: {e}"))?
        .with_image(&settings.image)
        .with_source_mount(settings.source_mount.clone())
        .with_port_count(settings.port_count);
    let spec = load_topology(&cli.topology).map_err(|e| format!("topology error: {e}"))?;

    let skip_prereqs = cli.backend == Backend::Mock
        || std::env::var("VCHASSIS_SKIP_PREREQS").as_deref() == Ok("1");
    if !skip_prereqs {
        let missing = vchassis_runtime::check_host_prereqs(&settings.engine);
        if !missing.is_empty() {
            return Err(vchassis_runtime::format_missing(&missing));
        }
    }

    let runner = select_runner(cli.backend.as_str(), &settings.engine).map_err(|e| e.to_string())?;
    tracing::debug!(
        "topology '{}' from {}: {} backend, image {}",
        ctx.name(),
        cli.topology.display(),
        cli.backend.as_str(),
        settings.image
    );
    Ok((
        cli.action,
        Invocation {
            ctx,
            spec,
            runner: Arc::from(runner),
            settings,
            json: cli.json,
        },
    ))
}
