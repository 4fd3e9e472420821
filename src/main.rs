use anyhow::{bail, Context};
use printkit::{init_logging, FileVariableStore, PrintContext, PrintkitConfig, SimMachine};
use std::path::PathBuf;
use std::sync::Arc;

const USAGE: &str = "\
Usage:
  printkit run <file> [--config <path>] [--offset <bytes>] [--json-logs]
  printkit status [--config <path>]";

#[derive(Debug, Default)]
struct RunOptions {
    file: PathBuf,
    config: Option<PathBuf>,
    offset: u64,
    json_logs: bool,
}

enum Command {
    Run(RunOptions),
    Status { config: Option<PathBuf> },
}

fn parse_args(args: &[String]) -> anyhow::Result<Command> {
    let Some((command, rest)) = args.split_first() else {
        bail!("missing command\n{}", USAGE);
    };

    let mut options = RunOptions::default();
    let mut file = None;
    let mut iter = rest.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--config" => {
                let path = iter.next().context("--config needs a path")?;
                options.config = Some(PathBuf::from(path));
            }
            "--offset" => {
                let value = iter.next().context("--offset needs a byte count")?;
                options.offset = value
                    .parse()
                    .with_context(|| format!("invalid offset '{}'", value))?;
            }
            "--json-logs" => options.json_logs = true,
            other if other.starts_with("--") => bail!("unknown option {}\n{}", other, USAGE),
            other if file.is_none() => file = Some(PathBuf::from(other)),
            other => bail!("unexpected argument {}\n{}", other, USAGE),
        }
    }

    match command.as_str() {
        "run" => {
            options.file = file.with_context(|| format!("missing job file\n{}", USAGE))?;
            Ok(Command::Run(options))
        }
        "status" => Ok(Command::Status {
            config: options.config,
        }),
        other => bail!("unknown command {}\n{}", other, USAGE),
    }
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<PrintkitConfig> {
    if let Some(path) = path {
        return PrintkitConfig::load_from_file(path)
            .with_context(|| format!("loading {}", path.display()));
    }
    match PrintkitConfig::default_path() {
        Ok(path) if path.exists() => PrintkitConfig::load_from_file(&path)
            .with_context(|| format!("loading {}", path.display())),
        _ => Ok(PrintkitConfig::default()),
    }
}

async fn run(options: RunOptions) -> anyhow::Result<()> {
    let config = load_config(options.config.as_ref())?;
    tracing::info!(
        version = printkit::VERSION,
        built = printkit::BUILD_DATE,
        file = %options.file.display(),
        offset = options.offset,
        "Starting printkit"
    );

    let store = Arc::new(
        FileVariableStore::open(
            &config.persistence.variables_file,
            config.persistence.queue_capacity,
        )
        .context("opening session variables")?,
    );
    let machine = SimMachine::new();
    let context = PrintContext::build(config, machine.collaborators().with_file_store(store))?;
    context.init();
    context.start()?;

    let executor = context.executor();
    if options.offset > 0 {
        executor.load(&options.file, options.offset)?;
        executor.resume()?;
    } else {
        executor.print_file(&options.file)?;
    }

    tokio::select! {
        _ = executor.wait_idle() => {}
        _ = tokio::signal::ctrl_c() => {
            tracing::warn!("Interrupted, stopping job");
            executor.on_shutdown();
            executor.wait_idle().await;
        }
    }

    let status = context.status_snapshot();
    println!("{}", serde_json::to_string_pretty(&status)?);
    context.stop().await;
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    match parse_args(&args)? {
        Command::Status { config } => {
            init_logging(false)?;
            let config = load_config(config.as_ref())?;
            print!("{}", config.to_toml()?);
            Ok(())
        }
        Command::Run(options) => {
            init_logging(options.json_logs)?;
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()
                .context("starting runtime")?;
            runtime.block_on(run(options))
        }
    }
}
