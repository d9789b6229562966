use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use flowforge::fixture::{self, FixtureRow};
use flowforge::input::{parse_json_text, to_pretty};
use flowforge::{CompileInput, CompileOptions, IdPolicy, parse_template, slicer};
use serde_json::Value;

#[derive(Parser)]
#[command(name = "flowforge")]
#[command(about = "Compile sensor networks and metric templates into fixture rows")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// More log output (-v info, -vv debug); RUST_LOG overrides
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile a domain and the template sections it should show
    Compile {
        /// Domain items (JSON array or NDJSON)
        #[arg(long)]
        domain: Option<PathBuf>,

        /// Abstraction template (JSON array or NDJSON)
        #[arg(long)]
        template: Option<PathBuf>,

        /// Page section codes to materialize, comma separated
        #[arg(long, value_delimiter = ',')]
        sections: Vec<String>,

        #[command(flatten)]
        common: CommonArgs,
    },

    /// Compile domain items only: targets, links and starter metrics
    LowLevel {
        /// Domain items (JSON array or NDJSON)
        #[arg(long)]
        domain: PathBuf,

        #[command(flatten)]
        common: CommonArgs,
    },

    /// Show which template items the given sections need
    Slice {
        /// Abstraction template (JSON array or NDJSON)
        #[arg(long)]
        template: PathBuf,

        /// Page section codes, comma separated
        #[arg(long, value_delimiter = ',')]
        sections: Vec<String>,

        /// Settings file (only the alias tables are used)
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Pretty-print a JSON or NDJSON file
    Format {
        /// Input file
        input: PathBuf,

        /// Output file (stdout when omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[derive(clap::Args)]
struct CommonArgs {
    /// Rows of an earlier run to continue from
    #[arg(long)]
    existing: Option<PathBuf>,

    /// Settings file (flowforge.toml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Identifier policy, overriding the settings file
    #[arg(long, value_enum)]
    id_policy: Option<PolicyArg>,

    /// Output file (stdout when omitted)
    #[arg(short, long)]
    output: Option<PathBuf>,
}

#[derive(Clone, Copy, ValueEnum)]
enum PolicyArg {
    Deterministic,
    Random,
}

impl From<PolicyArg> for IdPolicy {
    fn from(policy: PolicyArg) -> Self {
        match policy {
            PolicyArg::Deterministic => IdPolicy::Deterministic,
            PolicyArg::Random => IdPolicy::Random,
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        _ => log::LevelFilter::Debug,
    };
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .init();

    match cli.command {
        Commands::Compile {
            domain,
            template,
            sections,
            common,
        } => {
            let domain = match domain {
                Some(path) => read_json(&path, "domain")?,
                None => Value::Null,
            };
            let template = match template {
                Some(path) => read_json(&path, "template")?,
                None => Value::Null,
            };
            run_compile(domain, template, sections, &common)?;
        }

        Commands::LowLevel { domain, common } => {
            let domain = read_json(&domain, "domain")?;
            run_compile(domain, Value::Null, Vec::new(), &common)?;
        }

        Commands::Slice {
            template,
            sections,
            config,
        } => {
            let options = load_options(config.as_deref())?;
            let template = parse_template(&read_json(&template, "template")?)?;
            let slice = slicer::slice(&template, &sections, &options.aliases());
            for item in slice.items(&template) {
                println!("{:?}\t{}", item.kind(), item.display_name());
            }
            println!();
            for descriptor in &slice.descriptors {
                println!("{descriptor}");
            }
        }

        Commands::Format { input, output } => {
            let value = read_json(&input, "input")?;
            write_output(output.as_deref(), &to_pretty(&value))?;
        }
    }

    Ok(())
}

fn run_compile(
    domain: Value,
    template: Value,
    sections: Vec<String>,
    common: &CommonArgs,
) -> Result<()> {
    let mut options = load_options(common.config.as_deref())?;
    if let Some(policy) = common.id_policy {
        options.id_policy = policy.into();
    }
    let existing = match &common.existing {
        Some(path) => read_rows(path)?,
        None => Vec::new(),
    };
    let input = CompileInput {
        domain,
        template,
        sections,
        existing,
    };
    let rows = flowforge::compile(input, options).context("compile failed")?;
    log::info!("{} row(s) in total", rows.len());
    write_output(common.output.as_deref(), &to_pretty(&fixture::rows_to_json(&rows)))
}

fn load_options(path: Option<&Path>) -> Result<CompileOptions> {
    match path {
        Some(path) => CompileOptions::from_file(path)
            .with_context(|| format!("failed to load settings from {}", path.display())),
        None => Ok(CompileOptions::default()),
    }
}

fn read_json(path: &Path, what: &str) -> Result<Value> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("failed to read {what} from {}", path.display()))?;
    parse_json_text(&text, what).with_context(|| format!("in {}", path.display()))
}

fn read_rows(path: &Path) -> Result<Vec<FixtureRow>> {
    let value = read_json(path, "existing rows")?;
    fixture::rows_from_json(&value).with_context(|| format!("in {}", path.display()))
}

fn write_output(path: Option<&Path>, text: &str) -> Result<()> {
    match path {
        Some(path) => {
            fs::write(path, format!("{text}\n"))
                .with_context(|| format!("failed to write {}", path.display()))?;
            eprintln!("Wrote {}", path.display());
        }
        None => println!("{text}"),
    }
    Ok(())
}
