//! CLI command definitions, routing, and tracing setup.

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, WrapErr, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;

use nodeharvest_core::pipeline::{ProgressReporter, RunSummary};
use nodeharvest_decoder::{classify_and_parse, render_document, to_uri};
use nodeharvest_shared::{
    AppConfig, MergePolicy, RunConfig, init_config, load_config, load_config_from, resolve_token,
};

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// nodeharvest: harvest proxy subscriptions from public repositories.
#[derive(Parser)]
#[command(
    name = "nodeharvest",
    version,
    about = "Discover, decode and deduplicate proxy node subscriptions published in public repositories.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Config file (defaults to ~/.nodeharvest/nodeharvest.toml).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Search, crawl, decode and write the subscription bundle.
    Run {
        /// Search keyword (repeatable; replaces the configured list).
        #[arg(short, long = "keyword")]
        keywords: Vec<String>,

        /// Output directory for bundles and state.
        #[arg(short, long)]
        out: Option<PathBuf>,

        /// Maximum directory depth (root = 0).
        #[arg(long)]
        max_depth: Option<u32>,

        /// Also accept .json candidate files.
        #[arg(long)]
        include_json: bool,

        /// Probe every node and write a validated bundle.
        #[arg(long)]
        validate: bool,

        /// Run the configured deploy command afterwards.
        #[arg(long)]
        deploy: bool,

        /// Collision policy: history-wins or fresh-wins.
        #[arg(long)]
        merge_policy: Option<MergePolicy>,

        /// Print the run summary as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Decode a local subscription file and print its nodes.
    Decode {
        /// File to decode.
        file: PathBuf,

        /// Print share URIs instead of a structured document.
        #[arg(long)]
        uris: bool,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

/// Flag overrides for `run`.
struct RunOverrides {
    keywords: Vec<String>,
    out: Option<PathBuf>,
    max_depth: Option<u32>,
    include_json: bool,
    validate: bool,
    deploy: bool,
    merge_policy: Option<MergePolicy>,
}

impl RunOverrides {
    fn apply(self, config: &mut AppConfig) {
        if !self.keywords.is_empty() {
            config.github.keywords = self.keywords;
        }
        if let Some(out) = self.out {
            config.output.dir = out.to_string_lossy().into_owned();
        }
        if let Some(depth) = self.max_depth {
            config.crawl.max_depth = depth;
        }
        if let Some(policy) = self.merge_policy {
            config.output.merge_policy = policy;
        }
        config.crawl.include_json |= self.include_json;
        config.validation.enabled |= self.validate;
        config.deploy.enabled |= self.deploy;
    }
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "nodeharvest=info",
        1 => "nodeharvest=debug",
        _ => "nodeharvest=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    let config_path = cli.config.as_deref();
    match cli.command {
        Command::Run {
            keywords,
            out,
            max_depth,
            include_json,
            validate,
            deploy,
            merge_policy,
            json,
        } => {
            let overrides = RunOverrides {
                keywords,
                out,
                max_depth,
                include_json,
                validate,
                deploy,
                merge_policy,
            };
            cmd_run(config_path, overrides, json).await
        }
        Command::Decode { file, uris } => cmd_decode(&file, uris),
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init(),
            ConfigAction::Show => cmd_config_show(config_path),
        },
    }
}

/// File config (explicit path or the default location) with the env overlay.
fn resolved_config(path: Option<&Path>) -> Result<AppConfig> {
    let mut config = match path {
        Some(path) => load_config_from(path)?,
        None => load_config()?,
    };
    config.apply_env()?;
    Ok(config)
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

async fn cmd_run(config_path: Option<&Path>, overrides: RunOverrides, json: bool) -> Result<()> {
    let mut config = resolved_config(config_path)?;
    overrides.apply(&mut config);

    // Missing credentials are the one fatal condition; check before any work.
    let token = resolve_token(&config)?;

    if config.deploy.enabled && config.deploy.command.is_empty() {
        return Err(eyre!("deploy requested but [deploy] command is empty"));
    }

    let run_config = RunConfig::from(&config);
    info!(
        keywords = ?run_config.keywords,
        output = %run_config.output_dir.display(),
        validate = run_config.validate,
        "starting harvest"
    );

    let reporter = CliProgress::new();
    let summary = nodeharvest_core::run(&run_config, &token, &reporter).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        print_summary(&summary, &run_config);
    }
    Ok(())
}

fn print_summary(summary: &RunSummary, config: &RunConfig) {
    let report = &summary.report;
    println!();
    println!("  Harvest complete!");
    println!(
        "  Repositories: {} found, {} unchanged, {} crawled",
        summary.repositories_found, summary.repositories_skipped, summary.repositories_crawled
    );
    println!(
        "  Files:        {} candidates, {} decoded, {} failed",
        summary.candidate_links, report.success_count, report.failure_count
    );
    println!(
        "  Nodes:        {} seen, {} duplicates, {} unique this run",
        report.total_nodes_seen, report.duplicate_nodes, report.total_unique_nodes
    );
    println!(
        "  Merged:       {} total ({} history, {} new)",
        summary.bundle.node_count, summary.merge.from_history, summary.merge.from_fresh
    );
    for (kind, count) in &summary.bundle.kind_counts {
        println!("    {kind:<12} {count}");
    }
    if let Some(validated) = &summary.validated {
        println!("  Reachable:    {}", validated.node_count);
    }
    if let Some(ok) = summary.deployed {
        println!("  Deploy:       {}", if ok { "ok" } else { "failed" });
    }
    println!("  API calls:    {}", summary.api_calls);
    println!("  Output:       {}", config.output_dir.display());
    println!("  Time:         {:.1}s", summary.elapsed.as_secs_f64());
    println!();
}

fn cmd_decode(file: &Path, uris: bool) -> Result<()> {
    let raw = std::fs::read(file).wrap_err_with(|| format!("cannot read {}", file.display()))?;
    let result = classify_and_parse(&raw);

    let Some(format) = result.format else {
        return Err(eyre!(
            "{}: unrecognized format ({} undecodable lines)",
            file.display(),
            result.line_failures
        ));
    };
    info!(
        file = %file.display(),
        ?format,
        nodes = result.nodes.len(),
        line_failures = result.line_failures,
        "decoded"
    );

    if uris {
        for uri in result.nodes.iter().filter_map(to_uri) {
            println!("{uri}");
        }
    } else {
        print!("{}", render_document(&result.nodes)?);
    }
    Ok(())
}

fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

fn cmd_config_show(path: Option<&Path>) -> Result<()> {
    let config = resolved_config(path)?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// CLI progress reporter using an indicatif spinner.
struct CliProgress {
    spinner: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let spinner = ProgressBar::new_spinner();
        let style = ProgressStyle::with_template("{spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]);
        spinner.set_style(style);
        spinner.enable_steady_tick(std::time::Duration::from_millis(80));
        Self { spinner }
    }
}

impl ProgressReporter for CliProgress {
    fn phase(&self, name: &str) {
        self.spinner.set_message(name.to_string());
    }

    fn repo_crawled(&self, key: &str, current: usize, total: usize) {
        self.spinner
            .set_message(format!("Crawled [{current}/{total}] {key}"));
    }

    fn link_parsed(&self, source: &str, current: usize, total: usize) {
        self.spinner
            .set_message(format!("Parsed [{current}/{total}] {source}"));
    }

    fn done(&self, _summary: &RunSummary) {
        self.spinner.finish_and_clear();
    }
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn run_flags_override_config() {
        let cli = Cli::parse_from([
            "nodeharvest",
            "run",
            "-k",
            "clash free",
            "--keyword",
            "v2ray",
            "--out",
            "dist",
            "--max-depth",
            "1",
            "--merge-policy",
            "fresh-wins",
            "--validate",
        ]);
        let Command::Run {
            keywords,
            out,
            max_depth,
            include_json,
            validate,
            deploy,
            merge_policy,
            ..
        } = cli.command
        else {
            panic!("expected run");
        };

        let mut config = AppConfig::default();
        RunOverrides {
            keywords,
            out,
            max_depth,
            include_json,
            validate,
            deploy,
            merge_policy,
        }
        .apply(&mut config);

        assert_eq!(config.github.keywords, vec!["clash free", "v2ray"]);
        assert_eq!(config.output.dir, "dist");
        assert_eq!(config.crawl.max_depth, 1);
        assert_eq!(config.output.merge_policy, MergePolicy::FreshWins);
        assert!(config.validation.enabled);
        assert!(!config.deploy.enabled);
    }

    #[test]
    fn bad_merge_policy_is_rejected() {
        assert!(Cli::try_parse_from(["nodeharvest", "run", "--merge-policy", "newest"]).is_err());
    }
}
