use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use jobfeed_core::text::description_text;
use jobfeed_core::{
    DebugDumpHook, EnrichedJob, EnrichmentStatus, FeatureExtractor, KeepStrategy, ListingHints,
    MasterAggregateHook, PipelineController, PipelineSettings, Profile, ProfileMatchEvaluator,
    ProxyIdentity, RawListing, RunConfig, SessionHandle, Site,
};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const LINKEDIN_COOKIE_ENV: &str = "JOBFEED_LINKEDIN_COOKIE";

#[derive(Parser)]
#[command(name = "jobfeed", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Discover, enrich and rank postings, then write the CSV feed.
    Run(RunArgs),
    /// Score a local job description against a profile.
    Score {
        /// Profile TOML; the built-in profile when omitted.
        #[arg(long)]
        profile: Option<PathBuf>,
        /// Plain-text or HTML job description.
        #[arg(long)]
        file: PathBuf,
        /// Job title, scored together with the description.
        #[arg(long, default_value = "")]
        title: String,
    },
    /// Validate a profile and print the effective configuration as TOML.
    Profile {
        #[arg(long)]
        profile: Option<PathBuf>,
    },
}

#[derive(Args)]
struct RunArgs {
    /// Search keywords; repeat the flag or separate with commas.
    #[arg(long = "keyword", short = 'k', required = true, value_delimiter = ',')]
    keywords: Vec<String>,
    #[arg(long)]
    location: Option<String>,
    /// Sources in consolidation order.
    #[arg(
        long = "source",
        value_delimiter = ',',
        default_value = "linkedin,naukri,remoterocketship"
    )]
    sources: Vec<String>,
    #[arg(long, default_value = "20")]
    results_wanted: usize,
    #[arg(long, short = 'o', default_value = "jobs.csv")]
    output: PathBuf,
    /// Leave rows scoring below this out of the primary CSV.
    #[arg(long)]
    min_score: Option<u8>,
    /// Use synthetic sources; nothing touches the network.
    #[arg(long, default_value_t = false)]
    dry_run: bool,
    #[arg(long, default_value_t = false)]
    remote_only: bool,
    /// Only postings younger than this many hours.
    #[arg(long)]
    hours_old: Option<u32>,
    /// Global run deadline; collected results are still written when it expires.
    #[arg(long)]
    deadline_secs: Option<u64>,
    #[arg(long)]
    profile: Option<PathBuf>,
    /// Egress identities, `host:port` or `user:pass@host:port`.
    #[arg(long, env = "JOBFEED_PROXIES", value_delimiter = ',')]
    proxies: Vec<String>,
    #[arg(long, default_value = "4")]
    discovery_concurrency: usize,
    #[arg(long, default_value = "3")]
    enrichment_concurrency: usize,
    #[arg(long, default_value = "15")]
    detail_timeout_secs: u64,
    /// Directory for the timestamped debug dump; defaults to the output's directory.
    #[arg(long)]
    debug_dir: Option<PathBuf>,
    #[arg(long, default_value_t = false)]
    no_debug_dump: bool,
    /// Master CSV every run's rows are folded into.
    #[arg(long)]
    master_csv: Option<PathBuf>,
    /// `latest` or `best_score`.
    #[arg(long, default_value = "latest")]
    master_keep: KeepStrategy,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    info!(
        version = env!("CARGO_PKG_VERSION"),
        started_at = %Utc::now().to_rfc3339(),
        "jobfeed boot"
    );

    match execute(cli.command).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            error!(error = %format!("{error:#}"), "jobfeed failed");
            ExitCode::FAILURE
        }
    }
}

async fn execute(command: Command) -> anyhow::Result<()> {
    match command {
        Command::Run(args) => run(args).await,
        Command::Score {
            profile,
            file,
            title,
        } => score(profile.as_deref(), &file, title).await,
        Command::Profile { profile } => {
            let profile = load_profile(profile.as_deref())?;
            print!("{}", profile.to_toml_string()?);
            Ok(())
        }
    }
}

fn load_profile(path: Option<&Path>) -> anyhow::Result<Profile> {
    match path {
        Some(path) => {
            info!(path = %path.display(), "loading profile");
            Ok(Profile::load(path)?)
        }
        None => Ok(Profile::default().validated()?),
    }
}

async fn run(args: RunArgs) -> anyhow::Result<()> {
    let profile = load_profile(args.profile.as_deref())?;

    let mut settings = PipelineSettings {
        discovery_concurrency: args.discovery_concurrency,
        enrichment_concurrency: args.enrichment_concurrency,
        detail_timeout: Duration::from_secs(args.detail_timeout_secs),
        proxies: ProxyIdentity::parse_list(&args.proxies)?,
        ..PipelineSettings::default()
    };
    if let Some(cookie) = std::env::var(LINKEDIN_COOKIE_ENV)
        .ok()
        .filter(|cookie| !cookie.trim().is_empty())
    {
        info!("using linkedin session from {LINKEDIN_COOKIE_ENV}");
        settings
            .sessions
            .insert(Site::LinkedIn, SessionHandle::from_cookie(cookie.trim()));
    }

    let mut controller = PipelineController::new(profile, settings)?;
    if !args.no_debug_dump {
        controller = controller.with_hook(DebugDumpHook::new(args.debug_dir.clone()));
    }
    if let Some(master) = &args.master_csv {
        controller = controller.with_hook(MasterAggregateHook::new(master, args.master_keep));
    }

    let config = RunConfig {
        keywords: args.keywords,
        location: args.location,
        sources: args.sources,
        results_wanted: args.results_wanted,
        output_path: args.output,
        min_score: args.min_score,
        dry_run: args.dry_run,
        remote_only: args.remote_only,
        hours_old: args.hours_old,
        deadline: args.deadline_secs.map(Duration::from_secs),
    };
    let report = controller.run(&config).await?;

    println!("{}", report.stats);
    println!("output: {}", report.output_path.display());
    for outcome in &report.hook_outcomes {
        match &outcome.result {
            Ok(summary) => println!("{}: {summary}", outcome.hook),
            Err(reason) => {
                warn!(hook = %outcome.hook, reason = %reason, "post-run hook failed");
                println!("{}: failed ({reason})", outcome.hook);
            }
        }
    }
    Ok(())
}

async fn score(profile: Option<&Path>, file: &Path, title: String) -> anyhow::Result<()> {
    let evaluator = ProfileMatchEvaluator::new(load_profile(profile)?)?;
    let raw = tokio::fs::read_to_string(file).await?;
    let description = description_text(&raw);

    let extractor = FeatureExtractor::for_profile(evaluator.profile())?;
    let features = extractor.extract(&format!("{title}\n{description}"), &ListingHints::default());

    let mut listing = RawListing::new(Site::LinkedIn, file.display().to_string());
    listing.title = title;
    let job = EnrichedJob::new(
        listing,
        description,
        Some(raw),
        features,
        EnrichmentStatus::FromListing,
    );
    let result = evaluator.evaluate(&job);

    println!("score: {} ({})", result.score, result.level);
    println!("matching skills: {}", result.matching_skills.join(", "));
    println!("missing skills: {}", result.missing_skills.join(", "));
    if let Some(experience) = job.experience {
        println!("experience: {experience}");
    }
    if let Some(mode) = job.work_mode {
        println!("work mode: {mode}");
    }
    for reason in &result.reasons {
        println!("  - {reason}");
    }
    Ok(())
}
