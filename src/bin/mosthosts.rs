use std::process::ExitCode;

use camino::Utf8PathBuf;
use clap::{ArgAction, Args, Parser, Subcommand};
use log::{error, info};

use mosthosts::{
    assemble::{SummaryStatus, TargetRow},
    cache::{CachePolicy, ResultCache},
    candidates::{mosthosts_reader::read_mosthosts_csv, HostRecord},
    config::PipelineConfig,
    matcher::PositionalMatcher,
    mosthosts_errors::MostHostsError,
    output::{write_csv, write_tables, TARGETS_FILE_NAME},
    pipeline::CrossMatchPipeline,
    release::Release,
    store::{postgres::PgStore, ObservationStore},
};

#[derive(Parser, Debug)]
#[command(author, version, about = "Cross-match MostHosts host candidates with DESI")]
struct Cli {
    /// TOML configuration file; defaults apply when absent
    #[arg(short, long, global = true)]
    config: Option<Utf8PathBuf>,

    /// -v for debug, -vv for trace
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbosity: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Match the candidates with the DESI redshifts of a release
    Match(MatchArgs),
    /// Match the candidates with the DESI target-selection catalog
    Targets(MatchArgs),
}

#[derive(Args, Debug)]
struct MatchArgs {
    /// DESI release, overriding the configuration
    #[arg(short, long)]
    release: Option<Release>,

    /// Matching radius in arcseconds, overriding the configuration
    #[arg(long)]
    radius: Option<f64>,

    /// MostHosts CSV export; the database table is read when absent
    #[arg(long)]
    hosts: Option<Utf8PathBuf>,

    /// Output directory, overriding the configuration
    #[arg(short, long)]
    out_dir: Option<Utf8PathBuf>,

    /// Ignore any cached result and rerun the queries
    #[arg(long)]
    refresh: bool,
}

fn setup_logging(verbosity: u8) -> Result<(), log::SetLoggerError> {
    let mut builder = env_logger::Builder::from_default_env();
    builder.target(env_logger::Target::Stdout);
    builder.format_target(false);
    match verbosity {
        0 => builder.filter_level(log::LevelFilter::Info),
        1 => builder.filter_level(log::LevelFilter::Debug),
        _ => builder.filter_level(log::LevelFilter::Trace),
    };
    builder.try_init()
}

fn load_config(cli: &Cli, args: &MatchArgs) -> Result<PipelineConfig, MostHostsError> {
    let mut config = match &cli.config {
        Some(path) => PipelineConfig::from_toml_file(path)?,
        None => PipelineConfig::default(),
    };
    if let Some(release) = args.release {
        config.release = release;
    }
    if let Some(radius) = args.radius {
        config.radius_arcsec = radius;
    }
    if let Some(out_dir) = &args.out_dir {
        config.output_dir = out_dir.clone();
    }
    config.validate()?;
    Ok(config)
}

fn load_hosts(args: &MatchArgs, store: &mut PgStore) -> Result<Vec<HostRecord>, MostHostsError> {
    let hosts = match &args.hosts {
        Some(path) => read_mosthosts_csv(path)?,
        None => store.load_hosts()?,
    };
    info!("{} MostHosts host candidates", hosts.len());
    Ok(hosts)
}

fn run_match(cli: &Cli, args: &MatchArgs) -> Result<(), MostHostsError> {
    let config = load_config(cli, args)?;
    let pipeline = CrossMatchPipeline::new(&config)?;
    let cache = ResultCache::from_config(&config.cache);
    let policy = if args.refresh {
        CachePolicy::Refresh
    } else {
        CachePolicy::Use
    };

    let mut store = PgStore::connect(&config.database)?;
    let hosts = load_hosts(args, &mut store)?;
    let candidates = HostRecord::candidates(&hosts);

    let tables = pipeline.run_cached(&mut store, &candidates, &cache, policy)?;
    store.close()?;

    info!(
        "{}: {} resolved, {} unresolved, {} without match, {} failed",
        tables.release,
        tables.count(SummaryStatus::Resolved),
        tables.count(SummaryStatus::Unresolved),
        tables.count(SummaryStatus::NoMatch),
        tables.count(SummaryStatus::Failed)
    );
    for path in write_tables(&config.output_dir, &tables)? {
        info!("Wrote {path}");
    }
    Ok(())
}

fn run_targets(cli: &Cli, args: &MatchArgs) -> Result<(), MostHostsError> {
    let config = load_config(cli, args)?;
    let matcher = PositionalMatcher::new(config.radius())?;

    let mut store = PgStore::connect(&config.database)?;
    let hosts = load_hosts(args, &mut store)?;
    let candidates = HostRecord::candidates(&hosts);
    let matches = matcher.match_targets(&mut store, &candidates)?;
    store.close()?;

    let mut rows: Vec<TargetRow> = matches
        .into_iter()
        .map(|(candidate, target)| TargetRow::new(&candidate, target))
        .collect();
    rows.sort_by(|a, b| {
        (&a.name, a.group_key, a.target_id).cmp(&(&b.name, b.group_key, b.target_id))
    });

    std::fs::create_dir_all(&config.output_dir)?;
    write_csv(&config.output_dir.join(TARGETS_FILE_NAME), &rows)?;
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    if let Err(e) = setup_logging(cli.verbosity) {
        eprintln!("Failed to initialise logging: {e}");
    }

    let result = match &cli.command {
        Command::Match(args) => run_match(&cli, args),
        Command::Targets(args) => run_targets(&cli, args),
    };
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}
