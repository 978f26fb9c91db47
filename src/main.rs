use std::error::Error;
use std::path::{Path, PathBuf};

use clap::{Args, Parser, Subcommand};
use log::{info, warn};
use simple_logger::SimpleLogger;

use flexosm::bounds::{parse_wkt_ring, Bbox, BoundsFilter};
use flexosm::config::{self, ConfigEvaluator};
use flexosm::db::{check_capabilities, PgDatabase};
use flexosm::dispatcher::{ImportRun, UpdateRun};
use flexosm::middle::Middle;
use flexosm::reader::{read_pbf, ReadMode};
use flexosm::sink::{Sink, SinkMode, DEFAULT_FLUSH_WATERMARK};

#[derive(Parser)]
#[clap(author, version, about, long_about = None)]
#[clap(propagate_version = true)]
struct Cli {
    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Import an OSM pbf file into PostgreSQL tables
    Import(Import),
    /// Apply an OSM change file to an existing import
    Update(Update),
}

#[derive(Args)]
pub struct Import {
    /// Input path
    #[clap(short, long)]
    input: String,

    /// Target PostgreSQL connection string
    #[clap(short, long)]
    connectionstring: String,

    /// Table mapping file (YAML)
    #[clap(short, long)]
    mapping: PathBuf,

    /// Filter by bbox (lon/lat comma separated)
    #[clap(short, long)]
    bbox: Option<String>,

    /// Filter by polygon (WKT, lon/lat)
    #[clap(short, long)]
    polygon: Option<String>,

    /// Directory for the file-backed object store
    #[clap(long)]
    middle_dir: Option<PathBuf>,

    /// Make import updatable
    #[clap(long)]
    updatable: bool,
}

#[derive(Args)]
pub struct Update {
    /// Input change file path
    #[clap(short, long)]
    input: String,

    /// Target PostgreSQL connection string
    #[clap(short, long)]
    connectionstring: String,

    /// Table mapping file (YAML)
    #[clap(short, long)]
    mapping: PathBuf,

    /// Directory of the object store written by the import
    #[clap(long)]
    middle_dir: PathBuf,
}

fn main() -> Result<(), Box<dyn Error>> {
    SimpleLogger::new().env().init()?;
    let cli = Cli::parse();
    info!("Initializing");
    match &cli.command {
        Commands::Import(args) => import(args)?,
        Commands::Update(args) => update(args)?,
    }
    info!("Done!");
    Ok(())
}

fn import(args: &Import) -> Result<(), Box<dyn Error>> {
    let mapping = config::compile(config::load(&args.mapping)?)?;
    let mut evaluator = ConfigEvaluator::new(&mapping);
    let options = evaluator.default_options();

    let bounds = if let Some(p) = &args.polygon {
        BoundsFilter::Polygon(parse_wkt_ring(p)?)
    } else if let Some(b) = &args.bbox {
        BoundsFilter::Bbox(Bbox::parse(b)?)
    } else {
        BoundsFilter::None
    };

    if args.updatable && args.middle_dir.is_none() {
        warn!("updatable import without --middle-dir: the object store stays in memory and updates will not find it later");
    }
    let mut middle = match &args.middle_dir {
        Some(dir) => Middle::open(dir, args.updatable)?,
        None => Middle::flat(args.updatable),
    };

    let mut db = PgDatabase::connect(&args.connectionstring)?;
    check_capabilities(&mut db, &mapping.tables)?;

    let mut sink = Sink::new(
        &mapping.tables,
        SinkMode::Import,
        args.updatable,
        mapping.options.srid,
        DEFAULT_FLUSH_WATERMARK,
    );
    info!("Creating tables");
    sink.create_tables(&mut db)?;

    let mut run = ImportRun::new(
        &mut middle,
        &mut evaluator,
        &mut sink,
        &mut db,
        &mapping.tables,
        options,
        bounds,
        None,
    );
    info!("Reading {}", args.input);
    read_pbf(Path::new(&args.input), ReadMode::Import, |event| run.handle(event))?;
    let stats = run.finish()?;
    info!(
        "Imported {} nodes, {} ways, {} relations into {} rows ({} geometry failures)",
        stats.nodes, stats.ways, stats.relations, stats.rows, stats.geometry_failures,
    );
    Ok(())
}

fn update(args: &Update) -> Result<(), Box<dyn Error>> {
    let mapping = config::compile(config::load(&args.mapping)?)?;
    let mut evaluator = ConfigEvaluator::new(&mapping);
    let options = evaluator.default_options();

    let mut middle = Middle::open(&args.middle_dir, true)?;
    let mut db = PgDatabase::connect(&args.connectionstring)?;
    check_capabilities(&mut db, &mapping.tables)?;

    let mut sink = Sink::new(
        &mapping.tables,
        SinkMode::Update,
        true,
        mapping.options.srid,
        DEFAULT_FLUSH_WATERMARK,
    );
    let mut run = UpdateRun::new(
        &mut middle,
        &mut evaluator,
        &mut sink,
        &mut db,
        &mapping.tables,
        options,
        mapping.options.propagation_depth,
        None,
    );
    info!("Applying {}", args.input);
    read_pbf(Path::new(&args.input), ReadMode::Update, |event| run.handle(event))?;
    let stats = run.finish()?;
    info!(
        "Applied {} changes ({} deletes), reprocessed {} dependents, staged {} rows",
        stats.nodes + stats.ways + stats.relations,
        stats.deletes,
        stats.reprocessed,
        stats.rows,
    );
    Ok(())
}
