use std::fs::File;
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process;

use clap::{Parser, Subcommand, ValueEnum};
use ndarray::Array2;
use tracing::{Level, info};

use skymatch::engine::{
    CartesianMatchEngine, EllipseCartesianMatchEngine, EllipseSkyMatchEngine, Engine,
    EqualsMatchEngine, ErrorSkyMatchEngine, HumanMatchEngine, MatchEngine, SkyMatchEngine,
};
use skymatch::pairing::{
    GroupMatches, MatchConfig, MultiJoinType, PairMatches, PairMode, find_group_matches,
    find_internal_groups, find_internal_matches, find_multi_pair_matches, find_pair_matches,
};
use skymatch::pixellator::{SkyPixellator, Tessellation};
use skymatch::table::{ArrayTable, RowSource, read_text_table};

const ARCSEC: f64 = std::f64::consts::PI / (180.0 * 3600.0);

#[derive(Parser)]
#[command(name = "skymatch", about = "Crossmatch tables by position")]
struct Cli {
    /// More log output; repeat for debug.
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Pair rows of table A with rows of table B.
    Match {
        a: PathBuf,
        b: PathBuf,

        #[command(flatten)]
        opts: MatchOpts,

        /// Columns of A forming each tuple, comma separated (default: leading columns).
        #[arg(long, value_delimiter = ',')]
        cols_a: Vec<usize>,

        /// Columns of B forming each tuple, comma separated (default: leading columns).
        #[arg(long, value_delimiter = ',')]
        cols_b: Vec<usize>,

        /// Skip coverage pruning.
        #[arg(long)]
        no_coverage: bool,
    },

    /// Pair distinct rows within one table.
    Internal {
        table: PathBuf,

        #[command(flatten)]
        opts: MatchOpts,

        /// Columns forming each tuple, comma separated (default: leading columns).
        #[arg(long, value_delimiter = ',')]
        cols: Vec<usize>,

        /// Report groups of linked rows instead of pairs.
        #[arg(long)]
        groups: bool,

        /// With --groups, also report rows that matched nothing.
        #[arg(long, requires = "groups")]
        singles: bool,
    },

    /// Group rows of several tables that match one another.
    Group {
        /// Two or more tables.
        #[arg(required = true, num_args = 2..)]
        tables: Vec<PathBuf>,

        #[command(flatten)]
        opts: MatchOpts,

        /// Columns forming each tuple in every table (default: leading columns).
        #[arg(long, value_delimiter = ',')]
        cols: Vec<usize>,

        /// Join type per table, comma separated (default: all `default`).
        #[arg(long, value_enum, value_delimiter = ',')]
        join: Vec<JoinArg>,

        /// Pair every table with this one (0-based) instead of all with all.
        #[arg(long)]
        reference: Option<usize>,

        /// With --reference, keep only the best partner from each table.
        #[arg(long, requires = "reference")]
        best_only: bool,

        /// Skip coverage pruning.
        #[arg(long)]
        no_coverage: bool,
    },

    /// Print the pixels overlapped by a cone.
    Pixels {
        /// Right ascension in degrees.
        #[arg(long, allow_hyphen_values = true)]
        ra: f64,

        /// Declination in degrees.
        #[arg(long, allow_hyphen_values = true)]
        dec: f64,

        /// Cone radius in arcsec.
        #[arg(long)]
        radius: f64,

        #[arg(long, value_enum, default_value = "healpix")]
        pixellator: PixellatorArg,

        /// Fixed order; chosen from the radius if omitted.
        #[arg(long)]
        depth: Option<u8>,
    },
}

#[derive(clap::Args)]
struct MatchOpts {
    #[arg(long, value_enum, default_value = "sky")]
    engine: EngineArg,

    #[arg(long, value_enum, default_value = "healpix")]
    pixellator: PixellatorArg,

    /// Match tolerance: arcsec for sky engines (scale for error-sky and
    /// sky ellipses), native units otherwise (scale for ellipses).
    #[arg(long, default_value = "1.0")]
    radius: f64,

    /// Dimensions for the cartesian and exact engines.
    #[arg(long, default_value = "2")]
    ndim: usize,

    /// Fixed pixellation order for sky engines.
    #[arg(long)]
    depth: Option<u8>,

    #[arg(long, value_enum, default_value = "all")]
    mode: ModeArg,

    /// Run on one thread.
    #[arg(long)]
    sequential: bool,
}

#[derive(Clone, Copy, ValueEnum)]
enum EngineArg {
    Sky,
    ErrorSky,
    Cartesian,
    Exact,
    SkyEllipse,
    Ellipse,
}

#[derive(Clone, Copy, ValueEnum)]
enum JoinArg {
    Default,
    Match,
    Nomatch,
    Always,
}

impl From<JoinArg> for MultiJoinType {
    fn from(arg: JoinArg) -> Self {
        match arg {
            JoinArg::Default => MultiJoinType::Default,
            JoinArg::Match => MultiJoinType::Match,
            JoinArg::Nomatch => MultiJoinType::NoMatch,
            JoinArg::Always => MultiJoinType::Always,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum PixellatorArg {
    Healpix,
    Htm,
}

impl From<PixellatorArg> for Tessellation {
    fn from(arg: PixellatorArg) -> Self {
        match arg {
            PixellatorArg::Healpix => Tessellation::Healpix,
            PixellatorArg::Htm => Tessellation::Htm,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum ModeArg {
    All,
    Best,
    Best1,
    Best2,
}

impl From<ModeArg> for PairMode {
    fn from(arg: ModeArg) -> Self {
        match arg {
            ModeArg::All => PairMode::All,
            ModeArg::Best => PairMode::Best,
            ModeArg::Best1 => PairMode::Best1,
            ModeArg::Best2 => PairMode::Best2,
        }
    }
}

fn build_engine(opts: &MatchOpts) -> skymatch::Result<HumanMatchEngine<Engine>> {
    let pixellator = SkyPixellator::new(opts.pixellator.into());
    let mut engine = match opts.engine {
        EngineArg::Sky => Engine::from(SkyMatchEngine::new(pixellator, opts.radius * ARCSEC)),
        EngineArg::ErrorSky => {
            Engine::from(ErrorSkyMatchEngine::new(pixellator, opts.radius * ARCSEC))
        }
        EngineArg::Cartesian => Engine::from(CartesianMatchEngine::isotropic(opts.ndim, opts.radius)?),
        EngineArg::Exact => Engine::from(EqualsMatchEngine::new(opts.ndim)),
        EngineArg::SkyEllipse => {
            Engine::from(EllipseSkyMatchEngine::new(pixellator, opts.radius * ARCSEC))
        }
        EngineArg::Ellipse => Engine::from(EllipseCartesianMatchEngine::new(opts.radius)?),
    };
    if let Some(depth) = opts.depth
        && matches!(
            opts.engine,
            EngineArg::Sky | EngineArg::ErrorSky | EngineArg::SkyEllipse
        )
    {
        engine.set_parameter("Depth", f64::from(depth))?;
    }
    let engine = HumanMatchEngine::new(engine);
    for param in engine.match_parameters().iter().chain(&engine.tuning_parameters()) {
        let unit = param.info.unit.as_deref().unwrap_or("");
        info!("{} = {} {}", param.name(), param.value, unit);
    }
    Ok(engine)
}

fn load_table(path: &Path, cols: &[usize], ncols: usize) -> skymatch::Result<ArrayTable> {
    let reader = BufReader::new(File::open(path)?);
    let data: Array2<f64> = read_text_table(reader)?;
    info!("Loaded {} rows from {}", data.nrows(), path.display());
    let columns = if cols.is_empty() {
        (0..ncols).collect()
    } else {
        cols.to_vec()
    };
    ArrayTable::new(data, columns)
}

fn config(opts: &MatchOpts, use_coverage: bool) -> MatchConfig {
    MatchConfig {
        pair_mode: opts.mode.into(),
        use_coverage,
        parallel: !opts.sequential,
    }
}

fn write_pairs(result: &PairMatches) -> io::Result<()> {
    let mut out = BufWriter::new(io::stdout().lock());
    for p in &result.pairs {
        writeln!(out, "{} {} {}", p.row_a, p.row_b, p.score)?;
    }
    out.flush()
}

/// One line per group: `table:row` for each member, with `:score` for
/// scored members.
fn write_groups(result: &GroupMatches) -> io::Result<()> {
    let mut out = BufWriter::new(io::stdout().lock());
    for group in &result.groups {
        let mut sep = "";
        for m in &group.members {
            write!(out, "{sep}{}:{}", m.row.table, m.row.row)?;
            if let Some(score) = m.score {
                write!(out, ":{score}")?;
            }
            sep = " ";
        }
        writeln!(out)?;
    }
    out.flush()
}

fn cmd_match(
    a: &Path,
    b: &Path,
    opts: &MatchOpts,
    cols_a: &[usize],
    cols_b: &[usize],
    no_coverage: bool,
) -> skymatch::Result<()> {
    let engine = build_engine(opts)?;
    let ncols = engine.tuple_infos().len();
    let table_a = load_table(a, cols_a, ncols)?;
    let table_b = load_table(b, cols_b, ncols)?;
    let result = find_pair_matches(&engine, &table_a, &table_b, &config(opts, !no_coverage))?;
    write_pairs(&result)?;
    Ok(())
}

fn cmd_internal(
    table: &Path,
    opts: &MatchOpts,
    cols: &[usize],
    groups: bool,
    singles: bool,
) -> skymatch::Result<()> {
    let engine = build_engine(opts)?;
    let ncols = engine.tuple_infos().len();
    let table = load_table(table, cols, ncols)?;
    let config = config(opts, false);
    if groups {
        write_groups(&find_internal_groups(&engine, &table, singles, &config)?)?;
    } else {
        write_pairs(&find_internal_matches(&engine, &table, &config)?)?;
    }
    Ok(())
}

struct GroupArgs<'a> {
    cols: &'a [usize],
    join: &'a [JoinArg],
    reference: Option<usize>,
    best_only: bool,
    no_coverage: bool,
}

fn cmd_group(paths: &[PathBuf], opts: &MatchOpts, args: GroupArgs<'_>) -> skymatch::Result<()> {
    let engine = build_engine(opts)?;
    let ncols = engine.tuple_infos().len();
    let loaded = paths
        .iter()
        .map(|path| load_table(path, args.cols, ncols))
        .collect::<skymatch::Result<Vec<_>>>()?;
    let tables: Vec<&dyn RowSource> = loaded.iter().map(|t| t as &dyn RowSource).collect();
    let join_types: Vec<MultiJoinType> = if args.join.is_empty() {
        vec![MultiJoinType::Default; tables.len()]
    } else {
        args.join.iter().map(|&j| j.into()).collect()
    };
    let config = config(opts, !args.no_coverage);
    let result = match args.reference {
        Some(index0) => find_multi_pair_matches(
            &engine,
            &tables,
            index0,
            args.best_only,
            &join_types,
            &config,
        )?,
        None => find_group_matches(&engine, &tables, &join_types, &config)?,
    };
    write_groups(&result)?;
    Ok(())
}

fn cmd_pixels(
    ra: f64,
    dec: f64,
    radius: f64,
    pixellator: PixellatorArg,
    depth: Option<u8>,
) -> skymatch::Result<()> {
    let radius = radius * ARCSEC;
    let mut pixellator = SkyPixellator::new(pixellator.into());
    pixellator.set_scale(radius);
    pixellator.set_order(depth);
    let mut pixer = pixellator.create_fixed_radius_pixer_factory(radius)();
    let (ra, dec) = (ra.to_radians(), dec.to_radians());
    let pixels = pixer.pixels(ra, dec);
    let tessellation = pixellator.tessellation();
    let order = pixer.order();
    info!(
        "{} pixels at {} order {}",
        pixels.len(),
        tessellation.name(),
        order
    );
    let own = tessellation.pixel_at(ra, dec, order);
    let mut out = BufWriter::new(io::stdout().lock());
    if let Some((cra, cdec)) = tessellation.pixel_center(own, order) {
        // Comment line, skipped when the output is read back as a table.
        writeln!(
            out,
            "# centre pixel {own} at {:.6} {:.6}",
            cra.to_degrees(),
            cdec.to_degrees()
        )?;
    }
    for p in pixels {
        writeln!(out, "{p}")?;
    }
    out.flush()?;
    Ok(())
}

fn main() {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        _ => Level::DEBUG,
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(io::stderr)
        .init();

    let result = match &cli.command {
        Commands::Match {
            a,
            b,
            opts,
            cols_a,
            cols_b,
            no_coverage,
        } => cmd_match(a, b, opts, cols_a, cols_b, *no_coverage),
        Commands::Internal {
            table,
            opts,
            cols,
            groups,
            singles,
        } => cmd_internal(table, opts, cols, *groups, *singles),
        Commands::Group {
            tables,
            opts,
            cols,
            join,
            reference,
            best_only,
            no_coverage,
        } => cmd_group(
            tables,
            opts,
            GroupArgs {
                cols,
                join,
                reference: *reference,
                best_only: *best_only,
                no_coverage: *no_coverage,
            },
        ),
        Commands::Pixels {
            ra,
            dec,
            radius,
            pixellator,
            depth,
        } => cmd_pixels(*ra, *dec, *radius, *pixellator, *depth),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}
