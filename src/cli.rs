use std::path::PathBuf;

use clap::{ArgGroup, Args, Parser, Subcommand, ValueEnum};

#[derive(Debug, Parser)]
#[command(name = "pmpoint", version, about = "Query point and polygon collections in PMTiles archives")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Log level (error|warn|info|debug|trace)
    #[arg(long, default_value = "info", global = true)]
    pub log: String,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Print the header, metadata and/or tile directory
    Summarize(SummarizeArgs),
    /// Export point features inside a bounding box and/or polygons
    Export(ExportArgs),
    /// Export polygon features inside a bounding box and/or polygons
    ExportPolygons(ExportArgs),
    /// Count features per tile, rolled up the zoom pyramid
    CountTiles(CountTilesArgs),
    /// Multi-resolution point density histograms
    DensityStats(DensityStatsArgs),
}

/// At least one of `--hdr`, `--meta`, `--tile` or `--all` is required.
#[derive(Debug, Args)]
#[command(group(
    ArgGroup::new("items")
        .required(true)
        .multiple(true)
        .args(["hdr", "meta", "tile", "all"])
))]
pub struct SummarizeArgs {
    /// Local path, http(s):// URL or s3://bucket/key
    pub input: String,

    #[arg(long, default_value_t = false)]
    pub hdr: bool,

    #[arg(long, default_value_t = false)]
    pub meta: bool,

    #[arg(long, default_value_t = false)]
    pub tile: bool,

    #[arg(long, default_value_t = false)]
    pub all: bool,

    #[arg(long, value_enum, default_value_t = ReportFormat::Text)]
    pub output: ReportFormat,
}

#[derive(Debug, Args)]
pub struct ExportArgs {
    pub input: String,

    /// TSV output (gzip when the name ends in .gz)
    #[arg(long)]
    pub out_tsv: Option<PathBuf>,

    /// GeoJSON lines output (gzip when the name ends in .gz)
    #[arg(long)]
    pub out_json: Option<PathBuf>,

    /// Zoom level to read (default: maximum zoom)
    #[arg(long)]
    pub zoom: Option<u8>,

    #[arg(long, allow_hyphen_values = true)]
    pub xmin: Option<f64>,

    #[arg(long, allow_hyphen_values = true)]
    pub xmax: Option<f64>,

    #[arg(long, allow_hyphen_values = true)]
    pub ymin: Option<f64>,

    #[arg(long, allow_hyphen_values = true)]
    pub ymax: Option<f64>,

    /// GeoJSON file of query polygons in EPSG:3857
    #[arg(long)]
    pub polygon: Option<PathBuf>,

    /// Digits after the decimal point for coordinates
    #[arg(long, default_value_t = 3)]
    pub precision: usize,

    #[arg(long, default_value_t = false)]
    pub no_progress: bool,
}

#[derive(Debug, Args)]
pub struct CountTilesArgs {
    pub input: String,

    #[arg(long)]
    pub out_tsv: PathBuf,

    /// Single zoom level; omitted means every zoom with rollup
    #[arg(long)]
    pub zoom: Option<u8>,

    #[arg(long, default_value_t = false)]
    pub no_progress: bool,
}

#[derive(Debug, Args)]
pub struct DensityStatsArgs {
    pub input: String,

    #[arg(long)]
    pub out: PathBuf,

    /// Zoom level (default: maximum zoom)
    #[arg(long)]
    pub zoom: Option<u8>,

    /// Attribute holding per-feature counts
    #[arg(long, default_value = "gn")]
    pub count: String,

    /// Weigh every feature 1 instead of reading --count
    #[arg(long, default_value_t = false)]
    pub unweighted: bool,

    /// Skip per-tile rows
    #[arg(long, default_value_t = false)]
    pub compact: bool,

    /// Worker threads (default: available cores)
    #[arg(long, default_value_t = 0)]
    pub threads: usize,

    /// Number of grid resolutions
    #[arg(long, default_value_t = 12, value_parser = clap::value_parser!(u32).range(1..=31))]
    pub max_level: u32,

    #[arg(long, default_value_t = false)]
    pub no_progress: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ReportFormat {
    Text,
    Json,
}
