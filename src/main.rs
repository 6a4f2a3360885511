use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use pmpoint::cli::{Cli, Command, ExportArgs, ReportFormat};
use pmpoint::commands::{
    DensityOptions, ExportOptions, SummaryOptions, count_tiles, density_stats, export_points,
    export_polygons, summarize,
};
use pmpoint::error::QueryError;
use pmpoint::filter::QueryBounds;
use pmpoint::geojson::load_polygons;
use pmpoint::output::{
    OutputSink, TsvWriter, summary_text_lines, write_points_geojson, write_polygons_geojson,
    write_rollup_tsv,
};
use pmpoint::pmtiles::Archive;

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log);

    match cli.command {
        Command::Summarize(args) => {
            let archive = open_archive(&args.input)?;
            let options = SummaryOptions {
                header: args.all || args.hdr,
                metadata: args.all || args.meta,
                tiles: args.all || args.tile,
            };
            let summary = summarize(&archive, options);
            match args.output {
                ReportFormat::Json => {
                    let json = serde_json::to_string_pretty(&summary)?;
                    println!("{}", json);
                }
                ReportFormat::Text => {
                    for line in summary_text_lines(&summary) {
                        println!("{}", line);
                    }
                }
            }
        }
        Command::Export(args) => run_export(args, false)?,
        Command::ExportPolygons(args) => run_export(args, true)?,
        Command::CountTiles(args) => {
            let archive = open_archive(&args.input)?;
            let report = count_tiles(&archive, args.zoom, args.no_progress)
                .with_context(|| format!("count tiles in {}", args.input))?;
            let mut out = OutputSink::create(&args.out_tsv)?;
            write_rollup_tsv(&mut out, &report.rows, report.rolled_up)?;
            out.finish()?;
        }
        Command::DensityStats(args) => {
            let archive = open_archive(&args.input)?;
            let options = DensityOptions {
                zoom: args.zoom,
                count_field: (!args.unweighted).then(|| args.count.clone()),
                max_level: args.max_level,
                threads: args.threads,
                compact: args.compact,
                no_progress: args.no_progress,
            };
            let mut out = OutputSink::create(&args.out)?;
            density_stats(&archive, &options, &mut out)
                .with_context(|| format!("density statistics for {}", args.input))?;
            out.finish()?;
        }
    }

    Ok(())
}

fn open_archive(input: &str) -> Result<Archive> {
    Archive::open(input).with_context(|| format!("open archive {input}"))
}

fn run_export(args: ExportArgs, polygons: bool) -> Result<()> {
    if args.out_tsv.is_none() && args.out_json.is_none() {
        return Err(QueryError::MissingInput("--out-tsv or --out-json").into());
    }
    let query_polygons = match &args.polygon {
        Some(path) => load_polygons(path).with_context(|| format!("load polygons from {}", path.display()))?,
        None => Vec::new(),
    };
    let archive = open_archive(&args.input)?;
    let options = ExportOptions {
        zoom: args.zoom,
        bounds: QueryBounds::new(args.xmin, args.ymin, args.xmax, args.ymax),
        polygons: query_polygons,
        no_progress: args.no_progress,
    };

    let mut tsv = match &args.out_tsv {
        Some(path) => Some((OutputSink::create(path)?, TsvWriter::new(args.precision))),
        None => None,
    };
    let mut json = match &args.out_json {
        Some(path) => Some(OutputSink::create(path)?),
        None => None,
    };
    let precision = args.precision;

    let result = if polygons {
        export_polygons(&archive, &options, |_, frame| {
            if let Some((out, writer)) = tsv.as_mut() {
                writer.write_polygons(out, frame)?;
            }
            if let Some(out) = json.as_mut() {
                write_polygons_geojson(out, frame, precision)?;
            }
            Ok(())
        })
    } else {
        export_points(&archive, &options, |_, frame| {
            if let Some((out, writer)) = tsv.as_mut() {
                writer.write_points(out, frame)?;
            }
            if let Some(out) = json.as_mut() {
                write_points_geojson(out, frame, precision)?;
            }
            Ok(())
        })
    };
    let stats = result.with_context(|| format!("export features from {}", args.input))?;

    if let Some((out, _)) = tsv {
        out.finish()?;
    }
    if let Some(out) = json {
        out.finish()?;
    }
    info!(
        "exported {} features from {} tiles at zoom {}",
        stats.features, stats.tiles_decoded, stats.zoom
    );
    Ok(())
}

fn init_tracing(level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_new(level).unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new("info")
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
