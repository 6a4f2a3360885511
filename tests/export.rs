mod common;

use std::fs;
use std::io::Read;
use std::path::Path;

use flate2::read::GzDecoder;
use pmpoint::commands::{
    DensityOptions, ExportOptions, SummaryOptions, count_tiles, density_stats, export_points, export_polygons,
    summarize,
};
use pmpoint::error::{GeoJsonError, QueryError};
use pmpoint::filter::QueryBounds;
use pmpoint::geojson::{load_polygons, parse_polygons};
use pmpoint::geometry::Polygon;
use pmpoint::mercator::MERCATOR_BOUND;
use pmpoint::output::{
    OutputSink, TsvWriter, polygon_wkt, summary_text_lines, write_points_geojson, write_rollup_tsv,
};
use pmpoint::pmtiles::Archive;
use serde_json::{Value, json};

use common::{FixtureOptions, counted_point_tile, n_point_tile, point_tile, polygon_tile, write_archive};

const B: f64 = MERCATOR_BOUND;

fn write_points_archive(path: &Path) {
    let north_east = point_tile(
        "poi",
        &[
            (1024.0, 1024.0, &[("id", "1"), ("name", "north")][..]),
            (3072.0, 3072.0, &[("id", "2"), ("name", "east")][..]),
        ],
    );
    let south_west = point_tile("poi", &[(2048.0, 2048.0, &[("name", "south"), ("id", "3")][..])]);
    let root = point_tile("poi", &[(2048.0, 2048.0, &[("id", "0"), ("name", "root")][..])]);
    let options = FixtureOptions {
        max_zoom: 1,
        ..FixtureOptions::default()
    };
    write_archive(
        path,
        &[(0, 0, 0, root), (1, 1, 0, north_east), (1, 0, 1, south_west)],
        &options,
    );
}

fn open(path: &Path) -> Archive {
    Archive::open(path.to_str().expect("utf8 path")).expect("open")
}

fn collect_points(archive: &Archive, options: &ExportOptions) -> Vec<(f64, f64, Vec<String>)> {
    let mut rows = Vec::new();
    export_points(archive, options, |_, frame| {
        for idx in 0..frame.len() {
            let (point, values) = frame.row(idx);
            rows.push((point.x(), point.y(), values.iter().map(|v| v.to_string()).collect()));
        }
        Ok(())
    })
    .expect("export");
    rows
}

fn close(a: f64, b: f64) -> bool {
    (a - b).abs() < 1e-3
}

#[test]
fn exports_all_points_at_max_zoom() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("points.pmtiles");
    write_points_archive(&path);
    let archive = open(&path);

    let rows = collect_points(&archive, &ExportOptions::default());
    assert_eq!(rows.len(), 3);
    assert!(rows.iter().all(|(_, _, values)| values.len() == 2));
    let north = rows.iter().find(|(_, _, v)| v[1] == "north").expect("north");
    assert!(close(north.0, B / 4.0));
    assert!(close(north.1, 3.0 * B / 4.0));
    let south = rows.iter().find(|(_, _, v)| v[0] == "3").expect("south");
    assert_eq!(south.2, vec!["3".to_string(), "south".to_string()]);
    assert!(close(south.0, -B / 2.0));
    assert!(close(south.1, -B / 2.0));
}

#[test]
fn exports_points_inside_bbox() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("points.pmtiles");
    write_points_archive(&path);
    let archive = open(&path);

    let options = ExportOptions {
        bounds: QueryBounds::new(Some(0.0), Some(B / 2.0), None, None),
        ..ExportOptions::default()
    };
    let rows = collect_points(&archive, &options);
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].2[1], "north");
}

#[test]
fn exports_points_inside_polygon() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("points.pmtiles");
    write_points_archive(&path);
    let archive = open(&path);

    let c = -B / 2.0;
    let options = ExportOptions {
        polygons: vec![Polygon::from_xy(&[
            (c - 1000.0, c - 1000.0),
            (c + 1000.0, c - 1000.0),
            (c + 1000.0, c + 1000.0),
            (c - 1000.0, c + 1000.0),
        ])],
        ..ExportOptions::default()
    };
    let rows = collect_points(&archive, &options);
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].2[1], "south");
}

#[test]
fn export_stats_and_explicit_zoom() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("points.pmtiles");
    write_points_archive(&path);
    let archive = open(&path);

    let options = ExportOptions {
        zoom: Some(0),
        ..ExportOptions::default()
    };
    let stats = export_points(&archive, &options, |_, _| Ok(())).expect("export");
    assert_eq!(stats.zoom, 0);
    assert_eq!(stats.tiles_selected, 1);
    assert_eq!(stats.features, 1);

    let options = ExportOptions {
        zoom: Some(7),
        ..ExportOptions::default()
    };
    let err = export_points(&archive, &options, |_, _| Ok(())).expect_err("zoom out of range");
    assert!(matches!(
        err.downcast_ref::<QueryError>(),
        Some(QueryError::ZoomUnavailable { zoom: 7, .. })
    ));
}

fn write_polygon_archive(path: &Path) {
    let first = [(1024.0, 1024.0), (2048.0, 1024.0), (2048.0, 2048.0), (1024.0, 2048.0)];
    let second = [(3072.0, 3072.0), (3584.0, 3072.0), (3584.0, 3584.0), (3072.0, 3584.0)];
    let tile = polygon_tile(
        "areas",
        &[
            (&first[..], &[("name", "first")][..]),
            (&second[..], &[("name", "second")][..]),
        ],
    );
    write_archive(path, &[(0, 0, 0, tile)], &FixtureOptions::default());
}

#[test]
fn exports_polygons_with_query_polygon() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("areas.pmtiles");
    write_polygon_archive(&path);
    let archive = open(&path);

    let mut all = Vec::new();
    let stats = export_polygons(&archive, &ExportOptions::default(), |_, frame| {
        for idx in 0..frame.len() {
            let (polygon, values) = frame.row(idx);
            all.push((*polygon.bbox(), values[0].to_string()));
        }
        Ok(())
    })
    .expect("export");
    assert_eq!(stats.features, 2);
    let (bbox, _) = all.iter().find(|(_, name)| name == "first").expect("first");
    assert!(close(bbox.min.x, -B / 2.0));
    assert!(close(bbox.max.x, 0.0));
    assert!(close(bbox.min.y, 0.0));
    assert!(close(bbox.max.y, B / 2.0));

    let options = ExportOptions {
        polygons: vec![Polygon::from_xy(&[
            (-1000.0, -1000.0),
            (1000.0, -1000.0),
            (1000.0, 1000.0),
            (-1000.0, 1000.0),
        ])],
        ..ExportOptions::default()
    };
    let mut names = Vec::new();
    let mut wkt = Vec::new();
    export_polygons(&archive, &options, |_, frame| {
        for idx in 0..frame.len() {
            let (polygon, values) = frame.row(idx);
            names.push(values[0].to_string());
            wkt.push(polygon_wkt(polygon, 1));
        }
        Ok(())
    })
    .expect("export");
    assert_eq!(names, vec!["first".to_string()]);
    assert!(wkt[0].starts_with("POLYGON (("));
    assert!(wkt[0].ends_with("))"));
}

#[test]
fn point_export_rejects_polygon_layers() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("areas.pmtiles");
    write_polygon_archive(&path);
    let archive = open(&path);

    let err = export_points(&archive, &ExportOptions::default(), |_, _| Ok(())).expect_err("wrong geometry");
    assert!(format!("{err:#}").contains("expected point geometry"));
}

fn write_pyramid(path: &Path) {
    let options = FixtureOptions {
        max_zoom: 1,
        ..FixtureOptions::default()
    };
    write_archive(
        path,
        &[
            (0, 0, 0, n_point_tile(1)),
            (1, 0, 0, n_point_tile(2)),
            (1, 1, 0, n_point_tile(3)),
            (1, 0, 1, n_point_tile(4)),
            (1, 1, 1, n_point_tile(5)),
        ],
        &options,
    );
}

#[test]
fn count_tiles_rolls_up_the_pyramid() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("pyramid.pmtiles");
    write_pyramid(&path);
    let archive = open(&path);

    let report = count_tiles(&archive, None, true).expect("count");
    assert!(report.rolled_up);
    let root = report.rows.iter().find(|r| r.zoom == 0).expect("root");
    assert_eq!(root.total, 14);
    assert_eq!(root.count, 1);
    let leaves: Vec<_> = report.rows.iter().filter(|r| r.zoom == 1).collect();
    assert_eq!(leaves.len(), 4);
    assert!(leaves.iter().all(|r| r.total == r.count && r.fraction == 1.0));

    let mut out = Vec::new();
    write_rollup_tsv(&mut out, &report.rows, report.rolled_up).expect("write");
    let text = String::from_utf8(out).expect("utf8");
    let mut lines = text.lines();
    assert_eq!(
        lines.next(),
        Some("zoom\tx\ty\ttile_id\ttotal_count\ttile_count\tfrac_in_tile")
    );
    assert_eq!(lines.next(), Some("0\t0\t0\t0\t14\t1\t0.07143"));
}

#[test]
fn count_tiles_single_zoom_has_no_rollup() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("pyramid.pmtiles");
    write_pyramid(&path);
    let archive = open(&path);

    let report = count_tiles(&archive, Some(1), true).expect("count");
    assert!(!report.rolled_up);
    assert_eq!(report.rows.len(), 4);
    assert_eq!(report.rows.iter().map(|r| r.count).sum::<u64>(), 14);

    let mut out = Vec::new();
    write_rollup_tsv(&mut out, &report.rows, report.rolled_up).expect("write");
    let text = String::from_utf8(out).expect("utf8");
    assert!(text.starts_with("zoom\tx\ty\ttile_id\ttile_count\n"));

    assert!(count_tiles(&archive, Some(5), true).is_err());
}

fn write_density_archive(path: &Path) {
    let tile = counted_point_tile(&[(0.0, 0.0, 2), (1.0, 1.0, 3)]);
    write_archive(path, &[(0, 0, 0, tile)], &FixtureOptions::default());
}

#[test]
fn density_stats_writes_tile_and_summary_rows() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("density.pmtiles");
    write_density_archive(&path);
    let archive = open(&path);

    let options = DensityOptions {
        max_level: 2,
        threads: 2,
        no_progress: true,
        ..DensityOptions::default()
    };
    let mut out = Vec::new();
    let report = density_stats(&archive, &options, &mut out).expect("density");
    assert_eq!(report.zoom, 0);
    assert_eq!(report.stats.features, 2);

    let text = String::from_utf8(out).expect("utf8");
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(
        lines,
        vec![
            "zoom\ttile_x\ttile_y\twidth\tnum_pts\tnum_grids",
            "0\t0\t0\t1\t2\t1",
            "0\t0\t0\t1\t3\t1",
            "0\t0\t0\t2\t5\t1",
            "0\tALL\tALL\t1\t2\t1",
            "0\tALL\tALL\t1\t3\t1",
            "0\tALL\tALL\t2\t5\t1",
        ]
    );
}

#[test]
fn density_stats_unweighted_and_compact() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("density.pmtiles");
    write_density_archive(&path);
    let archive = open(&path);

    let options = DensityOptions {
        count_field: None,
        max_level: 2,
        compact: true,
        no_progress: true,
        ..DensityOptions::default()
    };
    let mut out = Vec::new();
    density_stats(&archive, &options, &mut out).expect("density");
    let text = String::from_utf8(out).expect("utf8");
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(
        lines,
        vec![
            "zoom\ttile_x\ttile_y\twidth\tnum_pts\tnum_grids",
            "0\tALL\tALL\t1\t1\t2",
            "0\tALL\tALL\t2\t2\t1",
        ]
    );
}

#[test]
fn missing_count_field_weighs_one() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("density.pmtiles");
    write_density_archive(&path);
    let archive = open(&path);

    let options = DensityOptions {
        count_field: Some("population".to_string()),
        max_level: 1,
        compact: true,
        no_progress: true,
        ..DensityOptions::default()
    };
    let mut out = Vec::new();
    let report = density_stats(&archive, &options, &mut out).expect("density");
    assert_eq!(report.summary.total_weight(0), 2);
}

#[test]
fn tsv_output_has_header_and_rounded_coordinates() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("points.pmtiles");
    write_points_archive(&path);
    let archive = open(&path);

    let mut writer = TsvWriter::new(2);
    let mut out = Vec::new();
    export_points(&archive, &ExportOptions::default(), |_, frame| writer.write_points(&mut out, frame))
        .expect("export");
    let text = String::from_utf8(out).expect("utf8");
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines.len(), 4);
    assert_eq!(lines[0], "X\tY\tid\tname");
    let fields: Vec<&str> = lines[1..]
        .iter()
        .find(|line| line.ends_with("north"))
        .expect("north row")
        .split('\t')
        .collect();
    assert_eq!(fields[0], format!("{:.2}", B / 4.0));
    assert_eq!(fields[2], "1");
}

#[test]
fn gzip_sink_round_trips() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("out.tsv.gz");
    let mut sink = OutputSink::create(&path).expect("create");
    write_rollup_tsv(&mut sink, &[], false).expect("write");
    sink.finish().expect("finish");

    let compressed = fs::read(&path).expect("read");
    assert_eq!(&compressed[..2], &[0x1f, 0x8b]);
    let mut text = String::new();
    GzDecoder::new(&compressed[..])
        .read_to_string(&mut text)
        .expect("gunzip");
    assert_eq!(text, "zoom\tx\ty\ttile_id\ttile_count\n");

    let plain = dir.path().join("out.tsv");
    let mut sink = OutputSink::create(&plain).expect("create");
    write_rollup_tsv(&mut sink, &[], false).expect("write");
    sink.finish().expect("finish");
    assert_eq!(
        fs::read_to_string(&plain).expect("read"),
        "zoom\tx\ty\ttile_id\ttile_count\n"
    );
}

#[test]
fn geojson_output_is_one_feature_per_line() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("points.pmtiles");
    write_points_archive(&path);
    let archive = open(&path);

    let mut out = Vec::new();
    export_points(&archive, &ExportOptions::default(), |_, frame| {
        write_points_geojson(&mut out, frame, 3)
    })
    .expect("export");
    let text = String::from_utf8(out).expect("utf8");
    let features: Vec<Value> = text
        .lines()
        .map(|line| serde_json::from_str(line).expect("json line"))
        .collect();
    assert_eq!(features.len(), 3);
    for feature in &features {
        assert_eq!(feature["type"], "Feature");
        assert_eq!(feature["geometry"]["type"], "Point");
        assert!(feature["properties"]["id"].is_string());
    }
}

#[test]
fn loads_query_polygons_from_geojson() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("query.geojson");
    let collection = json!({
        "type": "FeatureCollection",
        "features": [
            {
                "type": "Feature",
                "properties": {},
                "geometry": {
                    "type": "Polygon",
                    "coordinates": [[[0.0, 0.0], [10.0, 0.0], [10.0, 10.0], [0.0, 10.0], [0.0, 0.0]]]
                }
            },
            {
                "type": "Feature",
                "properties": {"name": "pair"},
                "geometry": {
                    "type": "MultiPolygon",
                    "coordinates": [
                        [[[20.0, 20.0], [30.0, 20.0], [30.0, 30.0], [20.0, 20.0]]],
                        [[[40.0, 40.0], [50.0, 40.0], [50.0, 50.0], [40.0, 40.0]]]
                    ]
                }
            }
        ]
    });
    fs::write(&path, collection.to_string()).expect("write");

    let polygons = load_polygons(&path).expect("load");
    assert_eq!(polygons.len(), 3);
    assert!(polygons[0].contains_point(5.0, 5.0));
    assert_eq!(polygons[1].bbox().min.x, 20.0);
    assert_eq!(polygons[2].vertices().len(), 4);
}

#[test]
fn geojson_rejects_holes_and_other_types() {
    let holes = json!({
        "type": "Polygon",
        "coordinates": [
            [[0.0, 0.0], [10.0, 0.0], [10.0, 10.0], [0.0, 0.0]],
            [[1.0, 1.0], [2.0, 1.0], [2.0, 2.0], [1.0, 1.0]]
        ]
    });
    assert!(matches!(parse_polygons(&holes), Err(GeoJsonError::Holes)));

    let point = json!({"type": "Point", "coordinates": [0.0, 0.0]});
    assert!(matches!(parse_polygons(&point), Err(GeoJsonError::UnsupportedType(_))));

    let bad = json!({"type": "Polygon", "coordinates": [[[0.0, "x"]]]});
    assert!(matches!(parse_polygons(&bad), Err(GeoJsonError::Coordinates(_))));
}

#[test]
fn summary_reports_requested_sections() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("pyramid.pmtiles");
    write_pyramid(&path);
    let archive = open(&path);

    let summary = summarize(
        &archive,
        SummaryOptions {
            header: true,
            metadata: true,
            tiles: false,
        },
    );
    assert_eq!(summary.tile_count, 5);
    assert!(summary.header.is_some());
    assert!(summary.tiles.is_none());

    let lines = summary_text_lines(&summary);
    assert!(lines.iter().any(|l| l == "version: 3"));
    assert!(lines.iter().any(|l| l == "zoom: min=0 max=1"));
    assert!(lines.iter().any(|l| l.contains("\"fixture\"")));

    let json = serde_json::to_value(&summary).expect("json");
    assert_eq!(json["header"]["tile_type"], "mvt");
    assert!(json.get("tiles").is_none());
}
