mod common;

use common::*;
use std::path::Path;
use tempfile::TempDir;
use tilestitch::registration::CandidateKind;
use tilestitch::{stitch, stitch_records, BlendMode, ChannelSelector, ErrorKind, StitchOptions};

fn options(out: &Path) -> StitchOptions {
    StitchOptions {
        filter_sigma: 0.0,
        output_dir: Some(out.to_path_buf()),
        ..StitchOptions::default()
    }
}

fn assert_close(actual: [f64; 2], expected: [f64; 2], tol: f64) {
    assert!(
        (actual[0] - expected[0]).abs() <= tol && (actual[1] - expected[1]).abs() <= tol,
        "{actual:?} is not within {tol} px of {expected:?}"
    );
}

#[test]
fn row_of_three_reconstructs_the_source() {
    let dir = TempDir::new().expect("tempdir");
    let records = row_of_three(&dir.path().join("tiles"));
    let out = dir.path().join("out");

    let result = stitch(&encode(&records), PATTERN, &options(&out)).expect("stitched");
    let summary = &result.summary;

    assert_eq!((summary.canvas_width, summary.canvas_height), (260, 100));
    let ids: Vec<&str> = summary.tiles.iter().map(|t| t.id.as_str()).collect();
    assert_eq!(ids, ["t0", "t1", "t2"]);
    for (tile, x) in summary.tiles.iter().zip([0.0, 80.0, 160.0]) {
        assert_close(tile.position, [x, 0.0], 0.5);
    }
    assert!(summary.low_confidence_tiles.is_empty());

    let source = render(0, 0, 260, 100, noise);
    assert_eq!(result.mosaic.channels.len(), 1);
    assert_eq!(result.mosaic.channels[0].data, source);

    assert_eq!(files_in(&out), ["stitched_0.tif", "thumbnail_0.tif"]);
    assert_eq!(read_tiff(&out.join("stitched_0.tif")), source);
    let thumb = result.mosaic.thumbnail.as_ref().expect("thumbnail");
    assert_eq!((thumb.width, thumb.height), (13, 5));
    assert_eq!(read_tiff(&out.join("thumbnail_0.tif")), thumb.data);
    assert_eq!(summary.thumbnail.as_deref(), Some(out.join("thumbnail_0.tif").as_path()));
}

#[test]
fn edges_report_adjacent_and_extended_pairs() {
    let dir = TempDir::new().expect("tempdir");
    let records = row_of_three(&dir.path().join("tiles"));
    let opts = StitchOptions {
        filter_sigma: 0.0,
        write_output: false,
        ..StitchOptions::default()
    };

    let result = stitch_records(records, PATTERN, &opts).expect("stitched");
    let edges = &result.summary.edges;
    assert_eq!(edges.len(), 3);

    let pairs: Vec<(&str, &str, CandidateKind)> = edges
        .iter()
        .map(|e| (e.tile_a.as_str(), e.tile_b.as_str(), e.kind))
        .collect();
    assert_eq!(
        pairs,
        [
            ("t0", "t1", CandidateKind::Adjacent),
            ("t0", "t2", CandidateKind::Extended),
            ("t1", "t2", CandidateKind::Adjacent),
        ]
    );
    for edge in [&edges[0], &edges[2]] {
        assert!(edge.accepted && edge.in_tree);
        assert!(edge.confidence > 10.0, "confidence {}", edge.confidence);
        assert!((edge.dx - 80.0).abs() < 0.5 && edge.dy.abs() < 0.5);
    }

    // t0 and t2 share no content: the pair is scored over facing windows
    // and stays below the acceptance threshold.
    let far = &edges[1];
    assert!(far.error.is_none());
    assert!(!far.accepted && !far.in_tree);
    assert!(far.confidence < result.summary.acceptance_threshold);
    assert!(result.summary.acceptance_threshold >= opts.min_confidence);

    assert!(result.summary.channels[0].path.is_none());
    assert!(result.summary.thumbnail.is_none());
}

#[test]
fn disabled_output_ignores_the_output_dir() {
    let dir = TempDir::new().expect("tempdir");
    let tiles = dir.path().join("tiles");
    let records = row_of_three(&tiles);
    let out = dir.path().join("out");
    let opts = StitchOptions {
        write_output: false,
        ..options(&out)
    };

    let result = stitch_records(records, PATTERN, &opts).expect("stitched");
    assert!(!out.exists());
    assert_eq!(files_in(&tiles).len(), 3);
    assert!(result.summary.channels.iter().all(|c| c.path.is_none()));
    assert!(result.summary.thumbnail.is_none());
    assert!(result.mosaic.thumbnail.is_some());
}

#[test]
fn perturbed_grid_is_recovered_within_a_pixel() {
    let dir = TempDir::new().expect("tempdir");
    let truth = [(0, 0), (83, 2), (1, 81), (84, 83)];
    let records = write_scene(
        &dir.path().join("tiles"),
        100,
        &[
            TileSpec::new("t0", 0, 0, truth[0]),
            TileSpec::new("t1", 0, 1, truth[1]),
            TileSpec::new("t2", 1, 0, truth[2]),
            TileSpec::new("t3", 1, 1, truth[3]),
        ],
    );
    let opts = StitchOptions {
        filter_sigma: 1.0,
        write_output: false,
        ..StitchOptions::default()
    };

    let result = stitch_records(records, PATTERN, &opts).expect("stitched");
    let summary = &result.summary;
    assert!(summary.refined);
    for (tile, (x, y)) in summary.tiles.iter().zip(truth) {
        assert_close(tile.position, [x as f64, y as f64], 0.5);
        assert_close(tile.nominal, [tile.col as f64 * 80.0, tile.row as f64 * 80.0], 0.0);
    }
    assert_eq!((summary.canvas_width, summary.canvas_height), (184, 183));

    let canvas = &result.mosaic.channels[0];
    for y in 0..canvas.height {
        for x in 0..canvas.width {
            let v = canvas.data[y * canvas.width + x];
            if v != 0 {
                assert_eq!(v, noise(x as i64, y as i64), "pixel ({x}, {y})");
            }
        }
    }
}

#[test]
fn repeated_runs_write_identical_files() {
    let dir = TempDir::new().expect("tempdir");
    let records = row_of_three(&dir.path().join("tiles"));
    let first = dir.path().join("first");
    let second = dir.path().join("second");

    let single = StitchOptions {
        num_threads: Some(1),
        ..options(&first)
    };
    let several = StitchOptions {
        num_threads: Some(3),
        ..options(&second)
    };
    let a = stitch_records(records.clone(), PATTERN, &single).expect("first run");
    let b = stitch_records(records, PATTERN, &several).expect("second run");

    assert_eq!(a.summary.tiles, b.summary.tiles);
    assert_eq!(a.summary.edges, b.summary.edges);
    for name in ["stitched_0.tif", "thumbnail_0.tif"] {
        let lhs = std::fs::read(first.join(name)).expect("first output");
        let rhs = std::fs::read(second.join(name)).expect("second output");
        assert_eq!(lhs, rhs, "{name} differs between runs");
    }
}

#[test]
fn average_blend_of_identical_overlaps_matches_source() {
    let dir = TempDir::new().expect("tempdir");
    let records = row_of_three(&dir.path().join("tiles"));
    let opts = StitchOptions {
        blend: BlendMode::Average,
        do_make_thumbnail: false,
        ..options(&dir.path().join("out"))
    };

    let result = stitch_records(records, PATTERN, &opts).expect("stitched");
    assert_eq!(result.mosaic.channels[0].data, render(0, 0, 260, 100, noise));
    assert!(result.mosaic.thumbnail.is_none());
    assert_eq!(files_in(&dir.path().join("out")), ["stitched_0.tif"]);
}

#[test]
fn single_tile_is_its_own_mosaic() {
    let dir = TempDir::new().expect("tempdir");
    let records = write_scene(
        &dir.path().join("tiles"),
        64,
        &[TileSpec::new("only", 0, 0, (5, 7))],
    );
    let opts = StitchOptions {
        write_output: false,
        ..StitchOptions::default()
    };

    let result = stitch_records(records, PATTERN, &opts).expect("stitched");
    assert!(result.summary.edges.is_empty());
    assert_eq!((result.summary.canvas_width, result.summary.canvas_height), (64, 64));
    assert_eq!(result.mosaic.channels[0].data, render(5, 7, 64, 64, noise));
}

#[test]
fn missing_file_is_an_io_error_naming_the_tile() {
    let dir = TempDir::new().expect("tempdir");
    let tiles = dir.path().join("tiles");
    let mut records = row_of_three(&tiles);
    std::fs::remove_file(&records[2].absolute_path).expect("removed");
    records[2].id = "gone".to_string();
    let out = dir.path().join("out");

    let err = stitch_records(records, PATTERN, &options(&out)).unwrap_err();
    assert_eq!(err.kind, ErrorKind::Io);
    assert_eq!(err.tile_ids, ["gone"]);
    assert!(err.message.contains("gone"));
    assert!(files_in(&out).is_empty());
}

#[test]
fn duplicate_ids_are_a_validation_error() {
    let dir = TempDir::new().expect("tempdir");
    let mut records = row_of_three(&dir.path().join("tiles"));
    records[1].id = "t0".to_string();

    let err = stitch_records(records, PATTERN, &options(&dir.path().join("out"))).unwrap_err();
    assert_eq!(err.kind, ErrorKind::Validation);
    assert!(err.tile_ids.contains(&"t0".to_string()));
}

#[test]
fn names_outside_the_pattern_are_rejected() {
    let dir = TempDir::new().expect("tempdir");
    let records = row_of_three(&dir.path().join("tiles"));

    let err = stitch_records(records, "tile_{row}x{col}.png", &StitchOptions::default())
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::Validation);
    assert!(err.message.contains("tile_{row}x{col}.png"));
}

#[test]
fn invalid_options_fail_before_reading_tiles() {
    let opts = StitchOptions {
        overlap: 0.0,
        ..StitchOptions::default()
    };
    let err = stitch(&[], PATTERN, &opts).unwrap_err();
    assert_eq!(err.kind, ErrorKind::Validation);
    assert!(err.message.contains("overlap"));

    let err = stitch(&["{oops".to_string()], PATTERN, &StitchOptions::default()).unwrap_err();
    assert_eq!(err.kind, ErrorKind::Validation);
}

#[test]
fn abutting_tiles_without_overlap_are_disconnected() {
    let dir = TempDir::new().expect("tempdir");
    let mut records = write_scene(
        &dir.path().join("tiles"),
        100,
        &[
            TileSpec::new("t0", 0, 0, (0, 0)),
            TileSpec::new("t1", 0, 1, (100, 0)),
            TileSpec::new("t2", 0, 2, (200, 0)),
        ],
    );
    for (record, x) in records.iter_mut().zip([0.0, 100.0, 200.0]) {
        record.offset_x = x;
    }
    let out = dir.path().join("out");

    let err = stitch_records(records, PATTERN, &options(&out)).unwrap_err();
    assert_eq!(err.kind, ErrorKind::Connectivity);
    assert_eq!(
        err.groups,
        [vec!["t0".to_string()], vec!["t1".to_string()], vec!["t2".to_string()]]
    );
    assert!(files_in(&out).is_empty());
}

#[test]
fn grid_overlap_without_shared_content_is_rejected() {
    let dir = TempDir::new().expect("tempdir");
    // The grid promises 20 px of overlap, but the tiles only abut.
    let specs: Vec<TileSpec> = (0..2)
        .flat_map(|row| {
            (0..3).map(move |col| {
                TileSpec::new(&format!("t{row}{col}"), row, col, (col * 100, row * 100))
            })
        })
        .collect();
    let records = write_scene(&dir.path().join("tiles"), 100, &specs);
    let out = dir.path().join("out");

    let err = stitch_records(records, PATTERN, &options(&out)).unwrap_err();
    assert_eq!(err.kind, ErrorKind::Connectivity);
    assert_eq!(err.groups.len(), 6, "groups {:?}", err.groups);
    assert!(files_in(&out).is_empty());
}

#[test]
fn permutations_multiplier_allows_drift_past_the_nominal_gap() {
    let dir = TempDir::new().expect("tempdir");
    // The stage reports abutting tiles; they actually overlap by 12 px.
    let mut records = write_scene(
        &dir.path().join("tiles"),
        100,
        &[
            TileSpec::new("t0", 0, 0, (0, 0)),
            TileSpec::new("t1", 0, 1, (88, 0)),
            TileSpec::new("t2", 0, 2, (176, 0)),
        ],
    );
    for (record, x) in records.iter_mut().zip([0.0, 100.0, 200.0]) {
        record.offset_x = x;
    }
    let base = StitchOptions {
        max_shift: 50.0,
        write_output: false,
        ..options(&dir.path().join("out"))
    };

    let nominal_only = StitchOptions {
        permutations_multiplier: 0,
        ..base.clone()
    };
    let err = stitch_records(records.clone(), PATTERN, &nominal_only).unwrap_err();
    assert_eq!(err.kind, ErrorKind::Connectivity);

    let result = stitch_records(records, PATTERN, &base).expect("stitched");
    let summary = &result.summary;
    for (tile, x) in summary.tiles.iter().zip([0.0, 88.0, 176.0]) {
        assert_close(tile.position, [x, 0.0], 0.5);
    }
    assert_eq!((summary.canvas_width, summary.canvas_height), (276, 100));
    assert_eq!(result.mosaic.channels[0].data, render(0, 0, 276, 100, noise));
}

#[test]
fn max_shift_bounds_the_correction() {
    let dir = TempDir::new().expect("tempdir");
    // Nominal step is 80 px, the stage actually moved 94 px.
    let records = write_scene(
        &dir.path().join("tiles"),
        128,
        &[
            TileSpec::new("t0", 0, 0, (0, 0)),
            TileSpec::new("t1", 0, 1, (94, 0)),
        ],
    );
    let base = StitchOptions {
        overlap: 0.375,
        write_output: false,
        ..options(&dir.path().join("out"))
    };

    let tight = StitchOptions {
        max_shift: 4.0,
        ..base.clone()
    };
    let err = stitch_records(records.clone(), PATTERN, &tight).unwrap_err();
    assert_eq!(err.kind, ErrorKind::Connectivity);

    let loose = StitchOptions {
        max_shift: 30.0,
        ..base
    };
    let result = stitch_records(records, PATTERN, &loose).expect("stitched");
    let edge = &result.summary.edges[0];
    assert!(edge.confidence > 10.0, "confidence {}", edge.confidence);
    assert_close([edge.dx, edge.dy], [94.0, 0.0], 0.5);
    assert_close(result.summary.tiles[1].position, [94.0, 0.0], 0.5);
    assert_eq!(result.summary.canvas_width, 222);
}

#[test]
fn canvas_over_budget_is_a_resource_error() {
    let dir = TempDir::new().expect("tempdir");
    let records = row_of_three(&dir.path().join("tiles"));
    let out = dir.path().join("out");
    let opts = StitchOptions {
        max_canvas_bytes: 1000,
        ..options(&out)
    };

    let err = stitch_records(records, PATTERN, &opts).unwrap_err();
    assert_eq!(err.kind, ErrorKind::Resource);
    assert!(files_in(&out).is_empty());
}

#[test]
fn thumbnail_shares_the_canvas_budget() {
    let dir = TempDir::new().expect("tempdir");
    let records = row_of_three(&dir.path().join("tiles"));
    let out = dir.path().join("out");
    // Exactly one 260x100 u16 canvas.
    let canvas_only = StitchOptions {
        max_canvas_bytes: 260 * 100 * 2,
        ..options(&out)
    };

    let full_size_thumbnail = StitchOptions {
        thumbnail_scale: 1.0,
        ..canvas_only.clone()
    };
    let err = stitch_records(records.clone(), PATTERN, &full_size_thumbnail).unwrap_err();
    assert_eq!(err.kind, ErrorKind::Resource);
    assert!(files_in(&out).is_empty());

    let without_thumbnail = StitchOptions {
        do_make_thumbnail: false,
        ..canvas_only
    };
    stitch_records(records, PATTERN, &without_thumbnail).expect("fits the budget");
    assert_eq!(files_in(&out), ["stitched_0.tif"]);
}

#[test]
fn every_channel_follows_the_alignment_channel() {
    let dir = TempDir::new().expect("tempdir");
    let tiles = dir.path().join("tiles");
    std::fs::create_dir_all(&tiles).expect("tile dir");

    let mut records = Vec::new();
    for (channel, texture) in [("a", noise as fn(i64, i64) -> u16), ("b", inverted)] {
        for col in 0..3i64 {
            let path = tiles.join(format!("img_r001_c{:03}_{channel}.tif", col + 1));
            write_tiff(&path, 100, 100, render(col * 80, 0, 100, 100, texture));
            records.push(record(&format!("{channel}{col}"), path, 100, 0, col));
        }
    }
    let opts = StitchOptions {
        filter_sigma: 0.0,
        channel: ChannelSelector::Name("a".to_string()),
        ..StitchOptions::default()
    };

    let result =
        stitch_records(records, "img_r{row:03}_c{col:03}_{channel}.tif", &opts).expect("stitched");
    let summary = &result.summary;
    let names: Vec<&str> = summary.channels.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, ["a", "b"]);
    assert_eq!(summary.alignment_channel, 0);

    assert_eq!(result.mosaic.channels[0].data, render(0, 0, 260, 100, noise));
    assert_eq!(result.mosaic.channels[1].data, render(0, 0, 260, 100, inverted));

    // Outputs default to the directory of the tiles.
    assert_eq!(
        summary.channels[1].path.as_deref(),
        Some(tiles.join("stitched_1.tif").as_path())
    );
    assert_eq!(
        read_tiff(&tiles.join("stitched_1.tif")),
        render(0, 0, 260, 100, inverted)
    );
    assert!(tiles.join("stitched_0.tif").exists());
    assert!(tiles.join("thumbnail_0.tif").exists());
}
