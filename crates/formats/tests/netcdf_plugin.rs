//! End-to-end tests for the NetCDF plugin against synthetic files.

use chrono::{TimeZone, Utc};
use formats::{FormatPlugin, NetcdfPlugin, SourceSelector};
use raster_common::PixelWindow;
use test_utils::{create_test_grid, NetcdfBuilder};

#[test]
fn test_lists_only_spatial_variables() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("t2m.nc");
    NetcdfBuilder::new("t2m", 4, 3)
        .with_units("K")
        .write(&path)
        .unwrap();

    let plugin = NetcdfPlugin::new();
    let bands = plugin.list_variables(&path).unwrap();

    // The y/x coordinate variables must not be listed as data bands.
    assert_eq!(bands.len(), 1);
    assert_eq!(bands[0].name, "t2m");
    assert_eq!(bands[0].units.as_deref(), Some("K"));
    assert_eq!(bands[0].shape, vec![3, 4]);
}

#[test]
fn test_timestamps_from_cf_axis() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("series.nc");
    NetcdfBuilder::new("precip", 2, 2)
        .with_times("hours since 2024-01-15 00:00:00", &[0.0, 6.0])
        .with_data(vec![1.0; 8])
        .write(&path)
        .unwrap();

    let plugin = NetcdfPlugin::new();
    let times = plugin.timestamps(&path, "precip").unwrap();
    assert_eq!(
        times,
        vec![
            Utc.with_ymd_and_hms(2024, 1, 15, 0, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2024, 1, 15, 6, 0, 0).unwrap(),
        ]
    );
}

#[test]
fn test_timestamp_from_filename_when_no_axis() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("sst_2024-02-10.nc");
    NetcdfBuilder::new("sst", 2, 2).write(&path).unwrap();

    let plugin = NetcdfPlugin::new();
    let times = plugin.timestamps(&path, "sst").unwrap();
    assert_eq!(
        times,
        vec![Utc.with_ymd_and_hms(2024, 2, 10, 0, 0, 0).unwrap()]
    );
}

#[test]
fn test_extracts_with_bounds_from_cell_centers() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("t2m.nc");
    NetcdfBuilder::new("t2m", 4, 3)
        .with_bounds(10.0, 40.0, 14.0, 43.0)
        .with_data(create_test_grid(4, 3))
        .write(&path)
        .unwrap();

    let plugin = NetcdfPlugin::new();
    let band = plugin
        .extract_variable(&path, "t2m", None, None, &SourceSelector::default())
        .unwrap();

    assert_eq!(band.width, 4);
    assert_eq!(band.height, 3);
    assert_eq!(band.bounds.to_array(), [10.0, 40.0, 14.0, 43.0]);
    assert_eq!(band.value_at(0, 1), 1000.0);
    assert_eq!(band.value_at(1, 0), 1.0);
}

#[test]
fn test_ascending_y_is_flipped_north_up() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ascending.nc");
    NetcdfBuilder::new("t2m", 4, 3)
        .with_bounds(10.0, 40.0, 14.0, 43.0)
        .with_ascending_y()
        .with_data(create_test_grid(4, 3))
        .write(&path)
        .unwrap();

    let plugin = NetcdfPlugin::new();
    let band = plugin
        .extract_variable(&path, "t2m", None, None, &SourceSelector::default())
        .unwrap();

    assert!(band.meta.flip_y);
    assert_eq!(band.bounds.to_array(), [10.0, 40.0, 14.0, 43.0]);
    // File row 0 is the southernmost; output row 0 must be the northernmost.
    assert_eq!(band.value_at(0, 0), 2.0);
    assert_eq!(band.value_at(2, 0), 0.0);
}

#[test]
fn test_fill_value_becomes_nan() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("gaps.nc");
    let mut data = create_test_grid(4, 3);
    data[5] = -9999.0;
    NetcdfBuilder::new("t2m", 4, 3)
        .with_fill_value(-9999.0)
        .with_data(data)
        .write(&path)
        .unwrap();

    let plugin = NetcdfPlugin::new();
    let band = plugin
        .extract_variable(&path, "t2m", None, None, &SourceSelector::default())
        .unwrap();

    assert!(band.value_at(1, 1).is_nan());
    assert_eq!(band.data.iter().filter(|v| v.is_nan()).count(), 1);
}

#[test]
fn test_scale_and_offset_applied() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("packed.nc");
    NetcdfBuilder::new("t2m", 2, 2)
        .with_scale_offset(0.5, 100.0)
        .with_data(vec![10.0, 20.0, 30.0, 40.0])
        .write(&path)
        .unwrap();

    let plugin = NetcdfPlugin::new();
    let band = plugin
        .extract_variable(&path, "t2m", None, None, &SourceSelector::default())
        .unwrap();

    assert_eq!(band.value_at(0, 0), 105.0);
    assert_eq!(band.value_at(1, 1), 120.0);
}

#[test]
fn test_time_step_selection() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("series.nc");
    let mut data = vec![1.0f32; 4];
    data.extend(vec![2.0f32; 4]);
    NetcdfBuilder::new("precip", 2, 2)
        .with_times("hours since 2024-01-15 00:00:00", &[0.0, 6.0])
        .with_data(data)
        .write(&path)
        .unwrap();

    let plugin = NetcdfPlugin::new();
    let at_six = Utc.with_ymd_and_hms(2024, 1, 15, 6, 0, 0).unwrap();
    let band = plugin
        .extract_variable(&path, "precip", Some(at_six), None, &SourceSelector::default())
        .unwrap();

    assert_eq!(band.value_at(0, 0), 2.0);
    assert_eq!(band.meta.timestamp, Some(at_six));
}

#[test]
fn test_window_read() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("grid.nc");
    NetcdfBuilder::new("t2m", 6, 5)
        .with_data(create_test_grid(6, 5))
        .write(&path)
        .unwrap();

    let plugin = NetcdfPlugin::new();
    let band = plugin
        .extract_variable(
            &path,
            "t2m",
            None,
            Some(PixelWindow::new(1, 1, 3, 2)),
            &SourceSelector::default(),
        )
        .unwrap();

    assert_eq!(band.width, 3);
    assert_eq!(band.height, 2);
    assert_eq!(band.bounds.to_array(), [1.0, 2.0, 4.0, 4.0]);
    // Window origin sits at full-raster (row 1, col 1).
    assert_eq!(band.value_at(0, 0), 1001.0);
    assert_eq!(band.value_at(1, 2), 3002.0);
}
