//! End-to-end tests for the GRIB2 plugin against synthetic files.

use chrono::{TimeZone, Utc};
use formats::{FormatPlugin, FormatRegistry, GribPlugin, SourceSelector};
use raster_common::{FileFormat, PixelWindow, RasterError};
use test_utils::{assert_approx_eq, create_grid_with_nans, create_test_grid, Grib2Builder};

#[test]
fn test_lists_variables_with_units() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("surface.grib2");
    let mut file = Grib2Builder::new_temperature().build();
    file.extend(Grib2Builder::new_wind_u().build());
    file.extend(Grib2Builder::new_wind_v().build());
    std::fs::write(&path, file).unwrap();

    let plugin = GribPlugin::new();
    let bands = plugin.list_variables(&path).unwrap();

    let names: Vec<&str> = bands.iter().map(|b| b.name.as_str()).collect();
    assert_eq!(names, vec!["10u", "10v", "2t"]);
    assert_eq!(bands[0].units.as_deref(), Some("m s**-1"));
    assert_eq!(bands[2].units.as_deref(), Some("K"));
    assert_eq!(bands[2].shape, vec![10, 10]);
}

#[test]
fn test_timestamps_from_forecast_offsets() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("forecast.grib2");
    let mut file = Grib2Builder::new_temperature().build();
    file.extend(Grib2Builder::new_temperature().with_forecast_hour(6).build());
    std::fs::write(&path, file).unwrap();

    let plugin = GribPlugin::new();
    let times = plugin.timestamps(&path, "2t").unwrap();
    assert_eq!(
        times,
        vec![
            Utc.with_ymd_and_hms(2024, 1, 15, 0, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2024, 1, 15, 6, 0, 0).unwrap(),
        ]
    );

    assert!(matches!(
        plugin.timestamps(&path, "unknown"),
        Err(RasterError::NotFound(_))
    ));
}

#[test]
fn test_timestamp_selects_matching_message() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("forecast.grib2");
    let mut file = Grib2Builder::new_temperature()
        .with_constant_value(280.0)
        .build();
    file.extend(
        Grib2Builder::new_temperature()
            .with_forecast_hour(6)
            .with_constant_value(290.0)
            .build(),
    );
    std::fs::write(&path, file).unwrap();

    let plugin = GribPlugin::new();
    let at_six = Utc.with_ymd_and_hms(2024, 1, 15, 6, 0, 0).unwrap();
    let band = plugin
        .extract_variable(&path, "2t", Some(at_six), None, &SourceSelector::default())
        .unwrap();
    assert_eq!(band.value_at(0, 0), 290.0);
    assert_eq!(band.meta.timestamp, Some(at_six));
}

#[test]
fn test_extracts_north_up_with_bounds() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("grid.grib2");
    let data = create_test_grid(10, 10);
    std::fs::write(
        &path,
        Grib2Builder::new_temperature().with_data(data.clone()).build(),
    )
    .unwrap();

    let plugin = GribPlugin::new();
    let band = plugin
        .extract_variable(&path, "2t", None, None, &SourceSelector::default())
        .unwrap();

    assert_eq!(band.width, 10);
    assert_eq!(band.height, 10);
    assert_eq!(band.bounds.to_array(), [5.0, 45.0, 15.0, 55.0]);
    assert_eq!(band.meta.crs, "EPSG:4326");
    assert!(!band.meta.flip_y);

    // Simple packing quantizes to 16 bits over the value range.
    assert_approx_eq!(band.value_at(0, 1), 1000.0, 0.25);
    assert_approx_eq!(band.value_at(1, 0), 1.0, 0.25);
    assert_approx_eq!(band.value_at(9, 9), 9009.0, 0.25);
}

#[test]
fn test_south_to_north_file_is_flipped() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ascending.grib2");
    std::fs::write(
        &path,
        Grib2Builder::new_temperature()
            .with_extent(45.5, 5.5, 54.5, 14.5)
            .with_data(create_test_grid(10, 10))
            .build(),
    )
    .unwrap();

    let plugin = GribPlugin::new();
    let band = plugin
        .extract_variable(&path, "2t", None, None, &SourceSelector::default())
        .unwrap();

    assert!(band.meta.flip_y);
    assert_eq!(band.bounds.to_array(), [5.0, 45.0, 15.0, 55.0]);
    // Row 0 of the output is the northernmost, which the file stores last.
    assert_approx_eq!(band.value_at(0, 0), 9.0, 0.25);
    assert_approx_eq!(band.value_at(9, 0), 0.0, 0.25);
}

#[test]
fn test_window_read() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("grid.grib2");
    std::fs::write(
        &path,
        Grib2Builder::new_temperature()
            .with_data(create_test_grid(10, 10))
            .build(),
    )
    .unwrap();

    let plugin = GribPlugin::new();
    let band = plugin
        .extract_variable(
            &path,
            "2t",
            None,
            Some(PixelWindow::new(2, 1, 4, 3)),
            &SourceSelector::default(),
        )
        .unwrap();

    assert_eq!(band.width, 4);
    assert_eq!(band.height, 3);
    assert_eq!(band.bounds.to_array(), [7.0, 51.0, 11.0, 54.0]);
    // Window origin sits at full-raster (row 1, col 2).
    assert_approx_eq!(band.value_at(0, 0), 2001.0, 0.25);
    assert_approx_eq!(band.value_at(2, 3), 5003.0, 0.25);
}

#[test]
fn test_bitmap_missing_points_become_nan() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("gaps.grib2");
    std::fs::write(
        &path,
        Grib2Builder::new_temperature()
            .with_grid(4, 4)
            .with_data(create_grid_with_nans(4, 4, &[(1, 2)]))
            .build(),
    )
    .unwrap();

    let plugin = GribPlugin::new();
    let band = plugin
        .extract_variable(&path, "2t", None, None, &SourceSelector::default())
        .unwrap();

    assert!(band.value_at(2, 1).is_nan());
    assert_eq!(band.value_at(0, 0), 0.0);
    assert_eq!(band.data.iter().filter(|v| v.is_nan()).count(), 1);
}

#[test]
fn test_metadata_reads_headers_only() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("grid.grib2");
    std::fs::write(&path, Grib2Builder::new_temperature().build()).unwrap();

    let plugin = GribPlugin::new();
    let meta = plugin
        .metadata(&path, "2t", None, &SourceSelector::default())
        .unwrap();

    assert_eq!(meta.width, 10);
    assert_eq!(meta.height, 10);
    assert_approx_eq!(meta.res_x, 1.0, 1e-9);
    assert_approx_eq!(meta.res_y, 1.0, 1e-9);
    assert_eq!(meta.units.as_deref(), Some("K"));
    assert_eq!(
        meta.timestamp,
        Some(Utc.with_ymd_and_hms(2024, 1, 15, 0, 0, 0).unwrap())
    );
}

#[test]
fn test_sniffed_by_magic_without_extension() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("download.bin");
    std::fs::write(&path, Grib2Builder::new_temperature().build()).unwrap();

    let registry = FormatRegistry::with_builtin_plugins();
    let plugin = registry.for_file(&path).unwrap();
    assert_eq!(plugin.format(), FileFormat::Grib);
}
