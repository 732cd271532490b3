//! Deterministic bucket layout: path builders for processed assets, archives
//! and pyramids, plus parsers for the source-path and filename conventions.

use chrono::{DateTime, NaiveDateTime, Utc};

use raster_common::{RasterError, RasterResult};

/// Prefixes scanned for new source files.
pub const WATCHED_PREFIXES: [&str; 2] = ["incoming", "sources"];

/// Build the directory for processed assets of one variable at one instant.
/// Format: `processed/{catalog}/{collection}/{variable}/{YYYY}/{MM}/{DD}`
pub fn asset_dir(
    catalog: &str,
    collection: &str,
    variable: &str,
    time: &DateTime<Utc>,
) -> String {
    format!(
        "processed/{}/{}/{}/{}",
        catalog,
        collection,
        variable,
        time.format("%Y/%m/%d")
    )
}

/// Build the full path of one processed asset.
/// Format: `processed/{catalog}/{collection}/{variable}/{YYYY}/{MM}/{DD}/{variable}_{HHMMSS}.{ext}`
pub fn asset_path(
    catalog: &str,
    collection: &str,
    variable: &str,
    time: &DateTime<Utc>,
    extension: &str,
) -> String {
    format!(
        "{}/{}_{}.{}",
        asset_dir(catalog, collection, variable, time),
        variable,
        time.format("%H%M%S"),
        extension
    )
}

/// Build the archive destination for a processed source file.
/// Format: `archive/{catalog}/{collection}/{YYYY}/{MM}/{filename}`
pub fn archive_path(
    catalog: &str,
    collection: &str,
    time: &DateTime<Utc>,
    filename: &str,
) -> String {
    format!(
        "archive/{}/{}/{}/{}",
        catalog,
        collection,
        time.format("%Y/%m"),
        filename
    )
}

/// Build the object-storage prefix of a variable's pyramid store.
/// Format: `zarr/{catalog}/{collection}/{variable}.zarr`
pub fn pyramid_prefix(catalog: &str, collection: &str, variable: &str) -> String {
    format!("zarr/{}/{}/{}.zarr", catalog, collection, variable)
}

/// A source file location under one of the watched prefixes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedSource {
    /// Watched prefix the file arrived under ("incoming" or "sources").
    pub bucket: String,
    pub catalog: String,
    pub collection: Option<String>,
    pub filename: String,
}

/// Split a source path into its watched prefix, catalog, optional collection
/// and filename.
///
/// After the prefix, three or more segments mean `{catalog}/{collection}/...`
/// with the filename as the last segment; exactly two mean a catalog with no
/// collection. Anything shorter is rejected. A path without a watched prefix
/// is treated as relative to `incoming`.
pub fn parse_incoming(path: &str) -> RasterResult<ParsedSource> {
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();

    let (bucket, rest) = match segments.split_first() {
        Some((first, rest)) if WATCHED_PREFIXES.contains(first) => (first.to_string(), rest),
        _ => ("incoming".to_string(), segments.as_slice()),
    };

    match rest {
        [catalog, collection, .., filename] => Ok(ParsedSource {
            bucket,
            catalog: catalog.to_string(),
            collection: Some(collection.to_string()),
            filename: filename.to_string(),
        }),
        [catalog, filename] => Ok(ParsedSource {
            bucket,
            catalog: catalog.to_string(),
            collection: None,
            filename: filename.to_string(),
        }),
        _ => Err(RasterError::ConfigError(format!(
            "Invalid source path '{}': expected {{catalog}}/[{{collection}}/]{{filename}}",
            path
        ))),
    }
}

/// Extract the embedded reference time from a `GR--YYYYMMDDTHHMM--{name}`
/// filename. Filenames without the prefix, or with an unparseable stamp, are
/// returned unchanged with no reference time.
pub fn parse_reference_time(filename: &str) -> (Option<DateTime<Utc>>, &str) {
    let Some(rest) = filename.strip_prefix("GR--") else {
        return (None, filename);
    };
    let Some((stamp, original)) = rest.split_once("--") else {
        return (None, filename);
    };
    if original.is_empty() {
        return (None, filename);
    }

    match NaiveDateTime::parse_from_str(stamp, "%Y%m%dT%H%M") {
        Ok(naive) => (Some(naive.and_utc()), original),
        Err(_) => (None, filename),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn instant() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 15, 6, 30, 0).unwrap()
    }

    #[test]
    fn test_asset_path_layout() {
        assert_eq!(
            asset_path("weather", "gfs", "t2m", &instant(), "png"),
            "processed/weather/gfs/t2m/2024/01/15/t2m_063000.png"
        );
        assert_eq!(
            asset_path("weather", "gfs", "wind", &instant(), "tif"),
            "processed/weather/gfs/wind/2024/01/15/wind_063000.tif"
        );
    }

    #[test]
    fn test_archive_path_layout() {
        assert_eq!(
            archive_path("weather", "gfs", &instant(), "gfs_025.grib2"),
            "archive/weather/gfs/2024/01/gfs_025.grib2"
        );
    }

    #[test]
    fn test_pyramid_prefix_layout() {
        assert_eq!(
            pyramid_prefix("weather", "gfs", "t2m"),
            "zarr/weather/gfs/t2m.zarr"
        );
    }

    #[test]
    fn test_parse_incoming_with_collection() {
        let parsed = parse_incoming("incoming/weather/gfs/gfs_025.grib2").unwrap();
        assert_eq!(parsed.bucket, "incoming");
        assert_eq!(parsed.catalog, "weather");
        assert_eq!(parsed.collection.as_deref(), Some("gfs"));
        assert_eq!(parsed.filename, "gfs_025.grib2");
    }

    #[test]
    fn test_parse_incoming_without_collection() {
        let parsed = parse_incoming("sources/stations/synop_hourly.nc").unwrap();
        assert_eq!(parsed.bucket, "sources");
        assert_eq!(parsed.catalog, "stations");
        assert_eq!(parsed.collection, None);
        assert_eq!(parsed.filename, "synop_hourly.nc");
    }

    #[test]
    fn test_parse_incoming_nested_directories() {
        let parsed = parse_incoming("incoming/weather/gfs/2024/01/gfs_025.grib2").unwrap();
        assert_eq!(parsed.catalog, "weather");
        assert_eq!(parsed.collection.as_deref(), Some("gfs"));
        assert_eq!(parsed.filename, "gfs_025.grib2");
    }

    #[test]
    fn test_parse_incoming_defaults_to_incoming_bucket() {
        let parsed = parse_incoming("weather/gfs/gfs_025.grib2").unwrap();
        assert_eq!(parsed.bucket, "incoming");
        assert_eq!(parsed.collection.as_deref(), Some("gfs"));
    }

    #[test]
    fn test_parse_incoming_rejects_short_paths() {
        assert!(parse_incoming("incoming/gfs_025.grib2").is_err());
        assert!(parse_incoming("gfs_025.grib2").is_err());
        assert!(parse_incoming("").is_err());
    }

    #[test]
    fn test_reference_time_prefix() {
        let (time, name) = parse_reference_time("GR--20250115T0600--gfs_025.grib2");
        assert_eq!(time, Some(Utc.with_ymd_and_hms(2025, 1, 15, 6, 0, 0).unwrap()));
        assert_eq!(name, "gfs_025.grib2");
    }

    #[test]
    fn test_reference_time_absent() {
        let (time, name) = parse_reference_time("sentinel2_ndvi.tif");
        assert_eq!(time, None);
        assert_eq!(name, "sentinel2_ndvi.tif");
    }

    #[test]
    fn test_reference_time_invalid_stamp_is_ignored() {
        let (time, name) = parse_reference_time("GR--banana--sentinel2.tif");
        assert_eq!(time, None);
        assert_eq!(name, "GR--banana--sentinel2.tif");
    }
}
