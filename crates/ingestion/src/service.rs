//! The ingestion orchestrator.
//!
//! [`IngestionService::process_file`] drives one source file end to end:
//! resolve catalog/collection from the path, download to scratch, enumerate
//! timestamps, then per timestamp and per active variable extract, clip,
//! encode and store the visual/data/metadata assets, with the pyramid store
//! appended best-effort. Failures below the file level are collected into
//! the result's error list instead of aborting siblings; only unresolvable
//! targets, unreadable files or empty timestamp lists fail the whole call.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde_json::json;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use extraction::{VariableExtractor, VariableStats};
use formats::{BandMeta, FormatPlugin, FormatRegistry, SourceSelector};
use pyramid::{PyramidStore, PyramidUpdate};
use raster_common::{
    Bounds, Catalog, CatalogConfig, Collection, RasterError, RasterResult, Variable,
};
use renderer::{
    create_png, encode_rgba, encode_vector_rgba, resolve_range, write_cog, ScaleParams,
};
use storage::{
    archive_path, asset_path, media_type_for, parse_incoming, parse_reference_time,
    pyramid_prefix, role_for, AssetRecord, ItemRecord, MetadataStore, ObjectStorage,
};

use crate::clipper::{apply_geometry_mask, apply_rgba_mask, ClipWindow, Clipper};

/// Outcome of processing one source file.
#[derive(Debug, Clone)]
pub struct IngestionResult {
    /// True when every timestamp and variable processed cleanly.
    pub success: bool,
    /// Items upserted.
    pub items: u32,
    /// Assets written and recorded.
    pub assets: u32,
    /// Per-timestamp and per-variable failures, in processing order.
    pub errors: Vec<String>,
    /// Where the source was moved when archiving ran.
    pub archive_path: Option<String>,
}

/// Orchestrates extraction, rendering and persistence for source files.
pub struct IngestionService {
    config: CatalogConfig,
    registry: FormatRegistry,
    storage: Arc<ObjectStorage>,
    records: MetadataStore,
    pyramids: PyramidStore,
    scratch_dir: PathBuf,
}

impl IngestionService {
    pub fn new(
        config: CatalogConfig,
        registry: FormatRegistry,
        storage: Arc<ObjectStorage>,
        records: MetadataStore,
        pyramids: PyramidStore,
        scratch_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            config,
            registry,
            storage,
            records,
            pyramids,
            scratch_dir: scratch_dir.into(),
        }
    }

    /// Process one source file by storage path. Catalog and collection are
    /// inferred from the path convention unless overridden.
    #[instrument(skip(self), fields(path = %path))]
    pub async fn process_file(
        &self,
        path: &str,
        catalog_override: Option<&str>,
        collection_override: Option<&str>,
    ) -> RasterResult<IngestionResult> {
        let parsed = parse_incoming(path)?;

        let catalog_slug = catalog_override.unwrap_or(&parsed.catalog);
        let catalog = self
            .config
            .find_catalog(catalog_slug)
            .ok_or_else(|| RasterError::NotFound(format!("Unknown catalog '{}'", catalog_slug)))?;
        if !catalog.is_active {
            return Err(RasterError::ConfigError(format!(
                "Catalog '{}' is not active",
                catalog.slug
            )));
        }

        let collection_slug = match (collection_override, &parsed.collection) {
            (Some(slug), _) => slug,
            (None, Some(slug)) => slug.as_str(),
            (None, None) => {
                return Err(RasterError::ConfigError(format!(
                    "Cannot determine collection for '{}'",
                    path
                )))
            }
        };
        let collection = catalog.collection(collection_slug).ok_or_else(|| {
            RasterError::NotFound(format!(
                "Unknown collection '{}' in catalog '{}'",
                collection_slug, catalog.slug
            ))
        })?;
        if !collection.is_active {
            return Err(RasterError::ConfigError(format!(
                "Collection '{}' is not active",
                collection.slug
            )));
        }

        let plugin = self.registry.get(catalog.file_format)?;
        let (reference_time, _) = parse_reference_time(&parsed.filename);

        let local = self
            .scratch_dir
            .join(format!("{}-{}", Uuid::new_v4(), parsed.filename));
        self.storage.download_to(path, &local).await?;

        let result = self
            .process_downloaded(
                &local,
                path,
                &parsed.filename,
                catalog,
                collection,
                &plugin,
                reference_time,
            )
            .await;

        if let Err(e) = tokio::fs::remove_file(&local).await {
            debug!(error = %e, "Could not remove scratch file");
        }

        result
    }

    #[allow(clippy::too_many_arguments)]
    async fn process_downloaded(
        &self,
        local: &Path,
        source_path: &str,
        filename: &str,
        catalog: &Catalog,
        collection: &Collection,
        plugin: &Arc<dyn FormatPlugin>,
        reference_time: Option<DateTime<Utc>>,
    ) -> RasterResult<IngestionResult> {
        let active_variables = collection.active_variables();
        if active_variables.is_empty() {
            return Err(RasterError::ConfigError(format!(
                "Collection '{}' has no active variables",
                collection.slug
            )));
        }

        // All variables in a collection share one grid, so timestamps and
        // georeferencing are probed from the first active variable.
        let probe = active_variables[0];
        let probe_source = probe.primary_source().ok_or_else(|| {
            RasterError::ConfigError(format!("Variable '{}' has no sources", probe.slug))
        })?;
        let probe_selector = SourceSelector::from_source(probe_source);

        let timestamps = plugin.timestamps(local, &probe_source.source_name)?;
        let first_timestamp = match timestamps.first() {
            Some(&t) => t,
            None => {
                return Err(RasterError::FormatError(format!(
                    "No timestamps found in '{}'",
                    source_path
                )))
            }
        };
        let meta = plugin.metadata(
            local,
            &probe_source.source_name,
            Some(first_timestamp),
            &probe_selector,
        )?;

        info!(
            catalog = %catalog.slug,
            collection = %collection.slug,
            timestamps = timestamps.len(),
            variables = active_variables.len(),
            width = meta.width,
            height = meta.height,
            "Processing source file"
        );

        // The clip window is computed once per file; a boundary that misses
        // the source entirely degrades to unclipped processing.
        let mut clip_window: Option<ClipWindow> = None;
        let mut clip_mask: Option<Vec<bool>> = None;
        if let Some(clipper) = Clipper::from_catalog(catalog) {
            match clipper.compute_window(&meta.bounds, meta.width, meta.height) {
                Ok(window) => {
                    clip_mask = clipper.mask_for(&window);
                    clip_window = Some(window);
                }
                Err(RasterError::GeometryError(message)) => {
                    warn!(
                        catalog = %catalog.slug,
                        error = %message,
                        "Boundary does not intersect source, processing unclipped"
                    );
                }
                Err(e) => return Err(e),
            }
        }

        let extractor = VariableExtractor::new(plugin.clone());
        let mut items = 0u32;
        let mut assets = 0u32;
        let mut errors: Vec<String> = Vec::new();

        for &timestamp in &timestamps {
            let item_id = match self
                .upsert_item(collection, timestamp, reference_time, &meta, clip_window.as_ref())
                .await
            {
                Ok(id) => id,
                Err(e) => {
                    warn!(time = %timestamp, error = %e, "Item upsert failed");
                    errors.push(format!("{}: {}", timestamp.to_rfc3339(), e));
                    continue;
                }
            };
            items += 1;

            for variable in &active_variables {
                match self
                    .process_variable(
                        local,
                        catalog,
                        collection,
                        variable,
                        timestamp,
                        reference_time,
                        item_id,
                        clip_window.as_ref(),
                        clip_mask.as_deref(),
                        &extractor,
                    )
                    .await
                {
                    Ok((written, failures)) => {
                        assets += written;
                        errors.extend(failures);
                    }
                    Err(e) => {
                        warn!(
                            variable = %variable.slug,
                            time = %timestamp,
                            error = %e,
                            "Variable processing failed"
                        );
                        errors.push(format!(
                            "{} {}: {}",
                            timestamp.to_rfc3339(),
                            variable.slug,
                            e
                        ));
                    }
                }
            }
        }

        match self.records.update_collection_extent(&collection.slug).await {
            Ok(extent) => {
                info!(
                    collection = %collection.slug,
                    item_count = extent.item_count,
                    "Updated collection extent"
                );
            }
            Err(e) => {
                warn!(collection = %collection.slug, error = %e, "Extent update failed");
                errors.push(format!("extent: {}", e));
            }
        }

        let success = errors.is_empty();
        let mut archived = None;
        if success && catalog.archive_source_files {
            let destination =
                archive_path(&catalog.slug, &collection.slug, &first_timestamp, filename);
            match self.storage.rename(source_path, &destination).await {
                Ok(()) => {
                    info!(archive = %destination, "Archived source file");
                    archived = Some(destination);
                }
                Err(e) => {
                    warn!(error = %e, "Could not archive source file");
                }
            }
        }

        info!(
            items,
            assets,
            errors = errors.len(),
            "File processing complete"
        );

        Ok(IngestionResult {
            success,
            items,
            assets,
            errors,
            archive_path: archived,
        })
    }

    async fn upsert_item(
        &self,
        collection: &Collection,
        timestamp: DateTime<Utc>,
        reference_time: Option<DateTime<Utc>>,
        meta: &BandMeta,
        clip_window: Option<&ClipWindow>,
    ) -> RasterResult<Uuid> {
        let (bounds, width, height) = match clip_window {
            Some(w) => (w.bounds, w.width, w.height),
            None => (meta.bounds, meta.width, meta.height),
        };
        let item = ItemRecord {
            collection_slug: collection.slug.clone(),
            time: timestamp,
            reference_time,
            bounds,
            width: width as u32,
            height: height as u32,
            resolution: Some(meta.res_x),
            crs: meta.crs.clone(),
        };
        self.records.upsert_item(&item).await
    }

    /// Extract, clip, encode and store one variable at one timestamp.
    /// Returns (assets written, per-asset failures); a failure writing one
    /// asset does not stop the others.
    #[allow(clippy::too_many_arguments)]
    async fn process_variable(
        &self,
        local: &Path,
        catalog: &Catalog,
        collection: &Collection,
        variable: &Variable,
        timestamp: DateTime<Utc>,
        reference_time: Option<DateTime<Utc>>,
        item_id: Uuid,
        clip_window: Option<&ClipWindow>,
        clip_mask: Option<&[bool]>,
        extractor: &VariableExtractor,
    ) -> RasterResult<(u32, Vec<String>)> {
        let window = clip_window.map(|w| w.pixel_window());

        let stats = extractor.compute_stats(local, variable, Some(timestamp), window);
        let band = extractor.extract(local, variable, Some(timestamp), window)?;
        let (width, height, bounds) = (band.width, band.height, band.bounds);

        let data = match clip_mask {
            Some(mask) => apply_geometry_mask(&band.data, mask)?,
            None => band.data,
        };

        let (vmin, vmax) = resolve_range(
            variable.value_min,
            variable.value_max,
            stats.min,
            stats.max,
            &data,
        );
        let params = ScaleParams::new(vmin, vmax, variable.scale);

        let rgba = if variable.is_vector() {
            let direction = extractor.extract_direction(local, variable, Some(timestamp), window)?;
            let direction = match clip_mask {
                Some(mask) => apply_geometry_mask(&direction.data, mask)?,
                None => direction.data,
            };
            encode_vector_rgba(&data, &direction, &params)?
        } else {
            encode_rgba(&data, &params)
        };
        let rgba = match clip_mask {
            Some(mask) => apply_rgba_mask(&rgba, mask)?,
            None => rgba,
        };

        let mut written = 0u32;
        let mut failures: Vec<String> = Vec::new();
        let tag = |kind: &str, e: &RasterError| {
            format!("{} {} {}: {}", timestamp.to_rfc3339(), variable.slug, kind, e)
        };

        let visual = match create_png(&rgba, width as u32, height as u32) {
            Ok(bytes) => {
                self.store_asset(
                    catalog, collection, variable, timestamp, item_id, "png", "png", bytes,
                    width, height, 4, &stats,
                    json!({ "value_range": [vmin, vmax], "scale": variable.scale.as_str() }),
                )
                .await
            }
            Err(e) => Err(e),
        };
        match visual {
            Ok(_) => written += 1,
            Err(e) => failures.push(tag("png", &e)),
        }

        let cog = match write_cog(&data, width, height, &bounds, &band.meta.crs) {
            Ok(bytes) => {
                self.store_asset(
                    catalog, collection, variable, timestamp, item_id, "cog", "tif", bytes,
                    width, height, 1, &stats,
                    json!({ "compression": "deflate" }),
                )
                .await
            }
            Err(e) => Err(e),
        };
        match cog {
            Ok(_) => written += 1,
            Err(e) => failures.push(tag("cog", &e)),
        }

        let doc = metadata_document(
            catalog, collection, variable, timestamp, reference_time, &bounds, width, height,
            vmin, vmax, &stats,
        );
        let sidecar = match serde_json::to_vec_pretty(&doc) {
            Ok(bytes) => {
                self.store_asset(
                    catalog, collection, variable, timestamp, item_id, "json", "json", bytes,
                    width, height, 0, &stats,
                    json!({}),
                )
                .await
            }
            Err(e) => Err(e.into()),
        };
        match sidecar {
            Ok(_) => written += 1,
            Err(e) => failures.push(tag("json", &e)),
        }

        // The pyramid is an enhancement on top of the asset records; a
        // failed append is logged and does not fail the variable.
        if let Err(e) = self
            .append_pyramid(catalog, collection, variable, timestamp, &data, width, height, &bounds)
            .await
        {
            warn!(
                variable = %variable.slug,
                time = %timestamp,
                error = %e,
                "Pyramid append failed"
            );
        }

        Ok((written, failures))
    }

    #[allow(clippy::too_many_arguments)]
    async fn store_asset(
        &self,
        catalog: &Catalog,
        collection: &Collection,
        variable: &Variable,
        timestamp: DateTime<Utc>,
        item_id: Uuid,
        format: &str,
        extension: &str,
        bytes: Vec<u8>,
        width: usize,
        height: usize,
        band_count: u32,
        stats: &VariableStats,
        extra: serde_json::Value,
    ) -> RasterResult<Uuid> {
        let href = asset_path(
            &catalog.slug,
            &collection.slug,
            &variable.slug,
            &timestamp,
            extension,
        );
        self.storage.put(&href, Bytes::from(bytes)).await?;

        let record = AssetRecord {
            item_id,
            variable_slug: variable.slug.clone(),
            format: format.to_string(),
            href: href.clone(),
            media_type: media_type_for(format).to_string(),
            role: role_for(format).to_string(),
            width: width as u32,
            height: height as u32,
            band_count,
            stat_min: stats.min,
            stat_max: stats.max,
            stat_mean: stats.mean,
            stat_std: stats.std_dev,
            extra,
        };
        self.records.upsert_asset(&record).await
    }

    /// Append one timestep to the variable's pyramid, hydrating the local
    /// store from object storage when another worker created it earlier and
    /// syncing new chunks back afterwards.
    #[allow(clippy::too_many_arguments)]
    async fn append_pyramid(
        &self,
        catalog: &Catalog,
        collection: &Collection,
        variable: &Variable,
        timestamp: DateTime<Utc>,
        data: &[f32],
        width: usize,
        height: usize,
        bounds: &Bounds,
    ) -> RasterResult<()> {
        let store_dir = self
            .pyramids
            .store_path(&catalog.slug, &collection.slug, &variable.slug);
        let prefix = pyramid_prefix(&catalog.slug, &collection.slug, &variable.slug);

        if !store_dir.exists() {
            let hydrated = self.storage.download_prefix(&prefix, &store_dir).await?;
            if hydrated > 0 {
                debug!(files = hydrated, variable = %variable.slug, "Hydrated pyramid store");
            }
        }

        let update = self.pyramids.append_timestep(
            &catalog.slug,
            &collection.slug,
            variable,
            timestamp,
            data,
            width,
            height,
            bounds,
        )?;

        if update != PyramidUpdate::AlreadyPresent {
            self.storage.upload_dir(&store_dir, &prefix).await?;
        }

        Ok(())
    }
}

#[allow(clippy::too_many_arguments)]
fn metadata_document(
    catalog: &Catalog,
    collection: &Collection,
    variable: &Variable,
    timestamp: DateTime<Utc>,
    reference_time: Option<DateTime<Utc>>,
    bounds: &Bounds,
    width: usize,
    height: usize,
    vmin: f64,
    vmax: f64,
    stats: &VariableStats,
) -> serde_json::Value {
    json!({
        "catalog": catalog.slug,
        "collection": collection.slug,
        "variable": variable.slug,
        "title": variable.title,
        "time": timestamp.to_rfc3339(),
        "reference_time": reference_time.map(|t| t.to_rfc3339()),
        "bounds": bounds.to_array(),
        "width": width,
        "height": height,
        "units": variable.units,
        "value_range": [vmin, vmax],
        "scale": variable.scale.as_str(),
        "statistics": {
            "min": stats.min,
            "max": stats.max,
            "mean": stats.mean,
            "std": stats.std_dev,
            "valid_count": stats.valid_count,
            "total_count": stats.total_count,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use raster_common::{ScaleKind, TransformKind};

    fn variable() -> Variable {
        Variable {
            slug: "t2m".into(),
            title: Some("2m temperature".into()),
            transform: TransformKind::Passthrough,
            transform_expression: None,
            unit_conversion: None,
            units: Some("degC".into()),
            value_min: Some(-40.0),
            value_max: Some(40.0),
            scale: ScaleKind::Linear,
            is_active: true,
            sort_order: 0,
            sources: vec![],
        }
    }

    #[test]
    fn test_metadata_document_shape() {
        let catalog = Catalog {
            slug: "weather".into(),
            title: None,
            provider: None,
            license: None,
            file_format: raster_common::FileFormat::Grib,
            clip_mode: raster_common::ClipMode::None,
            boundary: None,
            archive_source_files: true,
            is_active: true,
            collections: vec![],
        };
        let collection = Collection {
            slug: "gfs".into(),
            title: None,
            time_resolution: None,
            is_active: true,
            variables: vec![],
        };
        let stats = VariableStats {
            min: Some(-3.0),
            max: Some(21.5),
            mean: Some(9.1),
            std_dev: Some(4.2),
            valid_count: 100,
            total_count: 120,
            bounds: None,
        };
        let time = Utc.with_ymd_and_hms(2024, 1, 15, 6, 30, 0).unwrap();

        let doc = metadata_document(
            &catalog,
            &collection,
            &variable(),
            time,
            None,
            &Bounds::new(-10.0, 35.0, 5.0, 44.0),
            600,
            360,
            -40.0,
            40.0,
            &stats,
        );

        assert_eq!(doc["catalog"], "weather");
        assert_eq!(doc["variable"], "t2m");
        assert_eq!(doc["time"], "2024-01-15T06:30:00+00:00");
        assert_eq!(doc["reference_time"], serde_json::Value::Null);
        assert_eq!(doc["bounds"][0], -10.0);
        assert_eq!(doc["value_range"][1], 40.0);
        assert_eq!(doc["statistics"]["valid_count"], 100);
        assert_eq!(doc["scale"], "linear");
    }
}
