//! Item, Asset and Collection records.
//!
//! An Item is one acquisition instant for a collection, keyed by
//! (collection, time, reference_time). Assets are the stored artifacts of
//! one Item+Variable in a given format. Both are upserted by natural key so
//! reprocessing a source file updates rows instead of duplicating them.

use chrono::{DateTime, Utc};
use sqlx::{postgres::PgPoolOptions, FromRow, PgPool};
use uuid::Uuid;

use raster_common::{Bounds, RasterError, RasterResult};

/// One acquisition instant for a collection.
#[derive(Debug, Clone)]
pub struct ItemRecord {
    pub collection_slug: String,
    pub time: DateTime<Utc>,
    pub reference_time: Option<DateTime<Utc>>,
    pub bounds: Bounds,
    pub width: u32,
    pub height: u32,
    pub resolution: Option<f64>,
    pub crs: String,
}

/// One stored artifact of an Item+Variable in a given format.
#[derive(Debug, Clone)]
pub struct AssetRecord {
    pub item_id: Uuid,
    pub variable_slug: String,
    pub format: String,
    pub href: String,
    pub media_type: String,
    pub role: String,
    pub width: u32,
    pub height: u32,
    pub band_count: u32,
    pub stat_min: Option<f64>,
    pub stat_max: Option<f64>,
    pub stat_mean: Option<f64>,
    pub stat_std: Option<f64>,
    pub extra: serde_json::Value,
}

/// Aggregated spatial/temporal coverage of a collection.
#[derive(Debug, Clone)]
pub struct CollectionExtent {
    pub bounds: Option<Bounds>,
    pub time_start: Option<DateTime<Utc>>,
    pub time_end: Option<DateTime<Utc>>,
    pub item_count: i64,
}

/// IANA media type for an asset format.
pub fn media_type_for(format: &str) -> &'static str {
    match format {
        "png" => "image/png",
        "cog" => "image/tiff; application=geotiff; profile=cloud-optimized",
        "json" => "application/json",
        _ => "application/octet-stream",
    }
}

/// Asset role for an asset format.
pub fn role_for(format: &str) -> &'static str {
    match format {
        "png" => "visual",
        "cog" => "data",
        "json" => "metadata",
        _ => "data",
    }
}

/// Item/Asset/Collection store backed by PostgreSQL.
pub struct MetadataStore {
    pool: PgPool,
}

impl MetadataStore {
    /// Connect with a fresh pool.
    pub async fn connect(database_url: &str) -> RasterResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await
            .map_err(|e| RasterError::DatabaseError(format!("Connection failed: {}", e)))?;

        Ok(Self { pool })
    }

    /// Reuse an existing pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create the record tables if missing.
    pub async fn migrate(&self) -> RasterResult<()> {
        for statement in SCHEMA_SQL.split(';') {
            let trimmed = statement.trim();
            if !trimmed.is_empty() {
                sqlx::query(trimmed)
                    .execute(&self.pool)
                    .await
                    .map_err(|e| RasterError::DatabaseError(format!("Migration failed: {}", e)))?;
            }
        }

        Ok(())
    }

    /// Insert or update the item for its (collection, time, reference_time)
    /// key and return its id.
    pub async fn upsert_item(&self, item: &ItemRecord) -> RasterResult<Uuid> {
        let id = sqlx::query_scalar::<_, Uuid>(
            r#"
            INSERT INTO items (
                id, collection_slug, time, reference_time,
                bounds_west, bounds_south, bounds_east, bounds_north,
                width, height, resolution, crs
            ) VALUES (
                $1, $2, $3, $4,
                $5, $6, $7, $8,
                $9, $10, $11, $12
            )
            ON CONFLICT (collection_slug, time, reference_time) DO UPDATE SET
                bounds_west = EXCLUDED.bounds_west,
                bounds_south = EXCLUDED.bounds_south,
                bounds_east = EXCLUDED.bounds_east,
                bounds_north = EXCLUDED.bounds_north,
                width = EXCLUDED.width,
                height = EXCLUDED.height,
                resolution = EXCLUDED.resolution,
                crs = EXCLUDED.crs,
                updated_at = NOW()
            RETURNING id
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&item.collection_slug)
        .bind(item.time)
        .bind(item.reference_time)
        .bind(item.bounds.west)
        .bind(item.bounds.south)
        .bind(item.bounds.east)
        .bind(item.bounds.north)
        .bind(item.width as i32)
        .bind(item.height as i32)
        .bind(item.resolution)
        .bind(&item.crs)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| RasterError::DatabaseError(format!("Insert failed: {}", e)))?;

        Ok(id)
    }

    /// Insert or update the asset for its (item, variable, format) key and
    /// return its id.
    pub async fn upsert_asset(&self, asset: &AssetRecord) -> RasterResult<Uuid> {
        let id = sqlx::query_scalar::<_, Uuid>(
            r#"
            INSERT INTO assets (
                id, item_id, variable_slug, format,
                href, media_type, role,
                width, height, band_count,
                stat_min, stat_max, stat_mean, stat_std, extra
            ) VALUES (
                $1, $2, $3, $4,
                $5, $6, $7,
                $8, $9, $10,
                $11, $12, $13, $14, $15
            )
            ON CONFLICT (item_id, variable_slug, format) DO UPDATE SET
                href = EXCLUDED.href,
                media_type = EXCLUDED.media_type,
                role = EXCLUDED.role,
                width = EXCLUDED.width,
                height = EXCLUDED.height,
                band_count = EXCLUDED.band_count,
                stat_min = EXCLUDED.stat_min,
                stat_max = EXCLUDED.stat_max,
                stat_mean = EXCLUDED.stat_mean,
                stat_std = EXCLUDED.stat_std,
                extra = EXCLUDED.extra,
                updated_at = NOW()
            RETURNING id
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(asset.item_id)
        .bind(&asset.variable_slug)
        .bind(&asset.format)
        .bind(&asset.href)
        .bind(&asset.media_type)
        .bind(&asset.role)
        .bind(asset.width as i32)
        .bind(asset.height as i32)
        .bind(asset.band_count as i32)
        .bind(asset.stat_min)
        .bind(asset.stat_max)
        .bind(asset.stat_mean)
        .bind(asset.stat_std)
        .bind(&asset.extra)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| RasterError::DatabaseError(format!("Insert failed: {}", e)))?;

        Ok(id)
    }

    /// Recompute the collection's extent from its items and store it.
    /// Returns the new extent.
    pub async fn update_collection_extent(&self, slug: &str) -> RasterResult<CollectionExtent> {
        let row = sqlx::query_as::<_, ExtentRow>(
            r#"
            INSERT INTO collections (
                slug, bounds_west, bounds_south, bounds_east, bounds_north,
                time_start, time_end, item_count, updated_at
            )
            SELECT $1, MIN(bounds_west), MIN(bounds_south), MAX(bounds_east), MAX(bounds_north),
                   MIN(time), MAX(time), COUNT(*), NOW()
            FROM items WHERE collection_slug = $1
            ON CONFLICT (slug) DO UPDATE SET
                bounds_west = EXCLUDED.bounds_west,
                bounds_south = EXCLUDED.bounds_south,
                bounds_east = EXCLUDED.bounds_east,
                bounds_north = EXCLUDED.bounds_north,
                time_start = EXCLUDED.time_start,
                time_end = EXCLUDED.time_end,
                item_count = EXCLUDED.item_count,
                updated_at = NOW()
            RETURNING bounds_west, bounds_south, bounds_east, bounds_north,
                      time_start, time_end, item_count
            "#,
        )
        .bind(slug)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| RasterError::DatabaseError(format!("Extent update failed: {}", e)))?;

        Ok(CollectionExtent::from(row))
    }
}

/// Internal row type for extent queries.
#[derive(FromRow)]
struct ExtentRow {
    bounds_west: Option<f64>,
    bounds_south: Option<f64>,
    bounds_east: Option<f64>,
    bounds_north: Option<f64>,
    time_start: Option<DateTime<Utc>>,
    time_end: Option<DateTime<Utc>>,
    item_count: i64,
}

impl From<ExtentRow> for CollectionExtent {
    fn from(row: ExtentRow) -> Self {
        let bounds = optional_bounds(
            row.bounds_west,
            row.bounds_south,
            row.bounds_east,
            row.bounds_north,
        );

        CollectionExtent {
            bounds,
            time_start: row.time_start,
            time_end: row.time_end,
            item_count: row.item_count,
        }
    }
}

fn optional_bounds(
    west: Option<f64>,
    south: Option<f64>,
    east: Option<f64>,
    north: Option<f64>,
) -> Option<Bounds> {
    match (west, south, east, north) {
        (Some(w), Some(s), Some(e), Some(n)) => Some(Bounds::new(w, s, e, n)),
        _ => None,
    }
}

/// Database schema SQL.
const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS items (
    id UUID PRIMARY KEY,
    collection_slug VARCHAR(100) NOT NULL,
    time TIMESTAMPTZ NOT NULL,
    reference_time TIMESTAMPTZ,
    bounds_west DOUBLE PRECISION NOT NULL,
    bounds_south DOUBLE PRECISION NOT NULL,
    bounds_east DOUBLE PRECISION NOT NULL,
    bounds_north DOUBLE PRECISION NOT NULL,
    width INTEGER NOT NULL,
    height INTEGER NOT NULL,
    resolution DOUBLE PRECISION,
    crs VARCHAR(50) NOT NULL DEFAULT 'EPSG:4326',
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),

    UNIQUE NULLS NOT DISTINCT (collection_slug, time, reference_time)
);

CREATE INDEX IF NOT EXISTS idx_items_collection_time ON items(collection_slug, time);

CREATE TABLE IF NOT EXISTS assets (
    id UUID PRIMARY KEY,
    item_id UUID NOT NULL REFERENCES items(id) ON DELETE CASCADE,
    variable_slug VARCHAR(100) NOT NULL,
    format VARCHAR(20) NOT NULL,
    href TEXT NOT NULL,
    media_type VARCHAR(100) NOT NULL,
    role VARCHAR(20) NOT NULL,
    width INTEGER NOT NULL,
    height INTEGER NOT NULL,
    band_count INTEGER NOT NULL,
    stat_min DOUBLE PRECISION,
    stat_max DOUBLE PRECISION,
    stat_mean DOUBLE PRECISION,
    stat_std DOUBLE PRECISION,
    extra JSONB NOT NULL DEFAULT '{}',
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),

    UNIQUE(item_id, variable_slug, format)
);

CREATE INDEX IF NOT EXISTS idx_assets_item ON assets(item_id);

CREATE TABLE IF NOT EXISTS collections (
    slug VARCHAR(100) PRIMARY KEY,
    bounds_west DOUBLE PRECISION,
    bounds_south DOUBLE PRECISION,
    bounds_east DOUBLE PRECISION,
    bounds_north DOUBLE PRECISION,
    time_start TIMESTAMPTZ,
    time_end TIMESTAMPTZ,
    item_count BIGINT NOT NULL DEFAULT 0,
    updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
);
"#;
