//! Reduction of catalog entries to centroid rows and their destination schema.
use crate::catalog::{property_f64, property_str, spacecraft_id, Catalog, Collection, ProductId};
use crate::error::CatalogError;
use crate::geometry::{self, Point};
use anyhow::Result;
use serde::{Serialize, Serializer};
use serde_json::{json, Value};
use stac::Item;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;
use tracing::{info, warn};

pub const EXPORT_DESCRIPTION: &str = "export_scenes_to_bigquery";

/// Land cloud cover for scenes with no land (ocean), and for entries that omit it.
pub const NOT_APPLICABLE: f64 = -1.0;

/// One row of the destination table. The geometry is always a single point.
#[derive(Serialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct ExportedRow {
    pub spacecraft_id: String,
    pub date_acquired: String,
    pub wrs_path: u16,
    pub wrs_row: u16,
    pub collection_category: String,
    pub cloud_cover_land: f64,
    pub cloud_cover: f64,
    pub sun_elevation: f64,
    #[serde(rename = "geo", serialize_with = "serialize_wkt")]
    pub geo: Point,
}

fn serialize_wkt<S: Serializer>(point: &Point, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&point.to_wkt())
}

/// `(name, type)` of each destination column, in row order.
pub const SCHEMA: [(&str, &str); 9] = [
    ("SPACECRAFT_ID", "STRING"),
    ("DATE_ACQUIRED", "STRING"),
    ("WRS_PATH", "INTEGER"),
    ("WRS_ROW", "INTEGER"),
    ("COLLECTION_CATEGORY", "STRING"),
    ("CLOUD_COVER_LAND", "FLOAT"),
    ("CLOUD_COVER", "FLOAT"),
    ("SUN_ELEVATION", "FLOAT"),
    ("geo", "GEOGRAPHY"),
];

pub fn schema_fields() -> Value {
    let fields: Vec<Value> = SCHEMA
        .iter()
        .map(|(name, kind)| json!({"name": name, "type": kind, "mode": "NULLABLE"}))
        .collect();
    json!({ "fields": fields })
}

pub fn to_row(item: &Item) -> Result<ExportedRow> {
    let product = ProductId::parse(&item.id)?;
    let geo = item
        .geometry
        .as_ref()
        .and_then(geometry::centroid)
        .ok_or(CatalogError::MissingGeometry(item.id.to_owned()))?;

    let collection_category = property_str(item, "landsat:collection_category")
        .unwrap_or(&product.tier)
        .to_string();

    Ok(ExportedRow {
        spacecraft_id: spacecraft_id(&product.platform)?,
        date_acquired: product.date_acquired,
        wrs_path: product.wrs_path,
        wrs_row: product.wrs_row,
        collection_category,
        cloud_cover_land: property_f64(item, "landsat:cloud_cover_land").unwrap_or(NOT_APPLICABLE),
        cloud_cover: property_f64(item, "eo:cloud_cover").unwrap_or(NOT_APPLICABLE),
        sun_elevation: property_f64(item, "view:sun_elevation").unwrap_or(0.0),
        geo,
    })
}

/// Reduces `item` and hands the row to `sink`. Items that cannot be reduced are
/// logged and skipped. Returns whether a row was produced.
pub fn export_item<F>(item: &Item, sink: &mut F) -> Result<bool>
where
    F: FnMut(&ExportedRow) -> Result<()>,
{
    match to_row(item) {
        Ok(row) => {
            sink(&row)?;
            Ok(true)
        }
        Err(e) => {
            warn!(id = %item.id, "Skipping catalog item: {e}");
            Ok(false)
        }
    }
}

/// Streams a row for every Landsat Collection 2 item of all (platform, tier) pairs
/// into `sink`, page by page. Returns the number of rows.
pub async fn collect_landsat_missions<F>(catalog: &Catalog, mut sink: F) -> Result<usize>
where
    F: FnMut(&ExportedRow) -> Result<()>,
{
    let mut rows = 0;
    for collection in Collection::all() {
        catalog
            .search(&collection, |item| {
                if export_item(item, &mut sink)? {
                    rows += 1;
                }
                Ok(())
            })
            .await?;
    }
    info!(rows, "Collected Landsat scenes");
    Ok(rows)
}

/// One newline-delimited JSON line, without the trailing newline.
pub fn to_ndjson_line(row: &ExportedRow) -> Result<String> {
    Ok(serde_json::to_string(row)?)
}

/// Writes encoded rows to a local newline-delimited JSON file.
pub struct NdjsonWriter {
    writer: BufWriter<File>,
}

impl NdjsonWriter {
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent)?;
        }
        Ok(Self {
            writer: BufWriter::new(File::create(path)?),
        })
    }

    pub fn write_line(self: &mut Self, line: &str) -> Result<()> {
        self.writer.write_all(line.as_bytes())?;
        self.writer.write_all(b"\n")?;
        Ok(())
    }

    pub fn finish(mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }
}
