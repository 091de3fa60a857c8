//! Raster and metadata access used by the recalibrator.
//!
//! The recalibrator never touches a file format. It reads samples and
//! header attributes through [`SourceProduct`] and writes through
//! [`TargetProduct`]. [`MemoryProduct`] is an `ndarray`-backed
//! implementation of both.

use crate::types::{FlagTile, RecalError, RecalResult, ReflectanceTile};
use ndarray::{s, Array2};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Main product header element
pub const MPH: &str = "MPH";
/// Sensing start attribute of the MPH, e.g. `07-JUN-2008 04:33:26.123456`
pub const SENSING_START: &str = "SENSING_START";
/// Recalibration status attribute of the MPH
pub const RECALIBRATED: &str = "RECALIBRATED";
/// Companion visible calibration (VC1) file descriptor
pub const VC1_DSD: &str = "DSD/DSD.31";
/// Companion general calibration (GC1) file descriptor
pub const GC1_DSD: &str = "DSD/DSD.32";
pub const FILE_NAME: &str = "FILE_NAME";

pub const RECALIBRATED_YES: &str = "YES";
pub const RECALIBRATED_FAILED: &str = "FAILED";

/// Flag bands reproduced in every output product
pub const FLAG_BAND_NAMES: [&str; 4] = [
    "confid_flags_nadir",
    "confid_flags_fward",
    "cloud_flags_nadir",
    "cloud_flags_fward",
];

/// Sample interpretation of a band
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BandKind {
    Reflectance,
    BrightnessTemperature,
    Flag,
}

/// Rectangular region of a raster, in pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileRect {
    pub x: usize,
    pub y: usize,
    pub width: usize,
    pub height: usize,
}

impl TileRect {
    pub fn new(x: usize, y: usize, width: usize, height: usize) -> Self {
        Self { x, y, width, height }
    }
}

/// Iterator over non-overlapping tiles covering a raster, row by row
pub struct TileIterator {
    total_rows: usize,
    total_cols: usize,
    tile_size: usize,
    current_row: usize,
    current_col: usize,
}

impl TileIterator {
    pub fn new(total_rows: usize, total_cols: usize, tile_size: usize) -> Self {
        Self {
            total_rows,
            total_cols,
            tile_size: tile_size.max(1),
            current_row: 0,
            current_col: 0,
        }
    }
}

impl Iterator for TileIterator {
    type Item = TileRect;

    fn next(&mut self) -> Option<Self::Item> {
        if self.current_row >= self.total_rows || self.total_cols == 0 {
            return None;
        }

        let height = self.tile_size.min(self.total_rows - self.current_row);
        let width = self.tile_size.min(self.total_cols - self.current_col);
        let tile = TileRect::new(self.current_col, self.current_row, width, height);

        self.current_col += self.tile_size;
        if self.current_col >= self.total_cols {
            self.current_col = 0;
            self.current_row += self.tile_size;
        }

        Some(tile)
    }
}

/// Node of a product metadata tree
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetadataElement {
    pub name: String,
    pub attributes: BTreeMap<String, String>,
    pub elements: Vec<MetadataElement>,
}

impl MetadataElement {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }

    pub fn with_attribute(mut self, name: &str, value: &str) -> Self {
        self.attributes.insert(name.to_string(), value.to_string());
        self
    }

    pub fn with_element(mut self, element: MetadataElement) -> Self {
        self.elements.push(element);
        self
    }

    pub fn element(&self, name: &str) -> Option<&MetadataElement> {
        self.elements.iter().find(|e| e.name == name)
    }

    /// Descend a `/`-separated element path, e.g. `DSD/DSD.31`
    pub fn find(&self, path: &str) -> Option<&MetadataElement> {
        path.split('/')
            .filter(|part| !part.is_empty())
            .try_fold(self, |element, part| element.element(part))
    }

    /// Like [`find`](Self::find), creating missing elements on the way
    pub fn find_or_create(&mut self, path: &str) -> &mut MetadataElement {
        let mut element = self;
        for part in path.split('/').filter(|part| !part.is_empty()) {
            let index = match element.elements.iter().position(|e| e.name == part) {
                Some(index) => index,
                None => {
                    element.elements.push(MetadataElement::new(part));
                    element.elements.len() - 1
                }
            };
            element = &mut element.elements[index];
        }
        element
    }

    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }
}

/// Read access to an input product
pub trait SourceProduct: Sync {
    fn name(&self) -> &str;

    /// Scene size as (rows, columns)
    fn dimensions(&self) -> (usize, usize);

    fn band_names(&self) -> Vec<String>;

    fn band_kind(&self, band: &str) -> Option<BandKind>;

    fn read_samples(&self, band: &str, rect: TileRect) -> RecalResult<ReflectanceTile>;

    fn read_flag_samples(&self, band: &str, rect: TileRect) -> RecalResult<FlagTile>;

    /// Attribute of the metadata element at `path`, if both exist
    fn metadata_attribute(&self, path: &str, attribute: &str) -> Option<String>;
}

/// Write access to an output product
pub trait TargetProduct {
    fn write_samples(
        &mut self,
        band: &str,
        rect: TileRect,
        samples: &ReflectanceTile,
    ) -> RecalResult<()>;

    fn write_flag_samples(
        &mut self,
        band: &str,
        rect: TileRect,
        samples: &FlagTile,
    ) -> RecalResult<()>;

    fn set_metadata_attribute(&mut self, path: &str, attribute: &str, value: &str);
}

#[derive(Debug, Clone, PartialEq)]
enum BandData {
    Samples(Array2<f64>),
    Flags(Array2<i32>),
}

#[derive(Debug, Clone, PartialEq)]
struct MemoryBand {
    name: String,
    kind: BandKind,
    data: BandData,
}

/// In-memory product holding every band as a full-scene array
#[derive(Debug, Clone, PartialEq)]
pub struct MemoryProduct {
    name: String,
    rows: usize,
    cols: usize,
    bands: Vec<MemoryBand>,
    metadata: MetadataElement,
}

impl MemoryProduct {
    pub fn new(name: &str, rows: usize, cols: usize) -> Self {
        Self {
            name: name.to_string(),
            rows,
            cols,
            bands: Vec::new(),
            metadata: MetadataElement::new("metadata"),
        }
    }

    /// Empty output with the geometry, band layout and metadata of `source`
    pub fn derive_target<S: SourceProduct + ?Sized>(source: &S) -> RecalResult<Self> {
        let (rows, cols) = source.dimensions();
        let mut target = Self::new(source.name(), rows, cols);
        for band in source.band_names() {
            let kind = source
                .band_kind(&band)
                .ok_or_else(|| RecalError::Metadata(format!("band '{}' has no kind", band)))?;
            target.bands.push(MemoryBand {
                data: match kind {
                    BandKind::Flag => BandData::Flags(Array2::zeros((rows, cols))),
                    _ => BandData::Samples(Array2::zeros((rows, cols))),
                },
                name: band,
                kind,
            });
        }
        for path in [MPH, VC1_DSD, GC1_DSD] {
            if let Some(element) = source_element(source, path) {
                *target.metadata.find_or_create(path) = element;
            }
        }
        Ok(target)
    }

    pub fn add_band(
        &mut self,
        name: &str,
        kind: BandKind,
        samples: Array2<f64>,
    ) -> RecalResult<()> {
        self.check_shape(name, samples.dim())?;
        self.bands.push(MemoryBand {
            name: name.to_string(),
            kind,
            data: BandData::Samples(samples),
        });
        Ok(())
    }

    pub fn add_flag_band(&mut self, name: &str, flags: Array2<i32>) -> RecalResult<()> {
        self.check_shape(name, flags.dim())?;
        self.bands.push(MemoryBand {
            name: name.to_string(),
            kind: BandKind::Flag,
            data: BandData::Flags(flags),
        });
        Ok(())
    }

    pub fn metadata(&self) -> &MetadataElement {
        &self.metadata
    }

    pub fn metadata_mut(&mut self) -> &mut MetadataElement {
        &mut self.metadata
    }

    pub fn samples(&self, band: &str) -> Option<&Array2<f64>> {
        match self.band(band).map(|b| &b.data) {
            Some(BandData::Samples(samples)) => Some(samples),
            _ => None,
        }
    }

    pub fn flags(&self, band: &str) -> Option<&Array2<i32>> {
        match self.band(band).map(|b| &b.data) {
            Some(BandData::Flags(flags)) => Some(flags),
            _ => None,
        }
    }

    fn band(&self, name: &str) -> Option<&MemoryBand> {
        self.bands.iter().find(|b| b.name == name)
    }

    fn band_mut(&mut self, name: &str) -> RecalResult<&mut MemoryBand> {
        self.bands
            .iter_mut()
            .find(|b| b.name == name)
            .ok_or_else(|| RecalError::Metadata(format!("no band named '{}'", name)))
    }

    fn check_shape(&self, name: &str, dim: (usize, usize)) -> RecalResult<()> {
        if dim != (self.rows, self.cols) {
            return Err(RecalError::Metadata(format!(
                "band '{}' is {}x{}, product is {}x{}",
                name, dim.0, dim.1, self.rows, self.cols
            )));
        }
        Ok(())
    }

    fn check_rect(&self, rect: TileRect) -> RecalResult<()> {
        if rect.y + rect.height > self.rows || rect.x + rect.width > self.cols {
            return Err(RecalError::Processing(format!(
                "tile {:?} outside {}x{} scene",
                rect, self.rows, self.cols
            )));
        }
        Ok(())
    }
}

fn source_element<S: SourceProduct + ?Sized>(source: &S, path: &str) -> Option<MetadataElement> {
    // The trait only exposes single attributes, so copy the ones the
    // recalibrator depends on.
    let names: &[&str] = match path {
        MPH => &[SENSING_START, RECALIBRATED],
        _ => &[FILE_NAME],
    };
    let leaf = path.rsplit('/').next().unwrap_or(path);
    let mut element = MetadataElement::new(leaf);
    for name in names {
        if let Some(value) = source.metadata_attribute(path, name) {
            element.attributes.insert(name.to_string(), value);
        }
    }
    (!element.attributes.is_empty()).then_some(element)
}

impl SourceProduct for MemoryProduct {
    fn name(&self) -> &str {
        &self.name
    }

    fn dimensions(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    fn band_names(&self) -> Vec<String> {
        self.bands.iter().map(|b| b.name.clone()).collect()
    }

    fn band_kind(&self, band: &str) -> Option<BandKind> {
        self.band(band).map(|b| b.kind)
    }

    fn read_samples(&self, band: &str, rect: TileRect) -> RecalResult<ReflectanceTile> {
        self.check_rect(rect)?;
        let window = s![rect.y..rect.y + rect.height, rect.x..rect.x + rect.width];
        match self.band(band).map(|b| &b.data) {
            Some(BandData::Samples(samples)) => Ok(samples.slice(window).to_owned()),
            Some(BandData::Flags(flags)) => Ok(flags.slice(window).mapv(f64::from)),
            None => Err(RecalError::Metadata(format!("no band named '{}'", band))),
        }
    }

    fn read_flag_samples(&self, band: &str, rect: TileRect) -> RecalResult<FlagTile> {
        self.check_rect(rect)?;
        match self.band(band).map(|b| &b.data) {
            Some(BandData::Flags(flags)) => Ok(flags
                .slice(s![rect.y..rect.y + rect.height, rect.x..rect.x + rect.width])
                .to_owned()),
            Some(BandData::Samples(_)) => Err(RecalError::Metadata(format!(
                "band '{}' is not a flag band",
                band
            ))),
            None => Err(RecalError::Metadata(format!("no band named '{}'", band))),
        }
    }

    fn metadata_attribute(&self, path: &str, attribute: &str) -> Option<String> {
        self.metadata
            .find(path)
            .and_then(|element| element.attribute(attribute))
            .map(str::to_string)
    }
}

impl TargetProduct for MemoryProduct {
    fn write_samples(
        &mut self,
        band: &str,
        rect: TileRect,
        samples: &ReflectanceTile,
    ) -> RecalResult<()> {
        self.check_rect(rect)?;
        if samples.dim() != (rect.height, rect.width) {
            return Err(RecalError::Processing(format!(
                "tile data {:?} does not match {:?}",
                samples.dim(),
                rect
            )));
        }
        match &mut self.band_mut(band)?.data {
            BandData::Samples(data) => {
                data.slice_mut(s![rect.y..rect.y + rect.height, rect.x..rect.x + rect.width])
                    .assign(samples);
                Ok(())
            }
            BandData::Flags(_) => Err(RecalError::Metadata(format!(
                "band '{}' is a flag band",
                band
            ))),
        }
    }

    fn write_flag_samples(
        &mut self,
        band: &str,
        rect: TileRect,
        samples: &FlagTile,
    ) -> RecalResult<()> {
        self.check_rect(rect)?;
        if samples.dim() != (rect.height, rect.width) {
            return Err(RecalError::Processing(format!(
                "tile data {:?} does not match {:?}",
                samples.dim(),
                rect
            )));
        }
        match &mut self.band_mut(band)?.data {
            BandData::Flags(data) => {
                data.slice_mut(s![rect.y..rect.y + rect.height, rect.x..rect.x + rect.width])
                    .assign(samples);
                Ok(())
            }
            BandData::Samples(_) => Err(RecalError::Metadata(format!(
                "band '{}' is not a flag band",
                band
            ))),
        }
    }

    fn set_metadata_attribute(&mut self, path: &str, attribute: &str, value: &str) {
        self.metadata
            .find_or_create(path)
            .attributes
            .insert(attribute.to_string(), value.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tiles_cover_scene_once() {
        let tiles: Vec<TileRect> = TileIterator::new(5, 7, 3).collect();
        assert_eq!(tiles.len(), 6);
        let covered: usize = tiles.iter().map(|t| t.width * t.height).sum();
        assert_eq!(covered, 35);
        assert_eq!(tiles.last(), Some(&TileRect::new(6, 3, 1, 2)));
    }

    #[test]
    fn test_empty_scene_has_no_tiles() {
        assert_eq!(TileIterator::new(0, 10, 4).count(), 0);
        assert_eq!(TileIterator::new(10, 0, 4).count(), 0);
    }

    #[test]
    fn test_metadata_paths() {
        let mph =
            MetadataElement::new(MPH).with_attribute(SENSING_START, "07-JUN-2008 04:33:26.000000");
        let mut root = MetadataElement::new("metadata").with_element(mph);
        assert_eq!(
            root.find(MPH).and_then(|e| e.attribute(SENSING_START)),
            Some("07-JUN-2008 04:33:26.000000")
        );
        assert!(root.find(VC1_DSD).is_none());

        root.find_or_create(VC1_DSD).attributes.insert(FILE_NAME.to_string(), "x".to_string());
        assert_eq!(root.find("DSD/DSD.31").and_then(|e| e.attribute(FILE_NAME)), Some("x"));
        assert_eq!(root.elements.len(), 2);
    }

    #[test]
    fn test_memory_product_tile_io() {
        let mut product = MemoryProduct::new("p", 4, 4);
        let data = Array2::from_shape_fn((4, 4), |(r, c)| (r * 4 + c) as f64);
        product.add_band("reflec_nadir_0550", BandKind::Reflectance, data).unwrap();
        product.add_flag_band("cloud_flags_nadir", Array2::from_elem((4, 4), 7)).unwrap();

        let rect = TileRect::new(1, 2, 2, 2);
        let tile = product.read_samples("reflec_nadir_0550", rect).unwrap();
        assert_eq!(tile[[0, 0]], 9.0);

        product.write_samples("reflec_nadir_0550", rect, &Array2::zeros((2, 2))).unwrap();
        assert_eq!(product.samples("reflec_nadir_0550").unwrap()[[3, 2]], 0.0);
        assert_eq!(product.read_flag_samples("cloud_flags_nadir", rect).unwrap()[[1, 1]], 7);

        assert!(product.read_samples("reflec_nadir_0550", TileRect::new(3, 3, 2, 2)).is_err());
        assert!(product.add_band("bad", BandKind::Reflectance, Array2::zeros((2, 2))).is_err());
    }

    #[test]
    fn test_derive_target_copies_layout_and_header() {
        let mut source = MemoryProduct::new("src", 2, 3);
        source
            .add_band(
                "btemp_nadir_1100",
                BandKind::BrightnessTemperature,
                Array2::from_elem((2, 3), 280.0),
            )
            .unwrap();
        source.add_flag_band("confid_flags_nadir", Array2::from_elem((2, 3), 1)).unwrap();
        source.set_metadata_attribute(MPH, SENSING_START, "07-JUN-2008 04:33:26");
        source.set_metadata_attribute(GC1_DSD, FILE_NAME, "gc1");

        let target = MemoryProduct::derive_target(&source).unwrap();
        assert_eq!(target.dimensions(), (2, 3));
        assert_eq!(target.band_names(), source.band_names());
        assert_eq!(target.band_kind("confid_flags_nadir"), Some(BandKind::Flag));
        assert_eq!(target.samples("btemp_nadir_1100").unwrap()[[0, 0]], 0.0);
        assert_eq!(target.metadata_attribute(GC1_DSD, FILE_NAME).as_deref(), Some("gc1"));
        assert_eq!(
            target.metadata_attribute(MPH, SENSING_START).as_deref(),
            Some("07-JUN-2008 04:33:26")
        );
    }

    #[test]
    fn test_memory_product_metadata_tree() {
        let mut product = MemoryProduct::new("p", 1, 1);
        product
            .metadata_mut()
            .find_or_create(GC1_DSD)
            .attributes
            .insert(FILE_NAME.to_string(), "gc1".to_string());

        assert_eq!(product.metadata().name, "metadata");
        assert_eq!(product.metadata().elements.len(), 1);
        assert_eq!(product.metadata_attribute(GC1_DSD, FILE_NAME).as_deref(), Some("gc1"));
        assert_eq!(product.metadata_attribute(VC1_DSD, FILE_NAME), None);
    }
}
