//! Cover datasets.
//!
//! [`CoverDataset`] reads album metadata, filters unusable records and either
//! decodes every cover into one contiguous buffer up front or, when that does
//! not fit the preload budget, decodes covers on demand per batch.
//! [`InMemoryDataset`] wraps already-normalized pixels.

use std::path::{Path, PathBuf};

use covergan_core::DatasetConfig;
use mlx_rs::Array;
use tracing::{info, warn};

use crate::error::{DataError, Result};
use crate::record::{load_records, CoverRecord};
use crate::scaler::StandardScaler;
use crate::transform::{adjust_dynamic_range, decode_image, to_row_major};

/// Indexed access to normalized cover images.
pub trait CoverSource {
    /// Number of images.
    fn len(&self) -> usize;

    /// Whether there are no images.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Shape of one image as [channels, height, width].
    fn image_shape(&self) -> [i32; 3];

    /// Append image `index` (CHW, output range) to `out`.
    fn read_into(&self, index: usize, out: &mut Vec<f32>) -> Result<()>;

    /// Standardized release year of image `index`, for conditional datasets.
    fn conditioning(&self, index: usize) -> Option<f32>;

    /// Caption of image `index`.
    fn caption(&self, _index: usize) -> Option<String> {
        None
    }
}

/// Where decoded pixels live.
#[derive(Debug)]
pub enum Storage {
    /// Every image decoded into one NCHW buffer.
    Preloaded(Vec<f32>),
    /// Images decoded from disk on every access.
    Streaming,
}

/// Source edge length for a training size: 64-pixel covers up to 64, the
/// 300-pixel covers above.
pub fn source_size(image_size: u32) -> u32 {
    if image_size <= 64 {
        64
    } else {
        300
    }
}

/// Album cover dataset backed by a metadata file.
#[derive(Debug)]
pub struct CoverDataset {
    records: Vec<CoverRecord>,
    paths: Vec<PathBuf>,
    years: Option<Vec<f32>>,
    scaler: Option<StandardScaler>,
    image_size: u32,
    input_range: (f32, f32),
    output_range: (f32, f32),
    storage: Storage,
}

impl CoverDataset {
    /// Load the metadata at `config.metadata_path` and prepare the images.
    ///
    /// Records without an image path are dropped. When `conditional` is set,
    /// records without a readable release year are dropped too and a
    /// [`StandardScaler`] is fitted on the remaining years.
    pub fn from_metadata(config: &DatasetConfig, conditional: bool) -> Result<Self> {
        let records = load_records(&config.metadata_path)?;
        let dataset = Self::from_records(records, config, conditional)?;
        info!(
            images = dataset.len(),
            image_size = dataset.image_size,
            preloaded = dataset.is_preloaded(),
            "Loaded cover dataset"
        );
        Ok(dataset)
    }

    /// Build from already parsed records.
    pub fn from_records(
        records: Vec<CoverRecord>,
        config: &DatasetConfig,
        conditional: bool,
    ) -> Result<Self> {
        let total = records.len();
        let source = source_size(config.image_size);

        let records: Vec<CoverRecord> = records
            .into_iter()
            .filter(|r| r.file_path_64.is_some() && r.file_path_300.is_some())
            .filter(|r| !conditional || r.release_year().is_some())
            .collect();
        if records.len() < total {
            info!(dropped = total - records.len(), "Dropped incomplete records");
        }
        if records.is_empty() {
            return Err(DataError::Empty(format!(
                "no usable records in {:?}",
                config.metadata_path
            )));
        }

        let paths = records
            .iter()
            .filter_map(|r| r.file_path(source))
            .map(|p| resolve(config.image_root.as_deref(), p))
            .collect();

        let (years, scaler) = if conditional {
            let raw: Vec<f32> = records.iter().filter_map(CoverRecord::release_year).collect();
            let scaler = StandardScaler::fit(&raw);
            let years = raw.iter().map(|&y| scaler.transform(y)).collect();
            (Some(years), Some(scaler))
        } else {
            (None, None)
        };

        let mut dataset = Self {
            records,
            paths,
            years,
            scaler,
            image_size: config.image_size,
            input_range: config.input_range,
            output_range: config.output_range,
            storage: Storage::Streaming,
        };

        match dataset.preload(config.preload_budget_bytes) {
            Ok(buffer) => dataset.storage = Storage::Preloaded(buffer),
            Err(DataError::ResourceExhausted(reason)) => {
                warn!(%reason, "Falling back to streaming images from disk");
            }
            Err(e) => return Err(e),
        }
        Ok(dataset)
    }

    /// Bytes needed to hold every image as f32.
    pub fn estimated_bytes(&self) -> u64 {
        let per_image = 3 * self.image_size as u64 * self.image_size as u64 * 4;
        per_image * self.paths.len() as u64
    }

    fn preload(&self, budget: u64) -> Result<Vec<f32>> {
        let bytes = self.estimated_bytes();
        if bytes > budget {
            return Err(DataError::ResourceExhausted(format!(
                "{} images need {} bytes, budget is {}",
                self.paths.len(),
                bytes,
                budget
            )));
        }

        let mut buffer = Vec::new();
        buffer
            .try_reserve_exact((bytes / 4) as usize)
            .map_err(|e| DataError::ResourceExhausted(e.to_string()))?;
        for index in 0..self.paths.len() {
            self.decode_into(index, &mut buffer)?;
        }
        Ok(buffer)
    }

    fn decode_into(&self, index: usize, out: &mut Vec<f32>) -> Result<()> {
        let mut pixels = decode_image(&self.paths[index], self.image_size)?;
        adjust_dynamic_range(&mut pixels, self.input_range, self.output_range);
        out.extend_from_slice(&pixels);
        Ok(())
    }

    /// Whether images were decoded up front.
    pub fn is_preloaded(&self) -> bool {
        matches!(self.storage, Storage::Preloaded(_))
    }

    /// Release-year scaler, for conditional datasets.
    pub fn scaler(&self) -> Option<&StandardScaler> {
        self.scaler.as_ref()
    }

    /// Filtered records, in dataset order.
    pub fn records(&self) -> &[CoverRecord] {
        &self.records
    }
}

fn resolve(root: Option<&Path>, path: &str) -> PathBuf {
    match root {
        Some(root) if Path::new(path).is_relative() => root.join(path),
        _ => PathBuf::from(path),
    }
}

impl CoverSource for CoverDataset {
    fn len(&self) -> usize {
        self.paths.len()
    }

    fn image_shape(&self) -> [i32; 3] {
        [3, self.image_size as i32, self.image_size as i32]
    }

    fn read_into(&self, index: usize, out: &mut Vec<f32>) -> Result<()> {
        match &self.storage {
            Storage::Preloaded(buffer) => {
                let stride = (3 * self.image_size * self.image_size) as usize;
                let start = index * stride;
                let image = buffer.get(start..start + stride).ok_or_else(|| {
                    DataError::Config(format!("index {} out of range", index))
                })?;
                out.extend_from_slice(image);
                Ok(())
            }
            Storage::Streaming => self.decode_into(index, out),
        }
    }

    fn conditioning(&self, index: usize) -> Option<f32> {
        self.years.as_ref().and_then(|y| y.get(index).copied())
    }

    fn caption(&self, index: usize) -> Option<String> {
        self.records.get(index).map(CoverRecord::caption)
    }
}

/// Images already in the network's range.
#[derive(Debug, Clone)]
pub struct InMemoryDataset {
    data: Vec<f32>,
    shape: [i32; 3],
    conditioning: Option<Vec<f32>>,
}

impl InMemoryDataset {
    /// Wrap `data` holding `data.len() / (C*H*W)` images in NCHW order.
    pub fn new(data: Vec<f32>, shape: [i32; 3], conditioning: Option<Vec<f32>>) -> Result<Self> {
        let stride = shape.iter().product::<i32>() as usize;
        if stride == 0 || data.len() % stride != 0 || data.is_empty() {
            return Err(DataError::Config(format!(
                "{} values do not hold whole images of shape {:?}",
                data.len(),
                shape
            )));
        }
        let n = data.len() / stride;
        if let Some(cond) = &conditioning {
            if cond.len() != n {
                return Err(DataError::Config(format!(
                    "{} conditioning values for {} images",
                    cond.len(),
                    n
                )));
            }
        }
        Ok(Self {
            data,
            shape,
            conditioning,
        })
    }

    /// Copy images [N, C, H, W] and optional conditioning [N] or [N, 1].
    pub fn from_array(images: &Array, conditioning: Option<&Array>) -> Result<Self> {
        if images.ndim() != 4 {
            return Err(DataError::Config(format!(
                "expected [N, C, H, W] images, got {:?}",
                images.shape()
            )));
        }
        let shape = [images.dim(1), images.dim(2), images.dim(3)];
        let data = to_row_major(images)?;
        let conditioning = conditioning.map(to_row_major).transpose()?;
        Self::new(data, shape, conditioning)
    }
}

impl CoverSource for InMemoryDataset {
    fn len(&self) -> usize {
        self.data.len() / self.shape.iter().product::<i32>() as usize
    }

    fn image_shape(&self) -> [i32; 3] {
        self.shape
    }

    fn read_into(&self, index: usize, out: &mut Vec<f32>) -> Result<()> {
        let stride = self.shape.iter().product::<i32>() as usize;
        let start = index * stride;
        let image = self
            .data
            .get(start..start + stride)
            .ok_or_else(|| DataError::Config(format!("index {} out of range", index)))?;
        out.extend_from_slice(image);
        Ok(())
    }

    fn conditioning(&self, index: usize) -> Option<f32> {
        self.conditioning.as_ref().and_then(|c| c.get(index).copied())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_size() {
        assert_eq!(source_size(16), 64);
        assert_eq!(source_size(64), 64);
        assert_eq!(source_size(128), 300);
    }

    #[test]
    fn test_in_memory_validation() {
        assert!(InMemoryDataset::new(vec![0.0; 10], [1, 2, 2], None).is_err());
        assert!(InMemoryDataset::new(vec![0.0; 8], [1, 2, 2], Some(vec![1.0])).is_err());

        let dataset = InMemoryDataset::new(vec![0.0; 8], [1, 2, 2], Some(vec![1.0, 2.0])).unwrap();
        assert_eq!(dataset.len(), 2);
        assert_eq!(dataset.conditioning(1), Some(2.0));
    }

    #[test]
    fn test_in_memory_read() {
        let data: Vec<f32> = (0..12).map(|v| v as f32).collect();
        let dataset = InMemoryDataset::new(data, [3, 1, 2], None).unwrap();
        let mut out = Vec::new();
        dataset.read_into(1, &mut out).unwrap();
        assert_eq!(out, vec![6.0, 7.0, 8.0, 9.0, 10.0, 11.0]);
        assert!(dataset.read_into(2, &mut out).is_err());
    }

    #[test]
    fn test_from_array_reads_transposed_views() {
        // NHWC storage viewed as NCHW: one 2x2 image whose channels are 0, 10, 20 apart.
        let nhwc: Vec<f32> = (0..4)
            .flat_map(|p| [p as f32, 10.0 + p as f32, 20.0 + p as f32])
            .collect();
        let images = Array::from_slice(&nhwc, &[1, 2, 2, 3])
            .transpose_axes(&[0, 3, 1, 2])
            .unwrap();
        let dataset = InMemoryDataset::from_array(&images, None).unwrap();

        let mut out = Vec::new();
        dataset.read_into(0, &mut out).unwrap();
        assert_eq!(
            out,
            vec![0.0, 1.0, 2.0, 3.0, 10.0, 11.0, 12.0, 13.0, 20.0, 21.0, 22.0, 23.0]
        );
    }

    #[test]
    fn test_resolve_relative_paths() {
        let root = Path::new("/data");
        assert_eq!(resolve(Some(root), "a.png"), PathBuf::from("/data/a.png"));
        assert_eq!(resolve(Some(root), "/abs/a.png"), PathBuf::from("/abs/a.png"));
        assert_eq!(resolve(None, "a.png"), PathBuf::from("a.png"));
    }
}
