//! Wrap-around batch loader.

use mlx_rs::Array;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use tracing::{debug, info};

use crate::dataset::CoverSource;
use crate::error::{DataError, Result};

/// One batch of real covers.
#[derive(Debug)]
pub struct CoverBatch {
    /// Images [batch, channels, height, width] in the output range.
    pub images: Array,
    /// Standardized release years [batch, 1], for conditional datasets.
    pub conditioning: Option<Array>,
    /// Dataset indices of the batch members.
    pub indices: Vec<usize>,
}

impl CoverBatch {
    /// Number of images.
    pub fn len(&self) -> usize {
        self.indices.len()
    }

    /// Whether the batch is empty.
    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }
}

/// Endless loader over a [`CoverSource`].
///
/// Batches wrap around the end of the dataset. Whenever a batch would contain
/// position 0 of the permutation, the permutation is reshuffled first, so
/// every pass over the data sees a new order.
pub struct CoverLoader {
    source: Box<dyn CoverSource>,
    batch_size: usize,
    shuffle: bool,
    indices: Vec<usize>,
    position: usize,
    epoch: usize,
    rng: StdRng,
}

impl std::fmt::Debug for CoverLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoverLoader")
            .field("len", &self.indices.len())
            .field("batch_size", &self.batch_size)
            .field("position", &self.position)
            .field("epoch", &self.epoch)
            .finish()
    }
}

impl CoverLoader {
    /// Create a loader drawing `batch_size` images per batch.
    pub fn new(
        source: Box<dyn CoverSource>,
        batch_size: usize,
        shuffle: bool,
        seed: u64,
    ) -> Result<Self> {
        if source.is_empty() {
            return Err(DataError::Empty("loader needs at least one image".to_string()));
        }
        if batch_size == 0 {
            return Err(DataError::Config("batch_size must be positive".to_string()));
        }
        let indices = (0..source.len()).collect();
        Ok(Self {
            source,
            batch_size,
            shuffle,
            indices,
            position: 0,
            epoch: 0,
            rng: StdRng::seed_from_u64(seed),
        })
    }

    /// Number of images in the source.
    pub fn len(&self) -> usize {
        self.indices.len()
    }

    /// Whether the source is empty.
    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    /// Current batch size.
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Change the batch size, e.g. when the resolution grows.
    pub fn set_batch_size(&mut self, batch_size: usize) -> Result<()> {
        if batch_size == 0 {
            return Err(DataError::Config("batch_size must be positive".to_string()));
        }
        self.batch_size = batch_size;
        Ok(())
    }

    /// Completed reshuffles.
    pub fn epoch(&self) -> usize {
        self.epoch
    }

    /// Shape of one image as [channels, height, width].
    pub fn image_shape(&self) -> [i32; 3] {
        self.source.image_shape()
    }

    /// Underlying source.
    pub fn source(&self) -> &dyn CoverSource {
        self.source.as_ref()
    }

    /// Restart from the identity permutation with a new seed.
    pub fn reset(&mut self, seed: u64) {
        self.indices = (0..self.source.len()).collect();
        self.position = 0;
        self.epoch = 0;
        self.rng = StdRng::seed_from_u64(seed);
    }

    /// Positions in the permutation used by the next batch.
    fn next_positions(&self) -> Vec<usize> {
        let n = self.indices.len();
        (self.position..self.position + self.batch_size)
            .map(|p| p % n)
            .collect()
    }

    /// Draw the next batch.
    pub fn next_batch(&mut self) -> Result<CoverBatch> {
        let n = self.indices.len();
        let positions = self.next_positions();
        if positions.contains(&0) {
            if self.shuffle {
                self.indices.shuffle(&mut self.rng);
                debug!(epoch = self.epoch, "Reshuffled cover order");
            }
            if self.position != 0 || self.epoch > 0 {
                info!(epoch = self.epoch + 1, "Dataset exhausted, starting a new pass");
            }
            self.epoch += 1;
        }

        let [c, h, w] = self.source.image_shape();
        let indices: Vec<usize> = positions.iter().map(|&p| self.indices[p]).collect();
        let mut data = Vec::with_capacity(indices.len() * (c * h * w) as usize);
        for &index in &indices {
            self.source.read_into(index, &mut data)?;
        }
        let images = Array::from_slice(&data, &[indices.len() as i32, c, h, w]);

        let conditioning = indices
            .iter()
            .map(|&i| self.source.conditioning(i))
            .collect::<Option<Vec<f32>>>()
            .map(|years| Array::from_slice(&years, &[years.len() as i32, 1]));

        self.position = (self.position + self.batch_size) % n;
        Ok(CoverBatch {
            images,
            conditioning,
            indices,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::InMemoryDataset;

    fn ramp(n: usize) -> Box<dyn CoverSource> {
        let data: Vec<f32> = (0..n).map(|v| v as f32).collect();
        let cond: Vec<f32> = (0..n).map(|v| -(v as f32)).collect();
        Box::new(InMemoryDataset::new(data, [1, 1, 1], Some(cond)).unwrap())
    }

    #[test]
    fn test_sequential_batches_wrap_around() {
        let mut loader = CoverLoader::new(ramp(5), 2, false, 0).unwrap();
        let order: Vec<Vec<usize>> = (0..4).map(|_| loader.next_batch().unwrap().indices).collect();
        assert_eq!(order, vec![vec![0, 1], vec![2, 3], vec![4, 0], vec![1, 2]]);
        assert_eq!(loader.epoch(), 2);
    }

    #[test]
    fn test_batch_contents_match_indices() {
        let mut loader = CoverLoader::new(ramp(6), 3, true, 9).unwrap();
        let batch = loader.next_batch().unwrap();
        assert_eq!(batch.images.shape(), &[3, 1, 1, 1]);
        let pixels: Vec<f32> = batch.images.as_slice::<f32>().to_vec();
        let years: Vec<f32> = batch.conditioning.unwrap().as_slice::<f32>().to_vec();
        for (k, &index) in batch.indices.iter().enumerate() {
            assert_eq!(pixels[k], index as f32);
            assert_eq!(years[k], -(index as f32));
        }
    }

    #[test]
    fn test_every_pass_is_a_permutation() {
        let mut loader = CoverLoader::new(ramp(8), 4, true, 3).unwrap();
        let mut first: Vec<usize> = Vec::new();
        first.extend(loader.next_batch().unwrap().indices);
        first.extend(loader.next_batch().unwrap().indices);
        let mut second: Vec<usize> = Vec::new();
        second.extend(loader.next_batch().unwrap().indices);
        second.extend(loader.next_batch().unwrap().indices);

        let mut sorted = first.clone();
        sorted.sort_unstable();
        assert_eq!(sorted, (0..8).collect::<Vec<_>>());
        let mut sorted = second.clone();
        sorted.sort_unstable();
        assert_eq!(sorted, (0..8).collect::<Vec<_>>());
    }

    #[test]
    fn test_reset_replays_order() {
        let mut loader = CoverLoader::new(ramp(7), 3, true, 5).unwrap();
        let a: Vec<Vec<usize>> = (0..5).map(|_| loader.next_batch().unwrap().indices).collect();
        loader.reset(5);
        let b: Vec<Vec<usize>> = (0..5).map(|_| loader.next_batch().unwrap().indices).collect();
        assert_eq!(a, b);
    }

    #[test]
    fn test_batch_larger_than_dataset() {
        let mut loader = CoverLoader::new(ramp(3), 5, false, 0).unwrap();
        let batch = loader.next_batch().unwrap();
        assert_eq!(batch.indices, vec![0, 1, 2, 0, 1]);
        assert!(loader.set_batch_size(0).is_err());
    }
}
