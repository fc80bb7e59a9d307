use candle_core::{Device, Tensor};
use log::debug;
use rand::prelude::SliceRandom;
use rayon::prelude::*;

/// `DataLoader` for minibatch learning over aligned modalities
pub trait DataLoader {
    /// One tensor per modality, rows aligned across modalities
    fn minibatch_data(&self, batch_idx: usize, target_device: &Device)
        -> anyhow::Result<Vec<Tensor>>;

    fn num_minibatch(&self) -> usize;

    fn shuffle_minibatch(&mut self, batch_size: usize) -> anyhow::Result<()>;
}

///
/// A simple data loader for in-memory 2d matrices, one per modality.
/// Row `i` of every matrix belongs to the same example.
///
pub struct MultimodalInMemoryData {
    data: Vec<Tensor>,
    shuffled_data: Option<Vec<Vec<Tensor>>>,
    minibatches: Minibatches,
}

impl MultimodalInMemoryData {
    /// * `data` - `(n, d_i)` matrices sharing the number of rows
    pub fn new(data: Vec<Tensor>) -> anyhow::Result<Self> {
        let Some(first) = data.first() else {
            return Err(anyhow::anyhow!("need at least one modality"));
        };
        let nrows = first.dim(0)?;
        for (i, x) in data.iter().enumerate() {
            if x.rank() != 2 || x.dim(0)? != nrows {
                return Err(anyhow::anyhow!(
                    "modality {} has shape {:?}, expected {} rows",
                    i,
                    x.dims(),
                    nrows
                ));
            }
        }

        Ok(MultimodalInMemoryData {
            data,
            shuffled_data: None,
            minibatches: Minibatches {
                samples: (0..nrows).collect(),
                chunks: vec![],
            },
        })
    }

    pub fn num_modalities(&self) -> usize {
        self.data.len()
    }

    pub fn num_rows(&self) -> usize {
        self.minibatches.size()
    }

    /// All rows of every modality
    pub fn full_data(&self, target_device: &Device) -> anyhow::Result<Vec<Tensor>> {
        Ok(self
            .data
            .iter()
            .map(|x| x.to_device(target_device))
            .collect::<candle_core::Result<Vec<_>>>()?)
    }
}

impl DataLoader for MultimodalInMemoryData {
    fn minibatch_data(
        &self,
        batch_idx: usize,
        target_device: &Device,
    ) -> anyhow::Result<Vec<Tensor>> {
        let Some(shuffled) = self.shuffled_data.as_ref() else {
            return Err(anyhow::anyhow!("need to shuffle data"));
        };
        let Some(batch) = shuffled.get(batch_idx) else {
            return Err(anyhow::anyhow!(
                "invalid index = {} vs. total # = {}",
                batch_idx,
                shuffled.len()
            ));
        };
        Ok(batch
            .iter()
            .map(|x| x.to_device(target_device))
            .collect::<candle_core::Result<Vec<_>>>()?)
    }

    fn num_minibatch(&self) -> usize {
        self.minibatches.chunks.len()
    }

    fn shuffle_minibatch(&mut self, batch_size: usize) -> anyhow::Result<()> {
        if batch_size == 0 {
            return Err(anyhow::anyhow!("batch size must be positive"));
        }

        self.minibatches.shuffle_minibatch(batch_size);

        ///////////////////////////////////
        // preload all the shuffled data //
        ///////////////////////////////////

        let data = &self.data;
        let device = data[0].device();
        let shuffled = self
            .minibatches
            .chunks
            .par_iter()
            .map(|samples| -> candle_core::Result<Vec<Tensor>> {
                let idx: Vec<u32> = samples.iter().map(|&i| i as u32).collect();
                let idx = Tensor::from_vec(idx, samples.len(), device)?;
                data.iter().map(|x| x.index_select(&idx, 0)).collect()
            })
            .collect::<candle_core::Result<Vec<_>>>()?;

        debug!(
            "shuffled {} rows into {} minibatches",
            self.minibatches.size(),
            shuffled.len()
        );
        self.shuffled_data = Some(shuffled);
        Ok(())
    }
}

///
/// A helper `struct` for shuffling and creating minibatch indexes;
/// after `shuffle_minibatch` is called, `chunks` partition indexes.
///
pub struct Minibatches {
    samples: Vec<usize>,
    pub chunks: Vec<Vec<usize>>,
}

impl Minibatches {
    pub fn shuffle_minibatch(&mut self, batch_size: usize) {
        let mut rng = rand::rng();
        self.samples.shuffle(&mut rng);
        self.chunks = self
            .samples
            .chunks(batch_size)
            .map(|chunk| chunk.to_vec())
            .collect();
    }

    pub fn size(&self) -> usize {
        self.samples.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minibatches_partition_rows() -> anyhow::Result<()> {
        let dev = Device::Cpu;
        let x = Tensor::arange(0f32, 10f32, &dev)?.reshape((10, 1))?;
        let y = (Tensor::arange(0f32, 10f32, &dev)?.reshape((10, 1))? * 2.)?;
        let mut data = MultimodalInMemoryData::new(vec![x, y])?;

        assert!(data.minibatch_data(0, &dev).is_err());
        data.shuffle_minibatch(4)?;
        assert_eq!(data.num_minibatch(), 3);

        let mut seen = vec![];
        for b in 0..data.num_minibatch() {
            let batch = data.minibatch_data(b, &dev)?;
            let xb: Vec<f32> = batch[0].flatten_all()?.to_vec1()?;
            let yb: Vec<f32> = batch[1].flatten_all()?.to_vec1()?;
            for (x, y) in xb.iter().zip(yb.iter()) {
                assert_eq!(2. * x, *y);
            }
            seen.extend(xb);
        }
        seen.sort_by(|a, b| a.total_cmp(b));
        assert_eq!(seen, (0..10).map(|i| i as f32).collect::<Vec<_>>());
        Ok(())
    }

    #[test]
    fn misaligned_rows_are_rejected() -> anyhow::Result<()> {
        let x = Tensor::zeros((3, 2), candle_core::DType::F32, &Device::Cpu)?;
        let y = Tensor::zeros((4, 2), candle_core::DType::F32, &Device::Cpu)?;
        assert!(MultimodalInMemoryData::new(vec![x, y]).is_err());
        Ok(())
    }
}
