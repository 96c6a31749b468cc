use rvc_core::{Result, RvcError};

/// Fixed-length FIFO sample window.
///
/// Zero-filled at construction so the first real block sees silence as
/// history. The length never changes after construction; new samples enter
/// at the tail and age out at the head.
#[derive(Debug, Clone)]
pub struct RollingBuffer {
    samples: Vec<f32>,
}

impl RollingBuffer {
    pub fn new(len: usize) -> Self {
        Self {
            samples: vec![0.0; len],
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Shifts the buffer left by `chunk.len()` and writes `chunk` at the tail.
    pub fn advance(&mut self, chunk: &[f32]) -> Result<()> {
        let k = chunk.len();
        let n = self.samples.len();
        if k > n {
            return Err(RvcError::BufferOverflow {
                len: k,
                capacity: n,
            });
        }
        self.samples.copy_within(k.., 0);
        self.samples[n - k..].copy_from_slice(chunk);
        Ok(())
    }

    /// Ages out the oldest `k` samples without writing new ones; the freed
    /// tail keeps its previous contents until overwritten.
    pub fn shift_left(&mut self, k: usize) -> Result<()> {
        if k > self.samples.len() {
            return Err(RvcError::BufferOverflow {
                len: k,
                capacity: self.samples.len(),
            });
        }
        self.samples.copy_within(k.., 0);
        Ok(())
    }

    /// Overwrites the newest `chunk.len()` samples in place.
    pub fn write_tail(&mut self, chunk: &[f32]) -> Result<()> {
        let n = self.samples.len();
        if chunk.len() > n {
            return Err(RvcError::BufferOverflow {
                len: chunk.len(),
                capacity: n,
            });
        }
        self.samples[n - chunk.len()..].copy_from_slice(chunk);
        Ok(())
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.samples
    }

    pub fn as_mut_slice(&mut self) -> &mut [f32] {
        &mut self.samples
    }

    /// The newest `n` samples.
    pub fn tail(&self, n: usize) -> &[f32] {
        &self.samples[self.samples.len() - n.min(self.samples.len())..]
    }

    pub fn fill(&mut self, value: f32) {
        self.samples.fill(value);
    }
}
