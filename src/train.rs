//! Mini-batch training loop.

use log::{info, warn};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;

use crate::{Dataset, Error, Loss, Result, Sequential};

/// Sample order per epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Shuffle {
    /// Dataset order every epoch.
    #[default]
    None,
    /// Reshuffle every epoch from one RNG seeded once per `fit` call.
    Seeded(u64),
}

#[derive(Debug, Clone, Copy)]
pub struct FitConfig {
    pub epochs: usize,
    pub batch_size: usize,
    pub shuffle: Shuffle,
}

impl Default for FitConfig {
    fn default() -> Self {
        Self {
            epochs: 10,
            batch_size: 32,
            shuffle: Shuffle::Seeded(42),
        }
    }
}

impl FitConfig {
    pub fn validate(&self) -> Result<()> {
        if self.epochs == 0 {
            return Err(Error::InvalidConfig("epochs must be > 0".to_owned()));
        }
        if self.batch_size == 0 {
            return Err(Error::InvalidConfig("batch_size must be > 0".to_owned()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FitReport {
    /// Mean batch loss of every epoch, in order.
    pub epoch_losses: Vec<f64>,
}

impl FitReport {
    pub fn final_loss(&self) -> Option<f64> {
        self.epoch_losses.last().copied()
    }
}

impl Sequential {
    /// Train on `data` with the attached optimizer.
    ///
    /// Each mini-batch runs forward, `loss.forward`, `loss.backward` and
    /// `backward` (which applies the optimizer update). Optimizer state is kept
    /// across batches and epochs. The model is left in training mode.
    pub fn fit<L: Loss + ?Sized>(
        &mut self,
        data: &Dataset,
        loss: &mut L,
        cfg: &FitConfig,
    ) -> Result<FitReport> {
        cfg.validate()?;
        if self.optimizer().is_none() {
            return Err(Error::InvalidState(
                "fit requires an optimizer; call set_optimizer first".to_owned(),
            ));
        }

        self.train();
        let mut rng = match cfg.shuffle {
            Shuffle::Seeded(seed) => Some(StdRng::seed_from_u64(seed)),
            Shuffle::None => None,
        };
        let mut order: Vec<usize> = (0..data.len()).collect();
        let mut epoch_losses = Vec::with_capacity(cfg.epochs);

        for epoch in 0..cfg.epochs {
            if let Some(rng) = rng.as_mut() {
                order.shuffle(rng);
            }

            let mut total = 0.0;
            let mut batches = 0usize;
            for idx in order.chunks(cfg.batch_size) {
                let (x, y) = data.batch(idx)?;
                let pred = self.forward(&x)?;
                total += loss.forward(&pred, &y)?;
                let grad = loss.backward()?;
                self.backward(&grad)?;
                batches += 1;
            }

            let mean = total / batches as f64;
            if mean.is_finite() {
                info!("epoch {}/{}: loss {mean:.6}", epoch + 1, cfg.epochs);
            } else {
                warn!("epoch {}/{}: loss is not finite ({mean})", epoch + 1, cfg.epochs);
            }
            epoch_losses.push(mean);
        }

        Ok(FitReport { epoch_losses })
    }

    /// Mean batch loss over `data` in evaluation mode, without parameter updates.
    ///
    /// Caches are cleared afterwards and the model is left in evaluation mode.
    pub fn evaluate<L: Loss + ?Sized>(
        &mut self,
        data: &Dataset,
        loss: &mut L,
        batch_size: usize,
    ) -> Result<f64> {
        self.eval();
        let mut total = 0.0;
        let batches = data.batches(batch_size, None)?;
        for (x, y) in &batches {
            let pred = self.forward(x)?;
            total += loss.forward(&pred, y)?;
        }
        self.clear_cache();
        Ok(total / batches.len() as f64)
    }
}
