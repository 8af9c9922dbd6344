use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use rust_nn::{
    Conv2d, CrossEntropyLoss, Dataset, FitConfig, Flatten, Linear, MaxPool2d, Metric, ReLU,
    Sequential, SgdMomentum, Shuffle, Softmax, Tensor,
};

const SIZE: usize = 8;

/// Three classes on a noisy canvas: vertical bar, horizontal bar, diagonal.
fn shapes(n: usize, seed: u64) -> rust_nn::Result<Dataset> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut features = Vec::with_capacity(n * SIZE * SIZE);
    let mut targets = Vec::with_capacity(n * 3);
    for i in 0..n {
        let label = i % 3;
        let pos = rng.gen_range(0..SIZE);
        let mut img: Vec<f64> = (0..SIZE * SIZE).map(|_| rng.gen_range(0.0..0.2)).collect();
        for q in 0..SIZE {
            let (y, x) = match label {
                0 => (q, pos),
                1 => (pos, q),
                _ => (q, q),
            };
            img[y * SIZE + x] = 1.0;
        }
        features.extend(img);
        let mut one_hot = [0.0; 3];
        one_hot[label] = 1.0;
        targets.extend(one_hot);
    }
    Dataset::new(
        Tensor::new(vec![n, 1, SIZE, SIZE], features)?,
        Tensor::new(vec![n, 3], targets)?,
    )
}

fn main() -> rust_nn::Result<()> {
    let (train, test) = shapes(240, 0)?.split(0.8, 1)?;

    let mut rng = StdRng::seed_from_u64(2);
    let mut model = Sequential::new()
        .with_layer(Conv2d::new_with_rng(1, 6, 3, 1, 1, &mut rng)?)
        .with_layer(ReLU::new())
        .with_layer(MaxPool2d::new(2, 2)?)
        .with_layer(Flatten::new())
        .with_layer(Linear::new_with_rng(6 * 4 * 4, 3, &mut rng)?)
        .with_layer(Softmax::new())
        .with_optimizer(Box::new(SgdMomentum::with_defaults(0.05)?));
    println!("{model}");

    let mut loss = CrossEntropyLoss::new();
    let report = model.fit(
        &train,
        &mut loss,
        &FitConfig {
            epochs: 20,
            batch_size: 16,
            shuffle: Shuffle::Seeded(3),
        },
    )?;
    for (epoch, l) in report.epoch_losses.iter().enumerate() {
        println!("epoch {:>2}: loss {l:.4}", epoch + 1);
    }

    let test_loss = model.evaluate(&test, &mut loss, 32)?;
    let pred = model.predict(test.features())?;
    let acc = Metric::Accuracy.compute(&pred, test.targets())?;
    println!("test loss {test_loss:.4}, accuracy {:.1}%", acc * 100.0);
    Ok(())
}
