use rust_nn::{Adam, Dataset, FitConfig, Linear, MseLoss, Sequential, Shuffle, Sigmoid};

fn main() -> rust_nn::Result<()> {
    let xs = vec![
        vec![0.0, 0.0],
        vec![0.0, 1.0],
        vec![1.0, 0.0],
        vec![1.0, 1.0],
    ];
    let ys = vec![vec![0.0], vec![1.0], vec![1.0], vec![0.0]];
    let train = Dataset::from_rows(&xs, &ys)?;

    let mut model = Sequential::new()
        .with_layer(Linear::new_with_seed(2, 8, 0)?)
        .with_layer(Sigmoid::new())
        .with_layer(Linear::new_with_seed(8, 1, 1)?)
        .with_layer(Sigmoid::new())
        .with_optimizer(Box::new(Adam::with_defaults(0.1)?));

    let report = model.fit(
        &train,
        &mut MseLoss::new(),
        &FitConfig {
            epochs: 1000,
            batch_size: 4,
            shuffle: Shuffle::None,
        },
    )?;
    println!(
        "final loss: {:.6}",
        report.final_loss().unwrap_or(f64::NAN)
    );

    model.eval();
    let pred = model.predict(train.features())?;
    for (x, p) in xs.iter().zip(pred.data()) {
        println!("{x:?} -> {p:.4}");
    }

    #[cfg(feature = "serde")]
    {
        let path = std::env::temp_dir().join("rust_nn_xor.json");
        model.save_json(&path)?;
        let mut loaded = Sequential::load_json(&path)?;
        let reloaded = loaded.predict(train.features())?;
        println!(
            "saved and reloaded {}: outputs match = {}",
            path.display(),
            reloaded == pred
        );
    }

    Ok(())
}
