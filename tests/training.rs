use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_nn::{
    Adam, Conv2d, CrossEntropyLoss, Dataset, FitConfig, Flatten, Linear, MaxPool2d, Metric,
    MseLoss, ReLU, Sequential, SgdMomentum, Shuffle, Sigmoid, Softmax, Tensor,
};

fn xor() -> Dataset {
    Dataset::from_rows(
        &[
            vec![0.0, 0.0],
            vec![0.0, 1.0],
            vec![1.0, 0.0],
            vec![1.0, 1.0],
        ],
        &[vec![0.0], vec![1.0], vec![1.0], vec![0.0]],
    )
    .unwrap()
}

#[test]
fn mlp_learns_xor_with_adam() {
    let mut rng = StdRng::seed_from_u64(0);
    let mut model = Sequential::new()
        .with_layer(Linear::new_with_rng(2, 8, &mut rng).unwrap())
        .with_layer(Sigmoid::new())
        .with_layer(Linear::new_with_rng(8, 1, &mut rng).unwrap())
        .with_layer(Sigmoid::new())
        .with_optimizer(Box::new(Adam::with_defaults(0.1).unwrap()));

    let data = xor();
    let report = model
        .fit(
            &data,
            &mut MseLoss::new(),
            &FitConfig {
                epochs: 1000,
                batch_size: 4,
                shuffle: Shuffle::None,
            },
        )
        .unwrap();

    let final_loss = report.final_loss().unwrap();
    assert!(final_loss < 0.01, "final loss {final_loss}");

    model.eval();
    let pred = model.predict(data.features()).unwrap();
    for (p, t) in pred.data().iter().zip(data.targets().data()) {
        assert_eq!(*p > 0.5, *t > 0.5, "pred {p} target {t}");
    }
}

/// Vertical bar = class 0, horizontal bar = class 1, on a noisy 6x6 canvas.
fn bars(n: usize, seed: u64) -> Dataset {
    const S: usize = 6;
    let mut rng = StdRng::seed_from_u64(seed);
    let mut features = Vec::with_capacity(n * S * S);
    let mut targets = Vec::with_capacity(n * 2);
    for i in 0..n {
        let label = i % 2;
        let pos = rng.gen_range(0..S);
        let mut img: Vec<f64> = (0..S * S).map(|_| rng.gen_range(0.0..0.1)).collect();
        for q in 0..S {
            let (y, x) = if label == 0 { (q, pos) } else { (pos, q) };
            img[y * S + x] = 1.0;
        }
        features.extend(img);
        targets.extend(if label == 0 { [1.0, 0.0] } else { [0.0, 1.0] });
    }
    Dataset::new(
        Tensor::new(vec![n, 1, S, S], features).unwrap(),
        Tensor::new(vec![n, 2], targets).unwrap(),
    )
    .unwrap()
}

#[test]
fn small_cnn_separates_bar_orientations() {
    let mut rng = StdRng::seed_from_u64(7);
    let mut model = Sequential::new()
        .with_layer(Conv2d::new_with_rng(1, 4, 3, 1, 1, &mut rng).unwrap())
        .with_layer(ReLU::new())
        .with_layer(MaxPool2d::new(2, 0).unwrap())
        .with_layer(Flatten::new())
        .with_layer(Linear::new_with_rng(4 * 3 * 3, 2, &mut rng).unwrap())
        .with_layer(Softmax::new())
        .with_optimizer(Box::new(SgdMomentum::new(0.05, 0.9).unwrap()));

    let data = bars(32, 1);
    let mut loss = CrossEntropyLoss::new();
    let report = model
        .fit(
            &data,
            &mut loss,
            &FitConfig {
                epochs: 40,
                batch_size: 8,
                shuffle: Shuffle::Seeded(3),
            },
        )
        .unwrap();

    let first = report.epoch_losses[0];
    let last = report.final_loss().unwrap();
    assert!(last < first * 0.5, "loss {first} -> {last}");
    assert!(last < 0.2, "final loss {last}");

    model.eval();
    let pred = model.predict(data.features()).unwrap();
    let acc = Metric::Accuracy.compute(&pred, data.targets()).unwrap();
    assert!(acc >= 0.9, "accuracy {acc}");

    let eval_loss = model.evaluate(&data, &mut loss, 16).unwrap();
    assert!(eval_loss.is_finite());
}

#[test]
fn held_out_split_keeps_image_shape() {
    let (train, test) = bars(20, 2).split(0.8, 42).unwrap();
    assert_eq!(train.len(), 16);
    assert_eq!(test.len(), 4);
    assert_eq!(test.features().shape(), &[4, 1, 6, 6]);
}
