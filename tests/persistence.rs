use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_nn::{Linear, ReLU, Sequential, Tensor};

fn mlp(seed: u64) -> Sequential {
    let mut rng = StdRng::seed_from_u64(seed);
    Sequential::new()
        .with_layer(Linear::new_with_rng(5, 7, &mut rng).unwrap())
        .with_layer(ReLU::new())
        .with_layer(Linear::new_with_rng(7, 3, &mut rng).unwrap())
}

fn input(seed: u64) -> Tensor {
    let mut rng = StdRng::seed_from_u64(seed);
    Tensor::new(vec![4, 5], (0..20).map(|_| rng.gen_range(-2.0..2.0)).collect()).unwrap()
}

fn randomize_biases(model: &mut Sequential, seed: u64) {
    let mut rng = StdRng::seed_from_u64(seed);
    for layer in model.layers_mut() {
        if let Some(b) = layer.biases().cloned() {
            let data = (0..b.len()).map(|_| rng.gen_range(-1.0..1.0)).collect();
            layer
                .update_biases(&Tensor::new(b.shape().to_vec(), data).unwrap())
                .unwrap();
        }
    }
}

#[test]
fn accessor_snapshot_restores_identical_outputs() {
    let mut source = mlp(1);
    randomize_biases(&mut source, 2);
    let mut target = mlp(99);

    for (src, dst) in source.layers().iter().zip(target.layers_mut()) {
        if let Some(w) = src.weights() {
            dst.update_weights(w).unwrap();
        }
        if let Some(b) = src.biases() {
            dst.update_biases(b).unwrap();
        }
    }

    let x = input(3);
    assert_eq!(source.forward(&x).unwrap(), target.forward(&x).unwrap());
}

#[cfg(feature = "serde")]
mod json {
    use super::*;
    use rust_nn::{Conv2d, Flatten, MaxPool2d, OptimizerConfig, SgdMomentum, Softmax};

    #[test]
    fn linear_model_round_trip_is_bitwise_identical() {
        let mut model = mlp(4);
        randomize_biases(&mut model, 5);
        let json = model.to_json_string().unwrap();
        let mut loaded = Sequential::from_json_str(&json).unwrap();

        let x = input(6);
        let a = model.forward(&x).unwrap();
        let b = loaded.forward(&x).unwrap();
        for (u, v) in a.data().iter().zip(b.data()) {
            assert_eq!(u.to_bits(), v.to_bits());
        }
    }

    #[test]
    fn cnn_round_trip_through_a_file() {
        let mut model = Sequential::new()
            .with_layer(Conv2d::new_with_seed(2, 3, 3, 1, 1, 8).unwrap())
            .with_layer(ReLU::new())
            .with_layer(MaxPool2d::new(2, 0).unwrap())
            .with_layer(Flatten::new())
            .with_layer(Linear::new_with_seed(3 * 2 * 2, 4, 9).unwrap())
            .with_layer(Softmax::new())
            .with_optimizer(Box::new(SgdMomentum::with_defaults(0.01).unwrap()));

        let path = std::env::temp_dir().join(format!(
            "rust-nn-roundtrip-{}.json",
            std::process::id()
        ));
        model.save_json(&path).unwrap();
        let mut loaded = Sequential::load_json(&path).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(
            loaded.optimizer().unwrap().config(),
            OptimizerConfig::SgdMomentum {
                lr: 0.01,
                momentum: 0.9
            }
        );
        assert_eq!(loaded.num_parameters(), model.num_parameters());

        let mut rng = StdRng::seed_from_u64(10);
        let x = Tensor::new(
            vec![2, 2, 4, 4],
            (0..64).map(|_| rng.gen_range(-1.0..1.0)).collect(),
        )
        .unwrap();
        assert_eq!(model.forward(&x).unwrap(), loaded.forward(&x).unwrap());
    }

    #[test]
    fn load_reports_missing_file_as_invalid_data() {
        let err = Sequential::load_json("/definitely/not/here.json").unwrap_err();
        assert!(matches!(err, rust_nn::Error::InvalidData(_)));
    }
}
