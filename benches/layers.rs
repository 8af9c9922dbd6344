use criterion::{Criterion, black_box, criterion_group, criterion_main};

use rust_nn::{Conv2d, Layer, Linear, MaxPool2d, Tensor};

fn filled(shape: &[usize]) -> Tensor {
    let len = shape.iter().product::<usize>();
    let data = (0..len).map(|i| ((i % 17) as f64 - 8.0) * 0.05).collect();
    Tensor::new(shape.to_vec(), data).unwrap()
}

fn linear_forward_bench(c: &mut Criterion) {
    let mut layer = Linear::new_with_seed(256, 128, 0).unwrap();
    let input = filled(&[64, 256]);

    c.bench_function("linear_forward_64x256_to_128", |b| {
        b.iter(|| {
            let out = layer.forward(black_box(&input)).unwrap();
            black_box(out);
        })
    });
}

fn linear_backward_bench(c: &mut Criterion) {
    let mut layer = Linear::new_with_seed(256, 128, 0).unwrap();
    let input = filled(&[64, 256]);
    let grad = filled(&[64, 128]);

    c.bench_function("linear_forward_backward_64x256_to_128", |b| {
        b.iter(|| {
            layer.forward(black_box(&input)).unwrap();
            let d_input = layer.backward(black_box(&grad)).unwrap();
            black_box(d_input);
        })
    });
}

fn conv_forward_bench(c: &mut Criterion) {
    let mut layer = Conv2d::new_with_seed(3, 16, 3, 1, 1, 0).unwrap();
    let input = filled(&[16, 3, 32, 32]);

    c.bench_function("conv2d_forward_16x3x32x32_k3_f16", |b| {
        b.iter(|| {
            let out = layer.forward(black_box(&input)).unwrap();
            black_box(out);
        })
    });
}

fn conv_backward_bench(c: &mut Criterion) {
    let mut layer = Conv2d::new_with_seed(3, 16, 3, 1, 1, 0).unwrap();
    let input = filled(&[16, 3, 32, 32]);
    let grad = filled(&[16, 16, 32, 32]);

    c.bench_function("conv2d_forward_backward_16x3x32x32_k3_f16", |b| {
        b.iter(|| {
            layer.forward(black_box(&input)).unwrap();
            let d_input = layer.backward(black_box(&grad)).unwrap();
            black_box(d_input);
        })
    });
}

fn pool_bench(c: &mut Criterion) {
    let mut layer = MaxPool2d::new(2, 0).unwrap();
    let input = filled(&[16, 16, 32, 32]);
    let grad = filled(&[16, 16, 16, 16]);

    c.bench_function("maxpool2d_forward_backward_16x16x32x32", |b| {
        b.iter(|| {
            layer.forward(black_box(&input)).unwrap();
            let d_input = layer.backward(black_box(&grad)).unwrap();
            black_box(d_input);
        })
    });
}

criterion_group!(
    benches,
    linear_forward_bench,
    linear_backward_bench,
    conv_forward_bench,
    conv_backward_bench,
    pool_bench
);
criterion_main!(benches);
