use criterion::{black_box, criterion_group, criterion_main, Criterion};
use galvani::{spec_list, Cnn, RawTensor, SpecValue};

fn cnn_spec() -> SpecValue {
    spec_list![
        spec_list!["conv", 8, 3, 1, "same"],
        spec_list!["maxpool", 2, 2, "valid"],
        spec_list!["conv", 16, 3, 1, "same"],
        spec_list!["linear", 32],
        spec_list!["linear", 10],
    ]
}

fn bench_build(c: &mut Criterion) {
    c.bench_function("cnn_build", |b| {
        b.iter(|| Cnn::builder(black_box(cnn_spec())).batch_norm(true).build().unwrap())
    });
}

fn bench_forward(c: &mut Criterion) {
    let cnn = Cnn::builder(cnn_spec()).build().unwrap();
    let x = RawTensor::rand(&[8, 1, 28, 28]);
    cnn.forward(&x).unwrap();
    c.bench_function("cnn_forward_8x1x28x28", |b| {
        b.iter(|| cnn.forward(black_box(&x)).unwrap())
    });
}

fn bench_train_step(c: &mut Criterion) {
    use galvani::nn::optim::Adam;
    use galvani::TensorOps;

    let cnn = Cnn::builder(cnn_spec()).build().unwrap();
    let x = RawTensor::rand(&[8, 1, 28, 28]);
    let y = RawTensor::rand(&[8, 10]);
    cnn.forward(&x).unwrap();
    let mut opt = Adam::new(cnn.parameters(), 0.001);
    c.bench_function("cnn_train_step", |b| {
        b.iter(|| {
            opt.zero_grad();
            let out = cnn.forward(black_box(&x)).unwrap();
            let loss = RawTensor::mse_loss(&out, &y);
            loss.backward();
            opt.step();
        })
    });
}

criterion_group!(benches, bench_build, bench_forward, bench_train_step);
criterion_main!(benches);
