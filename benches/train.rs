use criterion::{Criterion, black_box, criterion_group, criterion_main};
use gbdt_fixture::booster::{BoosterParams, train};
use gbdt_fixture::dataset::{Dataset, train_test_split};
use gbdt_fixture::matrix::DMatrix;

fn bench_train(c: &mut Criterion) {
    let dataset = Dataset::breast_cancer().expect("dataset");
    let split = train_test_split(&dataset, 0.2, 42).expect("split");
    let dtrain = DMatrix::from_dataset(&split.train).expect("dtrain");

    for depth in [3, 6] {
        let params = BoosterParams {
            max_depth: depth,
            eta: 0.01,
            ..BoosterParams::default()
        };
        c.bench_function(&format!("train 455x30, 10 rounds, depth {depth}"), |bch| {
            bch.iter(|| train(black_box(&params), black_box(&dtrain), 10))
        });
    }
}

criterion_group! {
    name = benches;
    config = Criterion::default().sample_size(20);
    targets = bench_train
}
criterion_main!(benches);
