use criterion::{black_box, criterion_group, criterion_main, Criterion};
use mlsingle::{register_custom_filter, CustomFilter, Single, SingleOptions};
use mlsingle_tensor::{TensorType, TensorsData, TensorsInfo};

fn open_passthrough(name: &str, len: u32) -> (Single, TensorsData) {
    let info = TensorsInfo::new()
        .with_tensor(TensorType::Float32, &[len])
        .unwrap();
    let filter = CustomFilter::new(info.clone(), info.clone(), |input, output| {
        output.copy_from(input)?;
        Ok(())
    })
    .unwrap();
    register_custom_filter(name, filter).unwrap();

    let single = Single::open(&SingleOptions::custom_filter(name)).unwrap();
    let mut input = TensorsData::allocate(&info).unwrap();
    let values: Vec<f32> = (0..len).map(|i| (i % 100) as f32 * 0.01).collect();
    input.set_tensor_values(0, &values).unwrap();
    (single, input)
}

fn bench_invoke(c: &mut Criterion) {
    let mut group = c.benchmark_group("single_invoke");
    for len in [16u32, 4096, 262_144] {
        let (single, input) = open_passthrough(&format!("bench-pass-{len}"), len);
        group.bench_function(format!("f32x{len}"), |b| {
            b.iter(|| {
                let output = single.invoke(black_box(&input)).unwrap();
                black_box(output.total_size());
            });
        });
        single.close().unwrap();
    }
    group.finish();
}

fn bench_invoke_into(c: &mut Criterion) {
    let (single, input) = open_passthrough("bench-into", 4096);
    let mut output = TensorsData::allocate(&single.output_info().unwrap()).unwrap();
    c.bench_function("single_invoke_into_f32x4096", |b| {
        b.iter(|| {
            single.invoke_into(black_box(&input), &mut output).unwrap();
        });
    });
}

fn bench_open_close(c: &mut Criterion) {
    let (single, _) = open_passthrough("bench-open", 16);
    single.close().unwrap();
    c.bench_function("single_open_close", |b| {
        b.iter(|| {
            let single = Single::open(&SingleOptions::custom_filter("bench-open")).unwrap();
            single.close().unwrap();
        });
    });
}

criterion_group!(benches, bench_invoke, bench_invoke_into, bench_open_close);
criterion_main!(benches);
