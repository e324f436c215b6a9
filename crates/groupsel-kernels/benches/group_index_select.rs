//! Grouped gather/scatter throughput on the host reference accelerator.

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};

use groupsel_kernels::{group_index_select, DeviceIndices, DeviceTensor, HostAccelerator};

fn make_group(
    acc: &HostAccelerator,
    group_size: usize,
    rows: usize,
    cols: usize,
    m: usize,
) -> (Vec<DeviceTensor<HostAccelerator>>, Vec<DeviceIndices<HostAccelerator>>) {
    let inputs = (0..group_size)
        .map(|k| {
            let data: Vec<f32> = (0..rows * cols).map(|i| (i + k) as f32).collect();
            DeviceTensor::from_slice(acc, &data, &[rows, cols]).unwrap()
        })
        .collect();
    let indices = (0..group_size)
        .map(|k| {
            let picks: Vec<i64> = (0..m).map(|r| ((r * 7 + k) % rows) as i64).collect();
            DeviceIndices::from_slice(acc, &picks).unwrap()
        })
        .collect();
    (inputs, indices)
}

fn bench_forward(c: &mut Criterion) {
    let acc = HostAccelerator::new();
    let mut group = c.benchmark_group("grouped_gather_forward");
    for group_size in [2usize, 8, 32] {
        let (inputs, indices) = make_group(&acc, group_size, 256, 64, 128);
        group.bench_with_input(
            BenchmarkId::from_parameter(group_size),
            &group_size,
            |b, _| {
                b.iter(|| {
                    let (outputs, _backward) =
                        group_index_select(&acc, &inputs, &indices).unwrap();
                    outputs
                })
            },
        );
    }
    group.finish();
}

fn bench_forward_backward(c: &mut Criterion) {
    let acc = HostAccelerator::new();
    let mut group = c.benchmark_group("grouped_gather_forward_backward");
    for group_size in [2usize, 8] {
        let (inputs, indices) = make_group(&acc, group_size, 256, 64, 128);
        let grads: Vec<_> = (0..group_size)
            .map(|_| {
                DeviceTensor::from_slice(&acc, &vec![1.0f32; 128 * 64], &[128, 64]).unwrap()
            })
            .collect();
        group.bench_with_input(
            BenchmarkId::from_parameter(group_size),
            &group_size,
            |b, _| {
                b.iter(|| {
                    let (_outputs, backward) =
                        group_index_select(&acc, &inputs, &indices).unwrap();
                    backward.apply_grad(&acc, &grads).unwrap()
                })
            },
        );
    }
    group.finish();
}

criterion_group!(benches, bench_forward, bench_forward_backward);
criterion_main!(benches);
