// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Layer-level benchmarks: whole `forward` calls including repacking,
//! padding and trimming.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use hw_caps::Capabilities;
use operators::{Convolution, ConvolutionDepthWise, Slice};
use param_ir::{MatArrayModelBin, ParamDict};
use tensor_core::{convert_packing, Mat, Options};

fn ramp(n: usize) -> Vec<f32> {
    (0..n).map(|i| (i % 13) as f32 / 13.0 - 0.5).collect()
}

fn model(weights: usize, bias: usize) -> MatArrayModelBin {
    MatArrayModelBin::new(vec![
        Mat::from_f32_1d(weights, &ramp(weights)).unwrap(),
        Mat::from_f32_1d(bias, &ramp(bias)).unwrap(),
    ])
}

fn packed(threads: usize) -> Options {
    Options {
        num_threads: threads,
        lightmode: false,
        use_packing_layout: true,
        ..Options::reference()
    }
}

fn bench_convolution(c: &mut Criterion) {
    let mut group = c.benchmark_group("convolution_3x3");
    let caps = Capabilities::detect();
    let (inch, outch, size) = (16, 32, 56);
    let params = ParamDict::parse(&format!("0={outch} 1=3 4=-233 5=1 6={}", outch * inch * 9)).unwrap();
    let input = Mat::from_f32_3d(size, size, inch, &ramp(size * size * inch)).unwrap();

    for (label, opt) in [("reference", Options::reference()), ("packed", packed(1)), ("packed_mt", packed(4))] {
        let mut op = Convolution::load_param(&params).unwrap();
        op.load_model(&mut model(outch * inch * 9, outch)).unwrap();
        op.create_pipeline(&opt, &caps).unwrap();
        group.bench_with_input(BenchmarkId::new(label, size), &size, |b, _| {
            b.iter(|| op.forward(black_box(&input), &opt).unwrap());
        });
    }
    group.finish();
}

fn bench_depthwise(c: &mut Criterion) {
    let mut group = c.benchmark_group("convolution_depthwise");
    let caps = Capabilities::detect();
    let (ch, size) = (32, 56);
    let input = Mat::from_f32_3d(size, size, ch, &ramp(size * size * ch)).unwrap();

    // Full depthwise against four-channel groups over the same tensor.
    for (label, group_count) in [("depthwise", ch), ("grouped", ch / 4)] {
        let weights = ch * (ch / group_count) * 9;
        let params = ParamDict::parse(&format!("0={ch} 1=3 4=-233 5=1 6={weights} 7={group_count}")).unwrap();
        let mut op = ConvolutionDepthWise::load_param(&params).unwrap();
        op.load_model(&mut model(weights, ch)).unwrap();
        let opt = packed(1);
        op.create_pipeline(&opt, &caps).unwrap();
        group.bench_with_input(BenchmarkId::new(label, size), &size, |b, _| {
            b.iter(|| op.forward(black_box(&input), &opt).unwrap());
        });
    }
    group.finish();
}

fn bench_slice(c: &mut Criterion) {
    let mut group = c.benchmark_group("slice_channels");
    let opt = packed(1);
    let src = Mat::from_f32_3d(64, 64, 32, &ramp(64 * 64 * 32)).unwrap();
    let src = convert_packing(&src, 4, &opt);

    // 16 + 16 lands on pack boundaries (views), 6 + 26 does not (repack).
    for (label, params) in [("aligned", "-23300=2,16,-233"), ("unaligned", "-23300=2,6,-233")] {
        let op = Slice::load_param(&ParamDict::parse(params).unwrap()).unwrap();
        group.bench_function(label, |b| {
            b.iter(|| op.forward(black_box(&src), &opt).unwrap());
        });
    }
    group.finish();
}

criterion_group!(benches, bench_convolution, bench_depthwise, bench_slice);
criterion_main!(benches);
