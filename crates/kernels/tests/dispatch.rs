// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Integration tests: kernels selected through the registry agree with the
//! pack1 reference on every ISA the table knows about.

use hw_caps::{Capabilities, Isa, Precision};
use kernels::arith::Fp32;
use kernels::{
    conv_packed, pack_conv_weights, pack_depthwise_weights, weights_mat, Activation, ConvGeometry,
    KernelArgs, KernelKey, KernelRegistry, OpKind,
};
use tensor_core::{convert_packing, Mat, Options};

// ── Helpers ────────────────────────────────────────────────────

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("debug")
        .with_test_writer()
        .try_init();
}

/// Dyadic values: every partial sum below is exact in f32.
fn dyadic(n: usize, seed: usize) -> Vec<f32> {
    (0..n).map(|i| ((i * 7 + seed) % 9) as f32 * 0.25 - 1.0).collect()
}

fn reference(input: &Mat, raw: &[f32], bias: &[f32], outch: usize, g: ConvGeometry) -> Vec<f32> {
    let (outw, outh) = g.conv_output(input.w(), input.h()).unwrap();
    let wm = weights_mat(raw, Precision::Fp32, 1).unwrap();
    let mut out = Mat::new_3d(outw, outh, outch, 4, 1, None);
    conv_packed::<Fp32, 1, 1>(
        &KernelArgs {
            input,
            weights: &wm,
            bias,
            geometry: g,
            activation: Activation::Identity,
            num_threads: 1,
        },
        &mut out,
    );
    out.to_vec_f32()
}

// ── Tests ──────────────────────────────────────────────────────

#[test]
fn test_conv_pack_pairs_agree_with_reference() {
    init_tracing();
    let (w, h, inch, outch) = (9, 7, 8, 8);
    let g = ConvGeometry::square(3, 1);
    let input = Mat::from_f32_3d(w, h, inch, &dyadic(w * h * inch, 1)).unwrap();
    let raw = dyadic(outch * inch * 9, 2);
    let bias = dyadic(outch, 3);
    let expect = reference(&input, &raw, &bias, outch, g);
    let opt = Options::reference();

    let caps = Capabilities::portable();
    for (i, o) in [(1, 1), (1, 4), (1, 8), (4, 1), (4, 4), (4, 8), (8, 1), (8, 4), (8, 8)] {
        let entry = KernelRegistry::global()
            .resolve(&caps, KernelKey::new(OpKind::Conv, i, o, Precision::Fp32))
            .unwrap();
        let packed = convert_packing(&input, i, &opt);
        let wm = weights_mat(&pack_conv_weights(&raw, outch, inch, 9, i, o), Precision::Fp32, 1).unwrap();
        let mut out = Mat::new_3d(7, 5, outch / o, 4 * o, o, None);
        (entry.func)(
            &KernelArgs {
                input: &packed,
                weights: &wm,
                bias: &bias,
                geometry: g,
                activation: Activation::Identity,
                num_threads: 3,
            },
            &mut out,
        );
        assert_eq!(out.to_vec_f32(), expect, "pack{i} -> pack{o}");
    }
}

#[test]
fn test_3x3_fast_path_on_every_isa() {
    init_tracing();
    let (w, h, inch, outch) = (14, 8, 3, 8);
    let input = Mat::from_f32_3d(w, h, inch, &dyadic(w * h * inch, 4)).unwrap();
    let raw = dyadic(outch * inch * 9, 5);
    let bias = dyadic(outch, 6);

    for stride in [1, 2] {
        let g = ConvGeometry::square(3, stride);
        let expect = reference(&input, &raw, &bias, outch, g);
        let (outw, outh) = g.conv_output(w, h).unwrap();
        let op = if stride == 1 { OpKind::Conv3x3s1 } else { OpKind::Conv3x3s2 };
        for isa in [Isa::Scalar, Isa::Neon, Isa::Rvv] {
            let caps = Capabilities::portable().with_isa(isa);
            let entry = KernelRegistry::global()
                .resolve(&caps, KernelKey::new(op, 1, 4, Precision::Fp32))
                .unwrap();
            let wm = weights_mat(&pack_conv_weights(&raw, outch, inch, 9, 1, 4), Precision::Fp32, 1).unwrap();
            let mut out = Mat::new_3d(outw, outh, 2, 16, 4, None);
            (entry.func)(
                &KernelArgs {
                    input: &input,
                    weights: &wm,
                    bias: &bias,
                    geometry: g,
                    activation: Activation::Identity,
                    num_threads: 2,
                },
                &mut out,
            );
            assert_eq!(out.to_vec_f32(), expect, "{isa:?} stride {stride}");
        }
    }
}

#[test]
fn test_depthwise_on_every_isa() {
    init_tracing();
    let (w, h, ch) = (8, 6, 8);
    let g = ConvGeometry::square(3, 1);
    let input = Mat::from_f32_3d(w, h, ch, &dyadic(w * h * ch, 7)).unwrap();
    let raw = dyadic(ch * 9, 8);
    let packed = convert_packing(&input, 4, &Options::reference());
    let wm = weights_mat(&pack_depthwise_weights(&raw, ch, 9, 4), Precision::Fp32, 1).unwrap();

    let mut outputs = Vec::new();
    for isa in [Isa::Scalar, Isa::Neon] {
        let caps = Capabilities::portable().with_isa(isa);
        let entry = KernelRegistry::global()
            .resolve(&caps, KernelKey::new(OpKind::ConvDepthwise, 4, 4, Precision::Fp32))
            .unwrap();
        let mut out = Mat::new_3d(6, 4, 2, 16, 4, None);
        (entry.func)(
            &KernelArgs {
                input: &packed,
                weights: &wm,
                bias: &[],
                geometry: g,
                activation: Activation::Relu,
                num_threads: 2,
            },
            &mut out,
        );
        outputs.push(out.to_vec_f32());
    }
    assert_eq!(outputs[0], outputs[1]);
}
