// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! End-to-end checks across the operator crates: packed kernels against
//! the unpacked reference path, group decomposition, the GPU slice and the
//! parameter stream loader.

use hw_caps::Capabilities;
use memory_manager::MemoryBudget;
use operators::{
    Convolution, ConvolutionDepthWise, Deconvolution, DeconvolutionDepthWise, Layer, LayerError, ShapeHint,
    SliceVulkan,
};
use param_ir::{DataReaderModelBin, LayerDecl, MatArrayModelBin, ParamDict};
use std::collections::HashMap;
use tensor_core::{
    cast_bfloat16_to_float32, cast_float16_to_float32, cast_float32_to_bfloat16, cast_float32_to_float16,
    convert_packing, Mat, Options,
};
use vk_dispatch::{VkCompute, VkDevice, VkMat};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("debug")
        .with_test_writer()
        .try_init();
}

/// Deterministic values in `[-1, 1)` on a 1/64 grid.
fn fill(n: usize, seed: u32) -> Vec<f32> {
    let mut state = seed.wrapping_mul(2_654_435_761).wrapping_add(1);
    (0..n)
        .map(|_| {
            state = state.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
            ((state >> 25) as f32 - 64.0) / 64.0
        })
        .collect()
}

fn packed_opt() -> Options {
    Options {
        num_threads: 4,
        lightmode: false,
        use_packing_layout: true,
        ..Options::reference()
    }
}

fn assert_close(a: &[f32], b: &[f32], tol: f32) {
    assert_eq!(a.len(), b.len());
    for (i, (x, y)) in a.iter().zip(b).enumerate() {
        assert!((x - y).abs() <= tol * (1.0 + y.abs()), "index {i}: {x} vs {y}");
    }
}

fn weights(w: Vec<f32>, bias: Option<Vec<f32>>) -> MatArrayModelBin {
    let mut mats = vec![Mat::from_f32_1d(w.len(), &w).unwrap()];
    if let Some(b) = bias {
        mats.push(Mat::from_f32_1d(b.len(), &b).unwrap());
    }
    MatArrayModelBin::new(mats)
}

fn conv(params: &str, w: Vec<f32>, bias: Vec<f32>, opt: &Options) -> Convolution {
    let mut op = Convolution::load_param(&ParamDict::parse(params).unwrap()).unwrap();
    op.load_model(&mut weights(w, Some(bias))).unwrap();
    op.create_pipeline(opt, &Capabilities::portable()).unwrap();
    op
}

// ── Packing ──────────────────────────────────────────────────

#[test]
fn test_packing_round_trip_preserves_values() {
    init_tracing();
    let data = fill(3 * 2 * 8, 1);
    let src = Mat::from_f32_3d(3, 2, 8, &data).unwrap();
    let opt = Options::reference();
    for pack in [4, 8] {
        let packed = convert_packing(&src, pack, &opt);
        assert_eq!((packed.c(), packed.elempack()), (8 / pack, pack));
        let back = convert_packing(&packed, 1, &opt);
        assert_eq!(back.to_vec_f32(), data);
    }
}

// ── Convolution ──────────────────────────────────────────────

#[test]
fn test_packed_convolution_matches_reference() {
    init_tracing();
    let (inch, outch) = (8, 8);
    let w = fill(outch * inch * 9, 2);
    let bias = fill(outch, 3);
    let input = Mat::from_f32_3d(6, 5, inch, &fill(6 * 5 * inch, 4)).unwrap();
    let params = "0=8 1=3 3=1 4=1 5=1 6=576";

    let packed = conv(params, w.clone(), bias.clone(), &packed_opt());
    let reference = conv(params, w, bias, &Options::reference());

    let a = packed.forward(&input, &packed_opt()).unwrap();
    let b = reference.forward(&input, &Options::reference()).unwrap();
    assert_eq!(a.elempack(), 4);
    assert_eq!(b.elempack(), 1);
    assert_eq!((a.w(), a.h(), a.c() * a.elempack()), (b.w(), b.h(), b.c()));
    assert_close(&a.to_vec_f32(), &b.to_vec_f32(), 1e-4);
}

#[test]
fn test_pack1_to_pack4_fast_path_matches_reference() {
    init_tracing();
    let w = fill(8 * 3 * 9, 5);
    let bias = fill(8, 6);
    let input = Mat::from_f32_3d(7, 7, 3, &fill(7 * 7 * 3, 7)).unwrap();
    for stride in [1, 2] {
        let params = format!("0=8 1=3 3={stride} 4=-233 5=1 6=216");
        let packed = conv(&params, w.clone(), bias.clone(), &packed_opt());
        let reference = conv(&params, w.clone(), bias.clone(), &Options::reference());
        let a = packed.forward(&input, &packed_opt()).unwrap();
        let b = reference.forward(&input, &Options::reference()).unwrap();
        assert_close(&a.to_vec_f32(), &b.to_vec_f32(), 1e-4);
    }
}

#[test]
fn test_fp16_storage_rejects_fp32_input_and_tracks_fp32() {
    init_tracing();
    let caps = Capabilities::portable().with_fp16_storage(true);
    let opt = Options {
        use_fp16_storage: true,
        ..Options::reference()
    };
    let w = fill(4 * 4 * 9, 8);
    let bias = fill(4, 9);
    let mut op = Convolution::load_param(&ParamDict::parse("0=4 1=3 4=1 5=1 6=144").unwrap()).unwrap();
    op.load_model(&mut weights(w.clone(), Some(bias.clone()))).unwrap();
    op.create_pipeline(&opt, &caps).unwrap();

    let input = Mat::from_f32_3d(5, 4, 4, &fill(5 * 4 * 4, 10)).unwrap();
    let err = op.forward(&input, &opt).unwrap_err();
    assert!(matches!(err, LayerError::PrecisionMismatch { .. }));
    assert_eq!(err.code(), -1);

    let half = cast_float32_to_float16(&input, &opt);
    let out = op.forward(&half, &opt).unwrap();
    assert_eq!(out.elembits(), 16);
    let out = cast_float16_to_float32(&out, &opt);

    let reference = conv("0=4 1=3 4=1 5=1 6=144", w, bias, &Options::reference());
    let expected = reference.forward(&input, &Options::reference()).unwrap();
    assert_close(&out.to_vec_f32(), &expected.to_vec_f32(), 2e-2);
}

/// The two 16-bit storage formats a layer can run in.
#[derive(Debug, Clone, Copy)]
enum Half {
    Fp16,
    Bf16,
}

impl Half {
    /// Device facts and options that select this format, packed or not.
    fn setup(self, packing: bool) -> (Capabilities, Options) {
        let base = Options {
            use_packing_layout: packing,
            ..Options::reference()
        };
        match self {
            Half::Fp16 => (
                Capabilities::portable().with_fp16_storage(true),
                Options {
                    use_fp16_storage: true,
                    ..base
                },
            ),
            Half::Bf16 => (
                Capabilities::portable().with_bf16_storage(true),
                Options {
                    use_bf16_storage: true,
                    ..base
                },
            ),
        }
    }

    fn narrow(self, m: &Mat, opt: &Options) -> Mat {
        match self {
            Half::Fp16 => cast_float32_to_float16(m, opt),
            Half::Bf16 => cast_float32_to_bfloat16(m, opt),
        }
    }

    fn widen(self, m: &Mat, opt: &Options) -> Vec<f32> {
        match self {
            Half::Fp16 => cast_float16_to_float32(m, opt).to_vec_f32(),
            Half::Bf16 => cast_bfloat16_to_float32(m, opt).to_vec_f32(),
        }
    }
}

#[test]
fn test_convolution_in_16bit_storage_tracks_fp32() {
    init_tracing();
    let params = ParamDict::parse("0=8 1=3 4=1 5=1 6=576").unwrap();
    let (w, bias) = (fill(8 * 8 * 9, 30), fill(8, 31));
    let input = Mat::from_f32_3d(6, 5, 8, &fill(6 * 5 * 8, 32)).unwrap();
    let expected = conv("0=8 1=3 4=1 5=1 6=576", w.clone(), bias.clone(), &Options::reference())
        .forward(&input, &Options::reference())
        .unwrap()
        .to_vec_f32();

    for half in [Half::Fp16, Half::Bf16] {
        for packing in [false, true] {
            let (caps, opt) = half.setup(packing);
            let mut op = Convolution::load_param(&params).unwrap();
            op.load_model(&mut weights(w.clone(), Some(bias.clone()))).unwrap();
            op.create_pipeline(&opt, &caps).unwrap();
            let out = op.forward(&half.narrow(&input, &opt), &opt).unwrap();
            assert_eq!(out.elembits(), 16, "{half:?}");
            assert_eq!(out.elempack(), if packing { 4 } else { 1 }, "{half:?}");
            assert_close(&half.widen(&out, &opt), &expected, 2e-2);
        }
    }
}

#[test]
fn test_deconvolution_in_16bit_storage_tracks_fp32() {
    init_tracing();
    let params = ParamDict::parse("0=8 1=3 3=2 4=1 5=1 6=288 18=1").unwrap();
    let (w, bias) = (fill(8 * 4 * 9, 33), fill(8, 34));
    let build = |opt: &Options, caps: &Capabilities| {
        let mut op = Deconvolution::load_param(&params).unwrap();
        op.load_model(&mut weights(w.clone(), Some(bias.clone()))).unwrap();
        op.create_pipeline(opt, caps).unwrap();
        op
    };
    let input = Mat::from_f32_3d(4, 3, 4, &fill(4 * 3 * 4, 35)).unwrap();
    let expected = build(&Options::reference(), &Capabilities::portable())
        .forward(&input, &Options::reference())
        .unwrap();

    for half in [Half::Fp16, Half::Bf16] {
        for packing in [false, true] {
            let (caps, opt) = half.setup(packing);
            let out = build(&opt, &caps).forward(&half.narrow(&input, &opt), &opt).unwrap();
            assert_eq!(out.elembits(), 16, "{half:?}");
            assert_eq!((out.w(), out.h()), (expected.w(), expected.h()));
            assert_eq!(out.elempack(), if packing { 4 } else { 1 }, "{half:?}");
            assert_close(&half.widen(&out, &opt), &expected.to_vec_f32(), 2e-2);
        }
    }
}

// ── Depthwise and groups ─────────────────────────────────────

#[test]
fn test_depthwise_equals_per_channel_convolutions() {
    init_tracing();
    let ch = 8;
    let w = fill(ch * 9, 11);
    let bias = fill(ch, 12);
    let data = fill(5 * 6 * ch, 13);
    let input = Mat::from_f32_3d(5, 6, ch, &data).unwrap();

    let mut dw = ConvolutionDepthWise::load_param(&ParamDict::parse("0=8 1=3 4=-233 5=1 6=72 7=8").unwrap()).unwrap();
    dw.load_model(&mut weights(w.clone(), Some(bias.clone()))).unwrap();
    dw.create_pipeline(&packed_opt(), &Capabilities::portable()).unwrap();
    assert!(dw.is_depthwise());
    let out = dw.forward(&input, &packed_opt()).unwrap();
    assert_eq!(out.elempack(), 4);
    let out = out.to_vec_f32();

    let plane = 5 * 6;
    for c in 0..ch {
        let single = conv(
            "0=1 1=3 4=-233 5=1 6=9",
            w[c * 9..(c + 1) * 9].to_vec(),
            vec![bias[c]],
            &Options::reference(),
        );
        let expected = single.forward(&input.channel_range(c, 1), &Options::reference()).unwrap();
        assert_eq!(&out[c * plane..(c + 1) * plane], expected.to_vec_f32().as_slice(), "channel {c}");
    }
}

#[test]
fn test_repeated_forward_is_bit_identical() {
    init_tracing();
    let mut op = ConvolutionDepthWise::load_param(&ParamDict::parse("0=8 1=3 4=-233 5=1 6=144 7=4").unwrap()).unwrap();
    op.load_model(&mut weights(fill(144, 14), Some(fill(8, 15)))).unwrap();
    op.create_pipeline(&packed_opt(), &Capabilities::portable()).unwrap();
    assert!(!op.is_depthwise());

    let input = Mat::from_f32_3d(9, 7, 8, &fill(9 * 7 * 8, 16)).unwrap();
    let first = op.forward(&input, &packed_opt()).unwrap().to_vec_f32();
    for _ in 0..3 {
        let again = op.forward(&input, &packed_opt()).unwrap().to_vec_f32();
        assert!(first.iter().zip(&again).all(|(a, b)| a.to_bits() == b.to_bits()));
    }
}

// ── Deconvolution ────────────────────────────────────────────

#[test]
fn test_pointwise_deconvolution_is_a_channel_mix() {
    init_tracing();
    let mut op = Deconvolution::load_param(&ParamDict::parse("0=1 1=1 5=1 6=2").unwrap()).unwrap();
    op.load_model(&mut weights(vec![2.0, 0.5], Some(vec![1.0]))).unwrap();
    op.create_pipeline(&Options::reference(), &Capabilities::portable()).unwrap();

    let a = [1.0, 2.0, 3.0, -1.0, 0.0, 4.0];
    let b = [2.0, -4.0, 0.0, 6.0, 8.0, 2.0];
    let data: Vec<f32> = a.iter().chain(&b).copied().collect();
    let out = op.forward(&Mat::from_f32_3d(3, 2, 2, &data).unwrap(), &Options::reference()).unwrap();
    let expected: Vec<f32> = a.iter().zip(&b).map(|(x, y)| 1.0 + 2.0 * x + 0.5 * y).collect();
    assert_eq!((out.w(), out.h(), out.c()), (3, 2, 1));
    assert_eq!(out.to_vec_f32(), expected);
}

#[test]
fn test_packed_deconvolution_matches_reference() {
    init_tracing();
    let params = ParamDict::parse("0=8 1=3 3=2 4=1 5=1 6=288 18=1").unwrap();
    let w = fill(8 * 4 * 9, 17);
    let bias = fill(8, 18);
    let build = |opt: &Options| {
        let mut op = Deconvolution::load_param(&params).unwrap();
        op.load_model(&mut weights(w.clone(), Some(bias.clone()))).unwrap();
        op.create_pipeline(opt, &Capabilities::portable()).unwrap();
        op
    };
    let input = Mat::from_f32_3d(4, 3, 4, &fill(4 * 3 * 4, 19)).unwrap();
    let a = build(&packed_opt()).forward(&input, &packed_opt()).unwrap();
    let b = build(&Options::reference()).forward(&input, &Options::reference()).unwrap();
    assert_eq!((a.w(), a.h()), (b.w(), b.h()));
    assert_close(&a.to_vec_f32(), &b.to_vec_f32(), 1e-4);
}

// ── GPU slice ────────────────────────────────────────────────

#[test]
fn test_gpu_slice_splits_width_into_pack4_halves() {
    init_tracing();
    let device = VkDevice::host(MemoryBudget::from_mb(4));
    let opt = Options::reference();
    let mut op = SliceVulkan::load_param(&ParamDict::parse("-23300=2,-233,-233").unwrap())
        .unwrap()
        .with_shapes(ShapeHint::new_1d(8), vec![ShapeHint::new_1d(4), ShapeHint::new_1d(4)]);
    op.create_pipeline(&device, &opt).unwrap();

    let data: Vec<f32> = (0..8).map(|v| v as f32 * 1.5).collect();
    let mut cmd = VkCompute::new(&device);
    let src = cmd.record_upload(&Mat::from_f32_1d(8, &data).unwrap()).unwrap();
    let tops = op.forward(&src, &mut cmd, &opt).unwrap();
    assert_eq!(tops.iter().map(VkMat::elempack).collect::<Vec<_>>(), vec![4, 4]);
    let offsets: Vec<i32> = cmd
        .dispatches()
        .filter(|d| d.pipeline.shader.is_slice())
        .map(|d| d.constants[12])
        .collect();
    assert_eq!(offsets, vec![0, 1]);

    for top in &tops {
        cmd.record_download(top);
    }
    let out = cmd.submit_and_wait().unwrap();
    assert_eq!(out[0].to_vec_f32(), data[..4].to_vec());
    assert_eq!(out[1].to_vec_f32(), data[4..].to_vec());
    op.destroy_pipeline();
}

// ── Layer stream ─────────────────────────────────────────────

fn f32_bytes(values: &[f32]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_le_bytes()).collect()
}

#[test]
fn test_param_stream_runs_conv_then_slice() {
    init_tracing();
    let stream = "7767517\n\
                  2 3\n\
                  Convolution conv0 1 1 data c0 0=8 1=3 4=-233 5=1 6=72\n\
                  Slice split 1 2 c0 a b -23300=2,-233,-233\n";
    let decls = LayerDecl::parse_stream(stream).unwrap();
    assert_eq!(decls.len(), 2);

    // Weights: zero tag then raw f32, bias raw f32.
    let mut bin = 0u32.to_le_bytes().to_vec();
    bin.extend(f32_bytes(&[0.125; 72]));
    bin.extend(f32_bytes(&(0..8).map(|o| o as f32).collect::<Vec<_>>()));
    let mut mb = DataReaderModelBin::new(&bin);

    let opt = Options {
        num_threads: 2,
        ..Options::default()
    };
    let caps = Capabilities::portable();
    let mut layers = Vec::new();
    for decl in &decls {
        let mut layer = Layer::from_decl(decl, &mut mb).unwrap();
        layer.create_pipeline(&opt, &caps).unwrap();
        layers.push(layer);
    }
    assert_eq!(mb.position(), bin.len());

    let mut blobs = HashMap::new();
    blobs.insert("data".to_string(), Mat::from_f32_3d(4, 4, 1, &[1.0; 16]).unwrap());
    for (decl, layer) in decls.iter().zip(&layers) {
        let bottoms: Vec<Mat> = decl.bottoms.iter().map(|b| blobs[b].clone()).collect();
        let tops = layer.forward(&bottoms, &opt).unwrap();
        for (name, top) in decl.tops.iter().zip(tops) {
            blobs.insert(name.clone(), top);
        }
    }

    let b = &blobs["b"];
    assert_eq!(b.c() * b.elempack(), 4);
    assert!(b.shares_storage_with(&blobs["c0"]));
    let values = b.to_vec_f32();
    // Channel 4: a corner sees four ones, an interior cell nine.
    assert_eq!(values[0], 4.5);
    assert_eq!(values[5], 5.125);
}

#[test]
fn test_runtime_weight_deconvolution_through_layer() {
    init_tracing();
    let decl = LayerDecl::parse("DeconvolutionDepthWise up 2 1 data w out 0=2 1=2 3=2 7=2 28=1").unwrap();
    let mut layer = Layer::from_decl(&decl, &mut MatArrayModelBin::new(Vec::new())).unwrap();
    layer.create_pipeline(&Options::reference(), &Capabilities::portable()).unwrap();

    let input = Mat::from_f32_3d(1, 1, 2, &[1.0, 10.0]).unwrap();
    let weight = Mat::from_f32_4d(2, 2, 1, 2, &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0]).unwrap();
    let tops = layer.forward(&[input, weight], &Options::reference()).unwrap();
    assert_eq!(tops.len(), 1);
    assert_eq!(
        tops[0].to_vec_f32(),
        vec![1.0, 2.0, 3.0, 4.0, 50.0, 60.0, 70.0, 80.0]
    );
}

// ── Failure codes ────────────────────────────────────────────

#[test]
fn test_empty_input_reports_allocation_code_for_every_layer() {
    init_tracing();
    let lines: [(&str, Vec<Mat>); 5] = [
        ("Convolution c 1 1 x y 0=1 1=1 6=1", vec![Mat::from_f32_1d(1, &[1.0]).unwrap()]),
        ("ConvolutionDepthWise d 1 1 x y 0=2 1=1 6=2 7=2", vec![Mat::from_f32_1d(2, &[1.0; 2]).unwrap()]),
        ("Deconvolution e 1 1 x y 0=1 1=1 6=1", vec![Mat::from_f32_1d(1, &[1.0]).unwrap()]),
        ("DeconvolutionDepthWise f 1 1 x y 0=2 1=1 6=2 7=2", vec![Mat::from_f32_1d(2, &[1.0; 2]).unwrap()]),
        ("Slice s 1 2 x a b -23300=2,-233,-233", Vec::new()),
    ];
    for (line, mats) in lines {
        let decl = LayerDecl::parse(line).unwrap();
        let mut layer = Layer::from_decl(&decl, &mut MatArrayModelBin::new(mats)).unwrap();
        layer.create_pipeline(&packed_opt(), &Capabilities::portable()).unwrap();
        let err = layer.forward(&[Mat::default()], &packed_opt()).unwrap_err();
        assert_eq!(err.code(), -100, "{line}");
    }
}

#[test]
fn test_exhausted_budget_reports_allocation_code() {
    init_tracing();
    let op = DeconvolutionDepthWise::load_param(&ParamDict::parse("0=4 1=3 3=2 6=36 7=4").unwrap());
    let mut op = op.unwrap();
    op.load_model(&mut weights(fill(36, 20), None)).unwrap();
    op.create_pipeline(&Options::reference(), &Capabilities::portable()).unwrap();

    let opt = Options {
        blob_budget: Some("64B".to_string()),
        ..Options::reference()
    }
    .with_budget_pools()
    .unwrap();
    let input = Mat::from_f32_3d(4, 4, 4, &fill(64, 21)).unwrap();
    let err = op.forward(&input, &opt).unwrap_err();
    assert_eq!(err.code(), -100);
}
