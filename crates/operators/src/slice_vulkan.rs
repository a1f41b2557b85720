// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Slice on a compute device.
//!
//! Every output gets its own pack (8 when allowed and the length divides,
//! else 4, else 1). Along the packed axis the source is converted at most
//! once, to the smallest output pack, and each output is then gathered by
//! the shader variant for `(unified pack, output pack)`. The offset handed
//! to each dispatch is counted in units of the unified pack, so it grows by
//! `extent * out_pack / unified` per output.
//!
//! Pipelines are built ahead of time from optional shape hints. A known
//! source shape is baked into the specialization constants and narrows the
//! set of variants; with no hints every variant an input could need exists.

use crate::error::{LayerError, Result};
use crate::pipeline::PipelineState;
use crate::slice::{axis_extent, resolve_axis, slice_lengths, with_axis_extent, Slice};
use param_ir::ParamDict;
use std::collections::HashMap;
use std::sync::Arc;
use tensor_core::{Mat, Options};
use vk_dispatch::{LocalSize, Pipeline, ShaderType, VkCompute, VkDevice, VkMat};

/// Logical (unpacked) extents known before the first forward call.
/// `dims == 0` means unknown.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShapeHint {
    pub dims: usize,
    pub w: usize,
    pub h: usize,
    pub d: usize,
    pub c: usize,
}

impl ShapeHint {
    pub fn new_1d(w: usize) -> Self {
        Self { dims: 1, w, h: 1, d: 1, c: 1 }
    }

    pub fn new_2d(w: usize, h: usize) -> Self {
        Self { dims: 2, w, h, d: 1, c: 1 }
    }

    pub fn new_3d(w: usize, h: usize, c: usize) -> Self {
        Self { dims: 3, w, h, d: 1, c }
    }

    pub fn new_4d(w: usize, h: usize, d: usize, c: usize) -> Self {
        Self { dims: 4, w, h, d, c }
    }

    fn packed_extent(&self) -> usize {
        match self.dims {
            1 => self.w,
            2 => self.h,
            _ => self.c,
        }
    }

    /// Pack a device tensor of this shape is stored in; 1 when unknown.
    fn pack(&self, pack8: bool) -> usize {
        if self.dims == 0 {
            1
        } else {
            shader_pack(self.packed_extent(), pack8)
        }
    }
}

fn shader_pack(n: usize, pack8: bool) -> usize {
    if pack8 && n % 8 == 0 {
        8
    } else if n % 4 == 0 {
        4
    } else {
        1
    }
}

#[derive(Debug)]
pub struct SliceVulkan {
    pub slices: Vec<i32>,
    pub axis: i32,
    pub indices: Option<Vec<i32>>,
    bottom_shape: ShapeHint,
    top_shapes: Vec<ShapeHint>,
    pipelines: HashMap<ShaderType, Arc<Pipeline>>,
    state: PipelineState,
}

impl SliceVulkan {
    pub fn load_param(pd: &ParamDict) -> Result<Self> {
        let Slice { slices, axis, indices } = Slice::load_param(pd)?;
        Ok(Self {
            slices,
            axis,
            indices,
            bottom_shape: ShapeHint::default(),
            top_shapes: Vec::new(),
            pipelines: HashMap::new(),
            state: PipelineState::Unconfigured,
        })
    }

    /// Records the shapes the pipelines may be specialised for.
    pub fn with_shapes(mut self, bottom: ShapeHint, tops: Vec<ShapeHint>) -> Self {
        self.bottom_shape = bottom;
        self.top_shapes = tops;
        self
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    /// Whether a pipeline for `shader` was created.
    pub fn has_variant(&self, shader: ShaderType) -> bool {
        self.pipelines.contains_key(&shader)
    }

    pub fn create_pipeline(&mut self, device: &VkDevice, opt: &Options) -> Result<()> {
        let shape = self.bottom_shape;
        let pack8 = opt.use_shader_pack8;
        let positive_axis = if self.axis < 0 { shape.dims as i32 + self.axis } else { self.axis };

        let elempack = shape.pack(pack8);
        let out_elempack = if positive_axis == 0 {
            self.top_shapes
                .iter()
                .map(|s| s.pack(pack8))
                .min()
                .unwrap_or(1)
        } else {
            elempack
        };

        let info = device.info();
        let fp16 = (opt.use_fp16_storage && info.support_fp16_storage)
            || (opt.use_fp16_packed && info.support_fp16_packed);
        let out_elemsize = out_elempack * if fp16 { 2 } else { 4 };

        let mut specializations = vec![0i32; 13];
        specializations[0] = self.axis;
        if shape.dims > 0 {
            let [w, h, d, c] = with_axis_extent(
                shape.dims,
                [shape.w, shape.h, shape.d, shape.c],
                0,
                shape.packed_extent() / out_elempack,
            );
            let cstep = Mat::cstep_for(shape.dims, w, h, d, out_elemsize);
            for (slot, v) in specializations[1..7].iter_mut().zip([shape.dims, w, h, d, c, cstep]) {
                *slot = v as i32;
            }
        }
        let local_size = LocalSize::for_rank(shape.dims);

        let unknown = shape.dims == 0;
        let axis_unknown = positive_axis <= 0 && unknown;
        let variants = [
            (ShaderType::Slice, unknown || out_elempack == 1),
            (ShaderType::SlicePack4, unknown || out_elempack == 4),
            (ShaderType::SlicePack1to4, axis_unknown || out_elempack == 1),
            (ShaderType::SlicePack8, pack8 && (unknown || out_elempack == 8)),
            (ShaderType::SlicePack1to8, pack8 && (axis_unknown || out_elempack == 1)),
            (ShaderType::SlicePack4to8, pack8 && (axis_unknown || out_elempack == 4)),
        ];

        self.pipelines.clear();
        for (shader, wanted) in variants {
            if wanted {
                let pipeline = device.create_pipeline(shader, specializations.clone(), local_size)?;
                self.pipelines.insert(shader, pipeline);
            }
        }
        tracing::info!(
            variants = self.pipelines.len(),
            out_elempack,
            "slice pipelines created"
        );
        self.state = PipelineState::Created;
        Ok(())
    }

    pub fn destroy_pipeline(&mut self) {
        if self.state != PipelineState::Created {
            return;
        }
        self.pipelines.clear();
        tracing::info!("slice pipelines destroyed");
        self.state = PipelineState::Destroyed;
    }

    fn pipeline(&self, unified: usize, out_pack: usize) -> Result<&Arc<Pipeline>> {
        ShaderType::slice_variant(unified, out_pack)
            .and_then(|shader| self.pipelines.get(&shader))
            .ok_or_else(|| {
                LayerError::InvalidInput(format!(
                    "no slice pipeline from pack {unified} to pack {out_pack}; shape hints disagree with the input"
                ))
            })
    }

    /// Records the gathers into `cmd`; the outputs are filled on submit.
    pub fn forward(&self, bottom: &VkMat, cmd: &mut VkCompute, opt: &Options) -> Result<Vec<VkMat>> {
        if self.state != PipelineState::Created {
            return Err(LayerError::NotReady(self.state));
        }
        if bottom.is_empty() {
            return Err(LayerError::Allocation);
        }
        let device = cmd.device().clone();
        let dims = bottom.dims();
        let axis = resolve_axis(self.axis, dims)?;
        let elempack = bottom.elempack();
        let extents = [bottom.w(), bottom.h(), bottom.d(), bottom.c()];
        let packed = axis == 0;
        let len = axis_extent(dims, extents, axis) * if packed { elempack } else { 1 };
        let lengths = slice_lengths(&self.slices, self.indices.as_deref(), len)?;

        let mut tops = Vec::with_capacity(lengths.len());
        if !packed {
            let mut offset = 0;
            for n in lengths {
                let top = device.new_vkmat(dims, with_axis_extent(dims, extents, axis, n), bottom.elemsize(), elempack)?;
                self.record(cmd, elempack, bottom, &top, offset)?;
                tops.push(top);
                offset += n;
            }
            return Ok(tops);
        }

        let lane = bottom.elemsize() / elempack;
        for &n in &lengths {
            let out_pack = shader_pack(n, opt.use_shader_pack8);
            let top = device.new_vkmat(dims, with_axis_extent(dims, extents, 0, n / out_pack), lane * out_pack, out_pack)?;
            tops.push(top);
        }
        let unified = tops.iter().map(VkMat::elempack).min().unwrap_or(1);

        let source = if elempack != unified {
            device.convert_packing(bottom, unified, cmd)?
        } else {
            bottom.clone()
        };
        if source.elempack() != unified {
            return Err(LayerError::InvalidInput(format!(
                "{bottom:?} cannot be repacked to pack {unified}"
            )));
        }

        let mut offset = 0;
        for top in &tops {
            self.record(cmd, unified, &source, top, offset)?;
            offset += axis_extent(dims, [top.w(), top.h(), top.d(), top.c()], 0) * top.elempack() / unified;
        }
        Ok(tops)
    }

    fn record(&self, cmd: &mut VkCompute, src_pack: usize, src: &VkMat, top: &VkMat, offset: usize) -> Result<()> {
        let pipeline = self.pipeline(src_pack, top.elempack())?;
        let mut constants = Vec::with_capacity(13);
        constants.extend(src.shape_constants());
        constants.extend(top.shape_constants());
        constants.push(offset as i32);
        cmd.record_pipeline(pipeline, &[src.clone(), top.clone()], &constants, top)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use memory_manager::MemoryBudget;

    fn iota(n: usize) -> Vec<f32> {
        (0..n).map(|v| v as f32).collect()
    }

    fn slice_offsets(cmd: &VkCompute) -> Vec<i32> {
        cmd.dispatches()
            .filter(|d| d.pipeline.shader.is_slice())
            .map(|d| d.constants[12])
            .collect()
    }

    #[test]
    fn test_variants_without_hints() {
        let device = VkDevice::host(MemoryBudget::unlimited());
        let pd = ParamDict::parse("-23300=2,-233,-233").unwrap();
        let mut op = SliceVulkan::load_param(&pd).unwrap();
        op.create_pipeline(&device, &Options::reference()).unwrap();
        assert!(op.has_variant(ShaderType::Slice));
        assert!(op.has_variant(ShaderType::SlicePack4));
        assert!(op.has_variant(ShaderType::SlicePack1to4));
        assert!(!op.has_variant(ShaderType::SlicePack8));

        let opt = Options {
            use_shader_pack8: true,
            ..Options::reference()
        };
        op.create_pipeline(&device, &opt).unwrap();
        assert!(ShaderType::ALL[..6].iter().all(|&s| op.has_variant(s)));
    }

    #[test]
    fn test_hints_narrow_variants() {
        let device = VkDevice::host(MemoryBudget::unlimited());
        let pd = ParamDict::parse("-23300=2,-233,-233").unwrap();
        let mut op = SliceVulkan::load_param(&pd)
            .unwrap()
            .with_shapes(ShapeHint::new_1d(8), vec![ShapeHint::new_1d(4), ShapeHint::new_1d(4)]);
        op.create_pipeline(&device, &Options::reference()).unwrap();
        assert!(op.has_variant(ShaderType::SlicePack4));
        assert!(!op.has_variant(ShaderType::Slice));
        assert!(!op.has_variant(ShaderType::SlicePack1to4));
    }

    #[test]
    fn test_mixed_packs_share_one_conversion() {
        let device = VkDevice::host(MemoryBudget::unlimited());
        let opt = Options {
            use_shader_pack8: true,
            ..Options::reference()
        };
        let mut op = SliceVulkan::load_param(&ParamDict::parse("-23300=2,8,4").unwrap()).unwrap();
        op.create_pipeline(&device, &opt).unwrap();

        let mut cmd = VkCompute::new(&device);
        let src = cmd.record_upload(&Mat::from_f32_1d(12, &iota(12)).unwrap()).unwrap();
        let tops = op.forward(&src, &mut cmd, &opt).unwrap();
        assert_eq!(tops.iter().map(VkMat::elempack).collect::<Vec<_>>(), vec![8, 4]);
        assert_eq!(cmd.dispatches().filter(|d| !d.pipeline.shader.is_slice()).count(), 1);
        assert_eq!(slice_offsets(&cmd), vec![0, 2]);

        cmd.record_download(&tops[0]);
        cmd.record_download(&tops[1]);
        let out = cmd.submit_and_wait().unwrap();
        assert_eq!(out[0].to_vec_f32(), iota(12)[..8].to_vec());
        assert_eq!(out[1].to_vec_f32(), iota(12)[8..].to_vec());
    }

    #[test]
    fn test_height_slices_keep_pack() {
        let device = VkDevice::host(MemoryBudget::unlimited());
        let mut op = SliceVulkan::load_param(&ParamDict::parse("1=1 -23300=2,1,-233").unwrap()).unwrap();
        op.create_pipeline(&device, &Options::reference()).unwrap();

        let host = tensor_core::convert_packing(
            &Mat::from_f32_3d(2, 3, 4, &iota(24)).unwrap(),
            4,
            &Options::reference(),
        );
        let mut cmd = VkCompute::new(&device);
        let src = cmd.record_upload(&host).unwrap();
        let tops = op.forward(&src, &mut cmd, &Options::reference()).unwrap();
        assert_eq!((tops[0].h(), tops[1].h()), (1, 2));
        assert!(tops.iter().all(|t| t.elempack() == 4));
        assert_eq!(slice_offsets(&cmd), vec![0, 1]);

        cmd.record_download(&tops[0]);
        let out = cmd.submit_and_wait().unwrap();
        let expect: Vec<f32> = (0..4).flat_map(|q| [q as f32 * 6.0, q as f32 * 6.0 + 1.0]).collect();
        assert_eq!(out[0].to_vec_f32(), expect);
    }

    #[test]
    fn test_device_out_of_memory_is_allocation_code() {
        let device = VkDevice::host(MemoryBudget::from_bytes(32));
        let mut op = SliceVulkan::load_param(&ParamDict::parse("-23300=2,-233,-233").unwrap()).unwrap();
        op.create_pipeline(&device, &Options::reference()).unwrap();
        let mut cmd = VkCompute::new(&device);
        let src = cmd.record_upload(&Mat::from_f32_1d(8, &iota(8)).unwrap()).unwrap();
        let err = op.forward(&src, &mut cmd, &Options::reference()).unwrap_err();
        assert_eq!(err.code(), -100);
    }

    #[test]
    fn test_forward_before_create_fails() {
        let op = SliceVulkan::load_param(&ParamDict::parse("-23300=1,-233").unwrap()).unwrap();
        let device = VkDevice::host(MemoryBudget::unlimited());
        let mut cmd = VkCompute::new(&device);
        let src = cmd.record_upload(&Mat::from_f32_1d(4, &iota(4)).unwrap()).unwrap();
        assert!(matches!(
            op.forward(&src, &mut cmd, &Options::reference()),
            Err(LayerError::NotReady(PipelineState::Unconfigured))
        ));
    }
}
