// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! A compute device emulated on the host.
//!
//! Device memory comes from a budgeted [`MemoryPool`], so exhausting the
//! device heap surfaces as [`VkError::Allocation`] just like a real driver
//! refusing `vkAllocateMemory`. Shaders are interpreted invocation by
//! invocation with the same indexing the GLSL sources use.
//!
//! Both shader families handled here are lane gathers. Each destination
//! invocation `(x, y, z)` writes its `P_dst` lanes. Along the packed axis
//! lane `l` of unit `t` is logical element `t·P_dst + l`, which reads
//! source logical element `t·P_dst + l + offset·P_src`. Along any other
//! axis the coordinate moves by `offset` and lanes map one to one.

use crate::device::{ComputeDevice, DeviceInfo};
use crate::error::{Result, VkError};
use crate::pipeline::{psc, Pipeline};
use crate::vkmat::VkMat;
use memory_manager::{MemoryBudget, MemoryPool};
use tensor_core::{parallel, Mat};

pub struct HostDevice {
    info: DeviceInfo,
    heap: MemoryPool,
    num_threads: usize,
}

impl HostDevice {
    pub fn new(budget: MemoryBudget) -> Self {
        Self::with_info(DeviceInfo::host(), budget)
    }

    pub fn with_info(info: DeviceInfo, budget: MemoryBudget) -> Self {
        let num_threads = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        Self {
            info,
            heap: MemoryPool::named("device", budget),
            num_threads,
        }
    }

    /// Pool standing in for device-local memory.
    pub fn heap(&self) -> &MemoryPool {
        &self.heap
    }
}

impl ComputeDevice for HostDevice {
    fn info(&self) -> &DeviceInfo {
        &self.info
    }

    fn create_buffer(
        &self,
        dims: usize,
        extents: [usize; 4],
        elemsize: usize,
        elempack: usize,
    ) -> Result<VkMat> {
        let [w, h, d, c] = extents;
        let buffer = Mat::new_dims(dims, w, h, d, c, elemsize, elempack, Some(&self.heap));
        if buffer.is_empty() {
            return Err(VkError::Allocation {
                bytes: w * h * d * c * elemsize,
            });
        }
        Ok(VkMat::from_buffer(buffer))
    }

    fn prepare(&self, pipeline: &Pipeline) -> Result<()> {
        if pipeline.local_size.invocations() > self.info.max_workgroup_invocations {
            return Err(VkError::InvalidDispatch(format!(
                "{:?} local size {:?} exceeds {} invocations",
                pipeline.shader, pipeline.local_size, self.info.max_workgroup_invocations
            )));
        }
        Ok(())
    }

    fn write(&self, src: &Mat, dst: &VkMat) -> Result<()> {
        copy_planes(src, &mut *dst.write_buffer()?)
    }

    fn read(&self, src: &VkMat, alloc: Option<&MemoryPool>) -> Result<Mat> {
        let out = src.read_buffer()?.deep_clone(alloc);
        if out.is_empty() {
            return Err(VkError::Allocation {
                bytes: src.total() * src.elemsize(),
            });
        }
        Ok(out)
    }

    fn dispatch(&self, pipeline: &Pipeline, bindings: &[VkMat], constants: &[i32]) -> Result<()> {
        let [src, dst] = bindings else {
            return Err(VkError::Layout {
                shader: pipeline.shader,
                what: "bindings",
                expected: pipeline.binding_count(),
                actual: bindings.len(),
            });
        };
        if src.same_buffer(dst) {
            return Err(VkError::InvalidDispatch(format!(
                "{:?} binds one buffer as both source and destination",
                pipeline.shader
            )));
        }
        let plan = GatherPlan::resolve(pipeline, src, dst, constants)?;
        // Distinct buffers, so the two locks never contend with each other.
        let from = src.read_buffer()?;
        let mut to = dst.write_buffer()?;
        plan.run(&from, &mut to, self.num_threads);
        Ok(())
    }
}

fn copy_planes(src: &Mat, dst: &mut Mat) -> Result<()> {
    let same = src.dims() == dst.dims()
        && src.w() == dst.w()
        && src.h() == dst.h()
        && src.d() == dst.d()
        && src.c() == dst.c()
        && src.elemsize() == dst.elemsize();
    if !same {
        return Err(VkError::InvalidDispatch(format!(
            "transfer between mismatched tensors {src:?} and {dst:?}"
        )));
    }
    let unit = src.elemsize();
    let plane = src.plane_units() * unit;
    let (src_step, dst_step) = (src.cstep() * unit, dst.cstep() * unit);
    let from = src.as_bytes();
    let to = dst.as_bytes_mut();
    for q in 0..src.c() {
        to[q * dst_step..q * dst_step + plane]
            .copy_from_slice(&from[q * src_step..q * src_step + plane]);
    }
    Ok(())
}

/// Extents in axis order, outermost (packed) axis first.
fn extents(shape: &[usize; 6]) -> Vec<usize> {
    let [dims, w, h, d, c, _] = *shape;
    match dims {
        1 => vec![w],
        2 => vec![h, w],
        3 => vec![c, h, w],
        _ => vec![c, d, h, w],
    }
}

/// A validated gather: which axis moves, by how much, between which packs.
#[derive(Debug)]
struct GatherPlan {
    axis: usize,
    offset: usize,
    src_pack: usize,
    dst_pack: usize,
}

impl GatherPlan {
    fn resolve(pipeline: &Pipeline, src: &VkMat, dst: &VkMat, constants: &[i32]) -> Result<Self> {
        let shader = pipeline.shader;
        if constants.len() != pipeline.push_constant_count() {
            return Err(VkError::Layout {
                shader,
                what: "push constants",
                expected: pipeline.push_constant_count(),
                actual: constants.len(),
            });
        }

        // Slice layout: specialization [axis, src shape, dst shape], push
        // [src shape, dst shape, offset]. Packing pushes both shapes only.
        let (src_shape, dst_shape, axis, offset): ([i32; 6], [i32; 6], i32, i32) = if shader.is_slice() {
            (
                std::array::from_fn(|i| psc(pipeline.specialization(1 + i), constants[i])),
                std::array::from_fn(|i| psc(pipeline.specialization(7 + i), constants[6 + i])),
                pipeline.specialization(0),
                constants[12],
            )
        } else {
            (
                std::array::from_fn(|i| constants[i]),
                std::array::from_fn(|i| constants[6 + i]),
                0,
                0,
            )
        };

        if src_shape != src.shape_constants() || dst_shape != dst.shape_constants() {
            return Err(VkError::InvalidDispatch(format!(
                "{shader:?} shapes {src_shape:?} -> {dst_shape:?} do not match bound {src:?} -> {dst:?}"
            )));
        }

        let dims = src.dims() as i32;
        let axis = if axis < 0 { axis + dims } else { axis };
        if dst.dims() != src.dims() || !(0..dims).contains(&axis) || offset < 0 {
            return Err(VkError::InvalidDispatch(format!(
                "{shader:?} axis {axis} offset {offset} on a rank {dims} tensor"
            )));
        }
        let (axis, offset) = (axis as usize, offset as usize);

        let (src_pack, dst_pack) = shader.packs();
        if src.elempack() != src_pack
            || dst.elempack() != dst_pack
            || src.elemsize() / src_pack != dst.elemsize() / dst_pack
        {
            return Err(VkError::InvalidDispatch(format!(
                "{shader:?} cannot bind {src:?} -> {dst:?}"
            )));
        }

        let to_usize = |s: [i32; 6]| s.map(|v| v.max(0) as usize);
        let (se, de) = (extents(&to_usize(src_shape)), extents(&to_usize(dst_shape)));
        for (k, (&s, &d)) in se.iter().zip(&de).enumerate() {
            let fits = match (k == axis, k == 0) {
                (true, true) => d * dst_pack + offset * src_pack <= s * src_pack,
                (true, false) => d + offset <= s && src_pack == dst_pack,
                (false, true) => d * dst_pack == s * src_pack,
                (false, false) => d == s,
            };
            if !fits {
                return Err(VkError::InvalidDispatch(format!(
                    "{shader:?} window {de:?}+{offset} on axis {axis} exceeds source {se:?}"
                )));
            }
        }

        Ok(Self {
            axis,
            offset,
            src_pack,
            dst_pack,
        })
    }

    fn run(&self, src: &Mat, dst: &mut Mat, num_threads: usize) {
        let dims = dst.dims();
        let (ps, pt) = (self.src_pack, self.dst_pack);
        let (unit_s, unit_t) = (src.elemsize(), dst.elemsize());
        let lane = unit_t / pt;
        let (sw, sh, s_cstep) = (src.w(), src.h(), src.cstep());
        let (dw, dh, dd) = (dst.w(), dst.h(), dst.d());
        let chunk = dst.cstep() * unit_t;
        let bytes = src.as_bytes();

        let (axis, offset) = (self.axis, self.offset);
        parallel::for_each_chunk_mut(dst.as_bytes_mut(), chunk, num_threads, |q, out| {
            for z in 0..dd {
                for y in 0..dh {
                    for x in 0..dw {
                        let coords = match dims {
                            1 => [x, 0, 0, 0],
                            2 => [y, x, 0, 0],
                            3 => [q, y, x, 0],
                            _ => [q, z, y, x],
                        };
                        let to = ((z * dh + y) * dw + x) * unit_t;
                        for l in 0..pt {
                            let mut s = coords;
                            let src_lane = if axis == 0 {
                                let logical = coords[0] * pt + l + offset * ps;
                                s[0] = logical / ps;
                                logical % ps
                            } else {
                                s[axis] += offset;
                                l
                            };
                            let unit = match dims {
                                1 => s[0],
                                2 => s[0] * sw + s[1],
                                3 => s[0] * s_cstep + s[1] * sw + s[2],
                                _ => s[0] * s_cstep + (s[1] * sh + s[2]) * sw + s[3],
                            };
                            let from = unit * unit_s + src_lane * lane;
                            out[to + l * lane..to + (l + 1) * lane]
                                .copy_from_slice(&bytes[from..from + lane]);
                        }
                    }
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shader::{LocalSize, ShaderType};

    fn device() -> HostDevice {
        HostDevice::new(MemoryBudget::from_mb(16))
    }

    fn upload(dev: &HostDevice, m: &Mat) -> VkMat {
        let v = dev
            .create_buffer(m.dims(), [m.w(), m.h(), m.d(), m.c()], m.elemsize(), m.elempack())
            .unwrap();
        dev.write(m, &v).unwrap();
        v
    }

    #[test]
    fn test_exhausted_heap_is_allocation_error() {
        let dev = HostDevice::new(MemoryBudget::from_bytes(64));
        let err = dev.create_buffer(1, [1024, 1, 1, 1], 4, 1).unwrap_err();
        assert_eq!(err.code(), -100);
    }

    #[test]
    fn test_packing_shader_matches_host_conversion() {
        let dev = device();
        let data: Vec<f32> = (0..3 * 2 * 8).map(|v| v as f32).collect();
        let src = upload(&dev, &Mat::from_f32_3d(3, 2, 8, &data).unwrap());
        let dst = dev.create_buffer(3, [3, 2, 1, 2], 16, 4).unwrap();
        let pipeline = Pipeline::new(ShaderType::PackingPack1to4, vec![], LocalSize::for_rank(3));
        let mut constants = src.shape_constants().to_vec();
        constants.extend(dst.shape_constants());
        dev.dispatch(&pipeline, &[src, dst.clone()], &constants).unwrap();
        let out = dev.read(&dst, None).unwrap();
        assert_eq!(out.elempack(), 4);
        assert_eq!(out.to_vec_f32(), data);
    }

    #[test]
    fn test_slice_reads_packed_offset() {
        let dev = device();
        let data: Vec<f32> = (0..16).map(|v| v as f32).collect();
        // 16 logical rows of width 1, stored pack4.
        let packed = tensor_core::convert_packing(
            &Mat::from_f32_2d(1, 16, &data).unwrap(),
            4,
            &tensor_core::Options::reference(),
        );
        let src = upload(&dev, &packed);
        let dst = dev.create_buffer(2, [1, 1, 1, 1], 32, 8).unwrap();
        let pipeline = Pipeline::new(ShaderType::SlicePack4to8, vec![0; 13], LocalSize::for_rank(2));
        let mut constants = src.shape_constants().to_vec();
        constants.extend(dst.shape_constants());
        constants.push(2); // two pack4 rows in
        dev.dispatch(&pipeline, &[src, dst.clone()], &constants).unwrap();
        let expect: Vec<f32> = (8..16).map(|v| v as f32).collect();
        assert_eq!(dev.read(&dst, None).unwrap().to_vec_f32(), expect);
    }

    #[test]
    fn test_window_past_source_is_rejected() {
        let dev = device();
        let src = upload(&dev, &Mat::from_f32_1d(4, &[0.0; 4]).unwrap());
        let dst = dev.create_buffer(1, [3, 1, 1, 1], 4, 1).unwrap();
        let pipeline = Pipeline::new(ShaderType::Slice, vec![0; 13], LocalSize::for_rank(1));
        let mut constants = src.shape_constants().to_vec();
        constants.extend(dst.shape_constants());
        constants.push(2);
        let err = dev.dispatch(&pipeline, &[src, dst], &constants).unwrap_err();
        assert!(matches!(err, VkError::InvalidDispatch(_)));
    }
}
