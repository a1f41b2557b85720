// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Device abstraction and the shared device handle.

use crate::command::VkCompute;
use crate::error::Result;
use crate::host::HostDevice;
use crate::pipeline::Pipeline;
use crate::shader::{LocalSize, ShaderType};
use crate::vkmat::VkMat;
use memory_manager::{MemoryBudget, MemoryPool};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tensor_core::Mat;

/// Limits and features a device reports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub name: String,
    pub max_workgroup_invocations: u32,
    pub support_fp16_storage: bool,
    pub support_fp16_packed: bool,
}

impl DeviceInfo {
    pub fn host() -> Self {
        Self {
            name: "host".to_string(),
            max_workgroup_invocations: 256,
            support_fp16_storage: true,
            support_fp16_packed: true,
        }
    }
}

/// What a backend must provide to run recorded command buffers.
///
/// Every call here happens at submit time, in record order, except
/// [`ComputeDevice::create_buffer`] and [`ComputeDevice::prepare`] which
/// run eagerly while recording.
pub trait ComputeDevice: Send + Sync {
    fn info(&self) -> &DeviceInfo;

    /// Allocates device memory for a tensor of rank `dims` with extents
    /// `[w, h, d, c]`.
    fn create_buffer(&self, dims: usize, extents: [usize; 4], elemsize: usize, elempack: usize) -> Result<VkMat>;

    /// Compiles or validates a pipeline before its first use.
    fn prepare(&self, pipeline: &Pipeline) -> Result<()>;

    /// Copies host data into device memory of identical geometry.
    fn write(&self, src: &Mat, dst: &VkMat) -> Result<()>;

    /// Copies device memory back into a new host tensor.
    fn read(&self, src: &VkMat, alloc: Option<&MemoryPool>) -> Result<Mat>;

    /// Runs one dispatch. Bindings are in shader binding order.
    fn dispatch(&self, pipeline: &Pipeline, bindings: &[VkMat], constants: &[i32]) -> Result<()>;
}

type PipelineKey = (ShaderType, Vec<i32>, LocalSize);

struct Inner {
    backend: Box<dyn ComputeDevice>,
    pipelines: Mutex<HashMap<PipelineKey, Arc<Pipeline>>>,
}

/// Shared handle to a compute device and its pipeline cache.
///
/// Clones refer to the same device. Pipelines are created once per
/// `(shader, specializations, local size)` and shared afterwards.
#[derive(Clone)]
pub struct VkDevice {
    inner: Arc<Inner>,
}

impl VkDevice {
    pub fn new(backend: impl ComputeDevice + 'static) -> Self {
        Self {
            inner: Arc::new(Inner {
                backend: Box::new(backend),
                pipelines: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Host-emulated device with a device heap of `budget`.
    pub fn host(budget: MemoryBudget) -> Self {
        Self::new(HostDevice::new(budget))
    }

    pub fn info(&self) -> &DeviceInfo {
        self.inner.backend.info()
    }

    pub(crate) fn backend(&self) -> &dyn ComputeDevice {
        self.inner.backend.as_ref()
    }

    /// Creates (or fetches from cache) a pipeline.
    ///
    /// `local_size` is shrunk to the device's invocation limit first.
    pub fn create_pipeline(
        &self,
        shader: ShaderType,
        specializations: Vec<i32>,
        local_size: LocalSize,
    ) -> Result<Arc<Pipeline>> {
        let local_size = local_size.clamp(self.info().max_workgroup_invocations);
        let key = (shader, specializations, local_size);
        if let Some(p) = self.inner.pipelines.lock().ok().and_then(|c| c.get(&key).cloned()) {
            return Ok(p);
        }

        let pipeline = Arc::new(Pipeline::new(shader, key.1.clone(), local_size));
        self.backend().prepare(&pipeline)?;
        tracing::debug!(
            shader = ?shader,
            tag = shader.tag(),
            local_size = ?local_size,
            "created compute pipeline"
        );
        if let Ok(mut cache) = self.inner.pipelines.lock() {
            cache.insert(key, Arc::clone(&pipeline));
        }
        Ok(pipeline)
    }

    /// Number of distinct pipelines created so far.
    pub fn pipeline_count(&self) -> usize {
        self.inner.pipelines.lock().map(|c| c.len()).unwrap_or(0)
    }

    /// Allocates an uninitialised device tensor.
    pub fn new_vkmat(
        &self,
        dims: usize,
        extents: [usize; 4],
        elemsize: usize,
        elempack: usize,
    ) -> Result<VkMat> {
        self.backend().create_buffer(dims, extents, elemsize, elempack)
    }

    /// Records a repack of `src` to `out_elempack` lanes per unit.
    ///
    /// Returns `src` itself when the pack already matches or the packed
    /// axis does not divide; otherwise the destination is allocated now
    /// and filled when `cmd` is submitted.
    pub fn convert_packing(&self, src: &VkMat, out_elempack: usize, cmd: &mut VkCompute) -> Result<VkMat> {
        let elempack = src.elempack();
        if src.is_empty() || elempack == out_elempack {
            return Ok(src.clone());
        }
        let Some(shader) = ShaderType::packing_variant(elempack, out_elempack) else {
            return Ok(src.clone());
        };

        let outer = match src.dims() {
            1 => src.w(),
            2 => src.h(),
            _ => src.c(),
        };
        if outer * elempack % out_elempack != 0 {
            return Ok(src.clone());
        }
        let out_outer = outer * elempack / out_elempack;
        let extents = match src.dims() {
            1 => [out_outer, 1, 1, 1],
            2 => [src.w(), out_outer, 1, 1],
            _ => [src.w(), src.h(), src.d(), out_outer],
        };
        let out_elemsize = src.elemsize() / elempack * out_elempack;
        let dst = self.new_vkmat(src.dims(), extents, out_elemsize, out_elempack)?;

        let pipeline = self.create_pipeline(shader, Vec::new(), LocalSize::for_rank(src.dims()))?;
        let mut constants = src.shape_constants().to_vec();
        constants.extend(dst.shape_constants());
        cmd.record_pipeline(&pipeline, &[src.clone(), dst.clone()], &constants, &dst)?;
        Ok(dst)
    }
}

impl std::fmt::Debug for VkDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VkDevice")
            .field("info", self.info())
            .field("pipelines", &self.pipeline_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_key_reuses_pipeline() {
        let device = VkDevice::host(MemoryBudget::unlimited());
        let a = device.create_pipeline(ShaderType::Slice, vec![1, 2], LocalSize::for_rank(1)).unwrap();
        let b = device.create_pipeline(ShaderType::Slice, vec![1, 2], LocalSize::for_rank(1)).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(device.pipeline_count(), 1);
    }

    #[test]
    fn test_local_size_is_part_of_the_key() {
        let device = VkDevice::host(MemoryBudget::unlimited());
        device.create_pipeline(ShaderType::Slice, Vec::new(), LocalSize::for_rank(1)).unwrap();
        device.create_pipeline(ShaderType::Slice, Vec::new(), LocalSize::for_rank(2)).unwrap();
        assert_eq!(device.pipeline_count(), 2);
    }
}
