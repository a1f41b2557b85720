// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Command recording.
//!
//! Recording never touches tensor contents. Uploads, dispatches and
//! downloads queue up in a [`VkCompute`] and run, in order, only when
//! [`VkCompute::submit_and_wait`] is called.

use crate::device::VkDevice;
use crate::error::{Result, VkError};
use crate::pipeline::Pipeline;
use crate::vkmat::VkMat;
use memory_manager::MemoryPool;
use std::sync::Arc;
use tensor_core::Mat;

/// One recorded compute dispatch.
#[derive(Debug, Clone)]
pub struct Dispatch {
    pub pipeline: Arc<Pipeline>,
    pub bindings: Vec<VkMat>,
    pub constants: Vec<i32>,
    pub group_count: [u32; 3],
}

impl Dispatch {
    /// The push-constant block as the device receives it.
    pub fn constant_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.constants)
    }
}

#[derive(Debug, Clone)]
pub enum Command {
    Upload { src: Mat, dst: VkMat },
    Dispatch(Dispatch),
    Download { src: VkMat },
}

/// A command buffer bound to one device.
pub struct VkCompute {
    device: VkDevice,
    commands: Vec<Command>,
}

impl VkCompute {
    pub fn new(device: &VkDevice) -> Self {
        Self {
            device: device.clone(),
            commands: Vec::new(),
        }
    }

    pub fn device(&self) -> &VkDevice {
        &self.device
    }

    /// Allocates device memory shaped like `src` and queues the copy.
    pub fn record_upload(&mut self, src: &Mat) -> Result<VkMat> {
        let dst = self
            .device
            .new_vkmat(src.dims(), [src.w(), src.h(), src.d(), src.c()], src.elemsize(), src.elempack())?;
        self.commands.push(Command::Upload {
            src: src.clone(),
            dst: dst.clone(),
        });
        Ok(dst)
    }

    /// Queues `pipeline` over `bindings`.
    ///
    /// The workgroup count covers `dispatcher`'s extents: `w` across x,
    /// `h·d` across y and `c` across z, each divided by the local size.
    pub fn record_pipeline(
        &mut self,
        pipeline: &Arc<Pipeline>,
        bindings: &[VkMat],
        constants: &[i32],
        dispatcher: &VkMat,
    ) -> Result<()> {
        if bindings.len() != pipeline.binding_count() {
            return Err(VkError::Layout {
                shader: pipeline.shader,
                what: "bindings",
                expected: pipeline.binding_count(),
                actual: bindings.len(),
            });
        }
        if constants.len() != pipeline.push_constant_count() {
            return Err(VkError::Layout {
                shader: pipeline.shader,
                what: "push constants",
                expected: pipeline.push_constant_count(),
                actual: constants.len(),
            });
        }
        let group_count = pipeline.local_size.group_count(
            dispatcher.w(),
            dispatcher.h() * dispatcher.d(),
            dispatcher.c(),
        );
        self.commands.push(Command::Dispatch(Dispatch {
            pipeline: Arc::clone(pipeline),
            bindings: bindings.to_vec(),
            constants: constants.to_vec(),
            group_count,
        }));
        Ok(())
    }

    /// Queues a copy back to the host; the result comes out of
    /// [`VkCompute::submit_and_wait`] at the returned index.
    pub fn record_download(&mut self, src: &VkMat) -> usize {
        let slot = self.download_count();
        self.commands.push(Command::Download { src: src.clone() });
        slot
    }

    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    pub fn dispatches(&self) -> impl Iterator<Item = &Dispatch> {
        self.commands.iter().filter_map(|c| match c {
            Command::Dispatch(d) => Some(d),
            _ => None,
        })
    }

    fn download_count(&self) -> usize {
        self.commands
            .iter()
            .filter(|c| matches!(c, Command::Download { .. }))
            .count()
    }

    /// Drops everything recorded so far.
    pub fn reset(&mut self) {
        self.commands.clear();
    }

    /// Runs the recorded commands in order and blocks until done.
    ///
    /// Returns the downloads in record order. The buffer is empty
    /// afterwards, also when a command fails.
    pub fn submit_and_wait(&mut self) -> Result<Vec<Mat>> {
        self.submit_into(None)
    }

    /// As [`VkCompute::submit_and_wait`], allocating downloads from `alloc`.
    pub fn submit_into(&mut self, alloc: Option<&MemoryPool>) -> Result<Vec<Mat>> {
        let commands = std::mem::take(&mut self.commands);
        let backend = self.device.backend();
        tracing::debug!(commands = commands.len(), "submitting command buffer");

        let mut downloads = Vec::new();
        for command in commands {
            match command {
                Command::Upload { src, dst } => backend.write(&src, &dst)?,
                Command::Dispatch(d) => backend.dispatch(&d.pipeline, &d.bindings, &d.constants)?,
                Command::Download { src } => downloads.push(backend.read(&src, alloc)?),
            }
        }
        Ok(downloads)
    }
}

impl std::fmt::Debug for VkCompute {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VkCompute")
            .field("device", &self.device.info().name)
            .field("commands", &self.commands.len())
            .finish()
    }
}
