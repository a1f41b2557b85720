// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! # vk-dispatch
//!
//! Compute-shader dispatch for device-side operators.
//!
//! # Key Components
//!
//! - [`ShaderType`]: fixed integer tags for every shader variant.
//! - [`Pipeline`]: shader + specialization constants + local size.
//! - [`VkMat`]: a tensor in device memory, geometry identical to [`tensor_core::Mat`].
//! - [`VkCompute`]: command buffer: record uploads, dispatches and
//!   downloads, then submit once.
//! - [`VkDevice`]: shared device handle with a pipeline cache and
//!   device-side [`VkDevice::convert_packing`].
//! - [`ComputeDevice`] / [`HostDevice`]: the backend seam and its
//!   host-emulated implementation.
//!
//! # Example
//! ```
//! use memory_manager::MemoryBudget;
//! use tensor_core::Mat;
//! use vk_dispatch::{VkCompute, VkDevice};
//!
//! let device = VkDevice::host(MemoryBudget::from_mb(8));
//! let data: Vec<f32> = (0..8).map(|v| v as f32).collect();
//! let mut cmd = VkCompute::new(&device);
//!
//! let x = cmd.record_upload(&Mat::from_f32_1d(8, &data).unwrap()).unwrap();
//! let packed = device.convert_packing(&x, 4, &mut cmd).unwrap();
//! cmd.record_download(&packed);
//!
//! let out = cmd.submit_and_wait().unwrap();
//! assert_eq!(out[0].elempack(), 4);
//! assert_eq!(out[0].to_vec_f32(), data);
//! ```

mod command;
mod device;
mod error;
mod host;
mod pipeline;
mod shader;
mod vkmat;

pub use command::{Command, Dispatch, VkCompute};
pub use device::{ComputeDevice, DeviceInfo, VkDevice};
pub use error::{Result, VkError, ALLOCATION_FAILED};
pub use host::HostDevice;
pub use pipeline::Pipeline;
pub use shader::{LocalSize, ShaderType};
pub use vkmat::VkMat;
