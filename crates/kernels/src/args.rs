// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! The uniform kernel interface.

use crate::Activation;
use tensor_core::Mat;

/// Spatial parameters of a (de)convolution window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConvGeometry {
    pub kernel_w: usize,
    pub kernel_h: usize,
    pub dilation_w: usize,
    pub dilation_h: usize,
    pub stride_w: usize,
    pub stride_h: usize,
}

impl ConvGeometry {
    /// A `k × k` window with unit dilation and the given stride.
    pub fn square(k: usize, stride: usize) -> Self {
        Self {
            kernel_w: k,
            kernel_h: k,
            dilation_w: 1,
            dilation_h: 1,
            stride_w: stride,
            stride_h: stride,
        }
    }

    pub fn maxk(&self) -> usize {
        self.kernel_w * self.kernel_h
    }

    /// Span of the dilated window along `w`.
    pub fn extent_w(&self) -> usize {
        self.dilation_w * (self.kernel_w - 1) + 1
    }

    pub fn extent_h(&self) -> usize {
        self.dilation_h * (self.kernel_h - 1) + 1
    }

    /// Output extent of a valid convolution over an `w × h` input.
    pub fn conv_output(&self, w: usize, h: usize) -> Option<(usize, usize)> {
        if w < self.extent_w() || h < self.extent_h() {
            return None;
        }
        Some((
            (w - self.extent_w()) / self.stride_w + 1,
            (h - self.extent_h()) / self.stride_h + 1,
        ))
    }

    /// Output extent of a transposed convolution before any trimming.
    pub fn deconv_output(&self, w: usize, h: usize) -> (usize, usize) {
        (
            (w - 1) * self.stride_w + self.extent_w(),
            (h - 1) * self.stride_h + self.extent_h(),
        )
    }

    /// Whether this is the 3×3 undilated window with equal strides.
    pub fn is_3x3(&self, stride: usize) -> bool {
        self.kernel_w == 3
            && self.kernel_h == 3
            && self.dilation_w == 1
            && self.dilation_h == 1
            && self.stride_w == stride
            && self.stride_h == stride
    }

    /// Unit offsets of each tap inside a row-major plane of width `w`.
    pub(crate) fn space_offsets(&self, w: usize) -> Vec<usize> {
        let mut ofs = Vec::with_capacity(self.maxk());
        for y in 0..self.kernel_h {
            for x in 0..self.kernel_w {
                ofs.push(y * self.dilation_h * w + x * self.dilation_w);
            }
        }
        ofs
    }
}

/// Everything a kernel reads.
///
/// `weights` is a flat pack1 tensor already in the kernel's layout and lane
/// type; `bias` stays `f32` in every precision (empty means no bias).
pub struct KernelArgs<'a> {
    pub input: &'a Mat,
    pub weights: &'a Mat,
    pub bias: &'a [f32],
    pub geometry: ConvGeometry,
    pub activation: Activation,
    pub num_threads: usize,
}

impl KernelArgs<'_> {
    /// Bias of logical output channel `o`, zero without a bias term.
    #[inline]
    pub(crate) fn bias_at(&self, o: usize) -> f32 {
        self.bias.get(o).copied().unwrap_or(0.0)
    }
}

/// Signature shared by every registered kernel: fill `output`, whose
/// geometry the caller has already allocated.
pub type KernelFn = fn(&KernelArgs<'_>, &mut Mat);
