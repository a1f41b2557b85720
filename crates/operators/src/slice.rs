// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Slice: split one tensor into several along an axis.
//!
//! Lengths come either from `slices` (param 0, where `-233` splits what is
//! left evenly over the remaining outputs) or from split `indices` (param
//! 2, negative values count from the end, the last output takes the
//! remainder). Param 1 is the axis, negative counting from the last.

use crate::error::{LayerError, Result};
use kernels::slice_copy;
use param_ir::{ParamDict, AUTO_PAD};
use tensor_core::{convert_packing, Mat, Options};

/// Normalises a possibly negative `axis` against a rank `dims` tensor.
pub(crate) fn resolve_axis(axis: i32, dims: usize) -> Result<usize> {
    let positive = if axis < 0 { axis + dims as i32 } else { axis };
    if positive < 0 || positive >= dims as i32 {
        return Err(LayerError::InvalidParam(format!("axis {axis} on a rank {dims} tensor")));
    }
    Ok(positive as usize)
}

/// Stored extent of `axis`, outermost first. Extents are `[w, h, d, c]`.
pub(crate) fn axis_extent(dims: usize, extents: [usize; 4], axis: usize) -> usize {
    let [w, h, d, c] = extents;
    match (dims, axis) {
        (1, _) => w,
        (2, 0) => h,
        (2, _) => w,
        (3, 0) | (4, 0) => c,
        (3, 1) => h,
        (4, 1) => d,
        (4, 2) => h,
        _ => w,
    }
}

/// `extents` with `axis` replaced by `n`.
pub(crate) fn with_axis_extent(dims: usize, extents: [usize; 4], axis: usize, n: usize) -> [usize; 4] {
    let [w, h, d, c] = extents;
    match (dims, axis) {
        (1, _) => [n, h, d, c],
        (2, 0) => [w, n, d, c],
        (2, _) => [n, h, d, c],
        (3, 0) | (4, 0) => [w, h, d, n],
        (3, 1) => [w, n, d, c],
        (4, 1) => [w, h, n, c],
        (4, 2) => [w, n, d, c],
        _ => [n, h, d, c],
    }
}

/// Logical output lengths for an axis of `len` elements.
pub(crate) fn slice_lengths(slices: &[i32], indices: Option<&[i32]>, len: usize) -> Result<Vec<usize>> {
    let len = len as i64;
    let mut lengths = Vec::new();
    let mut q = 0i64;
    match indices {
        Some(indices) => {
            let tops = indices.len() + 1;
            for i in 0..tops {
                let slice = if i == tops - 1 {
                    len - q
                } else {
                    let at = indices[i] as i64;
                    let at = if at < 0 { len + at } else { at };
                    at - q
                };
                lengths.push(slice);
                q += slice;
            }
        }
        None => {
            let tops = slices.len();
            for (i, &s) in slices.iter().enumerate() {
                let slice = if s == AUTO_PAD {
                    (len - q) / (tops - i) as i64
                } else {
                    s as i64
                };
                lengths.push(slice);
                q += slice;
            }
        }
    }

    if lengths.is_empty() || q > len || lengths.iter().any(|&s| s < 1) {
        return Err(LayerError::InvalidParam(format!(
            "slice lengths {lengths:?} do not fit an axis of {len}"
        )));
    }
    Ok(lengths.into_iter().map(|s| s as usize).collect())
}

/// Pack a CPU slice output is stored in when its length breaks the
/// source's pack alignment.
fn top_pack(len: usize, elempack: usize) -> usize {
    [elempack, 4, 1]
        .into_iter()
        .find(|&p| p <= elempack && len % p == 0)
        .unwrap_or(1)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Slice {
    pub slices: Vec<i32>,
    pub axis: i32,
    pub indices: Option<Vec<i32>>,
}

impl Slice {
    pub fn load_param(pd: &ParamDict) -> Result<Self> {
        let slices = pd.get_int_array(0).map(<[i32]>::to_vec).unwrap_or_default();
        let indices = pd.get_int_array(2).map(<[i32]>::to_vec).filter(|v| !v.is_empty());
        if slices.is_empty() && indices.is_none() {
            return Err(LayerError::InvalidParam("slice needs slices or indices".to_string()));
        }
        Ok(Self {
            slices,
            axis: pd.get_int(1, 0),
            indices,
        })
    }

    /// Number of outputs a forward call produces.
    pub fn num_outputs(&self) -> usize {
        match &self.indices {
            Some(indices) => indices.len() + 1,
            None => self.slices.len(),
        }
    }

    pub fn forward(&self, bottom: &Mat, opt: &Options) -> Result<Vec<Mat>> {
        if bottom.is_empty() {
            return Err(LayerError::Allocation);
        }
        let dims = bottom.dims();
        let axis = resolve_axis(self.axis, dims)?;
        let elempack = bottom.elempack();
        let extents = [bottom.w(), bottom.h(), bottom.d(), bottom.c()];
        let packed = axis == 0;
        let len = axis_extent(dims, extents, axis) * if packed { elempack } else { 1 };
        let lengths = slice_lengths(&self.slices, self.indices.as_deref(), len)?;
        let threads = opt.resolve_threads();

        if !packed {
            let mut tops = Vec::with_capacity(lengths.len());
            let mut q = 0;
            for n in lengths {
                let [w, h, d, c] = with_axis_extent(dims, extents, axis, n);
                let mut top = Mat::new_dims(dims, w, h, d, c, bottom.elemsize(), elempack, opt.blob());
                if top.is_empty() {
                    return Err(LayerError::Allocation);
                }
                slice_copy(bottom, &mut top, axis, q, threads);
                tops.push(top);
                q += n;
            }
            return Ok(tops);
        }

        if lengths.iter().all(|n| n % elempack == 0) {
            let mut tops = Vec::with_capacity(lengths.len());
            let mut q = 0;
            for n in lengths {
                let (start, units) = (q / elempack, n / elempack);
                let top = if dims >= 3 {
                    bottom.channel_range(start, units)
                } else {
                    let [w, h, d, c] = with_axis_extent(dims, extents, 0, units);
                    let mut top = Mat::new_dims(dims, w, h, d, c, bottom.elemsize(), elempack, opt.blob());
                    if top.is_empty() {
                        return Err(LayerError::Allocation);
                    }
                    slice_copy(bottom, &mut top, 0, start, threads);
                    top
                };
                tops.push(top);
                q += n;
            }
            return Ok(tops);
        }

        // Cuts fall inside packed units: split a pack1 copy, then repack.
        let unpacked = convert_packing(bottom, 1, &opt.scratch());
        if unpacked.is_empty() || unpacked.elempack() != 1 {
            return Err(LayerError::Allocation);
        }
        let lane = bottom.elemsize() / elempack;
        let unpacked_extents = with_axis_extent(dims, extents, 0, len);
        let mut tops = Vec::with_capacity(lengths.len());
        let mut q = 0;
        for n in lengths {
            let out_pack = top_pack(n, elempack);
            let alloc = if out_pack == 1 { opt.blob() } else { opt.workspace() };
            let [w, h, d, c] = with_axis_extent(dims, unpacked_extents, 0, n);
            let mut top = Mat::new_dims(dims, w, h, d, c, lane, 1, alloc);
            if top.is_empty() {
                return Err(LayerError::Allocation);
            }
            slice_copy(&unpacked, &mut top, 0, q, threads);
            if out_pack > 1 {
                top = convert_packing(&top, out_pack, opt);
                if top.is_empty() {
                    return Err(LayerError::Allocation);
                }
            }
            tops.push(top);
            q += n;
        }
        Ok(tops)
    }
}
