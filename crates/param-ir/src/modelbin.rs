// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Sequential readers of weight payloads.
//!
//! Operators pull their weights in a fixed order (weights, then bias, ...)
//! through a [`ModelBin`]. Every payload comes back as a flat `f32` tensor.
//!
//! On the byte stream, `kind = 0` payloads start with a 4-byte quantize
//! tag:
//!
//! | tag          | payload                                          |
//! |--------------|--------------------------------------------------|
//! | `0x01306B47` | `w` little-endian `f16` values                   |
//! | `0x000D4B38` | int8 weights, not read by this core              |
//! | `0x0002C056` | `w` raw `f32` values                             |
//! | other, bytes sum ≠ 0 | 256-entry `f32` table, then `w` `u8` indices |
//! | zero         | `w` raw `f32` values                             |
//!
//! `kind = 1` payloads are raw `f32` without a tag. Every payload is padded
//! to a multiple of 4 bytes.

use crate::ParamError;
use half::f16;
use tensor_core::Mat;

/// Quantize tag of half-precision payloads.
pub const TAG_FP16: u32 = 0x0130_6B47;

/// Quantize tag of int8 payloads.
pub const TAG_INT8: u32 = 0x000D_4B38;

/// Quantize tag of raw `f32` payloads.
pub const TAG_FP32: u32 = 0x0002_C056;

/// A source of weight tensors, read in order.
pub trait ModelBin {
    /// Next payload of `w` values. `kind` 0 expects a quantize tag, 1 raw `f32`.
    fn load(&mut self, w: usize, kind: i32) -> Result<Mat, ParamError>;
}

/// Hands out pre-built tensors in order.
///
/// Used to pass already relaid weights to the per-group sub-operators.
#[derive(Debug, Clone, Default)]
pub struct MatArrayModelBin {
    mats: Vec<Mat>,
    next: usize,
}

impl MatArrayModelBin {
    pub fn new(mats: Vec<Mat>) -> Self {
        Self { mats, next: 0 }
    }
}

impl ModelBin for MatArrayModelBin {
    fn load(&mut self, _w: usize, _kind: i32) -> Result<Mat, ParamError> {
        let m = self.mats.get(self.next).cloned().ok_or(ParamError::Exhausted(self.next))?;
        self.next += 1;
        Ok(m)
    }
}

/// Reads payloads from an in-memory weight stream.
#[derive(Debug, Clone)]
pub struct DataReaderModelBin<'a> {
    data: &'a [u8],
    pos: usize,
}

fn align4(n: usize) -> usize {
    n.div_ceil(4) * 4
}

impl<'a> DataReaderModelBin<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Bytes consumed so far.
    pub fn position(&self) -> usize {
        self.pos
    }

    fn read(&mut self, n: usize) -> Result<&'a [u8], ParamError> {
        let remaining = self.data.len() - self.pos;
        if n > remaining {
            return Err(ParamError::Truncated { needed: n, remaining });
        }
        let bytes = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(bytes)
    }

    /// Reads `n` bytes and skips the padding to the next 4-byte boundary.
    fn read_aligned(&mut self, n: usize) -> Result<&'a [u8], ParamError> {
        let bytes = self.read(n)?;
        self.read(align4(n) - n)?;
        Ok(bytes)
    }

    fn read_f32s(&mut self, w: usize) -> Result<Vec<f32>, ParamError> {
        let bytes = self.read_aligned(w * 4)?;
        Ok(bytes
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect())
    }
}

impl ModelBin for DataReaderModelBin<'_> {
    fn load(&mut self, w: usize, kind: i32) -> Result<Mat, ParamError> {
        let values = if kind == 1 {
            self.read_f32s(w)?
        } else {
            let flag = self.read(4)?;
            let tag = u32::from_le_bytes([flag[0], flag[1], flag[2], flag[3]]);
            let flag_sum: u32 = flag.iter().map(|&b| u32::from(b)).sum();
            match tag {
                TAG_FP16 => {
                    let bytes = self.read_aligned(w * 2)?;
                    bytes
                        .chunks_exact(2)
                        .map(|b| f16::from_le_bytes([b[0], b[1]]).to_f32())
                        .collect()
                }
                TAG_INT8 => return Err(ParamError::UnsupportedQuantTag(tag)),
                TAG_FP32 => self.read_f32s(w)?,
                _ if flag_sum != 0 => {
                    let table = self.read_f32s(256)?;
                    let index = self.read_aligned(w)?;
                    index.iter().map(|&i| table[usize::from(i)]).collect()
                }
                _ => self.read_f32s(w)?,
            }
        };
        tracing::trace!(w, kind, pos = self.pos, "weight payload loaded");
        Ok(Mat::from_f32_1d(w, &values)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn le_f32(values: &[f32]) -> Vec<u8> {
        values.iter().flat_map(|v| v.to_le_bytes()).collect()
    }

    #[test]
    fn test_raw_fp32_with_zero_flag() {
        let mut bytes = vec![0u8; 4];
        bytes.extend(le_f32(&[1.0, -2.0, 0.5]));
        bytes.extend(le_f32(&[7.0]));
        let mut mb = DataReaderModelBin::new(&bytes);
        assert_eq!(mb.load(3, 0).unwrap().to_vec_f32(), vec![1.0, -2.0, 0.5]);
        assert_eq!(mb.load(1, 1).unwrap().to_vec_f32(), vec![7.0]);
        assert_eq!(mb.position(), bytes.len());
    }

    #[test]
    fn test_fp16_payload_is_padded() {
        let mut bytes = TAG_FP16.to_le_bytes().to_vec();
        for v in [1.5f32, -0.25, 3.0] {
            bytes.extend(f16::from_f32(v).to_le_bytes());
        }
        bytes.extend([0, 0]);
        bytes.extend(le_f32(&[9.0]));
        let mut mb = DataReaderModelBin::new(&bytes);
        assert_eq!(mb.load(3, 0).unwrap().to_vec_f32(), vec![1.5, -0.25, 3.0]);
        assert_eq!(mb.load(1, 1).unwrap().to_vec_f32(), vec![9.0]);
    }

    #[test]
    fn test_tagged_fp32() {
        let mut bytes = TAG_FP32.to_le_bytes().to_vec();
        bytes.extend(le_f32(&[0.125, 4.0]));
        let mut mb = DataReaderModelBin::new(&bytes);
        assert_eq!(mb.load(2, 0).unwrap().to_vec_f32(), vec![0.125, 4.0]);
    }

    #[test]
    fn test_quantized_table() {
        let mut bytes = vec![1u8, 0, 0, 0];
        let table: Vec<f32> = (0..256).map(|i| i as f32 * 0.5).collect();
        bytes.extend(le_f32(&table));
        bytes.extend([4u8, 0, 255, 0]);
        let mut mb = DataReaderModelBin::new(&bytes);
        assert_eq!(mb.load(3, 0).unwrap().to_vec_f32(), vec![2.0, 0.0, 127.5]);
        assert_eq!(mb.position(), bytes.len());
    }

    #[test]
    fn test_int8_and_truncation() {
        let bytes = TAG_INT8.to_le_bytes();
        let mut mb = DataReaderModelBin::new(&bytes);
        assert!(matches!(mb.load(4, 0), Err(ParamError::UnsupportedQuantTag(TAG_INT8))));

        let short = le_f32(&[1.0]);
        let mut mb = DataReaderModelBin::new(&short);
        assert!(matches!(mb.load(2, 1), Err(ParamError::Truncated { needed: 8, remaining: 4 })));
    }

    #[test]
    fn test_mat_array_in_order() {
        let a = Mat::from_f32_1d(2, &[1.0, 2.0]).unwrap();
        let b = Mat::from_f32_1d(1, &[3.0]).unwrap();
        let mut mb = MatArrayModelBin::new(vec![a, b]);
        assert_eq!(mb.load(0, 0).unwrap().to_vec_f32(), vec![1.0, 2.0]);
        assert_eq!(mb.load(0, 1).unwrap().to_vec_f32(), vec![3.0]);
        assert!(matches!(mb.load(0, 0), Err(ParamError::Exhausted(2))));
    }
}
