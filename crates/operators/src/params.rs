// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Parameters shared by the convolution family.
//!
//! | id | convolution        | deconvolution        |
//! |----|--------------------|----------------------|
//! | 0  | num_output         | num_output           |
//! | 1, 11 | kernel w, h     | kernel w, h          |
//! | 2, 12 | dilation w, h   | dilation w, h        |
//! | 3, 13 | stride w, h     | stride w, h          |
//! | 4, 15, 14, 16 | pad left, right, top, bottom | same |
//! | 5  | bias_term          | bias_term            |
//! | 6  | weight_data_size   | weight_data_size     |
//! | 7  | group (depthwise)  | group (depthwise)    |
//! | 9, 10 | activation type, params | same         |
//! | 18 | pad_value          | output_pad_right     |
//! | 19 | dynamic_weight (rejected) | output_pad_bottom |
//! | 20, 21 | -              | output_w, output_h   |
//! | 28 | -                  | dynamic_weight       |

use crate::error::{LayerError, Result};
use kernels::{Activation, ConvGeometry};
use param_ir::ParamDict;

/// Which half of the key table applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Family {
    Convolution,
    Deconvolution,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConvParams {
    pub num_output: usize,
    pub kernel_w: usize,
    pub kernel_h: usize,
    pub dilation_w: usize,
    pub dilation_h: usize,
    pub stride_w: usize,
    pub stride_h: usize,
    /// Pads may hold the `-233`/`-234` automatic-padding sentinels.
    pub pad_left: i32,
    pub pad_right: i32,
    pub pad_top: i32,
    pub pad_bottom: i32,
    pub pad_value: f32,
    pub output_pad_right: usize,
    pub output_pad_bottom: usize,
    pub output_w: usize,
    pub output_h: usize,
    pub bias_term: bool,
    pub weight_data_size: usize,
    pub group: usize,
    pub activation_type: i32,
    pub activation_params: Vec<f32>,
    pub dynamic_weight: bool,
}

fn positive(pd: &ParamDict, id: usize, default: i32, what: &str) -> Result<usize> {
    let v = pd.get_int(id, default);
    if v < 1 {
        return Err(LayerError::InvalidParam(format!("{what} must be positive, got {v}")));
    }
    Ok(v as usize)
}

fn non_negative(pd: &ParamDict, id: usize, what: &str) -> Result<usize> {
    let v = pd.get_int(id, 0);
    usize::try_from(v).map_err(|_| LayerError::InvalidParam(format!("{what} must not be negative, got {v}")))
}

impl ConvParams {
    pub fn load(pd: &ParamDict, family: Family) -> Result<Self> {
        let kernel_w = positive(pd, 1, 0, "kernel_w")?;
        let dilation_w = positive(pd, 2, 1, "dilation_w")?;
        let stride_w = positive(pd, 3, 1, "stride_w")?;
        let pad_left = pd.get_int(4, 0);
        let pad_top = pd.get_int(14, pad_left);

        let (pad_value, output_pad_right, output_pad_bottom, output_w, output_h, dynamic_weight) = match family {
            Family::Convolution => {
                if pd.get_int(19, 0) != 0 {
                    return Err(LayerError::InvalidParam(
                        "runtime weights are not supported for convolution".to_string(),
                    ));
                }
                (pd.get_float(18, 0.0), 0, 0, 0, 0, false)
            }
            Family::Deconvolution => {
                let right = non_negative(pd, 18, "output_pad_right")?;
                let bottom = pd.get_int(19, right as i32);
                let bottom = usize::try_from(bottom)
                    .map_err(|_| LayerError::InvalidParam(format!("output_pad_bottom {bottom}")))?;
                let output_w = non_negative(pd, 20, "output_w")?;
                let output_h = pd.get_int(21, output_w as i32).max(0) as usize;
                (0.0, right, bottom, output_w, output_h, pd.get_int(28, 0) != 0)
            }
        };

        let p = Self {
            num_output: positive(pd, 0, 0, "num_output")?,
            kernel_w,
            kernel_h: positive(pd, 11, kernel_w as i32, "kernel_h")?,
            dilation_w,
            dilation_h: positive(pd, 12, dilation_w as i32, "dilation_h")?,
            stride_w,
            stride_h: positive(pd, 13, stride_w as i32, "stride_h")?,
            pad_left,
            pad_right: pd.get_int(15, pad_left),
            pad_top,
            pad_bottom: pd.get_int(16, pad_top),
            pad_value,
            output_pad_right,
            output_pad_bottom,
            output_w,
            output_h,
            bias_term: pd.get_int(5, 0) != 0,
            weight_data_size: non_negative(pd, 6, "weight_data_size")?,
            group: positive(pd, 7, 1, "group")?,
            activation_type: pd.get_int(9, 0),
            activation_params: pd.get_float_array(10).unwrap_or_default(),
            dynamic_weight,
        };
        p.validate()?;
        Ok(p)
    }

    fn validate(&self) -> Result<()> {
        if self.num_output % self.group != 0 {
            return Err(LayerError::InvalidParam(format!(
                "num_output {} is not a multiple of group {}",
                self.num_output, self.group
            )));
        }
        if !self.dynamic_weight {
            let per_group = self.maxk() * (self.num_output / self.group);
            if self.weight_data_size == 0 || self.weight_data_size % (per_group * self.group) != 0 {
                return Err(LayerError::InvalidParam(format!(
                    "weight_data_size {} does not split into {} groups of {} taps x {} outputs",
                    self.weight_data_size,
                    self.group,
                    self.maxk(),
                    self.num_output / self.group
                )));
            }
        }
        Ok(())
    }

    /// Writes the parameters back into a dictionary, for building
    /// sub-operators.
    pub fn to_dict(&self, family: Family) -> ParamDict {
        let mut pd = ParamDict::new();
        pd.set_int(0, self.num_output as i32);
        pd.set_int(1, self.kernel_w as i32);
        pd.set_int(11, self.kernel_h as i32);
        pd.set_int(2, self.dilation_w as i32);
        pd.set_int(12, self.dilation_h as i32);
        pd.set_int(3, self.stride_w as i32);
        pd.set_int(13, self.stride_h as i32);
        pd.set_int(4, self.pad_left);
        pd.set_int(15, self.pad_right);
        pd.set_int(14, self.pad_top);
        pd.set_int(16, self.pad_bottom);
        pd.set_int(5, self.bias_term as i32);
        pd.set_int(6, self.weight_data_size as i32);
        pd.set_int(7, self.group as i32);
        pd.set_int(9, self.activation_type);
        pd.set_float_array(10, self.activation_params.clone());
        match family {
            Family::Convolution => pd.set_float(18, self.pad_value),
            Family::Deconvolution => {
                pd.set_int(18, self.output_pad_right as i32);
                pd.set_int(19, self.output_pad_bottom as i32);
                pd.set_int(20, self.output_w as i32);
                pd.set_int(21, self.output_h as i32);
                pd.set_int(28, self.dynamic_weight as i32);
            }
        }
        pd
    }

    pub fn maxk(&self) -> usize {
        self.kernel_w * self.kernel_h
    }

    pub fn geometry(&self) -> ConvGeometry {
        ConvGeometry {
            kernel_w: self.kernel_w,
            kernel_h: self.kernel_h,
            dilation_w: self.dilation_w,
            dilation_h: self.dilation_h,
            stride_w: self.stride_w,
            stride_h: self.stride_h,
        }
    }

    pub fn activation(&self) -> Activation {
        Activation::from_params(self.activation_type, &self.activation_params)
    }

    /// Input channels implied by the weight count.
    pub fn num_input(&self) -> usize {
        self.weight_data_size / self.maxk() / (self.num_output / self.group)
    }

    /// Any explicit (positive) pad.
    pub fn has_explicit_pad(&self) -> bool {
        self.pad_left > 0 || self.pad_right > 0 || self.pad_top > 0 || self.pad_bottom > 0
    }

    /// Whether any side carries `sentinel`.
    pub fn pads_are(&self, sentinel: i32) -> bool {
        [self.pad_left, self.pad_right, self.pad_top, self.pad_bottom].contains(&sentinel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use param_ir::AUTO_PAD;

    #[test]
    fn test_defaults_follow_width_keys() {
        let pd = ParamDict::parse("0=8 1=3 3=2 4=1 5=1 6=216").unwrap();
        let p = ConvParams::load(&pd, Family::Convolution).unwrap();
        assert_eq!((p.kernel_h, p.stride_h, p.dilation_h), (3, 2, 1));
        assert_eq!((p.pad_right, p.pad_top, p.pad_bottom), (1, 1, 1));
        assert_eq!(p.num_input(), 3);
        assert!(p.has_explicit_pad());
    }

    #[test]
    fn test_deconv_keys() {
        let pd = ParamDict::parse("0=4 1=2 3=2 4=-233 6=32 18=1 20=9").unwrap();
        let p = ConvParams::load(&pd, Family::Deconvolution).unwrap();
        assert_eq!((p.output_pad_right, p.output_pad_bottom), (1, 1));
        assert_eq!((p.output_w, p.output_h), (9, 9));
        assert!(p.pads_are(AUTO_PAD));
        assert!(!p.has_explicit_pad());
    }

    #[test]
    fn test_rejects_bad_params() {
        let zero_kernel = ParamDict::parse("0=4 1=0 6=4").unwrap();
        assert!(ConvParams::load(&zero_kernel, Family::Convolution).is_err());
        let ragged = ParamDict::parse("0=4 1=3 6=10").unwrap();
        assert!(ConvParams::load(&ragged, Family::Convolution).is_err());
        let dynamic = ParamDict::parse("0=4 1=1 6=4 19=1").unwrap();
        assert!(ConvParams::load(&dynamic, Family::Convolution).is_err());
    }

    #[test]
    fn test_dict_round_trip() {
        let pd = ParamDict::parse("0=6 1=3 11=1 3=2 5=1 6=54 7=3 9=2 -23310=1,0.1").unwrap();
        let p = ConvParams::load(&pd, Family::Deconvolution).unwrap();
        let again = ConvParams::load(&p.to_dict(Family::Deconvolution), Family::Deconvolution).unwrap();
        assert_eq!(p, again);
    }
}
