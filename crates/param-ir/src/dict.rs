// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Per-layer `key=value` attributes.
//!
//! Keys are small non-negative integers whose meaning each operator defines.
//! Scalars are written `k=v`; arrays use the reserved negative key
//! `-23300 - k` followed by a count and the comma-separated values, for
//! example `-23302=2,1,3` stores `[1, 3]` under key 2. A value with a `.`,
//! `e` or `E` is a float, anything else an integer.

use crate::ParamError;
use std::collections::BTreeMap;

/// Maximum number of distinct keys per layer.
pub const MAX_PARAM_COUNT: usize = 32;

/// "Automatic" value of the format: SAME_UPPER padding for pads and
/// output trimming, "take an even share" for slice lengths.
pub const AUTO_PAD: i32 = -233;

/// SAME_LOWER padding / trimming.
pub const SAME_LOWER_PAD: i32 = -234;

/// Keys at or below this value carry arrays.
const ARRAY_KEY_BASE: i32 = -23300;

/// One stored attribute.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum ParamValue {
    Int(i32),
    Float(f32),
    IntArray(Vec<i32>),
    FloatArray(Vec<f32>),
}

#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ParamDict {
    values: BTreeMap<usize, ParamValue>,
}

fn is_float(token: &str) -> bool {
    token.contains(['.', 'e', 'E'])
}

fn syntax(token: &str, detail: impl Into<String>) -> ParamError {
    ParamError::Syntax {
        token: token.to_string(),
        detail: detail.into(),
    }
}

fn parse_scalar(token: &str, text: &str) -> Result<ParamValue, ParamError> {
    if is_float(text) {
        text.parse::<f32>()
            .map(ParamValue::Float)
            .map_err(|e| syntax(token, e.to_string()))
    } else {
        text.parse::<i32>()
            .map(ParamValue::Int)
            .map_err(|e| syntax(token, e.to_string()))
    }
}

fn parse_array(token: &str, text: &str) -> Result<ParamValue, ParamError> {
    let mut parts = text.split(',');
    let count: usize = parts
        .next()
        .unwrap_or_default()
        .parse()
        .map_err(|_| syntax(token, "array count is not a number"))?;
    let items: Vec<&str> = parts.collect();
    if items.len() != count {
        return Err(syntax(token, format!("array declares {count} values, has {}", items.len())));
    }
    if items.iter().any(|v| is_float(v)) {
        let values = items
            .iter()
            .map(|v| v.parse::<f32>().map_err(|e| syntax(token, e.to_string())))
            .collect::<Result<_, _>>()?;
        Ok(ParamValue::FloatArray(values))
    } else {
        let values = items
            .iter()
            .map(|v| v.parse::<i32>().map_err(|e| syntax(token, e.to_string())))
            .collect::<Result<_, _>>()?;
        Ok(ParamValue::IntArray(values))
    }
}

impl ParamDict {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses whitespace-separated `key=value` tokens.
    pub fn parse(text: &str) -> Result<Self, ParamError> {
        let mut dict = Self::new();
        for token in text.split_whitespace() {
            dict.parse_token(token)?;
        }
        Ok(dict)
    }

    fn parse_token(&mut self, token: &str) -> Result<(), ParamError> {
        let (key, value) = token
            .split_once('=')
            .ok_or_else(|| syntax(token, "expected key=value"))?;
        let key: i32 = key.parse().map_err(|_| syntax(token, "key is not an integer"))?;

        let (id, value) = if key <= ARRAY_KEY_BASE {
            (ARRAY_KEY_BASE - key, parse_array(token, value)?)
        } else {
            (key, parse_scalar(token, value)?)
        };
        let slot = Self::slot(id)?;
        self.values.insert(slot, value);
        Ok(())
    }

    fn slot(id: i32) -> Result<usize, ParamError> {
        usize::try_from(id)
            .ok()
            .filter(|&k| k < MAX_PARAM_COUNT)
            .ok_or(ParamError::KeyOutOfRange {
                key: id,
                max: MAX_PARAM_COUNT,
            })
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn contains(&self, id: usize) -> bool {
        self.values.contains_key(&id)
    }

    pub fn get(&self, id: usize) -> Option<&ParamValue> {
        self.values.get(&id)
    }

    /// Integer at `id`, or `default`. Floats are truncated.
    pub fn get_int(&self, id: usize, default: i32) -> i32 {
        match self.values.get(&id) {
            Some(ParamValue::Int(v)) => *v,
            Some(ParamValue::Float(v)) => *v as i32,
            _ => default,
        }
    }

    /// Float at `id`, or `default`. Integers convert numerically.
    pub fn get_float(&self, id: usize, default: f32) -> f32 {
        match self.values.get(&id) {
            Some(ParamValue::Float(v)) => *v,
            Some(ParamValue::Int(v)) => *v as f32,
            _ => default,
        }
    }

    pub fn get_int_array(&self, id: usize) -> Option<&[i32]> {
        match self.values.get(&id) {
            Some(ParamValue::IntArray(v)) => Some(v),
            _ => None,
        }
    }

    /// Float array at `id`; integer arrays convert numerically.
    pub fn get_float_array(&self, id: usize) -> Option<Vec<f32>> {
        match self.values.get(&id) {
            Some(ParamValue::FloatArray(v)) => Some(v.clone()),
            Some(ParamValue::IntArray(v)) => Some(v.iter().map(|&x| x as f32).collect()),
            _ => None,
        }
    }

    pub fn set_int(&mut self, id: usize, v: i32) {
        self.values.insert(id, ParamValue::Int(v));
    }

    pub fn set_float(&mut self, id: usize, v: f32) {
        self.values.insert(id, ParamValue::Float(v));
    }

    pub fn set_int_array(&mut self, id: usize, v: Vec<i32>) {
        self.values.insert(id, ParamValue::IntArray(v));
    }

    pub fn set_float_array(&mut self, id: usize, v: Vec<f32>) {
        self.values.insert(id, ParamValue::FloatArray(v));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_scalars() {
        let pd = ParamDict::parse("0=64 1=3 11=3 5=1 6=1728 9=2 4=-233").unwrap();
        assert_eq!(pd.get_int(0, 0), 64);
        assert_eq!(pd.get_int(4, 0), AUTO_PAD);
        assert_eq!(pd.get_int(2, 1), 1);
        assert_eq!(pd.len(), 7);
    }

    #[test]
    fn test_float_detection() {
        let pd = ParamDict::parse("0=0.1 1=1e-3 2=7").unwrap();
        assert_eq!(pd.get(0), Some(&ParamValue::Float(0.1)));
        assert_eq!(pd.get_float(1, 0.0), 1e-3);
        assert_eq!(pd.get_float(2, 0.0), 7.0);
        assert_eq!(pd.get_int(0, 5), 0);
    }

    #[test]
    fn test_array_keys() {
        let pd = ParamDict::parse("-23300=3,-233,-233,2 -23310=2,0.5,6.0 1=0").unwrap();
        assert_eq!(pd.get_int_array(0), Some(&[-233, -233, 2][..]));
        assert_eq!(pd.get_float_array(10), Some(vec![0.5, 6.0]));
        assert_eq!(pd.get_float_array(0), Some(vec![-233.0, -233.0, 2.0]));
        assert_eq!(pd.get_int_array(10), None);
        assert_eq!(pd.get_int(1, 9), 0);
    }

    #[test]
    fn test_empty_array() {
        let pd = ParamDict::parse("-23302=0").unwrap();
        assert_eq!(pd.get_int_array(2), Some(&[][..]));
    }

    #[test]
    fn test_rejects_malformed() {
        assert!(matches!(ParamDict::parse("0"), Err(ParamError::Syntax { .. })));
        assert!(matches!(ParamDict::parse("x=1"), Err(ParamError::Syntax { .. })));
        assert!(matches!(ParamDict::parse("-23300=3,1,2"), Err(ParamError::Syntax { .. })));
        assert!(matches!(
            ParamDict::parse("40=1"),
            Err(ParamError::KeyOutOfRange { key: 40, .. })
        ));
        assert!(matches!(ParamDict::parse("-5=1"), Err(ParamError::KeyOutOfRange { .. })));
    }

    #[test]
    fn test_setters_and_serde() {
        let mut pd = ParamDict::new();
        pd.set_int(0, 8);
        pd.set_float(1, 0.25);
        pd.set_int_array(2, vec![1, 2]);
        pd.set_float_array(3, vec![0.5]);
        let json = serde_json::to_string(&pd).unwrap();
        let back: ParamDict = serde_json::from_str(&json).unwrap();
        assert_eq!(back, pd);
    }
}
