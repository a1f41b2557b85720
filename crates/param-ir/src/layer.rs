// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Layer declarations of the text parameter stream.
//!
//! A stream starts with the magic `7767517`, then `layer_count blob_count`,
//! then one line per layer:
//!
//! ```text
//! <type> <name> <bottom_count> <top_count> <bottoms..> <tops..> <key=value..>
//! ```
//!
//! Only the layer types this core implements are accepted; the set is
//! closed and resolved once from the type tag.

use crate::{ParamDict, ParamError};

/// Magic number on the first line of a parameter stream.
pub const PARAM_MAGIC: u32 = 7_767_517;

/// The operators this core can build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum LayerType {
    Convolution,
    ConvolutionDepthWise,
    Deconvolution,
    DeconvolutionDepthWise,
    Slice,
}

impl LayerType {
    /// Resolves a type tag as written in the parameter stream.
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "Convolution" => Some(Self::Convolution),
            "ConvolutionDepthWise" => Some(Self::ConvolutionDepthWise),
            "Deconvolution" => Some(Self::Deconvolution),
            "DeconvolutionDepthWise" => Some(Self::DeconvolutionDepthWise),
            "Slice" => Some(Self::Slice),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Convolution => "Convolution",
            Self::ConvolutionDepthWise => "ConvolutionDepthWise",
            Self::Deconvolution => "Deconvolution",
            Self::DeconvolutionDepthWise => "DeconvolutionDepthWise",
            Self::Slice => "Slice",
        }
    }
}

impl std::fmt::Display for LayerType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One parsed layer line.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct LayerDecl {
    pub layer_type: LayerType,
    pub name: String,
    pub bottoms: Vec<String>,
    pub tops: Vec<String>,
    pub params: ParamDict,
}

fn take<'a>(tokens: &mut impl Iterator<Item = &'a str>, line: &str, what: &str) -> Result<&'a str, ParamError> {
    tokens.next().ok_or_else(|| ParamError::Syntax {
        token: line.to_string(),
        detail: format!("missing {what}"),
    })
}

fn count(token: &str, line: &str) -> Result<usize, ParamError> {
    token.parse().map_err(|_| ParamError::Syntax {
        token: line.to_string(),
        detail: format!("'{token}' is not a blob count"),
    })
}

impl LayerDecl {
    /// Parses one layer line.
    pub fn parse(line: &str) -> Result<Self, ParamError> {
        let mut tokens = line.split_whitespace();
        let tag = take(&mut tokens, line, "layer type")?;
        let layer_type = LayerType::from_tag(tag).ok_or_else(|| ParamError::UnknownLayer(tag.to_string()))?;
        let name = take(&mut tokens, line, "layer name")?.to_string();
        let bottom_count = count(take(&mut tokens, line, "bottom count")?, line)?;
        let top_count = count(take(&mut tokens, line, "top count")?, line)?;

        let mut bottoms = Vec::with_capacity(bottom_count);
        for _ in 0..bottom_count {
            bottoms.push(take(&mut tokens, line, "bottom blob")?.to_string());
        }
        let mut tops = Vec::with_capacity(top_count);
        for _ in 0..top_count {
            tops.push(take(&mut tokens, line, "top blob")?.to_string());
        }

        let rest: Vec<&str> = tokens.collect();
        let params = ParamDict::parse(&rest.join(" "))?;
        Ok(Self {
            layer_type,
            name,
            bottoms,
            tops,
            params,
        })
    }

    /// Parses a whole parameter stream: magic, counts, then layer lines.
    pub fn parse_stream(text: &str) -> Result<Vec<Self>, ParamError> {
        let mut lines = text.lines().map(str::trim).filter(|l| !l.is_empty());
        let magic = lines.next().unwrap_or_default();
        if magic.parse::<u32>().ok() != Some(PARAM_MAGIC) {
            return Err(ParamError::BadMagic(magic.to_string()));
        }
        let header = lines.next().unwrap_or_default();
        let layer_count = header
            .split_whitespace()
            .next()
            .and_then(|v| v.parse::<usize>().ok())
            .ok_or_else(|| ParamError::Syntax {
                token: header.to_string(),
                detail: "expected 'layer_count blob_count'".into(),
            })?;

        let layers = lines.map(Self::parse).collect::<Result<Vec<_>, _>>()?;
        if layers.len() != layer_count {
            tracing::warn!(declared = layer_count, found = layers.len(), "layer count mismatch");
        }
        Ok(layers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_tag() {
        assert_eq!(LayerType::from_tag("DeconvolutionDepthWise"), Some(LayerType::DeconvolutionDepthWise));
        assert_eq!(LayerType::from_tag("ReLU"), None);
        for t in [LayerType::Convolution, LayerType::Slice] {
            assert_eq!(LayerType::from_tag(t.as_str()), Some(t));
        }
    }

    #[test]
    fn test_parse_line() {
        let decl = LayerDecl::parse("Convolution conv1 1 1 data conv1_out 0=16 1=3 5=1 6=432").unwrap();
        assert_eq!(decl.layer_type, LayerType::Convolution);
        assert_eq!(decl.name, "conv1");
        assert_eq!(decl.bottoms, vec!["data"]);
        assert_eq!(decl.tops, vec!["conv1_out"]);
        assert_eq!(decl.params.get_int(6, 0), 432);
    }

    #[test]
    fn test_parse_multi_top() {
        let decl = LayerDecl::parse("Slice s 1 3 in a b c -23300=3,-233,-233,-233 1=0").unwrap();
        assert_eq!(decl.tops.len(), 3);
        assert_eq!(decl.params.get_int_array(0).map(<[i32]>::len), Some(3));
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!(LayerDecl::parse("Pooling p 1 1 a b"), Err(ParamError::UnknownLayer(t)) if t == "Pooling"));
        assert!(matches!(LayerDecl::parse("Slice s 1 2 a b"), Err(ParamError::Syntax { .. })));
        assert!(matches!(LayerDecl::parse("Slice s x 1 a b"), Err(ParamError::Syntax { .. })));
    }

    #[test]
    fn test_parse_stream() {
        let text = "7767517\n2 3\nConvolution c 1 1 in mid 0=4 1=1 6=16\nSlice s 1 2 mid a b 1=0\n";
        let layers = LayerDecl::parse_stream(text).unwrap();
        assert_eq!(layers.len(), 2);
        assert_eq!(layers[1].layer_type, LayerType::Slice);
        assert!(matches!(LayerDecl::parse_stream("123\n0 0\n"), Err(ParamError::BadMagic(_))));
    }
}
