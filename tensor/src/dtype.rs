//! Tensor element types.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::TensorError;

/// Numeric kind of a tensor element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TensorType {
    Int32,
    Uint32,
    Int16,
    Uint16,
    Int8,
    Uint8,
    Float64,
    Float32,
    Int64,
    Uint64,
    Float16,
    #[default]
    Unknown,
}

impl TensorType {
    /// All valid (non-`Unknown`) element types.
    pub const ALL: [TensorType; 11] = [
        TensorType::Int32,
        TensorType::Uint32,
        TensorType::Int16,
        TensorType::Uint16,
        TensorType::Int8,
        TensorType::Uint8,
        TensorType::Float64,
        TensorType::Float32,
        TensorType::Int64,
        TensorType::Uint64,
        TensorType::Float16,
    ];

    /// Size of one element in bytes. `Unknown` has size 0.
    pub fn element_size(self) -> usize {
        match self {
            TensorType::Int8 | TensorType::Uint8 => 1,
            TensorType::Int16 | TensorType::Uint16 | TensorType::Float16 => 2,
            TensorType::Int32 | TensorType::Uint32 | TensorType::Float32 => 4,
            TensorType::Int64 | TensorType::Uint64 | TensorType::Float64 => 8,
            TensorType::Unknown => 0,
        }
    }

    pub fn is_known(self) -> bool {
        self != TensorType::Unknown
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TensorType::Int32 => "int32",
            TensorType::Uint32 => "uint32",
            TensorType::Int16 => "int16",
            TensorType::Uint16 => "uint16",
            TensorType::Int8 => "int8",
            TensorType::Uint8 => "uint8",
            TensorType::Float64 => "float64",
            TensorType::Float32 => "float32",
            TensorType::Int64 => "int64",
            TensorType::Uint64 => "uint64",
            TensorType::Float16 => "float16",
            TensorType::Unknown => "unknown",
        }
    }
}

impl fmt::Display for TensorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TensorType {
    type Err = TensorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        TensorType::ALL
            .iter()
            .copied()
            .find(|t| t.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| TensorError::invalid(format!("unknown tensor type {s:?}")))
    }
}

/// A plain numeric type that can be read from or written to a tensor.
pub trait Element: bytemuck::Pod {
    const TYPE: TensorType;
}

macro_rules! impl_element {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(impl Element for $ty {
            const TYPE: TensorType = TensorType::$variant;
        })*
    };
}

impl_element! {
    i8 => Int8,
    u8 => Uint8,
    i16 => Int16,
    u16 => Uint16,
    i32 => Int32,
    u32 => Uint32,
    i64 => Int64,
    u64 => Uint64,
    f32 => Float32,
    f64 => Float64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn element_sizes() {
        assert_eq!(TensorType::Uint8.element_size(), 1);
        assert_eq!(TensorType::Float16.element_size(), 2);
        assert_eq!(TensorType::Float32.element_size(), 4);
        assert_eq!(TensorType::Int64.element_size(), 8);
        assert_eq!(TensorType::Unknown.element_size(), 0);
    }

    #[test]
    fn parse_and_display() {
        for t in TensorType::ALL {
            let parsed: TensorType = t.to_string().parse().unwrap();
            assert_eq!(parsed, t);
        }
        assert_eq!("FLOAT32".parse::<TensorType>().unwrap(), TensorType::Float32);
        assert!("unknown".parse::<TensorType>().is_err());
        assert!("complex64".parse::<TensorType>().is_err());
    }

    #[test]
    fn serde_names() {
        let json = serde_json::to_string(&TensorType::Uint16).unwrap();
        assert_eq!(json, "\"uint16\"");
    }
}
