//! Parameter values and the kinds of value a parameter can hold.

use std::fmt;

use jiff::civil::Date;

/// The declared value type of a parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ParameterType {
    Double,
    UInt,
    Bool,
    Time,
    Enum,
}

impl fmt::Display for ParameterType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Double => "double",
            Self::UInt => "uint",
            Self::Bool => "bool",
            Self::Time => "time",
            Self::Enum => "enum",
        })
    }
}

/// A concrete parameter value.
///
/// Enum values are stored as the position of the value name in the
/// parameter's declared list.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ParameterValue {
    Double(f64),
    UInt(u64),
    Bool(bool),
    Time(Date),
    Enum(u32),
}

impl ParameterValue {
    /// Returns the type tag of this value.
    #[must_use]
    pub fn ty(&self) -> ParameterType {
        match self {
            Self::Double(_) => ParameterType::Double,
            Self::UInt(_) => ParameterType::UInt,
            Self::Bool(_) => ParameterType::Bool,
            Self::Time(_) => ParameterType::Time,
            Self::Enum(_) => ParameterType::Enum,
        }
    }

    /// Returns the value as an `f64` when it is numeric.
    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match *self {
            Self::Double(v) => Some(v),
            #[allow(clippy::cast_precision_loss)]
            Self::UInt(v) => Some(v as f64),
            Self::Bool(v) => Some(if v { 1.0 } else { 0.0 }),
            Self::Enum(v) => Some(f64::from(v)),
            Self::Time(_) => None,
        }
    }

    /// Returns true if `self` lies outside `[min, max]`.
    ///
    /// Bool values and missing bounds are never out of range.
    pub(crate) fn outside(&self, min: Option<&Self>, max: Option<&Self>) -> bool {
        let below = min.is_some_and(|min| self.less_than(min));
        let above = max.is_some_and(|max| max.less_than(self));
        below || above
    }

    fn less_than(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Double(a), Self::Double(b)) => a < b,
            (Self::UInt(a), Self::UInt(b)) => a < b,
            (Self::Time(a), Self::Time(b)) => a < b,
            (Self::Enum(a), Self::Enum(b)) => a < b,
            _ => false,
        }
    }
}

impl fmt::Display for ParameterValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Double(v) => write!(f, "{v}"),
            Self::UInt(v) => write!(f, "{v}"),
            Self::Bool(v) => write!(f, "{v}"),
            Self::Time(v) => write!(f, "{v}"),
            Self::Enum(v) => write!(f, "#{v}"),
        }
    }
}

impl From<f64> for ParameterValue {
    fn from(value: f64) -> Self {
        Self::Double(value)
    }
}

impl From<u64> for ParameterValue {
    fn from(value: u64) -> Self {
        Self::UInt(value)
    }
}

impl From<bool> for ParameterValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<Date> for ParameterValue {
    fn from(value: Date) -> Self {
        Self::Time(value)
    }
}

/// Links a marker type to the Rust type an equation sees when reading it.
pub trait ParameterKind: Copy + 'static {
    /// The declared type tag.
    const TYPE: ParameterType;

    /// The value handed to equation bodies.
    type Value: Copy;

    /// Extracts the typed value from a stored value of the same kind.
    fn extract(value: &ParameterValue) -> Self::Value;
}

/// Marker for real-valued parameters.
#[derive(Debug, Clone, Copy)]
pub struct Double;

/// Marker for unsigned integer parameters.
#[derive(Debug, Clone, Copy)]
pub struct UInt;

/// Marker for boolean parameters.
#[derive(Debug, Clone, Copy)]
pub struct Bool;

/// Marker for date parameters.
#[derive(Debug, Clone, Copy)]
pub struct Time;

/// Marker for enumerated parameters.
#[derive(Debug, Clone, Copy)]
pub struct Enum;

impl ParameterKind for Double {
    const TYPE: ParameterType = ParameterType::Double;
    type Value = f64;

    fn extract(value: &ParameterValue) -> f64 {
        match value {
            ParameterValue::Double(v) => *v,
            _ => 0.0,
        }
    }
}

impl ParameterKind for UInt {
    const TYPE: ParameterType = ParameterType::UInt;
    type Value = u64;

    fn extract(value: &ParameterValue) -> u64 {
        match value {
            ParameterValue::UInt(v) => *v,
            _ => 0,
        }
    }
}

impl ParameterKind for Bool {
    const TYPE: ParameterType = ParameterType::Bool;
    type Value = bool;

    fn extract(value: &ParameterValue) -> bool {
        match value {
            ParameterValue::Bool(v) => *v,
            _ => false,
        }
    }
}

impl ParameterKind for Time {
    const TYPE: ParameterType = ParameterType::Time;
    type Value = Date;

    fn extract(value: &ParameterValue) -> Date {
        match value {
            ParameterValue::Time(v) => *v,
            _ => Date::MIN,
        }
    }
}

impl ParameterKind for Enum {
    const TYPE: ParameterType = ParameterType::Enum;
    type Value = u32;

    fn extract(value: &ParameterValue) -> u32 {
        match value {
            ParameterValue::Enum(v) => *v,
            _ => 0,
        }
    }
}
