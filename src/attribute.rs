use std::fmt::{self, Display, Formatter};

use chrono::TimeDelta;
use thiserror::Error as ThisError;
use uuid::Uuid as UUID;

#[derive(Debug, ThisError)]
pub enum AttributeError {
    #[error("No Attribute \"{name}\" On Element {element}")]
    AttributeNotFound { name: String, element: UUID },
    #[error("Expected {expected} Attribute But Found {found}")]
    TypeMismatch { expected: AttributeType, found: AttributeType },
    #[error("Can't Create An Array Of {0}")]
    ArrayOfArrays(AttributeType),
    #[error("Attribute Name Can't Be Empty")]
    EmptyName,
    #[error("Attribute Name \"{0}\" Is Reserved")]
    ReservedName(String),
}

/// A blob of raw bytes.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct BinaryBlock {
    pub data: Vec<u8>,
}

impl From<Vec<u8>> for BinaryBlock {
    fn from(data: Vec<u8>) -> Self {
        Self { data }
    }
}

/// A signed span of time.
///
/// Binary files store time as a 32 bit count of ticks, where one tick is a ten thousandth of a second.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Time(TimeDelta);

impl Default for Time {
    fn default() -> Self {
        Self(TimeDelta::zero())
    }
}

impl Time {
    pub const TICKS_PER_SECOND: i32 = 10_000;
    const MICROSECONDS_PER_TICK: i64 = 100;

    /// Creates a time from seconds, rounded to the nearest microsecond.
    pub fn from_seconds(seconds: f64) -> Self {
        Self(TimeDelta::microseconds((seconds * 1_000_000f64).round() as i64))
    }

    /// Creates a time from a tick count.
    pub fn from_ticks(ticks: i32) -> Self {
        Self(TimeDelta::microseconds(ticks as i64 * Self::MICROSECONDS_PER_TICK))
    }

    /// Returns the tick count, truncated toward zero and saturated to the 32 bit range.
    pub fn ticks(&self) -> i32 {
        let microseconds = self
            .0
            .num_microseconds()
            .unwrap_or(if self.0 < TimeDelta::zero() { i64::MIN } else { i64::MAX });
        (microseconds / Self::MICROSECONDS_PER_TICK).clamp(i32::MIN as i64, i32::MAX as i64) as i32
    }

    pub fn as_seconds(&self) -> f64 {
        self.0.num_seconds() as f64 + self.0.subsec_nanos() as f64 / 1_000_000_000f64
    }
}

impl From<TimeDelta> for Time {
    fn from(value: TimeDelta) -> Self {
        Self(value)
    }
}

impl From<Time> for TimeDelta {
    fn from(value: Time) -> Self {
        value.0
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Color {
    pub red: u8,
    pub green: u8,
    pub blue: u8,
    pub alpha: u8,
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Vector2 {
    pub x: f32,
    pub y: f32,
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Vector3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Vector4 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub w: f32,
}

/// Euler angles in degrees, laid out like a [Vector3].
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Angle {
    pub pitch: f32,
    pub yaw: f32,
    pub roll: f32,
}

/// A rotation stored in X, Y, Z, W order.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Quaternion {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub w: f32,
}

/// A 4x4 matrix. Entries are indexed `[row][column]` and serialized row by row.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Matrix {
    pub entries: [[f32; 4]; 4],
}

impl From<mint::Vector2<f32>> for Vector2 {
    fn from(value: mint::Vector2<f32>) -> Self {
        Self { x: value.x, y: value.y }
    }
}

impl From<Vector2> for mint::Vector2<f32> {
    fn from(value: Vector2) -> Self {
        Self { x: value.x, y: value.y }
    }
}

impl From<mint::Vector3<f32>> for Vector3 {
    fn from(value: mint::Vector3<f32>) -> Self {
        Self {
            x: value.x,
            y: value.y,
            z: value.z,
        }
    }
}

impl From<Vector3> for mint::Vector3<f32> {
    fn from(value: Vector3) -> Self {
        Self {
            x: value.x,
            y: value.y,
            z: value.z,
        }
    }
}

impl From<mint::Vector4<f32>> for Vector4 {
    fn from(value: mint::Vector4<f32>) -> Self {
        Self {
            x: value.x,
            y: value.y,
            z: value.z,
            w: value.w,
        }
    }
}

impl From<Vector4> for mint::Vector4<f32> {
    fn from(value: Vector4) -> Self {
        Self {
            x: value.x,
            y: value.y,
            z: value.z,
            w: value.w,
        }
    }
}

impl From<mint::Quaternion<f32>> for Quaternion {
    fn from(value: mint::Quaternion<f32>) -> Self {
        Self {
            x: value.v.x,
            y: value.v.y,
            z: value.v.z,
            w: value.s,
        }
    }
}

impl From<Quaternion> for mint::Quaternion<f32> {
    fn from(value: Quaternion) -> Self {
        Self {
            v: mint::Vector3 {
                x: value.x,
                y: value.y,
                z: value.z,
            },
            s: value.w,
        }
    }
}

impl From<mint::RowMatrix4<f32>> for Matrix {
    fn from(value: mint::RowMatrix4<f32>) -> Self {
        let row = |row: mint::Vector4<f32>| [row.x, row.y, row.z, row.w];
        Self {
            entries: [row(value.x), row(value.y), row(value.z), row(value.w)],
        }
    }
}

impl From<Matrix> for mint::RowMatrix4<f32> {
    fn from(value: Matrix) -> Self {
        let row = |row: [f32; 4]| mint::Vector4 {
            x: row[0],
            y: row[1],
            z: row[2],
            w: row[3],
        };
        Self {
            x: row(value.entries[0]),
            y: row(value.entries[1]),
            z: row(value.entries[2]),
            w: row(value.entries[3]),
        }
    }
}

/// A single attribute value. Element values refer to other elements of the same data model by id.
#[derive(Clone, Debug, PartialEq)]
pub enum Attribute {
    Element(Option<UUID>),
    Integer(i32),
    Float(f32),
    Boolean(bool),
    String(String),
    Binary(BinaryBlock),
    Time(Time),
    Color(Color),
    Vector2(Vector2),
    Vector3(Vector3),
    Vector4(Vector4),
    Angle(Angle),
    Quaternion(Quaternion),
    Matrix(Matrix),
    ElementArray(Vec<Option<UUID>>),
    IntegerArray(Vec<i32>),
    FloatArray(Vec<f32>),
    BooleanArray(Vec<bool>),
    StringArray(Vec<String>),
    BinaryArray(Vec<BinaryBlock>),
    TimeArray(Vec<Time>),
    ColorArray(Vec<Color>),
    Vector2Array(Vec<Vector2>),
    Vector3Array(Vec<Vector3>),
    Vector4Array(Vec<Vector4>),
    AngleArray(Vec<Angle>),
    QuaternionArray(Vec<Quaternion>),
    MatrixArray(Vec<Matrix>),
}

/// The type tag of an [Attribute].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AttributeType {
    Element,
    Integer,
    Float,
    Boolean,
    String,
    Binary,
    Time,
    Color,
    Vector2,
    Vector3,
    Vector4,
    Angle,
    Quaternion,
    Matrix,
    ElementArray,
    IntegerArray,
    FloatArray,
    BooleanArray,
    StringArray,
    BinaryArray,
    TimeArray,
    ColorArray,
    Vector2Array,
    Vector3Array,
    Vector4Array,
    AngleArray,
    QuaternionArray,
    MatrixArray,
}

impl AttributeType {
    pub const SCALARS: [AttributeType; 14] = [
        Self::Element,
        Self::Integer,
        Self::Float,
        Self::Boolean,
        Self::String,
        Self::Binary,
        Self::Time,
        Self::Color,
        Self::Vector2,
        Self::Vector3,
        Self::Vector4,
        Self::Angle,
        Self::Quaternion,
        Self::Matrix,
    ];

    /// Returns the name KeyValues2 uses for this type.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Element => "element",
            Self::Integer => "int",
            Self::Float => "float",
            Self::Boolean => "bool",
            Self::String => "string",
            Self::Binary => "binary",
            Self::Time => "time",
            Self::Color => "color",
            Self::Vector2 => "vector2",
            Self::Vector3 => "vector3",
            Self::Vector4 => "vector4",
            Self::Angle => "qangle",
            Self::Quaternion => "quaternion",
            Self::Matrix => "matrix",
            Self::ElementArray => "element_array",
            Self::IntegerArray => "int_array",
            Self::FloatArray => "float_array",
            Self::BooleanArray => "bool_array",
            Self::StringArray => "string_array",
            Self::BinaryArray => "binary_array",
            Self::TimeArray => "time_array",
            Self::ColorArray => "color_array",
            Self::Vector2Array => "vector2_array",
            Self::Vector3Array => "vector3_array",
            Self::Vector4Array => "vector4_array",
            Self::AngleArray => "qangle_array",
            Self::QuaternionArray => "quaternion_array",
            Self::MatrixArray => "matrix_array",
        }
    }

    /// Looks up a KeyValues2 type name. `angle` is accepted as an alias of `qangle`.
    pub fn from_type_name(name: &str) -> Option<Self> {
        match name {
            "angle" => return Some(Self::Angle),
            "angle_array" => return Some(Self::AngleArray),
            _ => {}
        }

        Self::SCALARS
            .iter()
            .flat_map(|scalar| [Some(*scalar), scalar.array_type()])
            .flatten()
            .find(|attribute_type| attribute_type.type_name() == name)
    }

    pub fn is_array(&self) -> bool {
        self.element_type().is_some()
    }

    /// Returns the array type holding this scalar type, or None if this is already an array.
    pub fn array_type(&self) -> Option<Self> {
        Some(match self {
            Self::Element => Self::ElementArray,
            Self::Integer => Self::IntegerArray,
            Self::Float => Self::FloatArray,
            Self::Boolean => Self::BooleanArray,
            Self::String => Self::StringArray,
            Self::Binary => Self::BinaryArray,
            Self::Time => Self::TimeArray,
            Self::Color => Self::ColorArray,
            Self::Vector2 => Self::Vector2Array,
            Self::Vector3 => Self::Vector3Array,
            Self::Vector4 => Self::Vector4Array,
            Self::Angle => Self::AngleArray,
            Self::Quaternion => Self::QuaternionArray,
            Self::Matrix => Self::MatrixArray,
            _ => return None,
        })
    }

    /// Returns the scalar type held by this array type, or None if this is not an array.
    pub fn element_type(&self) -> Option<Self> {
        Some(match self {
            Self::ElementArray => Self::Element,
            Self::IntegerArray => Self::Integer,
            Self::FloatArray => Self::Float,
            Self::BooleanArray => Self::Boolean,
            Self::StringArray => Self::String,
            Self::BinaryArray => Self::Binary,
            Self::TimeArray => Self::Time,
            Self::ColorArray => Self::Color,
            Self::Vector2Array => Self::Vector2,
            Self::Vector3Array => Self::Vector3,
            Self::Vector4Array => Self::Vector4,
            Self::AngleArray => Self::Angle,
            Self::QuaternionArray => Self::Quaternion,
            Self::MatrixArray => Self::Matrix,
            _ => return None,
        })
    }
}

impl Display for AttributeType {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.type_name())
    }
}

impl Attribute {
    pub fn get_type(&self) -> AttributeType {
        match self {
            Attribute::Element(_) => AttributeType::Element,
            Attribute::Integer(_) => AttributeType::Integer,
            Attribute::Float(_) => AttributeType::Float,
            Attribute::Boolean(_) => AttributeType::Boolean,
            Attribute::String(_) => AttributeType::String,
            Attribute::Binary(_) => AttributeType::Binary,
            Attribute::Time(_) => AttributeType::Time,
            Attribute::Color(_) => AttributeType::Color,
            Attribute::Vector2(_) => AttributeType::Vector2,
            Attribute::Vector3(_) => AttributeType::Vector3,
            Attribute::Vector4(_) => AttributeType::Vector4,
            Attribute::Angle(_) => AttributeType::Angle,
            Attribute::Quaternion(_) => AttributeType::Quaternion,
            Attribute::Matrix(_) => AttributeType::Matrix,
            Attribute::ElementArray(_) => AttributeType::ElementArray,
            Attribute::IntegerArray(_) => AttributeType::IntegerArray,
            Attribute::FloatArray(_) => AttributeType::FloatArray,
            Attribute::BooleanArray(_) => AttributeType::BooleanArray,
            Attribute::StringArray(_) => AttributeType::StringArray,
            Attribute::BinaryArray(_) => AttributeType::BinaryArray,
            Attribute::TimeArray(_) => AttributeType::TimeArray,
            Attribute::ColorArray(_) => AttributeType::ColorArray,
            Attribute::Vector2Array(_) => AttributeType::Vector2Array,
            Attribute::Vector3Array(_) => AttributeType::Vector3Array,
            Attribute::Vector4Array(_) => AttributeType::Vector4Array,
            Attribute::AngleArray(_) => AttributeType::AngleArray,
            Attribute::QuaternionArray(_) => AttributeType::QuaternionArray,
            Attribute::MatrixArray(_) => AttributeType::MatrixArray,
        }
    }

    /// Returns every element id this attribute refers to, one per slot, in order.
    pub fn referenced_elements(&self) -> Vec<UUID> {
        match self {
            Attribute::Element(Some(id)) => vec![*id],
            Attribute::ElementArray(values) => values.iter().flatten().copied().collect(),
            _ => Vec::new(),
        }
    }
}

/// A rust type that is stored in exactly one [Attribute] variant.
pub trait AttributeValue {
    const ATTRIBUTE_TYPE: AttributeType;
}

macro_rules! declare_attribute {
    ($qualifier:ty, $attribute:ident, $array:ident) => {
        impl From<$qualifier> for Attribute {
            fn from(value: $qualifier) -> Self {
                Attribute::$attribute(value)
            }
        }

        impl From<Vec<$qualifier>> for Attribute {
            fn from(value: Vec<$qualifier>) -> Self {
                Attribute::$array(value)
            }
        }

        impl<'a> TryFrom<&'a Attribute> for &'a $qualifier {
            type Error = AttributeType;

            fn try_from(value: &'a Attribute) -> Result<Self, Self::Error> {
                match value {
                    Attribute::$attribute(value) => Ok(value),
                    _ => Err(value.get_type()),
                }
            }
        }

        impl<'a> TryFrom<&'a Attribute> for &'a Vec<$qualifier> {
            type Error = AttributeType;

            fn try_from(value: &'a Attribute) -> Result<Self, Self::Error> {
                match value {
                    Attribute::$array(value) => Ok(value),
                    _ => Err(value.get_type()),
                }
            }
        }

        impl AttributeValue for $qualifier {
            const ATTRIBUTE_TYPE: AttributeType = AttributeType::$attribute;
        }

        impl AttributeValue for Vec<$qualifier> {
            const ATTRIBUTE_TYPE: AttributeType = AttributeType::$array;
        }
    };
}

declare_attribute!(Option<UUID>, Element, ElementArray);
declare_attribute!(i32, Integer, IntegerArray);
declare_attribute!(f32, Float, FloatArray);
declare_attribute!(bool, Boolean, BooleanArray);
declare_attribute!(String, String, StringArray);
declare_attribute!(BinaryBlock, Binary, BinaryArray);
declare_attribute!(Time, Time, TimeArray);
declare_attribute!(Color, Color, ColorArray);
declare_attribute!(Vector2, Vector2, Vector2Array);
declare_attribute!(Vector3, Vector3, Vector3Array);
declare_attribute!(Vector4, Vector4, Vector4Array);
declare_attribute!(Angle, Angle, AngleArray);
declare_attribute!(Quaternion, Quaternion, QuaternionArray);
declare_attribute!(Matrix, Matrix, MatrixArray);

impl From<UUID> for Attribute {
    fn from(value: UUID) -> Self {
        Attribute::Element(Some(value))
    }
}

impl From<&str> for Attribute {
    fn from(value: &str) -> Self {
        Attribute::String(value.to_string())
    }
}

/// Builds an array attribute holding `element_type` values.
///
/// Every value must already be of `element_type`, except that integers are widened to floats
/// and integers or floats are read as seconds for time arrays.
pub fn make_array(values: Vec<Attribute>, element_type: AttributeType) -> Result<Attribute, AttributeError> {
    macro_rules! collect_array {
        ($scalar:ident, $array:ident) => {{
            let mut items = Vec::with_capacity(values.len());
            for value in values {
                match value {
                    Attribute::$scalar(item) => items.push(item),
                    other => {
                        return Err(AttributeError::TypeMismatch {
                            expected: AttributeType::$scalar,
                            found: other.get_type(),
                        });
                    }
                }
            }
            Attribute::$array(items)
        }};
    }

    let array = match element_type {
        AttributeType::Element => collect_array!(Element, ElementArray),
        AttributeType::Integer => collect_array!(Integer, IntegerArray),
        AttributeType::Float => {
            let mut items = Vec::with_capacity(values.len());
            for value in values {
                items.push(match value {
                    Attribute::Float(item) => item,
                    Attribute::Integer(item) => item as f32,
                    other => {
                        return Err(AttributeError::TypeMismatch {
                            expected: AttributeType::Float,
                            found: other.get_type(),
                        });
                    }
                });
            }
            Attribute::FloatArray(items)
        }
        AttributeType::Boolean => collect_array!(Boolean, BooleanArray),
        AttributeType::String => collect_array!(String, StringArray),
        AttributeType::Binary => collect_array!(Binary, BinaryArray),
        AttributeType::Time => {
            let mut items = Vec::with_capacity(values.len());
            for value in values {
                items.push(match value {
                    Attribute::Time(item) => item,
                    Attribute::Float(item) => Time::from_seconds(item as f64),
                    Attribute::Integer(item) => Time::from_seconds(item as f64),
                    other => {
                        return Err(AttributeError::TypeMismatch {
                            expected: AttributeType::Time,
                            found: other.get_type(),
                        });
                    }
                });
            }
            Attribute::TimeArray(items)
        }
        AttributeType::Color => collect_array!(Color, ColorArray),
        AttributeType::Vector2 => collect_array!(Vector2, Vector2Array),
        AttributeType::Vector3 => collect_array!(Vector3, Vector3Array),
        AttributeType::Vector4 => collect_array!(Vector4, Vector4Array),
        AttributeType::Angle => collect_array!(Angle, AngleArray),
        AttributeType::Quaternion => collect_array!(Quaternion, QuaternionArray),
        AttributeType::Matrix => collect_array!(Matrix, MatrixArray),
        array_type => return Err(AttributeError::ArrayOfArrays(array_type)),
    };

    Ok(array)
}
