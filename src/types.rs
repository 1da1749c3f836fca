//! Binary type id tables.
//!
//! Binary files tag every attribute with a single byte. Slot 0 is unused, slots 1 to 14 hold the scalar
//! types and slots 15 to 28 hold the arrays of those scalars in the same order.

use thiserror::Error as ThisError;

use crate::{attribute::AttributeType, serializing::Encoding};

#[derive(Debug, ThisError)]
pub enum TypeTableError {
    #[error("Encoding {0} Has No Type Ids")]
    NoTypeIds(Encoding),
    #[error("Encoding {encoding} Version {version} Has No Type Table")]
    UnsupportedEncoding { encoding: Encoding, version: i32 },
    #[error("Unknown Type Id {id} For {encoding} Version {version}")]
    UnknownTypeId { id: u8, encoding: Encoding, version: i32 },
    #[error("Type {attribute_type} Is Not Supported By {encoding} Version {version}")]
    UnsupportedType {
        attribute_type: AttributeType,
        encoding: Encoding,
        version: i32,
    },
    #[error("Unknown Type Name \"{0}\"")]
    UnknownTypeName(String),
}

type TypeTable = [Option<AttributeType>; 29];

/// Binary version 1 and 2 and binary_proto. Slots 7 and 21 held object ids, which are no longer supported.
static LEGACY_TYPES: TypeTable = [
    None,
    Some(AttributeType::Element),
    Some(AttributeType::Integer),
    Some(AttributeType::Float),
    Some(AttributeType::Boolean),
    Some(AttributeType::String),
    Some(AttributeType::Binary),
    None,
    Some(AttributeType::Color),
    Some(AttributeType::Vector2),
    Some(AttributeType::Vector3),
    Some(AttributeType::Vector4),
    Some(AttributeType::Angle),
    Some(AttributeType::Quaternion),
    Some(AttributeType::Matrix),
    Some(AttributeType::ElementArray),
    Some(AttributeType::IntegerArray),
    Some(AttributeType::FloatArray),
    Some(AttributeType::BooleanArray),
    Some(AttributeType::StringArray),
    Some(AttributeType::BinaryArray),
    None,
    Some(AttributeType::ColorArray),
    Some(AttributeType::Vector2Array),
    Some(AttributeType::Vector3Array),
    Some(AttributeType::Vector4Array),
    Some(AttributeType::AngleArray),
    Some(AttributeType::QuaternionArray),
    Some(AttributeType::MatrixArray),
];

/// Binary version 3 to 5.
static MODERN_TYPES: TypeTable = [
    None,
    Some(AttributeType::Element),
    Some(AttributeType::Integer),
    Some(AttributeType::Float),
    Some(AttributeType::Boolean),
    Some(AttributeType::String),
    Some(AttributeType::Binary),
    Some(AttributeType::Time),
    Some(AttributeType::Color),
    Some(AttributeType::Vector2),
    Some(AttributeType::Vector3),
    Some(AttributeType::Vector4),
    Some(AttributeType::Angle),
    Some(AttributeType::Quaternion),
    Some(AttributeType::Matrix),
    Some(AttributeType::ElementArray),
    Some(AttributeType::IntegerArray),
    Some(AttributeType::FloatArray),
    Some(AttributeType::BooleanArray),
    Some(AttributeType::StringArray),
    Some(AttributeType::BinaryArray),
    Some(AttributeType::TimeArray),
    Some(AttributeType::ColorArray),
    Some(AttributeType::Vector2Array),
    Some(AttributeType::Vector3Array),
    Some(AttributeType::Vector4Array),
    Some(AttributeType::AngleArray),
    Some(AttributeType::QuaternionArray),
    Some(AttributeType::MatrixArray),
];

fn type_table(encoding: Encoding, version: i32) -> Result<&'static TypeTable, TypeTableError> {
    match (encoding, version) {
        (Encoding::Binary, 1..=2) | (Encoding::BinaryProto, 2) => Ok(&LEGACY_TYPES),
        (Encoding::Binary, 3..=5) => Ok(&MODERN_TYPES),
        (Encoding::KeyValues2, _) => Err(TypeTableError::NoTypeIds(encoding)),
        _ => Err(TypeTableError::UnsupportedEncoding { encoding, version }),
    }
}

/// Returns the wire byte used for `attribute_type`.
pub fn type_id_for(attribute_type: AttributeType, encoding: Encoding, version: i32) -> Result<u8, TypeTableError> {
    let table = type_table(encoding, version)?;

    table
        .iter()
        .position(|slot| *slot == Some(attribute_type))
        .map(|index| index as u8)
        .ok_or(TypeTableError::UnsupportedType {
            attribute_type,
            encoding,
            version,
        })
}

/// Returns the type stored under the wire byte `id`.
pub fn type_for_id(id: u8, encoding: Encoding, version: i32) -> Result<AttributeType, TypeTableError> {
    let table = type_table(encoding, version)?;

    table
        .get(id as usize)
        .copied()
        .flatten()
        .ok_or(TypeTableError::UnknownTypeId { id, encoding, version })
}

/// Returns the type with the KeyValues2 name `name`.
pub fn type_for_name(name: &str) -> Result<AttributeType, TypeTableError> {
    AttributeType::from_type_name(name).ok_or_else(|| TypeTableError::UnknownTypeName(name.to_string()))
}
