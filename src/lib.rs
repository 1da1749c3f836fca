//! Reading and writing DMX data models.
//!
//! A [DataModel] owns a graph of [Element]s, each holding named [Attribute]s. Models are written and read with
//! the binary, binary_proto and keyvalues2 encodings.

mod attribute;

pub use attribute::Angle;
pub use attribute::Attribute;
pub use attribute::AttributeError;
pub use attribute::AttributeType;
pub use attribute::AttributeValue;
pub use attribute::BinaryBlock;
pub use attribute::Color;
pub use attribute::Matrix;
pub use attribute::Quaternion;
pub use attribute::Time;
pub use attribute::Vector2;
pub use attribute::Vector3;
pub use attribute::Vector4;
pub use attribute::make_array;

mod element;

pub use element::Element;

mod datamodel;

pub use datamodel::DataModel;
pub use datamodel::DataModelError;

pub mod graph;

mod serializing;

pub use serializing::Encoding;
pub use serializing::Header;
pub use serializing::SerializationError;
pub use serializing::Serializer;
pub use serializing::deserialize;
pub use serializing::load;
pub use serializing::parse;
pub use serializing::serialize;
pub use serializing::serialize_to_bytes;
pub use serializing::serialize_to_string;

pub mod serializers;

pub mod types;
