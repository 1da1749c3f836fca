use std::io::{BufRead, Error, ErrorKind, Read, Write};

use indexmap::IndexSet;
use thiserror::Error as ThisError;
use tracing::debug;
use uuid::Uuid as UUID;

use super::dictionary::{DictionaryLayout, StringDictionary};
use crate::{
    Attribute, DataModel, DataModelError, Header, Serializer,
    attribute::{Angle, AttributeType, BinaryBlock, Color, Matrix, Quaternion, Time, Vector2, Vector3, Vector4},
    serializing::Encoding,
    types::{TypeTableError, type_for_id, type_id_for},
};

#[derive(Debug, ThisError)]
pub enum BinarySerializationError {
    #[error("IO Error: {0}")]
    Io(#[from] Error),
    #[error("To Many Elements To Serialize")]
    TooManyElements,
    #[error("To Many Strings To Serialize")]
    TooManyStrings,
    #[error("Element Has Too Many Attributes To Serialize")]
    TooManyAttributes,
    #[error("Attribute Binary Data Too Long")]
    BinaryDataTooLong,
    #[error("Attribute Array Too Long")]
    AttributeArrayTooLong,
    #[error("Header Serializer Version Is Different")]
    InvalidEncodingVersion,
    #[error("Header Serializer Is Different")]
    WrongEncoding,
    #[error("Data Model Has No Root Element")]
    MissingRoot,
    #[error("String {0:?} Is Not In The String Table")]
    MissingString(String),
    #[error("Invalid String Index {0}")]
    InvalidStringIndex(i32),
    #[error("Element {0} Is Not In The Data Model")]
    MissingElement(UUID),
    #[error("Element Index {0} Was Invalid")]
    InvalidElementIndex(i32),
    #[error("Invalid Length {0}")]
    InvalidLength(i32),
    #[error("Invalid Element Id {0:?}")]
    InvalidUuid(String),
    #[error("Type Error: {0}")]
    TypeTable(#[from] TypeTableError),
    #[error("Data Model Error: {0}")]
    DataModel(#[from] DataModelError),
}

/// Lengths read from a file are only trusted this far when reserving memory.
pub(crate) const MAX_PREALLOCATION: usize = 4096;

/// A value with a fixed little endian layout.
pub(crate) trait BinaryValue: Sized {
    fn read_from(buffer: &mut impl Read) -> Result<Self, Error>;
    fn write_to(&self, buffer: &mut impl Write) -> Result<(), Error>;
}

macro_rules! binary_number {
    ($($number:ty),*) => {
        $(
            impl BinaryValue for $number {
                fn read_from(buffer: &mut impl Read) -> Result<Self, Error> {
                    let mut bytes = [0; size_of::<$number>()];
                    buffer.read_exact(&mut bytes)?;
                    Ok(<$number>::from_le_bytes(bytes))
                }

                fn write_to(&self, buffer: &mut impl Write) -> Result<(), Error> {
                    buffer.write_all(&self.to_le_bytes())
                }
            }
        )*
    };
}

binary_number!(u8, u16, i32, f32);

impl BinaryValue for bool {
    fn read_from(buffer: &mut impl Read) -> Result<Self, Error> {
        Ok(u8::read_from(buffer)? != 0)
    }

    fn write_to(&self, buffer: &mut impl Write) -> Result<(), Error> {
        (*self as u8).write_to(buffer)
    }
}

impl BinaryValue for Time {
    fn read_from(buffer: &mut impl Read) -> Result<Self, Error> {
        Ok(Time::from_ticks(i32::read_from(buffer)?))
    }

    fn write_to(&self, buffer: &mut impl Write) -> Result<(), Error> {
        self.ticks().write_to(buffer)
    }
}

impl BinaryValue for Color {
    fn read_from(buffer: &mut impl Read) -> Result<Self, Error> {
        let mut bytes = [0; 4];
        buffer.read_exact(&mut bytes)?;
        Ok(Color {
            red: bytes[0],
            green: bytes[1],
            blue: bytes[2],
            alpha: bytes[3],
        })
    }

    fn write_to(&self, buffer: &mut impl Write) -> Result<(), Error> {
        buffer.write_all(&[self.red, self.green, self.blue, self.alpha])
    }
}

/// Structs laid out as consecutive floats.
macro_rules! binary_float_struct {
    ($($value:ty { $($field:ident),* }),* $(,)?) => {
        $(
            impl BinaryValue for $value {
                fn read_from(buffer: &mut impl Read) -> Result<Self, Error> {
                    Ok(Self {
                        $($field: f32::read_from(buffer)?,)*
                    })
                }

                fn write_to(&self, buffer: &mut impl Write) -> Result<(), Error> {
                    $(self.$field.write_to(buffer)?;)*
                    Ok(())
                }
            }
        )*
    };
}

binary_float_struct!(
    Vector2 { x, y },
    Vector3 { x, y, z },
    Vector4 { x, y, z, w },
    Angle { pitch, yaw, roll },
    Quaternion { x, y, z, w },
);

impl BinaryValue for Matrix {
    fn read_from(buffer: &mut impl Read) -> Result<Self, Error> {
        let mut entries = [[0.0; 4]; 4];
        for row in entries.iter_mut() {
            for entry in row.iter_mut() {
                *entry = f32::read_from(buffer)?;
            }
        }
        Ok(Matrix { entries })
    }

    fn write_to(&self, buffer: &mut impl Write) -> Result<(), Error> {
        for entry in self.entries.iter().flatten() {
            entry.write_to(buffer)?;
        }
        Ok(())
    }
}

pub(crate) struct BinaryWriter<T: Write> {
    buffer: T,
}

impl<T: Write> BinaryWriter<T> {
    pub fn new(buffer: T) -> Self {
        Self { buffer }
    }

    pub fn write<V: BinaryValue>(&mut self, value: &V) -> Result<(), BinarySerializationError> {
        value.write_to(&mut self.buffer)?;
        Ok(())
    }

    fn write_bytes(&mut self, value: &[u8]) -> Result<(), BinarySerializationError> {
        self.buffer.write_all(value)?;
        Ok(())
    }

    fn write_length(&mut self, value: usize) -> Result<(), BinarySerializationError> {
        if value > i32::MAX as usize {
            return Err(BinarySerializationError::AttributeArrayTooLong);
        }
        self.write(&(value as i32))
    }

    fn write_uuid(&mut self, value: UUID) -> Result<(), BinarySerializationError> {
        self.buffer.write_all(&value.to_bytes_le())?;
        Ok(())
    }

    pub fn write_string(&mut self, value: &str) -> Result<(), BinarySerializationError> {
        self.buffer.write_all(value.as_bytes())?;
        self.buffer.write_all(&[0])?;
        Ok(())
    }

    fn write_binary(&mut self, value: &BinaryBlock) -> Result<(), BinarySerializationError> {
        if value.data.len() > i32::MAX as usize {
            return Err(BinarySerializationError::BinaryDataTooLong);
        }
        self.write(&(value.data.len() as i32))?;
        self.write_bytes(&value.data)
    }

    fn write_array<V: BinaryValue>(&mut self, values: &[V]) -> Result<(), BinarySerializationError> {
        self.write_length(values.len())?;
        for value in values {
            self.write(value)?;
        }
        Ok(())
    }
}

pub(crate) struct BinaryReader<T: BufRead> {
    buffer: T,
}

impl<T: BufRead> BinaryReader<T> {
    pub fn new(buffer: T) -> Self {
        Self { buffer }
    }

    pub fn read<V: BinaryValue>(&mut self) -> Result<V, BinarySerializationError> {
        Ok(V::read_from(&mut self.buffer)?)
    }

    fn skip(&mut self, count: usize) -> Result<(), BinarySerializationError> {
        let mut bytes = vec![0; count];
        self.buffer.read_exact(&mut bytes)?;
        Ok(())
    }

    pub fn read_length(&mut self) -> Result<usize, BinarySerializationError> {
        let length = self.read::<i32>()?;
        usize::try_from(length).map_err(|_| BinarySerializationError::InvalidLength(length))
    }

    pub fn read_string(&mut self) -> Result<String, BinarySerializationError> {
        let mut string_buffer = Vec::new();
        self.buffer.read_until(0, &mut string_buffer)?;

        if string_buffer.pop() != Some(0) {
            return Err(Error::from(ErrorKind::UnexpectedEof).into());
        }

        Ok(String::from_utf8_lossy(&string_buffer).into_owned())
    }

    fn read_uuid(&mut self) -> Result<UUID, BinarySerializationError> {
        let mut buffer = [0; 16];
        self.buffer.read_exact(&mut buffer)?;
        Ok(UUID::from_bytes_le(buffer))
    }

    fn read_binary(&mut self) -> Result<BinaryBlock, BinarySerializationError> {
        let length = self.read_length()?;
        let mut data = Vec::with_capacity(length.min(MAX_PREALLOCATION));
        (&mut self.buffer).take(length as u64).read_to_end(&mut data)?;

        if data.len() != length {
            return Err(Error::from(ErrorKind::UnexpectedEof).into());
        }

        Ok(BinaryBlock { data })
    }

    fn read_array<V: BinaryValue>(&mut self) -> Result<Vec<V>, BinarySerializationError> {
        let length = self.read_length()?;
        let mut values = Vec::with_capacity(length.min(MAX_PREALLOCATION));
        for _ in 0..length {
            values.push(self.read()?);
        }
        Ok(values)
    }
}

/// Returns the elements to write, depth first from the root in attribute order. Placeholders are left out.
fn collect_elements(model: &DataModel, root: UUID) -> IndexSet<UUID> {
    let mut elements = IndexSet::new();
    let mut stack = vec![root];

    while let Some(id) = stack.pop() {
        let Some(element) = model.get_element(id) else {
            continue;
        };

        if element.is_placeholder() || !elements.insert(id) {
            continue;
        }

        let children: Vec<UUID> = element.referenced_elements().collect();
        stack.extend(children.into_iter().rev().filter(|child| !elements.contains(child)));
    }

    elements
}

struct ModelWriter<'a, T: Write> {
    writer: BinaryWriter<T>,
    model: &'a DataModel,
    version: i32,
    encoding: Encoding,
    dictionary: StringDictionary,
    elements: IndexSet<UUID>,
}

impl<T: Write> ModelWriter<'_, T> {
    fn write_reference(&mut self, value: &Option<UUID>) -> Result<(), BinarySerializationError> {
        let Some(id) = value else {
            return self.writer.write(&-1i32);
        };

        if let Some(index) = self.elements.get_index_of(id) {
            return self.writer.write(&(index as i32));
        }

        match self.model.get_element(*id) {
            Some(element) if element.is_placeholder() => {
                if self.version < 5 {
                    return self.writer.write(&-1i32);
                }
                self.writer.write(&-2i32)?;
                self.writer.write_string(&id.to_string())
            }
            _ => Err(BinarySerializationError::MissingElement(*id)),
        }
    }

    fn write_attribute(&mut self, attribute: &Attribute) -> Result<(), BinarySerializationError> {
        match attribute {
            Attribute::Element(value) => self.write_reference(value),
            Attribute::Integer(value) => self.writer.write(value),
            Attribute::Float(value) => self.writer.write(value),
            Attribute::Boolean(value) => self.writer.write(value),
            Attribute::String(value) => {
                if self.version >= 4 {
                    return self.dictionary.write_string(&mut self.writer, value);
                }
                self.writer.write_string(value)
            }
            Attribute::Binary(value) => self.writer.write_binary(value),
            Attribute::Time(value) => self.writer.write(value),
            Attribute::Color(value) => self.writer.write(value),
            Attribute::Vector2(value) => self.writer.write(value),
            Attribute::Vector3(value) => self.writer.write(value),
            Attribute::Vector4(value) => self.writer.write(value),
            Attribute::Angle(value) => self.writer.write(value),
            Attribute::Quaternion(value) => self.writer.write(value),
            Attribute::Matrix(value) => self.writer.write(value),
            Attribute::ElementArray(values) => {
                self.writer.write_length(values.len())?;
                for value in values {
                    self.write_reference(value)?;
                }
                Ok(())
            }
            Attribute::IntegerArray(values) => self.writer.write_array(values),
            Attribute::FloatArray(values) => self.writer.write_array(values),
            Attribute::BooleanArray(values) => self.writer.write_array(values),
            Attribute::StringArray(values) => {
                self.writer.write_length(values.len())?;
                for value in values {
                    self.writer.write_string(value)?;
                }
                Ok(())
            }
            Attribute::BinaryArray(values) => {
                self.writer.write_length(values.len())?;
                for value in values {
                    self.writer.write_binary(value)?;
                }
                Ok(())
            }
            Attribute::TimeArray(values) => self.writer.write_array(values),
            Attribute::ColorArray(values) => self.writer.write_array(values),
            Attribute::Vector2Array(values) => self.writer.write_array(values),
            Attribute::Vector3Array(values) => self.writer.write_array(values),
            Attribute::Vector4Array(values) => self.writer.write_array(values),
            Attribute::AngleArray(values) => self.writer.write_array(values),
            Attribute::QuaternionArray(values) => self.writer.write_array(values),
            Attribute::MatrixArray(values) => self.writer.write_array(values),
        }
    }

    fn write_elements(&mut self) -> Result<(), BinarySerializationError> {
        let model = self.model;

        self.writer.write(&(self.elements.len() as i32))?;

        for id in &self.elements {
            let element = model.get_element(*id).ok_or(BinarySerializationError::MissingElement(*id))?;

            self.dictionary.write_string(&mut self.writer, element.get_class())?;
            if self.version >= 4 {
                self.dictionary.write_string(&mut self.writer, element.get_name())?;
            } else {
                self.writer.write_string(element.get_name())?;
            }
            self.writer.write_uuid(*id)?;
        }

        for index in 0..self.elements.len() {
            let id = self.elements[index];
            let element = model.get_element(id).ok_or(BinarySerializationError::MissingElement(id))?;
            let attributes = element.get_attributes();

            if attributes.len() > i32::MAX as usize {
                return Err(BinarySerializationError::TooManyAttributes);
            }

            self.writer.write(&(attributes.len() as i32))?;

            for (name, attribute) in attributes {
                self.dictionary.write_string(&mut self.writer, name)?;
                self.writer.write(&type_id_for(attribute.get_type(), self.encoding, self.version)?)?;
                self.write_attribute(attribute)?;
            }
        }

        Ok(())
    }
}

fn write_model(buffer: &mut impl Write, header: &Header, model: &DataModel) -> Result<(), BinarySerializationError> {
    let root = model.root_id().ok_or(BinarySerializationError::MissingRoot)?;
    let elements = collect_elements(model, root);

    if elements.len() > i32::MAX as usize {
        return Err(BinarySerializationError::TooManyElements);
    }

    let mut dictionary = StringDictionary::new(DictionaryLayout::for_version(header.encoding, header.encoding_version));
    for id in &elements {
        if let Some(element) = model.get_element(*id) {
            dictionary.insert_element(element);
        }
    }

    debug!(
        encoding = %header.encoding,
        version = header.encoding_version,
        elements = elements.len(),
        strings = dictionary.len(),
        "writing binary elements"
    );

    let mut writer = BinaryWriter::new(buffer);
    writer.write_string(&header.create_header())?;
    dictionary.write(&mut writer)?;

    let mut model_writer = ModelWriter {
        writer,
        model,
        version: header.encoding_version,
        encoding: header.encoding,
        dictionary,
        elements,
    };
    model_writer.write_elements()
}

struct ModelReader<T: BufRead> {
    reader: BinaryReader<T>,
    version: i32,
    encoding: Encoding,
    dictionary: StringDictionary,
    elements: Vec<UUID>,
    model: DataModel,
}

impl<T: BufRead> ModelReader<T> {
    fn read_reference(&mut self) -> Result<Option<UUID>, BinarySerializationError> {
        let index = self.reader.read::<i32>()?;

        match index {
            -1 => Ok(None),
            -2 => {
                let value = self.reader.read_string()?;
                let id = UUID::parse_str(&value).map_err(|_| BinarySerializationError::InvalidUuid(value))?;
                self.model.add_placeholder(id);
                Ok(Some(id))
            }
            _ => usize::try_from(index)
                .ok()
                .and_then(|index| self.elements.get(index))
                .map(|id| Some(*id))
                .ok_or(BinarySerializationError::InvalidElementIndex(index)),
        }
    }

    fn read_references(&mut self) -> Result<Vec<Option<UUID>>, BinarySerializationError> {
        let length = self.reader.read_length()?;
        let mut values = Vec::with_capacity(length.min(MAX_PREALLOCATION));
        for _ in 0..length {
            values.push(self.read_reference()?);
        }
        Ok(values)
    }

    fn read_attribute(&mut self, attribute_type: AttributeType) -> Result<Attribute, BinarySerializationError> {
        Ok(match attribute_type {
            AttributeType::Element => Attribute::Element(self.read_reference()?),
            AttributeType::Integer => Attribute::Integer(self.reader.read()?),
            AttributeType::Float => Attribute::Float(self.reader.read()?),
            AttributeType::Boolean => Attribute::Boolean(self.reader.read()?),
            AttributeType::String => Attribute::String(if self.version >= 4 {
                self.dictionary.read_string(&mut self.reader)?
            } else {
                self.reader.read_string()?
            }),
            AttributeType::Binary => Attribute::Binary(self.reader.read_binary()?),
            AttributeType::Time => Attribute::Time(self.reader.read()?),
            AttributeType::Color => Attribute::Color(self.reader.read()?),
            AttributeType::Vector2 => Attribute::Vector2(self.reader.read()?),
            AttributeType::Vector3 => Attribute::Vector3(self.reader.read()?),
            AttributeType::Vector4 => Attribute::Vector4(self.reader.read()?),
            AttributeType::Angle => Attribute::Angle(self.reader.read()?),
            AttributeType::Quaternion => Attribute::Quaternion(self.reader.read()?),
            AttributeType::Matrix => Attribute::Matrix(self.reader.read()?),
            AttributeType::ElementArray => Attribute::ElementArray(self.read_references()?),
            AttributeType::IntegerArray => Attribute::IntegerArray(self.reader.read_array()?),
            AttributeType::FloatArray => Attribute::FloatArray(self.reader.read_array()?),
            AttributeType::BooleanArray => Attribute::BooleanArray(self.reader.read_array()?),
            AttributeType::StringArray => {
                let length = self.reader.read_length()?;
                let mut values = Vec::with_capacity(length.min(MAX_PREALLOCATION));
                for _ in 0..length {
                    values.push(self.reader.read_string()?);
                }
                Attribute::StringArray(values)
            }
            AttributeType::BinaryArray => {
                let length = self.reader.read_length()?;
                let mut values = Vec::with_capacity(length.min(MAX_PREALLOCATION));
                for _ in 0..length {
                    values.push(self.reader.read_binary()?);
                }
                Attribute::BinaryArray(values)
            }
            AttributeType::TimeArray => Attribute::TimeArray(self.reader.read_array()?),
            AttributeType::ColorArray => Attribute::ColorArray(self.reader.read_array()?),
            AttributeType::Vector2Array => Attribute::Vector2Array(self.reader.read_array()?),
            AttributeType::Vector3Array => Attribute::Vector3Array(self.reader.read_array()?),
            AttributeType::Vector4Array => Attribute::Vector4Array(self.reader.read_array()?),
            AttributeType::AngleArray => Attribute::AngleArray(self.reader.read_array()?),
            AttributeType::QuaternionArray => Attribute::QuaternionArray(self.reader.read_array()?),
            AttributeType::MatrixArray => Attribute::MatrixArray(self.reader.read_array()?),
        })
    }

    fn read_elements(&mut self) -> Result<(), BinarySerializationError> {
        let element_count = self.reader.read_length()?;
        self.elements.reserve(element_count.min(MAX_PREALLOCATION));

        for _ in 0..element_count {
            let element_class = self.dictionary.read_string(&mut self.reader)?;
            let element_name = if self.version >= 4 {
                self.dictionary.read_string(&mut self.reader)?
            } else {
                self.reader.read_string()?
            };
            let element_id = self.reader.read_uuid()?;

            self.model.add_element_with_id(element_name, element_class, element_id)?;
            self.elements.push(element_id);
        }

        debug!(
            encoding = %self.encoding,
            version = self.version,
            elements = element_count,
            "reading binary elements"
        );

        for index in 0..self.elements.len() {
            let id = self.elements[index];
            let attribute_count = self.reader.read_length()?;

            for _ in 0..attribute_count {
                let attribute_name = self.dictionary.read_string(&mut self.reader)?;
                let attribute_type = type_for_id(self.reader.read()?, self.encoding, self.version)?;
                let attribute_value = self.read_attribute(attribute_type)?;

                let element = self.model.get_element_mut(id).ok_or(BinarySerializationError::MissingElement(id))?;
                element.insert_attribute(attribute_name, attribute_value);
            }
        }

        Ok(())
    }
}

fn read_model(buffer: &mut impl BufRead, header: &Header) -> Result<DataModel, BinarySerializationError> {
    let mut reader = BinaryReader::new(buffer);
    reader.skip(2)?; // New line and terminator after the header

    let layout = DictionaryLayout::for_version(header.encoding, header.encoding_version);
    let dictionary = StringDictionary::read(layout, &mut reader)?;

    let mut model_reader = ModelReader {
        reader,
        version: header.encoding_version,
        encoding: header.encoding,
        dictionary,
        elements: Vec::new(),
        model: DataModel::new(header.format.clone(), header.format_version),
    };
    model_reader.read_elements()?;

    Ok(model_reader.model)
}

fn check_header<S: Serializer>(header: &Header, encoding: Encoding) -> Result<(), BinarySerializationError> {
    if header.encoding != encoding {
        return Err(BinarySerializationError::WrongEncoding);
    }

    if !S::versions().contains(&header.encoding_version) {
        return Err(BinarySerializationError::InvalidEncodingVersion);
    }

    Ok(())
}

/// The `binary` encoding, versions 1 to 5.
pub struct BinarySerializer;

impl Serializer for BinarySerializer {
    type Error = BinarySerializationError;

    fn name() -> &'static str {
        "binary"
    }

    fn versions() -> &'static [i32] {
        &[1, 2, 3, 4, 5]
    }

    fn serialize(buffer: &mut impl Write, header: &Header, model: &DataModel) -> Result<(), Self::Error> {
        check_header::<Self>(header, Encoding::Binary)?;
        write_model(buffer, header, model)
    }

    fn deserialize(buffer: &mut impl BufRead, header: &Header, _element_path: Option<&[&str]>) -> Result<DataModel, Self::Error> {
        check_header::<Self>(header, Encoding::Binary)?;
        read_model(buffer, header)
    }
}

/// The `binary_proto` encoding, which uses the legacy header and type table with no string table.
pub struct BinaryProtoSerializer;

impl Serializer for BinaryProtoSerializer {
    type Error = BinarySerializationError;

    fn name() -> &'static str {
        "binary_proto"
    }

    fn versions() -> &'static [i32] {
        &[2]
    }

    fn serialize(buffer: &mut impl Write, header: &Header, model: &DataModel) -> Result<(), Self::Error> {
        check_header::<Self>(header, Encoding::BinaryProto)?;
        write_model(buffer, header, model)
    }

    fn deserialize(buffer: &mut impl BufRead, header: &Header, _element_path: Option<&[&str]>) -> Result<DataModel, Self::Error> {
        check_header::<Self>(header, Encoding::BinaryProto)?;
        read_model(buffer, header)
    }
}
