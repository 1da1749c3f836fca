use std::{
    fmt::{self, Display, Formatter},
    fs::{File, write},
    io::{BufRead, BufReader, Error, ErrorKind, Read, Write},
    path::Path,
    str::FromStr,
    sync::LazyLock,
};

use regex::Regex;
use thiserror::Error as ThisError;
use tracing::debug;

use crate::{
    DataModel,
    serializers::{BinaryProtoSerializer, BinarySerializationError, BinarySerializer, KeyValues2Serializer, Keyvalues2SerializationError},
};

#[derive(Debug, ThisError)]
pub enum SerializationError {
    #[error("IO Error: {0}")]
    Io(#[from] Error),
    #[error("Unsupported Encoding \"{0}\"")]
    UnsupportedEncoding(String),
    #[error("Encoding {encoding} Does Not Support Version {version}")]
    UnsupportedVersion { encoding: Encoding, version: i32 },
    #[error("Malformed Header: {0:?}")]
    MalformedHeader(String),
    #[error("Format Name {0:?} Can't Be Written In A Header")]
    InvalidFormatName(String),
    #[error("Encoding {0} Is Not A Text Encoding")]
    NotText(Encoding),
    #[error("Binary Error: {0}")]
    Binary(#[from] BinarySerializationError),
    #[error("KeyValues2 Error: {0}")]
    KeyValues2(#[from] Keyvalues2SerializationError),
}

impl SerializationError {
    /// Returns true if the input ended before the document did.
    pub fn is_truncated(&self) -> bool {
        fn end_of_file(error: &Error) -> bool {
            error.kind() == ErrorKind::UnexpectedEof
        }

        match self {
            Self::Io(error) => end_of_file(error),
            Self::Binary(BinarySerializationError::Io(error)) => end_of_file(error),
            Self::KeyValues2(Keyvalues2SerializationError::Io(error)) => end_of_file(error),
            Self::KeyValues2(Keyvalues2SerializationError::UnexpectedEndOfFile(_)) => true,
            _ => false,
        }
    }
}

/// The encodings a data model can be written in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Encoding {
    Binary,
    /// The binary layout used before the standard header existed.
    BinaryProto,
    KeyValues2,
}

impl Encoding {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Binary => BinarySerializer::name(),
            Self::BinaryProto => BinaryProtoSerializer::name(),
            Self::KeyValues2 => KeyValues2Serializer::name(),
        }
    }

    /// Returns the encoding versions that can be read and written.
    pub fn versions(&self) -> &'static [i32] {
        match self {
            Self::Binary => BinarySerializer::versions(),
            Self::BinaryProto => BinaryProtoSerializer::versions(),
            Self::KeyValues2 => KeyValues2Serializer::versions(),
        }
    }

    pub fn check_support(&self, version: i32) -> Result<(), SerializationError> {
        if !self.versions().contains(&version) {
            return Err(SerializationError::UnsupportedVersion { encoding: *self, version });
        }
        Ok(())
    }

    pub fn is_text(&self) -> bool {
        matches!(self, Self::KeyValues2)
    }
}

impl Display for Encoding {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Encoding {
    type Err = SerializationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        [Self::Binary, Self::BinaryProto, Self::KeyValues2]
            .into_iter()
            .find(|encoding| encoding.name() == s)
            .ok_or_else(|| SerializationError::UnsupportedEncoding(s.to_string()))
    }
}

static HEADER_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^<!-- dmx encoding (\S+) ([0-9]+) format (\S+) ([0-9]+) -->$").expect("header pattern is valid"));
static PROTO_HEADER_PATTERN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^<!-- DMXVersion binary_v([0-9]+) -->$").expect("header pattern is valid"));

/// The first line of every DMX document.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Header {
    pub encoding: Encoding,
    pub encoding_version: i32,
    pub format: String,
    pub format_version: i32,
}

impl Header {
    /// Input read while looking for the end of the header line.
    const MAX_HEADER_LENGTH: usize = 4096;
    const PROTO_FORMAT: &str = "undefined_format";

    pub fn new(encoding: Encoding, encoding_version: i32, format: impl Into<String>, format_version: i32) -> Self {
        Self {
            encoding,
            encoding_version,
            format: format.into(),
            format_version,
        }
    }

    /// Builds the header for writing `model` with the given encoding.
    pub fn for_model(model: &DataModel, encoding: Encoding, encoding_version: i32) -> Result<Self, SerializationError> {
        encoding.check_support(encoding_version)?;

        let format = model.get_format();
        if encoding != Encoding::BinaryProto && (format.is_empty() || format.contains(char::is_whitespace)) {
            return Err(SerializationError::InvalidFormatName(format.to_string()));
        }

        Ok(Self::new(encoding, encoding_version, format, model.get_format_version()))
    }

    pub fn is_legacy(&self) -> bool {
        self.encoding == Encoding::BinaryProto
    }

    /// Returns the header line, including the trailing new line.
    pub fn create_header(&self) -> String {
        if self.is_legacy() {
            return format!("<!-- DMXVersion binary_v{} -->\n", self.encoding_version);
        }

        format!(
            "<!-- dmx encoding {} {} format {} {} -->\n",
            self.encoding, self.encoding_version, self.format, self.format_version
        )
    }

    /// Parses a header line. Whitespace around the line is ignored.
    pub fn from_string(data: &str) -> Result<Self, SerializationError> {
        let trimmed = data.trim();

        if let Some(captures) = PROTO_HEADER_PATTERN.captures(trimmed) {
            let encoding_version = Self::parse_version(&captures[1], data)?;
            return Ok(Self::new(Encoding::BinaryProto, encoding_version, Self::PROTO_FORMAT, 0));
        }

        let captures = HEADER_PATTERN
            .captures(trimmed)
            .ok_or_else(|| SerializationError::MalformedHeader(data.to_string()))?;

        Ok(Self::new(
            captures[1].parse()?,
            Self::parse_version(&captures[2], data)?,
            &captures[3],
            Self::parse_version(&captures[4], data)?,
        ))
    }

    fn parse_version(version: &str, data: &str) -> Result<i32, SerializationError> {
        version.parse().map_err(|_| SerializationError::MalformedHeader(data.to_string()))
    }

    /// Reads the header up to its closing `>`, leaving the rest of the line in the buffer.
    pub(crate) fn read_from(buffer: &mut impl BufRead) -> Result<Self, SerializationError> {
        let mut data = Vec::new();
        buffer.take(Self::MAX_HEADER_LENGTH as u64).read_until(b'>', &mut data)?;

        if data.last() != Some(&b'>') {
            return Err(SerializationError::MalformedHeader(String::from_utf8_lossy(&data).into_owned()));
        }

        Self::from_string(&String::from_utf8_lossy(&data))
    }
}

/// A codec for one encoding.
pub trait Serializer {
    type Error;

    /// The encoding name written in the header.
    fn name() -> &'static str;

    /// The encoding versions this serializer supports.
    fn versions() -> &'static [i32];

    /// Writes the header and the elements reachable from the root of `model`.
    fn serialize(buffer: &mut impl Write, header: &Header, model: &DataModel) -> Result<(), Self::Error>;

    /// Reads a data model whose header has already been consumed.
    ///
    /// An `element_path` restricts reading to one subtree where the encoding supports it.
    fn deserialize(buffer: &mut impl BufRead, header: &Header, element_path: Option<&[&str]>) -> Result<DataModel, Self::Error>;
}

/// Writes `model` to `buffer` with the given encoding and version.
pub fn serialize(buffer: &mut impl Write, model: &DataModel, encoding: Encoding, version: i32) -> Result<(), SerializationError> {
    let header = Header::for_model(model, encoding, version)?;
    debug!(%encoding, version, format = %header.format, "serializing data model");

    match encoding {
        Encoding::Binary => BinarySerializer::serialize(buffer, &header, model)?,
        Encoding::BinaryProto => BinaryProtoSerializer::serialize(buffer, &header, model)?,
        Encoding::KeyValues2 => KeyValues2Serializer::serialize(buffer, &header, model)?,
    }

    Ok(())
}

pub fn serialize_to_bytes(model: &DataModel, encoding: Encoding, version: i32) -> Result<Vec<u8>, SerializationError> {
    let mut buffer = Vec::new();
    serialize(&mut buffer, model, encoding, version)?;
    Ok(buffer)
}

/// Writes `model` with a text encoding.
pub fn serialize_to_string(model: &DataModel, encoding: Encoding, version: i32) -> Result<String, SerializationError> {
    if !encoding.is_text() {
        return Err(SerializationError::NotText(encoding));
    }

    let buffer = serialize_to_bytes(model, encoding, version)?;
    String::from_utf8(buffer).map_err(|error| SerializationError::Io(Error::new(ErrorKind::InvalidData, error)))
}

/// Reads a data model in any supported encoding.
pub fn deserialize(buffer: &mut impl BufRead, element_path: Option<&[&str]>) -> Result<DataModel, SerializationError> {
    let header = Header::read_from(buffer)?;
    header.encoding.check_support(header.encoding_version)?;
    debug!(encoding = %header.encoding, version = header.encoding_version, format = %header.format, "deserializing data model");

    let model = match header.encoding {
        Encoding::Binary => BinarySerializer::deserialize(buffer, &header, element_path)?,
        Encoding::BinaryProto => BinaryProtoSerializer::deserialize(buffer, &header, element_path)?,
        Encoding::KeyValues2 => KeyValues2Serializer::deserialize(buffer, &header, element_path)?,
    };

    Ok(model)
}

/// Reads a data model from a file.
pub fn load(path: impl AsRef<Path>, element_path: Option<&[&str]>) -> Result<DataModel, SerializationError> {
    let mut buffer = BufReader::new(File::open(path)?);
    deserialize(&mut buffer, element_path)
}

/// Reads a data model from text.
pub fn parse(text: &str, element_path: Option<&[&str]>) -> Result<DataModel, SerializationError> {
    deserialize(&mut text.as_bytes(), element_path)
}

impl DataModel {
    /// Writes the data model to a file. Nothing is written if encoding fails.
    pub fn write_file(&self, path: impl AsRef<Path>, encoding: Encoding, version: i32) -> Result<(), SerializationError> {
        let data = serialize_to_bytes(self, encoding, version)?;
        write(path, data)?;
        Ok(())
    }

    pub fn to_bytes(&self, encoding: Encoding, version: i32) -> Result<Vec<u8>, SerializationError> {
        serialize_to_bytes(self, encoding, version)
    }

    /// Writes the data model as KeyValues2 text.
    pub fn to_text(&self) -> Result<String, SerializationError> {
        serialize_to_string(self, Encoding::KeyValues2, 1)
    }
}
