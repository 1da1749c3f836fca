use std::{
    io::{BufRead, Error, Write},
    str::FromStr,
};

use indexmap::IndexMap;
use thiserror::Error as ThisError;
use tracing::{debug, trace};
use uuid::Uuid as UUID;

use crate::{
    Attribute, AttributeError, DataModel, DataModelError, Element, Header, Serializer,
    attribute::{Angle, AttributeType, BinaryBlock, Color, Matrix, Quaternion, Time, Vector2, Vector3, Vector4, make_array},
    graph::{PendingReferences, collect_users},
    serializing::Encoding,
};

#[derive(Debug, ThisError)]
pub enum Keyvalues2SerializationError {
    #[error("IO Error: {0}")]
    Io(#[from] Error),
    #[error("Header Serializer Version Is Different")]
    InvalidEncodingVersion,
    #[error("Header Serializer Is Different")]
    WrongEncoding,
    #[error("Data Model Has No Root Element")]
    MissingRoot,
    #[error("Found Unknown Token: {0} Line: {1}")]
    UnknownToken(char, usize),
    #[error("Found Unknown Escape Character: {0} Line: {1}")]
    UnknownEscapeCharacter(char, usize),
    #[error("Invalid Token On Line: {0}")]
    InvalidToken(usize),
    #[error("Unexpected End Of File On Line: {0}")]
    UnexpectedEndOfFile(usize),
    #[error("Failed To Parse Integer On Line: {0}")]
    FailedToParseInteger(usize),
    #[error("Failed To Parse Float On Line: {0}")]
    FailedToParseFloat(usize),
    #[error("Failed To Parse UUID On Line: {0}")]
    FailedToParseUUID(usize),
    #[error("Wrong Attribute Type On Line: {0}")]
    AttributeType(usize),
    #[error("Duplicate Element Id: {0}")]
    DuplicateElementId(UUID),
    #[error("Invalid Attribute On Line: {0}")]
    InvalidAttribute(usize),
    #[error("Element {id} Referenced By \"{attribute}\" On {owner} Is Never Defined")]
    UnresolvedReference { id: UUID, owner: UUID, attribute: String },
    #[error("Attribute Error: {0}")]
    Attribute(#[from] AttributeError),
    #[error("Data Model Error: {0}")]
    DataModel(#[from] DataModelError),
}

/// Formats a float with ten decimals, then drops trailing zeros and a trailing point.
fn format_double(value: f64) -> String {
    let mut text = format!("{:.10}", value);
    if text.contains('.') {
        let trimmed = text.trim_end_matches('0').trim_end_matches('.').len();
        text.truncate(trimmed);
    }
    text
}

/// Formats the shortest decimal that reads back as `value`.
fn format_float(value: f32) -> String {
    format_double(value.to_string().parse().unwrap_or(value as f64))
}

fn escape_string(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for character in value.chars() {
        match character {
            '\\' => escaped.push_str("\\\\"),
            '"' => escaped.push_str("\\\""),
            '\n' => escaped.push_str("\\n"),
            '\t' => escaped.push_str("\\t"),
            '\r' => escaped.push_str("\\r"),
            _ => escaped.push(character),
        }
    }
    escaped
}

fn quote(value: &str) -> String {
    format!("\"{}\"", escape_string(value))
}

/// A value written as the text of a single quoted string.
trait TextValue: Sized {
    fn to_text(&self) -> String;
    fn from_text(text: &str) -> Option<Self>;
}

impl TextValue for i32 {
    fn to_text(&self) -> String {
        self.to_string()
    }

    fn from_text(text: &str) -> Option<Self> {
        text.trim().parse().ok()
    }
}

impl TextValue for f32 {
    fn to_text(&self) -> String {
        format_float(*self)
    }

    fn from_text(text: &str) -> Option<Self> {
        text.trim().parse().ok()
    }
}

impl TextValue for bool {
    fn to_text(&self) -> String {
        String::from(if *self { "1" } else { "0" })
    }

    fn from_text(text: &str) -> Option<Self> {
        match text.trim() {
            "true" => Some(true),
            "false" => Some(false),
            value => value.parse::<i32>().ok().map(|value| value != 0),
        }
    }
}

impl TextValue for String {
    fn to_text(&self) -> String {
        self.clone()
    }

    fn from_text(text: &str) -> Option<Self> {
        Some(text.to_string())
    }
}

impl TextValue for BinaryBlock {
    fn to_text(&self) -> String {
        self.data.iter().fold(String::with_capacity(self.data.len() * 2), |mut output, byte| {
            output.push_str(&format!("{:02X}", byte));
            output
        })
    }

    fn from_text(text: &str) -> Option<Self> {
        let digits: Vec<u8> = text.bytes().filter(|byte| !byte.is_ascii_whitespace()).collect();
        if digits.len() % 2 != 0 {
            return None;
        }

        let data = digits
            .chunks(2)
            .map(|pair| std::str::from_utf8(pair).ok().and_then(|pair| u8::from_str_radix(pair, 16).ok()))
            .collect::<Option<Vec<u8>>>()?;
        Some(BinaryBlock { data })
    }
}

impl TextValue for Time {
    fn to_text(&self) -> String {
        format_double(self.as_seconds())
    }

    fn from_text(text: &str) -> Option<Self> {
        text.trim().parse().ok().map(Time::from_seconds)
    }
}

impl TextValue for Color {
    fn to_text(&self) -> String {
        format!("{} {} {} {}", self.red, self.green, self.blue, self.alpha)
    }

    fn from_text(text: &str) -> Option<Self> {
        let mut components = text.split_whitespace();
        Some(Color {
            red: components.next()?.parse().ok()?,
            green: components.next()?.parse().ok()?,
            blue: components.next()?.parse().ok()?,
            alpha: components.next()?.parse().ok()?,
        })
    }
}

macro_rules! text_float_struct {
    ($($value:ty { $($field:ident),* }),* $(,)?) => {
        $(
            impl TextValue for $value {
                fn to_text(&self) -> String {
                    [$(format_float(self.$field)),*].join(" ")
                }

                fn from_text(text: &str) -> Option<Self> {
                    let mut components = text.split_whitespace();
                    Some(Self {
                        $($field: components.next()?.parse().ok()?,)*
                    })
                }
            }
        )*
    };
}

text_float_struct!(
    Vector2 { x, y },
    Vector3 { x, y, z },
    Vector4 { x, y, z, w },
    Angle { pitch, yaw, roll },
    Quaternion { x, y, z, w },
);

impl TextValue for Matrix {
    fn to_text(&self) -> String {
        self.entries.iter().flatten().map(|entry| format_float(*entry)).collect::<Vec<_>>().join(" ")
    }

    fn from_text(text: &str) -> Option<Self> {
        let mut components = text.split_whitespace();
        let mut entries = [[0.0; 4]; 4];
        for entry in entries.iter_mut().flatten() {
            *entry = components.next()?.parse().ok()?;
        }
        Some(Matrix { entries })
    }
}

fn array_texts<V: TextValue>(values: &[V]) -> Vec<String> {
    values.iter().map(TextValue::to_text).collect()
}

struct StringWriter<'a, T: Write> {
    buffer: T,
    tab_index: usize,
    model: &'a DataModel,
    users: IndexMap<UUID, usize>,
    root: UUID,
}

impl<'a, T: Write> StringWriter<'a, T> {
    fn new(buffer: T, model: &'a DataModel, root: UUID) -> Self {
        Self {
            buffer,
            tab_index: 0,
            model,
            users: collect_users(model),
            root,
        }
    }

    fn write_tabs(&mut self) -> Result<(), Keyvalues2SerializationError> {
        if self.tab_index == 0 {
            return Ok(());
        }
        self.buffer.write_all(&vec![b'\t'; self.tab_index])?;
        Ok(())
    }

    fn write_raw(&mut self, string: &str) -> Result<(), Keyvalues2SerializationError> {
        self.buffer.write_all(string.as_bytes())?;
        Ok(())
    }

    fn write_line(&mut self, string: &str) -> Result<(), Keyvalues2SerializationError> {
        self.write_tabs()?;
        self.buffer.write_all(string.as_bytes())?;
        self.buffer.write_all(b"\n")?;
        Ok(())
    }

    fn write_open_brace(&mut self) -> Result<(), Keyvalues2SerializationError> {
        self.write_line("{")?;
        self.tab_index += 1;
        Ok(())
    }

    fn write_close_brace(&mut self, separator: &str) -> Result<(), Keyvalues2SerializationError> {
        self.tab_index -= 1;
        self.write_line(&format!("}}{}", separator))
    }

    fn write_open_bracket(&mut self) -> Result<(), Keyvalues2SerializationError> {
        self.write_line("[")?;
        self.tab_index += 1;
        Ok(())
    }

    fn write_close_bracket(&mut self) -> Result<(), Keyvalues2SerializationError> {
        self.tab_index -= 1;
        self.write_line("]")
    }

    /// Returns the element if it is written in place of the reference.
    fn inline_target(&self, id: UUID) -> Option<&'a Element> {
        let model = self.model;
        if id == self.root || self.users.get(&id) != Some(&1) {
            return None;
        }
        model.get_element(id).filter(|element| !element.is_placeholder())
    }

    fn write_block(&mut self, element: &Element) -> Result<(), Keyvalues2SerializationError> {
        self.write_line(&quote(element.get_class()))?;
        self.write_element(element, "")?;
        self.write_line("")
    }

    fn write_element(&mut self, element: &Element, separator: &str) -> Result<(), Keyvalues2SerializationError> {
        self.write_open_brace()?;
        self.write_line(&format!("\"id\" \"elementid\" \"{}\"", element.get_id()))?;
        self.write_line(&format!("\"name\" \"string\" {}", quote(element.get_name())))?;

        for (name, attribute) in element.get_attributes() {
            self.write_attribute(name, attribute)?;
        }

        self.write_close_brace(separator)
    }

    fn write_binary(&mut self, value: &BinaryBlock, separator: &str) -> Result<(), Keyvalues2SerializationError> {
        self.write_line("\"")?;
        self.tab_index += 1;
        let text = value.to_text();
        for chunk in text.as_bytes().chunks(80) {
            self.write_line(&String::from_utf8_lossy(chunk))?;
        }
        self.tab_index -= 1;
        self.write_line(&format!("\"{}", separator))
    }

    fn write_reference(&mut self, prefix: &str, value: &Option<UUID>, separator: &str) -> Result<(), Keyvalues2SerializationError> {
        let Some(id) = value else {
            return self.write_line(&format!("{}\"element\" \"\"{}", prefix, separator));
        };

        match self.inline_target(*id) {
            Some(element) => {
                self.write_line(&format!("{}{}", prefix, quote(element.get_class())))?;
                self.write_element(element, separator)
            }
            None => self.write_line(&format!("{}\"element\" \"{}\"{}", prefix, id, separator)),
        }
    }

    fn write_attribute(&mut self, name: &str, attribute: &Attribute) -> Result<(), Keyvalues2SerializationError> {
        let key = quote(name);
        let type_name = attribute.get_type().type_name();

        let value = match attribute {
            Attribute::Element(value) => return self.write_reference(&format!("{} ", key), value, ""),
            Attribute::Binary(value) => {
                self.write_line(&format!("{} \"{}\"", key, type_name))?;
                return self.write_binary(value, "");
            }
            Attribute::ElementArray(values) => {
                self.write_line(&format!("{} \"{}\"", key, type_name))?;
                self.write_open_bracket()?;
                for (index, value) in values.iter().enumerate() {
                    let separator = if index + 1 < values.len() { "," } else { "" };
                    self.write_reference("", value, separator)?;
                }
                return self.write_close_bracket();
            }
            Attribute::BinaryArray(values) => {
                self.write_line(&format!("{} \"{}\"", key, type_name))?;
                self.write_open_bracket()?;
                for (index, value) in values.iter().enumerate() {
                    let separator = if index + 1 < values.len() { "," } else { "" };
                    self.write_binary(value, separator)?;
                }
                return self.write_close_bracket();
            }
            Attribute::Integer(value) => value.to_text(),
            Attribute::Float(value) => value.to_text(),
            Attribute::Boolean(value) => value.to_text(),
            Attribute::String(value) => value.to_text(),
            Attribute::Time(value) => value.to_text(),
            Attribute::Color(value) => value.to_text(),
            Attribute::Vector2(value) => value.to_text(),
            Attribute::Vector3(value) => value.to_text(),
            Attribute::Vector4(value) => value.to_text(),
            Attribute::Angle(value) => value.to_text(),
            Attribute::Quaternion(value) => value.to_text(),
            Attribute::Matrix(value) => value.to_text(),
            Attribute::IntegerArray(values) => return self.write_array(&key, type_name, array_texts(values)),
            Attribute::FloatArray(values) => return self.write_array(&key, type_name, array_texts(values)),
            Attribute::BooleanArray(values) => return self.write_array(&key, type_name, array_texts(values)),
            Attribute::StringArray(values) => return self.write_array(&key, type_name, array_texts(values)),
            Attribute::TimeArray(values) => return self.write_array(&key, type_name, array_texts(values)),
            Attribute::ColorArray(values) => return self.write_array(&key, type_name, array_texts(values)),
            Attribute::Vector2Array(values) => return self.write_array(&key, type_name, array_texts(values)),
            Attribute::Vector3Array(values) => return self.write_array(&key, type_name, array_texts(values)),
            Attribute::Vector4Array(values) => return self.write_array(&key, type_name, array_texts(values)),
            Attribute::AngleArray(values) => return self.write_array(&key, type_name, array_texts(values)),
            Attribute::QuaternionArray(values) => return self.write_array(&key, type_name, array_texts(values)),
            Attribute::MatrixArray(values) => return self.write_array(&key, type_name, array_texts(values)),
        };

        self.write_line(&format!("{} \"{}\" {}", key, type_name, quote(&value)))
    }

    fn write_array(&mut self, key: &str, type_name: &str, values: Vec<String>) -> Result<(), Keyvalues2SerializationError> {
        self.write_line(&format!("{} \"{}\"", key, type_name))?;
        self.write_open_bracket()?;
        if let Some((last, values)) = values.split_last() {
            for value in values {
                self.write_line(&format!("{},", quote(value)))?;
            }
            self.write_line(&quote(last))?;
        }
        self.write_close_bracket()
    }
}

#[derive(Debug, PartialEq)]
enum StringToken {
    String(String),
    OpenBrace,
    CloseBrace,
    OpenBracket,
    CloseBracket,
}

struct StringReader<B: BufRead> {
    buffer: B,
    line_count: usize,
    current_line: Vec<char>,
    cursor_position: usize,
}

impl<B: BufRead> StringReader<B> {
    fn new(buffer: B) -> Self {
        Self {
            buffer,
            line_count: 0,
            current_line: Vec::new(),
            cursor_position: 0,
        }
    }

    /// Returns the next character, moving on to the following lines as needed.
    fn next_character(&mut self) -> Result<Option<char>, Keyvalues2SerializationError> {
        while self.cursor_position >= self.current_line.len() {
            if !self.next_line()? {
                return Ok(None);
            }
        }

        let character = self.current_line[self.cursor_position];
        self.cursor_position += 1;
        Ok(Some(character))
    }

    fn next_token(&mut self) -> Result<Option<StringToken>, Keyvalues2SerializationError> {
        loop {
            let character = match self.next_character()? {
                Some(character) => character,
                None => return Ok(None),
            };

            match character {
                '"' => return self.read_quoted().map(Some),
                '{' => return Ok(Some(StringToken::OpenBrace)),
                '}' => return Ok(Some(StringToken::CloseBrace)),
                '[' => return Ok(Some(StringToken::OpenBracket)),
                ']' => return Ok(Some(StringToken::CloseBracket)),
                ',' => continue,
                '/' if self.current_line.get(self.cursor_position) == Some(&'/') => {
                    self.cursor_position = self.current_line.len();
                }
                character if character.is_whitespace() => continue,
                character => return Err(Keyvalues2SerializationError::UnknownToken(character, self.line_count)),
            }
        }
    }

    fn read_quoted(&mut self) -> Result<StringToken, Keyvalues2SerializationError> {
        let mut string_token = String::new();
        let mut escaped = false;

        loop {
            let character = match self.next_character()? {
                Some(character) => character,
                None => return Err(Keyvalues2SerializationError::UnexpectedEndOfFile(self.line_count)),
            };

            if escaped {
                string_token.push(match character {
                    'n' => '\n',
                    't' => '\t',
                    'r' => '\r',
                    '\\' | '"' | '\'' => character,
                    _ => return Err(Keyvalues2SerializationError::UnknownEscapeCharacter(character, self.line_count)),
                });
                escaped = false;
                continue;
            }

            match character {
                '\\' => escaped = true,
                '"' => return Ok(StringToken::String(string_token)),
                _ => string_token.push(character),
            }
        }
    }

    fn next_line(&mut self) -> Result<bool, Keyvalues2SerializationError> {
        let mut line = String::new();
        let byte_count = self.buffer.read_line(&mut line)?;
        if byte_count == 0 {
            return Ok(false);
        }
        self.current_line = line.chars().collect();
        self.cursor_position = 0;
        self.line_count += 1;
        Ok(true)
    }
}

fn parse_reference(text: &str, line: usize) -> Result<Option<UUID>, Keyvalues2SerializationError> {
    let text = text.trim();
    if text.is_empty() {
        return Ok(None);
    }
    UUID::from_str(text).map(Some).map_err(|_| Keyvalues2SerializationError::FailedToParseUUID(line))
}

fn parse_value(attribute_type: AttributeType, text: &str, line: usize) -> Result<Attribute, Keyvalues2SerializationError> {
    macro_rules! parse {
        ($value:ty, $variant:ident, $error:ident) => {
            Attribute::$variant(<$value>::from_text(text).ok_or(Keyvalues2SerializationError::$error(line))?)
        };
    }

    Ok(match attribute_type {
        AttributeType::Element => Attribute::Element(parse_reference(text, line)?),
        AttributeType::Integer => parse!(i32, Integer, FailedToParseInteger),
        AttributeType::Float => parse!(f32, Float, FailedToParseFloat),
        AttributeType::Boolean => parse!(bool, Boolean, FailedToParseInteger),
        AttributeType::String => Attribute::String(text.to_string()),
        AttributeType::Binary => parse!(BinaryBlock, Binary, InvalidAttribute),
        AttributeType::Time => parse!(Time, Time, FailedToParseFloat),
        AttributeType::Color => parse!(Color, Color, FailedToParseInteger),
        AttributeType::Vector2 => parse!(Vector2, Vector2, FailedToParseFloat),
        AttributeType::Vector3 => parse!(Vector3, Vector3, FailedToParseFloat),
        AttributeType::Vector4 => parse!(Vector4, Vector4, FailedToParseFloat),
        AttributeType::Angle => parse!(Angle, Angle, FailedToParseFloat),
        AttributeType::Quaternion => parse!(Quaternion, Quaternion, FailedToParseFloat),
        AttributeType::Matrix => parse!(Matrix, Matrix, FailedToParseFloat),
        _ => return Err(Keyvalues2SerializationError::AttributeType(line)),
    })
}

/// A reference read inside an element, recorded once the element's id is known.
struct ReadReference {
    target: UUID,
    attribute: String,
    index: Option<usize>,
}

struct ElementReader<B: BufRead> {
    reader: StringReader<B>,
    model: DataModel,
    pending: PendingReferences,
    element_path: Option<Vec<String>>,
    path_length: usize,
}

impl<B: BufRead> ElementReader<B> {
    fn new(buffer: B, header: &Header, element_path: Option<&[&str]>) -> Self {
        Self {
            reader: StringReader::new(buffer),
            model: DataModel::new(header.format.clone(), header.format_version),
            pending: PendingReferences::default(),
            element_path: element_path.map(|path| path.iter().map(|name| name.to_lowercase()).collect()),
            path_length: element_path.map_or(0, |path| path.len()),
        }
    }

    fn next_token(&mut self) -> Result<StringToken, Keyvalues2SerializationError> {
        self.reader
            .next_token()?
            .ok_or(Keyvalues2SerializationError::UnexpectedEndOfFile(self.reader.line_count))
    }

    fn next_string(&mut self) -> Result<String, Keyvalues2SerializationError> {
        match self.next_token()? {
            StringToken::String(value) => Ok(value),
            _ => Err(Keyvalues2SerializationError::InvalidToken(self.reader.line_count)),
        }
    }

    fn expect_open_brace(&mut self) -> Result<(), Keyvalues2SerializationError> {
        match self.next_token()? {
            StringToken::OpenBrace => Ok(()),
            _ => Err(Keyvalues2SerializationError::InvalidToken(self.reader.line_count)),
        }
    }

    /// Consumes the rest of an element body without reading it.
    fn skip_element(&mut self) -> Result<(), Keyvalues2SerializationError> {
        let mut depth = 1;
        while depth > 0 {
            match self.next_token()? {
                StringToken::OpenBrace => depth += 1,
                StringToken::CloseBrace => depth -= 1,
                _ => {}
            }
        }
        Ok(())
    }

    /// Decides whether an element with `depth` open ancestors is part of the requested subtree.
    fn keep_element(&mut self, name: &str, depth: usize) -> bool {
        let Some(path) = self.element_path.as_mut() else {
            return true;
        };

        if let Some(next) = path.first() {
            if name.to_lowercase() != *next {
                trace!(name, depth, "skipping element off the element path");
                return false;
            }
            path.remove(0);
            return true;
        }

        if depth <= self.path_length {
            trace!(name, depth, "skipping element outside of the element path");
            return false;
        }

        true
    }

    fn read_array(
        &mut self,
        element_type: AttributeType,
        depth: usize,
        attribute_name: &str,
        references: &mut Vec<ReadReference>,
    ) -> Result<Attribute, Keyvalues2SerializationError> {
        let mut values = Vec::new();

        loop {
            match self.next_token()? {
                StringToken::CloseBracket => break,
                StringToken::String(text) if element_type == AttributeType::Element => {
                    if text == "element" {
                        let reference = parse_reference(&self.next_string()?, self.reader.line_count)?;
                        if let Some(target) = reference {
                            references.push(ReadReference {
                                target,
                                attribute: attribute_name.to_string(),
                                index: Some(values.len()),
                            });
                        }
                        values.push(Attribute::Element(reference));
                        continue;
                    }

                    self.expect_open_brace()?;
                    let child = self.read_element(text, depth + 1, false)?;
                    values.push(Attribute::Element(child));
                }
                StringToken::String(text) => values.push(parse_value(element_type, &text, self.reader.line_count)?),
                _ => return Err(Keyvalues2SerializationError::InvalidToken(self.reader.line_count)),
            }
        }

        Ok(make_array(values, element_type)?)
    }

    /// Reads an element body after its opening brace. Returns None if the element was skipped.
    fn read_element(&mut self, class: String, depth: usize, always_keep: bool) -> Result<Option<UUID>, Keyvalues2SerializationError> {
        let mut attributes = IndexMap::new();
        let mut references = Vec::new();
        let mut element_id = None;
        let mut element_name: Option<String> = None;
        let mut decided = always_keep;

        loop {
            let attribute_name = match self.next_token()? {
                StringToken::String(attribute_name) => attribute_name,
                StringToken::CloseBrace => break,
                _ => return Err(Keyvalues2SerializationError::InvalidToken(self.reader.line_count)),
            };
            let attribute_type = self.next_string()?;

            if attribute_name == "id" {
                if attribute_type != "elementid" {
                    return Err(Keyvalues2SerializationError::AttributeType(self.reader.line_count));
                }

                let id = parse_reference(&self.next_string()?, self.reader.line_count)?
                    .ok_or(Keyvalues2SerializationError::FailedToParseUUID(self.reader.line_count))?;

                if let Some(id) = element_id {
                    return Err(Keyvalues2SerializationError::DuplicateElementId(id));
                }
                element_id = Some(id);
                continue;
            }

            if attribute_name == "name" {
                if attribute_type != "string" {
                    return Err(Keyvalues2SerializationError::AttributeType(self.reader.line_count));
                }

                let name = self.next_string()?;
                if !decided {
                    decided = true;
                    if !self.keep_element(&name, depth) {
                        self.skip_element()?;
                        return Ok(None);
                    }
                }
                element_name = Some(name);
                continue;
            }

            let attribute = match AttributeType::from_type_name(&attribute_type) {
                Some(array_type) if array_type.is_array() => {
                    match self.next_token()? {
                        StringToken::OpenBracket => {}
                        _ => return Err(Keyvalues2SerializationError::InvalidToken(self.reader.line_count)),
                    }

                    let element_type = array_type
                        .element_type()
                        .ok_or(Keyvalues2SerializationError::AttributeType(self.reader.line_count))?;
                    self.read_array(element_type, depth, &attribute_name, &mut references)?
                }
                Some(scalar_type) => {
                    let value = parse_value(scalar_type, &self.next_string()?, self.reader.line_count)?;
                    if let Attribute::Element(Some(target)) = value {
                        references.push(ReadReference {
                            target,
                            attribute: attribute_name.clone(),
                            index: None,
                        });
                    }
                    value
                }
                None => {
                    self.expect_open_brace()?;
                    Attribute::Element(self.read_element(attribute_type, depth + 1, false)?)
                }
            };

            attributes.insert(attribute_name, attribute);
        }

        let name = element_name.unwrap_or_else(|| String::from(Element::DEFAULT_ELEMENT_NAME));
        if !decided && !self.keep_element(&name, depth) {
            return Ok(None);
        }

        let id = element_id.unwrap_or_else(UUID::new_v4);
        let mut element = Element::new(name, class, id);
        for (attribute_name, attribute) in attributes {
            element.insert_attribute(attribute_name, attribute);
        }
        self.model.insert_element(element)?;

        for reference in references {
            self.pending.record(reference.target, id, reference.attribute, reference.index);
        }

        Ok(Some(id))
    }

    fn read_document(&mut self) -> Result<(), Keyvalues2SerializationError> {
        let mut read_root = false;

        while let Some(token) = self.reader.next_token()? {
            let StringToken::String(class) = token else {
                return Err(Keyvalues2SerializationError::InvalidToken(self.reader.line_count));
            };
            self.expect_open_brace()?;

            let id = self.read_element(class, 0, !read_root)?;
            if !read_root {
                read_root = true;
                if let Some(id) = id {
                    self.model.set_root(id);
                }
            }
        }

        Ok(())
    }

    /// Checks every reference read against the elements defined.
    fn resolve_references(&mut self) -> Result<(), Keyvalues2SerializationError> {
        let unresolved: Vec<_> = self
            .pending
            .unresolved(&self.model)
            .map(|(target, slot)| (target, slot.clone()))
            .collect();

        for (target, slot) in unresolved {
            if self.element_path.is_none() {
                return Err(Keyvalues2SerializationError::UnresolvedReference {
                    id: target,
                    owner: slot.owner,
                    attribute: slot.attribute,
                });
            }

            trace!(%target, owner = %slot.owner, attribute = %slot.attribute, index = ?slot.index, "reference left as placeholder");
            self.model.add_placeholder(target);
        }

        Ok(())
    }
}

fn check_header(header: &Header) -> Result<(), Keyvalues2SerializationError> {
    if header.encoding != Encoding::KeyValues2 {
        return Err(Keyvalues2SerializationError::WrongEncoding);
    }

    if !KeyValues2Serializer::versions().contains(&header.encoding_version) {
        return Err(Keyvalues2SerializationError::InvalidEncodingVersion);
    }

    Ok(())
}

/// The `keyvalues2` text encoding.
///
/// Elements used by exactly one attribute are written inside it. Every other element is written at the top level
/// after the root and referred to by id.
pub struct KeyValues2Serializer;

impl Serializer for KeyValues2Serializer {
    type Error = Keyvalues2SerializationError;

    fn name() -> &'static str {
        "keyvalues2"
    }

    fn versions() -> &'static [i32] {
        &[1]
    }

    fn serialize(buffer: &mut impl Write, header: &Header, model: &DataModel) -> Result<(), Self::Error> {
        check_header(header)?;

        let root = model.root().ok_or(Keyvalues2SerializationError::MissingRoot)?;
        let mut writer = StringWriter::new(buffer, model, root.get_id());

        debug!(version = header.encoding_version, elements = writer.users.len(), "writing keyvalues2 elements");

        writer.write_raw(&header.create_header())?;
        writer.write_block(root)?;

        let shared: Vec<UUID> = writer
            .users
            .iter()
            .filter(|(id, users)| **id != root.get_id() && **users > 1)
            .map(|(id, _)| *id)
            .collect();

        for id in shared {
            match model.get_element(id) {
                Some(element) if !element.is_placeholder() => writer.write_block(element)?,
                _ => {}
            }
        }

        Ok(())
    }

    fn deserialize(buffer: &mut impl BufRead, header: &Header, element_path: Option<&[&str]>) -> Result<DataModel, Self::Error> {
        check_header(header)?;

        let mut reader = ElementReader::new(buffer, header, element_path);
        reader.read_document()?;
        reader.resolve_references()?;

        debug!(
            version = header.encoding_version,
            elements = reader.model.len(),
            partial = element_path.is_some(),
            "read keyvalues2 elements"
        );

        Ok(reader.model)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens(text: &str) -> Vec<StringToken> {
        let mut reader = StringReader::new(text.as_bytes());
        let mut tokens = Vec::new();
        while let Some(token) = reader.next_token().unwrap() {
            tokens.push(token);
        }
        tokens
    }

    #[test]
    fn floats_drop_trailing_zeros() {
        assert_eq!(format_double(10.0), "10");
        assert_eq!(format_double(0.5), "0.5");
        assert_eq!(format_double(-2.25), "-2.25");
        assert_eq!(format_double(0.0001), "0.0001");
        assert_eq!(format_float(0.1), "0.1");
        assert_eq!(format_float(100.0), "100");
    }

    #[test]
    fn tokenizer_reads_separators_and_comments() {
        let text = "// comment\n\"a\" { [ \"b\", \"c\" ] } // trailing\n}";
        assert_eq!(
            tokens(text),
            vec![
                StringToken::String(String::from("a")),
                StringToken::OpenBrace,
                StringToken::OpenBracket,
                StringToken::String(String::from("b")),
                StringToken::String(String::from("c")),
                StringToken::CloseBracket,
                StringToken::CloseBrace,
                StringToken::CloseBrace,
            ]
        );
    }

    #[test]
    fn escaped_strings_read_back() {
        let original = "quote \" slash \\ tab \t line \n end";
        let text = quote(original);
        assert_eq!(tokens(&text), vec![StringToken::String(String::from(original))]);
    }

    #[test]
    fn strings_may_span_lines() {
        assert_eq!(tokens("\"AB\n\tCD\""), vec![StringToken::String(String::from("AB\n\tCD"))]);
    }

    #[test]
    fn unterminated_string_is_end_of_file() {
        let mut reader = StringReader::new("\"abc".as_bytes());
        assert!(matches!(reader.next_token(), Err(Keyvalues2SerializationError::UnexpectedEndOfFile(1))));
    }

    #[test]
    fn binary_text_ignores_whitespace() {
        let block = BinaryBlock::from_text("\n\t\t0A FF\n\t10\n").unwrap();
        assert_eq!(block.data, vec![0x0A, 0xFF, 0x10]);
        assert_eq!(block.to_text(), "0AFF10");
        assert!(BinaryBlock::from_text("ABC").is_none());
    }
}
