use std::io::{BufRead, Write};

use indexmap::IndexSet;

use super::binary::{BinaryReader, BinarySerializationError, BinaryWriter, MAX_PREALLOCATION};
use crate::{Attribute, Element, serializing::Encoding};

/// How the string table is laid out for one encoding version.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum DictionaryLayout {
    /// No table, every string is written inline.
    Inline,
    /// `u16` count and `u16` indices.
    Short,
    /// `i32` count and `u16` indices.
    Mixed,
    /// `i32` count and `i32` indices.
    Long,
}

impl DictionaryLayout {
    pub fn for_version(encoding: Encoding, version: i32) -> Self {
        match (encoding, version) {
            (Encoding::Binary, 2..=3) => Self::Short,
            (Encoding::Binary, 4) => Self::Mixed,
            (Encoding::Binary, 5..) => Self::Long,
            _ => Self::Inline,
        }
    }

    fn max_count(&self) -> usize {
        match self {
            Self::Inline => 0,
            Self::Short => u16::MAX as usize,
            Self::Mixed => u16::MAX as usize + 1,
            Self::Long => i32::MAX as usize,
        }
    }
}

/// The string table of a binary file.
///
/// Strings collected for writing are deduplicated. A table read from a file keeps every entry at its position.
pub(crate) struct StringDictionary {
    layout: DictionaryLayout,
    strings: IndexSet<String>,
    entries: Vec<String>,
}

impl StringDictionary {
    pub fn new(layout: DictionaryLayout) -> Self {
        Self {
            layout,
            strings: IndexSet::new(),
            entries: Vec::new(),
        }
    }

    pub fn is_inline(&self) -> bool {
        self.layout == DictionaryLayout::Inline
    }

    pub fn len(&self) -> usize {
        self.strings.len()
    }

    pub fn insert(&mut self, value: &str) {
        if self.is_inline() || self.strings.contains(value) {
            return;
        }
        self.strings.insert(value.to_string());
    }

    /// Adds the name, class, attribute keys and string values of `element`.
    pub fn insert_element(&mut self, element: &Element) {
        self.insert(element.get_class());
        self.insert(element.get_name());

        for (name, attribute) in element.get_attributes() {
            self.insert(name);

            match attribute {
                Attribute::String(value) => self.insert(value),
                Attribute::StringArray(values) => {
                    for value in values {
                        self.insert(value);
                    }
                }
                _ => {}
            }
        }
    }

    pub fn write<T: Write>(&self, writer: &mut BinaryWriter<T>) -> Result<(), BinarySerializationError> {
        if self.is_inline() {
            return Ok(());
        }

        if self.strings.len() > self.layout.max_count() {
            return Err(BinarySerializationError::TooManyStrings);
        }

        match self.layout {
            DictionaryLayout::Short => writer.write(&(self.strings.len() as u16))?,
            _ => writer.write(&(self.strings.len() as i32))?,
        }

        for string in &self.strings {
            writer.write_string(string)?;
        }

        Ok(())
    }

    /// Writes `value` as a table index, or inline when there is no table.
    pub fn write_string<T: Write>(&self, writer: &mut BinaryWriter<T>, value: &str) -> Result<(), BinarySerializationError> {
        if self.is_inline() {
            return writer.write_string(value);
        }

        let index = self
            .strings
            .get_index_of(value)
            .ok_or_else(|| BinarySerializationError::MissingString(value.to_string()))?;

        match self.layout {
            DictionaryLayout::Long => writer.write(&(index as i32)),
            _ => writer.write(&(index as u16)),
        }
    }

    pub fn read<T: BufRead>(layout: DictionaryLayout, reader: &mut BinaryReader<T>) -> Result<Self, BinarySerializationError> {
        let mut dictionary = Self::new(layout);

        let count = match layout {
            DictionaryLayout::Inline => return Ok(dictionary),
            DictionaryLayout::Short => reader.read::<u16>()? as usize,
            _ => reader.read_length()?,
        };

        dictionary.entries.reserve(count.min(MAX_PREALLOCATION));
        for _ in 0..count {
            dictionary.entries.push(reader.read_string()?);
        }

        Ok(dictionary)
    }

    /// Reads a table index and returns the string, or reads the string inline when there is no table.
    pub fn read_string<T: BufRead>(&self, reader: &mut BinaryReader<T>) -> Result<String, BinarySerializationError> {
        let index = match self.layout {
            DictionaryLayout::Inline => return reader.read_string(),
            DictionaryLayout::Long => reader.read::<i32>()?,
            _ => reader.read::<u16>()? as i32,
        };

        if index == -1 && self.layout == DictionaryLayout::Long {
            return Ok(String::from(Element::DEFAULT_ELEMENT_NAME));
        }

        usize::try_from(index)
            .ok()
            .and_then(|index| self.entries.get(index))
            .cloned()
            .ok_or(BinarySerializationError::InvalidStringIndex(index))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dictionary_bytes(layout: DictionaryLayout, strings: &[&str]) -> Vec<u8> {
        let mut dictionary = StringDictionary::new(layout);
        for string in strings {
            dictionary.insert(string);
        }

        let mut buffer = Vec::new();
        let mut writer = BinaryWriter::new(&mut buffer);
        dictionary.write(&mut writer).unwrap();
        dictionary.write_string(&mut writer, strings[strings.len() - 1]).unwrap();
        buffer
    }

    #[test]
    fn layout_follows_version() {
        assert_eq!(DictionaryLayout::for_version(Encoding::Binary, 1), DictionaryLayout::Inline);
        assert_eq!(DictionaryLayout::for_version(Encoding::Binary, 3), DictionaryLayout::Short);
        assert_eq!(DictionaryLayout::for_version(Encoding::Binary, 4), DictionaryLayout::Mixed);
        assert_eq!(DictionaryLayout::for_version(Encoding::Binary, 5), DictionaryLayout::Long);
        assert_eq!(DictionaryLayout::for_version(Encoding::BinaryProto, 2), DictionaryLayout::Inline);
    }

    #[test]
    fn short_table_uses_two_byte_count_and_index() {
        let bytes = dictionary_bytes(DictionaryLayout::Short, &["a", "b", "a"]);
        assert_eq!(bytes, vec![2, 0, b'a', 0, b'b', 0, 0, 0]);
    }

    #[test]
    fn mixed_table_uses_four_byte_count() {
        let bytes = dictionary_bytes(DictionaryLayout::Mixed, &["a", "b"]);
        assert_eq!(bytes, vec![2, 0, 0, 0, b'a', 0, b'b', 0, 1, 0]);
    }

    #[test]
    fn long_table_uses_four_byte_index() {
        let bytes = dictionary_bytes(DictionaryLayout::Long, &["a", "b"]);
        assert_eq!(bytes, vec![2, 0, 0, 0, b'a', 0, b'b', 0, 1, 0, 0, 0]);
    }

    #[test]
    fn inline_layout_writes_strings_directly() {
        let bytes = dictionary_bytes(DictionaryLayout::Inline, &["abc"]);
        assert_eq!(bytes, vec![b'a', b'b', b'c', 0]);
    }

    #[test]
    fn long_table_reads_negative_index_as_unnamed() {
        let bytes: Vec<u8> = vec![1, 0, 0, 0, b'x', 0, 0xFF, 0xFF, 0xFF, 0xFF, 0, 0, 0, 0, 1, 0, 0, 0];
        let mut reader = BinaryReader::new(bytes.as_slice());
        let dictionary = StringDictionary::read(DictionaryLayout::Long, &mut reader).unwrap();

        assert_eq!(dictionary.read_string(&mut reader).unwrap(), "unnamed");
        assert_eq!(dictionary.read_string(&mut reader).unwrap(), "x");
        assert!(matches!(dictionary.read_string(&mut reader), Err(BinarySerializationError::InvalidStringIndex(1))));
    }

    #[test]
    fn repeated_table_entries_keep_their_positions() {
        let bytes: Vec<u8> = vec![3, 0, b'a', 0, b'a', 0, b'b', 0, 2, 0, 0, 0];
        let mut reader = BinaryReader::new(bytes.as_slice());
        let dictionary = StringDictionary::read(DictionaryLayout::Short, &mut reader).unwrap();

        assert_eq!(dictionary.read_string(&mut reader).unwrap(), "b");
        assert_eq!(dictionary.read_string(&mut reader).unwrap(), "a");
    }

    #[test]
    fn missing_string_is_an_error() {
        let dictionary = StringDictionary::new(DictionaryLayout::Long);
        let mut buffer = Vec::new();
        let mut writer = BinaryWriter::new(&mut buffer);
        assert!(matches!(
            dictionary.write_string(&mut writer, "absent"),
            Err(BinarySerializationError::MissingString(_))
        ));
    }
}
