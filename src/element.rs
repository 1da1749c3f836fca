use indexmap::IndexMap;
use uuid::Uuid as UUID;

use crate::attribute::{Attribute, AttributeError, AttributeType, AttributeValue};

/// The element struct represents a single node in a [DataModel](crate::DataModel).
///
/// It contains a name, a class, an id and an ordered set of attributes.
/// Elements refer to each other by id through [Attribute::Element] and [Attribute::ElementArray].
#[derive(Clone, Debug)]
pub struct Element {
    name: String,
    class: String,
    id: UUID,
    attributes: IndexMap<String, Attribute>,
    placeholder: bool,
    users: usize,
}

impl Element {
    pub const DEFAULT_ELEMENT_NAME: &str = "unnamed";
    pub const DEFAULT_ELEMENT_CLASS: &str = "DmElement";

    /// The namespace seeded ids are derived in.
    pub const ID_NAMESPACE: UUID = UUID::from_u128(0x20ba94f8_59f0_4579_9e01_50aac4567d3b);

    pub(crate) fn new(name: impl Into<String>, class: impl Into<String>, id: UUID) -> Self {
        Self {
            name: name.into(),
            class: class.into(),
            id,
            attributes: IndexMap::new(),
            placeholder: false,
            users: 0,
        }
    }

    pub(crate) fn placeholder(id: UUID) -> Self {
        Self {
            name: String::new(),
            class: String::new(),
            id,
            attributes: IndexMap::new(),
            placeholder: true,
            users: 0,
        }
    }

    /// Derives a stable id from a string seed.
    pub fn id_from_seed(seed: impl AsRef<str>) -> UUID {
        UUID::new_v3(&Self::ID_NAMESPACE, seed.as_ref().as_bytes())
    }

    /// Returns the name of the element.
    pub fn get_name(&self) -> &str {
        &self.name
    }

    /// Sets the name of the element.
    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    /// Returns the class of the element.
    pub fn get_class(&self) -> &str {
        &self.class
    }

    /// Sets the class of the element.
    pub fn set_class(&mut self, class: impl Into<String>) {
        self.class = class.into();
    }

    /// Returns the [UUID] of the element.
    pub fn get_id(&self) -> UUID {
        self.id
    }

    /// Returns true if the element was only referenced and never defined.
    pub fn is_placeholder(&self) -> bool {
        self.placeholder
    }

    /// Returns the number of attribute slots referring to this element, as of the last count.
    pub fn get_users(&self) -> usize {
        self.users
    }

    pub(crate) fn set_users(&mut self, users: usize) {
        self.users = users;
    }

    /// Returns the attribute with the given name.
    pub fn get_attribute(&self, name: impl AsRef<str>) -> Result<&Attribute, AttributeError> {
        let attribute_name = name.as_ref();
        self.attributes.get(attribute_name).ok_or_else(|| AttributeError::AttributeNotFound {
            name: attribute_name.to_string(),
            element: self.id,
        })
    }

    /// Returns the value of the attribute with the given name if it holds a `V`.
    pub fn get_value<V>(&self, name: impl AsRef<str>) -> Result<&V, AttributeError>
    where
        V: AttributeValue,
        for<'a> &'a V: TryFrom<&'a Attribute, Error = AttributeType>,
    {
        let attribute = self.get_attribute(name)?;
        <&V>::try_from(attribute).map_err(|found| AttributeError::TypeMismatch {
            expected: V::ATTRIBUTE_TYPE,
            found,
        })
    }

    pub fn has_attribute(&self, name: impl AsRef<str>) -> bool {
        self.attributes.contains_key(name.as_ref())
    }

    /// Returns the attributes of the element.
    pub fn get_attributes(&self) -> &IndexMap<String, Attribute> {
        &self.attributes
    }

    /// Returns every element id referenced by the attributes, one per slot.
    pub fn referenced_elements(&self) -> impl Iterator<Item = UUID> + '_ {
        self.attributes.values().flat_map(Attribute::referenced_elements)
    }

    pub(crate) fn insert_attribute(&mut self, name: String, attribute: Attribute) -> Option<Attribute> {
        self.attributes.insert(name, attribute)
    }

    pub(crate) fn remove_attribute(&mut self, name: &str) -> Option<Attribute> {
        self.attributes.shift_remove(name)
    }

    /// Replaces the definition of a placeholder in place.
    pub(crate) fn upgrade(&mut self, definition: Element) {
        self.name = definition.name;
        self.class = definition.class;
        self.attributes = definition.attributes;
        self.placeholder = false;
    }

    pub(crate) fn same_definition(&self, other: &Element) -> bool {
        self.name == other.name && self.class == other.class && self.attributes == other.attributes
    }
}

/// Checks that `name` can be used as an attribute key.
pub(crate) fn check_attribute_name(name: &str) -> Result<(), AttributeError> {
    match name {
        "" => Err(AttributeError::EmptyName),
        "id" | "name" => Err(AttributeError::ReservedName(name.to_string())),
        _ => Ok(()),
    }
}
