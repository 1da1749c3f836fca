use indexmap::{IndexMap, map::Entry};
use thiserror::Error as ThisError;
use tracing::trace;
use uuid::Uuid as UUID;

use crate::{
    Attribute, AttributeError, Element,
    element::check_attribute_name,
    graph::{collect_users, reachable_elements},
};

#[derive(Debug, ThisError)]
pub enum DataModelError {
    #[error("Element Id {0} Is Already In Use")]
    IdCollision(UUID),
    #[error("No Element With Id {0}")]
    UnknownElement(UUID),
    #[error("Element {0} Is A Placeholder")]
    PlaceholderElement(UUID),
    #[error("Attribute Error: {0}")]
    Attribute(#[from] AttributeError),
}

/// An arena of elements making up one DMX document.
///
/// Elements are stored in insertion order and never removed. The first element defined becomes the root.
#[derive(Clone, Debug)]
pub struct DataModel {
    format: String,
    format_version: i32,
    elements: IndexMap<UUID, Element>,
    root: Option<UUID>,
}

impl DataModel {
    /// Creates an empty data model with the format name and version written to the header.
    pub fn new(format: impl Into<String>, format_version: i32) -> Self {
        Self {
            format: format.into(),
            format_version,
            elements: IndexMap::new(),
            root: None,
        }
    }

    pub fn get_format(&self) -> &str {
        &self.format
    }

    pub fn get_format_version(&self) -> i32 {
        self.format_version
    }

    pub fn set_format(&mut self, format: impl Into<String>, format_version: i32) {
        self.format = format.into();
        self.format_version = format_version;
    }

    /// Adds a new element with a random id and returns the id.
    pub fn add_element(&mut self, name: impl Into<String>, class: impl Into<String>) -> UUID {
        let id = UUID::new_v4();
        self.attach(Element::new(name, class, id));
        id
    }

    /// Adds a new element of the base `DmElement` class with a random id.
    pub fn add_default_element(&mut self, name: impl Into<String>) -> UUID {
        self.add_element(name, Element::DEFAULT_ELEMENT_CLASS)
    }

    /// Adds a new element with the given id.
    ///
    /// A placeholder with the same id takes the new name and class. Any other element with the same id is a collision.
    pub fn add_element_with_id(&mut self, name: impl Into<String>, class: impl Into<String>, id: UUID) -> Result<UUID, DataModelError> {
        self.insert_element(Element::new(name, class, id))?;
        Ok(id)
    }

    /// Adds a placeholder for `id` unless an element with that id already exists.
    pub(crate) fn add_placeholder(&mut self, id: UUID) {
        if let Entry::Vacant(entry) = self.elements.entry(id) {
            trace!(%id, "adding placeholder element");
            entry.insert(Element::placeholder(id));
        }
    }

    pub(crate) fn insert_element(&mut self, element: Element) -> Result<(), DataModelError> {
        let id = element.get_id();

        match self.elements.get_mut(&id) {
            Some(existing) if existing.is_placeholder() => {
                existing.upgrade(element);
                if self.root.is_none() {
                    self.root = Some(id);
                }
                Ok(())
            }
            Some(_) => Err(DataModelError::IdCollision(id)),
            None => {
                self.attach(element);
                Ok(())
            }
        }
    }

    fn attach(&mut self, element: Element) {
        let id = element.get_id();
        if self.root.is_none() && !element.is_placeholder() {
            self.root = Some(id);
        }
        self.elements.insert(id, element);
    }

    pub(crate) fn set_root(&mut self, id: UUID) {
        self.root = Some(id);
    }

    /// Returns the root element.
    pub fn root(&self) -> Option<&Element> {
        self.root.and_then(|id| self.elements.get(&id))
    }

    pub fn root_id(&self) -> Option<UUID> {
        self.root
    }

    pub fn get_element(&self, id: UUID) -> Option<&Element> {
        self.elements.get(&id)
    }

    /// Returns the element for editing its name or class. Attributes are changed through the data model.
    pub fn get_element_mut(&mut self, id: UUID) -> Option<&mut Element> {
        self.elements.get_mut(&id)
    }

    /// Returns every element in insertion order, placeholders included.
    pub fn get_elements(&self) -> impl Iterator<Item = &Element> {
        self.elements.values()
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    fn defined_element(&self, id: UUID) -> Result<&Element, DataModelError> {
        let element = self.elements.get(&id).ok_or(DataModelError::UnknownElement(id))?;
        if element.is_placeholder() {
            return Err(DataModelError::PlaceholderElement(id));
        }
        Ok(element)
    }

    /// Sets an attribute on `owner`. Every element the value refers to must already be in this data model.
    ///
    /// Returns the previous value of the attribute.
    pub fn set_attribute(&mut self, owner: UUID, name: impl Into<String>, attribute: Attribute) -> Result<Option<Attribute>, DataModelError> {
        let attribute_name = name.into();
        check_attribute_name(&attribute_name)?;
        self.defined_element(owner)?;

        for target in attribute.referenced_elements() {
            if !self.elements.contains_key(&target) {
                return Err(DataModelError::UnknownElement(target));
            }
        }

        let element = self.elements.get_mut(&owner).ok_or(DataModelError::UnknownElement(owner))?;
        Ok(element.insert_attribute(attribute_name, attribute))
    }

    /// Sets an attribute from any value that converts into an [Attribute].
    pub fn set_value(&mut self, owner: UUID, name: impl Into<String>, value: impl Into<Attribute>) -> Result<Option<Attribute>, DataModelError> {
        self.set_attribute(owner, name, value.into())
    }

    /// Sets an attribute whose value may refer to elements of another data model.
    ///
    /// Referenced elements that are missing here are imported from `source` along with everything they reach.
    pub fn set_attribute_from(
        &mut self,
        owner: UUID,
        name: impl Into<String>,
        attribute: Attribute,
        source: &DataModel,
    ) -> Result<Option<Attribute>, DataModelError> {
        let attribute_name = name.into();
        check_attribute_name(&attribute_name)?;
        self.defined_element(owner)?;

        let mut foreign = Vec::new();
        for target in attribute.referenced_elements() {
            if source.elements.contains_key(&target) {
                foreign.push(target);
            } else if !self.elements.contains_key(&target) {
                return Err(DataModelError::UnknownElement(target));
            }
        }

        let imports = self.plan_import(source, &foreign)?;
        self.apply_import(imports);

        let element = self.elements.get_mut(&owner).ok_or(DataModelError::UnknownElement(owner))?;
        Ok(element.insert_attribute(attribute_name, attribute))
    }

    /// Removes an attribute from `owner` and returns it.
    pub fn remove_attribute(&mut self, owner: UUID, name: impl AsRef<str>) -> Result<Option<Attribute>, DataModelError> {
        let element = self.elements.get_mut(&owner).ok_or(DataModelError::UnknownElement(owner))?;
        Ok(element.remove_attribute(name.as_ref()))
    }

    /// Copies the element `id` of `source` and every element it reaches into this data model.
    ///
    /// Nothing is copied if any of those ids is already used here by a different element.
    pub fn import_element(&mut self, source: &DataModel, id: UUID) -> Result<UUID, DataModelError> {
        if source.get_element(id).is_none() {
            return Err(DataModelError::UnknownElement(id));
        }

        let imports = self.plan_import(source, &[id])?;
        self.apply_import(imports);
        Ok(id)
    }

    fn plan_import(&self, source: &DataModel, start: &[UUID]) -> Result<Vec<Element>, DataModelError> {
        let mut imports = Vec::new();

        for id in reachable_elements(source, start) {
            let Some(incoming) = source.get_element(id) else {
                continue;
            };

            match self.elements.get(&id) {
                None => imports.push(incoming.clone()),
                Some(existing) if existing.is_placeholder() => {
                    if !incoming.is_placeholder() {
                        imports.push(incoming.clone());
                    }
                }
                Some(existing) => {
                    if !incoming.is_placeholder() && !existing.same_definition(incoming) {
                        return Err(DataModelError::IdCollision(id));
                    }
                }
            }
        }

        Ok(imports)
    }

    fn apply_import(&mut self, imports: Vec<Element>) {
        for element in imports {
            trace!(id = %element.get_id(), class = element.get_class(), "importing element");
            match self.elements.get_mut(&element.get_id()) {
                Some(existing) => existing.upgrade(element),
                None => self.attach(element),
            }
        }
    }

    /// Finds elements by id, name or class.
    ///
    /// An id that exists returns only that element. Otherwise every defined element matching the name or the class is returned once.
    pub fn find_elements(&self, name: Option<&str>, id: Option<UUID>, class: Option<&str>) -> Vec<&Element> {
        if let Some(element) = id.and_then(|id| self.elements.get(&id)) {
            return vec![element];
        }

        self.elements
            .values()
            .filter(|element| !element.is_placeholder())
            .filter(|element| name.is_some_and(|name| element.get_name() == name) || class.is_some_and(|class| element.get_class() == class))
            .collect()
    }

    /// Recounts how many attribute slots refer to each element. Unreachable elements are set to 0.
    pub fn count_users(&mut self) {
        let users = collect_users(self);
        for (id, element) in self.elements.iter_mut() {
            element.set_users(users.get(id).copied().unwrap_or(0));
        }
    }
}
