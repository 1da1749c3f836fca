mod common;

use std::str::FromStr;

use common::{KID_ID, ROOT_ID, sample_model};
use dmx_datamodel::{
    Attribute, AttributeError, AttributeType, DataModel, DataModelError, Element, Encoding, Header, Time, deserialize, make_array,
    parse,
};
use uuid::Uuid as UUID;

#[test]
fn first_element_is_root() {
    let mut model = DataModel::new("model", 1);
    assert!(model.root().is_none());

    let root = model.add_element("root", "DmElement");
    let other = model.add_element("other", "DmElement");

    assert_eq!(model.root_id(), Some(root));
    assert_ne!(root, other);
    assert_eq!(model.len(), 2);
}

#[test]
fn duplicate_ids_collide() {
    let mut model = DataModel::new("model", 1);
    model.add_element_with_id("first", "DmElement", ROOT_ID).unwrap();

    let error = model.add_element_with_id("second", "DmElement", ROOT_ID).unwrap_err();
    assert!(matches!(error, DataModelError::IdCollision(id) if id == ROOT_ID));
    assert_eq!(model.get_element(ROOT_ID).unwrap().get_name(), "first");
}

#[test]
fn seeded_ids_are_stable() {
    assert_eq!(Element::id_from_seed("bone_0"), Element::id_from_seed("bone_0"));
    assert_ne!(Element::id_from_seed("bone_0"), Element::id_from_seed("bone_1"));
    assert_eq!(
        Element::id_from_seed("bone_0"),
        UUID::from_str("63489a4a-b809-3773-afb5-28a61b035cff").unwrap()
    );
}

#[test]
fn elements_default_to_the_base_class() {
    let mut model = DataModel::new("model", 1);
    let root = model.add_default_element("root");
    assert_eq!(model.get_element(root).unwrap().get_class(), Element::DEFAULT_ELEMENT_CLASS);
    assert_eq!(model.root_id(), Some(root));
}

#[test]
fn attributes_are_validated_before_they_are_set() {
    let mut model = DataModel::new("model", 1);
    let root = model.add_element("root", "DmElement");
    let unknown = UUID::from_u128(99);

    assert!(matches!(
        model.set_value(root, "", 1),
        Err(DataModelError::Attribute(AttributeError::EmptyName))
    ));
    assert!(matches!(
        model.set_value(root, "name", "root"),
        Err(DataModelError::Attribute(AttributeError::ReservedName(_)))
    ));
    assert!(matches!(
        model.set_value(root, "link", unknown),
        Err(DataModelError::UnknownElement(id)) if id == unknown
    ));
    assert!(matches!(
        model.set_value(unknown, "value", 1),
        Err(DataModelError::UnknownElement(id)) if id == unknown
    ));

    assert!(model.root().unwrap().get_attributes().is_empty());
}

#[test]
fn setting_an_attribute_returns_the_old_value() {
    let mut model = DataModel::new("model", 1);
    let root = model.add_element("root", "DmElement");

    assert_eq!(model.set_value(root, "value", 1).unwrap(), None);
    assert_eq!(model.set_value(root, "value", 2.5f32).unwrap(), Some(Attribute::Integer(1)));
    assert_eq!(model.remove_attribute(root, "value").unwrap(), Some(Attribute::Float(2.5)));
    assert!(!model.root().unwrap().has_attribute("value"));
}

#[test]
fn missing_and_mistyped_attributes_are_distinguished() {
    let model = sample_model(true);
    let root = model.root().unwrap();

    assert!(matches!(
        root.get_attribute("absent"),
        Err(AttributeError::AttributeNotFound { ref name, element }) if name == "absent" && element == ROOT_ID
    ));
    assert!(matches!(
        root.get_value::<f32>("integer"),
        Err(AttributeError::TypeMismatch {
            expected: AttributeType::Float,
            found: AttributeType::Integer
        })
    ));
    assert_eq!(root.get_value::<i32>("integer").unwrap(), &7);
    assert_eq!(root.get_value::<Time>("time").unwrap(), &Time::from_seconds(1.5));
}

#[test]
fn arrays_are_built_from_scalars() {
    let floats = make_array(vec![Attribute::Integer(1), Attribute::Float(2.5)], AttributeType::Float).unwrap();
    assert_eq!(floats, Attribute::FloatArray(vec![1.0, 2.5]));

    let times = make_array(vec![Attribute::Integer(2), Attribute::Float(0.5)], AttributeType::Time).unwrap();
    assert_eq!(times, Attribute::TimeArray(vec![Time::from_seconds(2.0), Time::from_seconds(0.5)]));

    let empty = make_array(Vec::new(), AttributeType::String).unwrap();
    assert_eq!(empty, Attribute::StringArray(Vec::new()));

    assert!(matches!(
        make_array(vec![Attribute::Float(1.0)], AttributeType::Integer),
        Err(AttributeError::TypeMismatch {
            expected: AttributeType::Integer,
            found: AttributeType::Float
        })
    ));
    assert!(matches!(
        make_array(Vec::new(), AttributeType::IntegerArray),
        Err(AttributeError::ArrayOfArrays(AttributeType::IntegerArray))
    ));
}

#[test]
fn users_count_every_slot() {
    let mut model = DataModel::new("model", 1);
    let root = model.add_element("root", "DmElement");
    let shared = model.add_element("shared", "DmElement");
    let unreachable = model.add_element("unreachable", "DmElement");

    model.set_value(root, "single", shared).unwrap();
    model.set_value(root, "list", vec![Some(shared), None, Some(shared)]).unwrap();
    model.set_value(unreachable, "link", shared).unwrap();
    model.count_users();

    assert_eq!(model.get_element(root).unwrap().get_users(), 0);
    assert_eq!(model.get_element(shared).unwrap().get_users(), 3);
    assert_eq!(model.get_element(unreachable).unwrap().get_users(), 0);
}

#[test]
fn elements_are_found_by_id_name_or_class() {
    let model = sample_model(false);

    let by_id = model.find_elements(Some("other"), Some(KID_ID), None);
    assert_eq!(by_id.len(), 1);
    assert_eq!(by_id[0].get_id(), KID_ID);

    let by_name_or_class = model.find_elements(Some("kid"), Some(UUID::from_u128(1)), Some("DmeKid"));
    assert_eq!(by_name_or_class.len(), 1);

    let either = model.find_elements(Some("root"), None, Some("DmeOther"));
    assert_eq!(either.len(), 2);

    assert!(model.find_elements(None, None, None).is_empty());
}

#[test]
fn import_copies_reachable_elements() {
    let source = sample_model(false);
    let mut target = DataModel::new("target", 1);
    let root = target.add_element("target_root", "DmElement");

    let imported = target.import_element(&source, KID_ID).unwrap();
    assert_eq!(imported, KID_ID);
    assert_eq!(target.len(), 2);
    assert_eq!(target.root_id(), Some(root));

    // Importing the same element again changes nothing.
    target.import_element(&source, KID_ID).unwrap();
    assert_eq!(target.len(), 2);

    target.set_attribute_from(root, "sample", Attribute::from(ROOT_ID), &source).unwrap();
    assert_eq!(target.len(), 1 + source.len());
    assert_eq!(
        target.get_element(ROOT_ID).unwrap().get_attributes(),
        source.get_element(ROOT_ID).unwrap().get_attributes()
    );
}

#[test]
fn conflicting_import_leaves_the_model_unchanged() {
    let source = sample_model(false);
    let mut target = DataModel::new("target", 1);
    target.add_element("target_root", "DmElement");
    target.add_element_with_id("different", "DmeKid", KID_ID).unwrap();

    let error = target.import_element(&source, ROOT_ID).unwrap_err();
    assert!(matches!(error, DataModelError::IdCollision(id) if id == KID_ID));
    assert_eq!(target.len(), 2);
    assert!(target.get_element(ROOT_ID).is_none());
}

#[test]
fn encodings_list_their_versions() {
    assert_eq!(Encoding::Binary.versions(), &[1, 2, 3, 4, 5]);
    assert_eq!(Encoding::KeyValues2.versions(), &[1]);
    assert_eq!(Encoding::BinaryProto.versions(), &[2]);
    assert_eq!(Encoding::from_str("keyvalues2").unwrap(), Encoding::KeyValues2);
    assert!(Encoding::from_str("xml").is_err());
    assert!(Encoding::Binary.check_support(0).is_err());
}

#[test]
fn headers_read_back() {
    let header = Header::new(Encoding::Binary, 5, "model", 18);
    let text = header.create_header();
    assert_eq!(text, "<!-- dmx encoding binary 5 format model 18 -->\n");
    assert_eq!(Header::from_string(&text).unwrap(), header);

    let proto = Header::from_string("<!-- DMXVersion binary_v2 -->").unwrap();
    assert_eq!(proto.encoding, Encoding::BinaryProto);
    assert_eq!(proto.encoding_version, 2);
    assert_eq!(proto.format, "undefined_format");
}

#[test]
fn long_format_names_round_trip() {
    let format = "f".repeat(200);
    let mut model = DataModel::new(format.as_str(), 3);
    model.add_element("root", "DmElement");

    let text = model.to_text().unwrap();
    let loaded = parse(&text, None).unwrap();
    assert_eq!(loaded.get_format(), format);
    assert_eq!(loaded.get_format_version(), 3);

    let bytes = model.to_bytes(Encoding::Binary, 5).unwrap();
    let loaded = deserialize(&mut bytes.as_slice(), None).unwrap();
    assert_eq!(loaded.get_format(), format);
}

#[test]
fn format_names_with_whitespace_cannot_be_written() {
    let mut model = DataModel::new("two words", 1);
    model.add_element("root", "DmElement");
    assert!(model.to_text().is_err());
}
