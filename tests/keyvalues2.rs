mod common;

use common::{KID_ID, OTHER_ID, ROOT_ID, assert_same_model, sample_model};
use dmx_datamodel::{
    Attribute, DataModel, Encoding, SerializationError, Time, Vector3, load, parse, serialize_to_string,
    serializers::Keyvalues2SerializationError,
};
use uuid::Uuid as UUID;

fn parent_and_kid() -> (DataModel, UUID, UUID) {
    let mut model = DataModel::new("model", 1);
    let root = model.add_element_with_id("root", "DmElement", ROOT_ID).unwrap();
    let kid = model.add_element_with_id("kid", "DmElement", KID_ID).unwrap();
    model.set_value(root, "child", kid).unwrap();
    model.set_value(kid, "value", 42).unwrap();
    (model, root, kid)
}

#[test]
fn keyvalues2_round_trips() {
    let model = sample_model(true);
    let text = model.to_text().unwrap();
    let loaded = parse(&text, None).unwrap();

    assert_same_model(&model, &loaded);
    assert_eq!(loaded.get_format(), "model");
    assert_eq!(loaded.get_format_version(), 18);
}

#[test]
fn single_use_elements_are_inlined() {
    let (model, _, _) = parent_and_kid();
    let text = model.to_text().unwrap();

    let expected = format!(
        "<!-- dmx encoding keyvalues2 1 format model 1 -->
\"DmElement\"
{{
\t\"id\" \"elementid\" \"{ROOT_ID}\"
\t\"name\" \"string\" \"root\"
\t\"child\" \"DmElement\"
\t{{
\t\t\"id\" \"elementid\" \"{KID_ID}\"
\t\t\"name\" \"string\" \"kid\"
\t\t\"value\" \"int\" \"42\"
\t}}
}}

"
    );
    assert_eq!(text, expected);

    let loaded = parse(&text, None).unwrap();
    let kid = loaded.root().unwrap().get_value::<Option<UUID>>("child").unwrap().unwrap();
    assert_eq!(loaded.get_element(kid).unwrap().get_value::<i32>("value").unwrap(), &42);
}

#[test]
fn shared_elements_are_written_at_the_top_level() {
    let (mut model, root, kid) = parent_and_kid();
    model.set_value(root, "again", kid).unwrap();
    let text = model.to_text().unwrap();

    assert!(text.contains(&format!("\"child\" \"element\" \"{kid}\"")));
    assert!(text.contains(&format!("\"again\" \"element\" \"{kid}\"")));
    assert_eq!(text.matches(&format!("\"id\" \"elementid\" \"{kid}\"")).count(), 1);
    assert!(text.ends_with("\t\"value\" \"int\" \"42\"\n}\n\n"));

    let loaded = parse(&text, None).unwrap();
    let root = loaded.root().unwrap();
    assert_eq!(root.get_value::<Option<UUID>>("child").unwrap(), &Some(kid));
    assert_eq!(root.get_value::<Option<UUID>>("again").unwrap(), &Some(kid));
}

#[test]
fn root_is_never_inlined() {
    let (mut model, root, kid) = parent_and_kid();
    model.set_value(kid, "parent", root).unwrap();
    let text = model.to_text().unwrap();

    assert!(text.contains(&format!("\"parent\" \"element\" \"{root}\"")));
    assert_eq!(text.matches(&format!("\"id\" \"elementid\" \"{root}\"")).count(), 1);
    parse(&text, None).unwrap();
}

#[test]
fn forward_references_resolve() {
    let text = format!(
        r#"<!-- dmx encoding keyvalues2 1 format model 1 -->
// a comment before the root
"DmElement"
{{
	"id" "elementid" "{ROOT_ID}"
	"name" "string" "root"
	"early" "element" "{KID_ID}"
	"list" "element_array"
	[
		"element" "{KID_ID}",
		"element" "",
		"element" "{OTHER_ID}"
	]
}}

"DmElement"
{{
	"id" "elementid" "{KID_ID}"
	"name" "string" "kid"
	"late" "element" "{OTHER_ID}"
}}

"DmElement"
{{
	"id" "elementid" "{OTHER_ID}"
	"name" "string" "other"
}}
"#
    );

    let model = parse(&text, None).unwrap();
    let root = model.root().unwrap();
    assert_eq!(root.get_id(), ROOT_ID);
    assert_eq!(root.get_value::<Option<UUID>>("early").unwrap(), &Some(KID_ID));
    assert_eq!(root.get_value::<Vec<Option<UUID>>>("list").unwrap(), &vec![Some(KID_ID), None, Some(OTHER_ID)]);
    assert_eq!(
        model.get_element(KID_ID).unwrap().get_value::<Option<UUID>>("late").unwrap(),
        &Some(OTHER_ID)
    );
    assert!(model.get_elements().all(|element| !element.is_placeholder()));
}

#[test]
fn unresolved_references_fail_a_full_parse() {
    let missing = UUID::from_u128(7);
    let text = format!(
        "<!-- dmx encoding keyvalues2 1 format model 1 -->\n\"DmElement\"\n{{\n\t\"name\" \"string\" \"root\"\n\t\"link\" \"element\" \"{missing}\"\n}}\n"
    );

    let error = parse(&text, None).unwrap_err();
    assert!(matches!(
        error,
        SerializationError::KeyValues2(Keyvalues2SerializationError::UnresolvedReference { id, ref attribute, .. })
            if id == missing && attribute == "link"
    ));
}

#[test]
fn partial_parse_keeps_the_element_path() {
    let text = format!(
        r#"<!-- dmx encoding keyvalues2 1 format model 1 -->
"DmElement"
{{
	"id" "elementid" "{ROOT_ID}"
	"name" "string" "root"
	"skipped" "DmElement"
	{{
		"name" "string" "skipped"
		"nested" "DmElement" {{ "name" "string" "deep" }}
	}}
	"wanted" "DmElement"
	{{
		"id" "elementid" "{KID_ID}"
		"name" "string" "Wanted"
		"leaf" "DmElement" {{ "name" "string" "leaf" "value" "int" "5" }}
		"link" "element" "{OTHER_ID}"
	}}
}}

"DmElement"
{{
	"id" "elementid" "{OTHER_ID}"
	"name" "string" "other"
}}
"#
    );

    let model = parse(&text, Some(&["wanted"])).unwrap();
    let root = model.root().unwrap();

    assert_eq!(root.get_id(), ROOT_ID);
    assert_eq!(root.get_attribute("skipped").unwrap(), &Attribute::Element(None));
    assert_eq!(root.get_value::<Option<UUID>>("wanted").unwrap(), &Some(KID_ID));
    assert!(model.find_elements(Some("deep"), None, None).is_empty());
    assert_eq!(model.find_elements(Some("leaf"), None, None).len(), 1);

    let other = model.get_element(OTHER_ID).unwrap();
    assert!(other.is_placeholder());
    assert_eq!(model.len(), 4);

    let full = parse(&text, None).unwrap();
    assert_eq!(full.len(), 6);
}

#[test]
fn floats_are_trimmed() {
    let mut model = DataModel::new("model", 1);
    let root = model.add_element("root", "DmElement");
    model.set_value(root, "whole", 10.0f32).unwrap();
    model.set_value(root, "tenth", 0.1f32).unwrap();
    model.set_value(root, "vector", Vector3 { x: 1.5, y: 0.0, z: -2.0 }).unwrap();
    model.set_value(root, "time", Time::from_seconds(0.0001)).unwrap();
    model.set_value(root, "flag", false).unwrap();

    let text = serialize_to_string(&model, Encoding::KeyValues2, 1).unwrap();
    assert!(text.contains("\"whole\" \"float\" \"10\"\n"));
    assert!(text.contains("\"tenth\" \"float\" \"0.1\"\n"));
    assert!(text.contains("\"vector\" \"vector3\" \"1.5 0 -2\"\n"));
    assert!(text.contains("\"time\" \"time\" \"0.0001\"\n"));
    assert!(text.contains("\"flag\" \"bool\" \"0\"\n"));

    let loaded = parse(&text, None).unwrap();
    let time = loaded.root().unwrap().get_value::<Time>("time").unwrap();
    approx::assert_abs_diff_eq!(time.as_seconds(), 0.0001, epsilon = 1e-9);
}

#[test]
fn text_values_are_parsed_loosely() {
    let text = "<!-- dmx encoding keyvalues2 1 format model 1 -->
\"DmElement\"
{
\t\"name\" \"string\" \"root\"
\t\"angle\" \"angle\" \"1 2 3\"
\t\"floats\" \"float_array\" [ \"1\", \"2.5\" ]
\t\"times\" \"time_array\" [ \"1\" \"0.5\" ]
\t\"blob\" \"binary\" \"
\t\t0aff
\t\"
}
";

    let model = parse(text, None).unwrap();
    let root = model.root().unwrap();
    assert_eq!(root.get_value::<Vec<f32>>("floats").unwrap(), &vec![1.0, 2.5]);
    assert_eq!(
        root.get_value::<Vec<Time>>("times").unwrap(),
        &vec![Time::from_seconds(1.0), Time::from_seconds(0.5)]
    );
    assert_eq!(root.get_attribute("blob").unwrap(), &Attribute::Binary(vec![0x0A, 0xFF].into()));
    assert_eq!(root.get_attribute("angle").unwrap().get_type().type_name(), "qangle");
}

#[test]
fn malformed_headers_are_rejected() {
    for text in ["", "hello", "<!-- dmx encoding keyvalues2 one format model 1 -->\n", "<!-- dmx"] {
        assert!(
            matches!(parse(text, None), Err(SerializationError::MalformedHeader(_))),
            "{text:?}"
        );
    }
}

#[test]
fn truncated_text_is_reported() {
    let (model, _, _) = parent_and_kid();
    let text = model.to_text().unwrap();
    let cut = &text[..text.len() - 5];

    let error = parse(cut, None).unwrap_err();
    assert!(error.is_truncated(), "{error}");
    assert!(matches!(
        error,
        SerializationError::KeyValues2(Keyvalues2SerializationError::UnexpectedEndOfFile(_))
    ));
}

#[test]
fn duplicate_ids_are_rejected() {
    let text = format!(
        "<!-- dmx encoding keyvalues2 1 format model 1 -->\n\"DmElement\"\n{{\n\t\"id\" \"elementid\" \"{ROOT_ID}\"\n\t\"id\" \"elementid\" \"{KID_ID}\"\n}}\n"
    );
    assert!(matches!(
        parse(&text, None),
        Err(SerializationError::KeyValues2(Keyvalues2SerializationError::DuplicateElementId(id))) if id == ROOT_ID
    ));
}

#[test]
fn binary_encodings_are_not_text() {
    let (model, _, _) = parent_and_kid();
    assert!(matches!(
        serialize_to_string(&model, Encoding::Binary, 5),
        Err(SerializationError::NotText(Encoding::Binary))
    ));
}

#[test]
fn text_files_are_written_and_loaded() {
    let model = sample_model(true);
    let directory = tempfile::tempdir().unwrap();
    let path = directory.path().join("model.dmx");

    model.write_file(&path, Encoding::KeyValues2, 1).unwrap();
    let loaded = load(&path, None).unwrap();
    assert_same_model(&model, &loaded);
}
