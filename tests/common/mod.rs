#![allow(dead_code)]

use dmx_datamodel::{
    Angle, Attribute, BinaryBlock, Color, DataModel, Element, Matrix, Quaternion, Time, Vector2, Vector3, Vector4,
};
use uuid::Uuid as UUID;

pub const ROOT_ID: UUID = UUID::from_u128(0x11111111_2222_4333_8444_555555555555);
pub const KID_ID: UUID = UUID::from_u128(0x66666666_7777_4888_9999_aaaaaaaaaaaa);
pub const OTHER_ID: UUID = UUID::from_u128(0xbbbbbbbb_cccc_4ddd_beee_ffffffffffff);

/// A model using every attribute type. Time values are left out when `with_time` is false.
pub fn sample_model(with_time: bool) -> DataModel {
    let mut model = DataModel::new("model", 18);
    let root = model.add_element_with_id("root", "DmElement", ROOT_ID).unwrap();
    let kid = model.add_element_with_id("kid", "DmeKid", KID_ID).unwrap();
    let other = model.add_element_with_id("other", "DmeOther", OTHER_ID).unwrap();

    let matrix = Matrix {
        entries: [[1.0, 0.0, 0.0, 0.5], [0.0, 1.0, 0.0, -2.25], [0.0, 0.0, 1.0, 8.0], [0.0, 0.0, 0.0, 1.0]],
    };

    model.set_value(root, "integer", 7).unwrap();
    model.set_value(root, "float", 1.5f32).unwrap();
    model.set_value(root, "boolean", true).unwrap();
    model.set_value(root, "string", "hello \"world\"\n").unwrap();
    model.set_value(root, "binary", BinaryBlock::from(vec![0x00, 0x01, 0xAB, 0xFF])).unwrap();
    model
        .set_value(
            root,
            "color",
            Color {
                red: 255,
                green: 128,
                blue: 0,
                alpha: 64,
            },
        )
        .unwrap();
    model.set_value(root, "vector2", Vector2 { x: 1.0, y: -1.0 }).unwrap();
    model.set_value(root, "vector3", Vector3 { x: 1.5, y: 0.0, z: -2.0 }).unwrap();
    model
        .set_value(
            root,
            "vector4",
            Vector4 {
                x: 0.25,
                y: 0.5,
                z: 0.75,
                w: 1.0,
            },
        )
        .unwrap();
    model
        .set_value(
            root,
            "angle",
            Angle {
                pitch: 90.0,
                yaw: 45.0,
                roll: -180.0,
            },
        )
        .unwrap();
    model
        .set_value(
            root,
            "quaternion",
            Quaternion {
                x: 0.0,
                y: 0.0,
                z: 0.0,
                w: 1.0,
            },
        )
        .unwrap();
    model.set_value(root, "matrix", matrix).unwrap();
    model.set_value(root, "child", kid).unwrap();
    model.set_value(root, "nothing", Attribute::Element(None)).unwrap();

    model.set_value(root, "integers", vec![1, -2, 3]).unwrap();
    model.set_value(root, "floats", vec![0.5f32, 100.0, -3.75]).unwrap();
    model.set_value(root, "booleans", vec![true, false, true]).unwrap();
    model
        .set_value(root, "strings", vec![String::from("first"), String::from("second"), String::new()])
        .unwrap();
    model
        .set_value(root, "binaries", vec![BinaryBlock::from(vec![1, 2]), BinaryBlock::from(Vec::new())])
        .unwrap();
    model.set_value(root, "colors", vec![Color::default(), Color { red: 1, green: 2, blue: 3, alpha: 4 }]).unwrap();
    model.set_value(root, "vectors", vec![Vector3 { x: 1.0, y: 2.0, z: 3.0 }]).unwrap();
    model.set_value(root, "matrices", vec![matrix, Matrix::default()]).unwrap();
    model.set_value(root, "elements", vec![Some(kid), None, Some(other)]).unwrap();

    if with_time {
        model.set_value(root, "time", Time::from_seconds(1.5)).unwrap();
        model.set_value(root, "times", vec![Time::from_seconds(0.25), Time::from_seconds(-2.0)]).unwrap();
    }

    model.set_value(kid, "value", 42).unwrap();
    model.set_value(other, "back", root).unwrap();
    model.set_value(other, "names", vec![String::from("other")]).unwrap();

    model
}

fn ordered_attributes(element: &Element) -> Vec<(&String, &Attribute)> {
    element.get_attributes().iter().collect()
}

/// Checks that two models hold the same root and the same elements with the same ordered attributes.
pub fn assert_same_model(expected: &DataModel, actual: &DataModel) {
    let expected_root = expected.root().unwrap();
    let actual_root = actual.root().unwrap();
    assert_eq!(expected_root.get_id(), actual_root.get_id());
    assert_eq!(expected_root.get_name(), actual_root.get_name());
    assert_eq!(expected_root.get_class(), actual_root.get_class());

    assert_eq!(expected.len(), actual.len());
    for element in expected.get_elements() {
        let other = actual.get_element(element.get_id()).unwrap();
        assert_eq!(element.get_name(), other.get_name());
        assert_eq!(element.get_class(), other.get_class());
        assert_eq!(ordered_attributes(element), ordered_attributes(other));
    }
}
