//! Document parsing and node navigation through the engine surface.

use std::sync::OnceLock;

use xdm::NodeKind;
use xdm_processor::{Engine, Error};

fn engine() -> &'static Engine {
    static ENGINE: OnceLock<Engine> = OnceLock::new();
    ENGINE.get_or_init(|| Engine::init().expect("engine init"))
}

#[test]
fn parse_and_navigate() {
    let doc = engine()
        .parse_xml_str(r#"<out><person att1="value1">text1</person></out>"#)
        .unwrap();
    assert_eq!(doc.node_kind(), NodeKind::Document);
    let out = doc.children().into_iter().next().unwrap();
    assert_eq!(out.name().unwrap().local_part(), "out");
    let person = out.children().into_iter().next().unwrap();
    assert_eq!(person.attribute_value("att1").as_deref(), Some("value1"));
    assert_eq!(person.string_value(), "text1");
    assert_eq!(person.parent().unwrap(), out);
}

#[test]
fn parse_file_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("doc.xml");
    std::fs::write(&path, "<a><b>x</b></a>").unwrap();
    let doc = engine().parse_xml_file(&path).unwrap();
    assert_eq!(doc.to_string(), "<a><b>x</b></a>");
}

#[test]
fn malformed_input_reports_position() {
    match engine().parse_xml_str("<a><b></a>") {
        Err(Error::Parse { line, .. }) => assert!(line >= 1),
        other => panic!("expected a parse error, got {other:?}"),
    }
}

#[test]
fn value_factories() {
    assert_eq!(engine().make_integer_value(7).head().unwrap().string_value(), "7");
    assert_eq!(engine().make_double_value(2.5).head().unwrap().string_value(), "2.5");
    assert_eq!(engine().make_boolean_value(true).head().unwrap().string_value(), "true");
    assert_eq!(engine().make_string_value("hi").head().unwrap().string_value(), "hi");
}
