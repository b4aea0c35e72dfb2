use std::sync::OnceLock;

use xdm_processor::{Engine, Error};

fn engine() -> &'static Engine {
    static ENGINE: OnceLock<Engine> = OnceLock::new();
    ENGINE.get_or_init(|| Engine::init().expect("engine init"))
}

const SCHEMA: &str = r#"<xs:schema xmlns:xs="http://www.w3.org/2001/XMLSchema">
  <xs:element name="family">
    <xs:complexType>
      <xs:sequence>
        <xs:element name="member" type="xs:string" minOccurs="1" maxOccurs="unbounded"/>
        <xs:element name="founded" type="xs:date" minOccurs="0"/>
      </xs:sequence>
      <xs:assert test="count(member) &lt; 10"/>
    </xs:complexType>
  </xs:element>
</xs:schema>"#;

#[test]
fn valid_document_leaves_no_report() {
    let mut validator = engine().new_schema_validator().unwrap();
    validator.register_schema_text(SCHEMA).unwrap();
    let doc = engine()
        .parse_xml_str("<family><member>ann</member><member>bo</member><founded>1999-04-01</founded></family>")
        .unwrap();
    validator.set_source_node(doc);
    validator.validate(None).unwrap();
    assert!(!validator.exception_occurred());
    assert!(validator.validation_report().is_none());
}

#[test]
fn missing_required_child_is_reported() {
    let mut validator = engine().new_schema_validator().unwrap();
    validator.register_schema_text(SCHEMA).unwrap();
    let doc = engine().parse_xml_str("<family/>").unwrap();
    validator.set_source_node(doc);
    validator.validate(None).unwrap();
    assert!(validator.exception_occurred());
    let report = validator.validation_report().unwrap();
    assert_eq!(report.failures.len(), 1);
    assert!(report.failures[0].message.contains("member"));
    assert_eq!(report.failures[0].location.as_deref(), Some("/family"));
}

#[test]
fn invalid_simple_values_are_located() {
    let mut validator = engine().new_schema_validator().unwrap();
    validator.register_schema_text(SCHEMA).unwrap();
    let doc = engine()
        .parse_xml_str("<family><member>ann</member><founded>yesterday</founded></family>")
        .unwrap();
    validator.set_source_node(doc);
    validator.validate(None).unwrap();
    let report = validator.validation_report().unwrap();
    assert_eq!(report.failures.len(), 1);
    assert!(report.failures[0].message.contains("xs:date"));
    assert_eq!(
        report.failures[0].location.as_deref(),
        Some("/family/founded[1]")
    );
}

#[test]
fn failed_assertion_is_reported() {
    let mut validator = engine().new_schema_validator().unwrap();
    validator
        .register_schema_text(
            r#"<xs:schema xmlns:xs="http://www.w3.org/2001/XMLSchema">
                 <xs:element name="pair">
                   <xs:complexType>
                     <xs:sequence>
                       <xs:element name="v" type="xs:integer" maxOccurs="unbounded"/>
                     </xs:sequence>
                     <xs:assert test="count(v) = 2"/>
                   </xs:complexType>
                 </xs:element>
               </xs:schema>"#,
        )
        .unwrap();
    let doc = engine().parse_xml_str("<pair><v>1</v></pair>").unwrap();
    validator.set_source_node(doc);
    validator.validate(None).unwrap();
    let report = validator.validation_report().unwrap();
    assert!(report.failures[0].message.contains("count(v) = 2"));
}

#[test]
fn validate_from_file_and_render_report() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("instance.xml");
    std::fs::write(&path, "<family><stranger/></family>").unwrap();

    let mut validator = engine().new_schema_validator().unwrap();
    validator.register_schema_text(SCHEMA).unwrap();
    validator.validate(Some(path.to_str().unwrap())).unwrap();
    assert!(validator.exception_occurred());
    let report = validator.validation_report().unwrap();
    assert!(report.source.as_deref().unwrap().ends_with("instance.xml"));

    let rendered = report.to_node().unwrap().to_string();
    assert!(rendered.contains("<validation-report"));
    assert!(rendered.contains("<failure"));

    let json = serde_json::to_value(report).unwrap();
    assert!(json["failures"].as_array().unwrap().len() >= 2);
}

#[test]
fn additive_registration_across_schemas() {
    let mut validator = engine().new_schema_validator().unwrap();
    validator
        .register_schema_text(
            r#"<xs:schema xmlns:xs="http://www.w3.org/2001/XMLSchema">
                 <xs:complexType name="wrapper">
                   <xs:sequence><xs:element name="inner" type="xs:integer"/></xs:sequence>
                 </xs:complexType>
               </xs:schema>"#,
        )
        .unwrap();
    validator
        .register_schema_text(
            r#"<xs:schema xmlns:xs="http://www.w3.org/2001/XMLSchema">
                 <xs:element name="box" type="wrapper"/>
               </xs:schema>"#,
        )
        .unwrap();
    let doc = engine().parse_xml_str("<box><inner>7</inner></box>").unwrap();
    validator.set_source_node(doc);
    validator.validate(None).unwrap();
    assert!(!validator.exception_occurred());
}

#[test]
fn missing_source_is_a_configuration_error() {
    let mut validator = engine().new_schema_validator().unwrap();
    assert!(matches!(
        validator.validate(None),
        Err(Error::Configuration(_))
    ));
}
