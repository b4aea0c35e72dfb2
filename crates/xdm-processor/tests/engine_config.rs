//! Engine configuration properties, in their own binary because the
//! schema-validation switch affects every validator created from the
//! shared engine.

use xdm_processor::{Engine, Error};

#[test]
fn schema_awareness_follows_configuration() {
    let engine = Engine::init().expect("engine init");
    assert!(engine.is_schema_aware().unwrap());
    assert!(engine.configuration_property("schema-validation").unwrap().is_none());

    engine
        .set_configuration_property("schema-validation", "off")
        .unwrap();
    assert!(!engine.is_schema_aware().unwrap());
    assert!(matches!(
        engine.new_schema_validator(),
        Err(Error::Configuration(_))
    ));

    engine
        .set_configuration_property("schema-validation", "strict")
        .unwrap();
    assert!(engine.is_schema_aware().unwrap());
    assert!(engine.new_schema_validator().is_ok());
    assert_eq!(
        engine
            .configuration_property("schema-validation")
            .unwrap()
            .as_deref(),
        Some("strict")
    );
}
