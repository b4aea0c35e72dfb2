//! Chained transforms: the structured result of one stage feeds the
//! next with no serialization in between.

use std::sync::OnceLock;

use xdm::{XdmItem, XdmValue};
use xdm_processor::Engine;

fn engine() -> &'static Engine {
    static ENGINE: OnceLock<Engine> = OnceLock::new();
    ENGINE.get_or_init(|| Engine::init().expect("engine init"))
}

const WRAP: &str = r#"<xsl:stylesheet xmlns:xsl="http://www.w3.org/1999/XSL/Transform" version="3.0">
  <xsl:template match="/"><a><xsl:copy-of select="*"/></a></xsl:template>
</xsl:stylesheet>"#;

#[test]
fn five_stages_nest_five_deep() {
    let mut xslt = engine().new_xslt30_processor().unwrap();
    xslt.compile_stylesheet_text(WRAP).unwrap();

    let mut current = engine().parse_xml_str("<z/>").unwrap();
    for _ in 0..5 {
        xslt.set_initial_match_selection(XdmValue::from_items(vec![XdmItem::Node(
            current.clone(),
        )]));
        let value = xslt.apply_templates_returning_value().unwrap().unwrap();
        current = value.head().unwrap().as_node().unwrap().clone();
    }
    assert_eq!(
        current.to_string(),
        "<a><a><a><a><a><z/></a></a></a></a></a>"
    );
}

#[test]
fn single_stage_wraps_once() {
    let mut xslt = engine().new_xslt30_processor().unwrap();
    xslt.compile_stylesheet_text(WRAP).unwrap();
    let doc = engine().parse_xml_str("<z/>").unwrap();
    xslt.set_initial_match_selection(XdmValue::from_items(vec![XdmItem::Node(doc)]));
    let value = xslt.apply_templates_returning_value().unwrap().unwrap();
    let node = value.head().unwrap().as_node().unwrap();
    assert_eq!(node.node_kind(), xdm::NodeKind::Document);
    assert_eq!(node.to_string(), "<a><z/></a>");
}
