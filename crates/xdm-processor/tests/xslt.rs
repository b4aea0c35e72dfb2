use std::collections::HashMap;
use std::sync::OnceLock;

use xdm::{XdmAtomicValue, XdmItem, XdmValue};
use xdm_processor::{Engine, Error};

fn engine() -> &'static Engine {
    static ENGINE: OnceLock<Engine> = OnceLock::new();
    ENGINE.get_or_init(|| Engine::init().expect("engine init"))
}

fn node_value(node: xdm::XdmNode) -> XdmValue {
    XdmValue::from_items(vec![XdmItem::Node(node)])
}

const DOC: &str = r#"<out><person att1="value1" att2="value2">text1</person><person>text2</person><person>text3</person></out>"#;

#[test]
fn transform_emits_xml_declaration() {
    let doc = engine().parse_xml_str(DOC).unwrap();
    let mut xslt = engine().new_xslt30_processor().unwrap();
    xslt.compile_stylesheet_text(
        r#"<xsl:stylesheet xmlns:xsl="http://www.w3.org/1999/XSL/Transform" version="3.0">
             <xsl:template match="/">
               <count><xsl:value-of select="count(/out/person)"/></count>
             </xsl:template>
           </xsl:stylesheet>"#,
    )
    .unwrap();
    xslt.set_initial_match_selection(node_value(doc));
    let text = xslt.apply_templates_returning_string().unwrap().unwrap();
    assert_eq!(
        text,
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<count>3</count>"
    );
}

#[test]
fn no_stylesheet_means_no_result() {
    let mut xslt = engine().new_xslt30_processor().unwrap();
    assert!(xslt.apply_templates_returning_value().unwrap().is_none());
    assert!(xslt.call_template_returning_value(Some("main")).unwrap().is_none());
}

#[test]
fn template_rules_with_modes_and_priorities() {
    let doc = engine().parse_xml_str(DOC).unwrap();
    let mut xslt = engine().new_xslt30_processor().unwrap();
    xslt.compile_stylesheet_text(
        r#"<xsl:stylesheet xmlns:xsl="http://www.w3.org/1999/XSL/Transform" version="3.0">
             <xsl:template match="/"><r><xsl:apply-templates select="/out/person"/></r></xsl:template>
             <xsl:template match="person"><p>generic</p></xsl:template>
             <xsl:template match="person[@att1]"><p>attributed</p></xsl:template>
           </xsl:stylesheet>"#,
    )
    .unwrap();
    xslt.set_initial_match_selection(node_value(doc));
    xslt.set_property("!omit-xml-declaration", "yes");
    let text = xslt.apply_templates_returning_string().unwrap().unwrap();
    // The predicated pattern outranks the plain name test.
    assert_eq!(text, "<r><p>attributed</p><p>generic</p><p>generic</p></r>");
}

#[test]
fn latest_declaration_wins_priority_ties() {
    let doc = engine().parse_xml_str("<out><x/></out>").unwrap();
    let mut xslt = engine().new_xslt30_processor().unwrap();
    xslt.compile_stylesheet_text(
        r#"<xsl:stylesheet xmlns:xsl="http://www.w3.org/1999/XSL/Transform" version="3.0">
             <xsl:template match="/"><xsl:apply-templates select="//x"/></xsl:template>
             <xsl:template match="x"><first/></xsl:template>
             <xsl:template match="x"><second/></xsl:template>
           </xsl:stylesheet>"#,
    )
    .unwrap();
    xslt.set_initial_match_selection(node_value(doc));
    xslt.set_property("!omit-xml-declaration", "yes");
    let text = xslt.apply_templates_returning_string().unwrap().unwrap();
    assert_eq!(text, "<second/>");
}

#[test]
fn built_in_rules_recurse_to_text() {
    let doc = engine().parse_xml_str(DOC).unwrap();
    let mut xslt = engine().new_xslt30_processor().unwrap();
    // No rule matches person, so the built-in rules copy text through.
    xslt.compile_stylesheet_text(
        r#"<xsl:stylesheet xmlns:xsl="http://www.w3.org/1999/XSL/Transform" version="3.0">
             <xsl:template match="missing"/>
           </xsl:stylesheet>"#,
    )
    .unwrap();
    xslt.set_initial_match_selection(node_value(doc));
    xslt.set_property("!omit-xml-declaration", "yes");
    let text = xslt.apply_templates_returning_string().unwrap().unwrap();
    assert_eq!(text, "text1text2text3");
}

#[test]
fn call_template_with_params() {
    let mut xslt = engine().new_xslt30_processor().unwrap();
    xslt.compile_stylesheet_text(
        r#"<xsl:stylesheet xmlns:xsl="http://www.w3.org/1999/XSL/Transform" version="3.0">
             <xsl:template name="greet">
               <xsl:param name="who" select="'nobody'"/>
               <greeting><xsl:value-of select="$who"/></greeting>
             </xsl:template>
           </xsl:stylesheet>"#,
    )
    .unwrap();

    let value = xslt.call_template_returning_value(Some("greet")).unwrap().unwrap();
    assert_eq!(value.head().unwrap().as_node().unwrap().string_value(), "nobody");

    let mut params = HashMap::new();
    params.insert("who".to_string(), engine().make_string_value("world"));
    xslt.set_initial_template_parameters(params);
    let value = xslt.call_template_returning_value(Some("greet")).unwrap().unwrap();
    assert_eq!(value.head().unwrap().as_node().unwrap().string_value(), "world");

    assert!(matches!(
        xslt.call_template_returning_value(Some("no-such-template")),
        Err(Error::Name(_))
    ));
}

#[test]
fn stylesheet_functions_coerce_by_declared_types() {
    let mut xslt = engine().new_xslt30_processor().unwrap();
    xslt.compile_stylesheet_text(
        r#"<xsl:stylesheet xmlns:xsl="http://www.w3.org/1999/XSL/Transform"
                           xmlns:mf="http://example.com/mf" version="3.0">
             <xsl:template match="/"><xsl:value-of select="mf:add(20, 22)"/></xsl:template>
             <xsl:function name="mf:add" as="xs:integer">
               <xsl:param name="a" as="xs:integer"/>
               <xsl:param name="b" as="xs:integer"/>
               <xsl:sequence select="$a + $b"/>
             </xsl:function>
             <xsl:function name="mf:addd" as="xs:double">
               <xsl:param name="a" as="xs:double"/>
               <xsl:param name="b" as="xs:double"/>
               <xsl:sequence select="$a + $b"/>
             </xsl:function>
           </xsl:stylesheet>"#,
    )
    .unwrap();

    let args = [engine().make_integer_value(2), engine().make_integer_value(3)];
    let value = xslt
        .call_function_returning_value("{http://example.com/mf}add", &args)
        .unwrap()
        .unwrap();
    assert_eq!(
        value.head().unwrap(),
        &XdmItem::Atomic(XdmAtomicValue::Integer(5))
    );

    // Integer arguments promote to the declared xs:double.
    let value = xslt
        .call_function_returning_value("{http://example.com/mf}addd", &args)
        .unwrap()
        .unwrap();
    assert_eq!(
        value.head().unwrap(),
        &XdmItem::Atomic(XdmAtomicValue::Double(5.0))
    );

    assert!(matches!(
        xslt.call_function_returning_value("{http://example.com/mf}add", &args[..1]),
        Err(Error::Arity(_))
    ));
    assert!(matches!(
        xslt.call_function_returning_value("{http://example.com/mf}missing", &args),
        Err(Error::Name(_))
    ));
    let bad = [
        engine().make_string_value("two"),
        engine().make_integer_value(3),
    ];
    assert!(matches!(
        xslt.call_function_returning_value("{http://example.com/mf}add", &bad),
        Err(Error::Type(_))
    ));
}

#[test]
fn global_parameters_and_variables() {
    let doc = engine().parse_xml_str(DOC).unwrap();
    let mut xslt = engine().new_xslt30_processor().unwrap();
    xslt.compile_stylesheet_text(
        r#"<xsl:stylesheet xmlns:xsl="http://www.w3.org/1999/XSL/Transform" version="3.0">
             <xsl:param name="label" select="'default'"/>
             <xsl:variable name="upper" select="concat($label, '!')"/>
             <xsl:template match="/"><l><xsl:value-of select="$upper"/></l></xsl:template>
           </xsl:stylesheet>"#,
    )
    .unwrap();
    xslt.set_initial_match_selection(node_value(doc.clone()));
    xslt.set_property("!omit-xml-declaration", "yes");
    let text = xslt.apply_templates_returning_string().unwrap().unwrap();
    assert_eq!(text, "<l>default!</l>");

    xslt.set_parameter("label", engine().make_string_value("supplied"));
    let text = xslt.apply_templates_returning_string().unwrap().unwrap();
    assert_eq!(text, "<l>supplied!</l>");

    xslt.clear_parameters();
    let text = xslt.apply_templates_returning_string().unwrap().unwrap();
    assert_eq!(text, "<l>default!</l>");
}

#[test]
fn for_each_with_position() {
    let doc = engine().parse_xml_str(DOC).unwrap();
    let mut xslt = engine().new_xslt30_processor().unwrap();
    xslt.compile_stylesheet_text(
        r#"<xsl:stylesheet xmlns:xsl="http://www.w3.org/1999/XSL/Transform" version="3.0">
             <xsl:template match="/">
               <list><xsl:for-each select="/out/person">
                 <i n="{position()}"><xsl:value-of select="."/></i>
               </xsl:for-each></list>
             </xsl:template>
           </xsl:stylesheet>"#,
    )
    .unwrap();
    xslt.set_initial_match_selection(node_value(doc));
    xslt.set_property("!omit-xml-declaration", "yes");
    let text = xslt.apply_templates_returning_string().unwrap().unwrap();
    assert_eq!(
        text,
        r#"<list><i n="1">text1</i><i n="2">text2</i><i n="3">text3</i></list>"#
    );
}

#[test]
fn try_catch_exposes_error_code() {
    let doc = engine().parse_xml_str("<n>0</n>").unwrap();
    let mut xslt = engine().new_xslt30_processor().unwrap();
    xslt.compile_stylesheet_text(
        r#"<xsl:stylesheet xmlns:xsl="http://www.w3.org/1999/XSL/Transform" version="3.0">
             <xsl:template match="/">
               <xsl:try>
                 <xsl:value-of select="1 idiv 0"/>
                 <xsl:catch>
                   <caught><xsl:value-of select="$err:code"/></caught>
                 </xsl:catch>
               </xsl:try>
             </xsl:template>
           </xsl:stylesheet>"#,
    )
    .unwrap();
    xslt.set_initial_match_selection(node_value(doc));
    xslt.set_property("!omit-xml-declaration", "yes");
    let text = xslt.apply_templates_returning_string().unwrap().unwrap();
    assert_eq!(text, "<caught>FOAR0001</caught>");
}

#[test]
fn raw_results_skip_document_wrapping() {
    let doc = engine().parse_xml_str(DOC).unwrap();
    let mut xslt = engine().new_xslt30_processor().unwrap();
    xslt.compile_stylesheet_text(
        r#"<xsl:stylesheet xmlns:xsl="http://www.w3.org/1999/XSL/Transform" version="3.0">
             <xsl:template match="/"><xsl:sequence select="count(//person)"/></xsl:template>
           </xsl:stylesheet>"#,
    )
    .unwrap();
    xslt.set_initial_match_selection(node_value(doc.clone()));
    xslt.set_result_as_raw_value(true);
    let value = xslt.apply_templates_returning_value().unwrap().unwrap();
    assert_eq!(
        value.head().unwrap(),
        &XdmItem::Atomic(XdmAtomicValue::Integer(3))
    );

    // Non-raw mode wraps the same sequence in a document node.
    xslt.set_result_as_raw_value(false);
    let value = xslt.apply_templates_returning_value().unwrap().unwrap();
    let node = value.head().unwrap().as_node().unwrap();
    assert_eq!(node.node_kind(), xdm::NodeKind::Document);
    assert_eq!(node.string_value(), "3");
}

#[test]
fn item_separator_between_top_level_items() {
    let doc = engine().parse_xml_str("<z/>").unwrap();
    let mut xslt = engine().new_xslt30_processor().unwrap();
    xslt.compile_stylesheet_text(
        r#"<xsl:stylesheet xmlns:xsl="http://www.w3.org/1999/XSL/Transform" version="3.0">
             <xsl:output item-separator="§" omit-xml-declaration="yes"/>
             <xsl:template match="/">
               <xsl:comment>A</xsl:comment>
               <out/>
               <xsl:comment>Z</xsl:comment>
             </xsl:template>
           </xsl:stylesheet>"#,
    )
    .unwrap();
    xslt.set_initial_match_selection(node_value(doc));
    let value = xslt.apply_templates_returning_value().unwrap().unwrap();
    let node = value.head().unwrap().as_node().unwrap();
    assert_eq!(node.to_string(), "<!--A-->§<out/>§<!--Z-->");
    let text = xslt.apply_templates_returning_string().unwrap().unwrap();
    assert_eq!(text, "<!--A-->§<out/>§<!--Z-->");
}

#[test]
fn result_document_writes_secondary_output() {
    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("secondary.xml");
    let doc = engine().parse_xml_str("<z/>").unwrap();
    let mut xslt = engine().new_xslt30_processor().unwrap();
    xslt.compile_stylesheet_text(&format!(
        r#"<xsl:stylesheet xmlns:xsl="http://www.w3.org/1999/XSL/Transform" version="3.0">
             <xsl:template match="/">
               <primary/>
               <xsl:result-document href="{}"><side/></xsl:result-document>
             </xsl:template>
           </xsl:stylesheet>"#,
        target.display()
    ))
    .unwrap();
    xslt.set_initial_match_selection(node_value(doc));
    xslt.set_property("!omit-xml-declaration", "yes");
    let text = xslt.apply_templates_returning_string().unwrap().unwrap();
    // The secondary tree never shows up in the primary result.
    assert_eq!(text, "<primary/>");
    let written = std::fs::read_to_string(&target).unwrap();
    assert!(written.contains("<side/>"));
    assert!(written.starts_with("<?xml"));
}

#[test]
fn transform_to_string_one_shot() {
    let dir = tempfile::tempdir().unwrap();
    let sheet_path = dir.path().join("sheet.xsl");
    std::fs::write(
        &sheet_path,
        r#"<xsl:stylesheet xmlns:xsl="http://www.w3.org/1999/XSL/Transform" version="3.0">
             <xsl:template match="/"><n><xsl:value-of select="count(//person)"/></n></xsl:template>
           </xsl:stylesheet>"#,
    )
    .unwrap();
    let doc = engine().parse_xml_str(DOC).unwrap();
    let mut xslt = engine().new_xslt30_processor().unwrap();
    let text = xslt
        .transform_to_string(Some(&doc), Some(&sheet_path))
        .unwrap()
        .unwrap();
    assert_eq!(text, "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<n>3</n>");
}

#[test]
fn unknown_instruction_is_a_compile_error() {
    let mut xslt = engine().new_xslt30_processor().unwrap();
    let err = xslt
        .compile_stylesheet_text(
            r#"<xsl:stylesheet xmlns:xsl="http://www.w3.org/1999/XSL/Transform" version="3.0">
                 <xsl:template match="/"><xsl:nonsense/></xsl:template>
               </xsl:stylesheet>"#,
        )
        .unwrap_err();
    match err {
        Error::Compile(message) => assert!(message.contains("nonsense")),
        other => panic!("expected a compile error, got {other}"),
    }
}
