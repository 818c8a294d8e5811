//! Canonical serialization of XML subtrees, over which artifact hashes are
//! computed. Two documents that differ only in attribute order, insignificant
//! whitespace, comments, or the redundant empty default-namespace declaration
//! serialize to identical bytes.

use sha2::{Digest, Sha256};
use xmltree::{Element, XMLNode};

/// Serialize an element canonically: attributes sorted by name, text trimmed
/// and escaped, whitespace-only text dropped, comments and processing
/// instructions dropped, no namespace declarations emitted.
pub fn serialize(el: &Element) -> String {
    let mut out = String::new();
    write_element(&mut out, el);
    out
}

/// The literal nuisance string some serializers emit for elements that
/// re-declare an empty default namespace. The artifact hash is defined over
/// the form with it removed, so documents differing only in that declaration
/// are hash-equal.
pub fn strip_empty_default_ns(s: &str) -> String {
    s.replace(" xmlns=\"\"", "")
}

pub fn hash_bytes(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Canonicalize `el` and return the canonical text plus its hex SHA-256.
pub fn canonical_hash(el: &Element) -> (String, String) {
    let canonical = strip_empty_default_ns(&serialize(el));
    let hash = hash_bytes(canonical.as_bytes());
    (canonical, hash)
}

fn write_element(out: &mut String, el: &Element) {
    out.push('<');
    out.push_str(&el.name);

    let mut attrs: Vec<(&String, &String)> = el.attributes.iter().collect();
    attrs.sort_by(|a, b| a.0.cmp(b.0));
    for (name, value) in attrs {
        out.push(' ');
        out.push_str(name);
        out.push_str("=\"");
        escape_into(out, value);
        out.push('"');
    }

    let mut content = el.children.iter().filter(|node| match node {
        XMLNode::Element(_) => true,
        XMLNode::Text(text) | XMLNode::CData(text) => !text.trim().is_empty(),
        _ => false,
    });

    let Some(first) = content.next() else {
        out.push_str("/>");
        return;
    };

    out.push('>');
    for node in std::iter::once(first).chain(content) {
        match node {
            XMLNode::Element(child) => write_element(out, child),
            XMLNode::Text(text) | XMLNode::CData(text) => escape_into(out, text.trim()),
            _ => {}
        }
    }
    out.push_str("</");
    out.push_str(&el.name);
    out.push('>');
}

fn escape_into(out: &mut String, raw: &str) {
    for c in raw.chars() {
        match c {
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '&' => out.push_str("&amp;"),
            '"' => out.push_str("&quot;"),
            c => out.push(c),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn parse(xml: &str) -> Element {
        Element::parse(xml.as_bytes()).unwrap()
    }

    #[test]
    fn attribute_order_is_immaterial() {
        let a = parse(r#"<Network code="XX" startDate="2020-01-01T00:00:00"/>"#);
        let b = parse(r#"<Network startDate="2020-01-01T00:00:00" code="XX"/>"#);
        assert_eq!(serialize(&a), serialize(&b));
        assert_eq!(canonical_hash(&a).1, canonical_hash(&b).1);
    }

    #[test]
    fn whitespace_and_comments_are_immaterial() {
        let a = parse("<Network code=\"XX\">\n  <!-- note -->\n  <Description>Test</Description>\n</Network>");
        let b = parse(r#"<Network code="XX"><Description>Test</Description></Network>"#);
        assert_eq!(serialize(&a), serialize(&b));
    }

    #[test]
    fn empty_default_namespace_is_stripped() {
        let canonical =
            strip_empty_default_ns(r#"<Network code="XX"><Station xmlns="" code="STA"/></Network>"#);
        assert_eq!(
            canonical,
            r#"<Network code="XX"><Station code="STA"/></Network>"#
        );
    }

    #[test]
    fn text_is_escaped() {
        let el = parse(r#"<Description>a &amp; b</Description>"#);
        assert_eq!(serialize(&el), "<Description>a &amp; b</Description>");
    }

    #[test]
    fn serialization_is_stable() {
        let xml = r#"<Network code="XX" startDate="2020-01-01T00:00:00">
            <Description>Stable</Description>
            <Station code="STA01"><Latitude>52.1</Latitude></Station>
        </Network>"#;
        let first = canonical_hash(&parse(xml));
        let second = canonical_hash(&parse(xml));
        assert_eq!(first, second);
        // Canonicalizing the canonical form is a fixed point.
        let reparsed = canonical_hash(&parse(&first.0));
        assert_eq!(reparsed, first);
    }
}
