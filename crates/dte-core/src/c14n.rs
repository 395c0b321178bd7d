//! XML canonicalization (exclusive and inclusive C14N 1.0, without comments)
//!
//! Output rules:
//! - no XML declaration
//! - namespace declarations first (default, then by prefix), then attributes
//!   ordered by (namespace URI, local name)
//! - text preserved as-is apart from the mandatory escapes
//! - every element written as a start/end tag pair
//!
//! Canonicalizing a subtree takes the namespace bindings declared on its
//! ancestors into account, so the digest of `<Documento>` inside an envelope
//! matches the digest the receiver computes.

use std::collections::BTreeMap;

use crate::error::{Error, Result};
use crate::xml::{escape_attribute, escape_text, local_part, Element, Node};

const XML_NAMESPACE: &str = "http://www.w3.org/XML/1998/namespace";

/// Canonicalization algorithm identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum C14nMethod {
    /// `http://www.w3.org/2001/10/xml-exc-c14n#`
    Exclusive,
    /// `http://www.w3.org/TR/2001/REC-xml-c14n-20010315`
    Inclusive,
}

impl C14nMethod {
    pub const EXCLUSIVE_URI: &'static str = "http://www.w3.org/2001/10/xml-exc-c14n#";
    pub const INCLUSIVE_URI: &'static str = "http://www.w3.org/TR/2001/REC-xml-c14n-20010315";

    pub fn algorithm(&self) -> &'static str {
        match self {
            C14nMethod::Exclusive => Self::EXCLUSIVE_URI,
            C14nMethod::Inclusive => Self::INCLUSIVE_URI,
        }
    }

    pub fn from_algorithm(uri: &str) -> Option<Self> {
        match uri {
            Self::EXCLUSIVE_URI => Some(C14nMethod::Exclusive),
            Self::INCLUSIVE_URI => Some(C14nMethod::Inclusive),
            _ => None,
        }
    }
}

/// Prefix → namespace URI bindings; the default namespace uses the empty prefix
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NamespaceContext {
    bindings: BTreeMap<String, String>,
}

impl NamespaceContext {
    /// Bindings in scope for the element at `path`, excluding its own declarations
    pub fn for_path(root: &Element, path: &[usize]) -> Result<Self> {
        let mut context = Self::default();
        let mut current = root;
        for &index in path {
            context.declare_from(current);
            current = match current.children.get(index) {
                Some(Node::Element(child)) => child,
                _ => {
                    return Err(Error::MalformedDocument(
                        "canonicalization path does not address an element".to_string(),
                    ))
                }
            };
        }
        Ok(context)
    }

    /// Add the bindings `element` declares, shadowing existing ones
    pub fn with_declarations_of(mut self, element: &Element) -> Self {
        self.declare_from(element);
        self
    }

    pub fn get(&self, prefix: &str) -> Option<&str> {
        self.bindings.get(prefix).map(String::as_str)
    }

    fn declare_from(&mut self, element: &Element) {
        for attr in &element.attributes {
            if attr.name == "xmlns" {
                self.bindings.insert(String::new(), attr.value.clone());
            } else if let Some(prefix) = attr.name.strip_prefix("xmlns:") {
                self.bindings.insert(prefix.to_string(), attr.value.clone());
            }
        }
    }

    fn insert(&mut self, prefix: &str, uri: &str) {
        self.bindings.insert(prefix.to_string(), uri.to_string());
    }

    fn namespace_of(&self, prefix: &str) -> String {
        if prefix == "xml" {
            return XML_NAMESPACE.to_string();
        }
        self.get(prefix).unwrap_or_default().to_string()
    }
}

/// Canonical form of the element at `path` below `root`
pub fn canonicalize_path(root: &Element, path: &[usize], method: C14nMethod) -> Result<String> {
    let inherited = NamespaceContext::for_path(root, path)?;
    let target = root.element_at(path).ok_or_else(|| {
        Error::MalformedDocument("canonicalization path does not address an element".to_string())
    })?;
    Ok(canonicalize_with_context(target, &inherited, method))
}

/// Canonical form of a standalone element (no inherited namespaces)
pub fn canonicalize(element: &Element, method: C14nMethod) -> String {
    canonicalize_with_context(element, &NamespaceContext::default(), method)
}

/// Canonical form of `element` given the bindings of its ancestors
pub fn canonicalize_with_context(
    element: &Element,
    inherited: &NamespaceContext,
    method: C14nMethod,
) -> String {
    let mut out = String::new();
    render(
        element,
        inherited,
        &NamespaceContext::default(),
        method,
        &mut out,
    );
    out
}

fn render(
    element: &Element,
    parent_scope: &NamespaceContext,
    rendered: &NamespaceContext,
    method: C14nMethod,
    out: &mut String,
) {
    let mut scope = parent_scope.clone();
    scope.declare_from(element);

    let declarations = match method {
        C14nMethod::Exclusive => exclusive_declarations(element, &scope, rendered),
        C14nMethod::Inclusive => inclusive_declarations(&scope, rendered),
    };

    let mut now_rendered = rendered.clone();
    for (prefix, uri) in &declarations {
        now_rendered.insert(prefix, uri);
    }

    let mut attributes: Vec<(String, &str, &str, &str)> = element
        .attributes
        .iter()
        .filter(|a| !a.is_namespace_declaration())
        .map(|a| {
            let namespace = match a.name.split_once(':') {
                Some((prefix, _)) => scope.namespace_of(prefix),
                None => String::new(),
            };
            (namespace, local_part(&a.name), a.name.as_str(), a.value.as_str())
        })
        .collect();
    attributes.sort_by(|a, b| (a.0.as_str(), a.1).cmp(&(b.0.as_str(), b.1)));

    out.push('<');
    out.push_str(&element.name);
    for (prefix, uri) in &declarations {
        if prefix.is_empty() {
            out.push_str(" xmlns=\"");
        } else {
            out.push_str(" xmlns:");
            out.push_str(prefix);
            out.push_str("=\"");
        }
        out.push_str(&escape_attribute(uri));
        out.push('"');
    }
    for (_, _, name, value) in &attributes {
        out.push(' ');
        out.push_str(name);
        out.push_str("=\"");
        out.push_str(&escape_attribute(value));
        out.push('"');
    }
    out.push('>');

    for node in &element.children {
        match node {
            Node::Text(text) => out.push_str(&escape_text(text)),
            Node::Element(child) => render(child, &scope, &now_rendered, method, out),
        }
    }

    out.push_str("</");
    out.push_str(&element.name);
    out.push('>');
}

/// Declarations needed for the prefixes this element visibly uses
fn exclusive_declarations(
    element: &Element,
    scope: &NamespaceContext,
    rendered: &NamespaceContext,
) -> Vec<(String, String)> {
    let mut used: Vec<&str> = vec![element.prefix().unwrap_or("")];
    for attr in &element.attributes {
        if attr.is_namespace_declaration() {
            continue;
        }
        if let Some((prefix, _)) = attr.name.split_once(':') {
            if prefix != "xml" && !used.contains(&prefix) {
                used.push(prefix);
            }
        }
    }
    used.sort_unstable();

    let mut out = Vec::new();
    for prefix in used {
        let uri = scope.get(prefix).unwrap_or_default();
        if needs_declaration(prefix, uri, rendered) {
            out.push((prefix.to_string(), uri.to_string()));
        }
    }
    out
}

/// Every in-scope binding not already rendered by an output ancestor
fn inclusive_declarations(
    scope: &NamespaceContext,
    rendered: &NamespaceContext,
) -> Vec<(String, String)> {
    scope
        .bindings
        .iter()
        .filter(|(prefix, uri)| needs_declaration(prefix, uri, rendered))
        .map(|(prefix, uri)| (prefix.clone(), uri.clone()))
        .collect()
}

fn needs_declaration(prefix: &str, uri: &str, rendered: &NamespaceContext) -> bool {
    if prefix.is_empty() && uri.is_empty() {
        // xmlns="" only undoes a non-empty default rendered above
        return rendered.get("").is_some_and(|r| !r.is_empty());
    }
    if !prefix.is_empty() && uri.is_empty() {
        // unbound prefix
        return false;
    }
    rendered.get(prefix) != Some(uri)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::xml::XmlDocument;

    fn c14n_of_id(xml: &str, id: &str, method: C14nMethod) -> String {
        let doc = XmlDocument::parse(xml).unwrap();
        let path = doc.root.path_where(|e| e.attribute("ID") == Some(id)).unwrap();
        canonicalize_path(&doc.root, &path, method).unwrap()
    }

    #[test]
    fn test_attribute_ordering() {
        let doc = XmlDocument::parse(r#"<a z="1" b="2" xmlns:p="urn:p" p:c="3" xmlns="urn:d"/>"#)
            .unwrap();
        assert_eq!(
            canonicalize(&doc.root, C14nMethod::Inclusive),
            r#"<a xmlns="urn:d" xmlns:p="urn:p" b="2" z="1" p:c="3"></a>"#
        );
    }

    #[test]
    fn test_exclusive_subtree_inherits_used_default_namespace() {
        let xml = r#"<EnvioDTE xmlns="http://www.sii.cl/SiiDte" xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance" version="1.0"><DTE version="1.0"><Documento ID="F1T33"><F>1</F></Documento></DTE></EnvioDTE>"#;
        assert_eq!(
            c14n_of_id(xml, "F1T33", C14nMethod::Exclusive),
            r#"<Documento xmlns="http://www.sii.cl/SiiDte" ID="F1T33"><F>1</F></Documento>"#
        );
        assert_eq!(
            c14n_of_id(xml, "F1T33", C14nMethod::Inclusive),
            r#"<Documento xmlns="http://www.sii.cl/SiiDte" xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance" ID="F1T33"><F>1</F></Documento>"#
        );
    }

    #[test]
    fn test_redundant_declarations_are_dropped() {
        let doc = XmlDocument::parse(r#"<a xmlns="urn:x"><b xmlns="urn:x"><c/></b></a>"#).unwrap();
        assert_eq!(
            canonicalize(&doc.root, C14nMethod::Exclusive),
            r#"<a xmlns="urn:x"><b><c></c></b></a>"#
        );
    }

    #[test]
    fn test_default_namespace_undeclared() {
        let doc = XmlDocument::parse(r#"<a xmlns="urn:x"><b xmlns=""/></a>"#).unwrap();
        assert_eq!(
            canonicalize(&doc.root, C14nMethod::Exclusive),
            r#"<a xmlns="urn:x"><b xmlns=""></b></a>"#
        );
    }

    #[test]
    fn test_text_and_whitespace_preserved() {
        let doc = XmlDocument::parse("<a>\n  <b>x &amp; y &gt; z</b>\n</a>").unwrap();
        assert_eq!(
            canonicalize(&doc.root, C14nMethod::Exclusive),
            "<a>\n  <b>x &amp; y &gt; z</b>\n</a>"
        );
    }

    #[test]
    fn test_unused_prefix_not_rendered_exclusive() {
        let doc =
            XmlDocument::parse(r#"<a xmlns:u="urn:unused" xmlns:p="urn:p"><p:b/></a>"#).unwrap();
        assert_eq!(
            canonicalize(&doc.root, C14nMethod::Exclusive),
            r#"<a><p:b xmlns:p="urn:p"></p:b></a>"#
        );
    }

    #[test]
    fn test_algorithm_uris() {
        for method in [C14nMethod::Exclusive, C14nMethod::Inclusive] {
            assert_eq!(C14nMethod::from_algorithm(method.algorithm()), Some(method));
        }
        assert_eq!(C14nMethod::from_algorithm("urn:other"), None);
    }
}
