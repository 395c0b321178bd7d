//! Ordered XML tree used for signing and for reading authority documents
//!
//! The tree keeps children and attributes in the order they were parsed or
//! inserted. Comments and processing instructions are dropped while parsing;
//! CDATA sections become ordinary text.

use std::borrow::Cow;

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use crate::error::{Error, Result};

/// Character encoding of a serialized document
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    Utf8,
    Iso88591,
}

impl Encoding {
    /// Label written in the XML declaration
    pub fn label(&self) -> &'static str {
        match self {
            Encoding::Utf8 => "UTF-8",
            Encoding::Iso88591 => "ISO-8859-1",
        }
    }

    fn from_label(label: &str) -> Self {
        match label.to_ascii_uppercase().as_str() {
            "ISO-8859-1" | "ISO8859-1" | "LATIN1" | "LATIN-1" => Encoding::Iso88591,
            _ => Encoding::Utf8,
        }
    }
}

/// A single attribute, including `xmlns` declarations
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    pub name: String,
    pub value: String,
}

impl Attribute {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }

    /// True for `xmlns` and `xmlns:*`
    pub fn is_namespace_declaration(&self) -> bool {
        self.name == "xmlns" || self.name.starts_with("xmlns:")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    Element(Element),
    Text(String),
}

/// An element with ordered attributes and children
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Element {
    /// Qualified name as written (`prefix:local` or `local`)
    pub name: String,
    pub attributes: Vec<Attribute>,
    pub children: Vec<Node>,
}

impl Element {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attributes: Vec::new(),
            children: Vec::new(),
        }
    }

    /// Element holding a single text node
    pub fn text_element(name: impl Into<String>, text: impl Into<String>) -> Self {
        Self::new(name).with_text(text)
    }

    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.set_attribute(name, value);
        self
    }

    pub fn with_child(mut self, child: Element) -> Self {
        self.push(child);
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.push_text(text);
        self
    }

    pub fn push(&mut self, child: Element) {
        self.children.push(Node::Element(child));
    }

    /// Append text, merging with a preceding text node
    pub fn push_text(&mut self, text: impl Into<String>) {
        let text = text.into();
        if text.is_empty() {
            return;
        }
        if let Some(Node::Text(last)) = self.children.last_mut() {
            last.push_str(&text);
        } else {
            self.children.push(Node::Text(text));
        }
    }

    /// Replace an attribute in place, or append it
    pub fn set_attribute(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.attributes.iter_mut().find(|a| a.name == name) {
            Some(existing) => existing.value = value,
            None => self.attributes.push(Attribute { name, value }),
        }
    }

    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|a| a.name == name)
            .map(|a| a.value.as_str())
    }

    pub fn prefix(&self) -> Option<&str> {
        self.name.split_once(':').map(|(prefix, _)| prefix)
    }

    pub fn local_name(&self) -> &str {
        local_part(&self.name)
    }

    pub fn child_elements(&self) -> impl Iterator<Item = &Element> {
        self.children.iter().filter_map(|node| match node {
            Node::Element(e) => Some(e),
            Node::Text(_) => None,
        })
    }

    /// First direct child with the given local name
    pub fn child(&self, local_name: &str) -> Option<&Element> {
        self.child_elements().find(|e| e.local_name() == local_name)
    }

    /// Trimmed text of the first direct child with the given local name
    pub fn child_text(&self, local_name: &str) -> Option<String> {
        self.child(local_name).map(|e| e.text().trim().to_string())
    }

    /// Concatenated text of all descendants
    pub fn text(&self) -> String {
        let mut out = String::new();
        collect_text(self, &mut out);
        out
    }

    /// Depth-first search, self included, by local name
    pub fn find(&self, local_name: &str) -> Option<&Element> {
        if self.local_name() == local_name {
            return Some(self);
        }
        self.child_elements().find_map(|c| c.find(local_name))
    }

    /// All descendants (self included) with the given local name, in document order
    pub fn find_all<'a>(&'a self, local_name: &str) -> Vec<&'a Element> {
        let mut found = Vec::new();
        walk(self, &mut |e| {
            if e.local_name() == local_name {
                found.push(e);
            }
        });
        found
    }

    /// Element whose `ID` attribute equals `id`
    pub fn find_by_id(&self, id: &str) -> Option<&Element> {
        self.path_where(|e| e.attribute("ID") == Some(id))
            .and_then(|path| self.element_at(&path))
    }

    /// Child-index path to the first element (self included) matching `pred`
    pub fn path_where(&self, pred: impl Fn(&Element) -> bool) -> Option<Vec<usize>> {
        fn search(e: &Element, pred: &dyn Fn(&Element) -> bool, path: &mut Vec<usize>) -> bool {
            if pred(e) {
                return true;
            }
            for (i, node) in e.children.iter().enumerate() {
                if let Node::Element(child) = node {
                    path.push(i);
                    if search(child, pred, path) {
                        return true;
                    }
                    path.pop();
                }
            }
            false
        }

        let mut path = Vec::new();
        search(self, &pred, &mut path).then_some(path)
    }

    /// Paths of every element matching `pred`, in document order
    pub fn paths_where(&self, pred: impl Fn(&Element) -> bool) -> Vec<Vec<usize>> {
        fn search(
            e: &Element,
            pred: &dyn Fn(&Element) -> bool,
            path: &mut Vec<usize>,
            out: &mut Vec<Vec<usize>>,
        ) {
            if pred(e) {
                out.push(path.clone());
            }
            for (i, node) in e.children.iter().enumerate() {
                if let Node::Element(child) = node {
                    path.push(i);
                    search(child, pred, path, out);
                    path.pop();
                }
            }
        }

        let mut out = Vec::new();
        search(self, &pred, &mut Vec::new(), &mut out);
        out
    }

    pub fn element_at(&self, path: &[usize]) -> Option<&Element> {
        let mut current = self;
        for &index in path {
            current = match current.children.get(index)? {
                Node::Element(e) => e,
                Node::Text(_) => return None,
            };
        }
        Some(current)
    }

    pub fn element_at_mut(&mut self, path: &[usize]) -> Option<&mut Element> {
        let mut current = self;
        for &index in path {
            current = match current.children.get_mut(index)? {
                Node::Element(e) => e,
                Node::Text(_) => return None,
            };
        }
        Some(current)
    }

    /// Detach the element at `path`; the root itself cannot be removed
    pub fn remove_at(&mut self, path: &[usize]) -> Option<Element> {
        let (&last, parent_path) = path.split_last()?;
        let parent = self.element_at_mut(parent_path)?;
        if !matches!(parent.children.get(last), Some(Node::Element(_))) {
            return None;
        }
        match parent.children.remove(last) {
            Node::Element(e) => Some(e),
            Node::Text(_) => None,
        }
    }

    /// Serialize without namespace processing, attributes in stored order
    pub fn to_xml_string(&self) -> String {
        let mut out = String::new();
        write_element(self, &mut out, false);
        out
    }

    /// Serialization with whitespace-only text nodes removed
    ///
    /// This is the byte form the authority signs for the CAF `DA` block and
    /// that stamps are computed over for `DD`.
    pub fn flatten(&self) -> String {
        let mut out = String::new();
        write_element(self, &mut out, true);
        out
    }
}

/// A parsed or constructed document
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XmlDocument {
    pub encoding: Option<Encoding>,
    pub root: Element,
}

impl XmlDocument {
    /// New document declared as ISO-8859-1, the encoding the authority expects
    pub fn new(root: Element) -> Self {
        Self {
            encoding: Some(Encoding::Iso88591),
            root,
        }
    }

    pub fn parse(input: &str) -> Result<Self> {
        parse_str(input)
    }

    /// Parse raw bytes, honouring an ISO-8859-1 declaration
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
        let text = match declared_encoding(bytes) {
            Some(Encoding::Iso88591) => Cow::Owned(decode_latin1(bytes)),
            _ => Cow::Borrowed(
                std::str::from_utf8(bytes).map_err(|e| Error::XmlParse(e.to_string()))?,
            ),
        };
        parse_str(&text)
    }

    /// Serialization with declaration, as a Rust string
    pub fn to_xml_string(&self) -> String {
        let mut out = String::new();
        if let Some(encoding) = self.encoding {
            out.push_str("<?xml version=\"1.0\" encoding=\"");
            out.push_str(encoding.label());
            out.push_str("\"?>\n");
        }
        write_element(&self.root, &mut out, false);
        out
    }

    /// Serialization in the declared encoding
    pub fn to_bytes(&self) -> Vec<u8> {
        let xml = self.to_xml_string();
        match self.encoding {
            Some(Encoding::Iso88591) => encode_latin1(&xml),
            _ => xml.into_bytes(),
        }
    }
}

pub(crate) fn local_part(name: &str) -> &str {
    name.rsplit_once(':').map(|(_, local)| local).unwrap_or(name)
}

fn collect_text(e: &Element, out: &mut String) {
    for node in &e.children {
        match node {
            Node::Text(t) => out.push_str(t),
            Node::Element(child) => collect_text(child, out),
        }
    }
}

fn walk<'a>(e: &'a Element, visit: &mut dyn FnMut(&'a Element)) {
    visit(e);
    for child in e.child_elements() {
        walk(child, visit);
    }
}

fn write_element(e: &Element, out: &mut String, flatten: bool) {
    out.push('<');
    out.push_str(&e.name);
    for attr in &e.attributes {
        out.push(' ');
        out.push_str(&attr.name);
        out.push_str("=\"");
        out.push_str(&escape_attribute(&attr.value));
        out.push('"');
    }
    out.push('>');
    for node in &e.children {
        match node {
            Node::Element(child) => write_element(child, out, flatten),
            Node::Text(t) if flatten && t.trim().is_empty() => {}
            Node::Text(t) => out.push_str(&escape_text(t)),
        }
    }
    out.push_str("</");
    out.push_str(&e.name);
    out.push('>');
}

pub(crate) fn escape_text(text: &str) -> Cow<'_, str> {
    if !text.contains(['&', '<', '>', '\r']) {
        return Cow::Borrowed(text);
    }
    let mut out = String::with_capacity(text.len() + 8);
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '\r' => out.push_str("&#xD;"),
            _ => out.push(c),
        }
    }
    Cow::Owned(out)
}

pub(crate) fn escape_attribute(value: &str) -> Cow<'_, str> {
    if !value.contains(['&', '<', '"', '\t', '\n', '\r']) {
        return Cow::Borrowed(value);
    }
    let mut out = String::with_capacity(value.len() + 8);
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '"' => out.push_str("&quot;"),
            '\t' => out.push_str("&#x9;"),
            '\n' => out.push_str("&#xA;"),
            '\r' => out.push_str("&#xD;"),
            _ => out.push(c),
        }
    }
    Cow::Owned(out)
}

fn declared_encoding(bytes: &[u8]) -> Option<Encoding> {
    if !bytes.starts_with(b"<?xml") {
        return None;
    }
    let end = bytes.windows(2).position(|w| w == b"?>")?;
    let decl = String::from_utf8_lossy(&bytes[..end]);
    let after = &decl[decl.find("encoding")? + "encoding".len()..];
    let after = after.trim_start().strip_prefix('=')?.trim_start();
    let quote = after.chars().next()?;
    let rest = &after[quote.len_utf8()..];
    let label = &rest[..rest.find(quote)?];
    Some(Encoding::from_label(label))
}

fn decode_latin1(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| b as char).collect()
}

pub(crate) fn encode_latin1(text: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(text.len());
    for c in text.chars() {
        let code = c as u32;
        if code <= 0xFF {
            out.push(code as u8);
        } else {
            out.extend_from_slice(format!("&#{};", code).as_bytes());
        }
    }
    out
}

/// XML line-end normalization, applied to literal text before references
/// are expanded
fn normalize_newlines(text: &str) -> Cow<'_, str> {
    if text.contains('\r') {
        Cow::Owned(text.replace("\r\n", "\n").replace('\r', "\n"))
    } else {
        Cow::Borrowed(text)
    }
}

fn element_from_start(start: &BytesStart<'_>) -> Result<Element> {
    let mut element = Element::new(String::from_utf8_lossy(start.name().as_ref()).into_owned());
    for attr in start.attributes() {
        let attr = attr.map_err(|e| Error::XmlParse(e.to_string()))?;
        let name = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        // Attribute-value normalization happens before references are expanded
        let raw = String::from_utf8_lossy(&attr.value).replace(['\t', '\n', '\r'], " ");
        let value = quick_xml::escape::unescape(&raw)
            .map_err(|e| Error::XmlParse(e.to_string()))?
            .into_owned();
        if element.attribute(&name).is_some() {
            return Err(Error::XmlParse(format!(
                "duplicate attribute {} on <{}>",
                name, element.name
            )));
        }
        element.attributes.push(Attribute { name, value });
    }
    Ok(element)
}

fn attach(stack: &mut [Element], root: &mut Option<Element>, element: Element) -> Result<()> {
    match stack.last_mut() {
        Some(parent) => {
            parent.push(element);
            Ok(())
        }
        None if root.is_none() => {
            *root = Some(element);
            Ok(())
        }
        None => Err(Error::XmlParse("multiple root elements".to_string())),
    }
}

fn append_text(stack: &mut [Element], text: &str) -> Result<()> {
    match stack.last_mut() {
        Some(parent) => {
            parent.push_text(text.to_string());
            Ok(())
        }
        None if text.trim().is_empty() => Ok(()),
        None => Err(Error::XmlParse("text outside the root element".to_string())),
    }
}

fn parse_str(input: &str) -> Result<XmlDocument> {
    let mut reader = Reader::from_str(input);
    let mut stack: Vec<Element> = Vec::new();
    let mut root: Option<Element> = None;
    let mut encoding = None;

    loop {
        match reader.read_event()? {
            Event::Decl(decl) => {
                encoding = Some(match decl.encoding() {
                    Some(label) => {
                        let label = label.map_err(|e| Error::XmlParse(e.to_string()))?;
                        Encoding::from_label(&String::from_utf8_lossy(&label))
                    }
                    None => Encoding::Utf8,
                });
            }
            Event::Start(start) => stack.push(element_from_start(&start)?),
            Event::Empty(start) => {
                let element = element_from_start(&start)?;
                attach(&mut stack, &mut root, element)?;
            }
            Event::End(_) => {
                let element = stack
                    .pop()
                    .ok_or_else(|| Error::XmlParse("unbalanced end tag".to_string()))?;
                attach(&mut stack, &mut root, element)?;
            }
            Event::Text(text) => {
                // `&#xD;` must survive as CR, so only literal line ends are normalized
                let raw = String::from_utf8_lossy(&text.into_inner()).into_owned();
                let text = quick_xml::escape::unescape(&normalize_newlines(&raw))
                    .map_err(|e| Error::XmlParse(e.to_string()))?
                    .into_owned();
                append_text(&mut stack, &text)?;
            }
            Event::CData(data) => {
                let raw = String::from_utf8_lossy(&data.into_inner()).into_owned();
                append_text(&mut stack, &normalize_newlines(&raw))?;
            }
            Event::Comment(_) | Event::PI(_) | Event::DocType(_) => {}
            Event::Eof => break,
        }
    }

    if let Some(open) = stack.last() {
        return Err(Error::XmlParse(format!("unclosed element <{}>", open.name)));
    }
    let root = root.ok_or_else(|| Error::XmlParse("document has no root element".to_string()))?;
    Ok(XmlDocument { encoding, root })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_preserves_order() {
        let doc = XmlDocument::parse(r#"<a z="1" b="2"><c/>text<b>x</b></a>"#).unwrap();
        let names: Vec<_> = doc.root.attributes.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, ["z", "b"]);
        assert_eq!(doc.root.children.len(), 3);
        assert!(matches!(&doc.root.children[1], Node::Text(t) if t == "text"));
    }

    #[test]
    fn test_empty_elements_written_as_pairs() {
        let doc = XmlDocument::parse("<a><b/></a>").unwrap();
        assert_eq!(doc.root.to_xml_string(), "<a><b></b></a>");
    }

    #[test]
    fn test_flatten_drops_whitespace_only_text() {
        let doc = XmlDocument::parse("<DA>\n  <RE>1-9</RE>\n  <TD> 33 </TD>\n</DA>").unwrap();
        assert_eq!(doc.root.flatten(), "<DA><RE>1-9</RE><TD> 33 </TD></DA>");
    }

    #[test]
    fn test_escapes_roundtrip() {
        let doc = XmlDocument::parse(r#"<a v="x &amp; &quot;y&quot;">1 &lt; 2 &amp; 3</a>"#).unwrap();
        assert_eq!(doc.root.attribute("v"), Some("x & \"y\""));
        assert_eq!(doc.root.text(), "1 < 2 & 3");
        let again = XmlDocument::parse(&doc.root.to_xml_string()).unwrap();
        assert_eq!(again.root, doc.root);
    }

    #[test]
    fn test_carriage_return_reference_survives() {
        let doc = XmlDocument::parse("<a>x&#xD;y</a>").unwrap();
        assert_eq!(doc.root.text(), "x\ry");

        let literal = XmlDocument::parse("<a>x\r\ny\rz</a>").unwrap();
        assert_eq!(literal.root.text(), "x\ny\nz");

        let mut root = Element::new("DirRecep");
        root.push_text("Av. Siempre Viva 742\r\nDepto 5");
        let again = XmlDocument::parse(&root.to_xml_string()).unwrap();
        assert_eq!(again.root, root);
    }

    #[test]
    fn test_latin1_roundtrip() {
        let mut root = Element::new("RznSoc");
        root.push_text("Compañía Ñandú");
        let doc = XmlDocument::new(root);
        let bytes = doc.to_bytes();
        assert!(bytes.starts_with(b"<?xml version=\"1.0\" encoding=\"ISO-8859-1\"?>"));
        assert!(bytes.contains(&0xF1));

        let parsed = XmlDocument::from_bytes(&bytes).unwrap();
        assert_eq!(parsed.encoding, Some(Encoding::Iso88591));
        assert_eq!(parsed.root.text(), "Compañía Ñandú");
    }

    #[test]
    fn test_find_by_id_and_paths() {
        let doc =
            XmlDocument::parse(r#"<r><x/><DTE><Documento ID="F1T33"><F>1</F></Documento></DTE></r>"#)
                .unwrap();
        let documento = doc.root.find_by_id("F1T33").unwrap();
        assert_eq!(documento.child_text("F").as_deref(), Some("1"));

        let path = doc.root.path_where(|e| e.local_name() == "F").unwrap();
        assert_eq!(path, vec![1, 0, 0]);
        assert!(doc.root.find_by_id("missing").is_none());
    }

    #[test]
    fn test_remove_at() {
        let mut doc = XmlDocument::parse("<a><b/><c/></a>").unwrap();
        let removed = doc.root.remove_at(&[1]).unwrap();
        assert_eq!(removed.name, "c");
        assert_eq!(doc.root.to_xml_string(), "<a><b></b></a>");
        assert!(doc.root.remove_at(&[]).is_none());
    }

    #[test]
    fn test_rejects_malformed() {
        assert!(XmlDocument::parse("<a><b></a>").is_err());
        assert!(XmlDocument::parse("<a>").is_err());
        assert!(XmlDocument::parse("").is_err());
        assert!(XmlDocument::parse("<a/><b/>").is_err());
        assert!(XmlDocument::parse(r#"<a x="1" x="2"/>"#).is_err());
    }

    #[test]
    fn test_prefixed_names() {
        let doc = XmlDocument::parse(r#"<SII:RESPUESTA xmlns:SII="urn:x"><SII:ESTADO>EPR</SII:ESTADO></SII:RESPUESTA>"#)
            .unwrap();
        assert_eq!(doc.root.prefix(), Some("SII"));
        assert_eq!(doc.root.local_name(), "RESPUESTA");
        assert_eq!(doc.root.child_text("ESTADO").as_deref(), Some("EPR"));
    }
}
