//! XMLMC response parsing.

use quick_xml::events::Event;
use quick_xml::Reader;

use crate::error::{ImportError, Result};

/// Minimal element tree.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct XmlNode {
    pub name: String,
    pub attributes: Vec<(String, String)>,
    pub text: String,
    pub children: Vec<XmlNode>,
}

impl XmlNode {
    fn new(name: String) -> Self {
        Self {
            name,
            ..Self::default()
        }
    }

    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// First descendant at a slash separated path.
    pub fn find(&self, path: &str) -> Option<&XmlNode> {
        let mut node = self;
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            node = node.children.iter().find(|c| c.name == segment)?;
        }
        Some(node)
    }

    /// All descendants at a path; the last segment may repeat.
    pub fn find_all(&self, path: &str) -> Vec<&XmlNode> {
        let (parent, last) = match path.rsplit_once('/') {
            Some((parent, last)) => (self.find(parent), last),
            None => (Some(self), path),
        };
        parent
            .map(|p| p.children.iter().filter(|c| c.name == last).collect())
            .unwrap_or_default()
    }

    /// Text at a path, `None` when absent or blank.
    pub fn text_at(&self, path: &str) -> Option<&str> {
        self.find(path)
            .map(|n| n.text.trim())
            .filter(|t| !t.is_empty())
    }

    /// Parse an XML document into a tree rooted at its document element.
    pub fn parse(xml: &str) -> Result<XmlNode> {
        let mut reader = Reader::from_str(xml);
        let mut stack: Vec<XmlNode> = Vec::new();
        let mut root: Option<XmlNode> = None;

        loop {
            match reader.read_event() {
                Ok(Event::Start(e)) => {
                    let mut node = XmlNode::new(String::from_utf8_lossy(e.name().as_ref()).into_owned());
                    node.attributes = read_attributes(&e)?;
                    stack.push(node);
                }
                Ok(Event::Empty(e)) => {
                    let mut node = XmlNode::new(String::from_utf8_lossy(e.name().as_ref()).into_owned());
                    node.attributes = read_attributes(&e)?;
                    attach(&mut stack, &mut root, node);
                }
                Ok(Event::Text(e)) => {
                    if let Some(top) = stack.last_mut() {
                        let text = e.unescape().map_err(|e| ImportError::Xml(e.to_string()))?;
                        top.text.push_str(&text);
                    }
                }
                Ok(Event::CData(e)) => {
                    if let Some(top) = stack.last_mut() {
                        top.text.push_str(&String::from_utf8_lossy(&e.into_inner()));
                    }
                }
                Ok(Event::End(_)) => {
                    if let Some(node) = stack.pop() {
                        attach(&mut stack, &mut root, node);
                    }
                }
                Ok(Event::Eof) => break,
                Ok(_) => {}
                Err(e) => {
                    return Err(ImportError::Xml(format!(
                        "at position {}: {}",
                        reader.buffer_position(),
                        e
                    )))
                }
            }
        }

        root.ok_or_else(|| ImportError::Xml("empty document".into()))
    }
}

fn read_attributes(e: &quick_xml::events::BytesStart<'_>) -> Result<Vec<(String, String)>> {
    let mut out = Vec::new();
    for attr in e.attributes() {
        let attr = attr.map_err(|e| ImportError::Xml(e.to_string()))?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = attr
            .unescape_value()
            .map_err(|e| ImportError::Xml(e.to_string()))?
            .into_owned();
        out.push((key, value));
    }
    Ok(out)
}

fn attach(stack: &mut [XmlNode], root: &mut Option<XmlNode>, node: XmlNode) {
    match stack.last_mut() {
        Some(parent) => parent.children.push(node),
        None => {
            if root.is_none() {
                *root = Some(node);
            }
        }
    }
}

/// Parsed `<methodCallResult>`.
#[derive(Debug, Clone, PartialEq)]
pub struct MethodResponse {
    root: XmlNode,
}

impl MethodResponse {
    pub fn parse(xml: &str) -> Result<Self> {
        let root = XmlNode::parse(xml)?;
        if root.name != "methodCallResult" {
            return Err(ImportError::Xml(format!(
                "expected methodCallResult, got <{}>",
                root.name
            )));
        }
        Ok(Self { root })
    }

    /// Status attribute is `ok`.
    pub fn is_ok(&self) -> bool {
        self.root.attribute("status") == Some("ok")
    }

    /// `state/error` text, when the call failed.
    pub fn error(&self) -> Option<&str> {
        self.root.text_at("state/error")
    }

    /// Output parameter at a path below `params`.
    pub fn get(&self, path: &str) -> Option<&str> {
        self.root.find("params").and_then(|p| p.text_at(path))
    }

    /// Repeated output elements below `params`, e.g. `rowData/row`.
    pub fn all(&self, path: &str) -> Vec<&XmlNode> {
        self.root
            .find("params")
            .map(|p| p.find_all(path))
            .unwrap_or_default()
    }

    /// First `rowData/row` of a browse/query result.
    pub fn first_row(&self) -> Option<&XmlNode> {
        self.all("rowData/row").into_iter().next()
    }

    /// Turn a non-OK status into an `Api` error.
    pub fn check(self, service: &str, method: &str) -> Result<Self> {
        if self.is_ok() {
            Ok(self)
        } else {
            let message = self
                .error()
                .map(str::to_string)
                .unwrap_or_else(|| "unknown error".to_string());
            Err(ImportError::api(service, method, message))
        }
    }

    #[cfg(test)]
    pub(crate) fn root(&self) -> &XmlNode {
        &self.root
    }
}
