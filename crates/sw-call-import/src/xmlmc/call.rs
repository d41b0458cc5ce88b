//! XMLMC method call builder.

use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;

use crate::error::{ImportError, Result};

/// One parameter: a named value or a named group of parameters.
#[derive(Debug, Clone, PartialEq)]
pub enum Param {
    Value { name: String, value: String },
    Element { name: String, children: Params },
}

/// Ordered parameter list.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Params(Vec<Param>);

impl Params {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a named value.
    pub fn param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.push(name, value);
        self
    }

    /// Append a named value when `value` is not empty.
    pub fn param_if(self, name: impl Into<String>, value: impl Into<String>) -> Self {
        let value = value.into();
        if value.is_empty() {
            self
        } else {
            self.param(name, value)
        }
    }

    /// Append every (name, value) pair in order.
    pub fn params<I, K, V>(mut self, pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        for (name, value) in pairs {
            self.push(name, value);
        }
        self
    }

    /// Append a nested element built by `build`.
    pub fn element(mut self, name: impl Into<String>, build: impl FnOnce(Params) -> Params) -> Self {
        self.0.push(Param::Element {
            name: name.into(),
            children: build(Params::new()),
        });
        self
    }

    pub fn push(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.0.push(Param::Value {
            name: name.into(),
            value: value.into(),
        });
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Param> {
        self.0.iter()
    }

    /// Look up a value by slash separated path, e.g. `record/h_summary`.
    /// Returns the first match.
    pub fn get(&self, path: &str) -> Option<&str> {
        let (head, rest) = match path.split_once('/') {
            Some((head, rest)) => (head, Some(rest)),
            None => (path, None),
        };
        self.0.iter().find_map(|p| match (p, rest) {
            (Param::Value { name, value }, None) if name == head => Some(value.as_str()),
            (Param::Element { name, children }, Some(rest)) if name == head => children.get(rest),
            _ => None,
        })
    }

    fn write(&self, writer: &mut Writer<Vec<u8>>) -> Result<()> {
        for param in &self.0 {
            match param {
                Param::Value { name, value } => {
                    write_event(writer, Event::Start(BytesStart::new(name.as_str())))?;
                    write_event(writer, Event::Text(BytesText::new(value)))?;
                    write_event(writer, Event::End(BytesEnd::new(name.as_str())))?;
                }
                Param::Element { name, children } => {
                    write_event(writer, Event::Start(BytesStart::new(name.as_str())))?;
                    children.write(writer)?;
                    write_event(writer, Event::End(BytesEnd::new(name.as_str())))?;
                }
            }
        }
        Ok(())
    }
}

/// A single `service::method` invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct MethodCall {
    service: String,
    method: String,
    params: Params,
}

impl MethodCall {
    pub fn new(service: impl Into<String>, method: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            method: method.into(),
            params: Params::new(),
        }
    }

    pub fn param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.push(name, value);
        self
    }

    pub fn param_if(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.params = self.params.param_if(name, value);
        self
    }

    pub fn element(mut self, name: impl Into<String>, build: impl FnOnce(Params) -> Params) -> Self {
        self.params = self.params.element(name, build);
        self
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn params(&self) -> &Params {
        &self.params
    }

    /// `service::method`, for logs.
    pub fn name(&self) -> String {
        format!("{}::{}", self.service, self.method)
    }

    /// Value at a slash separated parameter path.
    pub fn get(&self, path: &str) -> Option<&str> {
        self.params.get(path)
    }

    /// Serialize to the `<methodCall>` request body.
    pub fn to_xml(&self) -> Result<String> {
        let mut writer = Writer::new(Vec::new());
        let mut root = BytesStart::new("methodCall");
        root.push_attribute(("service", self.service.as_str()));
        root.push_attribute(("method", self.method.as_str()));
        write_event(&mut writer, Event::Start(root))?;
        if !self.params.is_empty() {
            write_event(&mut writer, Event::Start(BytesStart::new("params")))?;
            self.params.write(&mut writer)?;
            write_event(&mut writer, Event::End(BytesEnd::new("params")))?;
        }
        write_event(&mut writer, Event::End(BytesEnd::new("methodCall")))?;
        String::from_utf8(writer.into_inner()).map_err(|e| ImportError::Xml(e.to_string()))
    }
}

fn write_event(writer: &mut Writer<Vec<u8>>, event: Event<'_>) -> Result<()> {
    writer
        .write_event(event)
        .map_err(|e| ImportError::Xml(e.to_string()))
}
