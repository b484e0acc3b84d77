//! Opaque key/value payload attached to a job, and its codec.

use std::collections::BTreeMap;

use quick_xml::escape::unescape;
use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::reader::Reader;
use quick_xml::writer::Writer;
use serde::{Deserialize, Serialize};

use crate::codec::xml::attribute;
use crate::error::CodecError;

/// A single extras value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum ExtraValue {
    String(String),
    Int(i32),
    Long(i64),
    Double(f64),
    Bool(bool),
}

impl From<&str> for ExtraValue {
    fn from(value: &str) -> Self {
        ExtraValue::String(value.to_string())
    }
}

impl From<String> for ExtraValue {
    fn from(value: String) -> Self {
        ExtraValue::String(value)
    }
}

impl From<i32> for ExtraValue {
    fn from(value: i32) -> Self {
        ExtraValue::Int(value)
    }
}

impl From<i64> for ExtraValue {
    fn from(value: i64) -> Self {
        ExtraValue::Long(value)
    }
}

impl From<f64> for ExtraValue {
    fn from(value: f64) -> Self {
        ExtraValue::Double(value)
    }
}

impl From<bool> for ExtraValue {
    fn from(value: bool) -> Self {
        ExtraValue::Bool(value)
    }
}

/// Key/value payload carried by a job. Keys are kept sorted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Extras(BTreeMap<String, ExtraValue>);

impl Extras {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<ExtraValue>) -> Option<ExtraValue> {
        self.0.insert(key.into(), value.into())
    }

    /// Builder-style [`insert`](Self::insert).
    pub fn with(mut self, key: impl Into<String>, value: impl Into<ExtraValue>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&ExtraValue> {
        self.0.get(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &ExtraValue)> {
        self.0.iter()
    }
}

/// Serializes extras into the bytes embedded in a snapshot's `<extras>` element.
pub trait ExtrasCodec: Send + Sync {
    fn serialize(&self, extras: &Extras) -> Result<Vec<u8>, CodecError>;

    fn deserialize(&self, bytes: &[u8]) -> Result<Extras, CodecError>;
}

/// XML extras codec: one typed element per key.
///
/// ```text
/// <string name="account">a@example.com</string>
/// <int name="retries" value="3" />
/// <long name="size" value="1048576" />
/// <double name="ratio" value="0.5" />
/// <boolean name="wifi" value="true" />
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct XmlExtrasCodec;

impl ExtrasCodec for XmlExtrasCodec {
    fn serialize(&self, extras: &Extras) -> Result<Vec<u8>, CodecError> {
        let mut writer = Writer::new(Vec::new());

        for (key, value) in extras.iter() {
            let scalar = match value {
                ExtraValue::String(text) => {
                    let mut start = BytesStart::new("string");
                    start.push_attribute(("name", key.as_str()));
                    writer.write_event(Event::Start(start)).map_err(CodecError::xml)?;
                    writer
                        .write_event(Event::Text(BytesText::new(text)))
                        .map_err(CodecError::xml)?;
                    writer
                        .write_event(Event::End(BytesEnd::new("string")))
                        .map_err(CodecError::xml)?;
                    continue;
                }
                ExtraValue::Int(v) => ("int", v.to_string()),
                ExtraValue::Long(v) => ("long", v.to_string()),
                ExtraValue::Double(v) => ("double", v.to_string()),
                ExtraValue::Bool(v) => ("boolean", v.to_string()),
            };

            let mut element = BytesStart::new(scalar.0);
            element.push_attribute(("name", key.as_str()));
            element.push_attribute(("value", scalar.1.as_str()));
            writer.write_event(Event::Empty(element)).map_err(CodecError::xml)?;
        }

        Ok(writer.into_inner())
    }

    fn deserialize(&self, bytes: &[u8]) -> Result<Extras, CodecError> {
        let text = std::str::from_utf8(bytes).map_err(|e| CodecError::Utf8(e.to_string()))?;
        let mut reader = Reader::from_str(text);
        reader.config_mut().trim_text(true);

        let mut extras = Extras::new();
        loop {
            match reader.read_event().map_err(CodecError::xml)? {
                Event::Start(e) if e.name().as_ref() == b"string" => {
                    let key = required(&e, "name")?;
                    let raw = reader.read_text(e.name()).map_err(CodecError::xml)?;
                    let value = unescape(&raw).map_err(CodecError::xml)?;
                    extras.insert(key, ExtraValue::String(value.into_owned()));
                }
                Event::Start(e) => {
                    return Err(CodecError::Extras(format!(
                        "unexpected element <{}>",
                        String::from_utf8_lossy(e.name().as_ref())
                    )));
                }
                Event::Empty(e) => {
                    let key = required(&e, "name")?;
                    let value = match e.name().as_ref() {
                        b"string" => ExtraValue::String(String::new()),
                        b"int" => ExtraValue::Int(parse(&e, &key)?),
                        b"long" => ExtraValue::Long(parse(&e, &key)?),
                        b"double" => ExtraValue::Double(parse(&e, &key)?),
                        b"boolean" => ExtraValue::Bool(parse(&e, &key)?),
                        other => {
                            return Err(CodecError::Extras(format!(
                                "unexpected element <{}>",
                                String::from_utf8_lossy(other)
                            )));
                        }
                    };
                    extras.insert(key, value);
                }
                Event::Eof => break,
                _ => {}
            }
        }

        Ok(extras)
    }
}

fn required(e: &BytesStart<'_>, name: &str) -> Result<String, CodecError> {
    attribute(e, name)?
        .ok_or_else(|| CodecError::Extras(format!("missing '{}' attribute", name)))
}

fn parse<T: std::str::FromStr>(e: &BytesStart<'_>, key: &str) -> Result<T, CodecError> {
    let raw = required(e, "value")?;
    raw.parse()
        .map_err(|_| CodecError::Extras(format!("invalid value {:?} for '{}'", raw, key)))
}
