//! Small quick-xml helpers shared by the snapshot and extras codecs.

use quick_xml::events::BytesStart;

use crate::error::CodecError;

/// Unescaped value of attribute `name`, if present.
pub(crate) fn attribute(e: &BytesStart<'_>, name: &str) -> Result<Option<String>, CodecError> {
    match e.try_get_attribute(name).map_err(CodecError::xml)? {
        Some(attr) => {
            let value = attr.unescape_value().map_err(CodecError::xml)?;
            Ok(Some(value.into_owned()))
        }
        None => Ok(None),
    }
}

/// Element name as text, for diagnostics.
pub(crate) fn element_name(e: &BytesStart<'_>) -> String {
    String::from_utf8_lossy(e.name().as_ref()).into_owned()
}
