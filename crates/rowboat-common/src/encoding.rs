use encoding_rs::Encoding;

use crate::error::{CommonError, CommonResult};

/// The character encoding used to decode bytes read from the interpreter
/// process.
///
/// Malformed sequences decode to the Unicode replacement character rather
/// than failing the stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputEncoding {
    inner: &'static Encoding,
}

impl OutputEncoding {
    /// Resolve an encoding from a WHATWG label such as `utf-8` or
    /// `windows-1252`.
    pub fn for_label(label: &str) -> CommonResult<Self> {
        Encoding::for_label(label.trim().as_bytes())
            .map(|inner| Self { inner })
            .ok_or_else(|| CommonError::invalid(format!("unknown output encoding: {label}")))
    }

    pub fn utf8() -> Self {
        Self {
            inner: encoding_rs::UTF_8,
        }
    }

    pub fn name(&self) -> &'static str {
        self.inner.name()
    }

    pub fn decode(&self, bytes: &[u8]) -> String {
        let (text, _, _) = self.inner.decode(bytes);
        text.into_owned()
    }
}

impl Default for OutputEncoding {
    fn default() -> Self {
        Self::utf8()
    }
}
