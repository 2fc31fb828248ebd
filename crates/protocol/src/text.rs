//! Strict text codec for pathnames and user names.
//!
//! Pathname bytes on the wire are produced by the negotiated character
//! encoding (UTF-8 unless the session negotiated otherwise). Conversion is
//! strict in both directions: an unmappable character is an error, never a
//! replacement, because the peer reconstructs paths byte for byte.

use std::borrow::Cow;

use thiserror::Error;

/// Errors produced by strict text conversion.
#[derive(Clone, Debug, Eq, PartialEq, Error)]
pub enum TextError {
    /// No encoding matches the requested label.
    #[error("unsupported character encoding label: {0:?}")]
    UnsupportedEncoding(String),
    /// The text contains characters the encoding cannot represent.
    #[error("cannot encode {text:?} as {encoding}")]
    Unencodable {
        /// The offending text.
        text: String,
        /// Name of the target encoding.
        encoding: &'static str,
    },
    /// The bytes are not valid in the encoding.
    #[error("cannot decode {len} bytes as {encoding}")]
    Undecodable {
        /// Length of the offending byte sequence.
        len: usize,
        /// Name of the source encoding.
        encoding: &'static str,
    },
}

/// A strict bidirectional converter for one character encoding.
#[derive(Clone, Copy, Debug)]
pub struct TextCodec {
    encoding: &'static encoding_rs::Encoding,
}

impl TextCodec {
    /// Returns the default UTF-8 codec.
    #[must_use]
    pub fn utf8() -> Self {
        Self { encoding: encoding_rs::UTF_8 }
    }

    /// Resolves an encoding label ("utf-8", "iso-8859-1", ...).
    ///
    /// # Errors
    ///
    /// Returns [`TextError::UnsupportedEncoding`] for unknown labels.
    pub fn for_label(label: &str) -> Result<Self, TextError> {
        encoding_rs::Encoding::for_label(label.as_bytes())
            .map(|encoding| Self { encoding })
            .ok_or_else(|| TextError::UnsupportedEncoding(label.to_owned()))
    }

    /// Returns the canonical name of the encoding.
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.encoding.name()
    }

    /// Encodes `text` into the codec's byte representation.
    ///
    /// # Errors
    ///
    /// Returns [`TextError::Unencodable`] when a character has no
    /// representation in the encoding.
    pub fn encode(&self, text: &str) -> Result<Vec<u8>, TextError> {
        if self.encoding == encoding_rs::UTF_8 {
            return Ok(text.as_bytes().to_vec());
        }
        let (bytes, _, had_errors) = self.encoding.encode(text);
        if had_errors {
            return Err(TextError::Unencodable {
                text: text.to_owned(),
                encoding: self.encoding.name(),
            });
        }
        Ok(bytes.into_owned())
    }

    /// Decodes `bytes` from the codec's representation.
    ///
    /// # Errors
    ///
    /// Returns [`TextError::Undecodable`] when the bytes are not valid in the
    /// encoding.
    pub fn decode(&self, bytes: &[u8]) -> Result<String, TextError> {
        self.encoding
            .decode_without_bom_handling_and_without_replacement(bytes)
            .map(Cow::into_owned)
            .ok_or(TextError::Undecodable {
                len: bytes.len(),
                encoding: self.encoding.name(),
            })
    }
}

impl Default for TextCodec {
    fn default() -> Self {
        Self::utf8()
    }
}
