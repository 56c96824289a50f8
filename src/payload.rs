//! Upload payloads
//!
//! A [`Payload`] is a named unit of data in one of three shapes:
//!
//! - **Bytes**: resident in memory, length known
//! - **Reader**: a handle to a backing medium (a file, a socket) read
//!   incrementally, usually with a size hint
//! - **Stream**: an incremental source of unknown length
//!
//! The caller owns the payload; an upload consumes it and keeps nothing
//! afterwards.

use bytes::Bytes;
use futures::stream::{BoxStream, StreamExt};
use std::fmt;
use std::io;
use tokio::io::AsyncRead;

/// Content type used when neither the caller nor the name says otherwise
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// The data of a [`Payload`]
pub enum PayloadContent {
    /// Resident bytes
    Bytes(Bytes),

    /// Incremental reader over a backing medium
    Reader(Box<dyn AsyncRead + Send + Unpin>),

    /// Incremental source of unknown length
    Stream(BoxStream<'static, io::Result<Bytes>>),
}

impl PayloadContent {
    /// Length, when it can be known without reading
    pub fn resident_len(&self) -> Option<u64> {
        match self {
            PayloadContent::Bytes(b) => Some(b.len() as u64),
            PayloadContent::Reader(_) | PayloadContent::Stream(_) => None,
        }
    }

    pub fn is_resident(&self) -> bool {
        matches!(self, PayloadContent::Bytes(_))
    }
}

impl fmt::Debug for PayloadContent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PayloadContent::Bytes(b) => write!(f, "Bytes({} bytes)", b.len()),
            PayloadContent::Reader(_) => f.write_str("Reader"),
            PayloadContent::Stream(_) => f.write_str("Stream"),
        }
    }
}

/// A named unit of data to upload
#[derive(Debug)]
pub struct Payload {
    /// Name, used for content-type lookup and prefix uploads
    pub name: String,

    /// The data
    pub content: PayloadContent,

    /// Explicit content type
    pub content_type: Option<String>,

    /// Declared size, for incremental content
    pub size_hint: Option<u64>,
}

impl Payload {
    /// Resident payload
    pub fn from_bytes(name: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self {
            name: name.into(),
            content: PayloadContent::Bytes(data.into()),
            content_type: None,
            size_hint: None,
        }
    }

    /// Payload read incrementally from `reader`
    pub fn from_reader<R>(name: impl Into<String>, reader: R, size_hint: Option<u64>) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        Self {
            name: name.into(),
            content: PayloadContent::Reader(Box::new(reader)),
            content_type: None,
            size_hint,
        }
    }

    /// Payload pulled from a stream of unknown length
    pub fn from_stream<S>(name: impl Into<String>, stream: S) -> Self
    where
        S: futures::Stream<Item = io::Result<Bytes>> + Send + 'static,
    {
        Self {
            name: name.into(),
            content: PayloadContent::Stream(stream.boxed()),
            content_type: None,
            size_hint: None,
        }
    }

    /// Set an explicit content type
    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    /// Declare the size of incremental content
    pub fn with_size_hint(mut self, size: u64) -> Self {
        self.size_hint = Some(size);
        self
    }

    /// Byte length from the data itself or the hint
    pub fn known_size(&self) -> Option<u64> {
        self.content.resident_len().or(self.size_hint)
    }

    /// Explicit content type, else a lookup by name, else octet-stream
    pub fn resolve_content_type(&self) -> String {
        self.content_type
            .clone()
            .or_else(|| content_type_for(&self.name))
            .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string())
    }
}

/// Content type guessed from a file or key name
pub fn content_type_for(name: &str) -> Option<String> {
    mime_guess::from_path(name)
        .first()
        .map(|mime| mime.essence_str().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;

    #[test]
    fn test_known_size() {
        assert_eq!(Payload::from_bytes("a", "hello").known_size(), Some(5));

        let reader = Payload::from_reader("r", tokio::io::empty(), Some(42));
        assert_eq!(reader.known_size(), Some(42));

        let stream = Payload::from_stream("s", stream::empty());
        assert_eq!(stream.known_size(), None);
    }

    #[test]
    fn test_content_type_resolution() {
        assert_eq!(
            Payload::from_bytes("report.json", "{}").resolve_content_type(),
            "application/json"
        );
        assert_eq!(
            Payload::from_bytes("photo.png", "").resolve_content_type(),
            "image/png"
        );
        assert_eq!(
            Payload::from_bytes("blob", "").resolve_content_type(),
            DEFAULT_CONTENT_TYPE
        );
        assert_eq!(
            Payload::from_bytes("photo.png", "")
                .with_content_type("image/x-custom")
                .resolve_content_type(),
            "image/x-custom"
        );
    }

    #[test]
    fn test_debug_hides_contents() {
        let payload = Payload::from_bytes("a", "secret");
        let rendered = format!("{:?}", payload);
        assert!(rendered.contains("Bytes(6 bytes)"));
        assert!(!rendered.contains("secret"));
    }
}
