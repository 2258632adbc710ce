//! Body renderers used by the Context helpers.

use axum::http::{header, HeaderValue, StatusCode};
use serde::Serialize;

use crate::error::BoxError;
use crate::http::response::ResponseWriter;

pub const MIME_JSON: &str = "application/json; charset=utf-8";
pub const MIME_TEXT: &str = "text/plain; charset=utf-8";

/// Serializes a value into a response with the right content type.
pub trait Render {
    /// Content type written even when the status forbids a body.
    fn content_type(&self) -> Option<&'static str>;

    /// Write the body (and any extra headers) into `writer`.
    fn render(&self, writer: &mut ResponseWriter) -> Result<(), BoxError>;
}

pub(crate) fn write_content_type(writer: &mut ResponseWriter, value: &'static str) {
    writer.set_header(header::CONTENT_TYPE, HeaderValue::from_static(value));
}

/// Compact JSON followed by a newline.
pub struct Json<'a, T: ?Sized>(pub &'a T);

impl<T: Serialize + ?Sized> Render for Json<'_, T> {
    fn content_type(&self) -> Option<&'static str> {
        Some(MIME_JSON)
    }

    fn render(&self, writer: &mut ResponseWriter) -> Result<(), BoxError> {
        let mut buf = serde_json::to_vec(self.0)?;
        buf.push(b'\n');
        writer.write(&buf);
        Ok(())
    }
}

/// Indented JSON; four spaces when `indent` is empty.
pub struct IndentJson<'a, T: ?Sized> {
    pub data: &'a T,
    pub indent: &'a str,
}

impl<T: Serialize + ?Sized> Render for IndentJson<'_, T> {
    fn content_type(&self) -> Option<&'static str> {
        Some(MIME_JSON)
    }

    fn render(&self, writer: &mut ResponseWriter) -> Result<(), BoxError> {
        let indent = if self.indent.is_empty() { "    " } else { self.indent };
        let mut buf = Vec::with_capacity(128);
        let formatter = serde_json::ser::PrettyFormatter::with_indent(indent.as_bytes());
        let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
        self.data.serialize(&mut ser)?;
        buf.push(b'\n');
        writer.write(&buf);
        Ok(())
    }
}

/// Plain text.
pub struct Text<'a>(pub &'a str);

impl Render for Text<'_> {
    fn content_type(&self) -> Option<&'static str> {
        Some(MIME_TEXT)
    }

    fn render(&self, writer: &mut ResponseWriter) -> Result<(), BoxError> {
        writer.write(self.0.as_bytes());
        Ok(())
    }
}

/// Raw bytes with a caller-chosen content type.
pub struct Data<'a> {
    pub content_type: &'static str,
    pub bytes: &'a [u8],
}

impl Render for Data<'_> {
    fn content_type(&self) -> Option<&'static str> {
        Some(self.content_type)
    }

    fn render(&self, writer: &mut ResponseWriter) -> Result<(), BoxError> {
        writer.write(self.bytes);
        Ok(())
    }
}

/// Redirect to `location`; the status must be 3xx or 201.
pub struct Redirect<'a> {
    pub status: StatusCode,
    pub location: &'a str,
}

/// Raised for a redirect with an unsuitable status code.
#[derive(Debug, thiserror::Error)]
#[error("cannot redirect with status code {0}")]
pub struct InvalidRedirect(pub StatusCode);

impl Render for Redirect<'_> {
    fn content_type(&self) -> Option<&'static str> {
        None
    }

    fn render(&self, writer: &mut ResponseWriter) -> Result<(), BoxError> {
        if !self.status.is_redirection() && self.status != StatusCode::CREATED {
            return Err(InvalidRedirect(self.status).into());
        }
        let location = HeaderValue::from_str(self.location)?;
        writer.set_status(self.status);
        writer.set_header(header::LOCATION, location);
        Ok(())
    }
}
