//! Abstract view of one interceptable browser request.

use crate::error::Result;
use async_trait::async_trait;

/// Declared resource type of a request, as reported by the browser driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Document,
    Xhr,
    Fetch,
    Stylesheet,
    Script,
    Image,
    Font,
    Websocket,
    Media,
    Other,
}

impl ResourceKind {
    /// Map a driver-reported resource-type name. Unknown names fold into
    /// [`ResourceKind::Other`], which always passes through.
    pub fn from_name(name: &str) -> Self {
        match name {
            "document" => Self::Document,
            "xhr" => Self::Xhr,
            "fetch" => Self::Fetch,
            "stylesheet" => Self::Stylesheet,
            "script" => Self::Script,
            "image" => Self::Image,
            "font" => Self::Font,
            "websocket" => Self::Websocket,
            "media" => Self::Media,
            _ => Self::Other,
        }
    }

    pub fn is_api(self) -> bool {
        matches!(self, Self::Xhr | Self::Fetch)
    }

    pub fn is_static(self) -> bool {
        matches!(self, Self::Stylesheet | Self::Script | Self::Image | Self::Font)
    }
}

/// One intercepted request, with the three ways it can be resolved.
///
/// Implemented by the browser-automation driver; exactly one of
/// `fulfill`, `abort` or `pass_through` is called per route.
#[async_trait]
pub trait Route: Send {
    fn url(&self) -> &str;
    fn resource_kind(&self) -> ResourceKind;

    /// Answer the request with a synthetic response.
    async fn fulfill(&mut self, status: u16, content_type: &str, body: String) -> Result<()>;

    /// Fail the request as blocked by the client.
    async fn abort(&mut self) -> Result<()>;

    /// Let the request go to the live network.
    async fn pass_through(&mut self) -> Result<()>;
}
