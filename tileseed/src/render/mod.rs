//! Rendering and encoding collaborators.
//!
//! The render loop hands a [`RenderRequest`] to a [`Renderer`], which returns
//! premultiplied RGBA pixels including the requested edge buffer. A
//! [`TileEncoder`] then removes the buffer and produces the stored format.

mod png;
mod process;

pub use png::PngTileEncoder;
pub use process::ProcessRenderer;

use crate::cache::{CacheError, ResourceType, TileStore};
use serde::Serialize;
use serde_json::Value;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Boxed future returned by object-safe async traits.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Parameters of one render call.
///
/// `width` and `height` are logical pixels including the edge buffer; the
/// returned image is `width * ratio` by `height * ratio` physical pixels.
#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderRequest<'a> {
    pub style: &'a Value,
    pub zoom: f64,
    /// `[lon, lat]` of the viewport center
    pub center: (f64, f64),
    pub width: u32,
    pub height: u32,
    pub ratio: u32,
}

impl RenderRequest<'_> {
    /// Byte length of the expected RGBA buffer.
    pub fn expected_len(&self) -> usize {
        (self.width * self.ratio) as usize * (self.height * self.ratio) as usize * 4
    }
}

/// Raw premultiplied RGBA pixels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawImage {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

/// Render failures.
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("Failed to start renderer: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("Renderer I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Renderer exited with {status}: {stderr}")]
    Failed { status: String, stderr: String },

    #[error("Renderer returned {actual} bytes, expected {expected}")]
    UnexpectedSize { expected: usize, actual: usize },

    #[error("Renderer protocol error: {0}")]
    Protocol(String),

    #[error("Failed to serialize render request: {0}")]
    Request(#[from] serde_json::Error),

    #[error("Render failed: {0}")]
    Other(String),
}

/// Encoding failures.
#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("Image buffer of {len} bytes does not match {width}x{height} RGBA")]
    InvalidBuffer { width: u32, height: u32, len: usize },

    #[error("Edge buffer {buffer_x}x{buffer_y} does not fit a {width}x{height} image")]
    InvalidCrop {
        width: u32,
        height: u32,
        buffer_x: u32,
        buffer_y: u32,
    },

    #[error("PNG encoding failed: {0}")]
    Png(#[from] image::ImageError),
}

/// Resources a renderer may need while drawing a style.
pub trait ResourceSource: Send + Sync {
    /// Read a resource; `Ok(None)` for tiles that are absent.
    fn read<'a>(
        &'a self,
        resource: ResourceType,
        path: &'a str,
    ) -> BoxFuture<'a, Result<Option<Vec<u8>>, CacheError>>;
}

impl ResourceSource for TileStore {
    fn read<'a>(
        &'a self,
        resource: ResourceType,
        path: &'a str,
    ) -> BoxFuture<'a, Result<Option<Vec<u8>>, CacheError>> {
        Box::pin(TileStore::read(self, resource, path))
    }
}

/// Draws a style into raw pixels.
pub trait Renderer: Send + Sync {
    fn render<'a>(
        &'a self,
        request: RenderRequest<'a>,
        resources: &'a dyn ResourceSource,
    ) -> BoxFuture<'a, Result<RawImage, RenderError>>;
}

/// Edge buffer and scale of a rendered image, in logical pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncodeParams {
    pub buffer_x: u32,
    pub buffer_y: u32,
    pub ratio: u32,
}

/// Turns a rendered image into stored tile bytes.
pub trait TileEncoder: Send + Sync {
    fn encode(&self, image: RawImage, params: &EncodeParams) -> Result<Vec<u8>, EncodeError>;
}
