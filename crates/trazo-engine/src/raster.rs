use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use resvg::{tiny_skia, usvg};

use crate::error::RasterError;

/// Edge length used when the markup declares neither a viewBox nor
/// width/height attributes.
pub const DEFAULT_EDGE: u32 = 1024;

/// Renders vector markup into a PNG data URI. Entirely local; sizing
/// follows the declared viewBox or width/height, falling back to
/// [`DEFAULT_EDGE`] squared.
pub fn rasterize(vector_markup: &str) -> Result<String, RasterError> {
    let png = rasterize_png(vector_markup)?;
    Ok(format!("data:image/png;base64,{}", BASE64.encode(png)))
}

/// Same as [`rasterize`] but returning the raw PNG bytes, for saving to
/// disk without the data-URI wrapper.
pub fn rasterize_png(vector_markup: &str) -> Result<Vec<u8>, RasterError> {
    let tree = parse_tree(vector_markup)?;
    let width = (tree.size().width().ceil() as u32).max(1);
    let height = (tree.size().height().ceil() as u32).max(1);
    let mut pixmap = tiny_skia::Pixmap::new(width, height)
        .ok_or(RasterError::Allocation { width, height })?;
    resvg::render(&tree, tiny_skia::Transform::identity(), &mut pixmap.as_mut());
    pixmap
        .encode_png()
        .map_err(|err| RasterError::Encoding(err.to_string()))
}

pub(crate) fn parse_tree(vector_markup: &str) -> Result<usvg::Tree, RasterError> {
    let mut options = usvg::Options::default();
    if let Some(size) = usvg::Size::from_wh(DEFAULT_EDGE as f32, DEFAULT_EDGE as f32) {
        options.default_size = size;
    }
    usvg::Tree::from_str(vector_markup, &options)
        .map_err(|err| RasterError::InvalidMarkup(err.to_string()))
}

/// Decodes a `data:image/png;base64,` URI back into raw PNG bytes.
pub fn data_uri_bytes(data_uri: &str) -> Option<Vec<u8>> {
    let encoded = data_uri.split_once(";base64,")?.1;
    BASE64.decode(encoded.as_bytes()).ok()
}
