//! Screen-frame blob encoding.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;

const JPEG_DATA_URL_PREFIX: &str = "data:image/jpeg;base64,";

/// Wraps raw JPEG bytes into the `data:` URL carried by `screenshot-data`.
pub fn jpeg_data_url(jpeg: &[u8]) -> String {
    let mut url = String::with_capacity(JPEG_DATA_URL_PREFIX.len() + jpeg.len() * 4 / 3 + 4);
    url.push_str(JPEG_DATA_URL_PREFIX);
    STANDARD.encode_string(jpeg, &mut url);
    url
}
