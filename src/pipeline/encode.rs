//! Attachment encoding: raw image bytes → base64 data URL.
//!
//! Chat-completion APIs accept images inline as `data:` URLs inside the JSON
//! request body. The bytes are encoded as-is: no re-encoding, resizing or
//! format conversion, so the service sees exactly what was on disk.

use crate::pipeline::conversation::ImageAttachment;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use tracing::debug;

/// Image detail level requested from vision models.
///
/// `high` lets the model tile the image at full resolution; fine print such
/// as phone numbers and postcodes is lost at `low`.
pub const IMAGE_DETAIL: &str = "high";

/// Encode an attachment as a `data:<media type>;base64,<payload>` URL.
pub fn to_data_url(image: &ImageAttachment) -> String {
    let b64 = STANDARD.encode(&image.data);
    debug!("Encoded attachment → {} bytes base64", b64.len());
    format!("data:{};base64,{}", image.media_type, b64)
}
