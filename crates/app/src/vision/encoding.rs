//! JPEG encoding and multipart framing for the MJPEG stream.

use actix_web::web::Bytes;
use image::{ExtendedColorType, RgbImage, codecs::jpeg::JpegEncoder};
use thiserror::Error;

/// Content type of the `/video_feed` response.
pub(crate) const MULTIPART_CONTENT_TYPE: &str = "multipart/x-mixed-replace; boundary=frame";

const PART_HEADER: &[u8] = b"--frame\r\nContent-Type: image/jpeg\r\n\r\n";
const PART_TRAILER: &[u8] = b"\r\n";

#[derive(Debug, Error)]
#[error("failed to encode frame as JPEG")]
pub(crate) struct EncodeError(#[from] image::ImageError);

/// Encode an annotated frame as baseline JPEG at `quality` (1-100).
pub(crate) fn encode_jpeg(image: &RgbImage, quality: u8) -> Result<Vec<u8>, EncodeError> {
    let mut jpeg = Vec::with_capacity(image.as_raw().len() / 8);
    JpegEncoder::new_with_quality(&mut jpeg, quality).encode(
        image.as_raw(),
        image.width(),
        image.height(),
        ExtendedColorType::Rgb8,
    )?;
    Ok(jpeg)
}

/// Wrap one JPEG as a `frame`-delimited multipart part.
pub(crate) fn multipart_chunk(jpeg: &[u8]) -> Bytes {
    let mut payload = Vec::with_capacity(PART_HEADER.len() + jpeg.len() + PART_TRAILER.len());
    payload.extend_from_slice(PART_HEADER);
    payload.extend_from_slice(jpeg);
    payload.extend_from_slice(PART_TRAILER);
    Bytes::from(payload)
}
