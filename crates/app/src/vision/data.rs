use ml_core::Detection;

/// One annotated, encoded frame ready to be written to a client.
#[derive(Clone, Debug)]
pub(crate) struct FramePacket {
    pub(crate) jpeg: Vec<u8>,
    pub(crate) detections: Vec<Detection>,
    pub(crate) timestamp_ms: i64,
    pub(crate) frame_number: u64,
}
