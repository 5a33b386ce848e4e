/// `<>` marker then the channel bytes, nothing else
pub fn build_raw_frame(payload: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(2 + payload.len());
    frame.extend_from_slice(b"<>");
    frame.extend_from_slice(payload);
    frame
}
