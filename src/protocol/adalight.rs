/// Adalight frame: `Ada`, big-endian LED count, XOR checksum, pixel bytes
pub fn build_adalight_frame(payload: &[u8], led_count: usize) -> Vec<u8> {
    let [count_hi, count_lo] = (led_count as u16).to_be_bytes();
    let checksum = count_hi ^ count_lo ^ 0x55;

    let mut frame = Vec::with_capacity(6 + payload.len());
    frame.extend_from_slice(b"Ada");
    frame.extend_from_slice(&[count_hi, count_lo, checksum]);
    frame.extend_from_slice(payload);
    frame
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_adalight_header() {
        let frame = build_adalight_frame(&[1, 2, 3, 4, 5, 6], 2);
        assert_eq!(&frame[..6], &[b'A', b'd', b'a', 0x00, 0x02, 0x57]);
        assert_eq!(&frame[6..], &[1, 2, 3, 4, 5, 6]);
    }
}
