/// Awa frame (HyperSerialPico/HyperSerialESP32).
///
/// The header carries `led_count - 1`; three Fletcher-style checksums over
/// the payload follow it.
pub fn build_awa_frame(payload: &[u8], led_count: usize) -> Vec<u8> {
    let [count_hi, count_lo] = (led_count.saturating_sub(1) as u16).to_be_bytes();
    let crc = count_hi ^ count_lo ^ 0x55;

    let mut frame = Vec::with_capacity(9 + payload.len());
    frame.extend_from_slice(b"Awa");
    frame.extend_from_slice(&[count_hi, count_lo, crc]);
    frame.extend_from_slice(payload);
    frame.extend_from_slice(&fletcher(payload));
    frame
}

fn fletcher(payload: &[u8]) -> [u8; 3] {
    let mut sum1: u16 = 0;
    let mut sum2: u16 = 0;
    let mut sum_ext: u16 = 0;

    for (position, &byte) in payload.iter().enumerate() {
        sum1 = (sum1 + byte as u16) % 255;
        sum2 = (sum2 + sum1) % 255;
        sum_ext = (sum_ext + (byte as u16 ^ position as u16)) % 255;
    }

    // 'A' would look like the start of a new header to the receiver
    if sum_ext == 0x41 {
        sum_ext = 0xaa;
    }

    [sum1 as u8, sum2 as u8, sum_ext as u8]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_awa_header_counts_from_zero() {
        let frame = build_awa_frame(&[0; 30], 10);
        assert_eq!(&frame[..6], &[b'A', b'w', b'a', 0x00, 0x09, 0x5c]);
        assert_eq!(frame.len(), 6 + 30 + 3);
    }

    #[test]
    fn test_awa_checksums() {
        let frame = build_awa_frame(&[255, 0, 0], 1);
        let tail = &frame[frame.len() - 3..];
        // sum1: 255 % 255 = 0, sum2 stays 0, ext: 255 + (0^1) + (0^2) = 258 % 255 = 3
        assert_eq!(tail, &[0, 0, 3]);
    }
}
