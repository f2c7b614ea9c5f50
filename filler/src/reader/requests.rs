// Outbound state-history frames.
//
// The socket speaks a binary variant type "request" with exactly three
// shapes, all fixed; they are encoded by hand instead of through a general
// ABI encoder no other path would need.

fn push_varuint32(buffer: &mut Vec<u8>, mut value: u32) {
    loop {
        let mut byte = (value & 0x7f) as u8;
        value >>= 7;
        if value > 0 {
            byte |= 0x80;
        }
        buffer.push(byte);
        if value == 0 {
            break;
        }
    }
}

/// `get_status_request_v0`, variant index 0, no fields.
pub fn get_status_request() -> Vec<u8> {
    vec![0]
}

/// `get_blocks_request_v0` for `[start, end)` with traces, deltas and the
/// signed block fetched, never irreversible-only.
pub fn get_blocks_request(start_block: u32, end_block: u32, max_messages_in_flight: u32) -> Vec<u8> {
    let mut buffer = Vec::with_capacity(32);
    push_varuint32(&mut buffer, 1); // variant index
    buffer.extend_from_slice(&start_block.to_le_bytes());
    buffer.extend_from_slice(&end_block.to_le_bytes());
    buffer.extend_from_slice(&max_messages_in_flight.to_le_bytes());
    push_varuint32(&mut buffer, 0); // have_positions: none
    buffer.push(0); // irreversible_only = false
    buffer.push(1); // fetch_block = true
    buffer.push(1); // fetch_traces = true
    buffer.push(1); // fetch_deltas = true
    buffer
}

/// `get_blocks_ack_request_v0` acknowledging a batch of results.
pub fn get_blocks_ack_request(num_messages: u32) -> Vec<u8> {
    let mut buffer = Vec::with_capacity(8);
    push_varuint32(&mut buffer, 2); // variant index
    buffer.extend_from_slice(&num_messages.to_le_bytes());
    buffer
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_request() {
        assert_eq!(get_status_request(), vec![0]);
    }

    #[test]
    fn test_blocks_request_layout() {
        let frame = get_blocks_request(100, u32::MAX, 10);
        assert_eq!(frame[0], 1);
        assert_eq!(&frame[1..5], &100u32.to_le_bytes());
        assert_eq!(&frame[5..9], &u32::MAX.to_le_bytes());
        assert_eq!(&frame[9..13], &10u32.to_le_bytes());
        // no positions, then the four flags
        assert_eq!(&frame[13..], &[0, 0, 1, 1, 1]);
    }

    #[test]
    fn test_ack_request_layout() {
        let frame = get_blocks_ack_request(10);
        assert_eq!(frame[0], 2);
        assert_eq!(&frame[1..5], &10u32.to_le_bytes());
    }
}
