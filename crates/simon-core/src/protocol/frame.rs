//! Fixed-capacity frame buffer shared by the transmit and receive paths.
//!
//! One buffer belongs to one engine and is reused for every transfer.  It is
//! allocated once at construction with room for `capacity + TRAILER_LEN`
//! bytes and never grows, so a transfer never allocates.
//!
//! ```text
//! index:  0 .. len-1 | len       | len+1     | len+2
//!         payload    | checksum1 | checksum2 | destination
//! ```

use super::checksum::Checksum;
use super::TRAILER_LEN;

/// Byte buffer holding one frame plus stale bytes from earlier, longer use.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameBuffer {
    bytes: Vec<u8>,
    capacity: usize,
}

impl FrameBuffer {
    /// Allocates a zeroed buffer for payloads of up to `capacity` bytes.
    pub fn new(capacity: usize) -> Self {
        Self {
            bytes: vec![0; capacity.saturating_add(TRAILER_LEN)],
            capacity,
        }
    }

    /// Maximum payload length in bytes.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Total buffer size: payload capacity plus the three trailer bytes.
    pub fn frame_capacity(&self) -> usize {
        self.bytes.len()
    }

    /// Resets every byte to zero.
    pub fn clear(&mut self) {
        self.bytes.fill(0);
    }

    /// Loads `payload` and the trailer for `destination`, returning the
    /// payload length actually used.
    ///
    /// Payloads longer than the capacity are cut to the capacity without
    /// complaint.
    pub fn build(&mut self, payload: &[u8], destination: u8) -> usize {
        self.clear();
        let len = payload.len().min(self.capacity);
        self.bytes[..len].copy_from_slice(&payload[..len]);

        let [sum1, sum2] = Checksum::compute(&self.bytes[..len]).to_bytes();
        self.bytes[len] = sum1;
        self.bytes[len + 1] = sum2;
        self.bytes[len + 2] = destination;
        len
    }

    /// Recomputes the checksum over the payload and compares it with the two
    /// checksum bytes stored behind it.
    pub fn verify(&self, payload_len: usize) -> bool {
        self.checksum(payload_len) == self.stored_checksum(payload_len)
    }

    /// Checksum computed over `[0, payload_len)`.
    pub fn checksum(&self, payload_len: usize) -> Checksum {
        let len = self.clamp(payload_len);
        Checksum::compute(&self.bytes[..len])
    }

    /// Checksum bytes found at the trailer position for `payload_len`.
    pub fn stored_checksum(&self, payload_len: usize) -> Checksum {
        let len = self.clamp(payload_len);
        Checksum::from_bytes([self.bytes[len], self.bytes[len + 1]])
    }

    /// Destination address found at the trailer position for `payload_len`.
    pub fn address(&self, payload_len: usize) -> u8 {
        self.bytes[self.clamp(payload_len) + 2]
    }

    /// Returns the first `payload_len` bytes as text.
    ///
    /// Exactly `payload_len` bytes are taken, so zero bytes left over from a
    /// previous longer frame never leak into the result.  Invalid UTF-8 is
    /// replaced rather than rejected.
    pub fn payload(&self, payload_len: usize) -> String {
        String::from_utf8_lossy(self.payload_bytes(payload_len)).into_owned()
    }

    /// Raw payload bytes `[0, payload_len)`.
    pub fn payload_bytes(&self, payload_len: usize) -> &[u8] {
        &self.bytes[..self.clamp(payload_len)]
    }

    /// The on-wire frame for `payload_len`: payload plus trailer.
    pub fn frame_bytes(&self, payload_len: usize) -> &[u8] {
        &self.bytes[..self.clamp(payload_len) + TRAILER_LEN]
    }

    /// The whole buffer, including bytes past the current frame.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub(crate) fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut self.bytes
    }

    fn clamp(&self, payload_len: usize) -> usize {
        debug_assert!(payload_len <= self.capacity, "payload length past capacity");
        payload_len.min(self.capacity)
    }
}
