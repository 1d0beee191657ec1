/// Duration of one audio frame. The sender paces writes at this period.
pub const FRAME_DURATION_MS: u64 = 20;

/// Frames of drift tolerated before the pacing clock resynchronises.
pub const RESYNC_AFTER_FRAMES: u32 = 3;

/// Silence frames sent after a talk burst before speaking stops.
pub const MAX_SILENCE_FRAMES: u8 = 5;

/// Encoded Opus silence.
pub const SILENCE_FRAME: [u8; 3] = [0xF8, 0xFF, 0xFE];

/// Voice control opcode for speaking updates.
pub const OP_SPEAKING: u8 = 5;

pub const RTP_HEADER_LEN: usize = 12;
pub const RTP_VERSION_BYTE: u8 = 0x80;
pub const RTP_OPUS_PAYLOAD_TYPE: u8 = 0x78;

/// RTP timestamp advance per 20ms frame at 48kHz.
pub const RTP_TIMESTAMP_STEP: u32 = 960;

/// Reusable packet buffer size; covers header, payload and sealing overhead.
pub const UDP_PACKET_BUF_CAPACITY: usize = 1460;

/// Size of both the IP discovery request and response.
pub const DISCOVERY_PACKET_SIZE: usize = 74;

pub const IP_DISCOVERY_TIMEOUT_SECS: u64 = 2;
