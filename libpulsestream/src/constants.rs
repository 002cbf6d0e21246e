// Reserved common keys
pub const PARAMETERS_KEY: &str = "parameters";
pub const ANALYSIS_KEY: &str = "analysis";
pub const EVENT_ID_KEY: &str = "eventID";

// Record names produced for the eventID key
pub const TIMESTAMP_RECORD: &str = "Timestamp";
pub const PULSE_RECORD: &str = "Pulse";

// Wire format
pub const TRAIN_MAGIC: u32 = 0x5452_4E31; // "TRN1"
pub const REQUEST_NEXT: &[u8; 4] = b"next";
pub const END_OF_DATA_FRAME_LEN: u32 = 0;
pub const MAX_ARRAY_RANK: u8 = 8;
pub const FRAME_READ_CHUNK: usize = 1 << 20; // initial payload buffer for one frame

pub const TAG_SCALAR: u8 = 0;
pub const TAG_INTEGER: u8 = 1;
pub const TAG_ARRAY: u8 = 2;
pub const TAG_TEXT: u8 = 3;

// Recorded files
pub const TRAIN_FILE_PREFIX: &str = "run-";
pub const TRAIN_FILE_EXTENSION: &str = ".trains";

pub const DEFAULT_SOCKET: &str = "127.0.0.1:4500";
pub const DEFAULT_READ_AHEAD: usize = 2;
