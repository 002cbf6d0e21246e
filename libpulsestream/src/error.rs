use std::path::PathBuf;
use thiserror::Error;

use super::constants::*;
use super::stream_status::StreamStatus;

#[derive(Debug, Error)]
pub enum WireError {
    #[error("Failed to parse buffer into Train: {0}")]
    IOError(#[from] std::io::Error),
    #[error("Incorrect magic {0:#x} found for Train; expected {exp:#x}", exp=TRAIN_MAGIC)]
    IncorrectMagic(u32),
    #[error("Unknown value tag {0} found in Train pulse")]
    UnknownValueTag(u8),
    #[error("Array of rank {0} found in Train; at most {max} dimensions are supported", max=MAX_ARRAY_RANK)]
    BadArrayRank(u8),
    #[error("Train declares {0} bytes of payload but only {1} remain in the buffer")]
    Truncated(u64, u64),
    #[error("Train buffer ended in the middle of a field")]
    ShortBuffer,
    #[error("Train buffer has {0} trailing bytes after the last pulse")]
    TrailingBytes(u64),
    #[error("Train field name is not valid UTF-8")]
    BadFieldName,
    #[error("Train text value is not valid UTF-8")]
    BadText,
    #[error("Train field name of {0} bytes exceeds the u16 length prefix")]
    FieldNameTooLong(usize),
    #[error("Train array shape does not match its element count")]
    BadArrayShape,
    #[error("Length {0} does not fit the u32 length fields of a Train")]
    LengthOverflow(usize),
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Transport failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("Transport received a malformed delivery unit: {0}")]
    Malformed(#[from] WireError),
    #[error("Transport peer disconnected")]
    Disconnected,
}

#[derive(Debug, Error)]
pub enum TrainFileError {
    #[error("Error when parsing Train from TrainFile: {0}")]
    BadTrain(#[from] WireError),
    #[error("Could not open TrainFile because file {0:?} does not exist")]
    BadFilePath(PathBuf),
    #[error("TrainFile contained an end-of-data marker before end-of-file")]
    UnexpectedEndMarker,
    #[error("Reached end of TrainFile")]
    EndOfFile,
    #[error("TrainFile failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum TrainStackError {
    #[error("TrainStack failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("TrainStack did not find any matching files in directory {0:?}")]
    NoMatchingFiles(PathBuf),
    #[error("TrainStack failed due to TrainFile error: {0}")]
    FileError(#[from] TrainFileError),
}

#[derive(Debug, Error)]
pub enum KeySchemaError {
    #[error("KeySchema failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("KeySchema was given a file with the incorrect format; most likely the number of columns is incorrect (line {0})")]
    BadFileFormat(usize),
    #[error("KeySchema found native type {0} mapped twice")]
    DuplicateNativeType(String),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration as file {0:?} does not exist")]
    BadFilePath(PathBuf),
    #[error("Config failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("Config failed to parse YAML: {0}")]
    ParsingError(#[from] serde_yaml::Error),
    #[error("Config selects the offline backend but has no data_path")]
    MissingDataPath,
    #[error("Config has an invalid status interval of 0")]
    BadStatusInterval,
}

#[derive(Debug, Error)]
pub enum StackError {
    #[error("BackgroundStack was given a frame of shape {0:?}; expected {1:?}")]
    ShapeMismatch(Vec<usize>, Vec<usize>),
    #[error("BackgroundStack must hold at least one frame")]
    ZeroLength,
}

/// The reason a stream stopped delivering data before it was exhausted.
#[derive(Debug, Error)]
pub enum StreamFault {
    #[error("transport failure: {0}")]
    Transport(#[from] TransportError),
    #[error("recorded source failure: {0}")]
    Files(#[from] TrainStackError),
    #[error("stream was already closed")]
    Closed,
}

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("Stream exhausted; no further delivery units are available")]
    StreamExhausted,
    #[error("Stream terminated due to {0}")]
    StreamTerminated(#[from] StreamFault),
}

impl IngestError {
    /// True if the stream ended cleanly rather than breaking
    pub fn is_exhausted(&self) -> bool {
        matches!(self, Self::StreamExhausted)
    }
}

impl From<TransportError> for IngestError {
    fn from(value: TransportError) -> Self {
        Self::StreamTerminated(StreamFault::Transport(value))
    }
}

impl From<TrainStackError> for IngestError {
    fn from(value: TrainStackError) -> Self {
        Self::StreamTerminated(StreamFault::Files(value))
    }
}

#[derive(Debug, Error)]
pub enum ReplayError {
    #[error("ReplayServer failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("ReplayServer failed due to TrainStack error: {0}")]
    StackError(#[from] TrainStackError),
    #[error("ReplayServer failed to encode a Train: {0}")]
    WireError(#[from] WireError),
    #[error("ReplayServer received an unknown request {0:?}")]
    BadRequest([u8; 4]),
}

#[derive(Debug, Error)]
pub enum ProcessorError {
    #[error("Processor failed due to Config error: {0}")]
    ConfigError(#[from] ConfigError),
    #[error("Processor failed due to KeySchema error: {0}")]
    SchemaError(#[from] KeySchemaError),
    #[error("Processor failed due to Transport error: {0}")]
    TransportError(#[from] TransportError),
    #[error("Processor failed due to TrainStack error: {0}")]
    StackError(#[from] TrainStackError),
    #[error("Processor failed due to Ingest error: {0}")]
    IngestError(#[from] IngestError),
    #[error("Processor failed due to Send error: {0}")]
    SendError(#[from] std::sync::mpsc::SendError<StreamStatus>),
}
