use std::fs::File;
use std::io::{BufReader, BufWriter, ErrorKind, Seek, Write};
use std::path::{Path, PathBuf};

use super::error::{TrainFileError, WireError};
use super::train::{read_frame, write_frame, Train};

/// A recorded file of framed trains, read front to back.
#[derive(Debug)]
pub struct TrainFile {
    reader: BufReader<File>,
    file_path: PathBuf,
    size_bytes: u64,
    trains_read: u64,
}

impl TrainFile {
    pub fn new(path: &Path) -> Result<Self, TrainFileError> {
        if !path.exists() {
            return Err(TrainFileError::BadFilePath(path.to_path_buf()));
        }
        let file = File::open(path)?;
        let size_bytes = file.metadata()?.len();
        Ok(Self {
            reader: BufReader::new(file),
            file_path: path.to_path_buf(),
            size_bytes,
            trains_read: 0,
        })
    }

    /// Read the next train.
    ///
    /// Returns `TrainFileError::EndOfFile` once the file is finished.
    /// A frame cut off by the end of the file is a bad train, not the end of the file.
    pub fn get_next_train(&mut self) -> Result<Train, TrainFileError> {
        let frame_start = self.reader.stream_position()?;
        match read_frame(&mut self.reader) {
            Ok(Some(train)) => {
                self.trains_read += 1;
                Ok(train)
            }
            Ok(None) => Err(TrainFileError::UnexpectedEndMarker),
            Err(WireError::IOError(e)) if e.kind() == ErrorKind::UnexpectedEof => {
                // Only a clean frame boundary is the end of the file
                if frame_start < self.size_bytes {
                    spdlog::error!(
                        "TrainFile {} ends inside the length prefix of train {}",
                        self.file_path.display(),
                        self.trains_read + 1
                    );
                    return Err(TrainFileError::BadTrain(WireError::Truncated(
                        4,
                        self.size_bytes - frame_start,
                    )));
                }
                Err(TrainFileError::EndOfFile)
            }
            Err(e) => Err(TrainFileError::BadTrain(e)),
        }
    }

    pub fn is_eof(&self) -> bool {
        self.size_bytes == 0
    }

    pub fn size_bytes(&self) -> u64 {
        self.size_bytes
    }

    pub fn path(&self) -> &Path {
        &self.file_path
    }
}

/// Writes trains to a recorded file
#[derive(Debug)]
pub struct TrainFileWriter {
    writer: BufWriter<File>,
    trains_written: u64,
}

impl TrainFileWriter {
    pub fn create(path: &Path) -> Result<Self, TrainFileError> {
        Ok(Self {
            writer: BufWriter::new(File::create(path)?),
            trains_written: 0,
        })
    }

    pub fn write_train(&mut self, train: &Train) -> Result<(), TrainFileError> {
        write_frame(&mut self.writer, train)?;
        self.trains_written += 1;
        Ok(())
    }

    /// Flush and close the file, returning the number of trains written
    pub fn close(mut self) -> Result<u64, TrainFileError> {
        self.writer.flush()?;
        Ok(self.trains_written)
    }
}
