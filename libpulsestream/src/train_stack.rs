use super::constants::{TRAIN_FILE_EXTENSION, TRAIN_FILE_PREFIX};
use super::error::{TrainFileError, TrainStackError};
use super::train::Train;
use super::train_file::TrainFile;

use std::collections::VecDeque;
use std::path::{Path, PathBuf};

/// A run is usually recorded into several files; the stack is the collection of all
/// train files found in one run directory, read in name order.
#[derive(Debug)]
pub struct TrainStack {
    file_stack: VecDeque<PathBuf>,
    active_file: TrainFile,
    total_stack_size_bytes: u64,
    is_ended: bool,
    parent_path: PathBuf,
}

impl TrainStack {
    /// Create a new TrainStack for a given run directory
    pub fn new(path: &Path) -> Result<Self, TrainStackError> {
        let (mut stack, bytes) = Self::get_file_stack(path)?;
        if let Some(file_path) = stack.pop_front() {
            spdlog::info!(
                "Found {} train files in {} ({})",
                stack.len() + 1,
                path.display(),
                human_bytes::human_bytes(bytes as f64)
            );
            Ok(TrainStack {
                file_stack: stack,
                active_file: TrainFile::new(&file_path)?,
                total_stack_size_bytes: bytes,
                is_ended: false,
                parent_path: PathBuf::from(path),
            })
        } else {
            Err(TrainStackError::NoMatchingFiles(path.to_path_buf()))
        }
    }

    /// Get the next train in the file stack
    ///
    /// Returns a `Result<Option<Train>>`. The Option is None if the stack has
    /// no more data.
    pub fn get_next_train(&mut self) -> Result<Option<Train>, TrainStackError> {
        loop {
            if self.is_ended {
                return Ok(None);
            }

            match self.active_file.get_next_train() {
                Ok(train) => return Ok(Some(train)),
                Err(TrainFileError::EndOfFile) => {
                    self.move_to_next_file()?;
                }
                Err(e) => return Err(TrainStackError::FileError(e)),
            };
        }
    }

    pub fn total_size_bytes(&self) -> u64 {
        self.total_stack_size_bytes
    }

    pub fn parent_path(&self) -> &Path {
        &self.parent_path
    }

    /// Get all of the train files and put them in the stack
    fn get_file_stack(parent_path: &Path) -> Result<(VecDeque<PathBuf>, u64), TrainStackError> {
        let mut file_list: Vec<PathBuf> = Vec::new();
        let mut total_stack_size_bytes = 0;
        for item in parent_path.read_dir()? {
            let item_path = item?.path();
            let is_match = item_path
                .file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| {
                    name.starts_with(TRAIN_FILE_PREFIX) && name.ends_with(TRAIN_FILE_EXTENSION)
                });
            if is_match {
                total_stack_size_bytes += item_path.metadata()?.len();
                file_list.push(item_path);
            }
        }

        if file_list.is_empty() {
            return Err(TrainStackError::NoMatchingFiles(parent_path.to_path_buf()));
        }

        file_list.sort(); // Zero padded sequence numbers sort correctly as strings
        Ok((file_list.into(), total_stack_size_bytes))
    }

    ///Move to the next file in the stack
    fn move_to_next_file(&mut self) -> Result<(), TrainStackError> {
        loop {
            if let Some(next_file_path) = self.file_stack.pop_front() {
                let next_file = TrainFile::new(&next_file_path)?;
                if !next_file.is_eof() {
                    spdlog::debug!("Moving to train file {}", next_file_path.display());
                    self.active_file = next_file;
                    return Ok(());
                }
            } else {
                self.is_ended = true;
                return Ok(());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::train::Pulse;
    use crate::train_file::TrainFileWriter;

    fn write_file(dir: &Path, name: &str, ids: &[u64]) {
        let mut writer = TrainFileWriter::create(&dir.join(name)).unwrap();
        for id in ids {
            writer
                .write_train(&Train::new(*id, *id, vec![Pulse::new()]))
                .unwrap();
        }
        writer.close().unwrap();
    }

    #[test]
    fn test_stack_reads_files_in_order() {
        let dir = tempfile::tempdir().unwrap();
        write_file(dir.path(), "run-0007-01.trains", &[3, 4]);
        write_file(dir.path(), "run-0007-00.trains", &[0, 1, 2]);
        write_file(dir.path(), "run-0007-02.trains", &[]);
        write_file(dir.path(), "run-0007-03.trains", &[5]);
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let mut stack = TrainStack::new(dir.path()).unwrap();
        let mut ids = Vec::new();
        while let Some(train) = stack.get_next_train().unwrap() {
            ids.push(train.train_id);
        }
        assert_eq!(ids, vec![0, 1, 2, 3, 4, 5]);
        assert!(stack.get_next_train().unwrap().is_none());
    }

    #[test]
    fn test_empty_directory() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            TrainStack::new(dir.path()),
            Err(TrainStackError::NoMatchingFiles(_))
        ));
    }
}
