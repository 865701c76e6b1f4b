use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Write};
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use chrono::{Local, NaiveDateTime, SubsecRound, TimeDelta};
use itertools::Itertools;

use crate::error::StorageError;
use crate::game::Game;
use crate::self_play::Record;
use crate::util::worker_pool::panic_message;

const DATA_FILE_PREFIX: &str = "play_";
const DATA_FILE_SUFFIX: &str = ".json";
const TIMESTAMP_FORMAT: &str = "%Y%m%d-%H%M%S%.6f";

/// Writes batches of records to timestamped files in the play data directory and keeps at most
/// `max_file_num` of them.
pub struct DataWriter {
    dir: PathBuf,
    max_file_num: usize,
    last_stamp: Option<NaiveDateTime>,
}

impl DataWriter {
    pub fn new(dir: impl Into<PathBuf>, max_file_num: usize) -> Self {
        assert!(max_file_num > 0);
        Self {
            dir: dir.into(),
            max_file_num,
            last_stamp: None,
        }
    }

    /// Path for the next data file, `play_<YYYYmmdd-HHMMSS.ffffff>.json`.
    ///
    /// Names produced by one writer are strictly increasing even if the clock is not. An existing
    /// file with the same name is a collision.
    pub fn next_path(&mut self) -> Result<PathBuf, StorageError> {
        let mut stamp = Local::now().naive_local().trunc_subsecs(6);
        if let Some(last) = self.last_stamp {
            if stamp <= last {
                stamp = last + TimeDelta::microseconds(1);
            }
        }
        self.last_stamp = Some(stamp);

        let filename = format!(
            "{DATA_FILE_PREFIX}{}{DATA_FILE_SUFFIX}",
            stamp.format(TIMESTAMP_FORMAT)
        );
        let path = self.dir.join(filename);
        if path.exists() {
            return Err(StorageError::Collision(path));
        }
        Ok(path)
    }

    /// Start writing `records` to a new file on a background thread.
    ///
    /// The retention sweep runs on the same thread after the write. If no thread can be spawned
    /// the write happens on the calling thread.
    pub fn flush<G: Game>(&mut self, records: Vec<Record<G>>) -> Result<PendingWrite<G>, WriteFailure<G>> {
        let path = match fs::create_dir_all(&self.dir)
            .map_err(StorageError::from)
            .and_then(|()| self.next_path())
        {
            Ok(path) => path,
            Err(error) => return Err(WriteFailure { error, records }),
        };

        let records = Arc::new(records);
        let job = {
            let path = path.clone();
            let dir = self.dir.clone();
            let records = Arc::clone(&records);
            let max_file_num = self.max_file_num;
            move || write_and_sweep(&path, &records, &dir, max_file_num)
        };
        let state = match thread::Builder::new().name("data-writer".to_string()).spawn(job) {
            Ok(handle) => WriteState::Running(handle),
            Err(err) => {
                log::warn!("failed to spawn data writer thread ({err}), writing synchronously");
                WriteState::Done(write_and_sweep(&path, &records, &self.dir, self.max_file_num))
            }
        };
        Ok(PendingWrite {
            path,
            records,
            state,
        })
    }

    pub fn data_files(&self) -> Result<Vec<PathBuf>, StorageError> {
        data_files(&self.dir)
    }

    /// Delete the oldest data files beyond `max_file_num`, returns the number of deleted files.
    pub fn remove_old_files(&self) -> Result<usize, StorageError> {
        remove_old_files(&self.dir, self.max_file_num)
    }
}

enum WriteState {
    Running(JoinHandle<Result<(), StorageError>>),
    Done(Result<(), StorageError>),
}

/// A write started by `DataWriter::flush`.
pub struct PendingWrite<G: Game> {
    path: PathBuf,
    records: Arc<Vec<Record<G>>>,
    state: WriteState,
}

impl<G: Game> PendingWrite<G> {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn records_num(&self) -> usize {
        self.records.len()
    }

    pub fn is_finished(&self) -> bool {
        match &self.state {
            WriteState::Running(handle) => handle.is_finished(),
            WriteState::Done(_) => true,
        }
    }

    /// Wait for the write, on failure the records are handed back.
    pub fn join(self) -> Result<usize, WriteFailure<G>> {
        let res = match self.state {
            WriteState::Running(handle) => handle.join().unwrap_or_else(|payload| {
                Err(StorageError::Io(io::Error::other(format!(
                    "data writer panicked: {}",
                    panic_message(payload.as_ref())
                ))))
            }),
            WriteState::Done(res) => res,
        };
        match res {
            Ok(()) => Ok(self.records.len()),
            Err(error) => Err(WriteFailure {
                error,
                records: Arc::try_unwrap(self.records).unwrap_or_else(|records| (*records).clone()),
            }),
        }
    }
}

/// A batch that could not be written.
pub struct WriteFailure<G: Game> {
    pub error: StorageError,
    pub records: Vec<Record<G>>,
}

fn write_and_sweep<G: Game>(
    path: &Path,
    records: &[Record<G>],
    dir: &Path,
    max_file_num: usize,
) -> Result<(), StorageError> {
    panic::catch_unwind(AssertUnwindSafe(|| write_records(path, records))).unwrap_or_else(
        |payload| {
            Err(StorageError::Io(io::Error::other(format!(
                "data writer panicked: {}",
                panic_message(payload.as_ref())
            ))))
        },
    )?;
    log::debug!("wrote {} records to {}", records.len(), path.display());

    if let Err(err) = remove_old_files(dir, max_file_num) {
        log::warn!("failed to remove old play data: {err}");
    }
    Ok(())
}

pub(crate) fn write_records<G: Game>(path: &Path, records: &[Record<G>]) -> Result<(), StorageError> {
    let file = File::create_new(path).map_err(|source| match source.kind() {
        io::ErrorKind::AlreadyExists => StorageError::Collision(path.to_path_buf()),
        _ => StorageError::Write {
            path: path.to_path_buf(),
            source,
        },
    })?;

    let mut writer = BufWriter::new(file);
    let res = serde_json::to_writer(&mut writer, records)
        .map_err(StorageError::Encode)
        .and_then(|()| {
            writer.flush().map_err(|source| StorageError::Write {
                path: path.to_path_buf(),
                source,
            })
        });
    if res.is_err() {
        /* Never leave a truncated data file behind */
        drop(writer);
        let _ = fs::remove_file(path);
    }
    res
}

/// Read back a data file written by `DataWriter`.
pub fn read_records<G: Game>(path: &Path) -> Result<Vec<Record<G>>, StorageError> {
    let file = File::open(path).map_err(|source| StorageError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_reader(BufReader::new(file)).map_err(|source| StorageError::Decode {
        path: path.to_path_buf(),
        source,
    })
}

/// Data files in `dir`, oldest first.
pub fn data_files(dir: &Path) -> Result<Vec<PathBuf>, StorageError> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(source) => {
            return Err(StorageError::Read {
                path: dir.to_path_buf(),
                source,
            })
        }
    };

    let mut files = Vec::new();
    for entry in entries {
        let path = entry?.path();
        let is_data_file = path
            .file_name()
            .and_then(|name| name.to_str())
            .is_some_and(|name| name.starts_with(DATA_FILE_PREFIX) && name.ends_with(DATA_FILE_SUFFIX));
        if is_data_file && path.is_file() {
            files.push(path);
        }
    }
    /* Timestamps are zero padded, lexicographic order is creation order */
    Ok(files.into_iter().sorted().collect_vec())
}

fn remove_old_files(dir: &Path, max_file_num: usize) -> Result<usize, StorageError> {
    let files = data_files(dir)?;
    if files.len() <= max_file_num {
        return Ok(0);
    }

    let mut removed = 0;
    for path in &files[..files.len() - max_file_num] {
        match fs::remove_file(path) {
            Ok(()) => {
                log::debug!("removed old play data {}", path.display());
                removed += 1;
            }
            /* Someone else removed it already */
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => return Err(err.into()),
        }
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::Position;
    use crate::ttt::{TttGame, TttMove, TttPosition};

    fn records(n: usize) -> Vec<Record<TttGame>> {
        let mut game_pos = TttPosition::new();
        (0..n)
            .map(|idx| {
                let moves = game_pos.legal_moves();
                let probs = moves.iter().map(|m| (*m, 1.0 / moves.len() as f32)).collect_vec();
                let mut record = Record::new(game_pos, probs);
                record.value = if idx % 2 == 0 { 1.0 } else { -1.0 };
                game_pos.board_x.set(idx, true);
                record
            })
            .collect()
    }

    fn touch(dir: &Path, name: &str) {
        fs::write(dir.join(name), "[]").unwrap();
    }

    #[test]
    fn written_records_read_back_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = DataWriter::new(dir.path().join("play_data"), 10);

        let batch = records(5);
        let pending = writer.flush(batch.clone()).ok().unwrap();
        assert_eq!(pending.records_num(), 5);
        let path = pending.path().to_path_buf();
        assert_eq!(pending.join().ok(), Some(5));

        let name = path.file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with("play_") && name.ends_with(".json"));
        assert_eq!(name.len(), "play_20240101-000000.000000.json".len());
        assert_eq!(read_records::<TttGame>(&path).unwrap(), batch);
        assert_eq!(writer.data_files().unwrap(), vec![path]);
    }

    #[test]
    fn names_are_strictly_increasing() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = DataWriter::new(dir.path(), 10);
        let paths = (0..200).map(|_| writer.next_path().unwrap()).collect_vec();
        assert!(paths.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn retention_keeps_the_newest() {
        let dir = tempfile::tempdir().unwrap();
        let names = (1..=7)
            .map(|idx| format!("play_20240101-00000{idx}.000000.json"))
            .collect_vec();
        for name in names.iter().rev() {
            touch(dir.path(), name);
        }
        touch(dir.path(), "best_model.json");

        let writer = DataWriter::new(dir.path(), 4);
        assert_eq!(writer.remove_old_files().unwrap(), 3);

        let left = writer
            .data_files()
            .unwrap()
            .into_iter()
            .map(|p| p.file_name().unwrap().to_str().unwrap().to_string())
            .collect_vec();
        assert_eq!(left, names[3..].to_vec());
        assert!(dir.path().join("best_model.json").exists());

        assert_eq!(writer.remove_old_files().unwrap(), 0);
    }

    #[test]
    fn flush_sweeps_old_files() {
        let dir = tempfile::tempdir().unwrap();
        for idx in 1..=3 {
            touch(dir.path(), &format!("play_20000101-00000{idx}.000000.json"));
        }
        let mut writer = DataWriter::new(dir.path(), 2);
        assert!(writer.flush(records(2)).ok().unwrap().join().is_ok());

        let files = writer.data_files().unwrap();
        assert_eq!(files.len(), 2);
        assert!(files[0].ends_with("play_20000101-000003.000000.json"));
    }

    #[test]
    fn existing_file_is_a_fatal_collision() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("play_20240101-000000.000000.json");
        touch(dir.path(), "play_20240101-000000.000000.json");

        let err = write_records::<TttGame>(&path, &records(1)).unwrap_err();
        assert!(matches!(&err, StorageError::Collision(p) if *p == path));
        assert!(err.is_fatal());
        assert_eq!(fs::read_to_string(&path).unwrap(), "[]");
    }

    #[test]
    fn failed_flush_returns_the_records() {
        let dir = tempfile::tempdir().unwrap();
        let not_a_dir = dir.path().join("play_data");
        fs::write(&not_a_dir, "").unwrap();

        let mut writer = DataWriter::new(&not_a_dir, 10);
        let batch = records(3);
        let failure = writer.flush(batch.clone()).err().unwrap();
        assert!(!failure.error.is_fatal());
        assert_eq!(failure.records, batch);
    }

    #[test]
    fn record_format() {
        let mut record = Record::<TttGame>::new(TttPosition::new(), vec![(TttMove::new(0, 2), 1.0)]);
        record.value = -1.0;
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["probs"][0][0]["idx"], 2);
        assert_eq!(json["value"], -1.0);
        assert_eq!(json["position"]["turn"], "Player1");
    }
}
