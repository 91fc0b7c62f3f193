//! Conversation archives: one CSV file per export.
//!
//! Files live flat in one directory and are named `messages_<YYYY-MM-DD_HH-MM-SS>.csv`.
//! The header is always `Time,Role,Content`; the same casing is required when reading.
//! A file is written once with create-new semantics and never touched again.

use chrono::{Local, NaiveDateTime};
use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use crate::session::{timestamp, Role, Turn};

pub const ARCHIVE_HEADER: [&str; 3] = ["Time", "Role", "Content"];

/// Shown by viewers when the directory is missing or has no archives.
pub const NO_ARCHIVES_NOTICE: &str = "No chat archives found.";

const FILE_PREFIX: &str = "messages_";
const FILE_EXTENSION: &str = ".csv";
const FILENAME_TIME_FORMAT: &str = "%Y-%m-%d_%H-%M-%S";
/// Suffixes `_001`..`_999` disambiguate exports made within the same second.
const MAX_SAME_SECOND_EXPORTS: u32 = 999;

#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    #[error("archive i/o error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("archive csv error in {path}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
    #[error("invalid archive name: {0}")]
    InvalidName(String),
    #[error("archive not found: {0}")]
    NotFound(String),
    #[error("malformed archive {file}: {reason}")]
    Malformed { file: String, reason: String },
    #[error("too many exports within one second in {0}")]
    Exhausted(PathBuf),
}

/// Archive directory handle. Creating one touches nothing on disk.
#[derive(Debug, Clone)]
pub struct Archive {
    dir: PathBuf,
}

impl Archive {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write `turns` to a new file named after the current local time; returns its path.
    pub fn export(&self, turns: &[Turn]) -> Result<PathBuf, ArchiveError> {
        self.export_at(turns, Local::now().naive_local())
    }

    /// Write `turns` to a new file named after `at`.
    pub fn export_at(&self, turns: &[Turn], at: NaiveDateTime) -> Result<PathBuf, ArchiveError> {
        std::fs::create_dir_all(&self.dir).map_err(|source| ArchiveError::Io {
            path: self.dir.clone(),
            source,
        })?;
        let stem = format!("{}{}", FILE_PREFIX, at.format(FILENAME_TIME_FORMAT));
        let bytes = encode_turns(turns).map_err(|source| ArchiveError::Csv {
            path: self.dir.join(format!("{}{}", stem, FILE_EXTENSION)),
            source,
        })?;
        let (path, file) = self.create_new(&stem)?;
        write_or_discard(&path, file, &bytes)?;
        log::info!("archived {} turn(s) to {}", turns.len(), path.display());
        Ok(path)
    }

    fn create_new(&self, stem: &str) -> Result<(PathBuf, std::fs::File), ArchiveError> {
        for n in 0..=MAX_SAME_SECOND_EXPORTS {
            let name = if n == 0 {
                format!("{}{}", stem, FILE_EXTENSION)
            } else {
                format!("{}_{:03}{}", stem, n, FILE_EXTENSION)
            };
            let path = self.dir.join(name);
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(file) => return Ok((path, file)),
                Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
                Err(source) => return Err(ArchiveError::Io { path, source }),
            }
        }
        Err(ArchiveError::Exhausted(self.dir.clone()))
    }

    /// Archive file names, most recent first. A missing directory lists as empty.
    pub fn list(&self) -> Result<Vec<String>, ArchiveError> {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(ArchiveError::Io {
                    path: self.dir.clone(),
                    source,
                })
            }
        };
        let mut names: Vec<String> = entries
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry),
                Err(e) => {
                    log::debug!("skipping unreadable entry in {}: {}", self.dir.display(), e);
                    None
                }
            })
            .filter(|entry| entry.file_type().map(|t| t.is_file()).unwrap_or(false))
            .filter_map(|entry| entry.file_name().into_string().ok())
            .filter(|name| name.ends_with(FILE_EXTENSION))
            .collect();
        // Zero-padded timestamps sort lexicographically in time order.
        names.sort_unstable_by(|a, b| b.cmp(a));
        Ok(names)
    }

    /// Read every row of one archive file, in file order.
    pub fn load(&self, name: &str) -> Result<Vec<Turn>, ArchiveError> {
        let path = self.path_for(name)?;
        let mut reader = match csv::ReaderBuilder::new().has_headers(true).from_path(&path) {
            Ok(r) => r,
            Err(e) => {
                if let csv::ErrorKind::Io(io) = e.kind() {
                    if io.kind() == ErrorKind::NotFound {
                        return Err(ArchiveError::NotFound(name.to_string()));
                    }
                }
                return Err(ArchiveError::Csv { path, source: e });
            }
        };

        let headers = reader
            .headers()
            .map_err(|source| ArchiveError::Csv {
                path: path.clone(),
                source,
            })?
            .clone();
        if headers.iter().ne(ARCHIVE_HEADER.iter().copied()) {
            return Err(ArchiveError::Malformed {
                file: name.to_string(),
                reason: format!(
                    "expected header {}, found {}",
                    ARCHIVE_HEADER.join(","),
                    headers.iter().collect::<Vec<_>>().join(",")
                ),
            });
        }

        let mut turns = Vec::new();
        for (i, record) in reader.records().enumerate() {
            let record = record.map_err(|source| ArchiveError::Csv {
                path: path.clone(),
                source,
            })?;
            turns.push(parse_row(name, i + 1, &record)?);
        }
        Ok(turns)
    }

    fn path_for(&self, name: &str) -> Result<PathBuf, ArchiveError> {
        let valid = !name.is_empty()
            && !name.starts_with('.')
            && !name.contains(['/', '\\'])
            && name.ends_with(FILE_EXTENSION);
        if !valid {
            return Err(ArchiveError::InvalidName(name.to_string()));
        }
        Ok(self.dir.join(name))
    }
}

fn encode_turns(turns: &[Turn]) -> Result<Vec<u8>, csv::Error> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(ARCHIVE_HEADER)?;
    for turn in turns {
        writer.write_record([
            turn.time_string().as_str(),
            turn.role.as_str(),
            turn.content.as_str(),
        ])?;
    }
    writer
        .into_inner()
        .map_err(|e| csv::Error::from(e.into_error()))
}

/// Write `bytes` to the freshly created `path`; on failure the partial file is removed.
fn write_or_discard<W: Write>(path: &Path, mut out: W, bytes: &[u8]) -> Result<(), ArchiveError> {
    let written = out.write_all(bytes).and_then(|()| out.flush());
    drop(out);
    if let Err(source) = written {
        if let Err(e) = std::fs::remove_file(path) {
            log::warn!("could not remove partial archive {}: {}", path.display(), e);
        }
        return Err(ArchiveError::Io {
            path: path.to_path_buf(),
            source,
        });
    }
    Ok(())
}

fn parse_row(file: &str, row: usize, record: &csv::StringRecord) -> Result<Turn, ArchiveError> {
    let malformed = |reason: String| ArchiveError::Malformed {
        file: file.to_string(),
        reason: format!("row {}: {}", row, reason),
    };
    let (time, role, content) = match (record.get(0), record.get(1), record.get(2)) {
        (Some(t), Some(r), Some(c)) if record.len() == ARCHIVE_HEADER.len() => (t, r, c),
        _ => return Err(malformed(format!("expected 3 columns, found {}", record.len()))),
    };
    let timestamp = timestamp::parse(time).map_err(|e| malformed(format!("bad time {:?}: {}", time, e)))?;
    let role: Role = role.parse().map_err(malformed)?;
    Ok(Turn {
        timestamp,
        role,
        content: content.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_archive() -> Archive {
        Archive::new(
            std::env::temp_dir()
                .join(format!("pulse-archive-test-{}", uuid::Uuid::new_v4()))
                .join("archive"),
        )
    }

    fn at(s: &str) -> NaiveDateTime {
        timestamp::parse(s).unwrap()
    }

    fn sample_turns() -> Vec<Turn> {
        vec![
            Turn {
                timestamp: at("2024-03-05 09:07:01"),
                role: Role::User,
                content: "What is a fever?".to_string(),
            },
            Turn {
                timestamp: at("2024-03-05 09:07:04"),
                role: Role::Assistant,
                content: "A fever is a temporary rise in body temperature.\n\n- Usually above 38 °C\n- Often a sign of \"infection\", e.g. flu, colds".to_string(),
            },
        ]
    }

    struct FailingWriter;

    impl Write for FailingWriter {
        fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
            Err(std::io::Error::new(ErrorKind::Other, "no space left on device"))
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn missing_directory_lists_nothing() {
        let archive = temp_archive();
        assert!(archive.list().unwrap().is_empty());
        assert!(!archive.dir().exists());
    }

    #[test]
    fn export_writes_header_and_rows() {
        let archive = temp_archive();
        let path = archive
            .export_at(&sample_turns(), at("2024-03-05 09:08:00"))
            .unwrap();
        assert_eq!(
            path.file_name().unwrap().to_str().unwrap(),
            "messages_2024-03-05_09-08-00.csv"
        );
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("Time,Role,Content\n2024-03-05 09:07:01,user,What is a fever?\n"));
    }

    #[test]
    fn export_then_load_round_trips() {
        let archive = temp_archive();
        let turns = sample_turns();
        let path = archive.export(&turns).unwrap();
        let name = path.file_name().unwrap().to_str().unwrap();
        assert_eq!(archive.load(name).unwrap(), turns);
    }

    #[test]
    fn empty_session_exports_header_only() {
        let archive = temp_archive();
        let path = archive.export(&[]).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "Time,Role,Content\n");
        let name = path.file_name().unwrap().to_str().unwrap();
        assert!(archive.load(name).unwrap().is_empty());
    }

    #[test]
    fn same_second_exports_do_not_overwrite() {
        let archive = temp_archive();
        let when = at("2024-03-05 09:08:00");
        let first = archive.export_at(&sample_turns()[..1], when).unwrap();
        let second = archive.export_at(&sample_turns(), when).unwrap();
        assert_ne!(first, second);
        assert_eq!(
            archive.list().unwrap(),
            vec![
                "messages_2024-03-05_09-08-00_001.csv".to_string(),
                "messages_2024-03-05_09-08-00.csv".to_string(),
            ]
        );
        assert_eq!(archive.load("messages_2024-03-05_09-08-00.csv").unwrap().len(), 1);
    }

    #[test]
    fn list_is_most_recent_first() {
        let archive = temp_archive();
        for t in ["2024-01-02 10:00:00", "2023-12-31 23:59:59", "2024-01-02 09:00:00"] {
            archive.export_at(&[], at(t)).unwrap();
        }
        std::fs::write(archive.dir().join("notes.txt"), "ignored").unwrap();
        assert_eq!(
            archive.list().unwrap(),
            vec![
                "messages_2024-01-02_10-00-00.csv",
                "messages_2024-01-02_09-00-00.csv",
                "messages_2023-12-31_23-59-59.csv",
            ]
        );
    }

    #[test]
    fn load_rejects_path_traversal() {
        let archive = temp_archive();
        for name in ["../secret.csv", "a/b.csv", ".hidden.csv", "messages.txt", ""] {
            assert!(matches!(
                archive.load(name),
                Err(ArchiveError::InvalidName(_))
            ));
        }
    }

    #[test]
    fn load_missing_file_is_not_found() {
        let archive = temp_archive();
        assert!(matches!(
            archive.load("messages_2020-01-01_00-00-00.csv"),
            Err(ArchiveError::NotFound(_))
        ));
    }

    #[test]
    fn load_requires_canonical_header() {
        let archive = temp_archive();
        std::fs::create_dir_all(archive.dir()).unwrap();
        std::fs::write(
            archive.dir().join("old.csv"),
            "Time,Role,content\n2024-03-05 09:07:01,user,hi\n",
        )
        .unwrap();
        let err = archive.load("old.csv").unwrap_err();
        assert!(matches!(err, ArchiveError::Malformed { ref reason, .. } if reason.contains("Time,Role,Content")));
    }

    #[test]
    fn load_reports_bad_rows() {
        let archive = temp_archive();
        std::fs::create_dir_all(archive.dir()).unwrap();
        std::fs::write(
            archive.dir().join("bad.csv"),
            "Time,Role,Content\nyesterday,user,hi\n",
        )
        .unwrap();
        assert!(matches!(
            archive.load("bad.csv"),
            Err(ArchiveError::Malformed { ref reason, .. }) if reason.starts_with("row 1")
        ));

        std::fs::write(
            archive.dir().join("role.csv"),
            "Time,Role,Content\n2024-03-05 09:07:01,system,hi\n",
        )
        .unwrap();
        assert!(matches!(
            archive.load("role.csv"),
            Err(ArchiveError::Malformed { .. })
        ));
    }

    #[test]
    fn export_into_unusable_directory_is_io_error() {
        let blocker = std::env::temp_dir().join(format!("pulse-archive-file-{}", uuid::Uuid::new_v4()));
        std::fs::write(&blocker, "not a directory").unwrap();
        let archive = Archive::new(blocker.join("archive"));
        assert!(matches!(
            archive.export(&sample_turns()),
            Err(ArchiveError::Io { .. })
        ));

        let archive = Archive::new(&blocker);
        assert!(matches!(
            archive.export(&sample_turns()),
            Err(ArchiveError::Io { .. })
        ));
        std::fs::remove_file(&blocker).unwrap();
    }

    #[test]
    fn failed_write_removes_partial_file() {
        let archive = temp_archive();
        std::fs::create_dir_all(archive.dir()).unwrap();
        let path = archive.dir().join("messages_2024-03-05_09-08-00.csv");
        std::fs::write(&path, "Time,Ro").unwrap();
        let err = write_or_discard(&path, FailingWriter, b"Time,Role,Content\n").unwrap_err();
        assert!(matches!(err, ArchiveError::Io { ref path, .. } if path.ends_with("messages_2024-03-05_09-08-00.csv")));
        assert!(!path.exists());
        assert!(archive.list().unwrap().is_empty());
    }
}
