use serde::Serialize;
use std::{
    fs::{self, ReadDir},
    path::Path,
};

pub mod error {
    use std::{io, path::PathBuf};

    pub type Result<T> = std::result::Result<T, self::Error>;

    #[derive(Debug, thiserror::Error)]
    pub enum Error {
        #[error("Cannot read file '{}': {1}", .0.display())]
        ReadFile(PathBuf, #[source] io::Error),

        #[error("Cannot write file '{}': {1}", .0.display())]
        WriteFile(PathBuf, #[source] io::Error),

        #[error("Cannot create dir '{}': {1}", .0.display())]
        Mkdir(PathBuf, #[source] io::Error),

        #[error("Cannot read dir '{}': {1}", .0.display())]
        ReadDir(PathBuf, #[source] io::Error),

        #[error("Cannot serialize to JSON (dest='{}'): {1}", .0.display())]
        SerializeToJson(PathBuf, #[source] serde_json::Error),
    }
}
pub use error::{Error, Result};

#[must_use]
pub fn mkdir_all(path: impl AsRef<Path>) -> Result<()> {
    let dir = path.as_ref();
    fs::create_dir_all(dir).map_err(|e| Error::Mkdir(dir.to_owned(), e))
}

#[must_use]
pub fn write<P, C>(filepath: P, contents: C) -> Result<()>
where
    P: AsRef<Path>,
    C: AsRef<[u8]>,
{
    fs::write(&filepath, contents)
        .map_err(|e| Error::WriteFile(filepath.as_ref().to_owned(), e))
}

#[must_use]
pub fn write_with_mkdir<P, C>(filepath: P, contents: C) -> Result<()>
where
    P: AsRef<Path>,
    C: AsRef<[u8]>,
{
    if let Some(dir) = filepath.as_ref().parent() {
        self::mkdir_all(dir)?;
    }
    self::write(filepath, contents)
}

#[must_use]
pub fn read_bytes(filepath: impl AsRef<Path>) -> Result<Vec<u8>> {
    fs::read(&filepath).map_err(|e| Error::ReadFile(filepath.as_ref().to_owned(), e))
}

#[must_use]
pub fn read_to_string(filepath: impl AsRef<Path>) -> Result<String> {
    fs::read_to_string(&filepath)
        .map_err(|e| Error::ReadFile(filepath.as_ref().to_owned(), e))
}

#[must_use]
pub fn read_dir(dir: impl AsRef<Path>) -> Result<ReadDir> {
    fs::read_dir(&dir).map_err(|e| Error::ReadDir(dir.as_ref().to_owned(), e))
}

#[must_use]
pub fn write_json_with_mkdir<P, T>(filepath: P, data: &T) -> Result<()>
where
    P: AsRef<Path>,
    T: Serialize,
{
    let s = serde_json::to_string_pretty(data)
        .map_err(|e| Error::SerializeToJson(filepath.as_ref().to_owned(), e))?;
    write_with_mkdir(filepath, &s)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn write_then_read_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sub").join("a.txt");
        write_with_mkdir(&path, "hello\n").unwrap();
        assert_eq!(read_to_string(&path).unwrap(), "hello\n");
        assert_eq!(read_bytes(&path).unwrap(), b"hello\n");
    }

    #[test]
    fn read_missing_file_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nope.txt");
        let err = read_to_string(&path).unwrap_err();
        assert!(err.to_string().contains("nope.txt"));
    }

    #[test]
    fn json_is_written_pretty_and_parsable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out").join("rows.json");
        write_json_with_mkdir(&path, &vec![1, 2, 3]).unwrap();
        let parsed: Vec<i32> =
            serde_json::from_str(&read_to_string(&path).unwrap()).unwrap();
        assert_eq!(parsed, [1, 2, 3]);
    }
}
