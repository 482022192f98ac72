use spacepackets::ByteConversionError;
use std::boxed::Box;
use std::io::{Read, Seek, Write};
use std::string::String;

use crate::pdu::tlv::{FilestoreActionCode, FilestoreRequest};
use crate::pdu::ChecksumType;
pub use std_mod::*;

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum FilestoreError {
    #[error("file does not exist")]
    FileDoesNotExist,
    #[error("file already exists")]
    FileAlreadyExists,
    #[error("directory does not exist")]
    DirDoesNotExist,
    #[error("permission error")]
    Permission,
    #[error("is not a file")]
    IsNotFile,
    #[error("is not a directory")]
    IsNotDirectory,
    #[error("path {0} leaves the filestore root")]
    PathOutsideRoot(String),
    #[error("byte conversion: {0}")]
    ByteConversion(#[from] ByteConversionError),
    #[error("IO error: {0})")]
    Io(#[from] std::io::Error),
    #[error("checksum type not implemented: {0:?}")]
    ChecksumTypeNotImplemented(ChecksumType),
    #[error("utf8 error")]
    Utf8Error,
}

/// Open file which can be read, written and positioned.
pub trait FileHandle: Read + Write + Seek + Send {}

impl<T: Read + Write + Seek + Send> FileHandle for T {}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum OpenMode {
    Read,
    /// Create the file if it does not exist and truncate it otherwise.
    Write,
    /// Create the file if it does not exist, keep existing content.
    ReadWrite,
}

/// Abstraction of the filestore used by a CFDP entity.
///
/// All paths are POSIX style virtual paths. Implementations map them to the underlying storage.
/// The trait is object safe so the state machines can work on a `&dyn VirtualFilestore`.
pub trait VirtualFilestore: Send + Sync {
    fn create_file(&self, file_path: &str) -> Result<(), FilestoreError>;

    fn remove_file(&self, file_path: &str) -> Result<(), FilestoreError>;

    /// Fails with [FilestoreError::FileAlreadyExists] if the new path already exists.
    fn rename_file(&self, old_path: &str, new_path: &str) -> Result<(), FilestoreError>;

    /// Append the content of the source file to the destination file.
    fn append_file(&self, dest_path: &str, source_path: &str) -> Result<(), FilestoreError>;

    /// Replace the content of the destination file with the content of the source file.
    fn replace_file(&self, dest_path: &str, source_path: &str) -> Result<(), FilestoreError>;

    fn remove_dir(&self, dir_path: &str, all: bool) -> Result<(), FilestoreError>;
    fn create_dir(&self, dir_path: &str) -> Result<(), FilestoreError>;

    /// Listing of the directory content in CSV format.
    ///
    /// The first line is the header `type,path,size,timestamp`. Each following line describes
    /// one entry with the type `d` for directories and `f` for files, the virtual path, the size
    /// in bytes and the modification time in seconds since the UNIX epoch.
    fn list_directory(&self, dir_path: &str) -> Result<String, FilestoreError>;

    fn open(&self, file_path: &str, mode: OpenMode) -> Result<Box<dyn FileHandle>, FilestoreError>;

    /// Anonymous file which is removed once the handle is dropped.
    fn open_tempfile(&self) -> Result<Box<dyn FileHandle>, FilestoreError>;

    fn is_file(&self, path: &str) -> Result<bool, FilestoreError>;

    fn is_dir(&self, path: &str) -> Result<bool, FilestoreError> {
        Ok(!self.is_file(path)?)
    }

    fn exists(&self, path: &str) -> Result<bool, FilestoreError>;

    /// Extract the file name part of a full path.
    ///
    /// This method should behave similarly to the [std::path::Path::file_name] method.
    fn file_name<'a>(&self, full_path: &'a str) -> Result<Option<&'a str>, FilestoreError>;

    fn file_size(&self, path: &str) -> Result<u64, FilestoreError>;

    /// This special function is the CFDP specific abstraction to calculate the checksum of a file.
    ///
    /// The passed verification buffer argument will be used by the specific implementation as
    /// a buffer to read the file into. It is recommended to use common buffer sizes like
    /// 4096 or 8192 bytes.
    fn calculate_checksum(
        &self,
        file_path: &str,
        checksum_type: ChecksumType,
        size_to_verify: u64,
        verification_buf: &mut [u8],
    ) -> Result<u32, FilestoreError> {
        if checksum_type == ChecksumType::NullChecksum {
            return Ok(0);
        }
        let mut file = self.open(file_path, OpenMode::Read)?;
        calculate_checksum(&mut file, checksum_type, size_to_verify, verification_buf)
    }
}

/// Execute one filestore request received with a Metadata PDU.
///
/// Deny requests succeed when the denied file or directory does not exist.
pub fn execute_filestore_request(
    filestore: &dyn VirtualFilestore,
    request: &FilestoreRequest,
) -> Result<(), FilestoreError> {
    let first = request.first_name.as_str();
    let second = || {
        request
            .second_name
            .as_deref()
            .ok_or(FilestoreError::FileDoesNotExist)
    };
    match request.action_code {
        FilestoreActionCode::CreateFile => filestore.create_file(first),
        FilestoreActionCode::DeleteFile => filestore.remove_file(first),
        FilestoreActionCode::RenameFile => filestore.rename_file(first, second()?),
        FilestoreActionCode::AppendFile => filestore.append_file(first, second()?),
        FilestoreActionCode::ReplaceFile => filestore.replace_file(first, second()?),
        FilestoreActionCode::CreateDirectory => filestore.create_dir(first),
        FilestoreActionCode::RemoveDirectory => filestore.remove_dir(first, false),
        FilestoreActionCode::DenyFile => {
            if filestore.exists(first)? {
                filestore.remove_file(first)?;
            }
            Ok(())
        }
        FilestoreActionCode::DenyDirectory => {
            if filestore.exists(first)? {
                filestore.remove_dir(first, true)?;
            }
            Ok(())
        }
    }
}

/// Checksum over the first `size_to_verify` bytes read from the current position of the
/// reader. Only the modular and the null checksum are implemented.
pub fn calculate_checksum<R: Read + ?Sized>(
    reader: &mut R,
    checksum_type: ChecksumType,
    size_to_verify: u64,
    verification_buf: &mut [u8],
) -> Result<u32, FilestoreError> {
    match checksum_type {
        ChecksumType::NullChecksum => Ok(0),
        ChecksumType::Modular => calc_modular_checksum(reader, size_to_verify, verification_buf),
        _ => Err(FilestoreError::ChecksumTypeNotImplemented(checksum_type)),
    }
}

/// Wrapping sum of all big endian 32 bit words, the last word is padded with zeros.
fn calc_modular_checksum<R: Read + ?Sized>(
    reader: &mut R,
    size_to_verify: u64,
    verification_buf: &mut [u8],
) -> Result<u32, FilestoreError> {
    if verification_buf.is_empty() && size_to_verify > 0 {
        return Err(ByteConversionError::ToSliceTooSmall {
            found: 0,
            expected: 1,
        }
        .into());
    }
    let mut checksum: u32 = 0;
    let mut position: u64 = 0;
    while position < size_to_verify {
        let bytes_to_read = (size_to_verify - position).min(verification_buf.len() as u64) as usize;
        let bytes_read = reader.read(&mut verification_buf[0..bytes_to_read])?;
        if bytes_read == 0 {
            break;
        }
        for byte in &verification_buf[0..bytes_read] {
            let shift = 8 * (3 - (position % 4) as u32);
            checksum = checksum.wrapping_add(u32::from(*byte) << shift);
            position += 1;
        }
    }
    Ok(checksum)
}

pub mod std_mod {
    use super::*;
    use std::{
        fs::{self, File, OpenOptions},
        io,
        path::{Component, Path, PathBuf},
        string::ToString,
        time::UNIX_EPOCH,
        vec::Vec,
    };

    /// Filestore on top of the native file system.
    ///
    /// Virtual paths are resolved relative to the root directory. The default root is `/`, which
    /// maps virtual paths one to one to native paths.
    #[derive(Debug, Clone)]
    pub struct NativeFilestore {
        root: PathBuf,
    }

    impl Default for NativeFilestore {
        fn default() -> Self {
            Self::new("/")
        }
    }

    impl NativeFilestore {
        pub fn new(root: impl AsRef<Path>) -> Self {
            Self {
                root: root.as_ref().to_path_buf(),
            }
        }

        pub fn root(&self) -> &Path {
            &self.root
        }

        /// Native path of a virtual path.
        pub fn native_path(&self, virtual_path: &str) -> Result<PathBuf, FilestoreError> {
            let mut native = self.root.clone();
            for component in Path::new(virtual_path).components() {
                match component {
                    Component::Normal(part) => native.push(part),
                    Component::RootDir | Component::CurDir => (),
                    Component::ParentDir | Component::Prefix(_) => {
                        return Err(FilestoreError::PathOutsideRoot(virtual_path.to_string()))
                    }
                }
            }
            Ok(native)
        }

        fn existing_file(&self, file_path: &str) -> Result<PathBuf, FilestoreError> {
            let path = self.native_path(file_path)?;
            if !path.exists() {
                return Err(FilestoreError::FileDoesNotExist);
            }
            if !path.is_file() {
                return Err(FilestoreError::IsNotFile);
            }
            Ok(path)
        }

        fn existing_dir(&self, dir_path: &str) -> Result<PathBuf, FilestoreError> {
            let path = self.native_path(dir_path)?;
            if !path.exists() {
                return Err(FilestoreError::DirDoesNotExist);
            }
            if !path.is_dir() {
                return Err(FilestoreError::IsNotDirectory);
            }
            Ok(path)
        }
    }

    impl VirtualFilestore for NativeFilestore {
        fn create_file(&self, file_path: &str) -> Result<(), FilestoreError> {
            if self.exists(file_path)? {
                return Err(FilestoreError::FileAlreadyExists);
            }
            File::create(self.native_path(file_path)?)?;
            Ok(())
        }

        fn remove_file(&self, file_path: &str) -> Result<(), FilestoreError> {
            fs::remove_file(self.existing_file(file_path)?)?;
            Ok(())
        }

        fn rename_file(&self, old_path: &str, new_path: &str) -> Result<(), FilestoreError> {
            let old = self.existing_file(old_path)?;
            if self.exists(new_path)? {
                return Err(FilestoreError::FileAlreadyExists);
            }
            fs::rename(old, self.native_path(new_path)?)?;
            Ok(())
        }

        fn append_file(&self, dest_path: &str, source_path: &str) -> Result<(), FilestoreError> {
            let source = self.existing_file(source_path)?;
            let dest = self.existing_file(dest_path)?;
            let mut source_file = File::open(source)?;
            let mut dest_file = OpenOptions::new().append(true).open(dest)?;
            io::copy(&mut source_file, &mut dest_file)?;
            Ok(())
        }

        fn replace_file(&self, dest_path: &str, source_path: &str) -> Result<(), FilestoreError> {
            let source = self.existing_file(source_path)?;
            let dest = self.existing_file(dest_path)?;
            fs::copy(source, dest)?;
            Ok(())
        }

        fn create_dir(&self, dir_path: &str) -> Result<(), FilestoreError> {
            fs::create_dir(self.native_path(dir_path)?)?;
            Ok(())
        }

        fn remove_dir(&self, dir_path: &str, all: bool) -> Result<(), FilestoreError> {
            let path = self.existing_dir(dir_path)?;
            if !all {
                fs::remove_dir(path)?;
                return Ok(());
            }
            fs::remove_dir_all(path)?;
            Ok(())
        }

        fn list_directory(&self, dir_path: &str) -> Result<String, FilestoreError> {
            let path = self.existing_dir(dir_path)?;
            let mut entries = fs::read_dir(path)?.collect::<Result<Vec<_>, _>>()?;
            entries.sort_by_key(|entry| entry.file_name());
            let mut listing = String::from("type,path,size,timestamp\n");
            for entry in entries {
                let metadata = entry.metadata()?;
                let name = entry
                    .file_name()
                    .into_string()
                    .map_err(|_| FilestoreError::Utf8Error)?;
                let timestamp = metadata
                    .modified()
                    .ok()
                    .and_then(|time| time.duration_since(UNIX_EPOCH).ok())
                    .map(|elapsed| elapsed.as_secs())
                    .unwrap_or(0);
                let (entry_type, size) = if metadata.is_dir() {
                    ('d', 0)
                } else {
                    ('f', metadata.len())
                };
                listing.push_str(&std::format!(
                    "{},{},{},{}\n",
                    entry_type,
                    join_virtual_path(dir_path, &name),
                    size,
                    timestamp
                ));
            }
            Ok(listing)
        }

        fn open(
            &self,
            file_path: &str,
            mode: OpenMode,
        ) -> Result<Box<dyn FileHandle>, FilestoreError> {
            let file = match mode {
                OpenMode::Read => File::open(self.existing_file(file_path)?)?,
                OpenMode::Write => File::create(self.native_path(file_path)?)?,
                OpenMode::ReadWrite => OpenOptions::new()
                    .read(true)
                    .write(true)
                    .create(true)
                    .truncate(false)
                    .open(self.native_path(file_path)?)?,
            };
            Ok(Box::new(file))
        }

        fn open_tempfile(&self) -> Result<Box<dyn FileHandle>, FilestoreError> {
            Ok(Box::new(tempfile::tempfile()?))
        }

        fn is_file(&self, str_path: &str) -> Result<bool, FilestoreError> {
            let path = self.native_path(str_path)?;
            if !path.exists() {
                return Err(FilestoreError::FileDoesNotExist);
            }
            Ok(path.is_file())
        }

        fn exists(&self, path: &str) -> Result<bool, FilestoreError> {
            Ok(self.native_path(path)?.exists())
        }

        fn file_name<'a>(&self, full_path: &'a str) -> Result<Option<&'a str>, FilestoreError> {
            let path = Path::new(full_path);
            path.file_name()
                .map(|s| s.to_str())
                .ok_or(FilestoreError::Utf8Error)
        }

        fn file_size(&self, str_path: &str) -> Result<u64, FilestoreError> {
            Ok(self.existing_file(str_path)?.metadata()?.len())
        }
    }

    /// Join a virtual directory path and an entry name with exactly one separator.
    pub fn join_virtual_path(dir_path: &str, name: &str) -> String {
        let mut joined = String::from(dir_path.trim_end_matches('/'));
        joined.push('/');
        joined.push_str(name.trim_start_matches('/'));
        joined
    }
}

#[cfg(test)]
mod tests {
    use std::{fs, io::SeekFrom, println, string::ToString};

    use super::*;
    use alloc::format;
    use tempfile::tempdir;

    const EXAMPLE_DATA_CFDP: [u8; 15] = [
        0x00, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x09, 0x0A, 0x0B, 0x0C, 0x0D, 0x0E,
    ];

    fn tmp_filestore() -> (tempfile::TempDir, NativeFilestore) {
        let tmpdir = tempdir().expect("creating tmpdir failed");
        let filestore = NativeFilestore::new(tmpdir.path());
        (tmpdir, filestore)
    }

    #[test]
    fn test_virtual_path_mapping() {
        let (tmpdir, filestore) = tmp_filestore();
        assert_eq!(
            filestore.native_path("/a/b.txt").unwrap(),
            tmpdir.path().join("a").join("b.txt")
        );
        assert_eq!(
            filestore.native_path("c.txt").unwrap(),
            tmpdir.path().join("c.txt")
        );
        assert!(matches!(
            filestore.native_path("/../etc/passwd"),
            Err(FilestoreError::PathOutsideRoot(_))
        ));
    }

    #[test]
    fn test_basic_native_filestore_create() {
        let (tmpdir, filestore) = tmp_filestore();
        filestore.create_file("/test.txt").unwrap();
        assert!(tmpdir.path().join("test.txt").exists());
        assert!(filestore.exists("/test.txt").unwrap());
        assert!(filestore.is_file("/test.txt").unwrap());
    }

    #[test]
    fn test_file_already_exists() {
        let (_tmpdir, filestore) = tmp_filestore();
        filestore.create_file("/test.txt").unwrap();
        let error = filestore.create_file("/test.txt").unwrap_err();
        if let FilestoreError::FileAlreadyExists = error {
            assert_eq!(error.to_string(), "file already exists");
        } else {
            panic!("unexpected error");
        }
    }

    #[test]
    fn test_basic_native_fs_dir_exists() {
        let (_tmpdir, filestore) = tmp_filestore();
        assert!(!filestore.exists("/testdir").unwrap());
        filestore.create_dir("/testdir").unwrap();
        assert!(filestore.exists("/testdir").unwrap());
        assert!(filestore.is_dir("/testdir").unwrap());
    }

    #[test]
    fn test_basic_native_fs_remove_file() {
        let (_tmpdir, filestore) = tmp_filestore();
        filestore.create_file("/test.txt").unwrap();
        filestore.remove_file("/test.txt").unwrap();
        assert!(!filestore.exists("/test.txt").unwrap());
    }

    #[test]
    fn test_remove_file_which_does_not_exist() {
        let (_tmpdir, filestore) = tmp_filestore();
        let error = filestore.remove_file("/test.txt").unwrap_err();
        if let FilestoreError::FileDoesNotExist = error {
            assert_eq!(error.to_string(), "file does not exist");
        } else {
            panic!("unexpected error");
        }
    }

    #[test]
    fn test_remove_dir_with_file_api() {
        let (_tmpdir, filestore) = tmp_filestore();
        filestore.create_dir("/test").unwrap();
        let error = filestore.remove_file("/test").unwrap_err();
        if let FilestoreError::IsNotFile = error {
            assert_eq!(error.to_string(), "is not a file");
        } else {
            panic!("unexpected error");
        }
    }

    #[test]
    fn test_rename_file() {
        let (tmpdir, filestore) = tmp_filestore();
        fs::write(tmpdir.path().join("old.txt"), "hello").unwrap();
        filestore.rename_file("/old.txt", "/new.txt").unwrap();
        assert!(!filestore.exists("/old.txt").unwrap());
        assert_eq!(
            fs::read_to_string(tmpdir.path().join("new.txt")).unwrap(),
            "hello"
        );
        filestore.create_file("/old.txt").unwrap();
        assert!(matches!(
            filestore.rename_file("/old.txt", "/new.txt"),
            Err(FilestoreError::FileAlreadyExists)
        ));
    }

    #[test]
    fn test_append_and_replace_file() {
        let (tmpdir, filestore) = tmp_filestore();
        fs::write(tmpdir.path().join("a.txt"), "hello ").unwrap();
        fs::write(tmpdir.path().join("b.txt"), "world").unwrap();
        filestore.append_file("/a.txt", "/b.txt").unwrap();
        assert_eq!(
            fs::read_to_string(tmpdir.path().join("a.txt")).unwrap(),
            "hello world"
        );
        filestore.replace_file("/a.txt", "/b.txt").unwrap();
        assert_eq!(
            fs::read_to_string(tmpdir.path().join("a.txt")).unwrap(),
            "world"
        );
        assert!(matches!(
            filestore.append_file("/a.txt", "/missing.txt"),
            Err(FilestoreError::FileDoesNotExist)
        ));
    }

    #[test]
    fn test_file_size() {
        let (tmpdir, filestore) = tmp_filestore();
        fs::write(tmpdir.path().join("test.txt"), [1, 2, 3, 4, 5, 6, 7, 8]).unwrap();
        assert_eq!(filestore.file_size("/test.txt").unwrap(), 8);
        assert!(matches!(
            filestore.file_size("/missing.txt"),
            Err(FilestoreError::FileDoesNotExist)
        ));
    }

    #[test]
    fn test_remove_dir() {
        let (_tmpdir, filestore) = tmp_filestore();
        filestore.create_dir("/testdir").unwrap();
        filestore.remove_dir("/testdir", false).unwrap();
        assert!(!filestore.exists("/testdir").unwrap());
    }

    #[test]
    fn test_remove_dir_remove_all() {
        let (_tmpdir, filestore) = tmp_filestore();
        filestore.create_dir("/test").unwrap();
        filestore.create_file("/test/test.txt").unwrap();
        assert!(filestore.remove_dir("/test", false).is_err());
        filestore.remove_dir("/test", true).unwrap();
        assert!(!filestore.exists("/test").unwrap());
    }

    #[test]
    fn test_remove_dir_which_does_not_exist() {
        let (_tmpdir, filestore) = tmp_filestore();
        let error = filestore.remove_dir("/test", true).unwrap_err();
        if let FilestoreError::DirDoesNotExist = error {
            assert_eq!(error.to_string(), "directory does not exist");
        } else {
            panic!("unexpected error");
        }
    }

    #[test]
    fn test_remove_file_with_dir_api() {
        let (_tmpdir, filestore) = tmp_filestore();
        filestore.create_file("/test.txt").unwrap();
        let error = filestore.remove_dir("/test.txt", true).unwrap_err();
        if let FilestoreError::IsNotDirectory = error {
            assert_eq!(error.to_string(), "is not a directory");
        } else {
            panic!("unexpected error");
        }
    }

    #[test]
    fn test_list_directory() {
        let (tmpdir, filestore) = tmp_filestore();
        filestore.create_dir("/logs").unwrap();
        filestore.create_dir("/logs/old").unwrap();
        fs::write(tmpdir.path().join("logs").join("a.log"), [0; 12]).unwrap();
        let listing = filestore.list_directory("/logs/").unwrap();
        println!("{}", listing);
        let lines: std::vec::Vec<&str> = listing.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], "type,path,size,timestamp");
        assert!(lines[1].starts_with("f,/logs/a.log,12,"));
        assert!(lines[2].starts_with("d,/logs/old,0,"));
        assert!(matches!(
            filestore.list_directory("/missing"),
            Err(FilestoreError::DirDoesNotExist)
        ));
    }

    #[test]
    fn test_open_modes() {
        let (_tmpdir, filestore) = tmp_filestore();
        assert!(matches!(
            filestore.open("/test.bin", OpenMode::Read),
            Err(FilestoreError::FileDoesNotExist)
        ));
        let mut handle = filestore.open("/test.bin", OpenMode::Write).unwrap();
        handle.write_all(&[1, 2, 3]).unwrap();
        drop(handle);
        let mut handle = filestore.open("/test.bin", OpenMode::ReadWrite).unwrap();
        handle.seek(SeekFrom::End(0)).unwrap();
        handle.write_all(&[4]).unwrap();
        drop(handle);
        let mut handle = filestore.open("/test.bin", OpenMode::Read).unwrap();
        let mut content = std::vec::Vec::new();
        handle.read_to_end(&mut content).unwrap();
        assert_eq!(content, [1, 2, 3, 4]);
    }

    #[test]
    fn test_tempfile() {
        let (tmpdir, filestore) = tmp_filestore();
        let mut handle = filestore.open_tempfile().unwrap();
        handle.write_all(&EXAMPLE_DATA_CFDP).unwrap();
        handle.seek(SeekFrom::Start(0)).unwrap();
        let mut content = std::vec::Vec::new();
        handle.read_to_end(&mut content).unwrap();
        assert_eq!(content, EXAMPLE_DATA_CFDP);
        assert_eq!(fs::read_dir(tmpdir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_empty_verification_buffer() {
        let mut cursor = std::io::Cursor::new(std::vec![1, 2]);
        let error = calculate_checksum(&mut cursor, ChecksumType::Modular, 2, &mut []).unwrap_err();
        if let FilestoreError::ByteConversion(byte_conv_error) = error {
            if let ByteConversionError::ToSliceTooSmall { found, expected } = byte_conv_error {
                assert_eq!(found, 0);
                assert_eq!(expected, 1);
            } else {
                panic!("unexpected error");
            }
            assert_eq!(
                error.to_string(),
                format!("byte conversion: {}", byte_conv_error)
            );
        } else {
            panic!("unexpected error");
        }
    }

    #[test]
    fn test_filename_extraction() {
        let (_tmpdir, filestore) = tmp_filestore();
        assert_eq!(filestore.file_name("/a/b/c.txt").unwrap(), Some("c.txt"));
    }

    #[test]
    fn test_join_virtual_path() {
        assert_eq!(join_virtual_path("/logs/", "a.log"), "/logs/a.log");
        assert_eq!(join_virtual_path("/logs", "/a.log"), "/logs/a.log");
        assert_eq!(join_virtual_path("/", "a.log"), "/a.log");
    }

    #[test]
    fn test_modular_checksum() {
        let (tmpdir, filestore) = tmp_filestore();
        fs::write(tmpdir.path().join("mod-crc.bin"), EXAMPLE_DATA_CFDP)
            .expect("writing test file failed");
        // Kind of re-writing the modular checksum impl here which we are trying to test, but the
        // numbers/correctness were verified manually using calculators, so this is okay.
        let mut checksum: u32 = 0;
        let mut buffer: [u8; 4] = [0; 4];
        for i in 0..3 {
            buffer = EXAMPLE_DATA_CFDP[i * 4..(i + 1) * 4].try_into().unwrap();
            checksum = checksum.wrapping_add(u32::from_be_bytes(buffer));
        }
        buffer[0..3].copy_from_slice(&EXAMPLE_DATA_CFDP[12..15]);
        buffer[3] = 0;
        checksum = checksum.wrapping_add(u32::from_be_bytes(buffer));
        // A verification buffer which is not a multiple of the word size must not matter.
        for buf_len in [32, 3, 1] {
            let mut verif_buf = std::vec![0; buf_len];
            let result = filestore.calculate_checksum(
                "/mod-crc.bin",
                ChecksumType::Modular,
                EXAMPLE_DATA_CFDP.len() as u64,
                &mut verif_buf,
            );
            assert_eq!(result.unwrap(), checksum);
        }
    }

    #[test]
    fn test_modular_checksum_over_handle() {
        let mut cursor =
            std::io::Cursor::new(std::vec![0xff, 0xff, 0xff, 0xff, 0x00, 0x00, 0x00, 0x02]);
        let checksum =
            calculate_checksum(&mut cursor, ChecksumType::Modular, 8, &mut [0; 16]).unwrap();
        assert_eq!(checksum, 1);
    }

    #[test]
    fn test_null_checksum_impl() {
        let (_tmpdir, filestore) = tmp_filestore();
        // The file to check does not even need to exist, and the verification buffer can be
        // empty: the null checksum is always yields the same result.
        let result =
            filestore.calculate_checksum("/mod-crc.bin", ChecksumType::NullChecksum, 0, &mut []);
        assert_eq!(result.unwrap(), 0);
    }

    #[test]
    fn test_checksum_not_implemented() {
        let mut cursor = std::io::Cursor::new(std::vec![0; 4]);
        let error = calculate_checksum(&mut cursor, ChecksumType::Crc32Proximity1, 4, &mut [0; 4])
            .unwrap_err();
        if let FilestoreError::ChecksumTypeNotImplemented(cksum_type) = error {
            assert_eq!(
                error.to_string(),
                format!("checksum type not implemented: {:?}", cksum_type)
            );
        } else {
            panic!("unexpected error");
        }
    }

    #[test]
    fn test_execute_filestore_requests() {
        let (tmpdir, filestore) = tmp_filestore();
        execute_filestore_request(&filestore, &FilestoreRequest::new_create_directory("/out"))
            .unwrap();
        execute_filestore_request(&filestore, &FilestoreRequest::new_create_file("/out/a.txt"))
            .unwrap();
        execute_filestore_request(
            &filestore,
            &FilestoreRequest::new_rename_file("/out/a.txt", "/out/b.txt"),
        )
        .unwrap();
        assert!(tmpdir.path().join("out").join("b.txt").exists());
        assert!(matches!(
            execute_filestore_request(&filestore, &FilestoreRequest::new_delete_file("/out/a.txt")),
            Err(FilestoreError::FileDoesNotExist)
        ));
        execute_filestore_request(&filestore, &FilestoreRequest::new_deny_file("/out/b.txt"))
            .unwrap();
        assert!(!tmpdir.path().join("out").join("b.txt").exists());
        // Denying something which does not exist is not an error.
        execute_filestore_request(&filestore, &FilestoreRequest::new_deny_file("/out/b.txt"))
            .unwrap();
        execute_filestore_request(&filestore, &FilestoreRequest::new_deny_directory("/out"))
            .unwrap();
        assert!(!tmpdir.path().join("out").exists());
        execute_filestore_request(&filestore, &FilestoreRequest::new_deny_directory("/out"))
            .unwrap();
    }
}
