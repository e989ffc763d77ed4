use std::fs::{self, File};
use std::io::{self, Write};
use std::path::Path;

use flate2::{write::GzEncoder, Compression, GzBuilder};
use tar::{Builder, EntryType, Header, HeaderMode};
use tempfile::NamedTempFile;

use super::sources::{EntryKind, ResolvedFile, SourceResolver};
use crate::error::BuildError;

/// Gzip-compressed tar of the files a copy step selects, held in a scratch
/// file that is removed when the archive is dropped.
#[derive(Debug)]
pub struct ContentArchive {
    file: NamedTempFile,
    size: u64,
    entries: usize,
}

impl ContentArchive {
    pub fn path(&self) -> &Path {
        self.file.path()
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn entries(&self) -> usize {
        self.entries
    }

    pub fn read_bytes(&self) -> Result<Vec<u8>, BuildError> {
        fs::read(self.file.path()).map_err(|err| failed("failed to read back archive", &err))
    }
}

struct CountingWriter<W> {
    inner: W,
    bytes_written: u64,
}

impl<W: Write> Write for CountingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let written = self.inner.write(buf)?;
        self.bytes_written = self
            .bytes_written
            .saturating_add(written.try_into().unwrap_or(u64::MAX));
        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Writes archives with relative entry paths and normalized headers (zero
/// timestamps and owners) so equal content yields equal bytes.
#[derive(Clone, Debug)]
pub struct ArchiveBuilder {
    resolver: SourceResolver,
}

impl ArchiveBuilder {
    pub(crate) fn new(resolver: SourceResolver) -> Self {
        Self { resolver }
    }

    pub fn build(&self, sources: &[String]) -> Result<ContentArchive, BuildError> {
        let files = self.resolver.resolve(sources).map_err(|err| match err {
            BuildError::ContentUnreadable { path, reason } => BuildError::ArchiveCreationFailed {
                reason: format!("{path}: {reason}"),
            },
            other => other,
        })?;
        if files.is_empty() {
            return Err(BuildError::ArchiveCreationFailed {
                reason: "no files matched the copy sources".into(),
            });
        }
        let scratch =
            NamedTempFile::new().map_err(|err| failed("failed to create scratch archive", &err))?;
        let writer = CountingWriter {
            inner: scratch,
            bytes_written: 0,
        };
        let encoder = GzBuilder::new().mtime(0).write(writer, Compression::default());
        let mut builder = Builder::new(encoder);
        builder.mode(HeaderMode::Deterministic);
        for file in &files {
            append_file(&mut builder, file)?;
        }
        let encoder = builder
            .into_inner()
            .map_err(|err| failed("failed to finalize archive", &err))?;
        let mut writer = encoder
            .finish()
            .map_err(|err| failed("failed to finish compression", &err))?;
        writer
            .flush()
            .map_err(|err| failed("failed to flush archive", &err))?;
        let CountingWriter {
            inner: file,
            bytes_written: size,
        } = writer;
        tracing::debug!(
            path = %file.path().display(),
            entries = files.len(),
            bytes = size,
            "content_archive_created"
        );
        Ok(ContentArchive {
            file,
            size,
            entries: files.len(),
        })
    }
}

fn append_file(
    builder: &mut Builder<GzEncoder<CountingWriter<NamedTempFile>>>,
    file: &ResolvedFile,
) -> Result<(), BuildError> {
    let metadata = fs::symlink_metadata(&file.absolute)
        .map_err(|err| failed(&format!("failed to read metadata of {}", file.relative), &err))?;
    let mut header = Header::new_gnu();
    header.set_metadata_in_mode(&metadata, HeaderMode::Deterministic);
    header.set_mtime(0);
    header.set_uid(0);
    header.set_gid(0);
    header
        .set_username("")
        .and_then(|()| header.set_groupname(""))
        .map_err(|err| failed("failed to write archive header", &err))?;
    let added = match &file.kind {
        EntryKind::Symlink { target } => {
            header.set_entry_type(EntryType::Symlink);
            header.set_size(0);
            builder.append_link(&mut header, &file.relative, target)
        }
        EntryKind::File => {
            let source = File::open(&file.absolute)
                .map_err(|err| failed(&format!("failed to open {}", file.relative), &err))?;
            builder.append_data(&mut header, &file.relative, source)
        }
    };
    added.map_err(|err| failed(&format!("failed to add {} to archive", file.relative), &err))
}

fn failed(context: &str, err: &io::Error) -> BuildError {
    BuildError::ArchiveCreationFailed {
        reason: format!("{context}: {err}"),
    }
}

#[cfg(test)]
mod tests {
    use std::io::Read;

    use flate2::read::GzDecoder;
    use tar::Archive;
    use tempfile::tempdir;

    use super::*;

    #[test]
    fn archive_holds_relative_paths_with_normalized_headers() -> anyhow::Result<()> {
        let temp = tempdir()?;
        fs::create_dir_all(temp.path().join("app/lib"))?;
        fs::write(temp.path().join("app/main.py"), "print('hi')")?;
        fs::write(temp.path().join("app/lib/util.py"), "X = 1")?;

        let resolver = SourceResolver::new(temp.path(), &[])?;
        let sources = ["app".to_string(), "app/*.py".to_string()];
        let archive = ArchiveBuilder::new(resolver).build(&sources)?;
        assert_eq!(archive.entries(), 2);
        assert_eq!(archive.size(), fs::metadata(archive.path())?.len());

        let bytes = archive.read_bytes()?;
        let mut reader = Archive::new(GzDecoder::new(bytes.as_slice()));
        let mut seen = Vec::new();
        for entry in reader.entries()? {
            let mut entry = entry?;
            let header = entry.header();
            assert_eq!(header.mtime()?, 0);
            assert_eq!(header.uid()?, 0);
            assert_eq!(header.username()?, Some(""));
            let path = entry.path()?.display().to_string();
            let mut contents = String::new();
            entry.read_to_string(&mut contents)?;
            seen.push((path, contents));
        }
        assert_eq!(
            seen,
            vec![
                ("app/lib/util.py".to_string(), "X = 1".to_string()),
                ("app/main.py".to_string(), "print('hi')".to_string()),
            ]
        );
        Ok(())
    }

    #[test]
    fn scratch_file_is_removed_on_drop() -> anyhow::Result<()> {
        let temp = tempdir()?;
        fs::write(temp.path().join("f.txt"), "x")?;
        let resolver = SourceResolver::new(temp.path(), &[])?;
        let archive = ArchiveBuilder::new(resolver).build(&["f.txt".to_string()])?;
        let path = archive.path().to_path_buf();
        assert!(path.exists());
        drop(archive);
        assert!(!path.exists());
        Ok(())
    }

    #[test]
    fn unmatched_sources_fail_archive_creation() -> anyhow::Result<()> {
        let temp = tempdir()?;
        let resolver = SourceResolver::new(temp.path(), &[])?;
        let err = ArchiveBuilder::new(resolver)
            .build(&["*.none".to_string()])
            .expect_err("nothing to archive");
        assert_eq!(err.code(), "SBX111");
        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn symlinks_are_archived_as_links() -> anyhow::Result<()> {
        use std::os::unix::fs::symlink;

        let outside = tempdir()?;
        let secret = outside.path().join("secret.txt");
        fs::write(&secret, "TOP SECRET")?;
        let temp = tempdir()?;
        fs::create_dir_all(temp.path().join("app"))?;
        symlink(&secret, temp.path().join("app/link.txt"))?;

        let resolver = SourceResolver::new(temp.path(), &[])?;
        let archive = ArchiveBuilder::new(resolver).build(&["app".to_string()])?;
        let bytes = archive.read_bytes()?;
        let mut reader = Archive::new(GzDecoder::new(bytes.as_slice()));
        let mut entries = reader.entries()?;
        let mut entry = entries.next().expect("one entry")?;
        assert_eq!(entry.header().entry_type(), EntryType::Symlink);
        assert_eq!(
            entry.link_name()?.as_deref(),
            Some(secret.as_path())
        );
        let mut body = Vec::new();
        entry.read_to_end(&mut body)?;
        assert!(body.is_empty());
        drop(entry);
        assert!(entries.next().is_none());
        Ok(())
    }
}
