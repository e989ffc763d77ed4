use std::fs::{self, File, Metadata};
use std::io::Read;
use std::time::UNIX_EPOCH;

use sha2::{Digest, Sha256};

use sbx_domain::{CopyStep, FileContext, Fingerprint};

use super::sources::{EntryKind, ResolvedFile, SourceResolver};
use crate::error::BuildError;

/// Fingerprint of one copy step plus the number of bytes it selects.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct StepContent {
    pub fingerprint: Fingerprint,
    pub content_length: u64,
    pub files: usize,
}

/// Computes content fingerprints over the build context.
///
/// The digest covers the `COPY` command text and, for every selected file in
/// lexicographic order of its relative path, the path, mode bits, size,
/// modification time in milliseconds and the raw bytes. Equal inputs give
/// equal fingerprints regardless of directory enumeration order.
#[derive(Clone, Debug)]
pub struct Fingerprinter {
    resolver: SourceResolver,
}

impl Fingerprinter {
    pub fn new(context: &FileContext) -> Result<Self, BuildError> {
        Ok(Self {
            resolver: SourceResolver::new(&context.root, &context.ignore_patterns)?,
        })
    }

    pub(crate) fn resolver(&self) -> &SourceResolver {
        &self.resolver
    }

    pub fn fingerprint(
        &self,
        sources: &[String],
        destination: &str,
    ) -> Result<Fingerprint, BuildError> {
        self.digest(sources, destination).map(|(fp, _, _)| fp)
    }

    /// One source hashes directly; several sources hash one by one and the
    /// per-source fingerprints are folded with [`combine`].
    pub fn fingerprint_step(&self, step: &CopyStep) -> Result<StepContent, BuildError> {
        if step.sources.len() == 1 {
            let (fingerprint, content_length, files) =
                self.digest(&step.sources, &step.destination)?;
            return Ok(StepContent {
                fingerprint,
                content_length,
                files,
            });
        }
        let mut parts = Vec::with_capacity(step.sources.len());
        for source in &step.sources {
            let single = std::slice::from_ref(source);
            parts.push(self.digest(single, &step.destination)?.0);
        }
        let selected = self.resolver.resolve(&step.sources)?;
        let content_length = total_size(&selected)?;
        Ok(StepContent {
            fingerprint: combine(&parts),
            content_length,
            files: selected.len(),
        })
    }

    fn digest(
        &self,
        sources: &[String],
        destination: &str,
    ) -> Result<(Fingerprint, u64, usize), BuildError> {
        let files = self.resolver.resolve(sources)?;
        let mut hasher = Sha256::new();
        hasher.update(format!("COPY {} {}", sources.join(" "), destination).as_bytes());
        let mut total = 0u64;
        let mut buf = [0u8; 64 * 1024];
        for file in &files {
            let metadata = metadata(file)?;
            hasher.update(file.relative.as_bytes());
            hasher.update(mode_bits(&metadata).to_string().as_bytes());
            hasher.update(metadata.len().to_string().as_bytes());
            hasher.update(modified_millis(&metadata).to_string().as_bytes());
            match &file.kind {
                EntryKind::Symlink { target } => {
                    hasher.update(target.to_string_lossy().as_bytes());
                }
                EntryKind::File => {
                    let mut handle =
                        File::open(&file.absolute).map_err(|err| unreadable(file, &err))?;
                    loop {
                        let read = handle.read(&mut buf).map_err(|err| unreadable(file, &err))?;
                        if read == 0 {
                            break;
                        }
                        hasher.update(&buf[..read]);
                    }
                    total = total.saturating_add(metadata.len());
                }
            }
        }
        let fingerprint = Fingerprint::from_digest(&hasher.finalize());
        tracing::debug!(
            fingerprint = fingerprint.short(),
            files = files.len(),
            bytes = total,
            "content_fingerprinted"
        );
        Ok((fingerprint, total, files.len()))
    }
}

/// Deterministic, order-sensitive fold of several fingerprints.
pub fn combine(fingerprints: &[Fingerprint]) -> Fingerprint {
    let mut hasher = Sha256::new();
    for fingerprint in fingerprints {
        hasher.update(fingerprint.as_str().as_bytes());
    }
    Fingerprint::from_digest(&hasher.finalize())
}

/// Bytes of regular file content; symlinks contribute nothing.
fn total_size(files: &[ResolvedFile]) -> Result<u64, BuildError> {
    files
        .iter()
        .filter(|file| file.kind == EntryKind::File)
        .try_fold(0u64, |acc, file| Ok(acc.saturating_add(metadata(file)?.len())))
}

/// Metadata of the entry itself, never of a symlink's target.
fn metadata(file: &ResolvedFile) -> Result<Metadata, BuildError> {
    fs::symlink_metadata(&file.absolute).map_err(|err| unreadable(file, &err))
}

fn unreadable(file: &ResolvedFile, err: &std::io::Error) -> BuildError {
    BuildError::ContentUnreadable {
        path: file.relative.clone(),
        reason: err.to_string(),
    }
}

#[cfg(unix)]
fn mode_bits(metadata: &Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode()
}

#[cfg(not(unix))]
fn mode_bits(metadata: &Metadata) -> u32 {
    if metadata.permissions().readonly() {
        0o100_444
    } else {
        0o100_644
    }
}

fn modified_millis(metadata: &Metadata) -> u128 {
    metadata
        .modified()
        .ok()
        .and_then(|time| time.duration_since(UNIX_EPOCH).ok())
        .map_or(0, |elapsed| elapsed.as_millis())
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use filetime::{set_file_mtime, FileTime};
    use tempfile::tempdir;

    use super::*;

    fn pin_mtime(path: &Path) -> anyhow::Result<()> {
        set_file_mtime(path, FileTime::from_unix_time(1_700_000_000, 0))?;
        Ok(())
    }

    fn write_pinned(path: &Path, contents: &str) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, contents)?;
        pin_mtime(path)
    }

    fn context(root: &Path) -> FileContext {
        FileContext {
            root: root.to_path_buf(),
            ignore_patterns: Vec::new(),
        }
    }

    #[test]
    fn fingerprint_ignores_creation_order() -> anyhow::Result<()> {
        let first = tempdir()?;
        let second = tempdir()?;
        for name in ["a.txt", "b/c.txt", "b/d.txt"] {
            write_pinned(&first.path().join(name), name)?;
        }
        for name in ["b/d.txt", "a.txt", "b/c.txt"] {
            write_pinned(&second.path().join(name), name)?;
        }
        let sources = vec![".".to_string()];
        let one = Fingerprinter::new(&context(first.path()))?.fingerprint(&sources, "/app")?;
        let two = Fingerprinter::new(&context(second.path()))?.fingerprint(&sources, "/app")?;
        assert_eq!(one, two);
        assert_eq!(one.as_str().len(), 64);
        Ok(())
    }

    #[test]
    fn single_byte_change_changes_fingerprint() -> anyhow::Result<()> {
        let temp = tempdir()?;
        let file = temp.path().join("data.bin");
        write_pinned(&file, "abcd")?;
        let fingerprinter = Fingerprinter::new(&context(temp.path()))?;
        let sources = vec!["data.bin".to_string()];
        let before = fingerprinter.fingerprint(&sources, "/data")?;
        write_pinned(&file, "abce")?;
        let after = fingerprinter.fingerprint(&sources, "/data")?;
        assert_ne!(before, after);
        Ok(())
    }

    #[test]
    fn destination_is_part_of_the_fingerprint() -> anyhow::Result<()> {
        let temp = tempdir()?;
        write_pinned(&temp.path().join("f"), "x")?;
        let fingerprinter = Fingerprinter::new(&context(temp.path()))?;
        let sources = vec!["f".to_string()];
        assert_ne!(
            fingerprinter.fingerprint(&sources, "/a")?,
            fingerprinter.fingerprint(&sources, "/b")?
        );
        Ok(())
    }

    #[test]
    fn combine_is_deterministic_and_order_sensitive() {
        let a = Fingerprint::from_digest(&[1; 32]);
        let b = Fingerprint::from_digest(&[2; 32]);
        let ab = combine(&[a.clone(), b.clone()]);
        assert_eq!(ab, combine(&[a.clone(), b.clone()]));
        assert_ne!(ab, combine(&[b, a]));
    }

    #[test]
    fn multi_source_steps_fold_per_source_fingerprints() -> anyhow::Result<()> {
        let temp = tempdir()?;
        write_pinned(&temp.path().join("one.txt"), "1")?;
        write_pinned(&temp.path().join("two.txt"), "22")?;
        let fingerprinter = Fingerprinter::new(&context(temp.path()))?;
        let step = CopyStep::new(vec!["one.txt".into(), "two.txt".into()], "/x");
        let content = fingerprinter.fingerprint_step(&step)?;
        let expected = combine(&[
            fingerprinter.fingerprint(&["one.txt".to_string()], "/x")?,
            fingerprinter.fingerprint(&["two.txt".to_string()], "/x")?,
        ]);
        assert_eq!(content.fingerprint, expected);
        assert_eq!(content.content_length, 3);
        assert_eq!(content.files, 2);
        Ok(())
    }

    #[test]
    fn missing_sources_are_unreadable() -> anyhow::Result<()> {
        let temp = tempdir()?;
        let fingerprinter = Fingerprinter::new(&context(temp.path()))?;
        let err = fingerprinter
            .fingerprint(&["nope.txt".to_string()], "/x")
            .expect_err("no files should match");
        assert_eq!(err.code(), "SBX110");
        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn symlink_targets_are_hashed_by_name_not_content() -> anyhow::Result<()> {
        use std::os::unix::fs::symlink;

        let outside = tempdir()?;
        let secret = outside.path().join("secret.txt");
        fs::write(&secret, "TOP SECRET")?;
        let temp = tempdir()?;
        write_pinned(&temp.path().join("app/main.py"), "print()")?;
        symlink(&secret, temp.path().join("app/link.txt"))?;

        let fingerprinter = Fingerprinter::new(&context(temp.path()))?;
        let step = CopyStep::new(vec!["app".into()], "/srv");
        let before = fingerprinter.fingerprint_step(&step)?;
        assert_eq!(before.files, 2);
        assert_eq!(before.content_length, "print()".len() as u64);

        fs::write(&secret, "ROTATED SECRET")?;
        let after = fingerprinter.fingerprint_step(&step)?;
        assert_eq!(before.fingerprint, after.fingerprint);
        Ok(())
    }
}
