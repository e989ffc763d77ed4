//! Build-context content: source resolution, fingerprints and archives.

mod archive;
mod fingerprint;
mod sources;

pub use archive::{ArchiveBuilder, ContentArchive};
pub use fingerprint::{combine, Fingerprinter, StepContent};
pub use sources::{EntryKind, ResolvedFile, SourceResolver};

impl Fingerprinter {
    /// Archive builder over the same resolver, so archives contain exactly
    /// the files that were fingerprinted.
    pub fn archive_builder(&self) -> ArchiveBuilder {
        ArchiveBuilder::new(self.resolver().clone())
    }
}
