//! The two publishing branches fed by a single build.

pub mod site;
pub mod translations;

pub use site::{DEFAULT_REMOTE_ROOT, SitePublishReport, SitePublisher};
pub use translations::{
    DryRunRepo, GitCli, SKIP_CI_MARKER, TranslationPublishReport, TranslationPublisher,
    TranslationRepo, commit_message,
};
