mod fs;
mod store;

pub use fs::{FileStat, FileStore, LocalFileStore};
pub use store::{LocalMediaStore, PurgeReport, PurgeScope};
