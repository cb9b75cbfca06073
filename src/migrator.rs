//! Schema migrations live in the `migrations` workspace crate so they can be
//! run standalone; the service embeds the same migrator.

pub use migrations::Migrator;
