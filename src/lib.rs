//! # revmig
//!
//! Revision-based schema migrations.
//!
//! Declared tables are diffed against the schema recorded by a chain of
//! revision files; each diff becomes a new revision holding forward and
//! reverse operations. A runner walks the chain against a database, one
//! transaction per revision, and records the current revision in a marker
//! table.
//!
//! ## Feature Flags
//!
//! - `commands` (default): the `revmig` command line and its command
//!   implementations
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use revmig::migrations::prelude::*;
//!
//! # async fn example() -> revmig::migrations::Result<()> {
//! let repository = FilesystemRepository::new("migrations");
//! let graph = repository.load_graph().await?;
//! let store = SqlStore::connect("sqlite://app.db?mode=rwc").await?;
//!
//! let mut executor = MigrationExecutor::new(store, graph);
//! let result = executor.up(&Target::Head).await?;
//! println!("now at {:?}", result.marker);
//! # Ok(())
//! # }
//! ```

pub use revmig_migrations as migrations;

#[cfg(feature = "commands")]
pub use revmig_commands as commands;
