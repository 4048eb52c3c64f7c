//! repoherd - batch synchronization of local git working copies
//!
//! repoherd reads a line-oriented configuration file that groups local
//! repositories, then walks the selected groups in order and brings each
//! working copy up to date by shelling out to git: fetch the preferred
//! mirror remotes first, then pull (or run an operator-supplied
//! sub-command instead).
//!
//! ## Modules
//!
//! - [`config`]: configuration model and directive parser
//! - [`git`]: git version probe and command invocations
//! - [`sync`]: group resolution and the repository traversal engine

pub mod config;
pub mod git;
pub mod sync;

pub use config::{Config, GitSetting};
pub use git::GitClient;
pub use sync::{Resume, ResumeMode, RunOptions, SyncEngine, SyncSummary};
