//! Web control panel: a polling HTML page plus a small JSON/form API over
//! the supervisor.

pub mod routes;
pub mod server;
pub mod static_files;
