//! A mainframe's scheduler and the installation that owns one or more of
//! them plus the shared ECS (`spec.md` §2, §3).

mod installation;
mod mainframe;

pub use installation::{Installation, InstallationError};
pub use mainframe::Mainframe;
