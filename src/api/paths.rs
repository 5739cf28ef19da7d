//! All Paths are recorded here for use throughout this codebase
pub mod base {
    pub const ROOT: &str = "/";
    pub const HEALTH: &str = "/health";
    pub const ABOUT: &str = "/about";
    pub const STATS: &str = "/stats";
}

pub mod system {
    pub const PEERS: &str = "/system/peers";
    pub const LOCAL: &str = "/system/local";
}

pub const DIRECTORY: &str = "/directory";
pub const FLAGS: &str = "/flags";
