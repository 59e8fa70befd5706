pub mod args;
pub mod op;
pub mod ops;

pub use ops::{Daemon, Feed, Follow, Health, Init, Peers, Publish, Unfollow, Version, Whoami};
