pub mod daemon;
pub mod feed;
pub mod follow;
pub mod health;
pub mod init;
pub mod peers;
pub mod publish;
pub mod version;
pub mod whoami;

pub use daemon::Daemon;
pub use feed::Feed;
pub use follow::{Follow, Unfollow};
pub use health::Health;
pub use init::Init;
pub use peers::Peers;
pub use publish::Publish;
pub use version::Version;
pub use whoami::Whoami;
