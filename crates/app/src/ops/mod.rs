pub mod init;
pub mod lease;
pub mod publish;
pub mod version;

pub use init::Init;
pub use lease::Lease;
pub use publish::Publish;
pub use version::Version;
