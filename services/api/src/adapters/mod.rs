pub mod blob;
pub mod db;
pub mod identity;
pub mod password;

pub use blob::FsBlobStore;
pub use db::DbAdapter;
pub use identity::JwtIdentityAdapter;
pub use password::Argon2Hasher;
