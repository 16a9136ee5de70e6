pub mod advice;
pub mod auth;
pub mod calendar;
pub mod dates;
pub mod domain;
pub mod engine;
pub mod memory;
pub mod ports;

pub use advice::build_advice;
pub use auth::AuthService;
pub use calendar::CalendarAggregator;
pub use domain::{
    AudioFormat, Clip, ClipBounds, DaySummary, FinalizeOverrides, Session, SessionSnapshot,
    SessionStatus, SleepQuality, TokenPair, User, UserCredentials,
};
pub use engine::{ClipUpload, SessionEngine};
pub use ports::{
    BlobStore, FinalizeOutcome, IdentityProvider, PasswordHasher, PortError, PortResult,
    SessionStore, UserStore,
};
