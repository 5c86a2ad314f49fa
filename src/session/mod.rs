//! Session validity, credential storage and login
//!
//! A session is valid exactly when a decodable credential is stored and
//! its expiry lies in the future. [`SessionGuard`] recomputes this on every
//! query; nothing caches validity.

pub mod auth;
pub mod credential;
pub mod guard;
pub mod token_store;

pub use auth::AuthService;
pub use credential::{decode_credential, Claims, Role, Subject};
pub use guard::{
    Clock, Navigator, Session, SessionEvent, SessionGuard, SessionState, SystemClock,
};
pub use token_store::{
    open_token_store, DurableSlot, FileSlot, FileTokenStore, KeyringSlot, KeyringTokenStore,
    MemorySlot, MemoryTokenStore, StoredCredential, TieredTokenStore, TokenStore,
};
