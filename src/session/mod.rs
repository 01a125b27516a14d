mod manager;
mod token_store;

pub use manager::SessionManager;
pub use token_store::{
    FileTokenStore, KeyringTokenStore, MemoryTokenStore, StoreError, TokenStore, KEYRING_SERVICE,
};
