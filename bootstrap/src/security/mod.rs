pub mod credential_store;
pub mod crypto;
pub mod secret_protector;
