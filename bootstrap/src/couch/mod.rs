pub mod admin;
pub mod client;
pub mod installer;
pub mod probe;
pub mod provision;
pub mod rotation;
pub mod transport;

#[cfg(test)]
pub(crate) mod fake;
