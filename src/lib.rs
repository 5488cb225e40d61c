// App-specific modules
pub mod codec;
pub mod config;
pub mod pipeline;
pub mod resolvers;
pub mod router;
pub mod store;

#[cfg(test)]
pub(crate) mod testutil;
