pub mod config;
pub mod features;
pub mod server;
pub mod shared;

#[cfg(test)]
pub(crate) mod test_support;
