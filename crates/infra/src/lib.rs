// Quill Infrastructure - Generator & Identity Adapters
// Implements: BookGenerator, IdentityProvider

pub mod command_generator;
pub mod http_generator;
pub mod identity;

#[cfg(test)]
mod test_http;

pub use command_generator::CommandBookGenerator;
pub use http_generator::HttpBookGenerator;
pub use identity::{HandshakeIdentity, HttpIdentityProvider};
