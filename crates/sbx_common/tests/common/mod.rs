//! Common test utilities and fixtures.

pub mod fixtures;
pub mod forge;
pub mod services;

#[allow(unused_imports)]
pub use fixtures::*;
#[allow(unused_imports)]
pub use forge::*;
#[allow(unused_imports)]
pub use services::*;
