pub mod oauth;
pub mod provider;
