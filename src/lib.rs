pub mod app;
pub mod assets;
pub mod config;
pub mod domain;
pub mod driver;
pub mod error;
pub mod fetch;
pub mod fs_util;
pub mod http;
pub mod normalize;
pub mod output;
pub mod store;
