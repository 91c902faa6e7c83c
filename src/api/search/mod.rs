//! Search API / 搜索接口

mod admin;
mod query;
pub mod types;

pub use admin::*;
pub use query::*;
