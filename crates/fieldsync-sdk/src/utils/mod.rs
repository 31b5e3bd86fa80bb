//! 通用工具

pub mod time;
