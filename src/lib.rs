#![cfg_attr(doc, doc = include_str!("../README.md"))]

pub mod context;
pub mod endpoint;
pub mod error;
pub mod ws;

use crate::error::Error;

pub type Result<T> = std::result::Result<T, Error>;
