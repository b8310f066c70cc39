#![cfg_attr(doc, doc = include_str!("../README.md"))]

pub mod error;
pub mod hub;
pub mod negotiate;
pub mod session;
pub mod transport;
pub mod ws;

use crate::error::Error;

pub type Result<T> = std::result::Result<T, Error>;
