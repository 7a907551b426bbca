//! Library to backup MySQL databases at their scheduled time of day using `mysqldump`.
//!
//! The databases and their schedule are configured in [`config`]. The [`engine`] runs
//! the dumps, classifies the errors reported by `mysqldump` and hands successful dumps
//! to a [`storage`] sink.

#![forbid(unsafe_code)]

pub mod cli;
pub mod config;
pub mod engine;
pub mod storage;

#[cfg(test)]
mod testing;
