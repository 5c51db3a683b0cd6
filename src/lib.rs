//! Checkpointed vulnerability remediation.
//!
//! A session scans a project tree, then drives each finding through
//! fix → verify → regression test, with a version-control checkpoint around
//! every file mutation so any fix can be rolled back.

pub mod config;
pub mod context;
pub mod engine;
pub mod errors;
pub mod fixer;
pub mod gates;
pub mod ignore;
pub mod pipeline;
pub mod remedy_config;
pub mod report;
pub mod scanner;
pub mod session;
pub mod testgen;
pub mod tracker;
pub mod ui;
pub mod verify;
