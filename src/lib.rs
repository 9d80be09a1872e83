// ABOUTME: Library crate for docksock exposing the discovery and relay engine

#![allow(missing_docs)]

pub mod cli;
pub mod config;
pub mod expose;
