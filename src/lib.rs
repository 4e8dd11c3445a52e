pub mod app;
pub mod cancel;
pub mod checksum;
pub mod config;
pub mod dataset;
pub mod domain;
pub mod download;
pub mod entity;
pub mod error;
pub mod fs_util;
pub mod index;
pub mod loaders;
pub mod manifest;
pub mod output;
pub mod registry;
pub mod store;
pub mod validate;
