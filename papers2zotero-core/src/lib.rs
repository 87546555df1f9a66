#![doc = "papers2zotero-core: core migration pipeline for papers2zotero."]

//! This crate holds the data model, mapping, attachment handling and the
//! checkpointed batch scheduler that moves a Papers2 library into Zotero.
//! Transport-level clients (Zotero HTTP, Google Drive) live in the CLI crate
//! and plug in through the traits in [`contract`].
//!
//! # Usage
//! Build a [`config::SynchroniseConfig`], open a [`checkpoint::CheckpointStore`]
//! and an [`error_sink::ErrorSink`], then call [`synchronise::synchronise`] with
//! a [`contract::RecordStore`] (e.g. [`papers2::Papers2Store`]) and a
//! [`contract::RemoteLibrary`].

pub mod attachments;
pub mod checkpoint;
pub mod collections;
pub mod config;
pub mod contract;
pub mod dryrun;
pub mod error;
pub mod error_sink;
pub mod mapper;
pub mod papers2;
pub mod record;
pub mod sync_client;
pub mod synchronise;
