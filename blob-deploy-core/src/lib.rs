#![doc = "blob-deploy-core: core pipeline library for blob-deploy."]

//! This crate contains the data model and the coordination logic for deploying a
//! set of local files into a blob-storage container.
//! Concrete storage backends and the command line live in the `blob-deploy` crate.
//!
//! # Usage
//! Build [`config::DeployOptions`], collect [`config::FileDescriptor`]s, hand both to
//! [`deploy::deploy`] together with a [`contract::BlobTransport`] and an [`events::EventSink`].

pub mod compress;
pub mod config;
pub mod contract;
pub mod deploy;
pub mod error;
pub mod events;
pub mod prepare;
