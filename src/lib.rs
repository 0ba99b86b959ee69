//! Backend driven authoritative DNS plugins.
//!
//! This crate provides the building blocks of a DNS server that answers
//! authoritatively from external data sources rather than from zone files.
//! A server is put together as a [`Chain`][plugin::Chain] of plugins, each
//! of which may answer a request or pass it on.
//!
//! # Modules
//!
//! * [plugin] contains the [`Handler`][plugin::Handler] trait plugins
//!   implement, the chain itself and the [`Zones`][plugin::Zones] a plugin
//!   is responsible for.
//! * [backend] defines the [`Backend`][backend::Backend] contract for data
//!   sources and provides an in-memory map as well as, depending on the
//!   enabled features, adapters for a key/value store and a cluster service
//!   registry.
//! * [resolver] contains the [`Resolver`][resolver::Resolver] plugin
//!   turning queries into backend lookups and their results into answers.
//! * [stub] forwards requests for stub zones to upstream servers.
//! * [transfer] streams complete zones to secondaries via AXFR.
//! * [config] deals with the configuration of all of the above.
//!
//! # Reference of Feature Flags
//!
//! * `store`: Enables the [`store`][backend::store] backend which serves
//!   SkyDNS style service entries from a hierarchical key/value store.
//! * `cluster`: Enables the [`cluster`][backend::cluster] backend which
//!   serves the services of a cluster service registry.
//!
//! Both features are enabled by default.

#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod backend;
pub mod config;
pub mod error;
pub mod plugin;
pub mod request;
pub mod resolver;
pub mod singleflight;
pub mod stub;
pub mod transfer;
pub mod types;
