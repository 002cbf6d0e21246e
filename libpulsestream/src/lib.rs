//! # pulsestream
//!
//! pulsestream is the ingestion layer for pulse-resolved photon science data, written in
//! Rust. Facilities deliver their data in bulk units (trains) holding many X-ray pulses,
//! each named with facility specific identifiers. pulsestream pulls those trains from a
//! live source or from recorded files, hands them out one pulse at a time, and translates
//! the native field names into a small set of common keys so that analysis code never has
//! to know which facility it is running at.
//!
//! ## Installation
//!
//! The only method of install is from source. If you have not used Rust before, see the
//! [Rust docs](https://www.rust-lang.org/tools/install) for installing the tool chain.
//!
//! To build and install the CLI use `cargo install --path ./pulsestream_cli` from the top
//! level pulsestream repository.
//!
//! ## Concepts
//!
//! - A [`backend::Backend`] owns one stream. The [`online::OnlineBackend`] talks to a live
//!   source through a [`transport::Transport`], prefetching the next train while the
//!   current one is consumed. The [`offline::OfflineBackend`] reads recorded train files.
//! - Every pulse is handed to analysis code as an [`event_translator::EventTranslator`],
//!   which translates common keys on demand and caches what it translated.
//! - The [`key_schema::KeySchema`] holds the facility knowledge: which native field maps
//!   to which common key, under what record name, in what unit.
//!
//! ## Configuration
//!
//! The CLI is driven by a YAML configuration file. A template can be written with
//! `pulsestream_cli -p config.yml new`. The format is as follows:
//!
//! ```yml
//! backend: online
//! socket: 127.0.0.1:4500
//! read_ahead: 2
//! data_path: null
//! key_schema_path: null
//! n_events: null
//! status_interval: 100
//! hitfinding:
//!   enabled: false
//!   detector_key: photonPixelDetectors
//!   detector_name: AGIPD00
//!   adu_threshold: 20.0
//!   hitscore_threshold: 200
//!   history: 100
//! ```
//!
//! `backend` is either `online` (connect to `socket`) or `offline` (read the recorded
//! trains in `data_path`). If `key_schema_path` is `null`, the bundled default schema is
//! used.
//!
//! ### Key Schema Format
//!
//! The key schema is a CSV file with *no* whitespaces and a header line. The columns are:
//!
//! ```csv
//! native_type,common_key,record_name,unit
//! ```
//!
//! Common keys in use include `photonPixelDetectors`, `pulseEnergies`, `photonEnergies`,
//! `motorPositions` and `parameters`. The keys `analysis` and `eventID` are reserved.
//!
//! ## Recorded Data
//!
//! Recorded runs are directories of `run-*.trains` files, read in name order. Each file is
//! a sequence of length-prefixed train frames (see [`train::Train`] for the layout). A
//! recorded run can be served as if it were live using `pulsestream_cli replay`.
pub mod background_stack;
pub mod backend;
pub mod config;
pub mod constants;
pub mod error;
pub mod event_translator;
pub mod hitfinding;
pub mod key_schema;
pub mod offline;
pub mod online;
pub mod process;
pub mod record;
pub mod replay;
pub mod stream_status;
pub mod train;
pub mod train_file;
pub mod train_stack;
pub mod transport;
