//! # toxiproxy
//!
//! A TCP proxy for simulating network conditions during testing.
//!
//! This crate implements a toxic-chain proxy engine that:
//! - Bridges a listen address to an upstream address, one `Link` per
//!   direction
//! - Runs each direction's bytes through a live, hot-swappable chain of
//!   `Toxic` stages (latency, bandwidth limits, disconnects, ...)
//! - Exposes an admin HTTP API to create proxies and reconfigure their
//!   toxics without dropping or duplicating in-flight data
//!
//! ## Architecture
//!
//! ```text
//! Client ──┐                              ┌── Upstream
//!          │                              │
//!          ├──────────[ Link ]────────────►
//!          │    noop -> latency -> ...    │
//!          │                              │
//!      ┌───┴──────────────────────────────┴───┐
//!      │              Proxy / ProxyManager     │
//!      │  ┌──────────────────────────────────┐ │
//!      │  │         ToxicCollection           │ │
//!      │  └──────────────────────────────────┘ │
//!      └───────────────────────────────────────┘
//! ```
//!
//! ## Admin HTTP surface
//!
//! `GET/POST /proxies`, `GET/DELETE /proxies/:name`, and
//! `GET/POST /proxies/:name/toxics[/:toxic]` — see `crate::http`.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod error;
pub mod http;
pub mod proxy;
pub mod stream;
pub mod toxics;
