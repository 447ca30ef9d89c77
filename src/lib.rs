//! Bootlink: network boot receiver for DS-family handhelds.
//!
//! A companion host pushes an executable image over the local network; the
//! device reconstructs it on its filesystem — either as a fresh
//! zlib-decompressed copy or as a VCDIFF (RFC 3284) patch against a
//! previously received copy — and hands the resulting path to an external
//! loader.
//!
//! The crate provides:
//! - The wire protocol and session state machine (`net`)
//! - A streaming zlib decoder fed by protocol frames (`inflate`)
//! - A streaming VCDIFF patch decoder with block-granular source access (`delta`)
//! - An optional CLI (`cli` feature) with device (`listen`) and host (`push`) sides
//!
//! # Quick Start
//!
//! ```no_run
//! use bootlink::config::DeviceConfig;
//! use bootlink::net::session::Receiver;
//!
//! let config = DeviceConfig::default();
//! let mut receiver = Receiver::bind(&config).unwrap();
//! let received = receiver.run(&config).unwrap();
//! println!("boot {} ({})", received.path.display(), received.argument);
//! ```

pub mod config;
pub mod delta;
pub mod inflate;
pub mod net;

#[cfg(feature = "cli")]
pub mod cli;
