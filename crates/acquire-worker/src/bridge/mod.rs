//! Pipe bridge between the worker and its method subprocess.
//!
//! This module provides the wire protocol and codec for the two anonymous
//! pipes connecting a worker (parent) to its method (child).
//!
//! # Architecture
//!
//! - **protocol**: Status codes, tags, inbound `Message`, outbound `Request`
//! - **codec**: Blank-line framing codec over `BytesMut`
//! - **framer**: Non-blocking read accumulation into complete messages

pub mod codec;
pub mod framer;
pub mod protocol;
