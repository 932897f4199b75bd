// OPCUA for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2024 Adam Lock

//! The core module holds functionality that is common to the transport side of the stack,
//! below the secure channel.

pub mod comms;
